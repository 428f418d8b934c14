//! 规则动作
//!
//! 规则匹配后执行的副作用。动作由名称在注册表中查找工厂构造，
//! 每个规则可以携带一个或多个触发器。

use crate::error::{Result, RuleError};
use crate::repository::RuleRecord;
use observer_shared::events::Event;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// 内置的日志动作名称
pub const LOG_ACTION: &str = "LOG";

/// 触发器执行错误
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("动作执行失败: {0}")]
    Failed(String),

    #[error("动作执行 panic: {0}")]
    Panicked(String),
}

/// 规则匹配后的副作用
pub trait Trigger: Send + Sync {
    /// 触发器名称，用于日志和失败报告
    fn name(&self) -> &str;

    fn trigger(
        &self,
        event: &Event,
        rule: &RuleRecord,
        journey_id: Uuid,
    ) -> std::result::Result<(), TriggerError>;
}

/// 触发器工厂，根据动作参数构造触发器
pub trait ActionFactory: Send + Sync {
    fn build(&self, action_args: &serde_json::Value) -> Result<Arc<dyn Trigger>>;
}

impl<F> ActionFactory for F
where
    F: Fn(&serde_json::Value) -> Result<Arc<dyn Trigger>> + Send + Sync,
{
    fn build(&self, action_args: &serde_json::Value) -> Result<Arc<dyn Trigger>> {
        self(action_args)
    }
}

/// 以闭包实现的触发器
pub struct FnTrigger<F> {
    name: String,
    f: F,
}

impl<F> FnTrigger<F>
where
    F: Fn(&Event, &RuleRecord, Uuid) -> std::result::Result<(), TriggerError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Trigger for FnTrigger<F>
where
    F: Fn(&Event, &RuleRecord, Uuid) -> std::result::Result<(), TriggerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn trigger(
        &self,
        event: &Event,
        rule: &RuleRecord,
        journey_id: Uuid,
    ) -> std::result::Result<(), TriggerError> {
        (self.f)(event, rule, journey_id)
    }
}

/// 将匹配结果写入日志
#[derive(Debug, Clone)]
pub struct LogAction {
    message: Option<String>,
}

impl LogAction {
    /// 参数可选：`{"message": "..."}`
    pub fn from_args(args: &serde_json::Value) -> Result<Self> {
        let message = match args.get("message") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(RuleError::InvalidActionArgs {
                    action: LOG_ACTION.to_string(),
                    reason: format!("message 必须是字符串，实际为 {other}"),
                });
            }
        };
        Ok(Self { message })
    }
}

impl Trigger for LogAction {
    fn name(&self) -> &str {
        LOG_ACTION
    }

    fn trigger(
        &self,
        event: &Event,
        rule: &RuleRecord,
        journey_id: Uuid,
    ) -> std::result::Result<(), TriggerError> {
        info!(
            rule_id = %rule.id,
            journey_id = %journey_id,
            event_id = %event.event_id(),
            event_type = event.event_type(),
            message = self.message.as_deref().unwrap_or_default(),
            "规则已匹配"
        );
        Ok(())
    }
}

/// 动作注册表
#[derive(Clone, Default)]
pub struct ActionRegistry {
    factories: HashMap<String, Arc<dyn ActionFactory>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册内置动作
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(LOG_ACTION, |args: &serde_json::Value| -> Result<Arc<dyn Trigger>> {
            Ok(Arc::new(LogAction::from_args(args)?) as Arc<dyn Trigger>)
        });
        registry
    }

    /// 注册动作工厂，同名动作会被覆盖
    pub fn register(&mut self, name: impl Into<String>, factory: impl ActionFactory + 'static) {
        let name = name.into();
        if self.factories.insert(name.clone(), Arc::new(factory)).is_some() {
            warn!(action = %name, "动作工厂被覆盖");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// 根据规则的动作名称和参数构造触发器
    pub fn build(&self, action_name: &str, action_args: &serde_json::Value) -> Result<Vec<Arc<dyn Trigger>>> {
        let factory = self
            .factories
            .get(action_name)
            .ok_or_else(|| RuleError::UnknownAction(action_name.to_string()))?;
        Ok(vec![factory.build(action_args)?])
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ActionRegistry").field("actions", &names).finish()
    }
}
