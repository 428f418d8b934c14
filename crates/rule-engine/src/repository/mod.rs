//! 仓储层
//!
//! 规则定义和历史运行数据的访问接口。引擎只依赖这里的 trait，
//! 具体存储（数据库、内存）由调用方注入。

mod memory;

pub use memory::{InMemoryHistory, InMemoryRules};

use chrono::{DateTime, Utc};
use observer_shared::error::Result;
use observer_shared::events::{AlertLevel, RunAlertType, RunStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 持久化的规则定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub id: Uuid,
    /// 规则所属的旅程，也是规则查询的作用域
    pub journey_id: Uuid,
    /// 绑定的组件；为空时对旅程内所有组件的事件生效
    pub component_id: Option<Uuid>,
    /// 规则数据格式版本，如 `simple_v1`
    pub schema_version: String,
    pub rule_data: serde_json::Value,
    pub action_name: String,
    #[serde(default)]
    pub action_args: serde_json::Value,
}

impl RuleRecord {
    pub fn new(
        journey_id: Uuid,
        schema_version: impl Into<String>,
        rule_data: serde_json::Value,
        action_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            journey_id,
            component_id: None,
            schema_version: schema_version.into(),
            rule_data,
            action_name: action_name.into(),
            action_args: serde_json::Value::Null,
        }
    }

    pub fn with_component(mut self, component_id: Uuid) -> Self {
        self.component_id = Some(component_id);
        self
    }

    pub fn with_action_args(mut self, args: serde_json::Value) -> Self {
        self.action_args = args;
        self
    }
}

/// 历史运行记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub key: Option<String>,
    pub name: Option<String>,
    pub status: RunStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// 运行上产生过的告警
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAlertRecord {
    pub id: Uuid,
    pub run_id: Uuid,
    #[serde(rename = "type")]
    pub alert_type: RunAlertType,
    pub level: AlertLevel,
    pub description: String,
    pub created_on: DateTime<Utc>,
}

/// 运行名称过滤
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunNameFilter {
    Any,
    /// 名称相等；`Equals(None)` 匹配未命名的运行
    Equals(Option<String>),
}

/// 历史运行查询
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunQuery {
    pub pipeline_id: Uuid,
    pub name: RunNameFilter,
    pub limit: Option<usize>,
}

/// 规则仓储接口
#[cfg_attr(test, mockall::automock)]
pub trait RuleRepository: Send + Sync {
    /// 查询绑定到任一作用域的规则
    fn rules_for_scopes(&self, scope_ids: &[Uuid]) -> Result<Vec<RuleRecord>>;
}

/// 历史数据接口
#[cfg_attr(test, mockall::automock)]
pub trait HistoryStore: Send + Sync {
    /// 按开始时间倒序（最新在前）返回流水线的运行
    fn runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>>;

    fn run_alerts(&self, run_id: Uuid) -> Result<Vec<RunAlertRecord>>;
}
