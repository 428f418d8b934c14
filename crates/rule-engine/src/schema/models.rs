//! simple_v1 规则数据模型
//!
//! 规则数据形如：
//!
//! ```json
//! {
//!   "when": "all",
//!   "conditions": [
//!     {"run_state": {"matches": "FAILED", "count": 3, "trigger_successive": true}}
//!   ]
//! }
//! ```
//!
//! 每个条件是只含一个键的对象，键为条件种类；一条规则内所有条件种类相同。

use crate::error::{Result, RuleError};
use crate::evaluator::compile_regex;
use crate::operators::Operator;
use observer_shared::events::{
    AlertLevel, InstanceAlertType, LogLevel, RunAlertType, RunStatus, TestStatus,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 条件之间的组合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum When {
    Any,
    All,
}

/// 条件种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    TaskStatus,
    RunState,
    TestStatus,
    MetricLog,
    MessageLog,
    InstanceAlert,
}

impl ConditionKind {
    pub const ALL: [ConditionKind; 6] = [
        Self::TaskStatus,
        Self::RunState,
        Self::TestStatus,
        Self::MetricLog,
        Self::MessageLog,
        Self::InstanceAlert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskStatus => "task_status",
            Self::RunState => "run_state",
            Self::TestStatus => "test_status",
            Self::MetricLog => "metric_log",
            Self::MessageLog => "message_log",
            Self::InstanceAlert => "instance_alert",
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionKind {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RuleError::invalid(s, "未知的条件种类"))
    }
}

/// run_state 可匹配的状态：运行状态或运行告警类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Running,
    Completed,
    CompletedWithWarnings,
    Failed,
    LateStart,
    LateEnd,
    MissingRun,
    UnexpectedStatusChange,
}

/// run_state 的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStateClass {
    /// 运行中，不支持历史计数
    Running,
    /// 终态运行状态，按历史运行的状态计数
    Terminal(RunStatus),
    /// 运行告警，按历史运行上的告警计数
    Alert(RunAlertType),
}

impl RunState {
    pub fn classify(self) -> RunStateClass {
        match self {
            Self::Running => RunStateClass::Running,
            Self::Completed => RunStateClass::Terminal(RunStatus::Completed),
            Self::CompletedWithWarnings => {
                RunStateClass::Terminal(RunStatus::CompletedWithWarnings)
            }
            Self::Failed => RunStateClass::Terminal(RunStatus::Failed),
            Self::LateStart => RunStateClass::Alert(RunAlertType::LateStart),
            Self::LateEnd => RunStateClass::Alert(RunAlertType::LateEnd),
            Self::MissingRun => RunStateClass::Alert(RunAlertType::MissingRun),
            Self::UnexpectedStatusChange => {
                RunStateClass::Alert(RunAlertType::UnexpectedStatusChange)
            }
        }
    }
}

fn default_count() -> usize {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskStatusCondition {
    pub matches: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunStateCondition {
    pub matches: RunState,
    /// 需要连续出现的次数（含当前运行）
    #[serde(default = "default_count")]
    pub count: usize,
    /// 为 false 时只在恰好第 count 次时触发一次
    #[serde(default = "default_true")]
    pub trigger_successive: bool,
    /// 只统计与当前运行同名的历史运行
    #[serde(default)]
    pub group_run_name: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestStatusCondition {
    pub matches: TestStatus,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricLogCondition {
    pub key: Option<String>,
    pub static_value: f64,
    pub operator: String,
}

impl MetricLogCondition {
    /// 指标比较允许的操作符
    pub const OPERATORS: [Operator; 5] = [
        Operator::Exact,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
    ];
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageLogCondition {
    /// 为空时匹配任意级别
    #[serde(default)]
    pub level: Option<Vec<LogLevel>>,
    /// 对消息内容做正则搜索
    #[serde(default)]
    pub matches: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceAlertCondition {
    /// 两个列表至少一个非空，为空的一侧不参与匹配
    #[serde(default)]
    pub level_matches: Option<Vec<AlertLevel>>,
    #[serde(default)]
    pub type_matches: Option<Vec<InstanceAlertType>>,
}

/// 单个条件
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    TaskStatus(TaskStatusCondition),
    RunState(RunStateCondition),
    TestStatus(TestStatusCondition),
    MetricLog(MetricLogCondition),
    MessageLog(MessageLogCondition),
    InstanceAlert(InstanceAlertCondition),
}

impl Condition {
    pub fn kind(&self) -> ConditionKind {
        match self {
            Self::TaskStatus(_) => ConditionKind::TaskStatus,
            Self::RunState(_) => ConditionKind::RunState,
            Self::TestStatus(_) => ConditionKind::TestStatus,
            Self::MetricLog(_) => ConditionKind::MetricLog,
            Self::MessageLog(_) => ConditionKind::MessageLog,
            Self::InstanceAlert(_) => ConditionKind::InstanceAlert,
        }
    }

    /// 解析并校验条件体
    pub fn parse(kind: ConditionKind, body: &serde_json::Value) -> Result<Self> {
        let condition = match kind {
            ConditionKind::TaskStatus => Self::TaskStatus(body_of(kind, body)?),
            ConditionKind::RunState => Self::RunState(body_of(kind, body)?),
            ConditionKind::TestStatus => Self::TestStatus(body_of(kind, body)?),
            ConditionKind::MetricLog => Self::MetricLog(body_of(kind, body)?),
            ConditionKind::MessageLog => Self::MessageLog(body_of(kind, body)?),
            ConditionKind::InstanceAlert => Self::InstanceAlert(body_of(kind, body)?),
        };
        condition.validate()?;
        Ok(condition)
    }

    fn validate(&self) -> Result<()> {
        let kind = self.kind();
        match self {
            Self::RunState(c) => {
                if c.count == 0 {
                    return Err(RuleError::invalid(kind.as_str(), "count 必须大于 0"));
                }
                if c.matches == RunState::Running && (c.count != 1 || !c.trigger_successive) {
                    return Err(RuleError::invalid(
                        kind.as_str(),
                        "RUNNING 状态只支持 count=1 且 trigger_successive=true",
                    ));
                }
            }
            Self::MetricLog(c) => {
                match c.key.as_deref() {
                    Some(key) if !key.is_empty() => {}
                    _ => return Err(RuleError::invalid(kind.as_str(), "key 不能为空")),
                }
                let allowed = c
                    .operator
                    .parse::<Operator>()
                    .is_ok_and(|op| MetricLogCondition::OPERATORS.contains(&op));
                if !allowed {
                    return Err(RuleError::invalid(
                        kind.as_str(),
                        format!("不支持的操作符 '{}'", c.operator),
                    ));
                }
                if !c.static_value.is_finite() {
                    return Err(RuleError::invalid(kind.as_str(), "static_value 必须是有限数值"));
                }
            }
            Self::MessageLog(c) => {
                if let Some(pattern) = &c.matches {
                    compile_regex(pattern, false)
                        .map_err(|e| RuleError::invalid(kind.as_str(), e.to_string()))?;
                }
            }
            Self::InstanceAlert(c) => {
                let has_levels = c.level_matches.as_ref().is_some_and(|l| !l.is_empty());
                let has_types = c.type_matches.as_ref().is_some_and(|t| !t.is_empty());
                if !has_levels && !has_types {
                    return Err(RuleError::invalid(
                        kind.as_str(),
                        "level_matches 和 type_matches 至少一个不能为空",
                    ));
                }
            }
            Self::TaskStatus(_) | Self::TestStatus(_) => {}
        }
        Ok(())
    }
}

fn body_of<T: DeserializeOwned>(kind: ConditionKind, body: &serde_json::Value) -> Result<T> {
    serde_json::from_value(body.clone()).map_err(|e| RuleError::invalid(kind.as_str(), e.to_string()))
}

/// simple_v1 规则
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleV1Rule {
    pub when: When,
    pub conditions: Vec<Condition>,
}

impl SimpleV1Rule {
    /// 解析规则数据
    pub fn parse(data: &serde_json::Value) -> Result<Self> {
        const RULE: &str = "rule";

        let obj = data
            .as_object()
            .ok_or_else(|| RuleError::invalid(RULE, "规则数据必须是对象"))?;

        if let Some(unknown) = obj.keys().find(|k| *k != "when" && *k != "conditions") {
            return Err(RuleError::invalid(RULE, format!("未知字段 '{unknown}'")));
        }

        let when = match obj.get("when") {
            Some(value) => serde_json::from_value::<When>(value.clone())
                .map_err(|_| RuleError::invalid(RULE, format!("when 必须是 any 或 all，实际为 {value}")))?,
            None => return Err(RuleError::invalid(RULE, "缺少 when")),
        };

        let entries = obj
            .get("conditions")
            .and_then(|c| c.as_array())
            .ok_or_else(|| RuleError::invalid(RULE, "conditions 必须是列表"))?;
        if entries.is_empty() {
            return Err(RuleError::invalid(RULE, "conditions 不能为空"));
        }

        let mut conditions = Vec::with_capacity(entries.len());
        for entry in entries {
            let (key, body) = match entry.as_object() {
                Some(map) if map.len() == 1 => map
                    .iter()
                    .next()
                    .ok_or_else(|| RuleError::invalid(RULE, "条件不能为空"))?,
                _ => {
                    return Err(RuleError::invalid(
                        RULE,
                        "每个条件必须是只含一个种类键的对象",
                    ));
                }
            };
            let kind: ConditionKind = key.parse()?;
            conditions.push(Condition::parse(kind, body)?);
        }

        let first = conditions[0].kind();
        if let Some(other) = conditions.iter().find(|c| c.kind() != first) {
            return Err(RuleError::invalid(
                other.kind().as_str(),
                format!("一条规则内的条件种类必须相同，已有 {first}"),
            ));
        }

        Ok(Self { when, conditions })
    }

    pub fn kind(&self) -> Option<ConditionKind> {
        self.conditions.first().map(Condition::kind)
    }
}
