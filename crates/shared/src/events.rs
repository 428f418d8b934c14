//! 领域事件模型
//!
//! 定义进入规则引擎的全部事件种类：流水线运行状态、任务状态、指标日志、
//! 消息日志、测试结果、数据集操作，以及系统内部产生的实例告警、运行告警
//! 和 Agent 状态变更。事件是一个封闭的带标签枚举，规则引擎按种类读取字段。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// 状态与级别枚举
// ---------------------------------------------------------------------------

/// 运行 / 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    CompletedWithWarnings,
    Failed,
    Missing,
}

impl RunStatus {
    /// 终态：运行不会再迁移到其他状态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithWarnings | Self::Failed | Self::Missing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::CompletedWithWarnings => "COMPLETED_WITH_WARNINGS",
            Self::Failed => "FAILED",
            Self::Missing => "MISSING",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 消息日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 告警级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Error,
    Warning,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个测试结果的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    Passed,
    Failed,
    Warning,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Warning => "WARNING",
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 运行告警类型（由调度器和运行状态机产生）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunAlertType {
    LateStart,
    LateEnd,
    MissingRun,
    UnexpectedStatusChange,
}

impl RunAlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LateStart => "LATE_START",
            Self::LateEnd => "LATE_END",
            Self::MissingRun => "MISSING_RUN",
            Self::UnexpectedStatusChange => "UNEXPECTED_STATUS_CHANGE",
        }
    }
}

impl std::fmt::Display for RunAlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 实例告警类型（旅程实例级别）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceAlertType {
    OutOfSequence,
    DatasetNotReady,
    Incomplete,
    LateEnd,
    LateStart,
    CompletedWithWarnings,
    Errors,
    Warnings,
    TestsFailed,
    TestsHadWarnings,
}

impl InstanceAlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutOfSequence => "OUT_OF_SEQUENCE",
            Self::DatasetNotReady => "DATASET_NOT_READY",
            Self::Incomplete => "INCOMPLETE",
            Self::LateEnd => "LATE_END",
            Self::LateStart => "LATE_START",
            Self::CompletedWithWarnings => "COMPLETED_WITH_WARNINGS",
            Self::Errors => "ERRORS",
            Self::Warnings => "WARNINGS",
            Self::TestsFailed => "TESTS_FAILED",
            Self::TestsHadWarnings => "TESTS_HAD_WARNINGS",
        }
    }
}

impl std::fmt::Display for InstanceAlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// 各类事件
// ---------------------------------------------------------------------------

/// 流水线运行状态变更
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusEvent {
    pub event_id: Uuid,
    pub pipeline_id: Uuid,
    pub run_id: Uuid,
    pub run_key: Option<String>,
    pub run_name: Option<String>,
    /// 运行级事件为空，任务级状态通过同一事件上报时携带任务键
    #[serde(default)]
    pub task_key: Option<String>,
    pub status: RunStatus,
    pub timestamp: DateTime<Utc>,
}

/// 任务状态变更
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusEvent {
    pub event_id: Uuid,
    pub pipeline_id: Uuid,
    pub run_id: Uuid,
    pub run_key: Option<String>,
    pub task_id: Uuid,
    pub task_key: String,
    pub task_name: Option<String>,
    pub status: RunStatus,
    pub timestamp: DateTime<Utc>,
}

/// 指标日志
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricLogEvent {
    pub event_id: Uuid,
    pub component_id: Uuid,
    pub run_id: Option<Uuid>,
    pub metric_key: String,
    pub metric_value: f64,
    pub timestamp: DateTime<Utc>,
}

/// 消息日志
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageLogEvent {
    pub event_id: Uuid,
    pub component_id: Uuid,
    pub run_id: Option<Uuid>,
    pub log_level: LogLevel,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// 单个测试结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub status: TestStatus,
    #[serde(default)]
    pub description: Option<String>,
}

/// 一批测试结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcomesEvent {
    pub event_id: Uuid,
    pub component_id: Uuid,
    pub run_id: Option<Uuid>,
    pub test_outcomes: Vec<TestOutcome>,
    pub timestamp: DateTime<Utc>,
}

/// 数据集读写操作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetOperationEvent {
    pub event_id: Uuid,
    pub dataset_id: Uuid,
    pub operation: String,
    pub path: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// 旅程实例告警（内部事件）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceAlertEvent {
    pub event_id: Uuid,
    pub alert_id: Uuid,
    pub journey_id: Uuid,
    pub instance_id: Uuid,
    pub level: AlertLevel,
    #[serde(rename = "type")]
    pub alert_type: InstanceAlertType,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// 运行告警（内部事件）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAlertEvent {
    pub event_id: Uuid,
    pub alert_id: Uuid,
    pub pipeline_id: Uuid,
    pub run_id: Uuid,
    pub run_key: Option<String>,
    pub run_name: Option<String>,
    pub level: AlertLevel,
    #[serde(rename = "type")]
    pub alert_type: RunAlertType,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// Agent 心跳状态变更（内部事件）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusChangeEvent {
    pub event_id: Uuid,
    pub agent_key: String,
    pub tool: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Event — 事件联合体
// ---------------------------------------------------------------------------

/// 事件联合体
///
/// 以 `event_type` 字段为标签序列化。规则条件只识别其中部分种类，
/// 其他种类对规则引擎是惰性的（不会被任何条件匹配）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    RunStatus(RunStatusEvent),
    TaskStatus(TaskStatusEvent),
    MetricLog(MetricLogEvent),
    MessageLog(MessageLogEvent),
    TestOutcomes(TestOutcomesEvent),
    DatasetOperation(DatasetOperationEvent),
    InstanceAlert(InstanceAlertEvent),
    RunAlert(RunAlertEvent),
    AgentStatusChange(AgentStatusChangeEvent),
}

impl Event {
    /// 事件种类名称，与序列化标签一致
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStatus(_) => "RUN_STATUS",
            Self::TaskStatus(_) => "TASK_STATUS",
            Self::MetricLog(_) => "METRIC_LOG",
            Self::MessageLog(_) => "MESSAGE_LOG",
            Self::TestOutcomes(_) => "TEST_OUTCOMES",
            Self::DatasetOperation(_) => "DATASET_OPERATION",
            Self::InstanceAlert(_) => "INSTANCE_ALERT",
            Self::RunAlert(_) => "RUN_ALERT",
            Self::AgentStatusChange(_) => "AGENT_STATUS_CHANGE",
        }
    }

    pub fn event_id(&self) -> Uuid {
        match self {
            Self::RunStatus(e) => e.event_id,
            Self::TaskStatus(e) => e.event_id,
            Self::MetricLog(e) => e.event_id,
            Self::MessageLog(e) => e.event_id,
            Self::TestOutcomes(e) => e.event_id,
            Self::DatasetOperation(e) => e.event_id,
            Self::InstanceAlert(e) => e.event_id,
            Self::RunAlert(e) => e.event_id,
            Self::AgentStatusChange(e) => e.event_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::RunStatus(e) => e.timestamp,
            Self::TaskStatus(e) => e.timestamp,
            Self::MetricLog(e) => e.timestamp,
            Self::MessageLog(e) => e.timestamp,
            Self::TestOutcomes(e) => e.timestamp,
            Self::DatasetOperation(e) => e.timestamp,
            Self::InstanceAlert(e) => e.timestamp,
            Self::RunAlert(e) => e.timestamp,
            Self::AgentStatusChange(e) => e.timestamp,
        }
    }

    /// 事件所属组件（流水线 / 数据集等）
    ///
    /// 规则绑定了组件时，只有组件一致的事件才会进入表达式匹配
    pub fn component_id(&self) -> Option<Uuid> {
        match self {
            Self::RunStatus(e) => Some(e.pipeline_id),
            Self::TaskStatus(e) => Some(e.pipeline_id),
            Self::MetricLog(e) => Some(e.component_id),
            Self::MessageLog(e) => Some(e.component_id),
            Self::TestOutcomes(e) => Some(e.component_id),
            Self::DatasetOperation(e) => Some(e.dataset_id),
            Self::RunAlert(e) => Some(e.pipeline_id),
            Self::InstanceAlert(_) | Self::AgentStatusChange(_) => None,
        }
    }

    /// 与运行相关的事件所属的流水线，用于历史运行查询
    pub fn pipeline_id(&self) -> Option<Uuid> {
        match self {
            Self::RunStatus(e) => Some(e.pipeline_id),
            Self::TaskStatus(e) => Some(e.pipeline_id),
            Self::RunAlert(e) => Some(e.pipeline_id),
            _ => None,
        }
    }

    /// 触发事件的运行名称，用于按名称分组的历史查询
    pub fn run_name(&self) -> Option<&str> {
        match self {
            Self::RunStatus(e) => e.run_name.as_deref(),
            Self::RunAlert(e) => e.run_name.as_deref(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
