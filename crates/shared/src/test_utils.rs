//! 测试工具模块
//!
//! 提供单元测试、集成测试和基准测试共用的事件构造器。
//! 所有构造器生成字段完整的事件，测试只需覆盖关心的字段。

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::events::{
    AgentStatusChangeEvent, AlertLevel, DatasetOperationEvent, Event, InstanceAlertEvent,
    InstanceAlertType, LogLevel, MessageLogEvent, MetricLogEvent, RunAlertEvent, RunAlertType,
    RunStatus, RunStatusEvent, TaskStatusEvent, TestOutcome, TestOutcomesEvent, TestStatus,
};

/// 固定的测试基准时间，避免测试结果依赖当前时钟
pub fn test_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-15T10:00:00Z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// 基准时间之后 `minutes` 分钟
pub fn test_time_plus(minutes: i64) -> DateTime<Utc> {
    test_time() + Duration::minutes(minutes)
}

// ==================== 事件构造器 ====================

/// 事件构造器
///
/// 以流水线 ID 为中心，生成同一组件下的各类事件
#[derive(Debug, Clone)]
pub struct TestEvents {
    pub pipeline_id: Uuid,
    pub run_id: Uuid,
    pub run_key: String,
    pub run_name: Option<String>,
}

impl Default for TestEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEvents {
    pub fn new() -> Self {
        Self {
            pipeline_id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            run_key: "run-key-1".to_string(),
            run_name: None,
        }
    }

    /// 指定流水线
    pub fn for_pipeline(pipeline_id: Uuid) -> Self {
        Self {
            pipeline_id,
            ..Self::new()
        }
    }

    /// 指定运行名称（用于按名称分组的历史查询）
    pub fn with_run_name(mut self, name: impl Into<String>) -> Self {
        self.run_name = Some(name.into());
        self
    }

    /// 运行级状态事件
    pub fn run_status(&self, status: RunStatus) -> Event {
        Event::RunStatus(RunStatusEvent {
            event_id: Uuid::new_v4(),
            pipeline_id: self.pipeline_id,
            run_id: self.run_id,
            run_key: Some(self.run_key.clone()),
            run_name: self.run_name.clone(),
            task_key: None,
            status,
            timestamp: test_time(),
        })
    }

    /// 任务级状态事件
    pub fn task_status(&self, task_key: &str, status: RunStatus) -> Event {
        Event::TaskStatus(TaskStatusEvent {
            event_id: Uuid::new_v4(),
            pipeline_id: self.pipeline_id,
            run_id: self.run_id,
            run_key: Some(self.run_key.clone()),
            task_id: Uuid::new_v4(),
            task_key: task_key.to_string(),
            task_name: None,
            status,
            timestamp: test_time(),
        })
    }

    /// 消息日志事件
    pub fn message_log(&self, level: LogLevel, message: &str) -> Event {
        Event::MessageLog(MessageLogEvent {
            event_id: Uuid::new_v4(),
            component_id: self.pipeline_id,
            run_id: Some(self.run_id),
            log_level: level,
            message: Some(message.to_string()),
            timestamp: test_time(),
        })
    }

    /// 指标日志事件
    pub fn metric_log(&self, key: &str, value: f64) -> Event {
        Event::MetricLog(MetricLogEvent {
            event_id: Uuid::new_v4(),
            component_id: self.pipeline_id,
            run_id: Some(self.run_id),
            metric_key: key.to_string(),
            metric_value: value,
            timestamp: test_time(),
        })
    }

    /// 测试结果事件
    pub fn test_outcomes(&self, outcomes: &[(&str, TestStatus)]) -> Event {
        Event::TestOutcomes(TestOutcomesEvent {
            event_id: Uuid::new_v4(),
            component_id: self.pipeline_id,
            run_id: Some(self.run_id),
            test_outcomes: outcomes
                .iter()
                .map(|(name, status)| TestOutcome {
                    name: name.to_string(),
                    status: *status,
                    description: None,
                })
                .collect(),
            timestamp: test_time(),
        })
    }

    /// 运行告警事件
    pub fn run_alert(&self, alert_type: RunAlertType) -> Event {
        Event::RunAlert(RunAlertEvent {
            event_id: Uuid::new_v4(),
            alert_id: Uuid::new_v4(),
            pipeline_id: self.pipeline_id,
            run_id: self.run_id,
            run_key: Some(self.run_key.clone()),
            run_name: self.run_name.clone(),
            level: AlertLevel::Error,
            alert_type,
            description: format!("{alert_type} alert"),
            timestamp: test_time(),
        })
    }

    /// 数据集操作事件（组件为数据集本身）
    pub fn dataset_operation(&self, operation: &str) -> Event {
        Event::DatasetOperation(DatasetOperationEvent {
            event_id: Uuid::new_v4(),
            dataset_id: self.pipeline_id,
            operation: operation.to_string(),
            path: None,
            timestamp: test_time(),
        })
    }
}

/// 实例告警事件
pub fn instance_alert(journey_id: Uuid, level: AlertLevel, alert_type: InstanceAlertType) -> Event {
    Event::InstanceAlert(InstanceAlertEvent {
        event_id: Uuid::new_v4(),
        alert_id: Uuid::new_v4(),
        journey_id,
        instance_id: Uuid::new_v4(),
        level,
        alert_type,
        description: format!("{alert_type} alert"),
        timestamp: test_time(),
    })
}

/// Agent 状态变更事件
pub fn agent_status_change(agent_key: &str, status: &str) -> Event {
    Event::AgentStatusChange(AgentStatusChangeEvent {
        event_id: Uuid::new_v4(),
        agent_key: agent_key.to_string(),
        tool: "test-tool".to_string(),
        status: status.to_string(),
        timestamp: test_time(),
    })
}
