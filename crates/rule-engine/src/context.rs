//! 评估数据上下文
//!
//! 规则表达式求值的根对象。支持三种访问方式：
//! - `event__xxx`：触发事件的字段
//! - `database__runs` / `database__named_runs`：流水线历史运行（惰性）
//! - 直接写字段名：回退到事件字段，编译出的规则都用这种形式

use crate::error::{Result, RuleError};
use crate::repository::{HistoryStore, RunAlertRecord, RunNameFilter, RunQuery, RunRecord};
use crate::resolver::Resolve;
use crate::value::{Sequence, SequenceSource, Value};
use observer_shared::error::ObserverError;
use observer_shared::events::Event;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

const EVENT_KEY: &str = "event";
const DATABASE_KEY: &str = "database";

/// 单个事件的评估上下文
#[derive(Debug, Clone)]
pub struct DataContext {
    event: Arc<Event>,
    database: Arc<DatabaseView>,
}

impl DataContext {
    pub fn new(event: Arc<Event>, history: Arc<dyn HistoryStore>) -> Self {
        let database = DatabaseView {
            history,
            pipeline_id: event.pipeline_id(),
            run_name: event.run_name().map(str::to_string),
        };
        Self {
            event,
            database: Arc::new(database),
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// 作为表达式求值的根值
    pub fn into_value(self) -> Value {
        Value::object(self)
    }
}

impl Resolve for DataContext {
    fn is_mapping(&self) -> bool {
        true
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(key == EVENT_KEY || key == DATABASE_KEY)
    }

    fn get_item(&self, key: &str) -> Result<Value> {
        match key {
            EVENT_KEY => Ok(Value::Object(self.event.clone())),
            DATABASE_KEY => Ok(Value::Object(self.database.clone())),
            other => Err(RuleError::MissingAttribute(other.to_string())),
        }
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.event.get_attr(name)
    }
}

impl Resolve for Event {
    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "event_id" => return Some(self.event_id().into()),
            "event_type" => return Some(self.event_type().into()),
            "timestamp" => return Some(self.timestamp().into()),
            "component_id" => return Some(self.component_id().into()),
            _ => {}
        }

        match self {
            Event::RunStatus(e) => match name {
                "pipeline_id" => Some(e.pipeline_id.into()),
                "run_id" => Some(e.run_id.into()),
                "run_key" => Some(e.run_key.clone().into()),
                "run_name" => Some(e.run_name.clone().into()),
                "task_key" => Some(e.task_key.clone().into()),
                "status" => Some(e.status.as_str().into()),
                _ => None,
            },
            Event::TaskStatus(e) => match name {
                "pipeline_id" => Some(e.pipeline_id.into()),
                "run_id" => Some(e.run_id.into()),
                "run_key" => Some(e.run_key.clone().into()),
                "task_id" => Some(e.task_id.into()),
                "task_key" => Some(e.task_key.clone().into()),
                "task_name" => Some(e.task_name.clone().into()),
                "status" => Some(e.status.as_str().into()),
                _ => None,
            },
            Event::MetricLog(e) => match name {
                "run_id" => Some(e.run_id.into()),
                "metric_key" => Some(e.metric_key.clone().into()),
                "metric_value" => Some(e.metric_value.into()),
                _ => None,
            },
            Event::MessageLog(e) => match name {
                "run_id" => Some(e.run_id.into()),
                "log_level" => Some(e.log_level.as_str().into()),
                "message" => Some(e.message.clone().into()),
                _ => None,
            },
            Event::TestOutcomes(e) => match name {
                "run_id" => Some(e.run_id.into()),
                "test_outcomes" => Some(Value::List(
                    e.test_outcomes
                        .iter()
                        .map(|outcome| {
                            Value::map([
                                ("name", Value::from(outcome.name.as_str())),
                                ("status", Value::from(outcome.status.as_str())),
                                ("description", Value::from(outcome.description.clone())),
                            ])
                        })
                        .collect(),
                )),
                _ => None,
            },
            Event::DatasetOperation(e) => match name {
                "dataset_id" => Some(e.dataset_id.into()),
                "operation" => Some(e.operation.clone().into()),
                "path" => Some(e.path.clone().into()),
                _ => None,
            },
            Event::InstanceAlert(e) => match name {
                "alert_id" => Some(e.alert_id.into()),
                "journey_id" => Some(e.journey_id.into()),
                "instance_id" => Some(e.instance_id.into()),
                "level" => Some(e.level.as_str().into()),
                "type" => Some(e.alert_type.as_str().into()),
                "description" => Some(e.description.clone().into()),
                _ => None,
            },
            Event::RunAlert(e) => match name {
                "alert_id" => Some(e.alert_id.into()),
                "pipeline_id" => Some(e.pipeline_id.into()),
                "run_id" => Some(e.run_id.into()),
                "run_key" => Some(e.run_key.clone().into()),
                "run_name" => Some(e.run_name.clone().into()),
                "level" => Some(e.level.as_str().into()),
                "type" => Some(e.alert_type.as_str().into()),
                "description" => Some(e.description.clone().into()),
                _ => None,
            },
            Event::AgentStatusChange(e) => match name {
                "agent_key" => Some(e.agent_key.clone().into()),
                "tool" => Some(e.tool.clone().into()),
                "status" => Some(e.status.clone().into()),
                _ => None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// 历史数据视图
// ---------------------------------------------------------------------------

/// 触发事件所属流水线的历史数据
pub struct DatabaseView {
    history: Arc<dyn HistoryStore>,
    pipeline_id: Option<Uuid>,
    run_name: Option<String>,
}

impl DatabaseView {
    fn runs(&self, name: RunNameFilter) -> Option<Value> {
        let pipeline_id = self.pipeline_id?;
        Some(Value::Seq(Sequence::new(RunsSource {
            history: Arc::clone(&self.history),
            pipeline_id,
            name,
        })))
    }
}

impl fmt::Debug for DatabaseView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseView")
            .field("pipeline_id", &self.pipeline_id)
            .field("run_name", &self.run_name)
            .finish_non_exhaustive()
    }
}

impl Resolve for DatabaseView {
    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "runs" => self.runs(RunNameFilter::Any),
            "named_runs" => self.runs(RunNameFilter::Equals(self.run_name.clone())),
            _ => None,
        }
    }
}

/// 流水线运行查询，最新在前
struct RunsSource {
    history: Arc<dyn HistoryStore>,
    pipeline_id: Uuid,
    name: RunNameFilter,
}

impl SequenceSource for RunsSource {
    fn fetch(&self, limit: Option<usize>) -> std::result::Result<Vec<Value>, ObserverError> {
        let query = RunQuery {
            pipeline_id: self.pipeline_id,
            name: self.name.clone(),
            limit,
        };
        let runs = self.history.runs(&query)?;
        Ok(runs
            .into_iter()
            .map(|record| {
                Value::object(RunView {
                    record,
                    history: Arc::clone(&self.history),
                })
            })
            .collect())
    }

    fn describe(&self) -> String {
        format!("runs(pipeline={}, name={:?})", self.pipeline_id, self.name)
    }
}

/// 单个历史运行
pub struct RunView {
    record: RunRecord,
    history: Arc<dyn HistoryStore>,
}

impl fmt::Debug for RunView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunView")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

impl Resolve for RunView {
    fn get_attr(&self, name: &str) -> Option<Value> {
        let run = &self.record;
        match name {
            "id" => Some(run.id.into()),
            "pipeline_id" => Some(run.pipeline_id.into()),
            "key" => Some(run.key.clone().into()),
            "name" => Some(run.name.clone().into()),
            "status" => Some(run.status.as_str().into()),
            "start_time" => Some(run.start_time.into()),
            "end_time" => Some(run.end_time.into()),
            "alerts" => Some(Value::Seq(Sequence::new(AlertsSource {
                history: Arc::clone(&self.history),
                run_id: run.id,
            }))),
            _ => None,
        }
    }
}

struct AlertsSource {
    history: Arc<dyn HistoryStore>,
    run_id: Uuid,
}

impl SequenceSource for AlertsSource {
    fn fetch(&self, limit: Option<usize>) -> std::result::Result<Vec<Value>, ObserverError> {
        let mut alerts = self.history.run_alerts(self.run_id)?;
        if let Some(n) = limit {
            alerts.truncate(n);
        }
        Ok(alerts.into_iter().map(Value::object).collect())
    }

    fn describe(&self) -> String {
        format!("alerts(run={})", self.run_id)
    }
}

impl Resolve for RunAlertRecord {
    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(self.id.into()),
            "run_id" => Some(self.run_id.into()),
            "type" => Some(self.alert_type.as_str().into()),
            "level" => Some(self.level.as_str().into()),
            "description" => Some(self.description.clone().into()),
            "created_on" => Some(self.created_on.into()),
            _ => None,
        }
    }
}
