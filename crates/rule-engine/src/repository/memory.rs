//! 内存实现
//!
//! 用于嵌入式部署和测试，记录查询次数以便观察缓存与惰性加载的效果。

use super::{
    HistoryStore, RuleRecord, RuleRepository, RunAlertRecord, RunNameFilter, RunQuery, RunRecord,
};
use observer_shared::error::{ObserverError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

/// 内存规则仓储
#[derive(Debug, Default)]
pub struct InMemoryRules {
    rules: RwLock<Vec<RuleRecord>>,
    queries: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<RuleRecord>) -> Self {
        Self {
            rules: RwLock::new(rules),
            ..Self::default()
        }
    }

    /// 新增或按 ID 替换规则
    pub fn upsert(&self, rule: RuleRecord) {
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
    }

    pub fn remove(&self, rule_id: Uuid) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        rules.len() != before
    }

    /// 模拟存储不可用
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl RuleRepository for InMemoryRules {
    fn rules_for_scopes(&self, scope_ids: &[Uuid]) -> Result<Vec<RuleRecord>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ObserverError::store("rules_for_scopes", "rule store unavailable"));
        }

        Ok(self
            .rules
            .read()
            .iter()
            .filter(|r| scope_ids.contains(&r.journey_id))
            .cloned()
            .collect())
    }
}

/// 内存历史数据
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    runs: RwLock<Vec<RunRecord>>,
    alerts: RwLock<HashMap<Uuid, Vec<RunAlertRecord>>>,
    run_queries: AtomicUsize,
    alert_queries: AtomicUsize,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_run(&self, run: RunRecord) {
        self.runs.write().push(run);
    }

    pub fn add_alert(&self, alert: RunAlertRecord) {
        self.alerts
            .write()
            .entry(alert.run_id)
            .or_default()
            .push(alert);
    }

    pub fn run_query_count(&self) -> usize {
        self.run_queries.load(Ordering::SeqCst)
    }

    pub fn alert_query_count(&self) -> usize {
        self.alert_queries.load(Ordering::SeqCst)
    }
}

impl HistoryStore for InMemoryHistory {
    fn runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>> {
        self.run_queries.fetch_add(1, Ordering::SeqCst);

        let mut runs: Vec<RunRecord> = self
            .runs
            .read()
            .iter()
            .filter(|r| r.pipeline_id == query.pipeline_id)
            .filter(|r| match &query.name {
                RunNameFilter::Any => true,
                RunNameFilter::Equals(name) => &r.name == name,
            })
            .cloned()
            .collect();

        runs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        if let Some(limit) = query.limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }

    fn run_alerts(&self, run_id: Uuid) -> Result<Vec<RunAlertRecord>> {
        self.alert_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.alerts.read().get(&run_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use observer_shared::events::RunStatus;

    fn run(pipeline_id: Uuid, name: Option<&str>, minutes_ago: i64) -> RunRecord {
        RunRecord {
            id: Uuid::new_v4(),
            pipeline_id,
            key: Some(format!("run-{minutes_ago}")),
            name: name.map(str::to_string),
            status: RunStatus::Completed,
            start_time: Some(Utc::now() - Duration::minutes(minutes_ago)),
            end_time: None,
        }
    }

    #[test]
    fn test_runs_newest_first_with_filters() {
        let pipeline = Uuid::new_v4();
        let history = InMemoryHistory::new();
        history.add_run(run(pipeline, Some("nightly"), 30));
        history.add_run(run(pipeline, Some("hourly"), 10));
        history.add_run(run(pipeline, Some("nightly"), 5));
        history.add_run(run(Uuid::new_v4(), Some("nightly"), 1));

        let all = history
            .runs(&RunQuery {
                pipeline_id: pipeline,
                name: RunNameFilter::Any,
                limit: None,
            })
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].key.as_deref(), Some("run-5"));

        let nightly = history
            .runs(&RunQuery {
                pipeline_id: pipeline,
                name: RunNameFilter::Equals(Some("nightly".into())),
                limit: Some(1),
            })
            .unwrap();
        assert_eq!(nightly.len(), 1);
        assert_eq!(nightly[0].key.as_deref(), Some("run-5"));
        assert_eq!(history.run_query_count(), 2);
    }

    #[test]
    fn test_rules_scoped_and_unavailable() {
        let journey = Uuid::new_v4();
        let rule = RuleRecord::new(journey, "simple_v1", serde_json::json!({}), "LOG");
        let rules = InMemoryRules::with_rules(vec![rule.clone()]);

        assert_eq!(rules.rules_for_scopes(&[journey]).unwrap(), vec![rule.clone()]);
        assert!(rules.rules_for_scopes(&[Uuid::new_v4()]).unwrap().is_empty());

        rules.set_unavailable(true);
        assert!(rules.rules_for_scopes(&[journey]).is_err());
        assert_eq!(rules.query_count(), 3);

        assert!(rules.remove(rule.id));
        assert!(!rules.remove(rule.id));
    }
}
