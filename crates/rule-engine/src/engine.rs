//! 规则评估引擎
//!
//! 按作用域取出缓存中的编译规则，对事件逐条做组件预过滤和表达式匹配，
//! 匹配后依次执行触发器。单个触发器的失败（包括 panic）只记录日志，
//! 不影响同一规则的其他触发器，也不影响后续规则。

use crate::compiler::{CompiledRule, RuleCompiler};
use crate::context::DataContext;
use crate::error::RuleError;
use crate::executor::RuleExecutor;
use crate::repository::{HistoryStore, RuleRepository};
use crate::store::{RuleCache, SystemClock};
use crate::trigger::TriggerError;
use observer_shared::config::EngineConfig;
use observer_shared::events::Event;
use observer_shared::observability::metrics::{
    RULE_COMPILE_FAILURES_TOTAL, RULE_EVALUATIONS_TOTAL, RULE_MATCHES_TOTAL,
    RULE_TRIGGER_FAILURES_TOTAL,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// 触发器失败记录
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerFailure {
    pub rule_id: Uuid,
    pub trigger: String,
    pub error: String,
}

/// 单个事件的评估报告
#[derive(Debug, Clone, Default)]
pub struct EvaluationReport {
    pub event_id: Uuid,
    /// 进入表达式匹配的规则数
    pub evaluated: usize,
    pub matched_rules: Vec<Uuid>,
    /// 因组件不一致被预过滤跳过的规则
    pub skipped_by_scope: Vec<Uuid>,
    pub trigger_failures: Vec<TriggerFailure>,
    pub evaluation_time_ms: u64,
}

impl EvaluationReport {
    pub fn is_matched(&self, rule_id: Uuid) -> bool {
        self.matched_rules.contains(&rule_id)
    }
}

/// 规则评估引擎
pub struct RuleEngine {
    repository: Arc<dyn RuleRepository>,
    history: Arc<dyn HistoryStore>,
    compiler: Arc<RuleCompiler>,
    cache: RuleCache,
    executor: RuleExecutor,
}

impl RuleEngine {
    pub fn new(
        repository: Arc<dyn RuleRepository>,
        history: Arc<dyn HistoryStore>,
        compiler: RuleCompiler,
        cache: RuleCache,
        config: &EngineConfig,
    ) -> Self {
        let executor = if config.trace_evaluation {
            RuleExecutor::new().with_trace()
        } else {
            RuleExecutor::new()
        };

        Self {
            repository,
            history,
            compiler: Arc::new(compiler),
            cache,
            executor,
        }
    }

    /// 使用系统时钟、内置 schema 和内置动作
    pub fn from_config(
        repository: Arc<dyn RuleRepository>,
        history: Arc<dyn HistoryStore>,
        config: &EngineConfig,
    ) -> Self {
        let cache = RuleCache::from_config(config, Arc::new(SystemClock));
        Self::new(repository, history, RuleCompiler::new(), cache, config)
    }

    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    pub fn compiler(&self) -> &RuleCompiler {
        &self.compiler
    }

    /// 获取作用域内的编译规则
    ///
    /// 同一刷新周期内直接使用缓存。规则仓储不可用时返回空集且不缓存，
    /// 编译失败的规则被跳过。
    pub fn get_rules(&self, scope_ids: &[Uuid]) -> Arc<Vec<CompiledRule>> {
        match self.cache.get_or_load(scope_ids, |ids| self.load_rules(ids)) {
            Ok(rules) => rules,
            Err(e) => {
                error!(error = %e, scopes = ?scope_ids, "加载规则失败，本次按无规则处理");
                Arc::new(Vec::new())
            }
        }
    }

    fn load_rules(&self, scope_ids: &[Uuid]) -> Result<Vec<CompiledRule>, RuleError> {
        let records = self.repository.rules_for_scopes(scope_ids)?;
        let (compiled, failures) = self.compiler.compile_batch(&records);

        for (rule_id, e) in &failures {
            warn!(rule_id = %rule_id, error = %e, "规则编译失败，已跳过");
        }
        if !failures.is_empty() {
            metrics::counter!(RULE_COMPILE_FAILURES_TOTAL).increment(failures.len() as u64);
        }

        info!(
            loaded = compiled.len(),
            skipped = failures.len(),
            "规则加载完成"
        );
        Ok(compiled)
    }

    /// 对事件评估给定规则并执行匹配规则的触发器
    #[instrument(skip(self, event, rules), fields(event_id = %event.event_id(), event_type = event.event_type(), rules = rules.len()))]
    pub fn evaluate(&self, event: &Event, rules: &[CompiledRule]) -> EvaluationReport {
        let start = Instant::now();
        let mut report = EvaluationReport {
            event_id: event.event_id(),
            ..Default::default()
        };

        let context = DataContext::new(Arc::new(event.clone()), Arc::clone(&self.history));
        let root = context.into_value();
        let event_component = event.component_id();

        for rule in rules {
            if let Some(component_id) = rule.component_id()
                && event_component != Some(component_id)
            {
                report.skipped_by_scope.push(rule.id());
                continue;
            }

            report.evaluated += 1;
            metrics::counter!(RULE_EVALUATIONS_TOTAL).increment(1);

            let result = self.executor.execute(&rule.expression, &root);
            if self.executor.is_tracing() {
                debug!(
                    rule_id = %rule.id(),
                    matched = result.matched,
                    trace = ?result.evaluation_trace,
                    "规则评估追踪"
                );
            }
            if !result.matched {
                continue;
            }

            metrics::counter!(RULE_MATCHES_TOTAL).increment(1);
            report.matched_rules.push(rule.id());
            debug!(rule_id = %rule.id(), journey_id = %rule.journey_id(), "规则匹配");

            self.fire(event, rule, &mut report.trigger_failures);
        }

        report.evaluation_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        report
    }

    /// 加载作用域规则并评估
    pub fn process(&self, event: &Event, scope_ids: &[Uuid]) -> EvaluationReport {
        let rules = self.get_rules(scope_ids);
        self.evaluate(event, &rules)
    }

    fn fire(&self, event: &Event, rule: &CompiledRule, failures: &mut Vec<TriggerFailure>) {
        for trigger in &rule.triggers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                trigger.trigger(event, &rule.rule, rule.journey_id())
            }))
            .unwrap_or_else(|payload| Err(TriggerError::Panicked(panic_message(payload))));

            if let Err(e) = outcome {
                error!(
                    rule_id = %rule.id(),
                    journey_id = %rule.journey_id(),
                    event_id = %event.event_id(),
                    trigger = trigger.name(),
                    error = %e,
                    "触发器执行失败"
                );
                metrics::counter!(RULE_TRIGGER_FAILURES_TOTAL).increment(1);
                failures.push(TriggerFailure {
                    rule_id: rule.id(),
                    trigger: trigger.name().to_string(),
                    error: e.to_string(),
                });
            }
        }
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("compiler", &self.compiler)
            .field("cache", &self.cache)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Expression;
    use crate::repository::{MockHistoryStore, MockRuleRepository, RuleRecord};
    use crate::schema::SIMPLE_V1;
    use crate::store::ManualClock;
    use crate::trigger::{FnTrigger, Trigger};
    use observer_shared::error::ObserverError;
    use observer_shared::events::RunStatus;
    use observer_shared::test_utils::{TestEvents, test_time};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn failed_task_rule(journey_id: Uuid) -> RuleRecord {
        RuleRecord::new(
            journey_id,
            SIMPLE_V1,
            json!({"when": "all", "conditions": [{"task_status": {"matches": "FAILED"}}]}),
            "LOG",
        )
    }

    fn engine_with(repository: MockRuleRepository) -> (RuleEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(test_time()));
        let cache = RuleCache::new(clock.clone(), Duration::from_secs(60));
        let engine = RuleEngine::new(
            Arc::new(repository),
            Arc::new(MockHistoryStore::new()),
            RuleCompiler::new(),
            cache,
            &EngineConfig::default(),
        );
        (engine, clock)
    }

    fn compiled(
        record: RuleRecord,
        expression: Expression,
        triggers: Vec<Arc<dyn Trigger>>,
    ) -> CompiledRule {
        CompiledRule {
            expression,
            rule: Arc::new(record),
            triggers,
        }
    }

    fn counting_trigger(name: &str, calls: Arc<AtomicUsize>) -> Arc<dyn Trigger> {
        Arc::new(FnTrigger::new(name, move |_: &Event, _: &RuleRecord, _: Uuid| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }

    #[test]
    fn test_get_rules_cached_within_epoch() {
        let journey = Uuid::new_v4();
        let mut repository = MockRuleRepository::new();
        repository
            .expect_rules_for_scopes()
            .times(2)
            .returning(move |_| Ok(vec![failed_task_rule(journey)]));

        let (engine, clock) = engine_with(repository);
        assert_eq!(engine.get_rules(&[journey]).len(), 1);
        assert_eq!(engine.get_rules(&[journey]).len(), 1);

        clock.advance(Duration::from_secs(60));
        assert_eq!(engine.get_rules(&[journey]).len(), 1);
    }

    #[test]
    fn test_get_rules_skips_invalid_records() {
        let journey = Uuid::new_v4();
        let mut repository = MockRuleRepository::new();
        repository.expect_rules_for_scopes().returning(move |_| {
            Ok(vec![
                failed_task_rule(journey),
                RuleRecord::new(journey, SIMPLE_V1, json!({"when": "sometimes"}), "LOG"),
                RuleRecord::new(journey, "simple_v9", json!({}), "LOG"),
            ])
        });

        let (engine, _clock) = engine_with(repository);
        assert_eq!(engine.get_rules(&[journey]).len(), 1);
    }

    #[test]
    fn test_repository_error_yields_empty_and_is_not_cached() {
        let journey = Uuid::new_v4();
        let mut repository = MockRuleRepository::new();
        let mut seq = mockall::Sequence::new();
        repository
            .expect_rules_for_scopes()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ObserverError::store("rules_for_scopes", "timeout")));
        repository
            .expect_rules_for_scopes()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(vec![failed_task_rule(journey)]));

        let (engine, _clock) = engine_with(repository);
        assert!(engine.get_rules(&[journey]).is_empty());
        assert_eq!(engine.get_rules(&[journey]).len(), 1);
    }

    #[test]
    fn test_component_prefilter_skips_expression() {
        let events = TestEvents::new();
        let other_component = Uuid::new_v4();
        let calls = Arc::new(AtomicUsize::new(0));

        let bound = compiled(
            failed_task_rule(Uuid::new_v4()).with_component(other_component),
            Expression::leaf("status", "FAILED").unwrap(),
            vec![counting_trigger("count", calls.clone())],
        );
        let unbound = compiled(
            failed_task_rule(Uuid::new_v4()),
            Expression::leaf("status", "FAILED").unwrap(),
            vec![counting_trigger("count", calls.clone())],
        );

        let (engine, _clock) = engine_with(MockRuleRepository::new());
        let report = engine.evaluate(
            &events.task_status("load", RunStatus::Failed),
            &[bound.clone(), unbound.clone()],
        );

        assert_eq!(report.skipped_by_scope, vec![bound.id()]);
        assert_eq!(report.matched_rules, vec![unbound.id()]);
        assert_eq!(report.evaluated, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_trigger_failures_are_isolated() {
        let events = TestEvents::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let failing: Arc<dyn Trigger> = Arc::new(FnTrigger::new(
            "failing",
            |_: &Event, _: &RuleRecord, _: Uuid| Err(TriggerError::Failed("webhook 500".into())),
        ));
        let panicking: Arc<dyn Trigger> = Arc::new(FnTrigger::new(
            "panicking",
            |_: &Event, _: &RuleRecord, _: Uuid| panic!("boom"),
        ));

        let first = compiled(
            failed_task_rule(Uuid::new_v4()),
            Expression::leaf("status", "FAILED").unwrap(),
            vec![failing, panicking, counting_trigger("after", calls.clone())],
        );
        let second = compiled(
            failed_task_rule(Uuid::new_v4()),
            Expression::leaf("status", "FAILED").unwrap(),
            vec![counting_trigger("second", calls.clone())],
        );

        let (engine, _clock) = engine_with(MockRuleRepository::new());
        let report = engine.evaluate(
            &events.task_status("load", RunStatus::Failed),
            &[first.clone(), second.clone()],
        );

        assert_eq!(report.matched_rules, vec![first.id(), second.id()]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.trigger_failures.len(), 2);
        assert_eq!(report.trigger_failures[0].trigger, "failing");
        assert!(report.trigger_failures[0].error.contains("webhook 500"));
        assert_eq!(report.trigger_failures[1].trigger, "panicking");
        assert!(report.trigger_failures[1].error.contains("boom"));
    }

    #[test]
    fn test_unmatched_rule_does_not_fire() {
        let events = TestEvents::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let rule = compiled(
            failed_task_rule(Uuid::new_v4()),
            Expression::leaf("status", "FAILED").unwrap(),
            vec![counting_trigger("count", calls.clone())],
        );

        let (engine, _clock) = engine_with(MockRuleRepository::new());
        let start = Instant::now();
        let report = engine.evaluate(&events.task_status("load", RunStatus::Completed), &[rule]);
        let bound = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        assert!(report.matched_rules.is_empty());
        assert_eq!(report.evaluated, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(report.evaluation_time_ms <= bound);
    }

    #[test]
    fn test_process_compiles_and_matches() {
        let events = TestEvents::new();
        let journey = Uuid::new_v4();
        let record = failed_task_rule(journey);
        let rule_id = record.id;

        let mut repository = MockRuleRepository::new();
        repository
            .expect_rules_for_scopes()
            .times(1)
            .returning(move |_| Ok(vec![record.clone()]));

        let (engine, _clock) = engine_with(repository);
        let report = engine.process(&events.task_status("load", RunStatus::Failed), &[journey]);
        assert!(report.is_matched(rule_id));

        // 运行级事件没有 task_key，不满足 task_status 规则
        let report = engine.process(&events.run_status(RunStatus::Failed), &[journey]);
        assert!(report.matched_rules.is_empty());
    }
}
