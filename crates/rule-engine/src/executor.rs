//! 表达式执行器
//!
//! 对实例做短路求值。求值永不失败：属性缺失、类型不兼容、
//! 历史查询出错都折叠为“该叶子不匹配”。

use crate::error::RuleError;
use crate::evaluator::ConditionEvaluator;
use crate::expression::{Comparison, Expression, Node, Operand};
use crate::operators::{LogicalOperator, Operator};
use crate::quantifier::Quantified;
use crate::resolver::resolve_segments;
use crate::value::Value;
use std::time::Instant;
use tracing::debug;

/// 判断实例是否满足表达式
pub fn matches(expression: &Expression, instance: &Value) -> bool {
    RuleExecutor::new().execute(expression, instance).matched
}

/// 执行结果
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub matched: bool,
    /// 匹配成功的叶子（仅在启用追踪时记录）
    pub matched_conditions: Vec<String>,
    /// 逐节点追踪（仅在启用追踪时记录）
    pub evaluation_trace: Vec<String>,
    pub evaluation_time_us: u64,
}

/// 表达式执行器
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleExecutor {
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl RuleExecutor {
    pub fn new() -> Self {
        Self {
            trace_enabled: false,
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    pub fn is_tracing(&self) -> bool {
        self.trace_enabled
    }

    /// 子节点路径，只在追踪时拼接
    fn sub_path(&self, path: &str, suffix: impl std::fmt::Display) -> String {
        if self.trace_enabled {
            format!("{path}{suffix}")
        } else {
            String::new()
        }
    }

    /// 执行表达式求值
    pub fn execute(&self, expression: &Expression, instance: &Value) -> ExecutionResult {
        let start = Instant::now();
        let mut result = ExecutionResult::default();

        result.matched = self.evaluate_expression(expression, instance, &mut result, "root");
        result.evaluation_time_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        result
    }

    /// 递归评估分组（短路求值），结果与取反标记异或
    fn evaluate_expression(
        &self,
        expression: &Expression,
        instance: &Value,
        result: &mut ExecutionResult,
        path: &str,
    ) -> bool {
        let matched = if expression.is_empty() {
            if self.trace_enabled {
                result.evaluation_trace.push(format!("{}: 空表达式", path));
            }
            false
        } else {
            match expression.connector() {
                LogicalOperator::And => self.evaluate_and(expression, instance, result, path),
                LogicalOperator::Or => self.evaluate_or(expression, instance, result, path),
            }
        };

        matched ^ expression.is_negated()
    }

    fn evaluate_and(
        &self,
        expression: &Expression,
        instance: &Value,
        result: &mut ExecutionResult,
        path: &str,
    ) -> bool {
        // AND: 所有子节点都必须满足，遇到 false 立即返回
        for (i, child) in expression.children().iter().enumerate() {
            let child_path = self.sub_path(path, format_args!(".children[{i}]"));
            if !self.evaluate_node(child, instance, result, &child_path) {
                if self.trace_enabled {
                    result
                        .evaluation_trace
                        .push(format!("{}: AND 短路 - 子节点 {} 不匹配", path, i));
                }
                return false;
            }
        }
        true
    }

    fn evaluate_or(
        &self,
        expression: &Expression,
        instance: &Value,
        result: &mut ExecutionResult,
        path: &str,
    ) -> bool {
        // OR: 任一子节点满足即可，遇到 true 立即返回
        for (i, child) in expression.children().iter().enumerate() {
            let child_path = self.sub_path(path, format_args!(".children[{i}]"));
            if self.evaluate_node(child, instance, result, &child_path) {
                if self.trace_enabled {
                    result
                        .evaluation_trace
                        .push(format!("{}: OR 短路 - 子节点 {} 匹配", path, i));
                }
                return true;
            }
        }
        false
    }

    fn evaluate_node(
        &self,
        node: &Node,
        instance: &Value,
        result: &mut ExecutionResult,
        path: &str,
    ) -> bool {
        match node {
            Node::Leaf(comparison) => self.evaluate_comparison(comparison, instance, result, path),
            Node::Group(group) => self.evaluate_expression(group, instance, result, path),
        }
    }

    /// 评估比较叶子
    fn evaluate_comparison(
        &self,
        comparison: &Comparison,
        instance: &Value,
        result: &mut ExecutionResult,
        path: &str,
    ) -> bool {
        let matched = match resolve_segments(instance, comparison.path()) {
            Ok(field) => match comparison.operand() {
                Operand::Value(expected) => compare_values(&field, comparison.operator(), expected),
                Operand::Expr(inner) => {
                    self.evaluate_expression(inner, &field, result, &self.sub_path(path, ".r"))
                }
                Operand::Quantified(quantified) => self.evaluate_quantified(
                    comparison.operator(),
                    quantified,
                    &field,
                    result,
                    path,
                ),
            },
            // 属性缺失：只有 isnull=真 成立
            Err(_) => {
                comparison.operator() == Operator::IsNull
                    && matches!(comparison.operand(), Operand::Value(v) if v.is_truthy())
            }
        };

        if self.trace_enabled {
            result.evaluation_trace.push(format!(
                "{}: {} => {}",
                path,
                comparison.canonical(),
                if matched { "MATCHED" } else { "NOT_MATCHED" }
            ));
        }

        if matched && self.trace_enabled {
            result
                .matched_conditions
                .push(format!("{}.{}", path, comparison.lookup()));
        }

        matched
    }

    fn evaluate_quantified(
        &self,
        operator: Operator,
        quantified: &Quantified,
        field: &Value,
        result: &mut ExecutionResult,
        path: &str,
    ) -> bool {
        let items = match quantified.materialize(field) {
            Ok(items) => items,
            Err(e) => {
                debug!(path = %path, error = %e, "量词集合物化失败，视为不匹配");
                return false;
            }
        };

        let element_path = self.sub_path(path, ".item");
        let outcome = quantified.evaluate(&items, |item| {
            Ok(match &quantified.operand {
                Operand::Value(expected) => compare_values(item, operator, expected),
                Operand::Expr(inner) => self.evaluate_expression(inner, item, result, &element_path),
                Operand::Quantified(_) => false,
            })
        });

        outcome.unwrap_or_else(|e| {
            debug!(path = %path, error = %e, "量词求值失败，视为不匹配");
            false
        })
    }
}

/// 单值比较，出错视为不匹配
///
/// 两侧都是时间但时区属性不一致时，统一转换到 UTC 后重试一次
fn compare_values(field: &Value, operator: Operator, expected: &Value) -> bool {
    match ConditionEvaluator::evaluate(field, operator, expected) {
        Ok(matched) => matched,
        Err(RuleError::TypeMismatch { .. }) => {
            match (
                ConditionEvaluator::as_timestamp(field),
                ConditionEvaluator::as_timestamp(expected),
            ) {
                (Some(a), Some(b)) if a.is_aware() != b.is_aware() => ConditionEvaluator::evaluate(
                    &Value::Timestamp(a.normalized()),
                    operator,
                    &Value::Timestamp(b.normalized()),
                )
                .unwrap_or(false),
                _ => false,
            }
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use serde_json::json;

    fn create_test_instance() -> Value {
        Value::from(json!({
            "status": "FAILED",
            "run_key": "run-1",
            "task_key": null,
            "metric_value": 42.5,
            "message": "Step trace.py failed",
            "test_outcomes": [
                {"name": "row_count", "status": "PASSED"},
                {"name": "freshness", "status": "FAILED"}
            ],
            "order": {"items": [{"sku": "A", "qty": 2}, {"sku": "B", "qty": 0}]}
        }))
    }

    fn leaf(path_op: &str, operand: impl Into<Operand>) -> Expression {
        Expression::leaf(path_op, operand).unwrap()
    }

    #[test]
    fn test_simple_leaves() {
        let instance = create_test_instance();
        assert!(matches(&leaf("status", "FAILED"), &instance));
        assert!(!matches(&leaf("status", "COMPLETED"), &instance));
        assert!(matches(&leaf("metric_value__gt", 40), &instance));
        assert!(matches(&leaf("message__regex", r"trace\.py"), &instance));
        assert!(matches(&leaf("order__items__0__sku", "A"), &instance));
    }

    #[test]
    fn test_empty_expression_never_matches() {
        assert!(!matches(&Expression::empty(), &create_test_instance()));
        assert!(matches(&Expression::empty().not(), &create_test_instance()));
    }

    #[test]
    fn test_missing_attribute_semantics() {
        let instance = create_test_instance();
        assert!(!matches(&leaf("no_such__exact", "x"), &instance));
        assert!(matches(&leaf("no_such__isnull", true), &instance));
        assert!(!matches(&leaf("no_such__isnull", false), &instance));
        // 存在但为空
        assert!(matches(&leaf("task_key__isnull", true), &instance));
        assert!(matches(&leaf("run_key__isnull", false), &instance));
    }

    #[test]
    fn test_type_errors_collapse_to_false() {
        let instance = create_test_instance();
        assert!(!matches(&leaf("status__gt", 5), &instance));
        assert!(!matches(&leaf("task_key__lt", 5), &instance));
        assert!(matches(&leaf("task_key__lt", 5).not(), &instance));
    }

    #[test]
    fn test_boolean_combinations() {
        let instance = create_test_instance();
        let failed = leaf("status", "FAILED");
        let completed = leaf("status", "COMPLETED");

        assert!(matches(&failed.or(&completed), &instance));
        assert!(!matches(&failed.and(&completed), &instance));
        assert!(matches(&completed.not(), &instance));
        assert!(!matches(&failed.not(), &instance));
        assert!(matches(&failed.not().not(), &instance));
    }

    #[test]
    fn test_quantified_leaves() {
        let instance = create_test_instance();
        let any_failed = leaf(
            "test_outcomes__exact",
            Quantified::any("FAILED").with_attr("status"),
        );
        let all_passed = leaf(
            "test_outcomes__exact",
            Quantified::all("PASSED").with_attr("status"),
        );
        assert!(matches(&any_failed, &instance));
        assert!(!matches(&all_passed, &instance));

        // 投影字段缺失时整个叶子不匹配
        let bad_attr = leaf(
            "test_outcomes__exact",
            Quantified::any("FAILED").with_attr("state"),
        );
        assert!(!matches(&bad_attr, &instance));

        // 非集合属性
        let not_iterable = leaf("status__exact", Quantified::any("FAILED"));
        assert!(!matches(&not_iterable, &instance));
    }

    #[test]
    fn test_nested_expression_operator() {
        let instance = create_test_instance();
        let zero_qty = leaf("qty", 0);
        let expr = leaf("order__items__r", Quantified::any(zero_qty.clone()));
        assert!(matches(&expr, &instance));

        let first_item = leaf("order__items__0__r", zero_qty);
        assert!(!matches(&first_item, &instance));
    }

    #[test]
    fn test_mixed_timezone_comparison_retries() {
        let aware = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
        let naive_earlier = NaiveDate::from_ymd_opt(2025, 1, 15)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let instance = Value::map([("started_on", Value::from(aware))]);

        assert!(matches(
            &leaf("started_on__gt", Value::from(naive_earlier)),
            &instance
        ));
        assert!(!matches(
            &leaf("started_on__lt", Value::from(naive_earlier)),
            &instance
        ));
    }

    #[test]
    fn test_trace_records_short_circuit() {
        let instance = create_test_instance();
        let expr = leaf("status", "COMPLETED").and(&leaf("run_key__isnull", false));

        let result = RuleExecutor::new().with_trace().execute(&expr, &instance);
        assert!(!result.matched);
        assert!(result.evaluation_trace.iter().any(|t| t.contains("AND 短路")));
        assert!(result.matched_conditions.is_empty());

        let result = RuleExecutor::new().execute(&expr, &instance);
        assert!(result.evaluation_trace.is_empty());
    }

    #[test]
    fn test_matched_conditions_only_recorded_when_tracing() {
        let instance = create_test_instance();
        let expr = leaf("status", "FAILED").and(&leaf("metric_value__gt", 40).or(&leaf("run_key", "x")));

        let quiet = RuleExecutor::new().execute(&expr, &instance);
        assert!(quiet.matched);
        assert!(quiet.matched_conditions.is_empty());
        assert!(quiet.evaluation_trace.is_empty());

        let traced = RuleExecutor::new().with_trace().execute(&expr, &instance);
        assert!(traced.matched);
        assert!(traced.matched_conditions.contains(&"root.children[0].status__exact".to_string()));
        assert!(
            traced
                .matched_conditions
                .iter()
                .any(|c| c.starts_with("root.children[1].children[") && c.ends_with("metric_value__gt"))
        );
        assert!(!traced.evaluation_trace.is_empty());
    }

    #[test]
    fn test_evaluation_time_recorded() {
        let instance = create_test_instance();
        let start = Instant::now();
        let result = RuleExecutor::new().execute(&leaf("status", "FAILED"), &instance);
        let bound = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);

        assert!(result.matched);
        assert!(result.evaluation_time_us <= bound);
    }
}
