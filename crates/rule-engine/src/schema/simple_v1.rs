//! simple_v1 编译器
//!
//! 把每个条件编译成表达式子树，再按 `when` 用 OR / AND 组合。
//! 子树内先放只读事件字段的静态谓词，历史查询放在最后，
//! 短路求值保证不相关的事件不会触发历史查询。

use super::models::{
    Condition, InstanceAlertCondition, MessageLogCondition, MetricLogCondition, RunStateClass,
    RunStateCondition, SimpleV1Rule, When,
};
use crate::compiler::SchemaCompiler;
use crate::error::Result;
use crate::expression::{Expression, Operand};
use crate::quantifier::{Quantified, Quantifier};
use crate::value::Value;

pub const SIMPLE_V1: &str = "simple_v1";

/// 全部历史运行
const RUNS: &str = "database__runs";
/// 与当前运行同名的历史运行
const NAMED_RUNS: &str = "database__named_runs";
const INSTANCE_ALERT_EVENT: &str = "INSTANCE_ALERT";

#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleV1Compiler;

impl SchemaCompiler for SimpleV1Compiler {
    fn version(&self) -> &'static str {
        SIMPLE_V1
    }

    fn compile(&self, data: &serde_json::Value) -> Result<Expression> {
        let rule = SimpleV1Rule::parse(data)?;
        let parts = rule
            .conditions
            .iter()
            .map(compile_condition)
            .collect::<Result<Vec<_>>>()?;

        Ok(match rule.when {
            When::Any => Expression::disjunction(parts),
            When::All => Expression::conjunction(parts),
        })
    }
}

fn compile_condition(condition: &Condition) -> Result<Expression> {
    match condition {
        Condition::TaskStatus(c) => Expression::all_of([
            ("status__exact", Operand::from(c.matches.as_str())),
            ("task_key__isnull", Operand::from(false)),
        ]),
        Condition::RunState(c) => compile_run_state(c),
        Condition::TestStatus(c) => Expression::leaf(
            "test_outcomes__exact",
            Quantified::any(c.matches.as_str()).with_attr("status"),
        ),
        Condition::MetricLog(c) => compile_metric_log(c),
        Condition::MessageLog(c) => compile_message_log(c),
        Condition::InstanceAlert(c) => compile_instance_alert(c),
    }
}

/// 运行状态 / 运行告警
///
/// 终态：当前事件是该状态的运行级事件，且历史运行满足计数要求。
/// 告警：当前事件是该类型的运行告警，且历史运行上的告警满足计数要求。
fn compile_run_state(c: &RunStateCondition) -> Result<Expression> {
    let runs = if c.group_run_name { NAMED_RUNS } else { RUNS };

    match c.matches.classify() {
        RunStateClass::Running => run_level_status("RUNNING"),
        RunStateClass::Terminal(status) => {
            let current = run_level_status(status.as_str())?;
            let Some((quantifier, limit)) = history_window(c) else {
                return Ok(current);
            };
            let history = Expression::leaf(
                &format!("{runs}__exact"),
                Quantified::new(quantifier, status.as_str())
                    .with_attr("status")
                    .limit(limit),
            )?;
            Ok(current.and(&history))
        }
        RunStateClass::Alert(alert_type) => {
            let current = Expression::all_of([
                ("type__exact", Operand::from(alert_type.as_str())),
                ("run_id__isnull", Operand::from(false)),
            ])?;
            let Some((quantifier, limit)) = history_window(c) else {
                return Ok(current);
            };
            let has_alert = Expression::leaf(
                "alerts__r",
                Quantified::any(Expression::leaf("type__exact", alert_type.as_str())?),
            )?;
            let history = Expression::leaf(
                &format!("{runs}__r"),
                Quantified::new(quantifier, has_alert)
                    .limit(limit)
                    .prefetch("alerts"),
            )?;
            Ok(current.and(&history))
        }
    }
}

/// 运行级（非任务级）状态事件
fn run_level_status(status: &str) -> Result<Expression> {
    Expression::all_of([
        ("status__exact", Operand::from(status)),
        ("run_key__isnull", Operand::from(false)),
        ("task_key__isnull", Operand::from(true)),
    ])
}

/// 历史计数所用的量词和查询行数
///
/// - 非连续触发：最近 count 次都满足、第 count+1 次不满足
/// - 连续触发且 count>1：最近 count 次都满足
/// - 连续触发且 count=1：不需要历史
fn history_window(c: &RunStateCondition) -> Option<(Quantifier, usize)> {
    if !c.trigger_successive {
        Some((Quantifier::ExactN(c.count), c.count + 1))
    } else if c.count > 1 {
        Some((Quantifier::AtLeast(c.count), c.count))
    } else {
        None
    }
}

fn compile_metric_log(c: &MetricLogCondition) -> Result<Expression> {
    let key = c.key.clone().unwrap_or_default();
    let value_lookup = format!("metric_value__{}", c.operator);
    Expression::all_of([
        ("metric_key__exact", Operand::from(key)),
        (value_lookup.as_str(), Operand::from(c.static_value)),
    ])
}

fn compile_message_log(c: &MessageLogCondition) -> Result<Expression> {
    let levels = match c.level.as_deref() {
        Some(levels) if !levels.is_empty() => Expression::disjunction(
            levels
                .iter()
                .map(|level| Expression::leaf("log_level__exact", level.as_str()))
                .collect::<Result<Vec<_>>>()?,
        ),
        _ => Expression::leaf("log_level__isnull", false)?,
    };

    let mut expr = levels.and(&Expression::leaf("message__isnull", false)?);
    if let Some(pattern) = &c.matches {
        expr = expr.and(&Expression::leaf("message__regex", pattern.as_str())?);
    }
    Ok(expr)
}

fn compile_instance_alert(c: &InstanceAlertCondition) -> Result<Expression> {
    // 运行告警也有 level / type 字段，需要限定事件种类
    let mut expr = Expression::leaf("event_type__exact", INSTANCE_ALERT_EVENT)?;
    if let Some(levels) = c.level_matches.as_deref().filter(|l| !l.is_empty()) {
        let levels: Vec<Value> = levels.iter().map(|l| Value::from(l.as_str())).collect();
        expr = expr.and(&Expression::leaf("level__in", levels)?);
    }
    if let Some(types) = c.type_matches.as_deref().filter(|t| !t.is_empty()) {
        let types: Vec<Value> = types.iter().map(|t| Value::from(t.as_str())).collect();
        expr = expr.and(&Expression::leaf("type__in", types)?);
    }
    Ok(expr)
}
