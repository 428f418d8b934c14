//! 条件评估器
//!
//! 实现各操作符对单个属性值的比较逻辑。比较失败（类型不兼容等）以
//! `TypeMismatch` 返回，由执行器决定如何处理。

use crate::error::{Result, RuleError};
use crate::operators::Operator;
use crate::value::{Timestamp, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

/// 正则缓存上限，超过后整体清空
const REGEX_CACHE_CAPACITY: usize = 512;

static REGEX_CACHE: LazyLock<RwLock<HashMap<(String, bool), Regex>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估单个比较
    ///
    /// # Arguments
    /// * `field` - 从实例中解析出的属性值
    /// * `operator` - 操作符
    /// * `expected` - 规则中给定的比较值
    pub fn evaluate(field: &Value, operator: Operator, expected: &Value) -> Result<bool> {
        match operator {
            Operator::Exact => Self::eq(field, expected),
            Operator::IExact => match (field, expected) {
                (Value::Str(a), Value::Str(b)) => Ok(a.to_lowercase() == b.to_lowercase()),
                _ => Self::eq(field, expected),
            },
            Operator::Contains => Self::contains(field, expected),
            Operator::IContains => Self::strings(field, expected, |a, b| {
                a.to_lowercase().contains(&b.to_lowercase())
            }),
            Operator::StartsWith => Self::strings(field, expected, |a, b| a.starts_with(b)),
            Operator::IStartsWith => Self::strings(field, expected, |a, b| {
                a.to_lowercase().starts_with(&b.to_lowercase())
            }),
            Operator::EndsWith => Self::strings(field, expected, |a, b| a.ends_with(b)),
            Operator::IEndsWith => Self::strings(field, expected, |a, b| {
                a.to_lowercase().ends_with(&b.to_lowercase())
            }),
            Operator::In => Self::in_collection(field, expected),
            Operator::Gt => Ok(Self::compare(field, expected)? == Ordering::Greater),
            Operator::Gte => Ok(Self::compare(field, expected)? != Ordering::Less),
            Operator::Lt => Ok(Self::compare(field, expected)? == Ordering::Less),
            Operator::Lte => Ok(Self::compare(field, expected)? != Ordering::Greater),
            Operator::Range => Self::range(field, expected),
            // 属性值和比较值恰有一个为假时成立
            Operator::IsNull => Ok(!field.is_truthy() ^ !expected.is_truthy()),
            Operator::Regex => Self::regex_search(field, expected, false),
            Operator::IRegex => Self::regex_search(field, expected, true),
            Operator::R => Err(RuleError::type_mismatch("expression", expected.type_name())),
        }
    }

    /// 相等比较
    fn eq(field: &Value, expected: &Value) -> Result<bool> {
        match (field, expected) {
            (Value::Int(a), Value::Int(b)) => Ok(a == b),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                Ok(field.as_f64() == expected.as_f64())
            }
            _ => match (Self::as_timestamp(field), Self::as_timestamp(expected)) {
                (Some(a), Some(b))
                    if matches!(field, Value::Timestamp(_))
                        || matches!(expected, Value::Timestamp(_)) =>
                {
                    Ok(Self::compare_timestamps(&a, &b)? == Ordering::Equal)
                }
                _ => Ok(field == expected),
            },
        }
    }

    /// 有序比较：数值、字符串、布尔、时间
    pub fn compare(field: &Value, expected: &Value) -> Result<Ordering> {
        match (field, expected) {
            (Value::Str(a), Value::Str(b)) => return Ok(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => return Ok(a.cmp(b)),
            _ => {}
        }

        if let (Some(a), Some(b)) = (Self::number(field), Self::number(expected)) {
            return a
                .partial_cmp(&b)
                .ok_or_else(|| RuleError::type_mismatch("comparable number", "NaN"));
        }

        if (matches!(field, Value::Timestamp(_)) || matches!(expected, Value::Timestamp(_)))
            && let (Some(a), Some(b)) = (Self::as_timestamp(field), Self::as_timestamp(expected))
        {
            return Self::compare_timestamps(&a, &b);
        }

        Err(RuleError::type_mismatch(
            field.type_name(),
            expected.type_name(),
        ))
    }

    /// 时间比较，时区属性不一致时报类型错误
    fn compare_timestamps(a: &Timestamp, b: &Timestamp) -> Result<Ordering> {
        match (a, b) {
            (Timestamp::Aware(x), Timestamp::Aware(y)) => Ok(x.cmp(y)),
            (Timestamp::Naive(x), Timestamp::Naive(y)) => Ok(x.cmp(y)),
            (Timestamp::Aware(_), Timestamp::Naive(_)) => Err(RuleError::type_mismatch(
                "offset-aware datetime",
                "offset-naive datetime",
            )),
            (Timestamp::Naive(_), Timestamp::Aware(_)) => Err(RuleError::type_mismatch(
                "offset-naive datetime",
                "offset-aware datetime",
            )),
        }
    }

    /// 时间视图：时间戳本身，或可解析为时间的字符串
    pub fn as_timestamp(value: &Value) -> Option<Timestamp> {
        match value {
            Value::Timestamp(ts) => Some(*ts),
            Value::Str(s) => Self::parse_timestamp(s),
            _ => None,
        }
    }

    /// 解析时间字符串，支持 RFC3339、不带时区的 ISO 时间和纯日期
    fn parse_timestamp(s: &str) -> Option<Timestamp> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(Timestamp::Aware(dt));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
                return Some(Timestamp::Naive(dt));
            }
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(Timestamp::Naive)
    }

    /// 数值视图，布尔值只与数值比较时参与
    fn number(value: &Value) -> Option<f64> {
        match value {
            Value::Int(_) | Value::Float(_) | Value::Bool(_) => value.as_f64(),
            _ => None,
        }
    }

    /// 包含检查：子串、列表元素、映射键
    fn contains(field: &Value, expected: &Value) -> Result<bool> {
        match (field, expected) {
            (Value::Str(a), Value::Str(b)) => Ok(a.contains(b.as_str())),
            (Value::List(items), _) => Ok(items
                .iter()
                .any(|item| Self::eq(item, expected).unwrap_or(false))),
            (Value::Map(map), Value::Str(key)) => Ok(map.contains_key(key)),
            _ => Err(RuleError::type_mismatch(
                "string, list or map",
                field.type_name(),
            )),
        }
    }

    /// 成员检查
    fn in_collection(field: &Value, expected: &Value) -> Result<bool> {
        match expected {
            Value::List(items) => Ok(items
                .iter()
                .any(|item| Self::eq(field, item).unwrap_or(false))),
            Value::Str(haystack) => match field {
                Value::Str(needle) => Ok(haystack.contains(needle.as_str())),
                other => Err(RuleError::type_mismatch("string", other.type_name())),
            },
            Value::Seq(seq) => {
                let items = seq.fetch()?;
                Ok(items
                    .iter()
                    .any(|item| Self::eq(field, item).unwrap_or(false)))
            }
            other => Err(RuleError::type_mismatch("list", other.type_name())),
        }
    }

    /// 闭区间范围，`expected` 为 [low, high]
    fn range(field: &Value, expected: &Value) -> Result<bool> {
        let Value::List(bounds) = expected else {
            return Err(RuleError::type_mismatch("list [low, high]", expected.type_name()));
        };
        let [low, high] = bounds.as_slice() else {
            return Err(RuleError::type_mismatch(
                "list [low, high]",
                format!("list of {}", bounds.len()),
            ));
        };
        Ok(Self::compare(field, low)? != Ordering::Less
            && Self::compare(field, high)? != Ordering::Greater)
    }

    fn strings<F>(field: &Value, expected: &Value, check: F) -> Result<bool>
    where
        F: Fn(&str, &str) -> bool,
    {
        match (field, expected) {
            (Value::Str(a), Value::Str(b)) => Ok(check(a, b)),
            (Value::Str(_), other) | (other, _) => {
                Err(RuleError::type_mismatch("string", other.type_name()))
            }
        }
    }

    /// 正则搜索（在字符串任意位置匹配）
    fn regex_search(field: &Value, expected: &Value, case_insensitive: bool) -> Result<bool> {
        let Value::Str(pattern) = expected else {
            return Err(RuleError::type_mismatch("regex pattern", expected.type_name()));
        };
        let Value::Str(text) = field else {
            return Err(RuleError::type_mismatch("string", field.type_name()));
        };
        let re = cached_regex(pattern, case_insensitive)?;
        Ok(re.is_match(text))
    }
}

/// 编译正则，用于构造阶段校验
pub fn compile_regex(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| RuleError::InvalidRegex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

fn cached_regex(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    let key = (pattern.to_string(), case_insensitive);
    if let Some(re) = REGEX_CACHE.read().get(&key) {
        return Ok(re.clone());
    }

    let re = compile_regex(pattern, case_insensitive)?;
    let mut cache = REGEX_CACHE.write();
    if cache.len() >= REGEX_CACHE_CAPACITY {
        cache.clear();
    }
    cache.insert(key, re.clone());
    Ok(re)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn eval(field: impl Into<Value>, op: Operator, expected: impl Into<Value>) -> bool {
        ConditionEvaluator::evaluate(&field.into(), op, &expected.into()).unwrap()
    }

    #[test]
    fn test_exact_numeric_cross_type() {
        assert!(eval(100, Operator::Exact, 100.0));
        assert!(eval("FAILED", Operator::Exact, "FAILED"));
        assert!(!eval("FAILED", Operator::Exact, "failed"));
        assert!(eval("FAILED", Operator::IExact, "failed"));
        assert!(eval(Value::Null, Operator::Exact, Value::Null));
        assert!(!eval("1", Operator::Exact, 1));
    }

    #[test]
    fn test_string_operators() {
        assert!(eval("trace.py failed", Operator::Contains, "py"));
        assert!(eval("trace.py failed", Operator::IContains, "PY"));
        assert!(eval("trace.py", Operator::StartsWith, "trace"));
        assert!(eval("trace.py", Operator::IStartsWith, "TRACE"));
        assert!(eval("trace.py", Operator::EndsWith, ".py"));
        assert!(eval("trace.py", Operator::IEndsWith, ".PY"));
        assert!(ConditionEvaluator::evaluate(&Value::Int(1), Operator::StartsWith, &Value::from("1")).is_err());
    }

    #[test]
    fn test_in_and_contains() {
        let levels = Value::List(vec![Value::from("ERROR"), Value::from("WARNING")]);
        assert!(eval("ERROR", Operator::In, levels.clone()));
        assert!(!eval("INFO", Operator::In, levels.clone()));
        assert!(eval(levels, Operator::Contains, "WARNING"));
        assert!(eval("ERR", Operator::In, "ERROR"));
    }

    #[test]
    fn test_ordering_and_range() {
        assert!(eval(10, Operator::Gt, 5));
        assert!(eval(10.5, Operator::Gte, 10));
        assert!(eval(3, Operator::Lt, 3.5));
        assert!(eval(3, Operator::Lte, 3));
        assert!(eval(5, Operator::Range, vec![Value::Int(5), Value::Int(10)]));
        assert!(eval(10, Operator::Range, vec![Value::Int(5), Value::Int(10)]));
        assert!(!eval(11, Operator::Range, vec![Value::Int(5), Value::Int(10)]));
        assert!(eval("b", Operator::Gt, "a"));
    }

    #[test]
    fn test_incomparable_values_are_errors() {
        let err = ConditionEvaluator::evaluate(&Value::Null, Operator::Gt, &Value::Int(1));
        assert!(matches!(err, Err(RuleError::TypeMismatch { .. })));
        let err = ConditionEvaluator::evaluate(&Value::Int(1), Operator::Range, &Value::Int(1));
        assert!(matches!(err, Err(RuleError::TypeMismatch { .. })));
    }

    #[test]
    fn test_isnull_is_xor_of_falsiness() {
        assert!(eval(Value::Null, Operator::IsNull, true));
        assert!(!eval("x", Operator::IsNull, true));
        assert!(eval("x", Operator::IsNull, false));
        assert!(!eval(Value::Null, Operator::IsNull, false));
        assert!(eval("", Operator::IsNull, true));
    }

    #[test]
    fn test_regex_search_semantics() {
        assert!(eval("Step trace.py failed", Operator::Regex, r"trace\.py"));
        assert!(!eval("Step TRACE.py failed", Operator::Regex, r"trace\.py"));
        assert!(eval("Step TRACE.py failed", Operator::IRegex, r"trace\.py"));
        assert!(ConditionEvaluator::evaluate(&Value::from("x"), Operator::Regex, &Value::from("(")).is_err());
        assert!(compile_regex("[a-", false).is_err());
    }

    #[test]
    fn test_timestamp_awareness_mismatch() {
        let aware = Value::from(Utc::now());
        let naive = Value::from(Utc::now().naive_utc());
        let err = ConditionEvaluator::evaluate(&aware, Operator::Gt, &naive);
        assert!(matches!(err, Err(RuleError::TypeMismatch { .. })));

        let later = Value::from("2099-01-01T00:00:00Z");
        assert!(eval(later, Operator::Gt, aware));
    }
}
