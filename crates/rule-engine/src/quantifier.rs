//! 量词比较
//!
//! 当比较的属性是一个集合（列表或惰性历史序列）时，用量词描述
//! “多少个元素满足条件”。元素可以先经过变换（限制行数、预取关联数据），
//! 再按 `attr_name` 投影出要比较的字段。

use crate::error::{Result, RuleError};
use crate::expression::Operand;
use crate::resolver::{Resolve, resolve};
use crate::value::Value;
use std::fmt;

/// 量词
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantifier {
    /// 至少一个元素满足
    Any,
    /// 所有元素都满足
    All,
    /// 前 n 个满足，第 n+1 个（若存在）不满足；不足 n 个视为不成立
    ExactN(usize),
    /// 前 n 个满足，之后的元素不关心；不足 n 个视为不成立
    AtLeast(usize),
}

impl fmt::Display for Quantifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "ANY"),
            Self::All => write!(f, "ALL"),
            Self::ExactN(n) => write!(f, "EXACT_N[{n}]"),
            Self::AtLeast(n) => write!(f, "ATLEAST[{n}]"),
        }
    }
}

/// 迭代前施加在集合上的变换，按声明顺序应用
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Transform {
    /// 只取前 n 个元素（惰性序列下推为查询上限）
    Limit(usize),
    /// 为每个元素预先加载指定的关联集合
    Prefetch(String),
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit(n) => write!(f, "limit({n})"),
            Self::Prefetch(attr) => write!(f, "prefetch({attr})"),
        }
    }
}

/// 量化的比较值
#[derive(Debug, Clone, PartialEq)]
pub struct Quantified {
    pub quantifier: Quantifier,
    /// 比较值，可以是普通值或嵌套表达式（配合 `r` 操作符），不能再嵌套量词
    pub operand: Operand,
    /// 比较前从每个元素上投影的字段
    pub attr_name: Option<String>,
    pub transforms: Vec<Transform>,
}

impl Quantified {
    pub fn new(quantifier: Quantifier, operand: impl Into<Operand>) -> Self {
        Self {
            quantifier,
            operand: operand.into(),
            attr_name: None,
            transforms: Vec::new(),
        }
    }

    pub fn any(operand: impl Into<Operand>) -> Self {
        Self::new(Quantifier::Any, operand)
    }

    pub fn all(operand: impl Into<Operand>) -> Self {
        Self::new(Quantifier::All, operand)
    }

    pub fn exact_n(n: usize, operand: impl Into<Operand>) -> Self {
        Self::new(Quantifier::ExactN(n), operand)
    }

    pub fn at_least(n: usize, operand: impl Into<Operand>) -> Self {
        Self::new(Quantifier::AtLeast(n), operand)
    }

    pub fn with_attr(mut self, attr_name: impl Into<String>) -> Self {
        self.attr_name = Some(attr_name.into());
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.transforms.push(Transform::Limit(n));
        self
    }

    pub fn prefetch(mut self, attr: impl Into<String>) -> Self {
        self.transforms.push(Transform::Prefetch(attr.into()));
        self
    }

    /// 规范化文本形式
    pub fn canonical(&self) -> String {
        let mut out = format!("{}({}", self.quantifier, self.operand.canonical());
        if let Some(attr) = &self.attr_name {
            out.push_str(&format!(", attr={attr}"));
        }
        if !self.transforms.is_empty() {
            let transforms: Vec<String> = self.transforms.iter().map(ToString::to_string).collect();
            out.push_str(&format!(", [{}]", transforms.join(", ")));
        }
        out.push(')');
        out
    }

    /// 应用变换并物化为元素列表
    ///
    /// 惰性序列在这里才真正查询，行数上限已经下推
    pub(crate) fn materialize(&self, value: &Value) -> Result<Vec<Value>> {
        let mut current = value.clone();
        for transform in &self.transforms {
            current = apply_transform(current, transform)?;
        }
        into_items(current)
    }

    /// 判定量词是否成立
    ///
    /// 按顺序逐个检查元素，能确定结果时立即返回。
    /// 投影失败或 `check` 返回错误时整体返回错误。
    pub(crate) fn evaluate<F>(&self, items: &[Value], mut check: F) -> Result<bool>
    where
        F: FnMut(&Value) -> Result<bool>,
    {
        let mut matches = |item: &Value| -> Result<bool> {
            match &self.attr_name {
                Some(attr) => check(&resolve(item, attr)?),
                None => check(item),
            }
        };

        match self.quantifier {
            Quantifier::Any => {
                for item in items {
                    if matches(item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Quantifier::All => {
                for item in items {
                    if !matches(item)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Quantifier::ExactN(n) => {
                if items.len() < n {
                    return Ok(false);
                }
                for item in &items[..n] {
                    if !matches(item)? {
                        return Ok(false);
                    }
                }
                match items.get(n) {
                    Some(next) => Ok(!matches(next)?),
                    None => Ok(true),
                }
            }
            Quantifier::AtLeast(n) => {
                if items.len() < n {
                    return Ok(false);
                }
                for item in &items[..n] {
                    if !matches(item)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}

fn apply_transform(value: Value, transform: &Transform) -> Result<Value> {
    match transform {
        Transform::Limit(n) => match value {
            Value::Seq(seq) => Ok(Value::Seq(seq.limit(*n))),
            Value::List(mut items) => {
                items.truncate(*n);
                Ok(Value::List(items))
            }
            other => Err(RuleError::type_mismatch("iterable", other.type_name())),
        },
        Transform::Prefetch(attr) => {
            let items = into_items(value)?;
            let loaded = items
                .into_iter()
                .map(|item| prefetch_item(item, attr))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::List(loaded))
        }
    }
}

/// 物化元素上的关联集合，使后续比较不再触发查询
fn prefetch_item(item: Value, attr: &str) -> Result<Value> {
    let related = match resolve(&item, attr)? {
        Value::Seq(seq) => Value::List(seq.fetch()?),
        other => other,
    };
    match item {
        Value::Map(mut map) => {
            map.insert(attr.to_string(), related);
            Ok(Value::Map(map))
        }
        inner => Ok(Value::object(Prefetched {
            inner,
            attr: attr.to_string(),
            related,
        })),
    }
}

fn into_items(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items),
        Value::Seq(seq) => Ok(seq.fetch()?),
        other => Err(RuleError::type_mismatch("iterable", other.type_name())),
    }
}

/// 带预取结果的元素
#[derive(Debug)]
struct Prefetched {
    inner: Value,
    attr: String,
    related: Value,
}

impl Resolve for Prefetched {
    fn get_attr(&self, name: &str) -> Option<Value> {
        if name == self.attr {
            return Some(self.related.clone());
        }
        resolve(&self.inner, name).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statuses(items: &[&str]) -> Vec<Value> {
        items
            .iter()
            .map(|s| Value::map([("status", Value::from(*s))]))
            .collect()
    }

    fn eval(q: &Quantified, items: &[Value]) -> bool {
        q.evaluate(items, |v| Ok(v == &Value::from("FAILED"))).unwrap()
    }

    #[test]
    fn test_any_and_all() {
        let items = statuses(&["COMPLETED", "FAILED"]);
        assert!(eval(&Quantified::any("FAILED").with_attr("status"), &items));
        assert!(!eval(&Quantified::all("FAILED").with_attr("status"), &items));
        assert!(eval(&Quantified::all("FAILED").with_attr("status"), &[]));
    }

    #[test]
    fn test_exact_n() {
        let q = Quantified::exact_n(2, "FAILED").with_attr("status");
        assert!(eval(&q, &statuses(&["FAILED", "FAILED", "COMPLETED"])));
        assert!(eval(&q, &statuses(&["FAILED", "FAILED"])));
        assert!(!eval(&q, &statuses(&["FAILED", "FAILED", "FAILED"])));
        assert!(!eval(&q, &statuses(&["FAILED"])));
        assert!(!eval(&q, &statuses(&["FAILED", "COMPLETED", "FAILED"])));
    }

    #[test]
    fn test_at_least_ignores_tail() {
        let q = Quantified::at_least(2, "FAILED").with_attr("status");
        assert!(eval(&q, &statuses(&["FAILED", "FAILED", "FAILED"])));
        assert!(eval(&q, &statuses(&["FAILED", "FAILED", "COMPLETED"])));
        assert!(!eval(&q, &statuses(&["FAILED"])));
        assert!(!eval(&q, &statuses(&["COMPLETED", "FAILED", "FAILED"])));
    }

    #[test]
    fn test_missing_projection_is_error() {
        let q = Quantified::any("FAILED").with_attr("state");
        let items = statuses(&["FAILED"]);
        assert!(q.evaluate(&items, |_| Ok(true)).is_err());
    }

    #[test]
    fn test_limit_and_prefetch_on_lists() {
        let items = Value::List(vec![
            Value::map([("alerts", Value::List(vec![Value::from("LATE_END")]))]),
            Value::map([("alerts", Value::List(vec![]))]),
            Value::map([("alerts", Value::List(vec![]))]),
        ]);
        let q = Quantified::any("x").limit(2).prefetch("alerts");
        let materialized = q.materialize(&items).unwrap();
        assert_eq!(materialized.len(), 2);
        assert_eq!(
            resolve(&materialized[0], "alerts__0").unwrap(),
            Value::from("LATE_END")
        );
    }

    #[test]
    fn test_canonical_form() {
        let q = Quantified::exact_n(3, "FAILED").with_attr("status").limit(4);
        assert_eq!(q.canonical(), "EXACT_N[3](\"FAILED\", attr=status, [limit(4)])");
    }
}
