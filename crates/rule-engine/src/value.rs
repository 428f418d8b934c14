//! 动态值模型
//!
//! 属性路径解析的结果类型。除 JSON 式的标量、列表、映射外，还支持：
//! - 带/不带时区的时间戳（比较时按需归一化）
//! - 实现了 [`Resolve`] 的任意对象（事件、历史运行记录等）
//! - 惰性序列：迭代前不会触发任何存储查询

use crate::resolver::Resolve;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use observer_shared::error::ObserverError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// 时间戳，区分是否带时区
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Timestamp {
    Aware(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

impl Timestamp {
    pub fn is_aware(&self) -> bool {
        matches!(self, Self::Aware(_))
    }

    /// 转换到 UTC，无时区的时间按 UTC 解释
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            Self::Aware(dt) => dt.with_timezone(&Utc),
            Self::Naive(dt) => dt.and_utc(),
        }
    }

    /// 归一化为带 UTC 时区的时间戳
    pub fn normalized(&self) -> Self {
        Self::Aware(self.to_utc().fixed_offset())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aware(dt) => write!(f, "{}", dt.to_rfc3339()),
            Self::Naive(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
        }
    }
}

/// 惰性序列的数据来源
pub trait SequenceSource: Send + Sync {
    /// 拉取数据，`limit` 为 None 时不限制行数
    fn fetch(&self, limit: Option<usize>) -> Result<Vec<Value>, ObserverError>;

    /// 用于日志和调试输出的描述
    fn describe(&self) -> String;
}

/// 惰性序列
///
/// 只记录数据来源和行数上限，调用 [`Sequence::fetch`] 时才真正查询。
#[derive(Clone)]
pub struct Sequence {
    source: Arc<dyn SequenceSource>,
    limit: Option<usize>,
}

impl Sequence {
    pub fn new(source: impl SequenceSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
            limit: None,
        }
    }

    /// 收紧行数上限（多次调用取最小值）
    pub fn limit(&self, n: usize) -> Self {
        let limit = match self.limit {
            Some(existing) => existing.min(n),
            None => n,
        };
        Self {
            source: Arc::clone(&self.source),
            limit: Some(limit),
        }
    }

    pub fn current_limit(&self) -> Option<usize> {
        self.limit
    }

    /// 执行查询并物化结果
    pub fn fetch(&self) -> Result<Vec<Value>, ObserverError> {
        let mut rows = self.source.fetch(self.limit)?;
        if let Some(n) = self.limit {
            rows.truncate(n);
        }
        Ok(rows)
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("source", &self.source.describe())
            .field("limit", &self.limit)
            .finish()
    }
}

impl PartialEq for Sequence {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.source), Arc::as_ptr(&other.source))
            && self.limit == other.limit
    }
}

/// 动态值
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(Timestamp),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(Arc<dyn Resolve>),
    Seq(Sequence),
}

impl Value {
    /// 包装一个可解析对象
    pub fn object(obj: impl Resolve + 'static) -> Self {
        Self::Object(Arc::new(obj))
    }

    /// 从键值对构造映射
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// 真值判定，`isnull` 操作符据此判断“空”
    ///
    /// 惰性序列视为真值，判定它不会触发查询
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(map) => !map.is_empty(),
            Self::Timestamp(_) | Self::Object(_) | Self::Seq(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// 数值视图，布尔值按 0/1 参与比较
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// 获取值的类型名称
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Timestamp(Timestamp::Aware(_)) => "offset-aware datetime",
            Self::Timestamp(Timestamp::Naive(_)) => "offset-naive datetime",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
            Self::Seq(_) => "sequence",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            (Self::Seq(a), Self::Seq(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Timestamp(ts) => write!(f, "{ts}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                write!(f, "}}")
            }
            Self::Object(obj) => write!(f, "<object {obj:?}>"),
            Self::Seq(seq) => write!(f, "<sequence {seq:?}>"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        i64::try_from(i).map(Self::Int).unwrap_or(Self::Float(i as f64))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<Uuid> for Value {
    fn from(id: Uuid) -> Self {
        Self::Str(id.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::Timestamp(Timestamp::Aware(dt.fixed_offset()))
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Self::Timestamp(Timestamp::Naive(dt))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<Sequence> for Value {
    fn from(seq: Sequence) -> Self {
        Self::Seq(seq)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Self::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
    }

    impl SequenceSource for CountingSource {
        fn fetch(&self, limit: Option<usize>) -> Result<Vec<Value>, ObserverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let rows: Vec<Value> = (0..10).map(Value::from).collect();
            Ok(match limit {
                Some(n) => rows.into_iter().take(n).collect(),
                None => rows,
            })
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::Float(0.5).is_truthy());
    }

    #[test]
    fn test_from_json() {
        let value = Value::from(json!({"a": [1, 2.5, "x", null], "b": true}));
        let Value::Map(map) = value else {
            panic!("expected map");
        };
        assert_eq!(
            map["a"],
            Value::List(vec![
                Value::Int(1),
                Value::Float(2.5),
                Value::from("x"),
                Value::Null
            ])
        );
        assert_eq!(map["b"], Value::Bool(true));
    }

    #[test]
    fn test_sequence_is_lazy_and_limited() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seq = Sequence::new(CountingSource {
            calls: Arc::clone(&calls),
        });
        let limited = seq.limit(5).limit(3);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let rows = limited.fetch().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(limited.current_limit(), Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timestamp_normalization() {
        let naive = chrono::NaiveDate::from_ymd_opt(2025, 1, 15)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let aware = DateTime::parse_from_rfc3339("2025-01-15T12:00:00+02:00").unwrap();

        assert_eq!(
            Timestamp::Naive(naive).normalized(),
            Timestamp::Aware(aware).normalized()
        );
        assert!(!Timestamp::Naive(naive).is_aware());
    }
}
