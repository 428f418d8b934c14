//! 属性路径解析
//!
//! 路径由 `__` 分隔的段组成，如 `event__status`、`database__runs`。
//! 每一段先尝试按键查找（映射、列表下标、实现了键访问的对象），
//! 键查找失败或出错时再按属性查找。

use crate::error::{Result, RuleError};
use crate::value::Value;
use std::fmt;

/// 路径段分隔符，同时用于分隔路径和操作符
pub const DELIMITER: &str = "__";

/// 可被规则表达式访问的对象
///
/// 默认实现既没有键也没有属性，实现者按需覆盖。
pub trait Resolve: Send + Sync + fmt::Debug {
    /// 是否支持按键访问
    fn is_mapping(&self) -> bool {
        false
    }

    fn contains_key(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    /// 按键取值，键不存在时返回 `MissingAttribute`
    fn get_item(&self, key: &str) -> Result<Value> {
        Err(RuleError::MissingAttribute(key.to_string()))
    }

    /// 按属性名取值，属性不存在时返回 None
    fn get_attr(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// 解析完整路径
pub fn resolve(root: &Value, path: &str) -> Result<Value> {
    if path.is_empty() {
        return Err(RuleError::EmptyPath);
    }
    let segments: Vec<&str> = path.split(DELIMITER).collect();
    resolve_segments(root, &segments)
}

/// 解析路径，任何一段缺失时返回默认值
pub fn resolve_or(root: &Value, path: &str, default: Value) -> Value {
    resolve(root, path).unwrap_or(default)
}

/// 按已拆分的路径段逐级解析
pub fn resolve_segments<S: AsRef<str>>(root: &Value, segments: &[S]) -> Result<Value> {
    let mut current = root.clone();
    for (index, segment) in segments.iter().enumerate() {
        let segment = segment.as_ref();
        current = lookup(&current, segment).ok_or_else(|| {
            let walked: Vec<&str> = segments[..=index].iter().map(AsRef::as_ref).collect();
            RuleError::MissingAttribute(walked.join(DELIMITER))
        })?;
    }
    Ok(current)
}

/// 单段查找：键优先，失败后回退到属性
fn lookup(current: &Value, segment: &str) -> Option<Value> {
    match keyed(current, segment) {
        Ok(Some(value)) => Some(value),
        _ => attribute(current, segment),
    }
}

fn keyed(current: &Value, segment: &str) -> Result<Option<Value>> {
    match current {
        Value::Map(map) => Ok(map.get(segment).cloned()),
        Value::List(items) => Ok(segment
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get(index).cloned())),
        Value::Object(obj) if obj.is_mapping() => {
            if obj.contains_key(segment)? {
                obj.get_item(segment).map(Some)
            } else {
                Ok(None)
            }
        }
        _ => Ok(None),
    }
}

fn attribute(current: &Value, segment: &str) -> Option<Value> {
    match current {
        Value::Object(obj) => obj.get_attr(segment),
        _ => None,
    }
}
