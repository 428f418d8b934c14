//! 规则操作符定义

use crate::error::{Result, RuleError};
use crate::resolver::DELIMITER;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 比较操作符，以 `路径__操作符` 的后缀形式出现在比较叶子中
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    // 相等
    Exact,
    IExact,

    // 字符串 / 集合包含
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    In,

    // 有序比较
    Gt,
    Gte,
    Lt,
    Lte,
    Range,

    // 空值检查
    IsNull,

    // 正则（搜索语义）
    Regex,
    IRegex,

    /// 对属性值递归求值嵌套表达式
    R,
}

impl Operator {
    pub const ALL: [Operator; 18] = [
        Self::Exact,
        Self::IExact,
        Self::Contains,
        Self::IContains,
        Self::StartsWith,
        Self::IStartsWith,
        Self::EndsWith,
        Self::IEndsWith,
        Self::In,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::Range,
        Self::IsNull,
        Self::Regex,
        Self::IRegex,
        Self::R,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::IExact => "iexact",
            Self::Contains => "contains",
            Self::IContains => "icontains",
            Self::StartsWith => "startswith",
            Self::IStartsWith => "istartswith",
            Self::EndsWith => "endswith",
            Self::IEndsWith => "iendswith",
            Self::In => "in",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Range => "range",
            Self::IsNull => "isnull",
            Self::Regex => "regex",
            Self::IRegex => "iregex",
            Self::R => "r",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|op| op.as_str() == s).ok_or(())
    }
}

/// 逻辑操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

/// 拆分 `a__b__op` 为路径段和操作符
///
/// 只有属性没有操作符，或后缀不是已注册的操作符时返回错误
pub fn split_path_and_operator(path_op: &str) -> Result<(Vec<String>, Operator)> {
    if path_op.is_empty() {
        return Err(RuleError::EmptyPath);
    }

    let Some((path, suffix)) = path_op.rsplit_once(DELIMITER) else {
        return Err(RuleError::MissingOperator(path_op.to_string()));
    };

    let operator = suffix
        .parse::<Operator>()
        .map_err(|_| RuleError::InvalidOperator {
            path: path_op.to_string(),
            operator: suffix.to_string(),
        })?;

    let segments: Vec<String> = path.split(DELIMITER).map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
        return Err(RuleError::EmptyPath);
    }

    Ok((segments, operator))
}
