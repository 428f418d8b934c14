//! 规则引擎错误类型

use observer_shared::error::ObserverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    /// 规则数据不合法，携带出错的条件种类和原因
    #[error("无效的规则数据 [{kind}]: {reason}")]
    InvalidRuleData { kind: String, reason: String },

    #[error("未知的规则 schema 版本: {0}")]
    UnknownSchemaVersion(String),

    #[error("未注册的动作: {0}")]
    UnknownAction(String),

    #[error("无效的动作参数 [{action}]: {reason}")]
    InvalidActionArgs { action: String, reason: String },

    #[error("路径不能为空")]
    EmptyPath,

    #[error("'{0}' 缺少操作符，是否想写 '{0}__exact'？")]
    MissingOperator(String),

    #[error("无效的操作符: {operator} (路径 '{path}')")]
    InvalidOperator { path: String, operator: String },

    #[error("属性不存在: {0}")]
    MissingAttribute(String),

    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("无效的正则表达式 '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("存储查询失败: {0}")]
    Store(#[from] ObserverError),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RuleError {
    /// 构造规则数据错误
    pub fn invalid(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRuleData {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
