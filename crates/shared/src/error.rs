//! 统一错误处理模块
//!
//! 定义各组件共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 规则引擎自身的编译/匹配错误定义在引擎 crate 中，这里只承载基础设施类错误。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum ObserverError {
    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 存储错误 ====================
    #[error("存储查询失败: {operation} - {message}")]
    Store { operation: String, message: String },

    #[error("存储查询超时: {operation}")]
    StoreTimeout { operation: String },

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    // ==================== 序列化错误 ====================
    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, ObserverError>;

impl ObserverError {
    /// 构造存储查询错误
    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Store { .. } => "STORE_ERROR",
            Self::StoreTimeout { .. } => "STORE_TIMEOUT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Json(_) => "JSON_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 存储层的瞬时故障可在下一个刷新周期重试，配置和数据错误重试无意义
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::StoreTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = ObserverError::NotFound {
            entity: "Rule".to_string(),
            id: "123".to_string(),
        };
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(ObserverError::store("runs", "boom").code(), "STORE_ERROR");
    }

    #[test]
    fn test_is_retryable() {
        assert!(ObserverError::store("rules_for_scopes", "connection reset").is_retryable());
        assert!(
            ObserverError::StoreTimeout {
                operation: "runs".to_string()
            }
            .is_retryable()
        );
        assert!(!ObserverError::Internal("bug".to_string()).is_retryable());
    }

    #[test]
    fn test_store_error_message() {
        let err = ObserverError::store("run_alerts", "table missing");
        assert_eq!(err.to_string(), "存储查询失败: run_alerts - table missing");
    }
}
