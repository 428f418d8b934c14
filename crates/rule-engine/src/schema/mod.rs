//! 规则数据格式
//!
//! 每种格式版本对应一个 [`SchemaCompiler`](crate::compiler::SchemaCompiler) 实现。

pub mod models;
pub mod simple_v1;

pub use models::{Condition, ConditionKind, RunState, SimpleV1Rule, When};
pub use simple_v1::{SIMPLE_V1, SimpleV1Compiler};
