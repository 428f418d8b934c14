//! 规则匹配引擎
//!
//! 数据流水线可观测平台的规则匹配核心，提供：
//! - 基于属性路径的表达式树与量词匹配
//! - 按版本选择的规则数据编译（simple_v1）
//! - 按刷新周期失效的编译规则缓存
//! - 事件评估与隔离的触发器执行

pub mod compiler;
pub mod context;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod expression;
pub mod operators;
pub mod quantifier;
pub mod repository;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod trigger;
pub mod value;

pub use compiler::{CompiledRule, CompilerRegistry, RuleCompiler, SchemaCompiler, compile};
pub use context::DataContext;
pub use engine::{EvaluationReport, RuleEngine, TriggerFailure};
pub use error::{Result, RuleError};
pub use executor::{ExecutionResult, RuleExecutor, matches};
pub use expression::{Comparison, Expression, Operand};
pub use operators::{LogicalOperator, Operator};
pub use quantifier::{Quantified, Quantifier, Transform};
pub use repository::{
    HistoryStore, InMemoryHistory, InMemoryRules, RuleRecord, RuleRepository, RunAlertRecord,
    RunQuery, RunRecord,
};
pub use resolver::{Resolve, resolve, resolve_or};
pub use store::{Clock, ManualClock, RuleCache, SystemClock};
pub use trigger::{ActionRegistry, FnTrigger, LogAction, Trigger, TriggerError};
pub use value::{Sequence, SequenceSource, Timestamp, Value};
