//! 规则编译器
//!
//! 按 schema 版本把持久化的规则数据编译成表达式树，并根据动作名称
//! 构造触发器。编译结果与规则定义一起组成可直接求值的 [`CompiledRule`]。

use crate::error::{Result, RuleError};
use crate::expression::Expression;
use crate::repository::RuleRecord;
use crate::schema::SimpleV1Compiler;
use crate::trigger::{ActionRegistry, Trigger};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// 某个 schema 版本的编译器
pub trait SchemaCompiler: Send + Sync {
    fn version(&self) -> &'static str;

    /// 校验并编译规则数据，出错时返回 `InvalidRuleData`
    fn compile(&self, data: &serde_json::Value) -> Result<Expression>;
}

/// schema 版本注册表
#[derive(Clone)]
pub struct CompilerRegistry {
    compilers: HashMap<&'static str, Arc<dyn SchemaCompiler>>,
}

impl Default for CompilerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(SimpleV1Compiler);
        registry
    }
}

impl CompilerRegistry {
    /// 不含任何版本的注册表
    pub fn empty() -> Self {
        Self {
            compilers: HashMap::new(),
        }
    }

    pub fn register(&mut self, compiler: impl SchemaCompiler + 'static) {
        self.compilers.insert(compiler.version(), Arc::new(compiler));
    }

    /// 已注册的版本，按名称排序
    pub fn versions(&self) -> Vec<&'static str> {
        let mut versions: Vec<_> = self.compilers.keys().copied().collect();
        versions.sort_unstable();
        versions
    }

    pub fn compile(&self, version: &str, data: &serde_json::Value) -> Result<Expression> {
        let compiler = self
            .compilers
            .get(version)
            .ok_or_else(|| RuleError::UnknownSchemaVersion(version.to_string()))?;
        compiler.compile(data)
    }
}

impl fmt::Debug for CompilerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerRegistry")
            .field("versions", &self.versions())
            .finish()
    }
}

/// 使用内置注册表编译规则数据
pub fn compile(version: &str, data: &serde_json::Value) -> Result<Expression> {
    CompilerRegistry::default().compile(version, data)
}

/// 编译后的规则
#[derive(Clone)]
pub struct CompiledRule {
    pub expression: Expression,
    /// 原始规则定义，触发器执行时传入
    pub rule: Arc<RuleRecord>,
    pub triggers: Vec<Arc<dyn Trigger>>,
}

impl CompiledRule {
    /// 获取规则 ID
    pub fn id(&self) -> Uuid {
        self.rule.id
    }

    pub fn journey_id(&self) -> Uuid {
        self.rule.journey_id
    }

    /// 绑定的组件，为空表示不限组件
    pub fn component_id(&self) -> Option<Uuid> {
        self.rule.component_id
    }
}

impl fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let triggers: Vec<&str> = self.triggers.iter().map(|t| t.name()).collect();
        f.debug_struct("CompiledRule")
            .field("id", &self.rule.id)
            .field("journey_id", &self.rule.journey_id)
            .field("component_id", &self.rule.component_id)
            .field("expression", &self.expression.canonical())
            .field("triggers", &triggers)
            .finish()
    }
}

/// 规则编译器
#[derive(Debug, Clone)]
pub struct RuleCompiler {
    schemas: CompilerRegistry,
    actions: ActionRegistry,
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleCompiler {
    /// 内置 schema 和内置动作
    pub fn new() -> Self {
        Self::with_registries(CompilerRegistry::default(), ActionRegistry::with_defaults())
    }

    pub fn with_registries(schemas: CompilerRegistry, actions: ActionRegistry) -> Self {
        Self { schemas, actions }
    }

    pub fn actions_mut(&mut self) -> &mut ActionRegistry {
        &mut self.actions
    }

    pub fn schemas_mut(&mut self) -> &mut CompilerRegistry {
        &mut self.schemas
    }

    /// 编译单条规则
    pub fn compile(&self, record: &RuleRecord) -> Result<CompiledRule> {
        let expression = self.schemas.compile(&record.schema_version, &record.rule_data)?;
        let triggers = self.actions.build(&record.action_name, &record.action_args)?;

        Ok(CompiledRule {
            expression,
            rule: Arc::new(record.clone()),
            triggers,
        })
    }

    /// 批量编译，失败的规则单独返回，不影响其他规则
    pub fn compile_batch(
        &self,
        records: &[RuleRecord],
    ) -> (Vec<CompiledRule>, Vec<(Uuid, RuleError)>) {
        let mut compiled = Vec::with_capacity(records.len());
        let mut errors = Vec::new();

        for record in records {
            match self.compile(record) {
                Ok(rule) => compiled.push(rule),
                Err(e) => errors.push((record.id, e)),
            }
        }

        (compiled, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SIMPLE_V1;
    use serde_json::json;

    fn record(data: serde_json::Value) -> RuleRecord {
        RuleRecord::new(Uuid::new_v4(), SIMPLE_V1, data, "LOG")
    }

    struct ConstCompiler;

    impl SchemaCompiler for ConstCompiler {
        fn version(&self) -> &'static str {
            "const_v1"
        }

        fn compile(&self, _data: &serde_json::Value) -> Result<Expression> {
            Expression::leaf("status", "FAILED")
        }
    }

    #[test]
    fn test_compile_entry_point() {
        let expr = compile(
            SIMPLE_V1,
            &json!({"when": "all", "conditions": [{"task_status": {"matches": "FAILED"}}]}),
        )
        .unwrap();
        assert!(!expr.is_empty());

        assert!(matches!(
            compile("simple_v2", &json!({})),
            Err(RuleError::UnknownSchemaVersion(v)) if v == "simple_v2"
        ));
    }

    #[test]
    fn test_registry_accepts_new_versions() {
        let mut registry = CompilerRegistry::default();
        registry.register(ConstCompiler);
        assert_eq!(registry.versions(), vec!["const_v1", SIMPLE_V1]);
        assert!(registry.compile("const_v1", &json!(null)).is_ok());
        assert!(CompilerRegistry::empty().compile(SIMPLE_V1, &json!({})).is_err());
    }

    #[test]
    fn test_compile_rule_with_action() {
        let compiler = RuleCompiler::new();
        let rule = record(json!({"when": "any", "conditions": [{"run_state": {"matches": "FAILED"}}]}));

        let compiled = compiler.compile(&rule).unwrap();
        assert_eq!(compiled.id(), rule.id);
        assert_eq!(compiled.journey_id(), rule.journey_id);
        assert_eq!(compiled.component_id(), None);
        assert_eq!(compiled.triggers.len(), 1);
    }

    #[test]
    fn test_compile_batch_isolates_failures() {
        let compiler = RuleCompiler::new();
        let good = record(json!({"when": "any", "conditions": [{"run_state": {"matches": "FAILED"}}]}));
        let bad_data = record(json!({"when": "any", "conditions": []}));
        let mut bad_action = good.clone();
        bad_action.id = Uuid::new_v4();
        bad_action.action_name = "PAGE_ONCALL".into();

        let (compiled, errors) = compiler.compile_batch(&[good.clone(), bad_data.clone(), bad_action.clone()]);
        assert_eq!(compiled.len(), 1);
        assert_eq!(compiled[0].id(), good.id);
        assert_eq!(errors.len(), 2);
        assert!(matches!(&errors[0], (id, RuleError::InvalidRuleData { .. }) if *id == bad_data.id));
        assert!(matches!(&errors[1], (id, RuleError::UnknownAction(_)) if *id == bad_action.id));
    }
}
