//! 规则表达式树
//!
//! 表达式由比较叶子和带连接符（AND / OR）及取反标记的分组构成。
//! 组合时遵循以下约定：
//! - 空表达式是组合的单位元，与任意表达式组合得到对方本身
//! - 与当前连接符相同、未取反的子分组会被展开，避免无意义的嵌套
//! - 取反不修改原表达式，而是包一层只含一个已取反副本的 AND 分组

use crate::error::{Result, RuleError};
use crate::evaluator::compile_regex;
use crate::operators::{LogicalOperator, Operator, split_path_and_operator};
use crate::quantifier::Quantified;
use crate::resolver::DELIMITER;
use crate::value::Value;

/// 比较值
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    /// 嵌套表达式，只能配合 `r` 操作符
    Expr(Box<Expression>),
    Quantified(Box<Quantified>),
}

impl Operand {
    /// 直接或经量词包装的普通值
    fn scalar(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Quantified(q) => match &q.operand {
                Self::Value(v) => Some(v),
                _ => None,
            },
            Self::Expr(_) => None,
        }
    }

    fn is_expression(&self) -> bool {
        match self {
            Self::Expr(_) => true,
            Self::Quantified(q) => matches!(q.operand, Self::Expr(_)),
            Self::Value(_) => false,
        }
    }

    pub fn canonical(&self) -> String {
        match self {
            Self::Value(v) => v.to_string(),
            Self::Expr(e) => format!("R{}", e.canonical()),
            Self::Quantified(q) => q.canonical(),
        }
    }
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<Expression> for Operand {
    fn from(e: Expression) -> Self {
        Self::Expr(Box::new(e))
    }
}

impl From<Quantified> for Operand {
    fn from(q: Quantified) -> Self {
        Self::Quantified(Box::new(q))
    }
}

impl From<&str> for Operand {
    fn from(s: &str) -> Self {
        Self::Value(Value::from(s))
    }
}

impl From<String> for Operand {
    fn from(s: String) -> Self {
        Self::Value(Value::from(s))
    }
}

impl From<bool> for Operand {
    fn from(b: bool) -> Self {
        Self::Value(Value::Bool(b))
    }
}

impl From<i64> for Operand {
    fn from(i: i64) -> Self {
        Self::Value(Value::Int(i))
    }
}

impl From<i32> for Operand {
    fn from(i: i32) -> Self {
        Self::Value(Value::from(i))
    }
}

impl From<f64> for Operand {
    fn from(f: f64) -> Self {
        Self::Value(Value::Float(f))
    }
}

impl From<Vec<Value>> for Operand {
    fn from(items: Vec<Value>) -> Self {
        Self::Value(Value::List(items))
    }
}

/// 比较叶子：`路径__操作符 = 比较值`
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    lookup: String,
    path: Vec<String>,
    operator: Operator,
    operand: Operand,
}

impl Comparison {
    /// 构造比较叶子
    ///
    /// 不含分隔符的单个属性名默认使用 `exact`。操作符、正则和
    /// 比较值的形状在这里校验，求值阶段不会再因此出错。
    pub fn new(path_op: &str, operand: impl Into<Operand>) -> Result<Self> {
        if path_op.is_empty() {
            return Err(RuleError::EmptyPath);
        }
        let lookup = if path_op.contains(DELIMITER) {
            path_op.to_string()
        } else {
            format!("{path_op}{DELIMITER}{}", Operator::Exact)
        };

        let (path, operator) = split_path_and_operator(&lookup)?;
        let operand = operand.into();
        validate_operand(&lookup, operator, &operand)?;

        Ok(Self {
            lookup,
            path,
            operator,
            operand,
        })
    }

    /// 规范化后的 `路径__操作符`
    pub fn lookup(&self) -> &str {
        &self.lookup
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    pub fn canonical(&self) -> String {
        format!("{}={}", self.lookup, self.operand.canonical())
    }
}

fn validate_operand(lookup: &str, operator: Operator, operand: &Operand) -> Result<()> {
    if let Operand::Quantified(q) = operand
        && matches!(q.operand, Operand::Quantified(_))
    {
        return Err(RuleError::type_mismatch("value or expression", "quantifier"));
    }

    match (operator, operand.is_expression()) {
        (Operator::R, false) => {
            return Err(RuleError::type_mismatch(
                "expression",
                operand.scalar().map_or("quantifier", Value::type_name),
            ));
        }
        (op, true) if op != Operator::R => {
            return Err(RuleError::InvalidOperator {
                path: lookup.to_string(),
                operator: op.to_string(),
            });
        }
        _ => {}
    }

    match (operator, operand.scalar()) {
        (Operator::Regex | Operator::IRegex, Some(Value::Str(pattern))) => {
            compile_regex(pattern, operator == Operator::IRegex)?;
        }
        (Operator::Regex | Operator::IRegex, Some(other)) => {
            return Err(RuleError::type_mismatch("regex pattern", other.type_name()));
        }
        (Operator::Range, Some(Value::List(bounds))) if bounds.len() == 2 => {}
        (Operator::Range, Some(other)) => {
            return Err(RuleError::type_mismatch("list [low, high]", other.type_name()));
        }
        _ => {}
    }
    Ok(())
}

/// 表达式树节点
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Comparison),
    Group(Expression),
}

/// 表达式（分组）
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    children: Vec<Node>,
    connector: LogicalOperator,
    negated: bool,
}

impl Default for Expression {
    fn default() -> Self {
        Self::empty()
    }
}

impl Expression {
    /// 指定连接符的空分组
    pub fn new(connector: LogicalOperator) -> Self {
        Self {
            children: Vec::new(),
            connector,
            negated: false,
        }
    }

    /// 空表达式，单独求值时不匹配任何实例
    pub fn empty() -> Self {
        Self::new(LogicalOperator::And)
    }

    /// 单个比较
    pub fn leaf(path_op: &str, operand: impl Into<Operand>) -> Result<Self> {
        Ok(Self::from(Comparison::new(path_op, operand)?))
    }

    /// 多个比较的 AND，按查找路径排序
    pub fn all_of<'a, I>(comparisons: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, Operand)>,
    {
        let mut leaves = comparisons
            .into_iter()
            .map(|(path_op, operand)| Comparison::new(path_op, operand))
            .collect::<Result<Vec<_>>>()?;
        leaves.sort_by(|a, b| a.lookup.cmp(&b.lookup));

        Ok(Self {
            children: leaves.into_iter().map(Node::Leaf).collect(),
            connector: LogicalOperator::And,
            negated: false,
        })
    }

    /// 依次 AND 组合，空输入得到空表达式
    pub fn conjunction(exprs: impl IntoIterator<Item = Expression>) -> Self {
        exprs.into_iter().fold(Self::empty(), |acc, e| acc.and(&e))
    }

    /// 依次 OR 组合，空输入得到空表达式
    pub fn disjunction(exprs: impl IntoIterator<Item = Expression>) -> Self {
        exprs.into_iter().fold(Self::empty(), |acc, e| acc.or(&e))
    }

    pub fn and(&self, other: &Expression) -> Self {
        self.combine(other, LogicalOperator::And)
    }

    pub fn or(&self, other: &Expression) -> Self {
        self.combine(other, LogicalOperator::Or)
    }

    /// 取反，原表达式不变
    pub fn not(&self) -> Self {
        let mut inner = self.clone();
        inner.negated = !inner.negated;
        Self {
            children: vec![Node::Group(inner)],
            connector: LogicalOperator::And,
            negated: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn connector(&self) -> LogicalOperator {
        self.connector
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    fn combine(&self, other: &Expression, connector: LogicalOperator) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }

        let mut combined = Self::new(connector);
        combined.add(Node::Group(self.clone()), connector);
        combined.add(Node::Group(other.clone()), connector);
        combined
    }

    /// 追加子节点
    ///
    /// 连接符不同时先把自身整体下沉为一个子分组；
    /// 可展开的子分组直接并入当前子节点列表
    fn add(&mut self, node: Node, connector: LogicalOperator) {
        if self.connector != connector {
            let previous = std::mem::replace(self, Self::new(connector));
            self.children = vec![Node::Group(previous), node];
            return;
        }

        match node {
            Node::Group(group)
                if !group.negated
                    && (group.connector == connector || group.children.len() == 1) =>
            {
                self.children.extend(group.children);
            }
            other => self.children.push(other),
        }
    }

    /// 规范化文本形式
    ///
    /// 子节点排序，可展开的分组展开，语义相同的表达式得到相同文本
    pub fn canonical(&self) -> String {
        let mut parts = Vec::new();
        for child in &self.children {
            flatten_canonical(child, self.connector, &mut parts);
        }
        parts.sort();

        let body = match parts.len() {
            0 => "EMPTY".to_string(),
            1 => parts.remove(0),
            _ => format!("({}: {})", self.connector, parts.join(", ")),
        };
        if self.negated {
            format!("NOT {body}")
        } else {
            body
        }
    }
}

fn flatten_canonical(node: &Node, connector: LogicalOperator, parts: &mut Vec<String>) {
    match node {
        Node::Leaf(comparison) => parts.push(comparison.canonical()),
        Node::Group(group)
            if !group.negated && (group.connector == connector || group.children.len() == 1) =>
        {
            for child in &group.children {
                flatten_canonical(child, connector, parts);
            }
        }
        Node::Group(group) => parts.push(group.canonical()),
    }
}

impl From<Comparison> for Expression {
    fn from(comparison: Comparison) -> Self {
        Self {
            children: vec![Node::Leaf(comparison)],
            connector: LogicalOperator::And,
            negated: false,
        }
    }
}
