//! 指标描述模块
//!
//! 基于 metrics 门面 crate 定义规则引擎使用的指标名称，并注册 HELP 描述。
//! 未安装 recorder 时所有记录操作都是空操作。

/// 规则评估次数（每条候选规则计一次）
pub const RULE_EVALUATIONS_TOTAL: &str = "rule_evaluations_total";
/// 规则匹配次数
pub const RULE_MATCHES_TOTAL: &str = "rule_matches_total";
/// 触发器执行失败次数
pub const RULE_TRIGGER_FAILURES_TOTAL: &str = "rule_trigger_failures_total";
/// 规则编译失败次数（缓存刷新时被跳过的规则）
pub const RULE_COMPILE_FAILURES_TOTAL: &str = "rule_compile_failures_total";
/// 编译规则缓存刷新次数
pub const RULE_CACHE_REFRESH_TOTAL: &str = "rule_cache_refresh_total";

/// 注册规则引擎指标描述
///
/// 这些描述会出现在导出端点的 HELP 注释中
pub fn describe_metrics() {
    metrics::describe_counter!(
        RULE_EVALUATIONS_TOTAL,
        "Total number of rule evaluations against events"
    );
    metrics::describe_counter!(RULE_MATCHES_TOTAL, "Total number of rule matches");
    metrics::describe_counter!(
        RULE_TRIGGER_FAILURES_TOTAL,
        "Total number of failed trigger invocations"
    );
    metrics::describe_counter!(
        RULE_COMPILE_FAILURES_TOTAL,
        "Total number of rule records skipped because they failed to compile"
    );
    metrics::describe_counter!(
        RULE_CACHE_REFRESH_TOTAL,
        "Total number of compiled rule cache refreshes"
    );
}
