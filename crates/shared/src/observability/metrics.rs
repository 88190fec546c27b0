//! 指标模块
//!
//! 基于 metrics crate 记录业务指标，指标名称集中定义在这里。
//! 启用时安装 Prometheus recorder，通过 [`get_handle`] 渲染快照；未安装时记录为空操作。

use anyhow::{Result, anyhow};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// 全局 Prometheus handle；None 表示进程内已有其他 recorder
static PROMETHEUS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// 安装 Prometheus recorder
///
/// 进程内只安装一次，重复调用返回同一个 handle。
pub fn install_recorder() -> Result<PrometheusHandle> {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder).ok().map(|()| handle)
        })
        .clone()
        .ok_or_else(|| anyhow!("a different metrics recorder is already installed"))
}

/// 获取全局 Prometheus handle（用于渲染指标快照）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get().and_then(Option::as_ref)
}

/// 过滤表达式评估次数
pub const FILTER_EVALUATIONS_TOTAL: &str = "gate_filter_evaluations_total";
/// 过滤表达式评估耗时
pub const FILTER_EVALUATION_DURATION_SECONDS: &str = "gate_filter_evaluation_duration_seconds";
/// 投递资格检查次数（按规则类型与结果）
pub const ELIGIBILITY_CHECKS_TOTAL: &str = "gate_eligibility_checks_total";
/// 投递资格冲突次数（按规则类型）
pub const ELIGIBILITY_CONFLICTS_TOTAL: &str = "gate_eligibility_conflicts_total";
/// 写入的缓存条目数
pub const CACHE_ENTRIES_SAVED_TOTAL: &str = "gate_cache_entries_saved_total";
/// 历史存储调用超时次数
pub const STORE_TIMEOUTS_TOTAL: &str = "gate_store_timeouts_total";

/// 注册指标描述
///
/// 这些描述会出现在导出端的 HELP 注释中
pub fn describe_metrics(service_name: &str) {
    metrics::describe_counter!(FILTER_EVALUATIONS_TOTAL, "Total number of filter evaluations");
    metrics::describe_histogram!(
        FILTER_EVALUATION_DURATION_SECONDS,
        "Filter evaluation duration in seconds"
    );
    metrics::describe_counter!(
        ELIGIBILITY_CHECKS_TOTAL,
        "Total number of eligibility checks by rule type and outcome"
    );
    metrics::describe_counter!(
        ELIGIBILITY_CONFLICTS_TOTAL,
        "Total number of eligibility conflicts by rule type"
    );
    metrics::describe_counter!(CACHE_ENTRIES_SAVED_TOTAL, "Total number of cache entries saved");
    metrics::describe_counter!(STORE_TIMEOUTS_TOTAL, "Total number of historical store timeouts");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 记录过滤表达式评估
#[inline]
pub fn record_filter_evaluation(matched: bool, duration_secs: f64) {
    metrics::counter!(
        FILTER_EVALUATIONS_TOTAL,
        "matched" => matched.to_string()
    )
    .increment(1);

    metrics::histogram!(FILTER_EVALUATION_DURATION_SECONDS).record(duration_secs);
}

/// 记录一次资格检查结果
///
/// outcome 取值：eligible / conflict / skipped / error
#[inline]
pub fn record_eligibility_check(rule_type: &str, outcome: &str) {
    metrics::counter!(
        ELIGIBILITY_CHECKS_TOTAL,
        "rule_type" => rule_type.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    if outcome == "conflict" {
        metrics::counter!(
            ELIGIBILITY_CONFLICTS_TOTAL,
            "rule_type" => rule_type.to_string()
        )
        .increment(1);
    }
}

/// 记录缓存条目写入
#[inline]
pub fn record_cache_entries_saved(count: usize) {
    metrics::counter!(CACHE_ENTRIES_SAVED_TOTAL).increment(count as u64);
}

/// 记录历史存储超时
#[inline]
pub fn record_store_timeout(operation: &str) {
    metrics::counter!(
        STORE_TIMEOUTS_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}
