use std::sync::LazyLock;

use prometheus::*;

static METRIC_RECORD_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "imrank_record_count",
        "count of the processed records by outcome",
        &["metric", "outcome"]
    )
    .unwrap()
});

static METRIC_SCORE_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "imrank_score_duration",
        "duration of the per-record decode and scoring in seconds",
        &["metric"]
    )
    .unwrap()
});

static METRIC_SHARD_SIZE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!("imrank_shard_size", "number of records in each result shard", &[
        "shard"
    ])
    .unwrap()
});

/// 增加记录计数，`outcome` 为 scored 或者失败类别
pub fn inc_record_count(metric: &str, outcome: &str) {
    METRIC_RECORD_COUNT.with_label_values(&[metric, outcome]).inc();
}

pub fn observe_score_duration(metric: &str, duration: f64) {
    METRIC_SCORE_DURATION.with_label_values(&[metric]).observe(duration);
}

pub fn set_shard_size(shard: usize, size: usize) {
    METRIC_SHARD_SIZE.with_label_values(&[&shard.to_string()]).set(size as i64);
}

/// 以文本格式导出当前进程的所有指标
pub fn gather_text() -> Result<String> {
    let mut buf = String::new();
    TextEncoder::new().encode_utf8(&gather(), &mut buf)?;
    Ok(buf)
}
