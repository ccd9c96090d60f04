mod feature;
mod histogram;

use std::fmt;

use clap::ValueEnum;
use serde::Serialize;

pub use feature::*;
pub use histogram::*;

use crate::config::{FeatureOptions, HistogramOptions};
use crate::error::MetricError;
use crate::pixel::PixelBuffer;

/// 两张图片之间的距离，0 表示相同，1 表示完全无关
pub trait SimilarityMetric: Send + Sync {
    /// 计算 `a` 与 `b` 的距离，不会修改输入
    fn compute_distance(&self, a: &PixelBuffer, b: &PixelBuffer) -> Result<f64, MetricError>;

    /// 预处理查询图片，之后每次打分只需要处理待比较的图片
    ///
    /// 默认实现保存一份查询图片，每次调用 `compute_distance`。
    fn prepare<'a>(&'a self, query: &PixelBuffer) -> Result<Box<dyn QueryScorer + 'a>, MetricError> {
        Ok(Box::new(PlainScorer { metric: self, query: query.clone() }))
    }

    fn name(&self) -> &'static str;
}

/// 绑定了查询图片的打分器，只读，可以在多个线程间共享
pub trait QueryScorer: Send + Sync {
    fn score(&self, image: &PixelBuffer) -> Result<f64, MetricError>;
}

struct PlainScorer<'a, M: ?Sized> {
    metric: &'a M,
    query: PixelBuffer,
}

impl<M: SimilarityMetric + ?Sized> QueryScorer for PlainScorer<'_, M> {
    fn score(&self, image: &PixelBuffer) -> Result<f64, MetricError> {
        self.metric.compute_distance(image, &self.query)
    }
}

/// 相似度算法
#[derive(ValueEnum, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// 强度直方图交集
    #[value(alias = "hist")]
    Histogram,
    /// 局部特征点匹配
    #[value(alias = "surf")]
    Feature,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Histogram => f.write_str("histogram"),
            MetricKind::Feature => f.write_str("feature"),
        }
    }
}

/// 任务使用的相似度配置，创建后不再修改
#[derive(Debug, Clone)]
pub struct MetricConfig {
    pub kind: MetricKind,
    pub histogram: HistogramOptions,
    pub feature: FeatureOptions,
}

impl MetricConfig {
    pub fn build(&self) -> Box<dyn SimilarityMetric> {
        match self.kind {
            MetricKind::Histogram => Box::new(HistogramSimilarity::new(self.histogram.clone())),
            MetricKind::Feature => Box::new(FeatureMatchSimilarity::new(self.feature.clone())),
        }
    }
}

/// 将距离限制到 [0, 1]，非有限值视为计算失败
pub(crate) fn clamp_distance(distance: f64) -> Result<f64, MetricError> {
    if !distance.is_finite() {
        return Err(MetricError::NonFinite(distance));
    }
    Ok(distance.clamp(0.0, 1.0))
}
