use crate::config::{ChannelPooling, HistogramOptions};
use crate::error::MetricError;
use crate::metric::{QueryScorer, SimilarityMetric, clamp_distance};
use crate::pixel::PixelBuffer;

/// 基于强度直方图交集的相似度
pub struct HistogramSimilarity {
    opts: HistogramOptions,
}

impl HistogramSimilarity {
    pub fn new(opts: HistogramOptions) -> Self {
        Self { opts }
    }

    fn counts(&self, image: &PixelBuffer) -> Result<Counts, MetricError> {
        if image.channels() == 0 {
            return Err(MetricError::EmptyImage { width: image.width(), height: image.height() });
        }

        let bins = self.opts.bins;
        let mut counts = vec![0u64; bins];
        let mut add = |v: f32| {
            let bin = (v as f64 * bins as f64 / 256.0) as usize;
            counts[bin.min(bins - 1)] += 1;
        };

        match self.opts.channel {
            ChannelPooling::First => image.plane(0).for_each(&mut add),
            ChannelPooling::All => image.samples().for_each(&mut add),
            ChannelPooling::Gray => image.to_gray().iter().for_each(|&v| add(v)),
        }

        let total = counts.iter().sum();
        Ok(Counts { counts, total })
    }

    /// 计算 L1 归一化后的直方图，范围固定为 0~255
    ///
    /// 没有任何像素的图片返回 `None`
    pub fn histogram(&self, image: &PixelBuffer) -> Option<Vec<f64>> {
        let counts = self.counts(image).ok()?;
        if counts.total == 0 {
            return None;
        }
        Some(counts.counts.iter().map(|&c| c as f64 / counts.total as f64).collect())
    }
}

/// 直方图的原始计数
struct Counts {
    counts: Vec<u64>,
    total: u64,
}

impl Counts {
    /// 归一化直方图的交集转换为距离
    ///
    /// min(a/ta, b/tb) = min(a*tb, b*ta) / (ta*tb)，先在整数上累加再做一次除法，
    /// 这样同一张图片的距离严格为 0
    fn distance(&self, other: &Counts) -> Result<f64, MetricError> {
        // 空图片没有可比较的内容，视为完全无关
        if self.total == 0 || other.total == 0 {
            return Ok(1.0);
        }
        let (ta, tb) = (self.total as u128, other.total as u128);
        let shared = self
            .counts
            .iter()
            .zip(&other.counts)
            .map(|(&a, &b)| (a as u128 * tb).min(b as u128 * ta))
            .sum::<u128>();
        let intersection = shared as f64 / (ta * tb) as f64;
        clamp_distance((1.0 - intersection).max(0.0))
    }
}

impl SimilarityMetric for HistogramSimilarity {
    fn compute_distance(&self, a: &PixelBuffer, b: &PixelBuffer) -> Result<f64, MetricError> {
        self.counts(a)?.distance(&self.counts(b)?)
    }

    fn prepare<'a>(&'a self, query: &PixelBuffer) -> Result<Box<dyn QueryScorer + 'a>, MetricError> {
        let query = self.counts(query)?;
        Ok(Box::new(HistogramScorer { metric: self, query }))
    }

    fn name(&self) -> &'static str {
        "histogram"
    }
}

struct HistogramScorer<'a> {
    metric: &'a HistogramSimilarity,
    query: Counts,
}

impl QueryScorer for HistogramScorer<'_> {
    fn score(&self, image: &PixelBuffer) -> Result<f64, MetricError> {
        self.metric.counts(image)?.distance(&self.query)
    }
}
