use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{FeatureOptions, HistogramOptions, Opts};
use crate::metric::{MetricConfig, MetricKind};
use crate::pixel::PixelBuffer;

#[derive(Parser, Debug, Clone)]
pub struct MatchCommand {
    #[command(flatten)]
    pub histogram: HistogramOptions,
    #[command(flatten)]
    pub feature: FeatureOptions,
    /// 相似度算法
    #[arg(short, long, value_enum, default_value_t = MetricKind::Histogram)]
    pub metric: MetricKind,
    /// 图片1
    pub image1: PathBuf,
    /// 图片2
    pub image2: PathBuf,
}

impl SubCommandExtend for MatchCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let config = MetricConfig {
            kind: self.metric,
            histogram: self.histogram.clone(),
            feature: self.feature.clone(),
        };
        let distance = block_in_place(|| -> Result<f64> {
            let a = PixelBuffer::open(&self.image1)
                .with_context(|| format!("无法读取 {}", self.image1.display()))?;
            let b = PixelBuffer::open(&self.image2)
                .with_context(|| format!("无法读取 {}", self.image2.display()))?;
            Ok(config.build().compute_distance(&a, &b)?)
        })?;
        println!("{:.4}", distance);
        Ok(())
    }
}
