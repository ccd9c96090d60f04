use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::task::spawn_blocking;

use crate::cli::SubCommandExtend;
use crate::config::{FeatureOptions, HistogramOptions, Opts, OutputFormat, SamplerOptions};
use crate::metric::{MetricConfig, MetricKind};
use crate::pipeline::{JobReport, RankingConfig, RankingPipeline};
use crate::utils::print_pairs;

#[derive(Parser, Debug, Clone)]
pub struct RankCommand {
    #[command(flatten)]
    pub histogram: HistogramOptions,
    #[command(flatten)]
    pub feature: FeatureOptions,
    #[command(flatten)]
    pub sampler: SamplerOptions,
    /// 图片库文件，或者包含 .imsq 文件的目录
    #[arg(short, long, value_name = "PATH")]
    pub input: PathBuf,
    /// 查询图片路径
    #[arg(short, long, value_name = "IMAGE")]
    pub query: PathBuf,
    /// 结果目录
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,
    /// 分区文件目录，默认与结果目录相同
    #[arg(short, long, value_name = "DIR")]
    pub partition_dir: Option<PathBuf>,
    /// 分区文件已存在时跳过抽样
    #[arg(long)]
    pub reuse_partition: bool,
    /// 相似度算法
    #[arg(short, long, value_enum, default_value_t = MetricKind::Histogram)]
    pub metric: MetricKind,
    /// 结果分片数量，小于 2 时使用 2
    #[arg(short = 'r', long, value_name = "N", default_value_t = 4)]
    pub shards: usize,
    /// 工作线程数量，默认为 CPU 核心数
    #[arg(short = 'j', long, value_name = "N")]
    pub threads: Option<usize>,
    /// 不显示进度条
    #[arg(long)]
    pub quiet: bool,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

impl RankCommand {
    pub fn ranking_config(&self) -> RankingConfig {
        let metric = MetricConfig {
            kind: self.metric,
            histogram: self.histogram.clone(),
            feature: self.feature.clone(),
        };
        let mut config = RankingConfig::new(&self.input, &self.query, &self.output, metric);
        config.partition_dir = self.partition_dir.clone();
        config.reuse_partition = self.reuse_partition;
        config.shards = self.shards;
        config.sampler = self.sampler.clone();
        config.workers = self.threads.unwrap_or_else(num_cpus::get);
        config.progress = !self.quiet;
        config
    }
}

impl SubCommandExtend for RankCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let config = self.ranking_config();
        let report = spawn_blocking(move || RankingPipeline::new(config)?.run()).await??;
        print_report(&report, self.format)
    }
}

fn print_report(report: &JobReport, format: OutputFormat) -> Result<()> {
    let pairs = [
        ("metric", report.metric.to_string()),
        ("total", report.total.to_string()),
        ("scored", report.scored.to_string()),
        ("skipped_decode", report.skipped.decode.to_string()),
        ("skipped_metric", report.skipped.metric.to_string()),
        ("sample_size", report.sample_size.to_string()),
        ("boundaries", format!("{:?}", report.boundaries)),
        ("shard_sizes", format!("{:?}", report.shard_sizes)),
        ("output", report.output.display().to_string()),
        ("elapsed", format!("{:.2}s", report.elapsed)),
        ("success", report.success.to_string()),
    ];
    print_pairs(report, &pairs, format)
}
