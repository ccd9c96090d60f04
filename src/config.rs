use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use crate::cli::*;

pub const DEFAULT_BINS: usize = 128;
pub const DEFAULT_HESSIAN_THRESHOLD: f64 = 300.0;
pub const DEFAULT_OCTAVES: u32 = 3;
pub const DEFAULT_OCTAVE_LAYERS: u32 = 4;
pub const DEFAULT_MATCH_RATIO: f32 = 0.6;
pub const DEFAULT_TREES: usize = 4;
pub const DEFAULT_CHECKS: i32 = 64;
pub const DEFAULT_PROBABILITY: f64 = 0.1;
pub const DEFAULT_MAX_SAMPLES: usize = 10000;
pub const DEFAULT_MAX_SPLITS: usize = 10;
pub const DEFAULT_MIN_SAMPLES: usize = 1000;
pub const DEFAULT_SEED: u64 = 42;

/// 直方图使用的通道
#[derive(ValueEnum, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelPooling {
    /// 只使用第一个通道
    #[default]
    First,
    /// 转换为灰度后统计
    Gray,
    /// 所有通道合并统计
    All,
}

#[derive(Parser, Debug, Clone)]
pub struct HistogramOptions {
    /// 直方图 bin 数量，范围 1~256
    #[arg(long, value_name = "N", default_value_t = DEFAULT_BINS)]
    pub bins: usize,
    /// 参与统计的通道
    #[arg(long = "histogram-channel", value_name = "CHANNEL", value_enum, default_value_t = ChannelPooling::First)]
    pub channel: ChannelPooling,
}

impl Default for HistogramOptions {
    fn default() -> Self {
        Self { bins: DEFAULT_BINS, channel: ChannelPooling::First }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct FeatureOptions {
    /// Hessian 响应阈值，低于该值的特征点会被丢弃
    #[arg(long, value_name = "THRESHOLD", default_value_t = DEFAULT_HESSIAN_THRESHOLD)]
    pub hessian_threshold: f64,
    /// 尺度空间的组数
    #[arg(long, value_name = "N", default_value_t = DEFAULT_OCTAVES)]
    pub octaves: u32,
    /// 每组的层数
    #[arg(long, value_name = "N", default_value_t = DEFAULT_OCTAVE_LAYERS)]
    pub octave_layers: u32,
    /// 使用 64 维描述子，默认为 128 维
    #[arg(long)]
    pub basic_descriptor: bool,
    /// 不计算特征点方向
    #[arg(long)]
    pub upright: bool,
    /// 最近邻与次近邻的比例阈值，小于该值视为匹配
    #[arg(long, value_name = "RATIO", default_value_t = DEFAULT_MATCH_RATIO)]
    pub ratio: f32,
    /// k-d 树数量
    #[arg(long, value_name = "N", default_value_t = DEFAULT_TREES)]
    pub trees: usize,
    /// 每个描述子最多检查的叶子数量，-1 表示不限制
    #[arg(long, value_name = "N", default_value_t = DEFAULT_CHECKS, allow_negative_numbers = true)]
    pub checks: i32,
}

impl Default for FeatureOptions {
    fn default() -> Self {
        Self {
            hessian_threshold: DEFAULT_HESSIAN_THRESHOLD,
            octaves: DEFAULT_OCTAVES,
            octave_layers: DEFAULT_OCTAVE_LAYERS,
            basic_descriptor: false,
            upright: false,
            ratio: DEFAULT_MATCH_RATIO,
            trees: DEFAULT_TREES,
            checks: DEFAULT_CHECKS,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SamplerOptions {
    /// 每条记录被抽样的概率
    #[arg(long, value_name = "P", default_value_t = DEFAULT_PROBABILITY)]
    pub probability: f64,
    /// 样本数量上限
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_SAMPLES)]
    pub max_samples: usize,
    /// 最少访问的分片数量
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_SPLITS)]
    pub max_splits: usize,
    /// 图片库较小时提高抽样概率，保证至少抽到这么多样本
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MIN_SAMPLES)]
    pub min_samples: usize,
    /// 随机数种子
    #[arg(long, value_name = "SEED", default_value_t = DEFAULT_SEED)]
    pub seed: u64,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            probability: DEFAULT_PROBABILITY,
            max_samples: DEFAULT_MAX_SAMPLES,
            max_splits: DEFAULT_MAX_SPLITS,
            min_samples: DEFAULT_MIN_SAMPLES,
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Json,
    #[default]
    Table,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imrank", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 计算图片库中每张图片与查询图片的距离，并输出分片排序的结果
    Rank(RankCommand),
    /// 读取排序结果
    Show(ShowCommand),
    /// 计算两张图片之间的距离
    Match(MatchCommand),
}
