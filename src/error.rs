use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 单条记录解码失败，记录会被跳过
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("无效的元数据字段: {0:?}")]
    Metadata(String),
    #[error("缺少元数据字段: {0}")]
    MissingField(&'static str),
    #[error("元数据字段 {field} 的值无效: {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("不支持的位深: {0}")]
    UnsupportedDepth(u32),
    #[error("图片尺寸过大: {width}x{height}x{channels}")]
    Geometry { width: usize, height: usize, channels: usize },
    #[error("数据长度不匹配: 期望 {expected} 字节，实际 {actual} 字节")]
    PayloadLength { expected: usize, actual: usize },
    #[error("图片解码失败: {0}")]
    Codec(#[from] image::ImageError),
}

/// 单条记录的相似度计算失败，记录会被跳过
#[derive(Error, Debug)]
pub enum MetricError {
    #[error("图片为空: {width}x{height}")]
    EmptyImage { width: usize, height: usize },
    #[error("距离不是有限值: {0}")]
    NonFinite(f64),
    #[error("特征提取失败: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// 单条记录级别的错误，只计数，不会中断任务
#[derive(Error, Debug)]
pub enum RecordError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Metric(#[from] MetricError),
}

/// 任务级别的错误
#[derive(Error, Debug)]
pub enum RankError {
    /// 参数错误，任务不会开始
    #[error("参数错误: {0}")]
    Validation(String),
    /// 系统性错误，任务立即中止
    #[error(transparent)]
    Systemic(#[from] SystemicError),
}

#[derive(Error, Debug)]
pub enum SystemicError {
    #[error("无法读取查询图片 {path}: {source}")]
    Query { path: PathBuf, source: image::ImageError },
    #[error("无法处理查询图片: {0}")]
    QueryMetric(MetricError),
    #[error("无法读取图片库 {path}: {source}")]
    Corpus { path: PathBuf, source: io::Error },
    #[error("图片库格式错误 {path}: {reason}")]
    CorpusFormat { path: PathBuf, reason: String },
    #[error("分区文件不可用 {path}: {reason}")]
    Artifact { path: PathBuf, reason: String },
    #[error("无法写入结果 {path}: {source}")]
    Output { path: PathBuf, source: io::Error },
}

impl RecordError {
    /// 用于统计的错误类别
    pub fn kind(&self) -> FailureKind {
        match self {
            RecordError::Decode(_) => FailureKind::Decode,
            RecordError::Metric(_) => FailureKind::Metric,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Decode,
    Metric,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Decode => "decode",
            FailureKind::Metric => "metric",
        }
    }
}

impl RankError {
    pub fn validation(msg: impl Into<String>) -> Self {
        RankError::Validation(msg.into())
    }
}
