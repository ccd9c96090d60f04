//! 按距离范围分片
//!
//! 抽样得到的距离排序后取 R-1 个分位点作为边界，每个分片只包含一段距离，
//! 各分片分别排序后按编号拼接即为全局有序。

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::SystemicError;

/// 分区文件名
pub const PARTITION_FILE: &str = "_partition.lst";

/// 至少两个分片
pub fn normalize_shards(requested: usize) -> usize {
    if requested < 2 {
        warn!("分片数量 {} 过小，使用 2", requested);
        2
    } else {
        requested
    }
}

/// R-1 个单调不减的边界
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionBoundary {
    shards: usize,
    boundaries: Vec<f64>,
}

impl PartitionBoundary {
    pub fn new(shards: usize, boundaries: Vec<f64>) -> Result<Self, String> {
        if shards < 2 {
            return Err(format!("分片数量必须至少为 2，实际为 {}", shards));
        }
        if boundaries.len() != shards - 1 {
            return Err(format!("需要 {} 个边界，实际为 {}", shards - 1, boundaries.len()));
        }
        if boundaries.iter().any(|b| !b.is_finite()) {
            return Err("边界必须是有限值".to_string());
        }
        if boundaries.windows(2).any(|w| w[0] > w[1]) {
            return Err("边界必须单调不减".to_string());
        }
        Ok(Self { shards, boundaries })
    }

    /// 从抽样结果计算边界，`samples` 会被排序
    ///
    /// 样本为空时退化为 [0, 1] 上的等分点
    pub fn from_sample(samples: &mut [f64], shards: usize) -> Self {
        let shards = shards.max(2);
        if samples.is_empty() {
            warn!("抽样结果为空，使用均匀分布的边界");
            return Self::uniform(shards);
        }
        samples.sort_by(f64::total_cmp);

        let n = samples.len();
        let step = n as f64 / shards as f64;
        let mut boundaries = Vec::with_capacity(shards - 1);
        let mut last: Option<usize> = None;
        for i in 1..shards {
            let mut k = ((step * i as f64) + 0.5).floor() as usize;
            // 尽量避开与上一个边界相同的值
            if let Some(last) = last {
                while last >= k && samples[last] == samples[k.min(n - 1)] && k < n - 1 {
                    k += 1;
                }
            }
            let k = k.min(n - 1);
            boundaries.push(samples[k]);
            last = Some(k);
        }
        Self { shards, boundaries }
    }

    pub fn uniform(shards: usize) -> Self {
        let shards = shards.max(2);
        let boundaries = (1..shards).map(|i| i as f64 / shards as f64).collect();
        Self { shards, boundaries }
    }

    pub fn shards(&self) -> usize {
        self.shards
    }

    pub fn boundaries(&self) -> &[f64] {
        &self.boundaries
    }

    /// 距离所属的分片编号，大于最后一个边界的距离落入最后一个分片
    pub fn assign(&self, score: f64) -> usize {
        self.boundaries.partition_point(|&b| b <= score)
    }
}

/// 抽样阶段输出的分区文件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionFile {
    pub shards: usize,
    pub sample_size: usize,
    pub boundaries: Vec<f64>,
}

impl PartitionFile {
    pub fn new(boundary: &PartitionBoundary, sample_size: usize) -> Self {
        Self { shards: boundary.shards, sample_size, boundaries: boundary.boundaries.clone() }
    }

    pub fn path(dir: impl AsRef<Path>) -> PathBuf {
        dir.as_ref().join(PARTITION_FILE)
    }

    /// 先写入临时文件再重命名，失败时不会留下不完整的分区文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SystemicError> {
        let path = path.as_ref();
        let err = |reason: String| SystemicError::Artifact { path: path.to_path_buf(), reason };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| err(e.to_string()))?;
        }
        let tmp = path.with_extension("tmp");
        let mut w = BufWriter::new(File::create(&tmp).map_err(|e| err(e.to_string()))?);
        bincode::serialize_into(&mut w, self).map_err(|e| err(e.to_string()))?;
        w.flush().map_err(|e| err(e.to_string()))?;
        drop(w);
        fs::rename(&tmp, path).map_err(|e| err(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SystemicError> {
        let path = path.as_ref();
        let err = |reason: String| SystemicError::Artifact { path: path.to_path_buf(), reason };
        let r = BufReader::new(File::open(path).map_err(|e| err(e.to_string()))?);
        bincode::deserialize_from(r).map_err(|e| err(e.to_string()))
    }

    /// 检查分区文件并转换为边界
    pub fn boundary(&self) -> Result<PartitionBoundary, String> {
        PartitionBoundary::new(self.shards, self.boundaries.clone())
    }
}
