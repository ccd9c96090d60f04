//! 排序结果分片
//!
//! 文件以 `IMRS` 开头，之后是 u16 版本号、u64 条目数量，
//! 每个条目为 `f64 距离 | u32 key 长度 | key`，全部使用小端序。

use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;

pub const SHARD_MAGIC: &[u8; 4] = b"IMRS";
pub const SHARD_VERSION: u16 = 1;

/// 分片中的一条结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShardEntry {
    pub score: f64,
    pub key: String,
}

impl ShardEntry {
    pub fn new(score: f64, key: impl Into<String>) -> Self {
        Self { score, key: key.into() }
    }

    /// 先按距离，再按 key 排序
    pub fn order(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score).then_with(|| self.key.cmp(&other.key))
    }
}

/// 第 `index` 个分片的文件名
pub fn shard_file_name(index: usize) -> String {
    format!("part-r-{:05}", index)
}

/// 列出目录中已提交的分片，按编号排序
pub fn list_shards(dir: impl AsRef<Path>) -> io::Result<Vec<PathBuf>> {
    let mut shards = vec![];
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(index) = name.strip_prefix("part-r-") {
            if index.parse::<usize>().is_ok() {
                shards.push(entry.path());
            }
        }
    }
    shards.sort();
    Ok(shards)
}

/// 写入一个完整的分片，条目需要已经排好序
pub fn write_shard(path: impl AsRef<Path>, entries: &[ShardEntry]) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(SHARD_MAGIC)?;
    w.write_u16::<LittleEndian>(SHARD_VERSION)?;
    w.write_u64::<LittleEndian>(entries.len() as u64)?;
    for entry in entries {
        w.write_f64::<LittleEndian>(entry.score)?;
        w.write_u32::<LittleEndian>(entry.key.len() as u32)?;
        w.write_all(entry.key.as_bytes())?;
    }
    w.flush()
}

pub fn read_shard(path: impl AsRef<Path>) -> io::Result<Vec<ShardEntry>> {
    let mut r = BufReader::new(File::open(path)?);
    read_entries(&mut r)
}

fn read_entries(r: &mut impl Read) -> io::Result<Vec<ShardEntry>> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != SHARD_MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a result shard"));
    }
    let version = r.read_u16::<LittleEndian>()?;
    if version != SHARD_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported shard version {}", version),
        ));
    }
    let count = r.read_u64::<LittleEndian>()?;
    let mut entries = Vec::with_capacity(count.min(1 << 20) as usize);
    for _ in 0..count {
        let score = r.read_f64::<LittleEndian>()?;
        let len = r.read_u32::<LittleEndian>()?;
        let mut key = vec![0u8; len as usize];
        r.read_exact(&mut key)?;
        let key = String::from_utf8(key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        entries.push(ShardEntry { score, key });
    }
    Ok(entries)
}

/// 统计逆序对数量，即 i < j 且 scores[i] > scores[j] 的组合数
pub fn count_inversions(scores: &[f64]) -> u64 {
    fn sort_count(v: &mut [f64], buf: &mut Vec<f64>) -> u64 {
        let n = v.len();
        if n < 2 {
            return 0;
        }
        let mid = n / 2;
        let mut count = sort_count(&mut v[..mid], buf) + sort_count(&mut v[mid..], buf);

        buf.clear();
        let (mut i, mut j) = (0, mid);
        while i < mid && j < n {
            if v[j].total_cmp(&v[i]) == Ordering::Less {
                count += (mid - i) as u64;
                buf.push(v[j]);
                j += 1;
            } else {
                buf.push(v[i]);
                i += 1;
            }
        }
        buf.extend_from_slice(&v[i..mid]);
        buf.extend_from_slice(&v[j..n]);
        v.copy_from_slice(buf);
        count
    }

    let mut v = scores.to_vec();
    let mut buf = Vec::with_capacity(v.len());
    sort_count(&mut v, &mut buf)
}
