//! 随机抽样
//!
//! 分片顺序先打乱，至少访问 `max_splits` 个分片，样本不足上限时继续访问剩余分片。
//! 每条记录以 `freq` 的概率被选中；样本满后选中的记录替换一个随机位置，
//! 同时 `freq` 按 (cap-1)/cap 衰减。

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::SamplerOptions;

#[derive(Debug)]
pub struct RandomSampler {
    freq: f64,
    cap: usize,
    max_splits: usize,
    filled: usize,
    rng: StdRng,
}

/// 实际使用的抽样概率
///
/// 图片库较小时提高概率，使得期望样本数不少于 `min_samples`
pub fn effective_probability(opts: &SamplerOptions, total_records: u64) -> f64 {
    if total_records == 0 {
        return opts.probability;
    }
    let floor = (opts.min_samples as f64 / total_records as f64).min(1.0);
    opts.probability.max(floor)
}

impl RandomSampler {
    pub fn new(opts: &SamplerOptions, total_records: u64) -> Self {
        Self {
            freq: effective_probability(opts, total_records),
            cap: opts.max_samples,
            max_splits: opts.max_splits,
            filled: 0,
            rng: StdRng::seed_from_u64(opts.seed),
        }
    }

    pub fn probability(&self) -> f64 {
        self.freq
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// 已经占用的样本位置数量
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// 打乱后的分片访问顺序
    pub fn split_order(&mut self, splits: usize) -> Vec<usize> {
        let mut order = (0..splits).collect::<Vec<_>>();
        order.shuffle(&mut self.rng);
        order
    }

    /// 是否继续访问第 `visited` 个分片
    pub fn should_visit(&self, visited: usize) -> bool {
        visited < self.max_splits || self.filled < self.cap
    }

    /// 决定是否选中下一条记录，选中时返回它占用的样本位置
    pub fn offer(&mut self) -> Option<usize> {
        if self.cap == 0 || self.rng.random::<f64>() > self.freq {
            return None;
        }
        if self.filled < self.cap {
            self.filled += 1;
            Some(self.filled - 1)
        } else {
            let slot = self.rng.random_range(0..self.cap);
            self.freq *= (self.cap - 1) as f64 / self.cap as f64;
            Some(slot)
        }
    }
}

/// 样本位置的最终取值，同一位置以最后选中的记录为准
#[derive(Debug, Default)]
pub struct SampleSlots {
    slots: Vec<Option<(u64, Option<f64>)>>,
}

impl SampleSlots {
    pub fn new(size: usize) -> Self {
        Self { slots: vec![None; size] }
    }

    /// 记录第 `seq` 条记录在 `slot` 位置上的结果，失败时 `score` 为 `None`
    pub fn put(&mut self, slot: usize, seq: u64, score: Option<f64>) {
        if slot >= self.slots.len() {
            self.slots.resize(slot + 1, None);
        }
        match self.slots[slot] {
            Some((old, _)) if old > seq => {}
            _ => self.slots[slot] = Some((seq, score)),
        }
    }

    /// 所有成功计算的样本
    pub fn into_samples(self) -> Vec<f64> {
        self.slots.into_iter().filter_map(|s| s.and_then(|(_, score)| score)).collect()
    }
}
