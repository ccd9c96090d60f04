//! 排序任务
//!
//! 任务分为三个阶段：抽样计算分区边界，打分并按边界分组，每个分片排序后写出。
//! 打分阶段由一个读取线程和若干工作线程组成，工作线程各自持有解码缓冲区，
//! 只共享只读的查询打分器和分区边界。

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crossbeam_channel::{Sender, bounded};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::SamplerOptions;
use crate::corpus::{Corpus, RawEntry};
use crate::decoder::RecordDecoder;
use crate::error::{FailureKind, RankError, RecordError, SystemicError};
use crate::metric::{MetricConfig, MetricKind, QueryScorer};
use crate::metrics;
use crate::partition::{PartitionBoundary, PartitionFile, normalize_shards};
use crate::pixel::PixelBuffer;
use crate::record::ImageRecord;
use crate::sampler::{RandomSampler, SampleSlots};
use crate::shard::{ShardEntry, list_shards, shard_file_name, write_shard};
use crate::utils::progress_bar;

/// 结果提交前的暂存目录
pub const STAGING_DIR: &str = "_temporary";
/// 结果提交成功的标记文件
pub const SUCCESS_MARKER: &str = "_SUCCESS";

#[derive(Debug, Clone)]
pub struct RankingConfig {
    /// 图片库文件或目录
    pub corpus: PathBuf,
    /// 查询图片
    pub query: PathBuf,
    /// 结果目录
    pub output: PathBuf,
    /// 分区文件所在目录，默认为结果目录
    pub partition_dir: Option<PathBuf>,
    /// 分区文件已存在时直接使用
    pub reuse_partition: bool,
    pub shards: usize,
    pub metric: MetricConfig,
    pub sampler: SamplerOptions,
    pub workers: usize,
    /// 是否显示进度条
    pub progress: bool,
}

impl RankingConfig {
    pub fn new(
        corpus: impl Into<PathBuf>,
        query: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        metric: MetricConfig,
    ) -> Self {
        Self {
            corpus: corpus.into(),
            query: query.into(),
            output: output.into(),
            partition_dir: None,
            reuse_partition: false,
            shards: 2,
            metric,
            sampler: SamplerOptions::default(),
            workers: num_cpus::get(),
            progress: false,
        }
    }

    /// 检查参数范围，分片数量不在这里检查
    pub fn validate(&self) -> Result<(), RankError> {
        let s = &self.sampler;
        if !(s.probability > 0.0 && s.probability <= 1.0) {
            return Err(RankError::validation(format!("抽样概率必须在 (0, 1] 内: {}", s.probability)));
        }
        if s.max_samples < 1 {
            return Err(RankError::validation("样本数量上限必须至少为 1"));
        }
        if s.max_splits < 1 {
            return Err(RankError::validation("抽样分片数量必须至少为 1"));
        }
        let bins = self.metric.histogram.bins;
        if !(1..=256).contains(&bins) {
            return Err(RankError::validation(format!("直方图 bin 数量必须在 1~256 内: {}", bins)));
        }
        let f = &self.metric.feature;
        if !(f.ratio > 0.0 && f.ratio <= 1.0) {
            return Err(RankError::validation(format!("匹配比例阈值必须在 (0, 1] 内: {}", f.ratio)));
        }
        if f.octaves < 1 || f.octave_layers < 1 {
            return Err(RankError::validation("组数和层数必须至少为 1"));
        }
        if f.trees < 1 {
            return Err(RankError::validation("k-d 树数量必须至少为 1"));
        }
        if !f.hessian_threshold.is_finite() {
            return Err(RankError::validation("Hessian 阈值必须是有限值"));
        }
        if self.workers < 1 {
            return Err(RankError::validation("工作线程数量必须至少为 1"));
        }
        Ok(())
    }

    pub fn partition_path(&self) -> PathBuf {
        PartitionFile::path(self.partition_dir.as_ref().unwrap_or(&self.output))
    }
}

/// 任务阶段，只能向前推进
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Sampling,
    Scoring,
    Emitting,
    Done,
}

/// 按类别统计的跳过记录数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    pub decode: u64,
    pub metric: u64,
}

impl FailureCounts {
    pub fn record(&mut self, kind: FailureKind) {
        match kind {
            FailureKind::Decode => self.decode += 1,
            FailureKind::Metric => self.metric += 1,
        }
    }

    pub fn merge(&mut self, other: &FailureCounts) {
        self.decode += other.decode;
        self.metric += other.metric;
    }

    pub fn total(&self) -> u64 {
        self.decode + self.metric
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub metric: MetricKind,
    /// 读取的记录总数
    pub total: u64,
    /// 成功打分的记录数
    pub scored: u64,
    pub skipped: FailureCounts,
    pub shard_sizes: Vec<usize>,
    pub sample_size: usize,
    pub boundaries: Vec<f64>,
    pub output: PathBuf,
    pub elapsed: f64,
    pub success: bool,
}

pub struct RankingPipeline {
    config: RankingConfig,
    phase: JobPhase,
}

impl RankingPipeline {
    /// 检查参数并创建任务，分片数量小于 2 时改为 2
    pub fn new(mut config: RankingConfig) -> Result<Self, RankError> {
        config.validate()?;
        config.shards = normalize_shards(config.shards);
        Ok(Self { config, phase: JobPhase::Sampling })
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    fn advance(&mut self, next: JobPhase) {
        debug_assert!(next > self.phase, "{:?} -> {:?}", self.phase, next);
        debug!("阶段 {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// 运行任务，每个任务只能运行一次
    pub fn run(&mut self) -> Result<JobReport, RankError> {
        if self.phase != JobPhase::Sampling {
            return Err(RankError::validation("任务已经运行过"));
        }
        let start = Instant::now();
        let config = self.config.clone();
        let metric_name = config.metric.kind.to_string();

        let query = PixelBuffer::open(&config.query)
            .map_err(|e| SystemicError::Query { path: config.query.clone(), source: e })?;
        info!("查询图片 {}x{}x{}", query.width(), query.height(), query.channels());

        let metric = config.metric.build();
        let scorer = metric.prepare(&query).map_err(SystemicError::QueryMetric)?;
        let scorer = scorer.as_ref();

        let corpus = Corpus::open(&config.corpus)?;

        // 抽样并发布分区文件
        let partition_path = config.partition_path();
        if config.reuse_partition && partition_path.exists() {
            info!("使用已有的分区文件 {}", partition_path.display());
        } else {
            let (mut samples, failures) = self.sample(&corpus, scorer)?;
            let sample_size = samples.len();
            if failures.total() > 0 {
                debug!("抽样时跳过 {} 条记录", failures.total());
            }
            let boundary = PartitionBoundary::from_sample(&mut samples, config.shards);
            info!("抽样完成，共 {} 个样本，边界 {:?}", sample_size, boundary.boundaries());
            PartitionFile::new(&boundary, sample_size).save(&partition_path)?;
        }

        // 各个工作线程只读取发布后的分区文件
        let partition = PartitionFile::load(&partition_path)?;
        let boundary = partition.boundary().map_err(|reason| SystemicError::Artifact {
            path: partition_path.clone(),
            reason,
        })?;
        if boundary.shards() != config.shards {
            warn!("分区文件的分片数量为 {}，与参数 {} 不一致", boundary.shards(), config.shards);
        }

        self.advance(JobPhase::Scoring);
        let scored = self.score(&corpus, scorer, &boundary, &metric_name)?;

        self.advance(JobPhase::Emitting);
        let mut shards = scored.shards;
        let shard_sizes = emit(&config.output, &mut shards)?;
        for (i, &size) in shard_sizes.iter().enumerate() {
            metrics::set_shard_size(i, size);
        }

        self.advance(JobPhase::Done);
        let report = JobReport {
            metric: config.metric.kind,
            total: scored.total,
            scored: scored.scored,
            skipped: scored.failures,
            shard_sizes,
            sample_size: partition.sample_size,
            boundaries: boundary.boundaries().to_vec(),
            output: config.output.clone(),
            elapsed: start.elapsed().as_secs_f64(),
            success: true,
        };
        info!(
            "任务完成，共 {} 条记录，成功 {} 条，跳过 {} 条",
            report.total,
            report.scored,
            report.skipped.total()
        );
        match metrics::gather_text() {
            Ok(text) => debug!("指标:\n{}", text),
            Err(e) => warn!("无法导出指标: {}", e),
        }
        Ok(report)
    }

    /// 抽样阶段，返回样本和抽样时跳过的记录数
    fn sample(
        &self,
        corpus: &Corpus,
        scorer: &dyn QueryScorer,
    ) -> Result<(Vec<f64>, FailureCounts), SystemicError> {
        let config = &self.config;
        let total_records = corpus.count()?;
        let mut sampler = RandomSampler::new(&config.sampler, total_records);
        info!(
            "开始抽样，共 {} 条记录，抽样概率 {:.3}，上限 {}",
            total_records,
            sampler.probability(),
            sampler.capacity()
        );

        let splits = corpus.splits();
        let order = sampler.split_order(splits.len());
        let pb = progress_bar(total_records, config.progress);
        pb.set_message("抽样");

        let feed = |tx: &Sender<SampleJob>| -> Result<(), SystemicError> {
            let mut seq = 0u64;
            for (visited, &index) in order.iter().enumerate() {
                if !sampler.should_visit(visited) {
                    break;
                }
                let split = &splits[index];
                for entry in split.open()? {
                    let entry = entry.map_err(|e| split.error(e))?;
                    pb.inc(1);
                    seq += 1;
                    if let Some(slot) = sampler.offer() {
                        if tx.send(SampleJob { slot, seq, entry }).is_err() {
                            return Ok(());
                        }
                    }
                }
            }
            Ok(())
        };

        let accs = scatter(
            config.workers,
            feed,
            SampleAcc::default,
            |acc: &mut SampleAcc, job: SampleJob| {
                let result = score_entry(&mut acc.decoder, scorer, job.entry);
                match result {
                    Ok((_, score)) => acc.picks.push((job.slot, job.seq, Some(score))),
                    Err((key, e)) => {
                        debug!("抽样时跳过 {}: {}", key, e);
                        acc.failures.record(e.kind());
                        acc.picks.push((job.slot, job.seq, None));
                    }
                }
            },
        )?;
        pb.finish_and_clear();

        let mut slots = SampleSlots::new(sampler.filled());
        let mut failures = FailureCounts::default();
        for acc in accs {
            failures.merge(&acc.failures);
            for (slot, seq, score) in acc.picks {
                slots.put(slot, seq, score);
            }
        }
        Ok((slots.into_samples(), failures))
    }

    /// 打分阶段，每条记录按分区边界放入对应的分片
    fn score(
        &self,
        corpus: &Corpus,
        scorer: &dyn QueryScorer,
        boundary: &PartitionBoundary,
        metric_name: &str,
    ) -> Result<ScoreAcc, SystemicError> {
        let config = &self.config;
        let shards = boundary.shards();
        let pb: ProgressBar = progress_bar(0, config.progress);
        pb.set_message("打分");

        let mut total = 0u64;
        let feed = |tx: &Sender<RawEntry>| -> Result<(), SystemicError> {
            for split in corpus.splits() {
                for entry in split.open()? {
                    let entry = entry.map_err(|e| split.error(e))?;
                    total += 1;
                    pb.inc_length(1);
                    if tx.send(entry).is_err() {
                        return Ok(());
                    }
                }
            }
            Ok(())
        };

        let accs = scatter(
            config.workers,
            feed,
            || ScoreAcc::new(shards),
            |acc: &mut ScoreAcc, entry: RawEntry| {
                let t = Instant::now();
                match score_entry(&mut acc.decoder, scorer, entry) {
                    Ok((key, score)) => {
                        acc.shards[boundary.assign(score)].push(ShardEntry { score, key });
                        acc.scored += 1;
                        metrics::inc_record_count(metric_name, "scored");
                    }
                    Err((key, e)) => {
                        warn!("跳过 {}: {}", key, e);
                        acc.failures.record(e.kind());
                        metrics::inc_record_count(metric_name, e.kind().as_str());
                    }
                }
                metrics::observe_score_duration(metric_name, t.elapsed().as_secs_f64());
                pb.inc(1);
            },
        )?;
        pb.finish_and_clear();

        let mut merged = ScoreAcc::new(shards);
        for acc in accs {
            merged.scored += acc.scored;
            merged.failures.merge(&acc.failures);
            for (dst, src) in merged.shards.iter_mut().zip(acc.shards) {
                dst.extend(src);
            }
        }
        merged.total = total;
        Ok(merged)
    }
}

struct SampleJob {
    slot: usize,
    seq: u64,
    entry: RawEntry,
}

#[derive(Default)]
struct SampleAcc {
    decoder: RecordDecoder,
    picks: Vec<(usize, u64, Option<f64>)>,
    failures: FailureCounts,
}

struct ScoreAcc {
    decoder: RecordDecoder,
    shards: Vec<Vec<ShardEntry>>,
    failures: FailureCounts,
    scored: u64,
    total: u64,
}

impl ScoreAcc {
    fn new(shards: usize) -> Self {
        Self {
            decoder: RecordDecoder::new(),
            shards: vec![vec![]; shards],
            failures: FailureCounts::default(),
            scored: 0,
            total: 0,
        }
    }
}

/// 解析、解码并打分一条记录，失败时同时返回 key 用于日志
fn score_entry(
    decoder: &mut RecordDecoder,
    scorer: &dyn QueryScorer,
    entry: RawEntry,
) -> Result<(String, f64), (String, RecordError)> {
    let RawEntry { key, value } = entry;
    match score_record(decoder, scorer, &key, value) {
        Ok(score) => Ok((key, score)),
        Err(e) => Err((key, e)),
    }
}

fn score_record(
    decoder: &mut RecordDecoder,
    scorer: &dyn QueryScorer,
    key: &str,
    value: Vec<u8>,
) -> Result<f64, RecordError> {
    let record = ImageRecord::parse(key, value)?;
    let image = decoder.decode(&record)?;
    Ok(scorer.score(image)?)
}

/// 一个读取者、多个工作线程的分发
///
/// `feed` 在当前线程执行，把任务发送到有界队列；每个工作线程用 `init` 创建
/// 自己的状态并依次处理任务，结束后返回所有线程的状态。
fn scatter<T, A, F, I, W>(workers: usize, feed: F, init: I, work: W) -> Result<Vec<A>, SystemicError>
where
    T: Send,
    A: Send,
    F: FnOnce(&Sender<T>) -> Result<(), SystemicError>,
    I: Fn() -> A + Sync,
    W: Fn(&mut A, T) + Sync,
{
    std::thread::scope(|s| {
        let (tx, rx) = bounded::<T>(workers * 4);

        let handles = (0..workers)
            .map(|_| {
                let rx = rx.clone();
                let (init, work) = (&init, &work);
                s.spawn(move || {
                    let mut acc = init();
                    while let Ok(item) = rx.recv() {
                        work(&mut acc, item);
                    }
                    acc
                })
            })
            .collect::<Vec<_>>();
        drop(rx);

        let fed = feed(&tx);
        drop(tx);

        let accs = handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect::<Vec<_>>();
        fed.map(|_| accs)
    })
}

/// 各分片排序后写入暂存目录，再整体替换旧的结果
fn emit(output: &Path, shards: &mut [Vec<ShardEntry>]) -> Result<Vec<usize>, SystemicError> {
    let err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| SystemicError::Output { path, source }
    };
    let staging = output.join(STAGING_DIR);
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(err(&staging))?;
    }
    fs::create_dir_all(&staging).map_err(err(&staging))?;

    shards.par_iter_mut().enumerate().try_for_each(|(i, entries)| {
        entries.par_sort_by(ShardEntry::order);
        let path = staging.join(shard_file_name(i));
        write_shard(&path, entries).map_err(err(&path))
    })?;

    commit(output, &staging, shards.len())?;
    Ok(shards.iter().map(Vec::len).collect())
}

/// 删除旧的分片，把暂存的分片移动到结果目录并写入成功标记
fn commit(output: &Path, staging: &Path, shards: usize) -> Result<(), SystemicError> {
    let err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| SystemicError::Output { path, source }
    };
    let marker = output.join(SUCCESS_MARKER);
    if marker.exists() {
        fs::remove_file(&marker).map_err(err(&marker))?;
    }
    for old in list_shards(output).map_err(err(output))? {
        fs::remove_file(&old).map_err(err(&old))?;
    }
    for i in 0..shards {
        let name = shard_file_name(i);
        fs::rename(staging.join(&name), output.join(&name)).map_err(err(output))?;
    }
    fs::remove_dir(staging).map_err(err(staging))?;
    File::create(&marker).map_err(err(&marker))?;
    debug!("结果已提交到 {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeatureOptions, HistogramOptions};

    fn config() -> RankingConfig {
        let metric = MetricConfig {
            kind: MetricKind::Histogram,
            histogram: HistogramOptions::default(),
            feature: FeatureOptions::default(),
        };
        RankingConfig::new("corpus", "query.png", "out", metric)
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());

        let mut c = config();
        c.sampler.probability = 0.0;
        assert!(matches!(c.validate(), Err(RankError::Validation(_))));

        let mut c = config();
        c.sampler.probability = 1.5;
        assert!(c.validate().is_err());

        let mut c = config();
        c.metric.histogram.bins = 0;
        assert!(c.validate().is_err());
        c.metric.histogram.bins = 257;
        assert!(c.validate().is_err());

        let mut c = config();
        c.metric.feature.ratio = 0.0;
        assert!(c.validate().is_err());

        let mut c = config();
        c.workers = 0;
        assert!(c.validate().is_err());

        let mut c = config();
        c.sampler.max_samples = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_shards_normalized() {
        let mut c = config();
        c.shards = 0;
        assert_eq!(RankingPipeline::new(c.clone()).unwrap().config().shards, 2);
        c.shards = 1;
        assert_eq!(RankingPipeline::new(c).unwrap().config().shards, 2);
    }

    #[test]
    fn test_phase_starts_at_sampling() {
        let pipeline = RankingPipeline::new(config()).unwrap();
        assert_eq!(pipeline.phase(), JobPhase::Sampling);
    }

    #[test]
    fn test_scatter_collects_all() {
        let accs = scatter(
            3,
            |tx: &Sender<u64>| {
                for i in 0..100 {
                    tx.send(i).unwrap();
                }
                Ok(())
            },
            Vec::new,
            |acc: &mut Vec<u64>, i| acc.push(i),
        )
        .unwrap();
        assert_eq!(accs.len(), 3);
        let mut all = accs.into_iter().flatten().collect::<Vec<_>>();
        all.sort();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_emit_replaces_old_shards() {
        let dir = tempfile::tempdir().unwrap();
        let mut shards = vec![vec![ShardEntry::new(0.5, "b"), ShardEntry::new(0.1, "a")]; 3];
        assert_eq!(emit(dir.path(), &mut shards).unwrap(), vec![2, 2, 2]);
        assert_eq!(list_shards(dir.path()).unwrap().len(), 3);

        let mut shards = vec![vec![ShardEntry::new(0.2, "c")], vec![]];
        emit(dir.path(), &mut shards).unwrap();
        let committed = list_shards(dir.path()).unwrap();
        assert_eq!(committed.len(), 2);
        assert!(dir.path().join(SUCCESS_MARKER).exists());
        assert!(!dir.path().join(STAGING_DIR).exists());
        assert_eq!(crate::shard::read_shard(&committed[0]).unwrap()[0].key, "c");
    }
}
