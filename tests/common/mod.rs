#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use imrank::config::{FeatureOptions, HistogramOptions};
use imrank::corpus::CorpusWriter;
use imrank::metric::{MetricConfig, MetricKind};
use imrank::pipeline::RankingConfig;
use imrank::pixel::PixelBuffer;
use imrank::record::ImageRecord;
use imrank::shard::{ShardEntry, list_shards, read_shard};

/// 编码为 PNG
pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut buf = Cursor::new(vec![]);
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// 16x16 的灰度渐变，每个像素值都不同
pub fn gradient() -> RgbImage {
    RgbImage::from_fn(16, 16, |x, y| {
        let v = (y * 16 + x) as u8;
        image::Rgb([v, v, v])
    })
}

pub fn solid(width: u32, height: u32, value: u8) -> RgbImage {
    RgbImage::from_pixel(width, height, image::Rgb([value, value, value]))
}

/// 保存图片并返回文件内容
pub fn save_png(path: &Path, image: &RgbImage) -> Vec<u8> {
    let bytes = png_bytes(image);
    std::fs::write(path, &bytes).unwrap();
    bytes
}

pub fn raw_gray(name: &str, width: usize, height: usize, data: Vec<u8>) -> ImageRecord {
    let buffer = PixelBuffer::gray8(width, height, data).unwrap();
    ImageRecord::raw(name, "png", &buffer)
}

pub fn write_corpus(path: &Path, records: &[ImageRecord]) {
    let mut writer = CorpusWriter::create(path).unwrap();
    for record in records {
        writer.append(&record.metadata().to_string(), &record.payload).unwrap();
    }
    writer.finish().unwrap();
}

pub fn write_raw_entries(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let mut writer = CorpusWriter::create(path).unwrap();
    for (key, value) in entries {
        writer.append(key, value).unwrap();
    }
    writer.finish().unwrap();
}

pub fn metric_config(kind: MetricKind) -> MetricConfig {
    MetricConfig {
        kind,
        histogram: HistogramOptions::default(),
        feature: FeatureOptions::default(),
    }
}

pub fn ranking_config(corpus: &Path, query: &Path, output: &Path, shards: usize) -> RankingConfig {
    let mut config = RankingConfig::new(corpus, query, output, metric_config(MetricKind::Histogram));
    config.shards = shards;
    config.workers = 2;
    config
}

/// 按分片编号读取所有结果
pub fn read_shards(dir: &Path) -> Vec<Vec<ShardEntry>> {
    list_shards(dir).unwrap().iter().map(|p| read_shard(p).unwrap()).collect()
}

pub fn shard_paths(dir: &Path) -> Vec<PathBuf> {
    list_shards(dir).unwrap()
}

/// 第 i 张图片有 i 个黑色像素，其余为白色，与黑色查询图片的距离为 1 - i/(count-1)
pub fn graded_corpus(path: &Path, count: usize) {
    let width = count - 1;
    let records = (0..count)
        .map(|i| {
            let data = (0..width).map(|x| if x < i { 0 } else { 255 }).collect();
            raw_gray(&format!("img{:03}", i), width, 1, data)
        })
        .collect::<Vec<_>>();
    write_corpus(path, &records);
}

pub fn scores(entries: &[ShardEntry]) -> Vec<f64> {
    entries.iter().map(|e| e.score).collect()
}

/// 随机位置和大小的亮色方块，局部特征点足够多且互不重复
pub fn textured(width: u32, height: u32) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(7);
    let mut image = RgbImage::from_pixel(width, height, image::Rgb([30, 30, 30]));
    for _ in 0..20 {
        let (cx, cy) = (rng.random_range(8..width - 8), rng.random_range(8..height - 8));
        let r = rng.random_range(3..7);
        let v = rng.random_range(150..=255u8);
        for y in cy - r..cy + r {
            for x in cx - r..cx + r {
                image.put_pixel(x, y, image::Rgb([v, v, v]));
            }
        }
    }
    image
}
