use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use imrank::config::{FeatureOptions, HistogramOptions};
use imrank::metric::{FeatureMatchSimilarity, HistogramSimilarity, QueryScorer, SimilarityMetric};
use imrank::pixel::PixelBuffer;
use rand::prelude::*;

fn noise(rng: &mut StdRng, width: usize, height: usize) -> PixelBuffer {
    let mut data = vec![0u8; width * height];
    rng.fill_bytes(&mut data);
    PixelBuffer::gray8(width, height, data).unwrap()
}

/// 随机分布的亮色方块，保证有足够的特征点
fn blobs(rng: &mut StdRng, width: usize, height: usize) -> PixelBuffer {
    let mut data = vec![40u8; width * height];
    for _ in 0..24 {
        let (cx, cy) = (rng.random_range(8..width - 8), rng.random_range(8..height - 8));
        let r = rng.random_range(3..8);
        for y in cy - r..cy + r {
            for x in cx - r..cx + r {
                data[y * width + x] = 220;
            }
        }
    }
    PixelBuffer::gray8(width, height, data).unwrap()
}

fn bench_histogram(c: &mut Criterion) {
    let mut group = c.benchmark_group("Histogram");
    let mut rng = StdRng::seed_from_u64(1);
    let a = noise(&mut rng, 512, 512);
    let b = noise(&mut rng, 512, 512);
    let metric = HistogramSimilarity::new(HistogramOptions::default());
    let scorer = metric.prepare(&b).unwrap();

    group.throughput(Throughput::Elements((a.width() * a.height()) as u64));
    group.bench_function("compute_distance", |bench| {
        bench.iter(|| metric.compute_distance(black_box(&a), black_box(&b)).unwrap());
    });
    group.bench_function("prepared", |bench| {
        bench.iter(|| scorer.score(black_box(&a)).unwrap());
    });
    group.finish();
}

fn bench_feature(c: &mut Criterion) {
    let mut group = c.benchmark_group("Feature");
    group.sample_size(20);
    let mut rng = StdRng::seed_from_u64(2);
    let a = blobs(&mut rng, 256, 256);
    let b = blobs(&mut rng, 256, 256);
    let metric = FeatureMatchSimilarity::new(FeatureOptions::default());
    let scorer = metric.prepare(&b).unwrap();

    group.bench_function("compute_distance", |bench| {
        bench.iter(|| metric.compute_distance(black_box(&a), black_box(&b)).unwrap());
    });
    group.bench_function("prepared", |bench| {
        bench.iter(|| scorer.score(black_box(&a)).unwrap());
    });
    for checks in [16, 64, -1] {
        let metric = FeatureMatchSimilarity::new(FeatureOptions { checks, ..Default::default() });
        let scorer = metric.prepare(&b).unwrap();
        group.bench_function(format!("checks_{}", checks), |bench| {
            bench.iter(|| scorer.score(black_box(&a)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_histogram, bench_feature);
criterion_main!(benches);
