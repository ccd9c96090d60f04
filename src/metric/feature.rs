use opencv::core::{self, DataType, KeyPoint, Mat, Scalar, Vector};
use opencv::prelude::*;
use opencv::{flann, xfeatures2d};

use crate::config::FeatureOptions;
use crate::error::MetricError;
use crate::metric::{QueryScorer, SimilarityMetric, clamp_distance};
use crate::pixel::PixelBuffer;

/// 建树前重置 OpenCV 的随机数种子，保证同样的输入得到同样的距离
const FLANN_SEED: i32 = 0x5eed;

/// 把按行存放的数据复制到单通道矩阵
fn to_mat<T: DataType>(rows: usize, cols: usize, data: &[T]) -> opencv::Result<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(rows as i32, cols as i32, T::opencv_type(), Scalar::all(0.0))?;
    mat.data_typed_mut::<T>()?.copy_from_slice(data);
    Ok(mat)
}

/// 按行存放的 SURF 描述子
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Descriptors {
    data: Vec<f32>,
    cols: usize,
}

impl Descriptors {
    fn from_mat(mat: &Mat) -> opencv::Result<Self> {
        if mat.empty() || mat.rows() == 0 {
            return Ok(Self::default());
        }
        Ok(Self { data: mat.data_typed::<f32>()?.to_vec(), cols: mat.cols() as usize })
    }

    pub fn len(&self) -> usize {
        if self.cols == 0 { 0 } else { self.data.len() / self.cols }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 描述子维度，没有描述子时为 0
    pub fn dim(&self) -> usize {
        self.cols
    }
}

/// 基于局部特征点匹配比例的相似度
///
/// 对 `b` 的描述子建立 k-d 树森林，用 `a` 的每个描述子查询两个最近邻，
/// 最近邻的距离明显小于次近邻时视为一次匹配。
pub struct FeatureMatchSimilarity {
    opts: FeatureOptions,
}

impl FeatureMatchSimilarity {
    pub fn new(opts: FeatureOptions) -> Self {
        Self { opts }
    }

    /// 提取灰度图的描述子
    pub fn descriptors(&self, image: &PixelBuffer) -> Result<Descriptors, MetricError> {
        if image.channels() == 0 {
            return Err(MetricError::EmptyImage { width: image.width(), height: image.height() });
        }
        if image.width() == 0 || image.height() == 0 {
            return Ok(Descriptors::default());
        }

        let gray = image.to_gray().iter().map(|&v| v.round().clamp(0.0, 255.0) as u8).collect::<Vec<_>>();
        let gray = to_mat(image.height(), image.width(), &gray)?;

        let opts = &self.opts;
        let mut surf = xfeatures2d::SURF::create(
            opts.hessian_threshold,
            opts.octaves as i32,
            opts.octave_layers as i32,
            !opts.basic_descriptor,
            opts.upright,
        )?;
        let mask = Mat::default();
        let mut kps = Vector::<KeyPoint>::new();
        let mut des = Mat::default();
        surf.detect_and_compute(&gray, &mask, &mut kps, &mut des, false)?;
        Ok(Descriptors::from_mat(&des)?)
    }

    /// 在 `train` 上查询 `queries`，返回通过比例测试的描述子数量
    fn count_matches(&self, train: &Descriptors, queries: &Descriptors) -> Result<usize, MetricError> {
        // 次近邻不存在时没有可比较的对象
        if train.len() < 2 || queries.is_empty() {
            return Ok(0);
        }
        let train_mat = to_mat(train.len(), train.dim(), &train.data)?;
        let query_mat = to_mat(queries.len(), queries.dim(), &queries.data)?;

        core::set_rng_seed(FLANN_SEED)?;
        let params = flann::IndexParams::from(flann::KDTreeIndexParams::new(self.opts.trees as i32)?);
        let mut index = flann::Index::new_def(&train_mat, &params)?;

        let mut indices = Mat::default();
        let mut dists = Mat::default();
        let search = flann::SearchParams::new_1(self.opts.checks, 0.0, true)?;
        index.knn_search(&query_mat, &mut indices, &mut dists, 2, &search)?;

        // FLANN 返回距离平方，比例测试在平方上进行
        let ratio = self.opts.ratio;
        let mut matched = 0;
        for row in 0..dists.rows() {
            let (d1, d2) = (*dists.at_2d::<f32>(row, 0)?, *dists.at_2d::<f32>(row, 1)?);
            if d1 < ratio * d2 {
                matched += 1;
            }
        }
        Ok(matched)
    }

    fn distance(&self, train: &Descriptors, queries: &Descriptors) -> Result<f64, MetricError> {
        if train.is_empty() || queries.is_empty() {
            return Ok(1.0);
        }
        let matched = self.count_matches(train, queries)?;
        let fraction = matched as f64 / queries.len() as f64;
        clamp_distance((1.0 - fraction).max(0.0))
    }
}

impl SimilarityMetric for FeatureMatchSimilarity {
    fn compute_distance(&self, a: &PixelBuffer, b: &PixelBuffer) -> Result<f64, MetricError> {
        let queries = self.descriptors(a)?;
        let train = self.descriptors(b)?;
        self.distance(&train, &queries)
    }

    fn prepare<'a>(&'a self, query: &PixelBuffer) -> Result<Box<dyn QueryScorer + 'a>, MetricError> {
        let train = self.descriptors(query)?;
        Ok(Box::new(FeatureScorer { metric: self, train }))
    }

    fn name(&self) -> &'static str {
        "feature"
    }
}

/// 查询图片的描述子只提取一次
struct FeatureScorer<'a> {
    metric: &'a FeatureMatchSimilarity,
    train: Descriptors,
}

impl QueryScorer for FeatureScorer<'_> {
    fn score(&self, image: &PixelBuffer) -> Result<f64, MetricError> {
        let queries = self.metric.descriptors(image)?;
        self.metric.distance(&self.train, &queries)
    }
}
