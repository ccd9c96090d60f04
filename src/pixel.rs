use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use image::DynamicImage;
use ndarray::Array2;

use crate::error::DecodeError;

/// 每个通道的位深
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Depth {
    U8,
    U16,
    F32,
}

impl Depth {
    /// 按元数据中的位数解析，只支持 8、16、32
    pub fn from_bits(bits: u32) -> Result<Self, DecodeError> {
        match bits {
            8 => Ok(Depth::U8),
            16 => Ok(Depth::U16),
            32 => Ok(Depth::F32),
            _ => Err(DecodeError::UnsupportedDepth(bits)),
        }
    }

    pub fn bits(&self) -> u32 {
        match self {
            Depth::U8 => 8,
            Depth::U16 => 16,
            Depth::F32 => 32,
        }
    }

    pub fn bytes(&self) -> usize {
        self.bits() as usize / 8
    }
}

/// 像素缓冲区的形状
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub depth: Depth,
}

impl Geometry {
    /// 数据应有的字节数，溢出时视为无效的形状
    pub fn byte_len(&self) -> Result<usize, DecodeError> {
        self.width
            .checked_mul(self.height)
            .and_then(|n| n.checked_mul(self.channels))
            .and_then(|n| n.checked_mul(self.depth.bytes()))
            .ok_or(DecodeError::Geometry {
                width: self.width,
                height: self.height,
                channels: self.channels,
            })
    }

    /// 像素数量，只对 `byte_len` 检查通过的形状调用
    pub fn pixels(&self) -> usize {
        self.width * self.height
    }
}

/// 交错存储的像素数据，彩色图片按 BGR(A) 顺序排列
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    geometry: Geometry,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// 分配一块全零的缓冲区
    pub fn zeroed(geometry: Geometry) -> Result<Self, DecodeError> {
        Ok(Self { geometry, data: vec![0; geometry.byte_len()?] })
    }

    pub fn from_raw(geometry: Geometry, data: Vec<u8>) -> Result<Self, DecodeError> {
        let expected = geometry.byte_len()?;
        if data.len() != expected {
            return Err(DecodeError::PayloadLength { expected, actual: data.len() });
        }
        Ok(Self { geometry, data })
    }

    /// 从 8 位灰度数据构建
    pub fn gray8(width: usize, height: usize, data: Vec<u8>) -> Result<Self, DecodeError> {
        let geometry = Geometry { width, height, channels: 1, depth: Depth::U8 };
        Self::from_raw(geometry, data)
    }

    /// 使用图片编解码器解码，结果总是 3 通道 8 位 BGR
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let image = image::load_from_memory(bytes)?;
        Ok(Self::from_dynamic(&image))
    }

    pub fn open(path: impl AsRef<Path>) -> image::ImageResult<Self> {
        let image = image::open(path)?;
        Ok(Self::from_dynamic(&image))
    }

    pub fn from_dynamic(image: &DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        let (width, height) = (rgb.width() as usize, rgb.height() as usize);
        let mut data = rgb.into_raw();
        for px in data.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        let geometry = Geometry { width, height, channels: 3, depth: Depth::U8 };
        Self { geometry, data }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn width(&self) -> usize {
        self.geometry.width
    }

    pub fn height(&self) -> usize {
        self.geometry.height
    }

    pub fn channels(&self) -> usize {
        self.geometry.channels
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// 用新的数据覆盖缓冲区，长度必须与形状一致
    pub(crate) fn overwrite(&mut self, payload: &[u8]) -> Result<(), DecodeError> {
        if payload.len() != self.data.len() {
            return Err(DecodeError::PayloadLength {
                expected: self.data.len(),
                actual: payload.len(),
            });
        }
        self.data.copy_from_slice(payload);
        Ok(())
    }

    /// 读取第 `index` 个样本，并归一化到 0~255
    #[inline]
    fn sample(&self, index: usize) -> f32 {
        match self.geometry.depth {
            Depth::U8 => self.data[index] as f32,
            Depth::U16 => LittleEndian::read_u16(&self.data[index * 2..]) as f32 / 257.0,
            Depth::F32 => {
                let v = LittleEndian::read_f32(&self.data[index * 4..]);
                if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) * 255.0 }
            }
        }
    }

    /// 遍历某个通道的全部强度值
    pub fn plane(&self, channel: usize) -> impl Iterator<Item = f32> + '_ {
        let channels = self.geometry.channels;
        (0..self.geometry.pixels()).map(move |i| self.sample(i * channels + channel))
    }

    /// 遍历所有通道的全部强度值
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        let n = self.geometry.pixels() * self.geometry.channels;
        (0..n).map(move |i| self.sample(i))
    }

    /// 转换为灰度图，值域 0~255
    pub fn to_gray(&self) -> Array2<f32> {
        let Geometry { width, height, channels, .. } = self.geometry;
        Array2::from_shape_fn((height, width), |(y, x)| {
            let base = (y * width + x) * channels;
            match channels {
                // 灰度 + alpha 的情况只取第一个通道
                1 | 2 => self.sample(base),
                _ => {
                    let (b, g, r) =
                        (self.sample(base), self.sample(base + 1), self.sample(base + 2));
                    0.299 * r + 0.587 * g + 0.114 * b
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_length_mismatch() {
        let geometry = Geometry { width: 4, height: 4, channels: 1, depth: Depth::U8 };
        let err = PixelBuffer::from_raw(geometry, vec![0; 10]).unwrap_err();
        assert!(matches!(err, DecodeError::PayloadLength { expected: 16, actual: 10 }));
    }

    #[test]
    fn test_depth_from_bits() {
        assert_eq!(Depth::from_bits(8).unwrap(), Depth::U8);
        assert_eq!(Depth::from_bits(16).unwrap().bytes(), 2);
        assert_eq!(Depth::from_bits(32).unwrap().bytes(), 4);
        assert!(Depth::from_bits(12).is_err());
    }

    #[test]
    fn test_sample_normalization() {
        let geometry = Geometry { width: 2, height: 1, channels: 1, depth: Depth::U16 };
        let mut data = vec![0u8; 4];
        LittleEndian::write_u16(&mut data[0..2], 65535);
        LittleEndian::write_u16(&mut data[2..4], 0);
        let buf = PixelBuffer::from_raw(geometry, data).unwrap();
        let plane = buf.plane(0).collect::<Vec<_>>();
        assert_eq!(plane, vec![255.0, 0.0]);

        let geometry = Geometry { width: 2, height: 1, channels: 1, depth: Depth::F32 };
        let mut data = vec![0u8; 8];
        LittleEndian::write_f32(&mut data[0..4], 2.0);
        LittleEndian::write_f32(&mut data[4..8], 0.5);
        let buf = PixelBuffer::from_raw(geometry, data).unwrap();
        let plane = buf.plane(0).collect::<Vec<_>>();
        assert_eq!(plane, vec![255.0, 127.5]);
    }

    #[test]
    fn test_decode_is_bgr() {
        let img = image::RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 { image::Rgb([255, 0, 0]) } else { image::Rgb([0, 0, 255]) }
        });
        let mut bytes = std::io::Cursor::new(vec![]);
        DynamicImage::ImageRgb8(img).write_to(&mut bytes, image::ImageFormat::Png).unwrap();

        let buf = PixelBuffer::decode(bytes.get_ref()).unwrap();
        assert_eq!(buf.channels(), 3);
        // 红色像素在 BGR 中位于第三个通道
        assert_eq!(buf.as_bytes(), &[0, 0, 255, 255, 0, 0]);
    }

    #[test]
    fn test_to_gray() {
        let buf = PixelBuffer::gray8(2, 2, vec![0, 64, 128, 255]).unwrap();
        let gray = buf.to_gray();
        assert_eq!(gray.dim(), (2, 2));
        assert_eq!(gray[[1, 1]], 255.0);
        assert_eq!(gray[[0, 1]], 64.0);
    }
}
