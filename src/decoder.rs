use crate::error::DecodeError;
use crate::pixel::PixelBuffer;
use crate::record::{Encoding, ImageRecord};

/// 记录解码器
///
/// 每个工作线程持有一个解码器。连续的原始记录形状相同时会复用同一块缓冲区，
/// 形状变化时重新分配，旧数据直接丢弃。
#[derive(Default)]
pub struct RecordDecoder {
    scratch: Option<PixelBuffer>,
    allocations: usize,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解码一条记录，返回的引用在下一次调用前有效
    pub fn decode(&mut self, record: &ImageRecord) -> Result<&PixelBuffer, DecodeError> {
        match record.encoding {
            Encoding::Raw(geometry) => {
                let expected = geometry.byte_len()?;
                if record.payload.len() != expected {
                    return Err(DecodeError::PayloadLength { expected, actual: record.payload.len() });
                }
                let buffer = match self.scratch.take() {
                    Some(buffer) if buffer.geometry() == geometry => buffer,
                    _ => {
                        self.allocations += 1;
                        PixelBuffer::zeroed(geometry)?
                    }
                };
                let buffer = self.scratch.insert(buffer);
                buffer.overwrite(&record.payload)?;
                Ok(&*buffer)
            }
            Encoding::Encoded => {
                // 编码图片的形状在解码前未知，不做复用
                let buffer = PixelBuffer::decode(&record.payload)?;
                self.allocations += 1;
                Ok(&*self.scratch.insert(buffer))
            }
        }
    }

    /// 已经分配过的缓冲区数量
    pub fn allocations(&self) -> usize {
        self.allocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::{Depth, Geometry};

    fn raw_record(width: usize, height: usize, fill: u8) -> ImageRecord {
        let buffer = PixelBuffer::gray8(width, height, vec![fill; width * height]).unwrap();
        ImageRecord::raw("r", "png", &buffer)
    }

    #[test]
    fn test_raw_roundtrip() {
        let geometry = Geometry { width: 3, height: 2, channels: 3, depth: Depth::U16 };
        let data = (0..geometry.byte_len().unwrap()).map(|i| (i * 7) as u8).collect::<Vec<_>>();
        let buffer = PixelBuffer::from_raw(geometry, data.clone()).unwrap();
        let record = ImageRecord::raw("a", "png", &buffer);

        let key = record.metadata().to_string();
        let parsed = ImageRecord::parse(&key, record.payload.clone()).unwrap();

        let mut decoder = RecordDecoder::new();
        let decoded = decoder.decode(&parsed).unwrap();
        assert_eq!(decoded.geometry(), geometry);
        assert_eq!(decoded.as_bytes(), &data[..]);
    }

    #[test]
    fn test_truncated_payload() {
        let key = "name=c;ext=png;type=raw;width=4;height=4;channel_count=1;depth=8";
        let record = ImageRecord::parse(key, vec![0; 10]).unwrap();
        let mut decoder = RecordDecoder::new();
        let err = decoder.decode(&record).unwrap_err();
        assert!(matches!(err, DecodeError::PayloadLength { expected: 16, actual: 10 }));
    }

    #[test]
    fn test_scratch_reuse() {
        let mut decoder = RecordDecoder::new();
        decoder.decode(&raw_record(4, 4, 1)).unwrap();
        let buffer = decoder.decode(&raw_record(4, 4, 2)).unwrap();
        assert_eq!(buffer.as_bytes(), &[2; 16]);
        assert_eq!(decoder.allocations(), 1);

        // 形状变化后必须重新分配
        let buffer = decoder.decode(&raw_record(2, 2, 3)).unwrap();
        assert_eq!(buffer.width(), 2);
        assert_eq!(buffer.as_bytes(), &[3; 4]);
        assert_eq!(decoder.allocations(), 2);
    }

    #[test]
    fn test_failed_decode_keeps_previous_geometry() {
        let mut decoder = RecordDecoder::new();
        decoder.decode(&raw_record(4, 4, 1)).unwrap();
        let mut bad = raw_record(4, 4, 9);
        bad.payload.truncate(3);
        assert!(decoder.decode(&bad).is_err());
        let buffer = decoder.decode(&raw_record(4, 4, 5)).unwrap();
        assert_eq!(buffer.as_bytes(), &[5; 16]);
    }

    #[test]
    fn test_overflowing_geometry() {
        let key = "name=big;ext=png;type=raw;width=4294967296;height=4294967296;channel_count=3;depth=8";
        let record = ImageRecord {
            name: "big".to_string(),
            ext: "png".to_string(),
            encoding: Encoding::Raw(Geometry {
                width: 1 << 32,
                height: 1 << 32,
                channels: 3,
                depth: Depth::U8,
            }),
            extra: Default::default(),
            payload: vec![],
        };
        let mut decoder = RecordDecoder::new();
        assert!(matches!(decoder.decode(&record), Err(DecodeError::Geometry { .. })));
        assert!(matches!(ImageRecord::parse(key, vec![]), Err(DecodeError::Geometry { .. })));

        // 之后的记录不受影响
        assert_eq!(decoder.decode(&raw_record(2, 2, 1)).unwrap().as_bytes(), &[1; 4]);
    }

    #[test]
    fn test_invalid_encoded_payload() {
        let record = ImageRecord::encoded("x", "jpg", vec![1, 2, 3, 4]);
        let mut decoder = RecordDecoder::new();
        assert!(matches!(decoder.decode(&record), Err(DecodeError::Codec(_))));
    }
}
