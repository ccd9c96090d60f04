use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::DecodeError;
use crate::pixel::{Depth, Geometry, PixelBuffer};

/// 图片库中记录的 key，格式为 `name=value;name=value`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    fields: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn put(&mut self, name: impl Into<String>, value: impl ToString) {
        self.fields.insert(name.into(), value.to_string());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    /// 读取一个必需的字段
    pub fn require(&self, name: &'static str) -> Result<&str, DecodeError> {
        self.get(name).ok_or(DecodeError::MissingField(name))
    }

    /// 读取一个必需的整数字段
    pub fn require_parsed<T: FromStr>(&self, name: &'static str) -> Result<T, DecodeError> {
        let value = self.require(name)?;
        value
            .parse()
            .map_err(|_| DecodeError::InvalidField { field: name, value: value.to_owned() })
    }
}

impl FromStr for Metadata {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = BTreeMap::new();
        for pair in s.split(';') {
            let mut parts = pair.split('=');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(value), None) => {
                    fields.insert(name.to_owned(), value.to_owned());
                }
                _ => return Err(DecodeError::Metadata(pair.to_owned())),
            }
        }
        Ok(Self { fields })
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}

/// 记录的编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// 未压缩的像素数据，形状由元数据给出
    Raw(Geometry),
    /// 经过编码的图片文件，例如 JPEG、PNG
    Encoded,
}

/// 一条图片库记录
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub name: String,
    pub ext: String,
    pub encoding: Encoding,
    /// 其余字段，例如 `path`，原样保留
    pub extra: Metadata,
    pub payload: Vec<u8>,
}

/// 原始格式记录描述形状的字段
const RAW_FIELDS: [&str; 5] = ["type", "width", "height", "channel_count", "depth"];

impl ImageRecord {
    /// 从图片库的 key 和 value 解析记录
    pub fn parse(key: &str, payload: Vec<u8>) -> Result<Self, DecodeError> {
        let mut metadata = key.parse::<Metadata>()?;
        let name = metadata.require("name")?.to_owned();
        let ext = metadata.require("ext")?.to_owned();

        let encoding = match metadata.get("type") {
            Some("raw") => {
                let depth = Depth::from_bits(metadata.require_parsed("depth")?)?;
                let geometry = Geometry {
                    width: metadata.require_parsed("width")?,
                    height: metadata.require_parsed("height")?,
                    channels: metadata.require_parsed("channel_count")?,
                    depth,
                };
                geometry.byte_len()?;
                for field in RAW_FIELDS {
                    metadata.remove(field);
                }
                Encoding::Raw(geometry)
            }
            _ => Encoding::Encoded,
        };
        metadata.remove("name");
        metadata.remove("ext");

        Ok(Self { name, ext, encoding, extra: metadata, payload })
    }

    /// 将像素缓冲区保存为原始格式的记录
    pub fn raw(name: &str, ext: &str, buffer: &PixelBuffer) -> Self {
        Self {
            name: name.to_owned(),
            ext: ext.to_owned(),
            encoding: Encoding::Raw(buffer.geometry()),
            extra: Metadata::new(),
            payload: buffer.as_bytes().to_vec(),
        }
    }

    pub fn encoded(name: &str, ext: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: name.to_owned(),
            ext: ext.to_owned(),
            encoding: Encoding::Encoded,
            extra: Metadata::new(),
            payload: bytes,
        }
    }

    /// 生成图片库中使用的 key
    pub fn metadata(&self) -> Metadata {
        let mut metadata = self.extra.clone();
        metadata.put("name", &self.name);
        metadata.put("ext", &self.ext);
        if let Encoding::Raw(geometry) = self.encoding {
            metadata.put("type", "raw");
            metadata.put("width", geometry.width);
            metadata.put("height", geometry.height);
            metadata.put("channel_count", geometry.channels);
            metadata.put("depth", geometry.depth.bits());
        }
        metadata
    }
}
