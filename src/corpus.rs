//! 图片库容器
//!
//! 文件以 `IMSQ` 开头，之后是 u16 版本号和若干条记录，
//! 每条记录为 `u32 key 长度 | key | u64 value 长度 | value`，全部使用小端序。

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use walkdir::WalkDir;

use crate::error::SystemicError;

pub const CORPUS_MAGIC: &[u8; 4] = b"IMSQ";
pub const CORPUS_VERSION: u16 = 1;
pub const CORPUS_EXTENSION: &str = "imsq";

/// 一条未解析的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub key: String,
    pub value: Vec<u8>,
}

pub struct CorpusWriter<W: Write> {
    inner: W,
    count: u64,
}

impl CorpusWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> CorpusWriter<W> {
    pub fn new(mut inner: W) -> io::Result<Self> {
        inner.write_all(CORPUS_MAGIC)?;
        inner.write_u16::<LittleEndian>(CORPUS_VERSION)?;
        Ok(Self { inner, count: 0 })
    }

    pub fn append(&mut self, key: &str, value: &[u8]) -> io::Result<()> {
        self.inner.write_u32::<LittleEndian>(key.len() as u32)?;
        self.inner.write_all(key.as_bytes())?;
        self.inner.write_u64::<LittleEndian>(value.len() as u64)?;
        self.inner.write_all(value)?;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

pub struct CorpusReader<R: Read> {
    inner: R,
}

impl CorpusReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> CorpusReader<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        inner.read_exact(&mut magic)?;
        if &magic != CORPUS_MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not an image sequence file"));
        }
        let version = inner.read_u16::<LittleEndian>()?;
        if version != CORPUS_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported version {}", version),
            ));
        }
        Ok(Self { inner })
    }

    /// 读取 key 的长度，文件正好结束时返回 `None`
    fn next_key_len(&mut self) -> io::Result<Option<u32>> {
        let mut buf = [0u8; 4];
        let mut read = 0;
        while read < buf.len() {
            match self.inner.read(&mut buf[read..])? {
                0 if read == 0 => return Ok(None),
                0 => return Err(io::ErrorKind::UnexpectedEof.into()),
                n => read += n,
            }
        }
        Ok(Some(u32::from_le_bytes(buf)))
    }

    pub fn next_entry(&mut self) -> io::Result<Option<RawEntry>> {
        let Some(key_len) = self.next_key_len()? else {
            return Ok(None);
        };
        let mut key = vec![0u8; key_len as usize];
        self.inner.read_exact(&mut key)?;
        let value_len = self.inner.read_u64::<LittleEndian>()?;
        let mut value = vec![0u8; value_len as usize];
        self.inner.read_exact(&mut value)?;
        let key = String::from_utf8_lossy(&key).into_owned();
        Ok(Some(RawEntry { key, value }))
    }
}

impl<R: Read + Seek> CorpusReader<R> {
    /// 统计剩余记录数量，跳过 value 不读取
    ///
    /// 长度字段超出文件末尾时返回 `UnexpectedEof`
    pub fn count_records(mut self) -> io::Result<u64> {
        let start = self.inner.stream_position()?;
        let end = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(start))?;

        let mut count = 0;
        while let Some(key_len) = self.next_key_len()? {
            Self::skip(&mut self, key_len as u64, end)?;
            let value_len = self.inner.read_u64::<LittleEndian>()?;
            Self::skip(&mut self, value_len, end)?;
            count += 1;
        }
        Ok(count)
    }

    fn skip(&mut self, len: u64, end: u64) -> io::Result<()> {
        let pos = self.inner.stream_position()?;
        match pos.checked_add(len) {
            Some(next) if next <= end => {
                self.inner.seek(SeekFrom::Start(next))?;
                Ok(())
            }
            _ => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "record extends past end of file")),
        }
    }
}

impl<R: Read> Iterator for CorpusReader<R> {
    type Item = io::Result<RawEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

/// 图片库的一个分片，对应一个文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusSplit {
    pub path: PathBuf,
}

impl CorpusSplit {
    pub fn open(&self) -> Result<CorpusReader<BufReader<File>>, SystemicError> {
        CorpusReader::open(&self.path).map_err(|e| self.error(e))
    }

    pub fn count(&self) -> Result<u64, SystemicError> {
        self.open()?.count_records().map_err(|e| self.error(e))
    }

    pub(crate) fn error(&self, e: io::Error) -> SystemicError {
        match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                SystemicError::CorpusFormat { path: self.path.clone(), reason: e.to_string() }
            }
            _ => SystemicError::Corpus { path: self.path.clone(), source: e },
        }
    }
}

/// 图片库，可以是单个文件或者包含若干 `.imsq` 文件的目录
#[derive(Debug, Clone)]
pub struct Corpus {
    splits: Vec<CorpusSplit>,
}

impl Corpus {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SystemicError> {
        let path = path.as_ref();
        let meta = path
            .metadata()
            .map_err(|e| SystemicError::Corpus { path: path.to_path_buf(), source: e })?;

        let splits = if meta.is_dir() {
            let mut paths = vec![];
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry.map_err(|e| SystemicError::Corpus {
                    path: path.to_path_buf(),
                    source: e.into(),
                })?;
                let is_corpus =
                    entry.path().extension().map(|e| e == CORPUS_EXTENSION).unwrap_or(false);
                if entry.file_type().is_file() && is_corpus {
                    paths.push(entry.into_path());
                }
            }
            paths.sort();
            paths.into_iter().map(|path| CorpusSplit { path }).collect()
        } else {
            vec![CorpusSplit { path: path.to_path_buf() }]
        };

        debug!("图片库 {} 共 {} 个分片", path.display(), splits.len());
        Ok(Self { splits })
    }

    pub fn splits(&self) -> &[CorpusSplit] {
        &self.splits
    }

    /// 统计记录总数
    pub fn count(&self) -> Result<u64, SystemicError> {
        self.splits.iter().map(CorpusSplit::count).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn sample_bytes() -> Vec<u8> {
        let mut writer = CorpusWriter::new(vec![]).unwrap();
        writer.append("name=a;ext=png", &[1, 2, 3]).unwrap();
        writer.append("name=b;ext=png", &[]).unwrap();
        writer.append("name=c;ext=jpg", &[9; 100]).unwrap();
        assert_eq!(writer.count(), 3);
        writer.finish().unwrap()
    }

    #[test]
    fn test_read_entries() {
        let reader = CorpusReader::new(Cursor::new(sample_bytes())).unwrap();
        let entries = reader.collect::<io::Result<Vec<_>>>().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].key, "name=a;ext=png");
        assert_eq!(entries[0].value, vec![1, 2, 3]);
        assert!(entries[1].value.is_empty());
        assert_eq!(entries[2].value.len(), 100);
    }

    #[test]
    fn test_count() {
        let reader = CorpusReader::new(Cursor::new(sample_bytes())).unwrap();
        assert_eq!(reader.count_records().unwrap(), 3);
    }

    #[test]
    fn test_bad_header() {
        assert!(CorpusReader::new(Cursor::new(b"NOPE\x01\x00".to_vec())).is_err());
        let mut bytes = sample_bytes();
        bytes[4] = 9;
        assert!(CorpusReader::new(Cursor::new(bytes)).is_err());
    }

    #[test]
    fn test_truncated_entry() {
        let mut bytes = sample_bytes();
        bytes.truncate(bytes.len() - 10);
        let reader = CorpusReader::new(Cursor::new(bytes)).unwrap();
        let result = reader.collect::<io::Result<Vec<_>>>();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_count_invalid_length() {
        let mut bytes = CORPUS_MAGIC.to_vec();
        bytes.write_u16::<LittleEndian>(CORPUS_VERSION).unwrap();
        bytes.write_u32::<LittleEndian>(1).unwrap();
        bytes.push(b'a');
        bytes.write_u64::<LittleEndian>(u64::MAX).unwrap();

        let reader = CorpusReader::new(Cursor::new(bytes.clone())).unwrap();
        assert_eq!(reader.count_records().unwrap_err().kind(), io::ErrorKind::UnexpectedEof);

        let mut truncated = sample_bytes();
        truncated.truncate(truncated.len() - 10);
        let reader = CorpusReader::new(Cursor::new(truncated)).unwrap();
        assert_eq!(reader.count_records().unwrap_err().kind(), io::ErrorKind::UnexpectedEof);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.imsq");
        std::fs::write(&path, bytes).unwrap();
        let err = CorpusSplit { path }.count().unwrap_err();
        assert!(matches!(err, SystemicError::CorpusFormat { .. }));
    }

    #[test]
    fn test_directory_splits() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.imsq", "a.imsq", "ignored.txt"] {
            std::fs::write(dir.path().join(name), sample_bytes()).unwrap();
        }
        let corpus = Corpus::open(dir.path()).unwrap();
        let names = corpus
            .splits()
            .iter()
            .map(|s| s.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.imsq", "b.imsq"]);
        assert_eq!(corpus.count().unwrap(), 6);
    }

    #[test]
    fn test_missing_corpus() {
        let err = Corpus::open("/nonexistent/corpus.imsq").unwrap_err();
        assert!(matches!(err, SystemicError::Corpus { .. }));
    }
}
