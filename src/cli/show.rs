use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use log::info;
use serde::Serialize;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, OutputFormat};
use crate::pipeline::SUCCESS_MARKER;
use crate::shard::{ShardEntry, count_inversions, list_shards, read_shard};
use crate::utils::print_result;

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    /// 结果目录
    pub dir: PathBuf,
    /// 显示的结果数量
    #[arg(short = 'n', long, value_name = "COUNT", default_value_t = 10)]
    pub count: usize,
    /// 检查分片拼接后是否全局有序
    #[arg(long)]
    pub verify: bool,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Serialize)]
struct Verification {
    records: usize,
    shards: usize,
    inversions: u64,
}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        if !self.dir.join(SUCCESS_MARKER).exists() {
            bail!("{} 中没有已提交的结果", self.dir.display());
        }

        let shards = list_shards(&self.dir)?;
        let mut entries: Vec<ShardEntry> = vec![];
        for path in &shards {
            entries.extend(read_shard(path)?);
        }
        info!("共 {} 个分片，{} 条结果", shards.len(), entries.len());

        if self.verify {
            let scores = entries.iter().map(|e| e.score).collect::<Vec<_>>();
            let verification = Verification {
                records: entries.len(),
                shards: shards.len(),
                inversions: count_inversions(&scores),
            };
            match self.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&verification)?),
                OutputFormat::Table => println!("逆序对: {}", verification.inversions),
            }
            return Ok(());
        }

        entries.truncate(self.count);
        print_result(&entries, self.format)
    }
}
