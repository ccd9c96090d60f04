use std::io::Write;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::config::OutputFormat;
use crate::shard::ShardEntry;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {per_sec} {msg}")
        .expect("invalid progress template")
        .progress_chars("##-")
}

/// 创建进度条，`visible` 为 false 时不输出任何内容
pub fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if visible { ProgressBar::new(len).with_style(pb_style()) } else { ProgressBar::hidden() }
}

pub fn print_result(result: &[ShardEntry], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            let mut out = std::io::stdout().lock();
            for entry in result {
                writeln!(out, "{:.4}\t{}", entry.score, entry.key)?;
            }
        }
    }
    Ok(())
}

/// 以 JSON 或者 `名称\t值` 的形式输出
pub fn print_pairs<T: Serialize>(
    value: &T,
    pairs: &[(&str, String)],
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Table => {
            for (k, v) in pairs {
                println!("{}\t{}", k, v);
            }
        }
    }
    Ok(())
}
