use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::common::io::open_reader;

/// 開始局面ブック（1行1FEN、`#` 行と空行は無視、gzip可）をロードする。
pub fn load_book(path: &Path) -> Result<Vec<String>> {
    let reader =
        open_reader(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut fens = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        fens.push(trimmed.to_string());
    }
    if fens.is_empty() {
        bail!("no usable positions found in {}", path.display());
    }
    Ok(fens)
}
