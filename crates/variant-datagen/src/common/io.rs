//! ファイルI/Oユーティリティ（gzip対応、追記モードあり）

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const READER_BUF_CAP: usize = 128 * 1024; // 128 KiB

pub fn open_reader<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let p = path.as_ref();
    if p.to_string_lossy() == "-" {
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, io::stdin())));
    }
    let f = File::open(p)?;
    let ext = p.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();

    if ext == "gz" {
        let dec = flate2::read::GzDecoder::new(f);
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, dec)));
    }
    Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, f)))
}

/// Writer wrapper to propagate finish/close errors for compressed outputs.
#[must_use = "call .close() to propagate compression/IO errors"]
pub enum OutputWriter {
    Plain(BufWriter<File>),
    Stdout(std::io::Stdout),
    Gz(flate2::write::GzEncoder<File>),
}

impl Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputWriter::Plain(f) => f.write(buf),
            OutputWriter::Stdout(s) => s.write(buf),
            OutputWriter::Gz(e) => e.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputWriter::Plain(f) => f.flush(),
            OutputWriter::Stdout(s) => s.flush(),
            OutputWriter::Gz(e) => e.flush(),
        }
    }
}

impl OutputWriter {
    /// Finalize the stream and flush underlying file/stdout.
    pub fn close(self) -> io::Result<()> {
        match self {
            OutputWriter::Plain(f) => {
                let mut file = f.into_inner().map_err(|e| e.into_error())?;
                file.flush()
            }
            OutputWriter::Stdout(mut s) => s.flush(),
            OutputWriter::Gz(e) => {
                let mut f = e.finish()?;
                f.flush()
            }
        }
    }
}

/// `append` が true なら既存ファイルの末尾に追記、false なら作り直す。
/// `.gz` への追記は新しい gzip メンバーとして書かれる（連結 gzip は正当な形式）。
pub fn open_writer<P: AsRef<Path>>(path: P, append: bool) -> io::Result<OutputWriter> {
    let p = path.as_ref();
    if p.to_string_lossy() == "-" {
        return Ok(OutputWriter::Stdout(std::io::stdout()));
    }
    let mut opts = OpenOptions::new();
    opts.write(true).create(true);
    if append {
        opts.append(true);
    } else {
        opts.truncate(true);
    }
    let f = opts.open(p)?;
    let ext = p.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
    if ext == "gz" {
        let enc = flate2::write::GzEncoder::new(f, flate2::Compression::default());
        return Ok(OutputWriter::Gz(enc));
    }
    Ok(OutputWriter::Plain(BufWriter::new(f)))
}
