use flate2::read::MultiGzDecoder;
use log::debug;
use memmap2::Mmap;
use natord::compare;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while opening or reading an input file.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("Opening {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("Error reading {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("Memory-mapping {path}: {source}")]
    Map { path: PathBuf, source: io::Error },
    #[error("Listing directory {path}: {source}")]
    List { path: PathBuf, source: io::Error },
}

/// A trait that abstracts sequential, line-oriented access to text inputs
/// (matrix edge lists, GMT, OBO, label files) regardless of compression.
pub trait TextSource: Send {
    /// The path this source reads from, used to build error messages.
    fn path(&self) -> &Path;

    /// Returns the next line with its trailing `\n` / `\r\n` stripped, or `None`
    /// at end of input.
    fn next_line<'a>(&'a mut self) -> Result<Option<&'a [u8]>, FileError>;
}

/// Opens `path` for line-oriented reading. Files ending in `.gz` are decoded
/// transparently.
pub fn open_text_source(path: &Path) -> Result<Box<dyn TextSource>, FileError> {
    let file = File::open(path).map_err(|source| FileError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    if is_gzipped(path) {
        debug!("Reading {} through a gzip decoder", path.display());
        Ok(Box::new(LineReader::new(
            path,
            BufReader::new(MultiGzDecoder::new(file)),
        )))
    } else {
        Ok(Box::new(LineReader::new(path, BufReader::new(file))))
    }
}

/// Returns `true` when the final extension of `path` is `gz`.
pub fn is_gzipped(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// The extension that identifies the format of `path`, looking through a
/// trailing `.gz` (so `net.dat.gz` yields `dat`). Lower-cased.
pub fn format_extension(path: &Path) -> Option<String> {
    let stem_path = if is_gzipped(path) {
        Path::new(path.file_stem()?)
    } else {
        path
    };
    stem_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Memory-maps a local file read-only.
pub fn map_file(path: &Path) -> Result<Mmap, FileError> {
    let file = File::open(path).map_err(|source| FileError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    // The mapping is only ever read; the input file is not expected to change while
    // the run is in progress.
    unsafe { Mmap::map(&file) }.map_err(|source| FileError::Map {
        path: path.to_path_buf(),
        source,
    })
}

/// Lists the regular, non-hidden files directly inside `dir`, in natural order.
pub fn list_files_sorted(dir: &Path) -> Result<Vec<PathBuf>, FileError> {
    let list_err = |source| FileError::List {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(list_err)? {
        let entry = entry.map_err(list_err)?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !path.is_file() {
            continue;
        }
        entries.push(path);
    }
    entries.sort_by(|a, b| compare_paths(a, b));
    Ok(entries)
}

fn compare_paths(a: &Path, b: &Path) -> std::cmp::Ordering {
    compare(&a.to_string_lossy(), &b.to_string_lossy())
}

struct LineReader<R: Read + Send> {
    reader: BufReader<R>,
    line: Vec<u8>,
    path: PathBuf,
}

impl<R: Read + Send> LineReader<R> {
    fn new(path: &Path, reader: BufReader<R>) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(1024),
            path: path.to_path_buf(),
        }
    }
}

impl<R: Read + Send> TextSource for LineReader<R> {
    fn path(&self) -> &Path {
        &self.path
    }

    fn next_line<'a>(&'a mut self) -> Result<Option<&'a [u8]>, FileError> {
        self.line.clear();
        let bytes_read = self
            .reader
            .read_until(b'\n', &mut self.line)
            .map_err(|source| FileError::Read {
                path: self.path.clone(),
                source,
            })?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if self.line.last() == Some(&b'\n') {
            self.line.pop();
        }
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }

        Ok(Some(&self.line))
    }
}
