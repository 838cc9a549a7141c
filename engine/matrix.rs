// ========================================================================================
//
//                       THE ASSOCIATION MATRIX: THE FEATURE SPACE
//
// ========================================================================================
//
// A symmetric gene x gene lookup loaded once per run and shared read-only by every
// worker. Values are kept as the strict upper triangle, row by row, which is also the
// on-disk layout of Sleipnir `.dab` files; that lets a `.dab` input be memory-mapped
// and used in place. `NaN` marks a missing pair.

use crate::shared::files::{FileError, format_extension, map_file, open_text_source};
use crate::types::Gene;
use ahash::AHashMap;
use log::{debug, warn};
use memmap2::Mmap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The value used for missing pairs unless configured otherwise.
pub const DEFAULT_MISSING_VALUE: f64 = 0.0;

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error(
        "Unsupported association matrix format for {0}. Expected .dab, .dat, .tsv or .txt (text formats may be gzipped)."
    )]
    UnsupportedFormat(PathBuf),
    #[error("DAB file {path} is truncated while reading {section}")]
    Truncated { path: PathBuf, section: &'static str },
    #[error("DAB file {path} contains a gene name that is not valid UTF-16 (gene #{position})")]
    InvalidGeneName { path: PathBuf, position: usize },
    #[error("Association matrix {path} lists gene '{gene}' more than once")]
    DuplicateGene { path: PathBuf, gene: Gene },
    #[error("{path}:{line}: expected 'gene<TAB>gene<TAB>value'")]
    MalformedLine { path: PathBuf, line: usize },
    #[error("{path}:{line}: could not parse association value '{value}'")]
    InvalidValue {
        path: PathBuf,
        line: usize,
        value: String,
    },
    #[error("Association matrix {0} contains no genes")]
    Empty(PathBuf),
}

enum Values {
    Owned(Vec<f32>),
    Mapped { map: Mmap, offset: usize },
}

impl Values {
    #[inline]
    fn get(&self, idx: usize) -> f32 {
        match self {
            Self::Owned(values) => values[idx],
            Self::Mapped { map, offset } => {
                let at = offset + idx * 4;
                f32::from_le_bytes([map[at], map[at + 1], map[at + 2], map[at + 3]])
            }
        }
    }
}

/// Number of stored pairs for `n` genes.
fn triangle_len(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Read-only gene x gene association lookup.
pub struct AssociationMatrix {
    genes: Vec<Gene>,
    index: AHashMap<Gene, usize>,
    values: Values,
    missing_value: f64,
}

impl std::fmt::Debug for AssociationMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssociationMatrix")
            .field("genes", &self.genes.len())
            .field("missing_value", &self.missing_value)
            .finish()
    }
}

impl AssociationMatrix {
    /// Loads a matrix, choosing the reader from the file extension.
    pub fn open(path: &Path, missing_value: f64) -> Result<Self, MatrixError> {
        match format_extension(path).as_deref() {
            Some("dab") if !crate::shared::files::is_gzipped(path) => {
                read_dab(path, missing_value)
            }
            Some("dat") | Some("tsv") | Some("txt") => read_dat(path, missing_value),
            _ => Err(MatrixError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// All genes in matrix order.
    pub fn genes(&self) -> &[Gene] {
        &self.genes
    }

    pub fn gene(&self, idx: usize) -> &str {
        &self.genes[idx]
    }

    pub fn index_of(&self, gene: &str) -> Option<usize> {
        self.index.get(gene).copied()
    }

    pub fn missing_value(&self) -> f64 {
        self.missing_value
    }

    /// The stored association of two genes, or `None` when the pair is missing.
    /// The diagonal is never stored.
    #[inline]
    pub fn get(&self, a: usize, b: usize) -> Option<f64> {
        if a == b {
            return None;
        }
        let (i, j) = if a < b { (a, b) } else { (b, a) };
        let n = self.genes.len();
        let idx = i * (2 * n - i - 1) / 2 + (j - i - 1);
        let value = self.values.get(idx);
        if value.is_nan() {
            None
        } else {
            Some(f64::from(value))
        }
    }

    /// The association of two genes with missing pairs resolved to the
    /// configured default.
    #[inline]
    pub fn value(&self, a: usize, b: usize) -> f64 {
        self.get(a, b).unwrap_or(self.missing_value)
    }

    /// Whether the gene at `row` has at least one stored association.
    pub fn row_has_data(&self, row: usize) -> bool {
        (0..self.genes.len()).any(|other| self.get(row, other).is_some())
    }
}

/// Accumulates pairs for an in-memory matrix. Genes are registered in order of
/// first appearance; the last value given for a pair wins.
pub struct MatrixBuilder {
    genes: Vec<Gene>,
    index: AHashMap<Gene, usize>,
    pairs: Vec<(usize, usize, f32)>,
}

impl Default for MatrixBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MatrixBuilder {
    pub fn new() -> Self {
        Self {
            genes: Vec::new(),
            index: AHashMap::new(),
            pairs: Vec::new(),
        }
    }

    /// Registers a gene without any association.
    pub fn add_gene(&mut self, gene: &str) -> usize {
        if let Some(&idx) = self.index.get(gene) {
            return idx;
        }
        let idx = self.genes.len();
        self.genes.push(gene.to_string());
        self.index.insert(gene.to_string(), idx);
        idx
    }

    /// Records the association of `a` and `b`. Self pairs are ignored.
    pub fn add_pair(&mut self, a: &str, b: &str, value: f32) {
        let ia = self.add_gene(a);
        let ib = self.add_gene(b);
        if ia != ib {
            self.pairs.push((ia, ib, value));
        }
    }

    pub fn build(self, missing_value: f64) -> AssociationMatrix {
        let n = self.genes.len();
        let mut values = vec![f32::NAN; triangle_len(n)];
        for (a, b, value) in self.pairs {
            let (i, j) = if a < b { (a, b) } else { (b, a) };
            values[i * (2 * n - i - 1) / 2 + (j - i - 1)] = value;
        }
        AssociationMatrix {
            genes: self.genes,
            index: self.index,
            values: Values::Owned(values),
            missing_value,
        }
    }
}

fn build_index(path: &Path, genes: &[Gene]) -> Result<AHashMap<Gene, usize>, MatrixError> {
    let mut index = AHashMap::with_capacity(genes.len());
    for (idx, gene) in genes.iter().enumerate() {
        if index.insert(gene.clone(), idx).is_some() {
            return Err(MatrixError::DuplicateGene {
                path: path.to_path_buf(),
                gene: gene.clone(),
            });
        }
    }
    Ok(index)
}

/// Reads a Sleipnir `.dab` file: a little-endian `u32` gene count, the gene names
/// as NUL-terminated UTF-16LE strings, then the upper triangle as `f32` values.
fn read_dab(path: &Path, missing_value: f64) -> Result<AssociationMatrix, MatrixError> {
    let map = map_file(path)?;
    let truncated = |section| MatrixError::Truncated {
        path: path.to_path_buf(),
        section,
    };

    if map.len() < 4 {
        return Err(truncated("the gene count"));
    }
    let n = u32::from_le_bytes([map[0], map[1], map[2], map[3]]) as usize;
    if n == 0 {
        return Err(MatrixError::Empty(path.to_path_buf()));
    }

    let mut offset = 4usize;
    let mut genes = Vec::with_capacity(n);
    let mut units: Vec<u16> = Vec::with_capacity(32);
    for position in 0..n {
        units.clear();
        loop {
            if offset + 2 > map.len() {
                return Err(truncated("the gene names"));
            }
            let unit = u16::from_le_bytes([map[offset], map[offset + 1]]);
            offset += 2;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        let name = String::from_utf16(&units).map_err(|_| MatrixError::InvalidGeneName {
            path: path.to_path_buf(),
            position,
        })?;
        genes.push(name);
    }

    let expected_bytes = triangle_len(n) * 4;
    let available = map.len() - offset;
    if available < expected_bytes {
        return Err(truncated("the association values"));
    }
    if available > expected_bytes {
        warn!(
            "{} has {} trailing bytes after the association values; ignoring them",
            path.display(),
            available - expected_bytes
        );
    }

    let index = build_index(path, &genes)?;
    debug!(
        "Mapped {} genes ({} pairs) from {}",
        n,
        triangle_len(n),
        path.display()
    );
    Ok(AssociationMatrix {
        genes,
        index,
        values: Values::Mapped { map, offset },
        missing_value,
    })
}

/// Reads a tab-separated edge list `gene1<TAB>gene2<TAB>value`. Blank lines and
/// lines starting with `#` are skipped.
fn read_dat(path: &Path, missing_value: f64) -> Result<AssociationMatrix, MatrixError> {
    let mut source = open_text_source(path)?;
    let mut builder = MatrixBuilder::new();
    let mut line_number = 0usize;

    while let Some(line) = source.next_line()? {
        line_number += 1;
        if line.is_empty() || line[0] == b'#' {
            continue;
        }
        let mut fields = line.split(|&b| b == b'\t');
        let (Some(a), Some(b), Some(raw)) = (fields.next(), fields.next(), fields.next()) else {
            return Err(MatrixError::MalformedLine {
                path: path.to_path_buf(),
                line: line_number,
            });
        };
        let raw = raw.trim_ascii();
        let value = if raw.eq_ignore_ascii_case(b"nan") {
            f32::NAN
        } else {
            lexical_core::parse::<f32>(raw).map_err(|_| MatrixError::InvalidValue {
                path: path.to_path_buf(),
                line: line_number,
                value: String::from_utf8_lossy(raw).into_owned(),
            })?
        };
        builder.add_pair(
            &String::from_utf8_lossy(a.trim_ascii()),
            &String::from_utf8_lossy(b.trim_ascii()),
            value,
        );
    }

    if builder.genes.is_empty() {
        return Err(MatrixError::Empty(path.to_path_buf()));
    }
    debug!(
        "Read {} pairs over {} genes from {}",
        builder.pairs.len(),
        builder.genes.len(),
        path.display()
    );
    Ok(builder.build(missing_value))
}
