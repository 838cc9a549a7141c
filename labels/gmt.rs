use crate::shared::files::{FileError, open_text_source};
use crate::types::{Gene, TermId};
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GmtError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error("Line {line} of gene-set file {path} is not valid UTF-8.")]
    InvalidUtf8 { path: PathBuf, line: usize },
    #[error(
        "Line {line} of gene-set file {path} has fewer than two tab-separated fields (id and description)."
    )]
    MalformedLine { path: PathBuf, line: usize },
}

/// Gene sets keyed by their identifier, as read from a GMT file
/// (`id<TAB>description<TAB>gene<TAB>gene...`).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GeneSets {
    sets: BTreeMap<TermId, BTreeSet<Gene>>,
}

impl GeneSets {
    /// Reads a GMT file, optionally gzipped. A set id that appears on several lines
    /// gets the union of their genes.
    pub fn from_gmt(path: &Path) -> Result<Self, GmtError> {
        let mut source = open_text_source(path)?;
        let mut sets: BTreeMap<TermId, BTreeSet<Gene>> = BTreeMap::new();
        let mut line_no = 0usize;
        let mut repeated = 0usize;

        while let Some(raw) = source.next_line()? {
            line_no += 1;
            let line = std::str::from_utf8(raw).map_err(|_| GmtError::InvalidUtf8 {
                path: path.to_path_buf(),
                line: line_no,
            })?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split('\t');
            let (Some(id), Some(_description)) = (fields.next(), fields.next()) else {
                return Err(GmtError::MalformedLine {
                    path: path.to_path_buf(),
                    line: line_no,
                });
            };
            let id = id.trim();
            if id.is_empty() {
                return Err(GmtError::MalformedLine {
                    path: path.to_path_buf(),
                    line: line_no,
                });
            }
            let genes = fields
                .map(str::trim)
                .filter(|gene| !gene.is_empty())
                .map(str::to_string);
            if let Some(existing) = sets.get_mut(id) {
                repeated += 1;
                existing.extend(genes);
            } else {
                sets.insert(id.to_string(), genes.collect());
            }
        }

        if repeated > 0 {
            warn!(
                "{repeated} gene sets in {} repeat an earlier id; their genes were merged",
                path.display()
            );
        }
        debug!("Read {} gene sets from {}", sets.len(), path.display());
        Ok(Self { sets })
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&BTreeSet<Gene>> {
        self.sets.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<Gene>)> {
        self.sets.iter().map(|(id, genes)| (id.as_str(), genes))
    }
}

impl FromIterator<(TermId, BTreeSet<Gene>)> for GeneSets {
    fn from_iter<I: IntoIterator<Item = (TermId, BTreeSet<Gene>)>>(iter: I) -> Self {
        let mut sets: BTreeMap<TermId, BTreeSet<Gene>> = BTreeMap::new();
        for (id, genes) in iter {
            sets.entry(id).or_default().extend(genes);
        }
        Self { sets }
    }
}
