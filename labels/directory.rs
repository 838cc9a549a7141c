use super::{LabelError, LabelSource};
use crate::shared::files::{TextSource, list_files_sorted, open_text_source};
use crate::types::{Gene, LabelSet, NegativeSet, TermId};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Labels read from a directory holding one file per term.
///
/// The file name is the term id. Each line is `gene<TAB>label` where the label is
/// `1` (positive), `-1` (negative) or `0` (ignored); blank lines and `#` comments
/// are skipped. A file without any negative line leaves negatives implicit.
pub struct DirectoryLabels {
    terms: Vec<TermId>,
    labels: BTreeMap<TermId, LabelSet>,
}

impl DirectoryLabels {
    /// Reads every label file up front; the source is read-only afterwards.
    pub fn load(dir: &Path) -> Result<Self, LabelError> {
        let files = list_files_sorted(dir)?;
        let mut terms = Vec::with_capacity(files.len());
        let mut labels = BTreeMap::new();
        for path in files {
            let term = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| LabelError::InvalidTermFile(path.clone()))?
                .to_string();
            let mut source = open_text_source(&path)?;
            let set = read_label_file(source.as_mut())?;
            debug!("{term}: {} positives", set.n_positives());
            terms.push(term.clone());
            labels.insert(term, set);
        }
        info!("Read labels of {} terms from {}", terms.len(), dir.display());
        Ok(Self { terms, labels })
    }
}

impl LabelSource for DirectoryLabels {
    fn get_terms(&self) -> Vec<TermId> {
        self.terms.clone()
    }

    fn get_labels(&self, term: &str) -> Result<LabelSet, LabelError> {
        self.labels
            .get(term)
            .cloned()
            .ok_or_else(|| LabelError::TermNotFound(term.to_string()))
    }

    fn n_positives(&self, term: &str) -> Result<usize, LabelError> {
        self.labels
            .get(term)
            .map(LabelSet::n_positives)
            .ok_or_else(|| LabelError::TermNotFound(term.to_string()))
    }
}

fn read_label_file(source: &mut dyn TextSource) -> Result<LabelSet, LabelError> {
    let path = source.path().to_path_buf();
    let malformed = |line: usize| LabelError::MalformedLabel {
        path: path.clone(),
        line,
    };
    let mut positives: BTreeSet<Gene> = BTreeSet::new();
    let mut negatives: BTreeSet<Gene> = BTreeSet::new();
    let mut line_no = 0usize;

    while let Some(raw) = source.next_line()? {
        line_no += 1;
        let line = std::str::from_utf8(raw).map_err(|_| malformed(line_no))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split('\t').map(str::trim);
        let (Some(gene), Some(label)) = (fields.next(), fields.next()) else {
            return Err(malformed(line_no));
        };
        if gene.is_empty() {
            return Err(malformed(line_no));
        }
        match label {
            "1" => {
                positives.insert(gene.to_string());
            }
            "-1" => {
                negatives.insert(gene.to_string());
            }
            "0" => {}
            _ => return Err(malformed(line_no)),
        }
    }

    let conflicting = negatives.intersection(&positives).count();
    if conflicting > 0 {
        warn!(
            "{conflicting} genes in {} are labeled both positive and negative; they are kept as positives",
            path.display()
        );
    }
    let negatives = if negatives.is_empty() {
        NegativeSet::Complement {
            excluded: BTreeSet::new(),
        }
    } else {
        NegativeSet::Explicit(negatives)
    };
    Ok(LabelSet::new(positives, negatives))
}
