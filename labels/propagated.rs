use super::{GeneSets, LabelError, LabelSource, Ontology};
use crate::shared::files::open_text_source;
use crate::types::{Gene, LabelSet, NegativeSet, TermId};
use log::{info, warn};
use natord::compare;
use std::collections::BTreeSet;
use std::path::Path;

/// Labels derived from gene sets attached to ontology terms and propagated up
/// the `is_a`/`part_of` graph.
///
/// A term's positives are every gene annotated to it or to any of its
/// descendants. Without a slim, negatives are all other genes. With a slim, they
/// are the genes of slim terms unrelated to the term, minus anything annotated to a
/// related slim term.
pub struct OntologyLabels {
    ontology: Ontology,
    annotations: Vec<BTreeSet<Gene>>,
    slim: Option<Vec<usize>>,
}

impl OntologyLabels {
    /// Attaches `sets` to the terms of `ontology` with the same id and propagates.
    /// Sets whose id is not an ontology term are ignored.
    pub fn new(ontology: Ontology, sets: &GeneSets) -> Self {
        let mut direct = vec![BTreeSet::new(); ontology.len()];
        let mut unknown = 0usize;
        for (id, genes) in sets.iter() {
            match ontology.index_of(id) {
                Some(idx) => direct[idx].extend(genes.iter().cloned()),
                None => unknown += 1,
            }
        }
        if unknown > 0 {
            warn!("{unknown} gene sets name terms that are not in the ontology and were ignored");
        }
        let annotations = ontology.propagate(direct);
        Self {
            ontology,
            annotations,
            slim: None,
        }
    }

    /// Restricts negatives to the genes of the given slim terms. Slim ids that are
    /// not in the ontology are ignored with a warning.
    pub fn with_slim(mut self, slim: &[TermId]) -> Self {
        let mut terms = Vec::with_capacity(slim.len());
        for id in slim {
            match self.ontology.index_of(id) {
                Some(idx) => {
                    if !terms.contains(&idx) {
                        terms.push(idx);
                    }
                }
                None => warn!("Slim term '{id}' is not in the ontology and was ignored"),
            }
        }
        self.slim = Some(terms);
        self
    }

    /// Loads the ontology, the gene sets and, when given, the slim list.
    pub fn load(obo: &Path, gmt: &Path, slim: Option<&Path>) -> Result<Self, LabelError> {
        let ontology = Ontology::from_obo(obo)?;
        let sets = GeneSets::from_gmt(gmt)?;
        info!(
            "Ontology: {} terms; gene sets: {}",
            ontology.len(),
            sets.len()
        );
        let labels = Self::new(ontology, &sets);
        match slim {
            Some(path) => {
                let slim_terms = read_slim(path)?;
                info!("Slim: {} terms", slim_terms.len());
                Ok(labels.with_slim(&slim_terms))
            }
            None => Ok(labels),
        }
    }

    /// Propagated annotations of `term`.
    pub fn annotations(&self, term: &str) -> Option<&BTreeSet<Gene>> {
        self.ontology
            .index_of(term)
            .map(|idx| &self.annotations[idx])
    }

    fn slim_negatives(&self, term: usize, slim: &[usize]) -> BTreeSet<Gene> {
        let mut related = self.ontology.ancestors(term);
        related.extend(self.ontology.descendants(term));
        related.insert(term);

        let mut negatives = BTreeSet::new();
        let mut excluded = BTreeSet::new();
        for &slim_term in slim {
            let target = if related.contains(&slim_term) {
                &mut excluded
            } else {
                &mut negatives
            };
            target.extend(self.annotations[slim_term].iter().cloned());
        }
        negatives.retain(|gene| !excluded.contains(gene));
        negatives
    }
}

impl LabelSource for OntologyLabels {
    fn get_terms(&self) -> Vec<TermId> {
        let mut terms: Vec<TermId> = (0..self.ontology.len())
            .filter(|&idx| !self.ontology.is_obsolete(idx))
            .map(|idx| self.ontology.term(idx).to_string())
            .collect();
        terms.sort_by(|a, b| compare(a, b));
        terms
    }

    fn get_labels(&self, term: &str) -> Result<LabelSet, LabelError> {
        let idx = self
            .ontology
            .index_of(term)
            .ok_or_else(|| LabelError::TermNotFound(term.to_string()))?;
        let positives = self.annotations[idx].clone();
        let negatives = match &self.slim {
            None => NegativeSet::Complement {
                excluded: BTreeSet::new(),
            },
            Some(slim) => NegativeSet::Explicit(self.slim_negatives(idx, slim)),
        };
        Ok(LabelSet::new(positives, negatives))
    }

    fn n_positives(&self, term: &str) -> Result<usize, LabelError> {
        self.annotations(term)
            .map(BTreeSet::len)
            .ok_or_else(|| LabelError::TermNotFound(term.to_string()))
    }
}

/// One term id per line; blank lines and `#`/`!` comments are skipped and anything
/// after the first whitespace is ignored.
fn read_slim(path: &Path) -> Result<Vec<TermId>, LabelError> {
    let mut source = open_text_source(path)?;
    let mut terms = Vec::new();
    while let Some(raw) = source.next_line()? {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        if let Some(id) = line.split_whitespace().next() {
            terms.push(id.to_string());
        }
    }
    Ok(terms)
}
