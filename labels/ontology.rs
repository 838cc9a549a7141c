// ========================================================================================
//
//                         ONTOLOGY GRAPH: OBO PARSING AND PROPAGATION
//
// ========================================================================================

use crate::shared::files::{FileError, TextSource, open_text_source};
use crate::types::{Gene, TermId};
use ahash::AHashMap;
use log::{debug, warn};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OntologyError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error("Line {line} of ontology {path} is not valid UTF-8.")]
    InvalidUtf8 { path: PathBuf, line: usize },
    #[error("The [Term] stanza starting at line {line} of {path} has no id.")]
    MissingId { path: PathBuf, line: usize },
    #[error("Term '{term}' is defined twice in {path}.")]
    DuplicateTerm { path: PathBuf, term: TermId },
    #[error(
        "The is_a/part_of graph of {path} contains a cycle through '{term}'. Annotations cannot be propagated."
    )]
    Cycle { path: PathBuf, term: TermId },
    #[error("Ontology {0} defines no terms.")]
    Empty(PathBuf),
}

/// A `[Term]` stanza as read from the file, before parents are resolved.
#[derive(Default)]
struct Stanza {
    line: usize,
    id: Option<TermId>,
    obsolete: bool,
    parents: Vec<TermId>,
}

/// An ontology as a directed acyclic graph over `is_a` and `part_of` edges.
///
/// Terms are addressed by dense indices in file order. A topological order
/// (children before parents) is computed at load time, which both proves the
/// graph acyclic and drives annotation propagation.
#[derive(Debug)]
pub struct Ontology {
    ids: Vec<TermId>,
    obsolete: Vec<bool>,
    parents: Vec<Vec<usize>>,
    children: Vec<Vec<usize>>,
    index: AHashMap<TermId, usize>,
    leaves_first: Vec<usize>,
}

impl Ontology {
    /// Reads an OBO 1.2/1.4 file (optionally gzipped). Only `[Term]` stanzas and
    /// their `id`, `is_a`, `relationship: part_of` and `is_obsolete` tags
    /// are used.
    pub fn from_obo(path: &Path) -> Result<Self, OntologyError> {
        let mut source = open_text_source(path)?;
        let stanzas = read_stanzas(source.as_mut())?;
        let ontology = Self::from_stanzas(path, stanzas)?;
        debug!(
            "Loaded {} ontology terms from {}",
            ontology.len(),
            path.display()
        );
        Ok(ontology)
    }

    fn from_stanzas(path: &Path, stanzas: Vec<Stanza>) -> Result<Self, OntologyError> {
        if stanzas.is_empty() {
            return Err(OntologyError::Empty(path.to_path_buf()));
        }
        let n = stanzas.len();
        let mut ids = Vec::with_capacity(n);
        let mut obsolete = Vec::with_capacity(n);
        let mut index = AHashMap::with_capacity(n);
        let mut raw_parents = Vec::with_capacity(n);
        for stanza in stanzas {
            let id = stanza.id.ok_or_else(|| OntologyError::MissingId {
                path: path.to_path_buf(),
                line: stanza.line,
            })?;
            if index.insert(id.clone(), ids.len()).is_some() {
                return Err(OntologyError::DuplicateTerm {
                    path: path.to_path_buf(),
                    term: id,
                });
            }
            ids.push(id);
            obsolete.push(stanza.obsolete);
            raw_parents.push(stanza.parents);
        }

        let mut parents = vec![Vec::new(); n];
        let mut children = vec![Vec::new(); n];
        let mut dangling = 0usize;
        for (child, targets) in raw_parents.into_iter().enumerate() {
            for target in targets {
                match index.get(&target) {
                    Some(&parent) => {
                        if !parents[child].contains(&parent) {
                            parents[child].push(parent);
                            children[parent].push(child);
                        }
                    }
                    None => dangling += 1,
                }
            }
        }
        if dangling > 0 {
            warn!(
                "{dangling} is_a/part_of edges in {} point to terms outside the file and were ignored",
                path.display()
            );
        }

        let leaves_first = topological_order(&parents, &children).map_err(|term| {
            OntologyError::Cycle {
                path: path.to_path_buf(),
                term: ids[term].clone(),
            }
        })?;

        Ok(Self {
            ids,
            obsolete,
            parents,
            children,
            index,
            leaves_first,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn index_of(&self, term: &str) -> Option<usize> {
        self.index.get(term).copied()
    }

    pub fn term(&self, idx: usize) -> &str {
        &self.ids[idx]
    }

    pub fn is_obsolete(&self, idx: usize) -> bool {
        self.obsolete[idx]
    }

    pub fn parents(&self, idx: usize) -> &[usize] {
        &self.parents[idx]
    }

    /// Every term reachable upwards from `idx`, excluding `idx` itself.
    pub fn ancestors(&self, idx: usize) -> BTreeSet<usize> {
        reachable(idx, &self.parents)
    }

    /// Every term reachable downwards from `idx`, excluding `idx` itself.
    pub fn descendants(&self, idx: usize) -> BTreeSet<usize> {
        reachable(idx, &self.children)
    }

    /// Unions each term's annotations into all of its ancestors, so that a term
    /// ends up annotated with everything annotated anywhere below it.
    ///
    /// `direct` is indexed like the ontology. Propagating an already propagated
    /// annotation changes nothing.
    pub fn propagate(&self, direct: Vec<BTreeSet<Gene>>) -> Vec<BTreeSet<Gene>> {
        debug_assert_eq!(direct.len(), self.len());
        let mut annotations = direct;
        for &term in &self.leaves_first {
            if annotations[term].is_empty() {
                continue;
            }
            for &parent in &self.parents[term] {
                let genes: Vec<Gene> = annotations[term]
                    .difference(&annotations[parent])
                    .cloned()
                    .collect();
                annotations[parent].extend(genes);
            }
        }
        annotations
    }
}

fn reachable(start: usize, edges: &[Vec<usize>]) -> BTreeSet<usize> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<usize> = edges[start].clone();
    while let Some(next) = stack.pop() {
        if seen.insert(next) {
            stack.extend(edges[next].iter().copied());
        }
    }
    seen.remove(&start);
    seen
}

/// Kahn's algorithm from the leaves upwards. On a cycle, returns one term that
/// lies on or above it.
fn topological_order(
    parents: &[Vec<usize>],
    children: &[Vec<usize>],
) -> Result<Vec<usize>, usize> {
    let mut pending: Vec<usize> = children.iter().map(Vec::len).collect();
    let mut ready: Vec<usize> = (0..pending.len()).filter(|&t| pending[t] == 0).collect();
    let mut order = Vec::with_capacity(pending.len());
    while let Some(term) = ready.pop() {
        order.push(term);
        for &parent in &parents[term] {
            pending[parent] -= 1;
            if pending[parent] == 0 {
                ready.push(parent);
            }
        }
    }
    if order.len() == pending.len() {
        Ok(order)
    } else {
        Err((0..pending.len()).find(|&t| pending[t] > 0).unwrap_or(0))
    }
}

fn read_stanzas(source: &mut dyn TextSource) -> Result<Vec<Stanza>, OntologyError> {
    let path = source.path().to_path_buf();
    let mut stanzas = Vec::new();
    let mut current: Option<Stanza> = None;
    let mut line_no = 0usize;

    while let Some(raw) = source.next_line()? {
        line_no += 1;
        let line = std::str::from_utf8(raw)
            .map_err(|_| OntologyError::InvalidUtf8 {
                path: path.clone(),
                line: line_no,
            })?
            .trim();
        if line.is_empty() || line.starts_with('!') {
            continue;
        }
        if line.starts_with('[') {
            stanzas.extend(current.take());
            if line == "[Term]" {
                current = Some(Stanza {
                    line: line_no,
                    ..Stanza::default()
                });
            }
            continue;
        }
        let Some(stanza) = current.as_mut() else {
            continue;
        };
        let Some((tag, value)) = line.split_once(':') else {
            continue;
        };
        let value = strip_comment(value);
        match tag.trim() {
            "id" => stanza.id = Some(value.to_string()),
            "is_obsolete" => stanza.obsolete = value == "true",
            "is_a" => {
                if let Some(target) = value.split_whitespace().next() {
                    stanza.parents.push(target.to_string());
                }
            }
            "relationship" => {
                let mut fields = value.split_whitespace();
                if let (Some("part_of"), Some(target)) = (fields.next(), fields.next()) {
                    stanza.parents.push(target.to_string());
                }
            }
            _ => {}
        }
    }
    stanzas.extend(current);
    Ok(stanzas)
}

/// Drops a trailing `! comment` and surrounding whitespace from a tag value.
fn strip_comment(value: &str) -> &str {
    match value.find(" !") {
        Some(pos) => value[..pos].trim(),
        None => value.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SMALL_OBO: &str = "\
format-version: 1.2
ontology: test

[Term]
id: T:root
name: root

[Term]
id: T:organ
name: organ disease
is_a: T:root ! root

[Term]
id: T:heart
name: heart disease
is_a: T:organ ! organ disease

[Term]
id: T:valve
name: valve disease
relationship: part_of T:heart ! heart disease
relationship: has_part T:root

[Term]
id: T:old
name: retired
is_obsolete: true

[Typedef]
id: part_of
name: part of
";

    fn write_obo(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(".obo").unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn set(genes: &[&str]) -> BTreeSet<Gene> {
        genes.iter().map(|g| g.to_string()).collect()
    }

    #[test]
    fn parses_terms_and_edges() {
        let file = write_obo(SMALL_OBO);
        let ontology = Ontology::from_obo(file.path()).unwrap();

        let ids: Vec<&str> = (0..ontology.len()).map(|idx| ontology.term(idx)).collect();
        assert_eq!(ids, vec!["T:root", "T:organ", "T:heart", "T:valve", "T:old"]);
        let valve = ontology.index_of("T:valve").unwrap();
        let heart = ontology.index_of("T:heart").unwrap();
        assert_eq!(ontology.parents(valve), &[heart]);
        assert!(ontology.is_obsolete(ontology.index_of("T:old").unwrap()));

        let root = ontology.index_of("T:root").unwrap();
        assert_eq!(ontology.ancestors(valve).len(), 3);
        assert!(ontology.descendants(root).contains(&valve));
        assert!(ontology.descendants(valve).is_empty());
    }

    #[test]
    fn propagation_is_monotone_and_idempotent() {
        let file = write_obo(SMALL_OBO);
        let ontology = Ontology::from_obo(file.path()).unwrap();
        let mut direct = vec![BTreeSet::new(); ontology.len()];
        direct[ontology.index_of("T:valve").unwrap()] = set(&["G1", "G2"]);
        direct[ontology.index_of("T:heart").unwrap()] = set(&["G3"]);
        direct[ontology.index_of("T:organ").unwrap()] = set(&["G4"]);

        let once = ontology.propagate(direct);
        assert_eq!(once[ontology.index_of("T:root").unwrap()], set(&["G1", "G2", "G3", "G4"]));
        assert_eq!(once[ontology.index_of("T:heart").unwrap()], set(&["G1", "G2", "G3"]));
        for term in 0..ontology.len() {
            for ancestor in ontology.ancestors(term) {
                assert!(once[term].is_subset(&once[ancestor]));
            }
        }

        let twice = ontology.propagate(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn cycles_are_rejected() {
        let file = write_obo(
            "[Term]\nid: A\nis_a: B\n\n[Term]\nid: B\nis_a: C\n\n[Term]\nid: C\nis_a: A\n",
        );
        assert!(matches!(
            Ontology::from_obo(file.path()),
            Err(OntologyError::Cycle { .. })
        ));
    }

    #[test]
    fn malformed_stanzas_are_rejected() {
        let file = write_obo("[Term]\nname: nameless\n");
        assert!(matches!(
            Ontology::from_obo(file.path()),
            Err(OntologyError::MissingId { line: 1, .. })
        ));

        let file = write_obo("[Term]\nid: A\n\n[Term]\nid: A\n");
        assert!(matches!(
            Ontology::from_obo(file.path()),
            Err(OntologyError::DuplicateTerm { .. })
        ));

        let file = write_obo("format-version: 1.2\n");
        assert!(matches!(
            Ontology::from_obo(file.path()),
            Err(OntologyError::Empty(_))
        ));
    }

    #[test]
    fn edges_to_unknown_terms_are_ignored() {
        let file = write_obo("[Term]\nid: A\nis_a: EXT:1 ! elsewhere\n");
        let ontology = Ontology::from_obo(file.path()).unwrap();
        assert!(ontology.parents(0).is_empty());
    }
}
