//! The fixed label universe: terms, optional descriptions, lookups by id.
//!
//! Terms are addressed by their position among the distinct, non-blank lines
//! of the term file. The order is significant: it breaks score ties. The
//! description file stays aligned with the term file line for line.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use ontolabel_core::{ConfigError, PipelineConfig};
use tracing::{info, warn};

/// Position of a term in the ontology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermId(pub usize);

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Ontology {
    name: String,
    terms: Vec<String>,
    descriptions: Option<Vec<String>>,
    ids: HashMap<String, TermId>,
    /// Source line of each kept term.
    lines: Vec<usize>,
    source_lines: usize,
}

impl Ontology {
    /// Build from raw term lines. Blank lines and repeats of an earlier term
    /// are dropped; the first occurrence keeps its place.
    pub fn new(name: impl Into<String>, lines: Vec<String>) -> Self {
        let name = name.into();
        let source_lines = lines.len();
        let mut ids = HashMap::with_capacity(source_lines);
        let mut terms = Vec::with_capacity(source_lines);
        let mut kept = Vec::with_capacity(source_lines);
        let (mut blank, mut repeated) = (0usize, 0usize);

        for (line, term) in lines.into_iter().enumerate() {
            if term.trim().is_empty() {
                blank += 1;
                continue;
            }
            if ids.contains_key(&term) {
                repeated += 1;
                continue;
            }
            ids.insert(term.clone(), TermId(terms.len()));
            terms.push(term);
            kept.push(line);
        }
        if blank + repeated > 0 {
            warn!(ontology = %name, blank, repeated, "dropped ontology lines");
        }

        Self {
            name,
            terms,
            descriptions: None,
            ids,
            lines: kept,
            source_lines,
        }
    }

    /// Attach descriptions, line-aligned with the term lines this ontology
    /// was built from.
    pub fn with_descriptions(mut self, descriptions: Vec<String>) -> Result<Self, ConfigError> {
        if descriptions.len() != self.source_lines {
            return Err(ConfigError::invalid(
                "description_path",
                format!(
                    "{} descriptions for {} term lines",
                    descriptions.len(),
                    self.source_lines
                ),
            ));
        }
        self.descriptions = Some(
            self.lines
                .iter()
                .map(|&line| descriptions[line].clone())
                .collect(),
        );
        Ok(self)
    }

    /// Load from a newline-delimited term file and optional description file.
    pub fn load(
        name: impl Into<String>,
        term_path: &Path,
        description_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut ontology = Self::new(name, read_lines(term_path)?);
        if let Some(path) = description_path {
            ontology = ontology.with_descriptions(read_lines(path)?)?;
        }
        info!(
            ontology = %ontology.name,
            terms = ontology.len(),
            descriptions = ontology.descriptions.is_some(),
            "loaded ontology"
        );
        Ok(ontology)
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let term_path = config
            .ontology_path
            .as_deref()
            .ok_or(ConfigError::MissingField("ontology_path"))?;
        let name = config
            .ontology_name()
            .ok_or(ConfigError::MissingField("ontology_name"))?;
        Self::load(name, term_path, config.description_path.as_deref())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn descriptions(&self) -> Option<&[String]> {
        self.descriptions.as_deref()
    }

    /// Panics on an id that did not come from this ontology.
    pub fn term(&self, id: TermId) -> &str {
        &self.terms[id.0]
    }

    pub fn id_of(&self, term: &str) -> Option<TermId> {
        self.ids.get(term).copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = TermId> + '_ {
        (0..self.terms.len()).map(TermId)
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>, ConfigError> {
    let raw = fs::read_to_string(path)?;
    Ok(raw.lines().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn load_preserves_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let terms = write(dir.path(), "skills.txt", "use python\nmanage staff\nbake bread\n");
        let ontology = Ontology::load("esco", &terms, None).unwrap();
        assert_eq!(ontology.len(), 3);
        assert_eq!(ontology.term(TermId(1)), "manage staff");
        assert_eq!(ontology.id_of("bake bread"), Some(TermId(2)));
        assert_eq!(ontology.id_of("fly"), None);
        assert!(ontology.descriptions().is_none());
    }

    #[test]
    fn repeated_and_blank_lines_are_dropped() {
        let ontology = Ontology::new(
            "x",
            vec!["a".into(), "b".into(), "".into(), "a".into(), "  ".into(), "c".into()],
        );
        assert_eq!(ontology.terms(), ["a", "b", "c"]);
        assert_eq!(ontology.id_of("a"), Some(TermId(0)));
        assert_eq!(ontology.id_of("c"), Some(TermId(2)));
        assert_eq!(ontology.ids().count(), 3);
    }

    #[test]
    fn descriptions_follow_kept_lines() {
        let dir = tempfile::tempdir().unwrap();
        let terms = write(dir.path(), "t.txt", "nausea\n\nrash\nnausea\nfever\n");
        let descriptions = write(
            dir.path(),
            "d.txt",
            "feeling sick\n\nred skin\nfeeling sick again\nhigh temperature\n",
        );
        let ontology = Ontology::load("x", &terms, Some(&descriptions)).unwrap();
        assert_eq!(ontology.terms(), ["nausea", "rash", "fever"]);
        assert_eq!(
            ontology.descriptions().unwrap(),
            ["feeling sick", "red skin", "high temperature"]
        );
    }

    #[test]
    fn descriptions_must_align() {
        let dir = tempfile::tempdir().unwrap();
        let terms = write(dir.path(), "t.txt", "a\nb\n");
        let short = write(dir.path(), "d.txt", "only one\n");
        let err = Ontology::load("x", &terms, Some(&short)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "description_path", .. }));

        let aligned = write(dir.path(), "d2.txt", "first\nsecond\n");
        let ontology = Ontology::load("x", &terms, Some(&aligned)).unwrap();
        assert_eq!(ontology.descriptions().unwrap()[1], "second");
    }

    #[test]
    fn from_config_requires_term_path() {
        let config = PipelineConfig::new("infer_esco", "rank_esco");
        assert!(matches!(
            Ontology::from_config(&config),
            Err(ConfigError::MissingField("ontology_path"))
        ));
    }

    #[test]
    fn from_config_names_by_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let terms = write(dir.path(), "reactions.txt", "nausea\n");
        let mut config = PipelineConfig::new("infer_biodex", "rank_biodex");
        config.ontology_path = Some(terms);
        let ontology = Ontology::from_config(&config).unwrap();
        assert_eq!(ontology.name(), "reactions");
    }
}
