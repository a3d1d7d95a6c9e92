//! Embedding index over the ontology.
//!
//! Holds one L2-normalised vector per term (or per term description) and
//! scores label queries against all of them by cosine similarity. The table
//! is computed once per (ontology, mode, model) and persisted as an Arrow IPC
//! file with `term: Utf8` and `embedding: FixedSizeList<Float32>` columns.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use arrow::array::{
    Array, FixedSizeListArray, FixedSizeListBuilder, Float32Array, Float32Builder, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use ontolabel_core::{ConfigError, PipelineConfig};
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, QueryCache};
use crate::embed::{TextEmbedder, cosine_sim};
use crate::error::AiError;
use crate::ontology::{Ontology, TermId};

/// Query embeddings kept by the [`EmbeddingIndex::retrieve_individual`] memo.
pub const RETRIEVE_CACHE_CAPACITY: u64 = 100_000;

const EMBED_BATCH_SIZE: usize = 256;

/// What the index embeds for each ontology entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    Terms,
    Descriptions,
}

impl EmbedMode {
    pub fn from_config(config: &PipelineConfig) -> Self {
        if config.retriever_embed_descriptions {
            Self::Descriptions
        } else {
            Self::Terms
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Terms => "term",
            Self::Descriptions => "description",
        }
    }
}

/// Per-input term scores. Sparse until the index fills it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreMap(BTreeMap<TermId, f32>);

impl ScoreMap {
    /// Keep the larger of the existing and the new score.
    pub fn insert_max(&mut self, id: TermId, score: f32) {
        self.0
            .entry(id)
            .and_modify(|s| *s = s.max(score))
            .or_insert(score);
    }

    pub fn get(&self, id: TermId) -> Option<f32> {
        self.0.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TermId, &f32)> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&TermId, &mut f32)> {
        self.0.iter_mut()
    }

    /// Entries by score descending; ties in ontology order.
    pub fn ranked(&self) -> Vec<(TermId, f32)> {
        let mut entries: Vec<(TermId, f32)> = self.0.iter().map(|(id, s)| (*id, *s)).collect();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1));
        entries
    }
}

pub struct EmbeddingIndex {
    ontology: Ontology,
    embedder: Arc<dyn TextEmbedder>,
    mode: EmbedMode,
    dim: usize,
    embeddings: Vec<Vec<f32>>,
    memo: QueryCache,
}

impl EmbeddingIndex {
    /// Load the embedding table from `cache_dir`, or compute and persist it.
    ///
    /// A cache file whose rows, texts or dimension disagree with the ontology
    /// is treated as a miss and rewritten.
    pub fn build(
        ontology: Ontology,
        embedder: Arc<dyn TextEmbedder>,
        mode: EmbedMode,
        cache_dir: Option<&Path>,
    ) -> Result<Self, AiError> {
        let dim = embedder.dim();
        let texts = match mode {
            EmbedMode::Terms => ontology.terms(),
            EmbedMode::Descriptions => ontology
                .descriptions()
                .ok_or(ConfigError::MissingField("description_path"))?,
        };
        let path = cache_dir
            .map(|dir| cache_path(dir, ontology.name(), mode, embedder.model_name()));

        let cached = match &path {
            Some(path) => match read_embedding_cache(path, texts, dim) {
                Ok(hit) => hit,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable embedding cache, recomputing");
                    None
                }
            },
            None => None,
        };

        let embeddings = match cached {
            Some(embeddings) => {
                info!(
                    ontology = %ontology.name(),
                    mode = mode.as_str(),
                    rows = embeddings.len(),
                    "loaded embedding cache"
                );
                embeddings
            }
            None => {
                info!(
                    ontology = %ontology.name(),
                    mode = mode.as_str(),
                    model = %embedder.model_name(),
                    rows = texts.len(),
                    "embedding cache miss, computing"
                );
                let embeddings = embed_all(embedder.as_ref(), texts)?;
                if let Some(path) = &path {
                    persist(path, texts, &embeddings, dim)?;
                }
                embeddings
            }
        };

        Ok(Self {
            ontology,
            embedder,
            mode,
            dim,
            embeddings,
            memo: QueryCache::new(RETRIEVE_CACHE_CAPACITY),
        })
    }

    pub fn from_config(
        config: &PipelineConfig,
        ontology: Ontology,
        embedder: Arc<dyn TextEmbedder>,
    ) -> Result<Self, AiError> {
        if embedder.model_name() != config.retriever_model_name {
            warn!(
                configured = %config.retriever_model_name,
                loaded = %embedder.model_name(),
                "retriever model differs from config"
            );
        }
        Self::build(
            ontology,
            embedder,
            EmbedMode::from_config(config),
            Some(&config.embedding_cache_dir),
        )
    }

    pub fn ontology(&self) -> &Ontology {
        &self.ontology
    }

    pub fn mode(&self) -> EmbedMode {
        self.mode
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Score every term by its best cosine similarity over `queries`.
    ///
    /// Queries are embedded in one batch, in sorted order.
    pub fn retrieve(&self, queries: &BTreeSet<String>) -> Result<ScoreMap, AiError> {
        let mut scores = ScoreMap::default();
        if queries.is_empty() {
            return Ok(scores);
        }

        let texts: Vec<&str> = queries.iter().map(String::as_str).collect();
        let query_vecs = self
            .embedder
            .embed_batch(&texts)
            .map_err(AiError::Embedding)?;

        for query in &query_vecs {
            for (i, term) in self.embeddings.iter().enumerate() {
                scores.insert_max(TermId(i), cosine_sim(query, term));
            }
        }
        debug!(queries = texts.len(), terms = scores.len(), "retrieved");
        Ok(scores)
    }

    /// The `k` closest terms to one query as `(score, term)`, best first.
    ///
    /// Query embeddings are memoised for the lifetime of the index.
    pub fn retrieve_individual(&self, query: &str, k: usize) -> Result<Vec<(f32, String)>, AiError> {
        let query_vec = self.memo.get_or_try_embed(query, || {
            self.embedder
                .embed_batch(&[query])
                .map_err(AiError::Embedding)?
                .into_iter()
                .next()
                .ok_or_else(|| AiError::Embedding(anyhow::anyhow!("embedder returned no vector")))
        })?;

        let mut scores = ScoreMap::default();
        for (i, term) in self.embeddings.iter().enumerate() {
            scores.insert_max(TermId(i), cosine_sim(&query_vec, term));
        }
        Ok(scores
            .ranked()
            .into_iter()
            .take(k)
            .map(|(id, score)| (score, self.ontology.term(id).to_string()))
            .collect())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.memo.stats()
    }
}

/// `<dir>/<ontology>_<term|description>_embeddings[<model>].arrow`, with `/`
/// in the model name replaced by `--`.
pub fn cache_path(dir: &Path, ontology: &str, mode: EmbedMode, model_name: &str) -> PathBuf {
    dir.join(format!(
        "{ontology}_{}_embeddings[{}].arrow",
        mode.as_str(),
        model_name.replace('/', "--")
    ))
}

fn embed_all(embedder: &dyn TextEmbedder, texts: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
    let dim = embedder.dim();
    let mut embeddings = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(EMBED_BATCH_SIZE) {
        let refs: Vec<&str> = chunk.iter().map(String::as_str).collect();
        let batch = embedder
            .embed_batch(&refs)
            .context("generating ontology embeddings")
            .map_err(AiError::Embedding)?;
        if batch.len() != refs.len() || batch.iter().any(|v| v.len() != dim) {
            return Err(AiError::Embedding(anyhow::anyhow!(
                "embedder returned {} vectors for {} texts (expected dim {dim})",
                batch.len(),
                refs.len()
            )));
        }
        embeddings.extend(batch);
    }
    Ok(embeddings)
}

fn persist(path: &Path, texts: &[String], embeddings: &[Vec<f32>], dim: usize) -> Result<(), AiError> {
    let result = path
        .parent()
        .map(fs::create_dir_all)
        .transpose()
        .context("creating embedding cache directory")
        .and_then(|_| write_embedding_cache(path, texts, embeddings, dim));
    match result {
        Ok(()) => {
            info!(path = %path.display(), rows = texts.len(), "wrote embedding cache");
            Ok(())
        }
        Err(error) => Err(AiError::EmbeddingCache {
            path: path.display().to_string(),
            error,
        }),
    }
}

fn cache_schema(dim: usize) -> Schema {
    Schema::new(vec![
        Field::new("term", DataType::Utf8, false),
        Field::new(
            "embedding",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dim as i32,
            ),
            false,
        ),
    ])
}

/// Write an embedding table as a single-batch Arrow IPC file.
pub fn write_embedding_cache(
    path: &Path,
    texts: &[String],
    embeddings: &[Vec<f32>],
    dim: usize,
) -> anyhow::Result<()> {
    anyhow::ensure!(
        texts.len() == embeddings.len(),
        "{} texts but {} embeddings",
        texts.len(),
        embeddings.len()
    );
    let schema = Arc::new(cache_schema(dim));

    let mut emb_builder = FixedSizeListBuilder::new(Float32Builder::new(), dim as i32);
    for emb in embeddings {
        anyhow::ensure!(emb.len() == dim, "embedding of length {} in a {dim}-dim table", emb.len());
        let values = emb_builder.values();
        for &val in emb {
            values.append_value(val);
        }
        emb_builder.append(true);
    }

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(texts.to_vec())),
            Arc::new(emb_builder.finish()),
        ],
    )?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = FileWriter::try_new(file, &schema)?;
    writer.write(&batch)?;
    writer.finish()?;
    Ok(())
}

/// Read an embedding table written by [`write_embedding_cache`].
///
/// `Ok(None)` when the file is absent or does not match `texts` and `dim`.
pub fn read_embedding_cache(
    path: &Path,
    texts: &[String],
    dim: usize,
) -> anyhow::Result<Option<Vec<Vec<f32>>>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = FileReader::try_new(file, None)?;

    let mut cached_texts: Vec<String> = Vec::with_capacity(texts.len());
    let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
    for batch in reader {
        let batch = batch?;
        let term_col = batch
            .column_by_name("term")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| anyhow::anyhow!("missing Utf8 'term' column"))?;
        let fsl = batch
            .column_by_name("embedding")
            .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
            .ok_or_else(|| anyhow::anyhow!("missing FixedSizeList 'embedding' column"))?;

        if fsl.value_length() as usize != dim {
            debug!(cached = fsl.value_length(), expected = dim, "embedding cache dimension mismatch");
            return Ok(None);
        }

        // The underlying values are a single flat Float32Array.
        let flat_values = fsl
            .values()
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| anyhow::anyhow!("embedding values are not Float32"))?;

        for row in 0..batch.num_rows() {
            cached_texts.push(term_col.value(row).to_string());
            let offset = row * dim;
            embeddings.push(flat_values.values()[offset..offset + dim].to_vec());
        }
    }

    if cached_texts.as_slice() != texts {
        debug!(
            cached = cached_texts.len(),
            expected = texts.len(),
            "embedding cache does not match ontology"
        );
        return Ok(None);
    }
    Ok(Some(embeddings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{HashEmbedder, TableEmbedder};

    fn ontology() -> Ontology {
        Ontology::new(
            "skills",
            vec![
                "python programming".into(),
                "bake bread".into(),
                "manage a team".into(),
            ],
        )
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn max_pooling_over_queries() {
        // One term on the x axis; two queries at cos 0.3 and 0.7.
        let embedder = TableEmbedder::new(2)
            .with("t", vec![1.0, 0.0])
            .with("q1", vec![0.3, (1.0f32 - 0.09).sqrt()])
            .with("q2", vec![0.7, (1.0f32 - 0.49).sqrt()]);
        let index = EmbeddingIndex::build(
            Ontology::new("x", vec!["t".into()]),
            Arc::new(embedder),
            EmbedMode::Terms,
            None,
        )
        .unwrap();
        let scores = index.retrieve(&set(&["q1", "q2"])).unwrap();
        assert!((scores.get(TermId(0)).unwrap() - 0.7).abs() < 1e-5);
    }

    #[test]
    fn empty_query_set_scores_nothing() {
        let index =
            EmbeddingIndex::build(ontology(), Arc::new(HashEmbedder::new(64)), EmbedMode::Terms, None)
                .unwrap();
        assert!(index.retrieve(&BTreeSet::new()).unwrap().is_empty());
    }

    #[test]
    fn exact_query_ranks_its_term_first() {
        let index =
            EmbeddingIndex::build(ontology(), Arc::new(HashEmbedder::new(64)), EmbedMode::Terms, None)
                .unwrap();
        let scores = index.retrieve(&set(&["bake bread"])).unwrap();
        assert_eq!(scores.len(), 3);
        assert_eq!(scores.ranked()[0].0, TermId(1));
    }

    #[test]
    fn ranked_breaks_ties_by_ontology_order() {
        let mut scores = ScoreMap::default();
        scores.insert_max(TermId(2), 0.5);
        scores.insert_max(TermId(0), 0.5);
        scores.insert_max(TermId(1), 0.9);
        let order: Vec<TermId> = scores.ranked().into_iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![TermId(1), TermId(0), TermId(2)]);
    }

    #[test]
    fn insert_max_keeps_best() {
        let mut scores = ScoreMap::default();
        scores.insert_max(TermId(0), 0.3);
        scores.insert_max(TermId(0), 0.7);
        scores.insert_max(TermId(0), 0.5);
        assert_eq!(scores.get(TermId(0)), Some(0.7));
    }

    #[test]
    fn retrieve_individual_is_memoised() {
        let embedder = Arc::new(HashEmbedder::new(64));
        let index =
            EmbeddingIndex::build(ontology(), embedder.clone(), EmbedMode::Terms, None).unwrap();
        let before = embedder.embedded();

        let first = index.retrieve_individual("manage a team", 2).unwrap();
        let second = index.retrieve_individual("manage a team", 2).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].1, "manage a team");
        assert!(first[0].0 >= first[1].0);
        // A different k reuses the memoised query vector.
        let wider = index.retrieve_individual("manage a team", 3).unwrap();
        assert_eq!(wider[..2], first[..]);
        assert_eq!(embedder.embedded() - before, 1);

        let stats = index.cache_stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.len, 1);
        assert_eq!(stats.capacity, RETRIEVE_CACHE_CAPACITY);
    }

    #[test]
    fn cache_path_encodes_model_name() {
        let path = cache_path(
            Path::new("data/embeddings"),
            "esco",
            EmbedMode::Descriptions,
            "sentence-transformers/all-mpnet-base-v2",
        );
        assert_eq!(
            path,
            Path::new(
                "data/embeddings/esco_description_embeddings[sentence-transformers--all-mpnet-base-v2].arrow"
            )
        );
    }

    #[test]
    fn cache_hit_avoids_recomputation() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("embeddings");

        let first = Arc::new(HashEmbedder::new(32));
        let built =
            EmbeddingIndex::build(ontology(), first.clone(), EmbedMode::Terms, Some(&cache_dir))
                .unwrap();
        assert_eq!(first.embedded(), 3);
        assert!(cache_path(&cache_dir, "skills", EmbedMode::Terms, first.model_name()).exists());

        let second = Arc::new(HashEmbedder::new(32));
        let loaded =
            EmbeddingIndex::build(ontology(), second.clone(), EmbedMode::Terms, Some(&cache_dir))
                .unwrap();
        assert_eq!(second.embedded(), 0);
        assert_eq!(loaded.embeddings, built.embeddings);
    }

    #[test]
    fn stale_cache_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(HashEmbedder::new(32));
        EmbeddingIndex::build(ontology(), embedder.clone(), EmbedMode::Terms, Some(dir.path()))
            .unwrap();

        // Same ontology name, one more term.
        let mut terms = ontology().terms().to_vec();
        terms.push("drive a forklift".into());
        let grown = Ontology::new("skills", terms);

        let fresh = Arc::new(HashEmbedder::new(32));
        let index =
            EmbeddingIndex::build(grown, fresh.clone(), EmbedMode::Terms, Some(dir.path())).unwrap();
        assert_eq!(fresh.embedded(), 4);
        assert_eq!(index.embeddings.len(), 4);
    }

    #[test]
    fn descriptions_mode_needs_descriptions() {
        let result = EmbeddingIndex::build(
            ontology(),
            Arc::new(HashEmbedder::new(16)),
            EmbedMode::Descriptions,
            None,
        );
        assert!(matches!(
            result,
            Err(AiError::Config(ConfigError::MissingField("description_path")))
        ));
    }

    #[test]
    fn descriptions_mode_scores_terms_by_description() {
        let ontology = Ontology::new("x", vec!["A01".into(), "B02".into()])
            .with_descriptions(vec!["nausea and vomiting".into(), "skin rash".into()])
            .unwrap();
        let index =
            EmbeddingIndex::build(ontology, Arc::new(HashEmbedder::new(64)), EmbedMode::Descriptions, None)
                .unwrap();
        let scores = index.retrieve(&set(&["skin rash"])).unwrap();
        assert_eq!(scores.ranked()[0].0, TermId(1));
    }
}
