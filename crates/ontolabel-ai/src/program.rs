//! The Infer → Retrieve → Rank program.
//!
//! A [`Program`] owns its two prompted stages and shares the (read-only)
//! index and prior with every fork by `Arc`. Forks are cheap: only the
//! demonstration pools are copied.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use ontolabel_core::{Chunker, Example, PipelineConfig, ProgramState, StageId};
use tracing::debug;

use crate::completion::Completion;
use crate::embed::TextEmbedder;
use crate::error::AiError;
use crate::index::EmbeddingIndex;
use crate::infer::generate_queries;
use crate::ontology::Ontology;
use crate::predictor::{Predictor, TraceStep};
use crate::prior::Prior;
use crate::rank::rerank;
use crate::signature;

/// Per-call knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions<'a> {
    /// Gold labels to reveal to the infer stage, if its signature has a hint.
    pub hint: Option<&'a [String]>,
    pub temperature: Option<f32>,
}

/// The result of one run: final labels plus every stage call, in order.
#[derive(Debug, Clone)]
pub struct Execution {
    pub labels: Vec<String>,
    pub trace: Vec<TraceStep>,
}

impl Execution {
    /// First recorded call of `stage`, if it ran.
    pub fn first_step(&self, stage: StageId) -> Option<&TraceStep> {
        self.trace.iter().find(|s| s.stage == stage)
    }
}

#[derive(Clone)]
pub struct Program {
    config: Arc<PipelineConfig>,
    chunker: Chunker,
    infer: Predictor,
    rank: Predictor,
    rank_skip: bool,
    index: Arc<EmbeddingIndex>,
    prior: Arc<Prior>,
}

impl Program {
    /// Load the ontology, prior and embedding index named by `config`.
    pub fn new(config: PipelineConfig, embedder: Arc<dyn TextEmbedder>) -> Result<Self, AiError> {
        config.validate()?;
        let ontology = Ontology::from_config(&config)?;
        let prior = Prior::from_config(&config, &ontology)?;
        let index = EmbeddingIndex::from_config(&config, ontology, embedder)?;
        Self::from_parts(config, Arc::new(index), Arc::new(prior))
    }

    /// Assemble a program around an already-built index and prior.
    pub fn from_parts(
        config: PipelineConfig,
        index: Arc<EmbeddingIndex>,
        prior: Arc<Prior>,
    ) -> Result<Self, AiError> {
        config.validate()?;
        let infer = Predictor::new(
            StageId::Infer,
            signature::lookup(&config.infer_signature_name)?,
            config.infer_model.clone(),
        )
        .with_samples(config.infer_num_predictions);
        let rank = Predictor::new(
            StageId::Rank,
            signature::lookup(&config.rank_signature_name)?,
            config.rank_model.clone(),
        );
        Ok(Self {
            chunker: Chunker::from_config(&config),
            rank_skip: config.rank_skip,
            config: Arc::new(config),
            infer,
            rank,
            index,
            prior,
        })
    }

    /// Rebuild a saved program. Loading and running reproduces the outputs
    /// of the program that was saved.
    pub fn from_state(state: ProgramState, embedder: Arc<dyn TextEmbedder>) -> Result<Self, AiError> {
        let mut program = Self::new(state.config.clone(), embedder)?;
        program.load_demos(&state)?;
        Ok(program)
    }

    pub fn load(path: &Path, embedder: Arc<dyn TextEmbedder>) -> Result<Self, AiError> {
        Self::from_state(ProgramState::from_json_file(path)?, embedder)
    }

    /// Install the demonstration pools of `state`. Non-empty pools are frozen.
    pub fn load_demos(&mut self, state: &ProgramState) -> Result<(), AiError> {
        state.validate()?;
        for stage in StageId::ALL {
            self.stage_mut(stage).restore(state.demos(stage).to_vec());
        }
        Ok(())
    }

    /// Config (with current models and flow flags) plus every stage's pool.
    pub fn dump_state(&self) -> ProgramState {
        let mut config = (*self.config).clone();
        config.infer_model = self.infer.model().to_string();
        config.rank_model = self.rank.model().to_string();
        config.rank_skip = self.rank_skip;

        let mut state = ProgramState::new(config);
        for (stage, predictor) in self.named_stages() {
            state.set_demos(stage, predictor.demos().to_vec());
        }
        state
    }

    pub fn save(&self, path: &Path) -> Result<(), AiError> {
        self.dump_state().to_json_file(path)?;
        Ok(())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    pub fn rank_skip(&self) -> bool {
        self.rank_skip
    }

    pub fn set_rank_skip(&mut self, skip: bool) {
        self.rank_skip = skip;
    }

    pub fn named_stages(&self) -> [(StageId, &Predictor); 2] {
        [(StageId::Infer, &self.infer), (StageId::Rank, &self.rank)]
    }

    pub fn stage(&self, id: StageId) -> &Predictor {
        match id {
            StageId::Infer => &self.infer,
            StageId::Rank => &self.rank,
        }
    }

    pub fn stage_mut(&mut self, id: StageId) -> &mut Predictor {
        match id {
            StageId::Infer => &mut self.infer,
            StageId::Rank => &mut self.rank,
        }
    }

    pub fn freeze(&mut self, id: StageId) {
        self.stage_mut(id).freeze();
    }

    pub fn set_model(&mut self, id: StageId, model: impl Into<String>) {
        self.stage_mut(id).set_model(model);
    }

    /// An independent copy: same config, index and prior; own demo pools.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// A fork with every demonstration derived from `example_id` removed from
    /// the stages that are not frozen.
    pub fn fork_excluding(&self, example_id: &str) -> Self {
        let mut fork = self.fork();
        fork.infer.exclude_example(example_id);
        fork.rank.exclude_example(example_id);
        fork
    }

    /// Reset every stage that is not frozen back to zero-shot.
    pub fn reset_uncompiled(&mut self) {
        self.infer.reset();
        self.rank.reset();
    }

    /// Labels for `text`, best first.
    pub async fn forward(&self, lm: &dyn Completion, text: &str) -> Result<Vec<String>, AiError> {
        Ok(self.run(lm, text, RunOptions::default()).await?.labels)
    }

    /// Run on a labelled example, revealing its labels when it is hinted.
    pub async fn run_example(
        &self,
        lm: &dyn Completion,
        example: &Example,
        temperature: Option<f32>,
    ) -> Result<Execution, AiError> {
        let opts = RunOptions {
            hint: example.hint(),
            temperature,
        };
        self.run(lm, &example.text, opts).await
    }

    pub async fn run(
        &self,
        lm: &dyn Completion,
        text: &str,
        opts: RunOptions<'_>,
    ) -> Result<Execution, AiError> {
        let mut windows = self.chunker.windows(text);
        if windows.is_empty() {
            windows.push("");
        }
        let hint = opts
            .hint
            .and_then(|labels| self.infer.signature().hint(labels));

        let mut trace = Vec::with_capacity(windows.len() + 1);
        let mut queries = BTreeSet::new();
        for window in &windows {
            let out = generate_queries(&self.infer, lm, window, hint.as_deref(), opts.temperature).await?;
            queries.extend(out.queries);
            trace.push(out.step);
        }

        let mut scores = self.index.retrieve(&queries)?;
        self.prior.reweight(&mut scores);

        let ontology = self.index.ontology();
        let shortlist: Vec<String> = scores
            .ranked()
            .into_iter()
            .take(self.config.rank_topk)
            .map(|(id, _)| ontology.term(id).to_string())
            .collect();

        let labels = if self.rank_skip || shortlist.is_empty() {
            shortlist
        } else {
            let ranking = rerank(&self.rank, lm, windows[0], &shortlist, opts.temperature).await?;
            trace.push(ranking.step);
            ranking.labels
        };

        debug!(
            windows = windows.len(),
            queries = queries.len(),
            labels = labels.len(),
            "program run"
        );
        Ok(Execution { labels, trace })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::EmbedMode;
    use crate::predictor::StageState;
    use crate::testing::{HashEmbedder, ScriptedCompletion, last_field};
    use ontolabel_core::{ConfigError, Demonstration};

    const TERMS: &[&str] = &["bake bread", "use python", "manage a team", "drive a forklift"];

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::new("infer_esco", "rank_esco");
        config.ontology_path = Some("skills.txt".into());
        config.rank_topk = 3;
        config
    }

    fn index(terms: &[&str]) -> Arc<EmbeddingIndex> {
        let ontology = Ontology::new("skills", terms.iter().map(|t| t.to_string()).collect());
        Arc::new(
            EmbeddingIndex::build(ontology, Arc::new(HashEmbedder::new(4096)), EmbedMode::Terms, None)
                .unwrap(),
        )
    }

    fn program(config: PipelineConfig) -> Program {
        Program::from_parts(config, index(TERMS), Arc::new(Prior::none())).unwrap()
    }

    fn lm(infer: &'static str, rank: &'static str) -> ScriptedCompletion {
        ScriptedCompletion::new(move |req| {
            let reply = if req.prompt.contains("Options:") { rank } else { infer };
            Ok(vec![reply.to_string(); req.samples])
        })
    }

    #[tokio::test]
    async fn forward_infers_retrieves_and_reranks() {
        let lm = lm("x.\nSkills: bake bread, manage a team", "y.\nSkills: manage a team");
        let program = program(config());
        let exec = program.run(&lm, "We run a bakery.", RunOptions::default()).await.unwrap();

        assert_eq!(exec.labels.len(), 3);
        assert_eq!(exec.labels[0], "manage a team");
        assert!(exec.labels.contains(&"bake bread".to_string()));
        let stages: Vec<StageId> = exec.trace.iter().map(|s| s.stage).collect();
        assert_eq!(stages, vec![StageId::Infer, StageId::Rank]);
    }

    #[tokio::test]
    async fn rank_skip_returns_shortlist() {
        let mut config = config();
        config.rank_skip = true;
        config.rank_topk = 2;
        let lm = lm("x.\nSkills: bake bread", "unused");
        let program = program(config);
        let exec = program.run(&lm, "bakery", RunOptions::default()).await.unwrap();

        assert_eq!(exec.labels.len(), 2);
        assert_eq!(exec.labels[0], "bake bread");
        assert_eq!(exec.trace.len(), 1);
        assert_eq!(lm.calls(), 1);
    }

    #[tokio::test]
    async fn no_queries_means_no_labels_and_no_rank_call() {
        let lm = lm("x.\nSkills:", "unused");
        let program = program(config());
        let labels = program.forward(&lm, "nothing relevant").await.unwrap();
        assert!(labels.is_empty());
        assert_eq!(lm.calls(), 1);
    }

    #[tokio::test]
    async fn windows_are_inferred_separately_and_ranked_on_the_first() {
        let mut config = config();
        config.chunk_context_window = 12;
        config.chunk_window_overlap = 0.0;
        config.chunk_max_windows = 5;
        let lm = lm("x.\nSkills: bake bread", "y.\nSkills: bake bread");
        let program = program(config);

        program
            .forward(&lm, "first part.\nsecond part\nthird part")
            .await
            .unwrap();
        let requests = lm.requests();
        let infer_calls = requests.iter().filter(|r| !r.prompt.contains("Options:")).count();
        assert_eq!(infer_calls, 3);
        let rank_req = requests.iter().find(|r| r.prompt.contains("Options:")).unwrap();
        assert_eq!(last_field(&rank_req.prompt, "Vacancy:"), Some("first part."));
    }

    #[tokio::test]
    async fn empty_text_runs_one_empty_window() {
        let lm = lm("x.\nSkills: bake bread", "y.\nSkills: bake bread");
        let program = program(config());
        program.forward(&lm, "").await.unwrap();
        let requests = lm.requests();
        assert_eq!(last_field(&requests[0].prompt, "Vacancy:"), Some(""));
    }

    #[tokio::test]
    async fn hint_only_reaches_infer() {
        let lm = lm("x.\nSkills: bake bread", "y.\nSkills: bake bread");
        let program = program(config());
        let example = Example::new("1", "bakery", vec!["bake bread".into()]).with_hint();
        program.run_example(&lm, &example, Some(0.7)).await.unwrap();

        let requests = lm.requests();
        assert!(last_field(&requests[0].prompt, "Hint:").unwrap().contains("bake bread"));
        assert!(last_field(&requests[1].prompt, "Hint:").is_none());
        assert!(requests.iter().all(|r| r.temperature == Some(0.7)));
    }

    #[tokio::test]
    async fn prior_breaks_a_retrieval_tie() {
        let mut config = config();
        config.rank_skip = true;
        let lm = lm("x.\nSkills: bake", "unused");
        let terms = index(&["bake bread", "bake cake"]);

        let flat = Program::from_parts(config.clone(), terms.clone(), Arc::new(Prior::none())).unwrap();
        assert_eq!(flat.forward(&lm, "t").await.unwrap()[0], "bake bread");

        let weighted =
            Program::from_parts(config, terms, Arc::new(Prior::new(10.0, vec![0.0, 1.0]))).unwrap();
        assert_eq!(weighted.forward(&lm, "t").await.unwrap()[0], "bake cake");
    }

    #[tokio::test]
    async fn saved_state_reproduces_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program.json");
        let lm = lm("x.\nSkills: bake bread, use python", "y.\nSkills: use python");

        let mut original = program(config());
        let example = Example::new("ex-1", "We need a baker", vec!["bake bread".into()]);
        original
            .stage_mut(StageId::Infer)
            .set_demos(vec![Demonstration::labeled(StageId::Infer, &example)])
            .unwrap();
        original.set_model(StageId::Rank, "bigger-model");
        original.save(&path).unwrap();

        let state = ProgramState::from_json_file(&path).unwrap();
        assert_eq!(state.config.rank_model, "bigger-model");
        let mut restored = Program::from_parts(state.config.clone(), index(TERMS), Arc::new(Prior::none())).unwrap();
        restored.load_demos(&state).unwrap();

        let before = original.forward(&lm, "bakery text").await.unwrap();
        let after = restored.forward(&lm, "bakery text").await.unwrap();
        assert_eq!(before, after);

        let requests = lm.requests();
        assert_eq!(requests[0].prompt, requests[2].prompt);
        assert_eq!(requests[1].prompt, requests[3].prompt);
        assert_eq!(requests[3].model, "bigger-model");
        assert_eq!(restored.dump_state(), original.dump_state());
    }

    #[test]
    fn load_restores_saved_demos_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let terms = dir.path().join("skills.txt");
        std::fs::write(&terms, TERMS.join("\n")).unwrap();
        let mut config = config();
        config.ontology_path = Some(terms);
        config.embedding_cache_dir = dir.path().join("embeddings");
        let embedder = Arc::new(HashEmbedder::new(64));

        let mut original = Program::new(config, embedder.clone()).unwrap();
        let a = Example::new("a", "We need a baker", vec!["bake bread".into()]);
        let b = Example::new("b", "Python developer", vec!["use python".into()]);
        original
            .stage_mut(StageId::Infer)
            .set_demos(vec![
                Demonstration::labeled(StageId::Infer, &a),
                Demonstration::labeled(StageId::Infer, &b),
            ])
            .unwrap();
        original
            .stage_mut(StageId::Rank)
            .set_demos(vec![Demonstration::labeled(StageId::Rank, &b)])
            .unwrap();
        let path = dir.path().join("program.json");
        original.save(&path).unwrap();

        let restored = Program::load(&path, embedder).unwrap();
        for stage in StageId::ALL {
            assert_eq!(restored.stage(stage).demos(), original.stage(stage).demos());
            assert_eq!(restored.stage(stage).state(), StageState::Frozen);
        }
        assert_eq!(restored.dump_state(), original.dump_state());
    }

    #[tokio::test]
    async fn rerank_keeps_every_shortlisted_term_of_a_repetitive_ontology() {
        let dir = tempfile::tempdir().unwrap();
        let terms = dir.path().join("skills.txt");
        std::fs::write(&terms, "bake bread\nbake bread\n\nuse python\nbake bread\n").unwrap();
        let mut config = config();
        config.ontology_path = Some(terms);
        config.embedding_cache_dir = dir.path().join("embeddings");
        config.rank_topk = 3;
        let lm = lm(
            "x.\nSkills: bake bread, use python",
            "y.\nSkills: use python, use python, bake bread",
        );

        let ranked = Program::new(config, Arc::new(HashEmbedder::new(64))).unwrap();
        assert_eq!(ranked.index().ontology().terms(), ["bake bread", "use python"]);
        let mut skipping = ranked.fork();
        skipping.set_rank_skip(true);

        let shortlist = skipping.forward(&lm, "bakery").await.unwrap();
        let mut reranked = ranked.forward(&lm, "bakery").await.unwrap();
        assert_eq!(shortlist.len(), 2);
        assert_eq!(reranked[0], "use python");
        reranked.sort();
        let mut expected = shortlist.clone();
        expected.sort();
        assert_eq!(reranked, expected);
    }

    #[test]
    fn forks_do_not_share_demos() {
        let base = program(config());
        let mut fork = base.fork();
        let example = Example::new("1", "t", vec!["a".into()]);
        fork.stage_mut(StageId::Infer)
            .set_demos(vec![Demonstration::labeled(StageId::Infer, &example)])
            .unwrap();
        assert!(base.stage(StageId::Infer).demos().is_empty());
        assert_eq!(fork.stage(StageId::Infer).demos().len(), 1);
    }

    #[test]
    fn fork_excluding_drops_own_demos_from_unfrozen_stages() {
        let mut base = program(config());
        let a = Example::new("a", "t", vec!["x".into()]);
        let b = Example::new("b", "t", vec!["y".into()]);
        for stage in StageId::ALL {
            base.stage_mut(stage)
                .set_demos(vec![
                    Demonstration::labeled(stage, &a),
                    Demonstration::labeled(stage, &b),
                ])
                .unwrap();
        }
        base.freeze(StageId::Rank);

        let fork = base.fork_excluding("a");
        let infer = fork.stage(StageId::Infer).demos();
        assert_eq!(infer.len(), 1);
        assert!(infer[0].derived_from("b"));
        assert_eq!(fork.stage(StageId::Rank).demos(), base.stage(StageId::Rank).demos());
        assert_eq!(base.stage(StageId::Infer).demos().len(), 2);
    }

    #[test]
    fn reset_uncompiled_keeps_frozen_stages() {
        let mut program = program(config());
        let example = Example::new("1", "t", vec!["a".into()]);
        for stage in StageId::ALL {
            program
                .stage_mut(stage)
                .set_demos(vec![Demonstration::labeled(stage, &example)])
                .unwrap();
        }
        program.freeze(StageId::Infer);
        program.reset_uncompiled();
        assert_eq!(program.stage(StageId::Infer).demos().len(), 1);
        assert!(program.stage(StageId::Rank).demos().is_empty());
    }

    #[test]
    fn unknown_signature_is_a_config_error() {
        let mut config = config();
        config.rank_signature_name = "rank_unknown".into();
        let result = Program::from_parts(config, index(TERMS), Arc::new(Prior::none()));
        assert!(matches!(
            result,
            Err(AiError::Config(ConfigError::UnknownSignature(_)))
        ));
    }

    #[test]
    fn new_builds_index_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let terms = dir.path().join("skills.txt");
        std::fs::write(&terms, TERMS.join("\n")).unwrap();
        let prior = dir.path().join("prior.json");
        std::fs::write(&prior, r#"{"use python": 0.4}"#).unwrap();

        let mut config = config();
        config.ontology_path = Some(terms);
        config.prior_path = Some(prior);
        config.prior_a = 1.0;
        config.embedding_cache_dir = dir.path().join("embeddings");

        let program = Program::new(config, Arc::new(HashEmbedder::new(64))).unwrap();
        assert_eq!(program.index().ontology().len(), 4);
        assert_eq!(program.index().ontology().name(), "skills");
        assert!(dir.path().join("embeddings").read_dir().unwrap().next().is_some());
    }
}
