//! Shared test programs and completion backends.

use std::sync::Arc;

use ontolabel_ai::testing::{HashEmbedder, ScriptedCompletion, last_field};
use ontolabel_ai::{EmbedMode, EmbeddingIndex, Ontology, Prior, Program};
use ontolabel_core::{Example, PipelineConfig, StageId};

pub const TERMS: &[&str] = &["bake bread", "use python", "manage a team", "drive a forklift"];

/// (id, text, gold label)
pub const TRAIN: &[(&str, &str, &str)] = &[
    ("e1", "We bake fresh loaves every morning", "bake bread"),
    ("e2", "Lead our night shift staff", "manage a team"),
    ("e3", "Move pallets around the warehouse", "drive a forklift"),
];

/// The label every uninformed model falls back to.
pub const WRONG: &str = "use python";

pub fn examples() -> Vec<Example> {
    TRAIN
        .iter()
        .map(|(id, text, label)| Example::new(*id, *text, vec![label.to_string()]))
        .collect()
}

pub fn gold_for(text: &str) -> &'static str {
    TRAIN
        .iter()
        .find(|(_, t, _)| *t == text)
        .map(|(_, _, label)| *label)
        .unwrap_or(WRONG)
}

/// Demonstrations rendered into a prompt: every `Vacancy:` line apart from
/// the format section and the live input.
pub fn demos_shown(prompt: &str) -> usize {
    prompt.matches("Vacancy:").count().saturating_sub(2)
}

pub fn reply(answer: &str) -> String {
    format!("think.\nSkills: {answer}")
}

/// Teacher models always answer correctly. Other models answer correctly
/// only when the prompt carries demonstrations.
pub fn classroom() -> ScriptedCompletion {
    ScriptedCompletion::new(|req| {
        let text = last_field(&req.prompt, "Vacancy:").unwrap_or_default();
        let knows = req.model.contains("teacher") || demos_shown(&req.prompt) > 0;
        let answer = if knows { gold_for(text) } else { WRONG };
        Ok(vec![reply(answer); req.samples.max(1)])
    })
}

/// A student program over [`TERMS`]. With `rank_skip` the rank stage is
/// also frozen.
pub fn program(rank_skip: bool) -> Program {
    let mut config = PipelineConfig::new("infer_esco", "rank_esco");
    config.ontology_path = Some("skills.txt".into());
    config.infer_model = "student".into();
    config.rank_model = "student".into();
    config.rank_topk = TERMS.len();
    config.rank_skip = rank_skip;

    let ontology = Ontology::new("skills", TERMS.iter().map(|t| t.to_string()).collect());
    let index = EmbeddingIndex::build(
        ontology,
        Arc::new(HashEmbedder::new(4096)),
        EmbedMode::Terms,
        None,
    )
    .unwrap();
    let mut program = Program::from_parts(config, Arc::new(index), Arc::new(Prior::none())).unwrap();
    if rank_skip {
        program.freeze(StageId::Rank);
    }
    program
}

/// `program` with the infer stage backed by the teacher model.
pub fn teacher_of(program: &Program) -> Program {
    let mut teacher = program.fork();
    teacher.set_model(StageId::Infer, "teacher");
    teacher.set_model(StageId::Rank, "teacher");
    teacher
}
