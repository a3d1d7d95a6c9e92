//! Bootstrapping few-shot demonstrations from a teacher program.
//!
//! The teacher runs on each training example in turn. When its answer is
//! good enough under the compile metric, the first trace step of every stage
//! being compiled becomes a demonstration for the student. An example never
//! sees demonstrations derived from itself while it is being bootstrapped.

use std::collections::{BTreeMap, HashSet};

use ontolabel_ai::{AiError, Completion, Execution, Program};
use ontolabel_core::{Demonstration, Example, Metric, StageId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::config::CompilerConfig;
use crate::error::{CompileError, ExampleFailure};

/// When a teacher trace is good enough to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessMode {
    /// The teacher scores above zero.
    Plain,
    /// The teacher scores above the uncompiled student.
    Gain,
}

#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    pub metric: Metric,
    pub mode: SuccessMode,
    pub max_bootstrapped_demos: usize,
    pub max_labeled_demos: usize,
    pub max_rounds: usize,
    pub max_errors: usize,
}

impl BootstrapSettings {
    pub fn from_config(config: &CompilerConfig, mode: SuccessMode) -> Self {
        Self {
            metric: config.metric,
            mode,
            max_bootstrapped_demos: config.max_bootstrapped_demos,
            max_labeled_demos: config.max_labeled_demos,
            max_rounds: config.max_rounds.max(1),
            max_errors: config.max_errors,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BootstrapReport {
    /// Ids of the examples whose teacher trace was kept, in order.
    pub bootstrapped: Vec<String>,
    /// Teacher runs attempted, counting every round.
    pub attempts: usize,
    pub failures: Vec<ExampleFailure>,
}

#[derive(Clone)]
pub struct Bootstrapped {
    pub program: Program,
    pub report: BootstrapReport,
}

/// Give every unfrozen stage up to `k` raw labelled demonstrations, drawn
/// at random from `trainset`.
pub fn seed_labeled(
    program: &mut Program,
    trainset: &[Example],
    k: usize,
    rng: &mut StdRng,
) -> Result<(), CompileError> {
    for stage in StageId::ALL {
        if program.stage(stage).is_frozen() {
            continue;
        }
        let demos = trainset
            .choose_multiple(rng, k)
            .map(|example| Demonstration::labeled(stage, example))
            .collect();
        program.stage_mut(stage).set_demos(demos)?;
    }
    Ok(())
}

/// Temperature for a bootstrap round. The first round uses the model default.
pub fn round_temperature(round: usize) -> Option<f32> {
    (round > 0).then(|| 0.7 + 0.001 * round as f32)
}

/// Bootstrap demonstrations for every unfrozen stage of `student`.
///
/// `student` and `teacher` are left untouched; the compiled student is
/// returned as a fresh fork whose stages are in the bootstrapping state.
pub async fn bootstrap(
    lm: &dyn Completion,
    student: &Program,
    teacher: &Program,
    trainset: &[Example],
    settings: &BootstrapSettings,
    rng: &mut StdRng,
) -> Result<Bootstrapped, CompileError> {
    let mut student = student.fork();
    student.reset_uncompiled();
    let stages: Vec<StageId> = StageId::ALL
        .into_iter()
        .filter(|&stage| !student.stage(stage).is_frozen())
        .collect();
    let mut report = BootstrapReport::default();
    let Some(&target) = stages.last() else {
        debug!("every stage is frozen, nothing to bootstrap");
        return Ok(Bootstrapped {
            program: student,
            report,
        });
    };
    for &stage in &stages {
        student.stage_mut(stage).begin_bootstrap();
    }

    let mut teacher = teacher.fork();
    if settings.max_labeled_demos > 0 {
        seed_labeled(&mut teacher, trainset, settings.max_labeled_demos, rng)?;
    }

    let mut pools: BTreeMap<StageId, Vec<Demonstration>> =
        stages.iter().map(|&stage| (stage, Vec::new())).collect();
    let mut traced: HashSet<&str> = HashSet::new();

    'examples: for example in trainset {
        if pools[&target].len() >= settings.max_bootstrapped_demos {
            break;
        }
        for round in 0..settings.max_rounds {
            report.attempts += 1;
            match attempt(lm, &student, &teacher, example, round, settings).await {
                Ok(Some(execution)) => {
                    for (stage, pool) in pools.iter_mut() {
                        if pool.len() >= settings.max_bootstrapped_demos {
                            continue;
                        }
                        if let Some(step) = execution.first_step(*stage) {
                            pool.push(step.to_demonstration(&example.id));
                        }
                    }
                    traced.insert(example.id.as_str());
                    report.bootstrapped.push(example.id.clone());
                    continue 'examples;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(example = %example.id, round, error = %e, "bootstrap example failed");
                    report.failures.push(ExampleFailure {
                        example_id: example.id.clone(),
                        detail: e.to_string(),
                    });
                    if report.failures.len() > settings.max_errors {
                        return Err(CompileError::BudgetExceeded {
                            errors: report.failures.len(),
                            max_errors: settings.max_errors,
                        });
                    }
                }
            }
        }
    }

    // Top up with raw labelled examples the teacher left untraced.
    let mut untraced: Vec<&Example> = trainset
        .iter()
        .filter(|example| !traced.contains(example.id.as_str()))
        .collect();
    untraced.shuffle(rng);
    for (stage, mut pool) in pools {
        let room = settings.max_labeled_demos.saturating_sub(pool.len());
        pool.extend(
            untraced
                .iter()
                .take(room)
                .map(|example| Demonstration::labeled(stage, example)),
        );
        student.stage_mut(stage).set_demos(pool)?;
    }

    info!(
        bootstrapped = report.bootstrapped.len(),
        attempts = report.attempts,
        failures = report.failures.len(),
        "bootstrap pass finished"
    );
    Ok(Bootstrapped {
        program: student,
        report,
    })
}

/// Run the teacher (and, in gain mode, the student) on one example. Returns
/// the teacher's execution when it counts as a success.
async fn attempt(
    lm: &dyn Completion,
    student: &Program,
    teacher: &Program,
    example: &Example,
    round: usize,
    settings: &BootstrapSettings,
) -> Result<Option<Execution>, AiError> {
    let temperature = round_temperature(round);
    let teacher = teacher.fork_excluding(&example.id);
    let execution = teacher.run_example(lm, example, temperature).await?;

    let Some(teacher_score) = settings.metric.score(&example.labels, &execution.labels) else {
        return Ok(None);
    };
    let success = match settings.mode {
        SuccessMode::Plain => teacher_score > 0.0,
        SuccessMode::Gain => {
            let student_run = student.run_example(lm, example, temperature).await?;
            match settings.metric.score(&example.labels, &student_run.labels) {
                Some(student_score) => teacher_score - student_score > 0.0,
                None => false,
            }
        }
    };
    debug!(example = %example.id, round, teacher_score, success, "bootstrap attempt");
    Ok(success.then_some(execution))
}
