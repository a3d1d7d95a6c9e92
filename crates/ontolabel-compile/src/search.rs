//! Compilers: a single bootstrap pass, or random search over bootstrapped
//! candidate programs scored on a validation set.

use std::fmt;

use ontolabel_ai::{Completion, Program};
use ontolabel_core::Example;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::bootstrap::{BootstrapSettings, SuccessMode, bootstrap, seed_labeled};
use crate::config::{CompilerConfig, CompilerKind};
use crate::error::CompileError;
use crate::evaluate::Evaluation;

/// How one candidate program was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    ZeroShot,
    LabeledOnly,
    /// Bootstrap over the training set in its given order.
    Unshuffled,
    /// Bootstrap over a shuffled training set with a random pool size.
    Shuffled { seed: u64 },
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroShot => f.write_str("zero-shot"),
            Self::LabeledOnly => f.write_str("labeled-only"),
            Self::Unshuffled => f.write_str("unshuffled"),
            Self::Shuffled { seed } => write!(f, "shuffled(seed={seed})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CandidateReport {
    pub kind: CandidateKind,
    /// Validation score; `None` when the candidate was not scored.
    pub score: Option<f64>,
    /// Why the candidate was dropped, if it was.
    pub disqualified: Option<String>,
    /// Training examples that produced demonstrations.
    pub bootstrapped: usize,
    /// Failed training plus validation examples.
    pub failures: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CompileReport {
    pub candidates: Vec<CandidateReport>,
    /// Index into `candidates` of the program returned.
    pub best: usize,
}

#[derive(Clone)]
pub struct Compiled {
    pub program: Program,
    pub report: CompileReport,
}

pub struct Compiler {
    config: CompilerConfig,
    kind: CompilerKind,
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Result<Self, CompileError> {
        config.validate()?;
        let kind = config.kind()?;
        Ok(Self { config, kind })
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn kind(&self) -> CompilerKind {
        self.kind
    }

    /// Compile the unfrozen stages of `student`, bootstrapping from `teacher`.
    ///
    /// `valset` is only used by random search.
    pub async fn compile(
        &self,
        lm: &dyn Completion,
        student: &Program,
        teacher: &Program,
        trainset: &[Example],
        valset: &[Example],
    ) -> Result<Compiled, CompileError> {
        match self.kind {
            CompilerKind::BootstrapFewShot => {
                self.single_pass(lm, student, teacher, trainset, SuccessMode::Plain)
                    .await
            }
            CompilerKind::BootstrapFewShotGain => {
                self.single_pass(lm, student, teacher, trainset, SuccessMode::Gain)
                    .await
            }
            CompilerKind::RandomSearch => {
                self.random_search(lm, student, teacher, trainset, valset)
                    .await
            }
        }
    }

    async fn single_pass(
        &self,
        lm: &dyn Completion,
        student: &Program,
        teacher: &Program,
        trainset: &[Example],
        mode: SuccessMode,
    ) -> Result<Compiled, CompileError> {
        let settings = BootstrapSettings::from_config(&self.config, mode);
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let out = bootstrap(lm, student, teacher, trainset, &settings, &mut rng).await?;
        let report = CompileReport {
            candidates: vec![CandidateReport {
                kind: CandidateKind::Unshuffled,
                score: None,
                disqualified: None,
                bootstrapped: out.report.bootstrapped.len(),
                failures: out.report.failures.len(),
            }],
            best: 0,
        };
        Ok(Compiled {
            program: out.program,
            report,
        })
    }

    /// Candidates in generation order.
    pub fn candidate_kinds(&self) -> Vec<CandidateKind> {
        let mut kinds = vec![CandidateKind::ZeroShot];
        if self.config.max_labeled_demos > 0 {
            kinds.push(CandidateKind::LabeledOnly);
        }
        kinds.push(CandidateKind::Unshuffled);
        kinds.extend((0..self.config.num_candidate_programs).map(|i| CandidateKind::Shuffled {
            seed: self.config.seed.wrapping_add(i as u64),
        }));
        kinds
    }

    async fn random_search(
        &self,
        lm: &dyn Completion,
        student: &Program,
        teacher: &Program,
        trainset: &[Example],
        valset: &[Example],
    ) -> Result<Compiled, CompileError> {
        let mut baseline = student.fork();
        baseline.reset_uncompiled();

        let mut report = CompileReport::default();
        let mut best: Option<(f64, Program)> = None;

        for kind in self.candidate_kinds() {
            let (program, bootstrapped, boot_failures) =
                match self.candidate(lm, kind, &baseline, teacher, trainset).await {
                    Ok(built) => built,
                    Err(CompileError::BudgetExceeded { errors, max_errors }) => {
                        warn!(candidate = %kind, errors, max_errors, "candidate disqualified while bootstrapping");
                        report.candidates.push(CandidateReport {
                            kind,
                            score: None,
                            disqualified: Some(format!(
                                "bootstrap failed on {errors} examples (max {max_errors})"
                            )),
                            bootstrapped: 0,
                            failures: errors,
                        });
                        continue;
                    }
                    Err(e) => return Err(e),
                };

            let eval = Evaluation::run(&program, lm, valset, self.config.num_threads).await;
            let failures = eval.failures().len();
            if let Some(max_errors) = self.config.validation_max_errors
                && failures > max_errors
            {
                if self.config.fail_fast {
                    return Err(CompileError::BudgetExceeded {
                        errors: failures,
                        max_errors,
                    });
                }
                warn!(candidate = %kind, failures, max_errors, "candidate disqualified while validating");
                report.candidates.push(CandidateReport {
                    kind,
                    score: None,
                    disqualified: Some(format!(
                        "validation failed on {failures} examples (max {max_errors})"
                    )),
                    bootstrapped,
                    failures: boot_failures + failures,
                });
                continue;
            }

            let score = eval.score(self.config.metric);
            info!(candidate = %kind, score, bootstrapped, failures, "candidate scored");
            if best.as_ref().is_none_or(|(top, _)| score > *top) {
                report.best = report.candidates.len();
                best = Some((score, program));
            }
            report.candidates.push(CandidateReport {
                kind,
                score: Some(score),
                disqualified: None,
                bootstrapped,
                failures: boot_failures + failures,
            });
        }

        let Some((score, program)) = best else {
            return Err(CompileError::NoViableCandidate);
        };
        info!(
            candidate = %report.candidates[report.best].kind,
            score,
            metric = %self.config.metric,
            "selected candidate"
        );
        Ok(Compiled { program, report })
    }

    /// Build one candidate from a fork of `baseline`. Returns the program,
    /// the number of bootstrapped examples and the bootstrap failures.
    async fn candidate(
        &self,
        lm: &dyn Completion,
        kind: CandidateKind,
        baseline: &Program,
        teacher: &Program,
        trainset: &[Example],
    ) -> Result<(Program, usize, usize), CompileError> {
        let mut settings = BootstrapSettings::from_config(&self.config, SuccessMode::Plain);
        match kind {
            CandidateKind::ZeroShot => Ok((baseline.fork(), 0, 0)),
            CandidateKind::LabeledOnly => {
                let mut program = baseline.fork();
                let mut rng = StdRng::seed_from_u64(self.config.seed);
                seed_labeled(&mut program, trainset, self.config.max_labeled_demos, &mut rng)?;
                Ok((program, 0, 0))
            }
            CandidateKind::Unshuffled => {
                let mut rng = StdRng::seed_from_u64(self.config.seed);
                let out = bootstrap(lm, baseline, teacher, trainset, &settings, &mut rng).await?;
                Ok((out.program, out.report.bootstrapped.len(), out.report.failures.len()))
            }
            CandidateKind::Shuffled { seed } => {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut shuffled = trainset.to_vec();
                shuffled.shuffle(&mut rng);
                if settings.max_bootstrapped_demos > 0 {
                    settings.max_bootstrapped_demos =
                        rng.gen_range(1..=settings.max_bootstrapped_demos);
                }
                let out = bootstrap(lm, baseline, teacher, &shuffled, &settings, &mut rng).await?;
                Ok((out.program, out.report.bootstrapped.len(), out.report.failures.len()))
            }
        }
    }
}
