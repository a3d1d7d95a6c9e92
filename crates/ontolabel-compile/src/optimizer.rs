//! Optimisation strategies: which stages are compiled, in what order, and
//! against which teacher.

use ontolabel_ai::{Completion, Program};
use ontolabel_core::{ConfigError, Example, StageId};
use tracing::info;

use crate::config::{OptimizerConfig, OptimizerKind};
use crate::error::CompileError;
use crate::search::{CompileReport, Compiler};

pub struct Optimized {
    pub program: Program,
    /// One report per compile round.
    pub rounds: Vec<CompileReport>,
}

pub struct Optimizer {
    config: OptimizerConfig,
    kind: OptimizerKind,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Result<Self, CompileError> {
        config.validate()?;
        let kind = config.kind()?;
        Ok(Self { config, kind })
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    /// Compile `program`. The input program is left untouched.
    pub async fn optimize(
        &self,
        lm: &dyn Completion,
        program: &Program,
        trainset: &[Example],
        valset: &[Example],
    ) -> Result<Optimized, CompileError> {
        info!(
            optimizer = %self.kind,
            train = trainset.len(),
            val = valset.len(),
            "optimizing program"
        );
        match self.kind {
            OptimizerKind::EndToEnd => self.end_to_end(lm, program, trainset, valset).await,
            OptimizerKind::LeftToRight => self.left_to_right(lm, program, trainset, valset).await,
        }
    }

    /// Both stages in one search, with the infer compiler settings.
    async fn end_to_end(
        &self,
        lm: &dyn Completion,
        program: &Program,
        trainset: &[Example],
        valset: &[Example],
    ) -> Result<Optimized, CompileError> {
        let mut student = program.fork();
        if !self.config.rank_compile || student.rank_skip() {
            student.freeze(StageId::Rank);
        }
        if !self.config.infer_compile {
            student.freeze(StageId::Infer);
        }
        let mut teacher = student.fork();
        teacher.set_model(StageId::Infer, self.config.infer_teacher_model.clone());
        teacher.set_model(StageId::Rank, self.config.rank_teacher_model.clone());

        let compiler = Compiler::new(self.config.infer_compile_config.clone())?;
        let compiled = compiler
            .compile(lm, &student, &teacher, trainset, valset)
            .await?;

        let mut program = compiled.program;
        if self.config.infer_compile {
            program.freeze(StageId::Infer);
        }
        if self.config.rank_compile {
            program.freeze(StageId::Rank);
        }
        Ok(Optimized {
            program,
            rounds: vec![compiled.report],
        })
    }

    /// Infer first with ranking switched off, then Rank on top of the
    /// frozen infer stage.
    async fn left_to_right(
        &self,
        lm: &dyn Completion,
        program: &Program,
        trainset: &[Example],
        valset: &[Example],
    ) -> Result<Optimized, CompileError> {
        if program.rank_skip() {
            return Err(ConfigError::invalid(
                "rank_skip",
                "left-to-right optimisation needs the rank stage enabled",
            )
            .into());
        }

        // Round 1: infer.
        let mut student = program.fork();
        student.set_rank_skip(true);
        student.freeze(StageId::Rank);
        let mut teacher = student.fork();
        teacher.set_model(StageId::Infer, self.config.infer_teacher_model.clone());

        let hinted: Vec<Example>;
        let infer_trainset = if self.config.infer_hint {
            hinted = trainset.iter().map(Example::with_hint).collect();
            &hinted[..]
        } else {
            trainset
        };
        let infer_round = Compiler::new(self.config.infer_compile_config.clone())?
            .compile(lm, &student, &teacher, infer_trainset, valset)
            .await?;
        info!(stage = %StageId::Infer, "left-to-right round finished");

        // Round 2: rank, starting from the input program's rank stage.
        let mut student = infer_round.program;
        student.freeze(StageId::Infer);
        student.set_rank_skip(false);
        *student.stage_mut(StageId::Rank) = program.stage(StageId::Rank).clone();
        let mut teacher = student.fork();
        teacher.set_model(StageId::Rank, self.config.rank_teacher_model.clone());

        let rank_round = Compiler::new(self.config.rank_compile_config.clone())?
            .compile(lm, &student, &teacher, trainset, valset)
            .await?;
        info!(stage = %StageId::Rank, "left-to-right round finished");

        let mut program = rank_round.program;
        program.freeze(StageId::Rank);
        Ok(Optimized {
            program,
            rounds: vec![infer_round.report, rank_round.report],
        })
    }
}
