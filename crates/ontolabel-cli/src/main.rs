use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ontolabel_ai::{Embedder, EmbeddingIndex, HttpCompletion, Ontology, Program, TextEmbedder};
use ontolabel_compile::{Evaluation, OptimizerConfig, Optimizer};
use ontolabel_core::{PipelineConfig, ProgramState};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

mod data;
mod display;

/// Extreme multi-label classification with an Infer-Retrieve-Rank pipeline.
#[derive(Parser)]
#[command(name = "ontolabel", version, about)]
struct Cli {
    /// Directory holding the embedding model's `model.onnx` and `tokenizer.json`.
    #[arg(long, env = "ONTOLABEL_MODEL_DIR", global = true)]
    model_dir: Option<PathBuf>,

    /// Base URL of an OpenAI-compatible completion endpoint.
    #[arg(
        long,
        env = "ONTOLABEL_COMPLETION_URL",
        default_value = "https://api.openai.com",
        global = true
    )]
    completion_url: String,

    #[arg(long, env = "ONTOLABEL_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

/// Where a program comes from: a bare pipeline config or a saved program.
#[derive(clap::Args)]
#[group(required = true, multiple = false)]
struct ProgramSource {
    /// Pipeline config JSON.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Saved program state JSON.
    #[arg(long)]
    state: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Compute and cache the ontology embeddings for a pipeline config.
    Embed {
        #[arg(long)]
        config: PathBuf,
    },
    /// Show the ontology terms closest to a query.
    Retrieve {
        #[arg(long)]
        config: PathBuf,
        query: String,
        #[arg(short, default_value_t = 10)]
        k: usize,
    },
    /// Run a program over an example set and report RP@5/10/50.
    Run {
        #[command(flatten)]
        program: ProgramSource,
        /// JSON Lines examples.
        #[arg(long)]
        examples: PathBuf,
        /// Write predicted labels as JSON Lines.
        #[arg(long)]
        predictions: Option<PathBuf>,
        #[arg(long, default_value_t = 8)]
        threads: usize,
    },
    /// Optimise a program's demonstrations and save the result.
    Compile {
        #[command(flatten)]
        program: ProgramSource,
        /// Optimizer config JSON.
        #[arg(long)]
        optimizer: PathBuf,
        #[arg(long)]
        train: PathBuf,
        #[arg(long)]
        val: PathBuf,
        /// Where to save the compiled program state.
        #[arg(long, short)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    info!("ontolabel v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Command::Embed { config } => embed(&cli, config),
        Command::Retrieve { config, query, k } => retrieve(&cli, config, query, *k),
        Command::Run {
            program,
            examples,
            predictions,
            threads,
        } => run(&cli, program, examples, predictions.as_deref(), *threads).await,
        Command::Compile {
            program,
            optimizer,
            train,
            val,
            output,
        } => compile(&cli, program, optimizer, train, val, output).await,
    }
}

impl Cli {
    fn embedder(&self, config: &PipelineConfig) -> anyhow::Result<Arc<dyn TextEmbedder>> {
        let dir = self
            .model_dir
            .as_deref()
            .context("no embedding model: pass --model-dir or set ONTOLABEL_MODEL_DIR")?;
        let embedder = Embedder::load(dir, config.retriever_model_name.clone())
            .context("loading embedding model")?;
        Ok(Arc::new(embedder))
    }

    fn completion(&self) -> HttpCompletion {
        HttpCompletion::new(self.completion_url.clone(), self.api_key.clone())
    }

    fn program(&self, source: &ProgramSource) -> anyhow::Result<Program> {
        let state = match (&source.config, &source.state) {
            (_, Some(path)) => ProgramState::from_json_file(path)
                .with_context(|| format!("reading program state {}", path.display()))?,
            (Some(path), None) => ProgramState::new(load_config(path)?),
            (None, None) => anyhow::bail!("pass --config or --state"),
        };
        let embedder = self.embedder(&state.config)?;
        Ok(Program::from_state(state, embedder)?)
    }
}

fn load_config(path: &Path) -> anyhow::Result<PipelineConfig> {
    let config = PipelineConfig::from_json_file(path)
        .with_context(|| format!("reading pipeline config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn index(cli: &Cli, config: &PipelineConfig) -> anyhow::Result<EmbeddingIndex> {
    let ontology = Ontology::from_config(config)?;
    Ok(EmbeddingIndex::from_config(config, ontology, cli.embedder(config)?)?)
}

fn embed(cli: &Cli, config: &Path) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = load_config(config)?;
    let index = index(cli, &config)?;
    eprintln!(
        "  {} terms of {} embedded ({} dims, {} mode) in {:.1}s",
        index.ontology().len(),
        index.ontology().name(),
        index.dim(),
        index.mode().as_str(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn retrieve(cli: &Cli, config: &Path, query: &str, k: usize) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let index = index(cli, &config)?;
    for (score, term) in index.retrieve_individual(query, k)? {
        println!("{score:.4}  {term}");
    }
    Ok(())
}

async fn run(
    cli: &Cli,
    source: &ProgramSource,
    examples: &Path,
    predictions: Option<&Path>,
    threads: usize,
) -> anyhow::Result<()> {
    let program = cli.program(source)?;
    let examples = data::load_examples(examples)?;
    let lm = cli.completion();

    let start = Instant::now();
    let eval = Evaluation::run(&program, &lm, &examples, threads).await;
    info!(
        examples = examples.len(),
        elapsed_secs = start.elapsed().as_secs_f64(),
        "evaluation finished"
    );

    display::print_scores(&eval, examples.len());
    if let Some(path) = predictions {
        let rows: Vec<_> = examples
            .iter()
            .zip(eval.predictions())
            .filter_map(|(example, labels)| labels.as_deref().map(|labels| (example, labels)))
            .collect();
        data::write_predictions(path, &rows)?;
        eprintln!("  Wrote {} predictions to {}", rows.len(), path.display());
    }
    Ok(())
}

async fn compile(
    cli: &Cli,
    source: &ProgramSource,
    optimizer: &Path,
    train: &Path,
    val: &Path,
    output: &Path,
) -> anyhow::Result<()> {
    let program = cli.program(source)?;
    let optimizer_config = OptimizerConfig::from_json_file(optimizer)
        .with_context(|| format!("reading optimizer config {}", optimizer.display()))?;
    let optimizer = Optimizer::new(optimizer_config)?;
    let train = data::load_examples(train)?;
    let val = data::load_examples(val)?;
    let lm = cli.completion();

    let optimized = optimizer.optimize(&lm, &program, &train, &val).await?;
    for (round, report) in optimized.rounds.iter().enumerate() {
        display::print_compile_report(round, report);
    }
    optimized
        .program
        .save(output)
        .with_context(|| format!("saving program to {}", output.display()))?;
    eprintln!("  Saved compiled program to {}", output.display());
    Ok(())
}
