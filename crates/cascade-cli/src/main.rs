//! CLI binary for running, deriving and validating Cascade batch pipelines.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use cascade_pipeline::{
    validate, BatchExecutor, EventFilter, EventIterator, FileIterator, FileSelection,
    JsonResultStore, ParticleFilter, RunContext, RunSummary, Severity, SpectrumAnalyzer,
    SyntheticSource, Task,
};
use cascade_types::Configuration;

#[derive(Parser)]
#[command(name = "cascade", version, about = "Batch event-processing pipeline runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate events and fill spectra
    Run {
        /// Path to the run description (.json)
        run: PathBuf,

        /// Directory for result documents and checkpoint manifests
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Compute derived spectra from every result document in a directory
    Derive {
        /// Path to the run description (.json)
        run: PathBuf,

        /// Directory holding the primary result documents
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Validate a run description
    Validate {
        /// Path to the run description (.json)
        run: PathBuf,
    },

    /// Show the task tree a run description builds
    Info {
        /// Path to the run description (.json)
        run: PathBuf,
    },
}

/// On-disk run description.
///
/// `options` keys are scoped by task name: `Run.*` for the event loop,
/// `Gen.*` for the synthetic source, `Spectra.*` for the analyzer and
/// `Derive.*` for the derived pass.
#[derive(Debug, Deserialize)]
struct RunFile {
    #[serde(default)]
    options: Configuration,
    #[serde(default = "default_filters")]
    event_filters: Vec<EventFilter>,
    #[serde(default = "default_filters")]
    particle_filters: Vec<ParticleFilter>,
}

fn default_filters() -> Vec<cascade_pipeline::Filter> {
    vec![cascade_pipeline::Filter::accept_all()]
}

impl RunFile {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("reading run description {}", path.display()))?;
        Self::parse(&source).with_context(|| format!("parsing {}", path.display()))
    }

    fn parse(source: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    fn analyzer(&self) -> Task {
        let efs = self.event_filters.iter().cloned().map(Arc::new).collect();
        let pfs = self.particle_filters.iter().cloned().map(Arc::new).collect();
        Task::new("Spectra", SpectrumAnalyzer::new("Spectra", efs, pfs))
    }

    /// `Run(event loop) → [Gen(synthetic source), Spectra(analyzer)]`.
    fn event_tree(&self) -> Task {
        Task::new("Run", EventIterator::new())
            .with_child(Task::new("Gen", SyntheticSource::new()))
            .with_child(self.analyzer())
    }

    /// `Derive(derived file loop) → [Spectra(analyzer)]`.
    fn derive_tree(&self, input: &Path) -> Task {
        let suffix = match self.options.get("Derive.output_suffix") {
            Some(cascade_types::ConfigValue::Text(s)) => s.clone(),
            _ => "_derived".to_string(),
        };
        let selection = FileSelection::result_documents(input, &suffix);
        Task::new("Derive", FileIterator::derived(selection)).with_child(self.analyzer())
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { run, output } => cmd_run(&run, &output),
        Commands::Derive { run, input } => cmd_derive(&run, &input),
        Commands::Validate { run } => cmd_validate(&run),
        Commands::Info { run } => cmd_info(&run),
    }
}

fn cmd_run(path: &Path, output: &Path) -> anyhow::Result<()> {
    let file = RunFile::load(path)?;
    std::fs::create_dir_all(output)?;
    tracing::info!(run = %path.display(), output = %output.display(), "Starting event pass");
    let mut root = file.event_tree();
    let mut ctx = RunContext::new(JsonResultStore::new(output)).with_checkpoint_dir(output);
    let summary = BatchExecutor::new(file.options).run(&mut root, &mut ctx)?;
    report(&summary)
}

fn cmd_derive(path: &Path, input: &Path) -> anyhow::Result<()> {
    let file = RunFile::load(path)?;
    tracing::info!(run = %path.display(), input = %input.display(), "Starting derived pass");
    let mut root = file.derive_tree(input);
    let mut ctx = RunContext::new(JsonResultStore::new(input));
    let summary = BatchExecutor::new(file.options).run(&mut root, &mut ctx)?;
    report(&summary)
}

fn report(summary: &RunSummary) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    if !summary.succeeded() {
        tracing::error!(status = %summary.status, "Run did not succeed");
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let file = RunFile::load(path)?;
    let mut root = file.event_tree();
    root.configure(&file.options)?;
    let diagnostics = validate(&root);

    if diagnostics.is_empty() {
        println!("Run description is valid");
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        println!("[{}] {}: {}", severity, diag.rule, diag.message);
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let file = RunFile::load(path)?;
    let root = file.event_tree();

    println!("Tasks:");
    root.walk(&mut |task, depth| {
        println!("{}{} [{}]", "  ".repeat(depth + 1), task.name(), task.handler_type());
    });

    println!("\nEvent filters:");
    for f in &file.event_filters {
        println!("  {}", f.describe());
    }
    println!("Particle filters:");
    for f in &file.particle_filters {
        println!("  {}", f.describe());
    }
    Ok(())
}
