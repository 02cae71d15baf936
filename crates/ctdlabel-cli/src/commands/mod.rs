use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use ctdlabel_core::evaluation::EvaluationReport;
use ctdlabel_core::partition::chunk_size;
use ctdlabel_core::sampling::CategorySample;
use ctdlabel_core::{
    AppConfig, Category, LabelError, LabelingContext, LabelingRun, ResultTable, evaluate,
    load_annotations, load_expression_universe, plan_chunks, run_labeling, sample_for_annotation,
};
use serde::Serialize;

use crate::cli::{Cli, Commands, EvaluateArgs, PlanArgs, RunArgs, SampleArgs};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    /// Chunks were attempted and none of them succeeded.
    TotalFailure,
}

impl Outcome {
    pub(crate) fn exit_code(self) -> ExitCode {
        match self {
            Self::Completed => ExitCode::SUCCESS,
            Self::TotalFailure => ExitCode::FAILURE,
        }
    }
}

#[derive(Debug, Serialize)]
struct PlanReport {
    target_chunks: usize,
    expressions: usize,
    jobs: usize,
    categories: Vec<CategoryPlanSummary>,
}

#[derive(Debug, Serialize)]
struct CategoryPlanSummary {
    category: Category,
    expressions: usize,
    chunk_size: usize,
    chunks: Vec<ChunkSummary>,
}

#[derive(Debug, Serialize)]
struct ChunkSummary {
    name: String,
    items: usize,
}

#[derive(Debug, Serialize)]
struct SampleReport {
    output: String,
    requested: usize,
    sampled: usize,
    seed: u64,
    categories: Vec<CategorySample>,
}

pub(crate) fn run(cli: Cli) -> Result<Outcome> {
    let mut config = AppConfig::from_env().context("failed to load configuration from environment")?;
    if let Some(path) = cli.taxonomy {
        config.taxonomy_path = Some(path);
    }
    execute(config, cli.command)
}

fn execute(mut config: AppConfig, command: Commands) -> Result<Outcome> {
    match command {
        Commands::Run(args) => {
            apply_run_overrides(&mut config, &args);
            let run = label(&config, &args)?;
            print_json(&run.report)?;
            if run.report.is_total_failure() {
                return Ok(Outcome::TotalFailure);
            }
        }
        Commands::Plan(args) => {
            print_json(&build_plan(&config, &args)?)?;
        }
        Commands::Taxonomy => {
            let taxonomy = config.load_taxonomy().context("failed to load taxonomy")?;
            print_json(&taxonomy)?;
        }
        Commands::Evaluate(args) => {
            print_json(&build_evaluation(&config, &args)?)?;
        }
        Commands::Sample(args) => {
            print_json(&write_sample(&config, &args)?)?;
        }
    }
    Ok(Outcome::Completed)
}

/// Flags win over environment values.
fn apply_run_overrides(config: &mut AppConfig, args: &RunArgs) {
    let batch = &mut config.batch;
    if let Some(chunks) = args.chunks {
        batch.chunks = chunks;
    }
    if let Some(secs) = args.poll_interval_secs {
        batch.poll_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = args.max_wait_secs {
        batch.max_wait = Duration::from_secs(secs);
    }
    if let Some(secs) = args.deadline_secs {
        batch.run_deadline = Some(Duration::from_secs(secs));
    }
    batch.parallel_categories |= args.parallel_categories;
    batch.strict_labels |= args.strict_labels;
    if args.no_resume {
        batch.resume = false;
    }
    if let Some(backend) = args.backend {
        config.service.backend = backend;
    }
    if let Some(model) = &args.model {
        config.service.model.clone_from(model);
    }
}

fn label(config: &AppConfig, args: &RunArgs) -> Result<LabelingRun> {
    let ctx = LabelingContext::from_app_config(config, &args.workdir)
        .context("failed to prepare labeling context")?;
    let universe = load_expression_universe(&args.input, ctx.taxonomy())
        .with_context(|| format!("failed to load input table {}", args.input.display()))?;
    Ok(run_labeling(&ctx, &universe)?)
}

fn build_plan(config: &AppConfig, args: &PlanArgs) -> Result<PlanReport> {
    let taxonomy = config.load_taxonomy().context("failed to load taxonomy")?;
    let target = args.chunks.unwrap_or(config.batch.chunks);
    let universe = load_expression_universe(&args.input, &taxonomy)
        .with_context(|| format!("failed to load input table {}", args.input.display()))?;
    let chunks = plan_chunks(&universe, &taxonomy, target)?;

    let mut categories = Vec::<CategoryPlanSummary>::new();
    for chunk in &chunks {
        let summary = ChunkSummary {
            name: chunk.name(),
            items: chunk.len(),
        };
        match categories.last_mut() {
            Some(entry) if entry.category == chunk.category => {
                entry.expressions += summary.items;
                entry.chunks.push(summary);
            }
            _ => categories.push(CategoryPlanSummary {
                category: chunk.category,
                expressions: summary.items,
                chunk_size: 0,
                chunks: vec![summary],
            }),
        }
    }
    for entry in &mut categories {
        entry.chunk_size = chunk_size(entry.expressions, target);
    }

    Ok(PlanReport {
        target_chunks: target,
        expressions: universe.total(),
        jobs: chunks.len(),
        categories,
    })
}

fn build_evaluation(config: &AppConfig, args: &EvaluateArgs) -> Result<EvaluationReport> {
    let taxonomy = config.load_taxonomy().context("failed to load taxonomy")?;
    let table = ResultTable::load(&args.results)
        .with_context(|| format!("failed to load result table {}", args.results.display()))?;
    let annotations = load_annotations(&args.annotations, &taxonomy)
        .with_context(|| format!("failed to load annotations {}", args.annotations.display()))?;
    Ok(evaluate(&table, &annotations, &taxonomy))
}

fn write_sample(config: &AppConfig, args: &SampleArgs) -> Result<SampleReport> {
    let taxonomy = config.load_taxonomy().context("failed to load taxonomy")?;
    let universe = load_expression_universe(&args.input, &taxonomy)
        .with_context(|| format!("failed to load input table {}", args.input.display()))?;
    let categories = if args.categories.is_empty() {
        taxonomy.categories().map(|(category, _)| category).collect::<Vec<_>>()
    } else {
        args.categories.clone()
    };
    let sample = sample_for_annotation(&universe, &categories, args.total, args.seed)?;
    std::fs::write(&args.output, sample.to_csv()?)
        .with_context(|| format!("failed to write annotation sheet {}", args.output.display()))?;
    tracing::info!(
        output = %args.output.display(),
        sampled = sample.len(),
        "annotation sheet written"
    );
    Ok(SampleReport {
        output: args.output.display().to_string(),
        requested: sample.requested,
        sampled: sample.len(),
        seed: sample.seed,
        categories: sample.categories,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

/// Prints the structured error payload; the machine code comes from the core error when present.
pub(crate) fn report_error(operation: &str, err: &anyhow::Error) {
    let mut payload = match err.downcast_ref::<LabelError>() {
        Some(label_err) => label_err.to_payload(operation),
        None => LabelError::Internal(err.to_string()).to_payload(operation),
    };
    payload.message = format!("{err:#}");
    tracing::error!(
        code = %payload.code,
        trace_id = %payload.trace_id,
        "{}",
        payload.message
    );
    if let Err(print_err) = print_json(&payload) {
        eprintln!("{}: {} ({print_err})", payload.code, payload.message);
    }
}
