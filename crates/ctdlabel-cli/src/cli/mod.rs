use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ctdlabel_core::{BackendKind, Category};

mod parsers;


use self::parsers::{
    parse_backend, parse_category, parse_min_one_u64, parse_min_one_usize, parse_model,
};

#[derive(Debug, Parser)]
#[command(name = "ctdlabel")]
#[command(
    about = "Batch LLM labeling of clinical-trial demographic expressions",
    version
)]
pub struct Cli {
    /// TOML label sets replacing the built-in ones per category.
    #[arg(long, global = true, value_name = "TOML")]
    pub taxonomy: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Label every expression of an upstream table and cache the result table.
    Run(RunArgs),
    /// Show the chunk plan for an upstream table without calling the service.
    Plan(PlanArgs),
    /// Print the effective label sets.
    Taxonomy,
    /// Score a result table against annotated labels.
    Evaluate(EvaluateArgs),
    /// Write a stratified, seeded annotation sheet from an upstream table.
    Sample(SampleArgs),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Run(_) => "run",
            Self::Plan(_) => "plan",
            Self::Taxonomy => "taxonomy",
            Self::Evaluate(_) => "evaluate",
            Self::Sample(_) => "sample",
        }
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Upstream CSV with `cat_title` and `cat_exp` columns.
    #[arg(long)]
    pub input: PathBuf,
    /// Directory holding the cache, lock, manifest and per-chunk artifacts.
    #[arg(long, default_value = ".")]
    pub workdir: PathBuf,
    #[arg(long, value_parser = parse_min_one_usize)]
    pub chunks: Option<usize>,
    #[arg(long, value_parser = parse_backend)]
    pub backend: Option<BackendKind>,
    #[arg(long, value_parser = parse_model)]
    pub model: Option<String>,
    #[arg(long, value_parser = parse_min_one_u64)]
    pub poll_interval_secs: Option<u64>,
    /// Wait budget per job.
    #[arg(long, value_parser = parse_min_one_u64)]
    pub max_wait_secs: Option<u64>,
    /// Overall budget for the whole run.
    #[arg(long, value_parser = parse_min_one_u64)]
    pub deadline_secs: Option<u64>,
    #[arg(long, default_value_t = false)]
    pub parallel_categories: bool,
    /// Store labels outside the label set as null.
    #[arg(long, default_value_t = false)]
    pub strict_labels: bool,
    /// Resubmit every chunk even when its artifacts are already on disk.
    #[arg(long, default_value_t = false)]
    pub no_resume: bool,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[arg(long)]
    pub input: PathBuf,
    #[arg(long, value_parser = parse_min_one_usize)]
    pub chunks: Option<usize>,
}

#[derive(Debug, Args)]
pub struct EvaluateArgs {
    /// Result table (`cat_title,cat_exp,piv_cat`).
    #[arg(long)]
    pub results: PathBuf,
    /// Annotation CSV with a `cat_label` column; `,` or `;` separated.
    #[arg(long)]
    pub annotations: PathBuf,
}

#[derive(Debug, Args)]
pub struct SampleArgs {
    #[arg(long)]
    pub input: PathBuf,
    /// Annotation sheet to write.
    #[arg(long, default_value = "annotation_sample.csv")]
    pub output: PathBuf,
    #[arg(long, default_value_t = 200, value_parser = parse_min_one_usize)]
    pub total: usize,
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// Categories to draw from, in quota order; defaults to every labelable category.
    #[arg(long = "category", value_parser = parse_category)]
    pub categories: Vec<Category>,
}
