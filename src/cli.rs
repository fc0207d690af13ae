use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "bias-metrics",
    version,
    about = "Bias and ranking-fairness metrics over repeated AI search runs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Analyze(AnalyzeArgs),
    Rank(RankArgs),
    Compare(CompareArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, default_value = ".cache/bias-metrics")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub analysis_date: Option<NaiveDate>,

    #[arg(long, default_value_t = false)]
    pub no_store: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long)]
    pub runs: PathBuf,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub bootstrap_iterations: Option<usize>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum WeightingArg {
    Linear,
    Reciprocal,
    Logarithmic,
}

#[derive(Args, Debug, Clone)]
pub struct RankArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long)]
    pub runs: PathBuf,

    #[arg(long)]
    pub reference: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub weighting: Option<WeightingArg>,
}

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub reference: Option<PathBuf>,

    #[arg(long)]
    pub domain_labels: Option<PathBuf>,

    #[arg(long)]
    pub rbo_persistence: Option<f64>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/bias-metrics")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}
