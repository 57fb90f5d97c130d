use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::Target;

#[derive(Parser)]
#[command(name = "feedbot-deploy")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Deploy a scheduled feed-digest bot to a cron host or a serverless function", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Deployment file (defaults to feedbot.toml in the config directory)
    #[arg(short, long, global = true, env = "FEEDBOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Where the job runs (defaults to job.target)
    #[arg(short, long, global = true, value_enum)]
    pub target: Option<TargetArg>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy the job, creating or updating every resource
    Apply(ApplyArgs),

    /// Tear the job down again
    Destroy(DestroyArgs),

    /// Show what apply or destroy would change
    Plan(PlanArgs),

    /// Print the rendered configuration
    Render(RenderArgs),

    /// Render and validate the configuration without deploying
    Check(CheckArgs),

    /// Show the last recorded run
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum TargetArg {
    Host,
    Serverless,
}

impl From<TargetArg> for Target {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Host => Target::Host,
            TargetArg::Serverless => Target::Serverless,
        }
    }
}

/// Template variable overrides
#[derive(Args, Default)]
pub struct VarArgs {
    /// Set a template variable (repeatable), e.g. --var users=rustlang
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub vars: VarArgs,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct DestroyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub vars: VarArgs,

    /// Preview a teardown instead of a deployment
    #[arg(long)]
    pub destroy: bool,
}

#[derive(Args)]
pub struct RenderArgs {
    #[command(flatten)]
    pub vars: VarArgs,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub vars: VarArgs,

    /// Also run the program's own --validate mode locally
    #[arg(long)]
    pub validate: bool,
}

/// Parse `key=value`
fn parse_var(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing variable name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}
