mod cli;
mod commands;
mod config;
mod driver;
mod paths;
mod plans;
mod progress;
mod render;
mod resource;
mod runner;
mod stage;
mod state;
mod sudo;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

use crate::config::Target;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config_path: Option<PathBuf>,
    pub target: Option<Target>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config_path: cli.config,
        target: cli.target.map(Target::from),
    };
    log::debug!("Verbosity {}", ctx.verbose);

    match cli.command {
        Command::Apply(args) => commands::deploy::apply(&ctx, args),
        Command::Destroy(args) => commands::deploy::destroy(&ctx, args),
        Command::Plan(args) => commands::plan::run(&ctx, args),
        Command::Render(args) => commands::config::render(&ctx, args),
        Command::Check(args) => commands::config::check(&ctx, args),
        Command::Status => commands::status::run(&ctx),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "feedbot-deploy", &mut io::stdout());
            Ok(())
        }
    }
}
