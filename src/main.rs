mod cli;
mod cluster;
mod commands;
mod config;
mod engine;
mod paths;
mod progress;
mod runner;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command, LeaseCommand};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: PathBuf,
}

impl Context {
    /// Load and validate the deploy settings
    pub fn settings(&self) -> Result<config::Settings> {
        config::Settings::load(&self.config)
    }
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
        config: cli.config,
    };

    match cli.command {
        Command::Deploy(args) => commands::deploy::run(&ctx, args),
        Command::Hash(args) => commands::hash::run(&ctx, args),
        Command::History(args) => commands::history::run(&ctx, args),
        Command::Status(args) => commands::status::run(&ctx, args.env),
        Command::Lease(cmd) => match cmd {
            LeaseCommand::Show(args) => commands::lease::show(&ctx, args.env),
            LeaseCommand::Release(args) => commands::lease::release(&ctx, args.env),
        },
        Command::Prune(args) => commands::prune::run(&ctx, args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "mqdeploy", &mut io::stdout());
            Ok(())
        }
    }
}
