use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use crate::config::Config;
use crate::runtime::{shutdown, Program, ProgramIr};

#[derive(Parser)]
#[command(name = "goalvm")]
#[command(about = "goalvm - execution core for goal-directed programs", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Co-expression result queue capacity (overrides config)
    #[arg(long, global = true)]
    pub queue_capacity: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Link, initialize and run a program
    Run {
        /// Program IR (JSON)
        program: PathBuf,

        /// Arguments passed to main
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Print the global initialization order of a program
    Order {
        /// Program IR (JSON)
        program: PathBuf,
    },
}

/// Configuration for the parsed command line
pub fn load_config(cli: &Cli) -> Result<Config> {
    Config::builder()
        .config_path(cli.config.clone())
        .queue_capacity(cli.queue_capacity)
        .build()
}

fn read_program(path: &Path) -> Result<ProgramIr> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid program IR in {}", path.display()))
}

/// Execute a parsed command line; uncaught runtime errors end the process
pub fn run_cli(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Run { program, args } => {
            let ir = read_program(&program)?;
            let mut prog = Program::new(config.clone()).context("Failed to start runtime")?;
            let result = prog
                .link(ir)
                .and_then(|()| prog.initialize())
                .and_then(|()| prog.run_main(args));
            match result {
                Ok(value) => {
                    debug!(result = ?value, "main finished");
                    drop(prog);
                    shutdown(0)
                }
                Err(raised) => {
                    eprintln!("{}", raised.report(config.traceback_limit));
                    drop(prog);
                    shutdown(raised.exit_code())
                }
            }
        }

        Commands::Order { program } => {
            let ir = read_program(&program)?;
            let mut prog = Program::new(config.clone()).context("Failed to start runtime")?;
            let order = prog
                .link(ir)
                .and_then(|()| prog.initialization_order());
            match order {
                Ok(names) => {
                    for name in names {
                        println!("{name}");
                    }
                    Ok(())
                }
                Err(raised) => {
                    eprintln!("{}", raised.report(config.traceback_limit));
                    drop(prog);
                    shutdown(raised.exit_code())
                }
            }
        }
    }
}
