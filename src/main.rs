//! Evolve - autonomous evolution loop for git repositories.
//!
//! Command-line entry point: drives full iterations against a configured
//! actor, or exposes the `begin` / `complete` halves for manual driving.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;

use evolve::actor::CommandActor;
use evolve::config::EvolveConfig;
use evolve::engine::EvolutionEngine;
use evolve::error::{EvolveError, Result};
use evolve::ledger::LedgerEntry;

#[derive(Parser)]
#[command(name = "evolve")]
#[command(version = "0.1.0")]
#[command(about = "Autonomous test-gated evolution loop for git repositories", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run full iterations with the configured actor command
    Run {
        /// Number of iterations to run
        #[arg(short = 'n', long, default_value = "1")]
        iterations: u32,

        /// Actor command (overrides [actor].command in evolve.toml)
        #[arg(long)]
        actor: Option<String>,
    },

    /// Begin an iteration and suspend for manual changes
    Begin,

    /// Complete the in-flight iteration
    Complete {
        /// Finish a rollback interrupted by a crash instead
        #[arg(long)]
        resume_rollback: bool,
    },

    /// Show loop status: in-flight state, last result, baseline
    Status,

    /// Show the trailing run history
    History {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// List or resolve recorded failures
    Failures {
        #[command(subcommand)]
        command: FailureCommands,
    },
}

#[derive(Subcommand)]
enum FailureCommands {
    /// List failure records (open ones by default)
    List {
        /// Include resolved records
        #[arg(long)]
        all: bool,
    },

    /// Mark a failure resolved with an explicit root cause
    Resolve {
        /// Failure key, as shown by `failures list`
        key: String,

        /// Root cause of the failure
        #[arg(long)]
        root_cause: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "evolve=debug,info"
    } else {
        "evolve=info,warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());

    if !project_path.exists() {
        eprintln!(
            "{} Project directory does not exist: {}",
            "Error:".red().bold(),
            project_path.display()
        );
        std::process::exit(1);
    }

    if let Err(e) = dispatch(cli.command, &project_path).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

async fn dispatch(command: Commands, project: &PathBuf) -> Result<()> {
    let config = EvolveConfig::load(project)?;
    let engine = EvolutionEngine::new(project, config.clone())?;

    match command {
        Commands::Run { iterations, actor } => {
            let command = actor.or(config.actor.command.clone()).ok_or_else(|| {
                EvolveError::config(
                    "no actor command configured; set [actor].command in evolve.toml, \
                     pass --actor, or drive iterations with `begin` / `complete`",
                )
            })?;

            let timeout = config.timeouts.actor_secs.map(Duration::from_secs);
            let actor = CommandActor::new(command, timeout);

            for _ in 0..iterations {
                let report = engine.run_iteration(&actor).await?;
                println!("{}", report.render());
            }
        }

        Commands::Begin => {
            let state = engine.begin().await?;
            println!(
                "Iteration {} begun: mode {}, focus {}, health {}/100",
                state.iteration, state.mode, state.focus, state.health
            );
            println!(
                "Briefing written to {}. Make changes, then run {}.",
                engine.briefing_path().display(),
                "evolve complete".bold()
            );
        }

        Commands::Complete { resume_rollback } => {
            let report = if resume_rollback {
                engine.resume_rollback().await?
            } else {
                engine.complete().await?
            };
            println!("{}", report.render());
        }

        Commands::Status => {
            let status = engine.status()?;

            if let Some(state) = &status.in_flight {
                println!(
                    "{} iteration {} ({}, focus {}, phase {})",
                    "In flight:".yellow().bold(),
                    state.iteration,
                    state.mode,
                    state.focus,
                    state.phase
                );
            } else {
                println!("{} next iteration is {}", "Idle.".green(), status.next_iteration);
            }

            if let Some(pending) = &status.rollback_pending {
                println!(
                    "{} rollback for iteration {} is pending; run `evolve complete --resume-rollback`",
                    "Warning:".red().bold(),
                    pending.iteration
                );
            }

            if let Some(last) = status.last_result {
                println!("Last result: {last}");
            }

            let b = &status.baseline;
            println!(
                "Baseline: tests {}, coverage {}, performance {}, LOC {}",
                b.test_count.map_or("-".to_string(), |v| v.to_string()),
                b.coverage.map_or("-".to_string(), |v| format!("{v:.1}%")),
                b.performance.map_or("-".to_string(), |v| format!("{v:.0}")),
                b.lines_of_code.map_or("-".to_string(), |v| v.to_string()),
            );
        }

        Commands::History { limit } => {
            let entries = engine.ledger().entries()?;
            for entry in entries.iter().rev().take(limit).rev() {
                match entry {
                    LedgerEntry::Iteration(r) => println!(
                        "#{:>4} {} [{}/{}] {} ({})",
                        r.iteration,
                        r.finished_at.format("%Y-%m-%d %H:%M"),
                        r.mode,
                        r.focus,
                        r.outcome,
                        r.delta.summary()
                    ),
                    LedgerEntry::Rollback(r) => println!(
                        "#{:>4} rollback: restored {} (attempt on {})",
                        r.iteration,
                        &r.restored_hash[..8.min(r.restored_hash.len())],
                        r.failed_branch
                    ),
                    LedgerEntry::Analysis(r) => {
                        println!("#{:>4} analysis over {} iterations:", r.iteration, r.window);
                        for stats in &r.focus_stats {
                            println!(
                                "      {}: {:.0}% success over {}",
                                stats.focus,
                                stats.success_rate() * 100.0,
                                stats.iterations
                            );
                        }
                        for failure in &r.recurring_failures {
                            println!(
                                "      recurring: {} ({}x)",
                                failure.description, failure.occurrences
                            );
                        }
                    }
                }
            }
        }

        Commands::Failures { command } => match command {
            FailureCommands::List { all } => {
                let records = if all {
                    engine.failures().records()?
                } else {
                    engine.failures().open_records()?
                };

                if records.is_empty() {
                    println!("No failure records.");
                }
                for record in records {
                    let status = if record.resolved {
                        "resolved".green()
                    } else if record.escalated() {
                        "escalated".red().bold()
                    } else {
                        "open".yellow()
                    };
                    println!(
                        "{} [{}] {} ({}, seen {}x, iterations {}-{})",
                        record.key,
                        record.priority,
                        record.description,
                        status,
                        record.occurrences,
                        record.first_seen_iteration,
                        record.last_seen_iteration
                    );
                    if let Some(cause) = &record.root_cause {
                        println!("       root cause: {cause}");
                    }
                }
            }

            FailureCommands::Resolve { key, root_cause } => {
                let iteration = engine.ledger().next_iteration()?.saturating_sub(1);
                engine.failures().resolve(&key, root_cause, iteration)?;
                println!("Resolved {key}.");
            }
        },
    }

    Ok(())
}
