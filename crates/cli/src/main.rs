use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ragd_server::{AppConfig, AppState};

mod eval;

#[derive(Parser)]
#[command(name = "ragd", version, about = "Retrieval and memory engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server.
    Serve,

    /// Index a project directory in-process, then exit.
    Index {
        /// Project name (falls back to PROJECT_NAME).
        #[arg(long)]
        project: Option<String>,
        /// Directory to index (falls back to PROJECT_PATH).
        #[arg(long)]
        path: Option<PathBuf>,
        /// Clear the live collection before indexing.
        #[arg(long)]
        force: bool,
    },

    /// Index a project, then keep it fresh from filesystem events.
    Watch {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Run a golden-query eval against a live API.
    Eval {
        /// Path to the golden-query JSON file.
        golden: PathBuf,
        /// Use /api/search-hybrid instead of /api/search.
        #[arg(long)]
        hybrid: bool,
        /// Write the full report as JSON.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Diff two saved eval reports.
    EvalCompare {
        before: PathBuf,
        after: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("LOG_LEVEL", "info")
            .write_style("LOG_STYLE"),
    )
    .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve => {
            let config = AppConfig::from_env()?;
            ragd_server::serve(config).await?;
            Ok(())
        }

        Command::Index {
            project,
            path,
            force,
        } => {
            let config = AppConfig::from_env()?;
            let project = project
                .or_else(|| config.default_project.clone())
                .context("no project given (use --project or PROJECT_NAME)")?;
            let path = path
                .or_else(|| config.default_project_path.clone().map(PathBuf::from))
                .context("no path given (use --path or PROJECT_PATH)")?;

            let state = AppState::build(config).await?;
            let request = ragd_protocol::api::IndexRequest {
                force,
                ..Default::default()
            };
            let outcome = state.indexer.index_project(&project, &path, &request).await?;
            println!(
                "indexed {project}: {} files, {} chunks, {} errors",
                outcome.files_indexed,
                outcome.chunks_indexed,
                outcome.errors.len()
            );
            for error in &outcome.errors {
                println!("  error: {error}");
            }
            Ok(())
        }

        Command::Watch { project, path } => {
            let config = AppConfig::from_env()?;
            let project = project
                .or_else(|| config.default_project.clone())
                .context("no project given (use --project or PROJECT_NAME)")?;
            let path = path
                .or_else(|| config.default_project_path.clone().map(PathBuf::from))
                .context("no path given (use --path or PROJECT_PATH)")?;

            let state = AppState::build(config).await?;
            let outcome = state
                .indexer
                .index_project(&project, &path, &Default::default())
                .await?;
            println!(
                "indexed {project}: {} files, {} chunks; watching {} for changes",
                outcome.files_indexed,
                outcome.chunks_indexed,
                path.display()
            );

            let watcher = ragd_indexer::ProjectWatcher::start(
                std::sync::Arc::clone(&state.indexer),
                project,
                path,
            )?;
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            watcher.stop();
            Ok(())
        }

        Command::Eval {
            golden,
            hybrid,
            output,
        } => {
            let report = eval::run(&golden, hybrid).await?;
            eval::print_report(&report);
            if let Some(output) = output {
                std::fs::write(&output, serde_json::to_string_pretty(&report)?)
                    .with_context(|| format!("cannot write {}", output.display()))?;
                println!("report written to {}", output.display());
            }
            Ok(())
        }

        Command::EvalCompare { before, after } => {
            let load = |path: &PathBuf| -> Result<eval::EvalReport> {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("{} is not an eval report", path.display()))
            };
            let comparison = eval::compare(&load(&before)?, &load(&after)?);
            eval::print_comparison(&comparison);
            Ok(())
        }
    }
}
