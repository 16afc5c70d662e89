use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fern::colors::{Color, ColoredLevelConfig};

mod amend_command;
mod console;
mod datetime;
mod log_command;
mod project;
mod project_command;
mod sample_data;
mod storage;
mod store;
mod timer;
mod timer_command;
mod transfer_command;

use amend_command::{AmendArgs, AmendCommand};
use console::ConsoleMarkdownList;
use log_command::{LogArgs, LogCommand};
use project_command::{CommitsArgs, ProjectArgs, ProjectCommand};
use storage::JsonStateRepository;
use store::ProjectStore;
use timer::TimerEngine;
use timer_command::{TerminalBell, TimerArgs, TimerCommand};
use transfer_command::{ExportArgs, ImportArgs, TransferCommand};

/// プロジェクトごとの作業時間を記録するためのCLIアプリケーション。
///
/// # Examples
/// ```
/// $ cargo run -- project add "Sample Project"
/// $ cargo run -- timer run "Sample Project"
/// ```
#[derive(Debug, Parser)]
#[clap(version, about)]
struct Args {
    #[clap(subcommand)]
    subcommand: SubCommands,
}

/// サブコマンドを表す列挙型。
#[derive(Debug, Subcommand)]
enum SubCommands {
    /// Manage projects
    Project(ProjectArgs),
    /// Show the commit history of a project
    Commits(CommitsArgs),
    /// Log a manual time commit
    Log(LogArgs),
    /// Amend an existing commit
    Amend(AmendArgs),
    /// Control the per-project interval timer
    Timer(TimerArgs),
    /// Export all projects as JSON
    Export(ExportArgs),
    /// Import projects from a JSON export
    Import(ImportArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logger().context("Failed to set up the logger")?;
    let args = Args::parse();

    let repository = JsonStateRepository::new().context("Failed to open the data directory")?;
    let mut store = ProjectStore::load_or_seed(repository.clone())?;
    let mut stdout = io::stdout();

    match args.subcommand {
        SubCommands::Project(project) => {
            let mut presenter = ConsoleMarkdownList::new(&mut stdout);
            ProjectCommand::new(&mut store).run(project, &mut presenter)?;
        }
        SubCommands::Commits(commits) => {
            let mut presenter = ConsoleMarkdownList::new(&mut stdout);
            ProjectCommand::new(&mut store).run_commits(commits, &mut presenter)?;
        }
        SubCommands::Log(log) => LogCommand::new(&mut store).run(log)?,
        SubCommands::Amend(amend) => AmendCommand::new(&mut store).run(amend)?,
        SubCommands::Export(export) => TransferCommand::new(&mut store).export(export)?,
        SubCommands::Import(import) => TransferCommand::new(&mut store).import(import)?,
        SubCommands::Timer(timer) => {
            let engine = TimerEngine::new(repository, store)?;
            engine.set_notifier(Arc::new(TerminalBell));
            TimerCommand::new(&engine).run(timer).await?;
        }
    }

    Ok(())
}

/// ログ出力を初期化する。ログはstderrへ書き出す。
fn setup_logger() -> Result<()> {
    let colors = ColoredLevelConfig::new()
        .info(Color::Green)
        .warn(Color::Yellow)
        .error(Color::Red);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                colors.color(record.level()),
                message
            ))
        })
        .level(log::LevelFilter::Warn)
        .level_for("pomoro", log::LevelFilter::Info)
        .chain(io::stderr())
        .apply()
        .context("Failed to initialize the logger")?;

    Ok(())
}
