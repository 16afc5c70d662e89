use std::io::{self, Write};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::storage::StateRepository;
use crate::timer::{CompletionNotifier, ResetOutcome, TimerEngine};

/// `timer`サブコマンドの引数を表す構造体。
#[derive(Debug, clap::Args)]
pub struct TimerArgs {
    #[clap(subcommand)]
    pub subcommand: TimerSubCommands,
}

/// `timer`のサブコマンドを表す列挙型。
#[derive(Debug, clap::Subcommand)]
pub enum TimerSubCommands {
    /// Run the countdown until it completes, or Ctrl-C pauses it
    Run { id: String },
    /// Show the timer state for a project
    Status { id: String },
    /// Set the interval length for a project
    Set {
        id: String,
        #[clap(long = "minutes", help = "Interval length in minutes")]
        minutes: i64,
    },
    /// Commit the paused partial interval
    Commit { id: String },
    /// Reset the timer to a full interval
    Reset {
        id: String,
        #[clap(long = "yes", help = "Skip the confirmation for unsaved time")]
        yes: bool,
    },
}

/// 完了時にターミナルベルを鳴らすnotifier。
///
/// 通知はベストエフォートであり、出力に失敗しても無視する。
pub struct TerminalBell;

impl CompletionNotifier for TerminalBell {
    fn interval_completed(&self, project_id: &str, minutes: i64) {
        println!(
            "\x07Interval complete: committed {} min to {}",
            minutes, project_id
        );
        // 少し間隔を空けてベルを繰り返す
        tokio::spawn(async {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(800)).await;
                print!("\x07");
                let _ = io::stdout().flush();
            }
        });
    }
}

pub struct TimerCommand<'a, R: StateRepository + Send + 'static> {
    engine: &'a TimerEngine<R>,
}

impl<'a, R: StateRepository + Send + 'static> TimerCommand<'a, R> {
    /// 新しい`TimerCommand`を返す。
    pub fn new(engine: &'a TimerEngine<R>) -> Self {
        Self { engine }
    }

    /// `timer`サブコマンドの処理を行う。
    ///
    /// # Arguments
    ///
    /// * `args` - `timer`サブコマンドの引数
    pub async fn run(&self, args: TimerArgs) -> Result<()> {
        match args.subcommand {
            TimerSubCommands::Run { id } => self.run_countdown(&id).await?,
            TimerSubCommands::Status { id } => self.show_status(&id),
            TimerSubCommands::Set { id, minutes } => {
                self.engine.configure(&id, minutes)?;
                info!("Set the interval length for {} to {} min", id, minutes);
            }
            TimerSubCommands::Commit { id } => match self.engine.commit_partial(&id)? {
                Some(minutes) => println!("Committed {} min to {}", minutes, id),
                None => println!("No paused partial interval to commit for {}", id),
            },
            TimerSubCommands::Reset { id, yes } => match self.engine.reset(&id, yes)? {
                ResetOutcome::Reset => println!("Timer for {} is back to a full interval", id),
                ResetOutcome::NeedsConfirmation => println!(
                    "Timer for {} has unsaved time. Re-run with --yes to discard it.",
                    id
                ),
            },
        }

        Ok(())
    }

    /// カウントダウンを開始し、完了または中断まで残り時間を表示し続ける。
    ///
    /// Ctrl-Cでタイマーを一時停止し、未コミットの時間が残っている場合は
    /// その分数とコミット方法を案内する。終了前に必ずエンジンを停止する。
    async fn run_countdown(&self, id: &str) -> Result<()> {
        if self.engine.project(id).is_none() {
            bail!(
                "Project {} does not exist. Create it first with `pomoro project add`.",
                id
            );
        }

        self.engine.on_before_shutdown(Box::new(|any_running| {
            if any_running {
                warn!("Shutting down while timers are running. They will be restored as paused.");
            }
            true
        }));
        self.engine.start(id)?;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut ticker = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let view = self.engine.timer_view(id);
                    if !view.running {
                        // 完了して自動コミット済み
                        println!();
                        break;
                    }
                    print!("\r{}: {} remaining", id, format_remaining(view.time));
                    io::stdout().flush().context("Failed to flush stdout")?;
                }
                result = &mut ctrl_c => {
                    result.context("Failed to listen for the interrupt signal")?;
                    println!();
                    self.engine.stop(id)?;
                    if let Some(minutes) = self.engine.timer_view(id).pending_partial_minutes {
                        println!(
                            "Paused with {} min of unsaved work. Run `pomoro timer commit {}` to log it, or `pomoro timer reset {} --yes` to discard it.",
                            minutes, id, id
                        );
                    }
                    break;
                }
            }
        }

        self.engine.shutdown()?;

        Ok(())
    }

    /// タイマーの現在状態を表示する。
    fn show_status(&self, id: &str) {
        let view = self.engine.timer_view(id);
        let state = if view.running {
            "running"
        } else if view.pending_partial_minutes.is_some() {
            "paused"
        } else {
            "idle"
        };
        println!(
            "{}: {} of {} remaining ({})",
            id,
            format_remaining(view.time),
            format_remaining(view.initial_time),
            state
        );
        if let Some(minutes) = view.pending_partial_minutes {
            println!("Pending partial commit: {} min", minutes);
        }
    }
}

/// 残り秒数をMM:SS形式へ整形する。
fn format_remaining(seconds: i64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
