use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate, TimeZone};
use log::info;

use crate::console::ConsolePresenter;
use crate::storage::StateRepository;
use crate::store::ProjectStore;

/// `project`サブコマンドの引数を表す構造体。
#[derive(Debug, clap::Args)]
pub struct ProjectArgs {
    #[clap(subcommand)]
    pub subcommand: ProjectSubCommands,
}

/// `project`のサブコマンドを表す列挙型。
#[derive(Debug, clap::Subcommand)]
pub enum ProjectSubCommands {
    /// Create a new project
    Add { name: String },
    /// List all projects
    List,
    /// Change the display name of a project
    Rename { id: String, new_name: String },
    /// Delete a project and its whole commit history
    Delete { id: String },
    /// Set display targets for a project
    Settings {
        id: String,
        #[clap(long = "budget", help = "Target minutes, shown as percent complete")]
        time_budget: Option<i64>,
        #[clap(
            long = "deadline",
            help = "Target date in the format YYYY-MM-DD",
            parse(try_from_str = parse_date),
        )]
        deadline: Option<i64>,
    },
}

/// `commits`サブコマンドの引数を表す構造体。
#[derive(Debug, clap::Args)]
pub struct CommitsArgs {
    pub id: String,
}

pub struct ProjectCommand<'a, R: StateRepository> {
    store: &'a mut ProjectStore<R>,
}

impl<'a, R: StateRepository> ProjectCommand<'a, R> {
    /// 新しい`ProjectCommand`を返す。
    pub fn new(store: &'a mut ProjectStore<R>) -> Self {
        Self { store }
    }

    /// `project`サブコマンドの処理を行う。
    ///
    /// # Arguments
    ///
    /// * `args` - `project`サブコマンドの引数
    /// * `presenter` - 一覧表示に利用するpresenter
    pub fn run<P: ConsolePresenter>(&mut self, args: ProjectArgs, presenter: &mut P) -> Result<()> {
        match args.subcommand {
            ProjectSubCommands::Add { name } => {
                self.store.add_project(&name)?;
                info!("Created project {}", name);
            }
            ProjectSubCommands::List => {
                presenter
                    .show_projects(self.store.projects())
                    .context("Failed to show the project list")?;
            }
            ProjectSubCommands::Rename { id, new_name } => {
                self.store.rename_project(&id, &new_name)?;
            }
            ProjectSubCommands::Delete { id } => {
                self.store.delete_project(&id)?;
            }
            ProjectSubCommands::Settings {
                id,
                time_budget,
                deadline,
            } => {
                self.store.edit_project_settings(&id, time_budget, deadline)?;
            }
        }

        Ok(())
    }

    /// `commits`サブコマンドの処理を行う。コミット履歴を新しい順に表示する。
    pub fn run_commits<P: ConsolePresenter>(
        &mut self,
        args: CommitsArgs,
        presenter: &mut P,
    ) -> Result<()> {
        let project = match self.store.get(&args.id) {
            Some(project) => project,
            None => bail!("Project {} does not exist", args.id),
        };

        presenter
            .show_commits(project)
            .context("Failed to show the commit history")?;

        Ok(())
    }
}

/// 日付をパースしてエポックミリ秒へ変換する。
fn parse_date(s: &str) -> Result<i64> {
    let naive_date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Failed to parse date: {}", s))?;
    let naive_datetime = naive_date
        .and_hms_opt(0, 0, 0)
        .context("Failed to set hour, minute, and second")?;
    let datetime = Local
        .from_local_datetime(&naive_datetime)
        .single()
        .context("Failed to convert to DateTime<Local>")?;

    Ok(datetime.timestamp_millis())
}
