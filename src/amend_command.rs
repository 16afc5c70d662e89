use anyhow::{bail, Result};
use log::info;

use crate::storage::StateRepository;
use crate::store::ProjectStore;

/// `amend`サブコマンドの引数を表す構造体。
///
/// 修正対象のコミットは`pomoro commits`で表示されるエポックミリ秒で特定する。
#[derive(Debug, clap::Args)]
pub struct AmendArgs {
    /// Project that owns the commit
    pub id: String,

    #[clap(
        long = "at",
        help = "Timestamp of the commit to amend, in epoch milliseconds"
    )]
    pub committed_at: i64,

    #[clap(long = "minutes", help = "New amount in minutes")]
    pub minutes: f64,

    #[clap(
        long = "move-to",
        help = "New commit timestamp in epoch milliseconds, if the commit should move"
    )]
    pub new_committed_at: Option<i64>,
}

pub struct AmendCommand<'a, R: StateRepository> {
    store: &'a mut ProjectStore<R>,
}

impl<'a, R: StateRepository> AmendCommand<'a, R> {
    /// 新しい`AmendCommand`を返す。
    pub fn new(store: &'a mut ProjectStore<R>) -> Self {
        Self { store }
    }

    /// `amend`サブコマンドの処理を行う。既存のコミットの分数と時刻を修正する。
    ///
    /// # Arguments
    ///
    /// * `args` - `amend`サブコマンドの引数
    pub fn run(&mut self, args: AmendArgs) -> Result<()> {
        let project = match self.store.get(&args.id) {
            Some(project) => project,
            None => bail!("Project {} does not exist", args.id),
        };
        if !project
            .commits
            .iter()
            .any(|commit| commit.committed_at == args.committed_at)
        {
            bail!(
                "No commit at {} on project {}. Use `pomoro commits {}` to list commit timestamps.",
                args.committed_at,
                args.id,
                args.id
            );
        }

        self.store.edit_commit(
            &args.id,
            args.committed_at,
            args.minutes,
            args.new_committed_at,
        )?;
        info!("Amended the commit at {} on {}", args.committed_at, args.id);

        Ok(())
    }
}
