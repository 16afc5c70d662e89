use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;

use crate::project::ProjectMap;
use crate::storage::StateRepository;
use crate::store::ProjectStore;

/// `export`サブコマンドの引数を表す構造体。
#[derive(Debug, clap::Args)]
pub struct ExportArgs {
    /// Destination file. Writes to stdout when omitted
    pub path: Option<PathBuf>,
}

/// `import`サブコマンドの引数を表す構造体。
#[derive(Debug, clap::Args)]
pub struct ImportArgs {
    /// A JSON file produced by `pomoro export`
    pub path: PathBuf,
}

pub struct TransferCommand<'a, R: StateRepository> {
    store: &'a mut ProjectStore<R>,
}

impl<'a, R: StateRepository> TransferCommand<'a, R> {
    /// 新しい`TransferCommand`を返す。
    pub fn new(store: &'a mut ProjectStore<R>) -> Self {
        Self { store }
    }

    /// `export`サブコマンドの処理を行う。プロジェクト一覧をJSONとして書き出す。
    ///
    /// 書き出したJSONは`import`でそのまま取り込める。
    pub fn export(&self, args: ExportArgs) -> Result<()> {
        let json = serde_json::to_string_pretty(self.store.projects())
            .context("Failed to serialize the projects document")?;

        match args.path {
            Some(path) => {
                fs::write(&path, &json)
                    .with_context(|| format!("Failed to write export file: {}", path.display()))?;
                info!("Exported {} projects to {}", self.store.projects().len(), path.display());
            }
            None => println!("{}", json),
        }

        Ok(())
    }

    /// `import`サブコマンドの処理を行う。プロジェクト一覧を丸ごと置き換える。
    ///
    /// 取り込みファイルが不正な場合はエラーを返し、既存の状態は変更しない。
    pub fn import(&mut self, args: ImportArgs) -> Result<()> {
        let contents = fs::read_to_string(&args.path)
            .with_context(|| format!("Failed to read import file: {}", args.path.display()))?;
        let projects: ProjectMap = serde_json::from_str(&contents)
            .context("Import file is not a valid projects document")?;
        let count = projects.len();

        self.store.import_projects(projects)?;
        info!("Imported {} projects from {}", count, args.path.display());

        Ok(())
    }
}
