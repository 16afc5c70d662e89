use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{info, warn};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::datetime;
use crate::project::ProjectMap;
use crate::timer::TimerMap;

const PROJECTS_FILE: &str = "projects.json";
const PROJECTS_MIRROR_FILE: &str = "projects.mirror.json";
const TIMERS_FILE: &str = "timers.json";

/// ミラー側の保持期間。期限切れのミラーは読み込み時に破棄する。
const MIRROR_TTL_MILLIS: i64 = 365 * 24 * 60 * 60 * 1000;

/// 永続化された状態へアクセスするためのtrait。
///
/// プロジェクト一覧とタイマー一覧は互いに独立した2つのドキュメントとして保存する。
/// 読み込みは、ドキュメントが存在しない・復元できない場合に`Ok(None)`を返し、
/// 呼び出し側が初期状態を決定する。
#[cfg_attr(test, automock)]
pub trait StateRepository {
    /// プロジェクトドキュメントを読み込む。
    fn load_projects(&self) -> Result<Option<ProjectMap>>;

    /// プロジェクトドキュメントを保存する。
    fn save_projects(&self, projects: &ProjectMap) -> Result<()>;

    /// タイマードキュメントを読み込む。
    fn load_timers(&self) -> Result<Option<TimerMap>>;

    /// タイマードキュメントを保存する。
    fn save_timers(&self, timers: &TimerMap) -> Result<()>;
}

/// ミラー側に書き込むプロジェクトドキュメント。
///
/// 期限付きで保存し、読み込み時に期限切れかどうかを判定する。
#[derive(Debug, Serialize, Deserialize)]
struct MirrorDocument {
    expires_at: i64,
    projects: ProjectMap,
}

/// データディレクトリ配下のJSONファイルへ状態を保存するリポジトリ。
///
/// プロジェクトドキュメントは主ファイルとミラーファイルの2段構成で保存する。
/// 読み込みは主ファイルを優先し、壊れている場合は期限内のミラーへフォールバックする。
#[derive(Clone, Debug)]
pub struct JsonStateRepository {
    data_dir: PathBuf,
}

impl JsonStateRepository {
    /// 既定のデータディレクトリを利用する`JsonStateRepository`を返す。
    pub fn new() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .context("Failed to resolve the user data directory")?
            .join("pomoro");

        Self::with_dir(data_dir)
    }

    /// 指定したディレクトリを利用する`JsonStateRepository`を返す。
    ///
    /// # Arguments
    ///
    /// * `data_dir` - 状態ファイルを保存するディレクトリ
    pub fn with_dir(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir).with_context(|| {
            format!("Failed to create data directory: {}", data_dir.display())
        })?;

        Ok(Self { data_dir })
    }

    /// 一時ファイルへ書き込んでからrenameする。
    ///
    /// 書き込み途中でプロセスが落ちても元のファイルが壊れないようにする。
    fn write_atomic(&self, file_name: &str, contents: &str) -> Result<()> {
        let path = self.data_dir.join(file_name);
        let tmp_path = self.data_dir.join(format!("{}.tmp", file_name));

        fs::write(&tmp_path, contents)
            .with_context(|| format!("Failed to write temporary file: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to replace state file: {}", path.display()))?;

        Ok(())
    }

    /// JSONファイルを読み込む。
    ///
    /// ファイルが存在しない場合は`None`を返す。
    /// 読み込みやデシリアライズに失敗した場合は警告を出して`None`を返し、
    /// 呼び出し側のフォールバックに任せる。
    fn read_json<T: DeserializeOwned>(&self, file_name: &str) -> Option<T> {
        let path = self.data_dir.join(file_name);
        if !path.exists() {
            return None;
        }

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(error) => {
                warn!("Failed to read state file {}: {}", path.display(), error);
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!("Failed to parse state file {}: {}", path.display(), error);
                None
            }
        }
    }
}

impl StateRepository for JsonStateRepository {
    fn load_projects(&self) -> Result<Option<ProjectMap>> {
        if let Some(projects) = self.read_json::<ProjectMap>(PROJECTS_FILE) {
            return Ok(Some(projects));
        }

        let mirror = match self.read_json::<MirrorDocument>(PROJECTS_MIRROR_FILE) {
            Some(mirror) => mirror,
            None => return Ok(None),
        };
        if mirror.expires_at < datetime::now_millis() {
            warn!("Mirror copy of the projects document has expired, ignoring it");
            return Ok(None);
        }

        info!("Recovered the projects document from the mirror copy");
        Ok(Some(mirror.projects))
    }

    fn save_projects(&self, projects: &ProjectMap) -> Result<()> {
        let contents = serde_json::to_string_pretty(projects)
            .context("Failed to serialize the projects document")?;
        self.write_atomic(PROJECTS_FILE, &contents)?;

        let mirror = MirrorDocument {
            expires_at: datetime::now_millis() + MIRROR_TTL_MILLIS,
            projects: projects.clone(),
        };
        let mirror_contents = serde_json::to_string_pretty(&mirror)
            .context("Failed to serialize the mirror document")?;
        self.write_atomic(PROJECTS_MIRROR_FILE, &mirror_contents)?;

        Ok(())
    }

    fn load_timers(&self) -> Result<Option<TimerMap>> {
        Ok(self.read_json::<TimerMap>(TIMERS_FILE))
    }

    fn save_timers(&self, timers: &TimerMap) -> Result<()> {
        let contents = serde_json::to_string_pretty(timers)
            .context("Failed to serialize the timers document")?;
        self.write_atomic(TIMERS_FILE, &contents)
    }
}
