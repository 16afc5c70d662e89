use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::datetime;
use crate::project::{normalize_minutes, Commit, Project, ProjectMap};
use crate::sample_data;
use crate::storage::StateRepository;

/// プロジェクトとコミット履歴を管理するストア。
///
/// ログ済み時間の唯一の正とする記録で、すべての変更操作は永続化に成功してから
/// メモリ上の状態を入れ替える。保存に失敗した場合はメモリ上の状態を変更しない。
pub struct ProjectStore<R: StateRepository> {
    projects: ProjectMap,
    repository: R,
}

impl<R: StateRepository> ProjectStore<R> {
    /// 保存済みのプロジェクト一覧を読み込んで`ProjectStore`を返す。
    ///
    /// どの保存先からも復元できなかった場合はサンプルプロジェクトを生成して保存する。
    pub fn load_or_seed(repository: R) -> Result<Self> {
        let projects = match repository
            .load_projects()
            .context("Failed to load the projects document")?
        {
            Some(projects) => projects,
            None => {
                info!("No stored projects found, seeding the sample project");
                let projects = sample_data::generate_sample_projects()
                    .context("Failed to generate the sample project")?;
                repository
                    .save_projects(&projects)
                    .context("Failed to persist the seeded sample project")?;
                projects
            }
        };

        Ok(Self {
            projects,
            repository,
        })
    }

    /// プロジェクト一覧を返す。
    pub fn projects(&self) -> &ProjectMap {
        &self.projects
    }

    /// プロジェクトを1件取得する。
    pub fn get(&self, id: &str) -> Option<&Project> {
        self.projects.get(id)
    }

    /// 更新後の一覧を永続化してからメモリ上の状態を入れ替える。
    fn persist_and_swap(&mut self, next: ProjectMap) -> Result<()> {
        self.repository
            .save_projects(&next)
            .context("Failed to persist the projects document")?;
        self.projects = next;

        Ok(())
    }

    /// プロジェクトを新規作成する。
    ///
    /// 名前が空、または同名のプロジェクトが既に存在する場合はエラーを返す。
    pub fn add_project(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Project name must not be empty");
        }
        if self.projects.contains_key(name) {
            bail!(
                "There's already a project named \"{}\". Try another name, or edit the existing project instead.",
                name
            );
        }

        let now = datetime::now_millis();
        let mut next = self.projects.clone();
        next.insert(
            name.to_string(),
            Project {
                name: name.to_string(),
                time: 0,
                commits: Vec::new(),
                created_at: now,
                updated_at: now,
                time_budget: None,
                deadline: None,
            },
        );

        self.persist_and_swap(next)
    }

    /// プロジェクトの表示名を変更する。
    ///
    /// 識別子(一覧のキー)は変更しない。対象が存在しない場合は何もしない。
    pub fn rename_project(&mut self, id: &str, new_name: &str) -> Result<()> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            bail!("Project name must not be empty");
        }

        let mut next = self.projects.clone();
        match next.get_mut(id) {
            Some(project) => {
                project.name = new_name.to_string();
                project.updated_at = datetime::now_millis();
            }
            None => {
                warn!("Project {} not found, nothing to rename", id);
                return Ok(());
            }
        }

        self.persist_and_swap(next)
    }

    /// プロジェクトをコミット履歴ごと削除する。対象が存在しない場合は何もしない。
    pub fn delete_project(&mut self, id: &str) -> Result<()> {
        let mut next = self.projects.clone();
        if next.remove(id).is_none() {
            warn!("Project {} not found, nothing to delete", id);
            return Ok(());
        }

        self.persist_and_swap(next)
    }

    /// プロジェクトへ時間をコミットする。
    ///
    /// コミット一覧を伸ばす唯一の操作。分数は整数へ正規化してから集計へ加算し、
    /// コミット一覧は新しい順に並べ直す。対象が存在しない場合は何もしない。
    ///
    /// # Arguments
    ///
    /// * `id` - プロジェクトの識別子
    /// * `amount` - 記録する分数
    /// * `committed_at` - コミット時刻。省略した場合は現在時刻
    pub fn commit_time(&mut self, id: &str, amount: f64, committed_at: Option<i64>) -> Result<()> {
        let mut next = self.projects.clone();
        let project = match next.get_mut(id) {
            Some(project) => project,
            None => {
                warn!("Project {} not found, dropping the commit", id);
                return Ok(());
            }
        };

        let amount = normalize_minutes(amount);
        project.commits.push(Commit {
            committed_at: committed_at.unwrap_or_else(datetime::now_millis),
            amount,
        });
        project.sort_commits_newest_first();
        project.time += amount;
        project.updated_at = datetime::now_millis();

        self.persist_and_swap(next)
    }

    /// プロジェクトの目標値を設定する。
    ///
    /// `Some`が渡されたフィールドのみを更新する。`Some(0)`のような値も設定として扱い、
    /// 未指定は`None`だけで表現する。対象が存在しない場合は何もしない。
    pub fn edit_project_settings(
        &mut self,
        id: &str,
        time_budget: Option<i64>,
        deadline: Option<i64>,
    ) -> Result<()> {
        let mut next = self.projects.clone();
        let project = match next.get_mut(id) {
            Some(project) => project,
            None => {
                warn!("Project {} not found, nothing to configure", id);
                return Ok(());
            }
        };

        if let Some(time_budget) = time_budget {
            project.time_budget = Some(time_budget);
        }
        if let Some(deadline) = deadline {
            project.deadline = Some(deadline);
        }
        project.updated_at = datetime::now_millis();

        self.persist_and_swap(next)
    }

    /// 既存のコミットを修正する。
    ///
    /// コミットは`committed_at`の完全一致で特定する。修正後は集計時間を全コミットの
    /// 合計から再計算し、並び順も新しい順へ戻す。プロジェクトまたはコミットが
    /// 見つからない場合は警告を出して何もしない。
    ///
    /// # Arguments
    ///
    /// * `id` - プロジェクトの識別子
    /// * `committed_at` - 修正対象コミットのタイムスタンプ
    /// * `amount` - 修正後の分数
    /// * `new_committed_at` - 指定した場合はコミット時刻も移動する
    pub fn edit_commit(
        &mut self,
        id: &str,
        committed_at: i64,
        amount: f64,
        new_committed_at: Option<i64>,
    ) -> Result<()> {
        let mut next = self.projects.clone();
        let project = match next.get_mut(id) {
            Some(project) => project,
            None => {
                warn!("Project {} not found, nothing to amend", id);
                return Ok(());
            }
        };

        let commit = match project
            .commits
            .iter_mut()
            .find(|commit| commit.committed_at == committed_at)
        {
            Some(commit) => commit,
            None => {
                warn!("Commit at {} not found on project {}", committed_at, id);
                return Ok(());
            }
        };

        commit.amount = normalize_minutes(amount);
        if let Some(new_committed_at) = new_committed_at {
            commit.committed_at = new_committed_at;
        }
        project.sort_commits_newest_first();
        project.time = project.total_minutes();
        project.updated_at = datetime::now_millis();

        self.persist_and_swap(next)
    }

    /// プロジェクト一覧を丸ごと置き換える。
    ///
    /// バックアップからの復元を想定した一括上書きで、構造が合っていればそのまま採用する。
    pub fn import_projects(&mut self, projects: ProjectMap) -> Result<()> {
        self.persist_and_swap(projects)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    use crate::datetime::mock_datetime;
    use crate::project::ProjectMap;
    use crate::sample_data::SAMPLE_PROJECT_NAME;
    use crate::storage::MockStateRepository;

    use super::ProjectStore;

    /// 空のプロジェクト一覧から始まるストアを作成する。
    fn empty_store() -> ProjectStore<MockStateRepository> {
        let mut repository = MockStateRepository::new();
        repository
            .expect_load_projects()
            .return_once(|| Ok(Some(ProjectMap::new())));
        repository.expect_save_projects().returning(|_| Ok(()));

        ProjectStore::load_or_seed(repository).unwrap()
    }

    /// 何も保存されていない場合にサンプルプロジェクトが生成されることを確認する。
    #[test]
    fn test_seeds_sample_project_when_nothing_is_stored() {
        let mut repository = MockStateRepository::new();
        repository.expect_load_projects().return_once(|| Ok(None));
        repository
            .expect_save_projects()
            .times(1)
            .returning(|_| Ok(()));

        let store = ProjectStore::load_or_seed(repository).unwrap();

        let project = store.get(SAMPLE_PROJECT_NAME).unwrap();
        assert_eq!(project.time, project.total_minutes());
    }

    /// プロジェクトを追加できることと、重複した名前を拒否することを確認する。
    #[test]
    fn test_add_project_rejects_duplicate_name() {
        let mut store = empty_store();

        store.add_project("A").unwrap();
        let result = store.add_project("A");

        assert!(result.is_err());
        assert_eq!(store.projects().len(), 1);
        assert!(store.get("A").is_some());
    }

    #[rstest]
    #[case::empty("")]
    #[case::whitespace("   ")]
    fn test_add_project_rejects_empty_name(#[case] name: &str) {
        let mut store = empty_store();

        assert!(store.add_project(name).is_err());
        assert!(store.projects().is_empty());
    }

    /// 表示名の変更が識別子を変えないことを確認する。
    #[test]
    fn test_rename_project_keeps_identifier() {
        let mut store = empty_store();
        store.add_project("A").unwrap();

        store.rename_project("A", "Renamed").unwrap();

        let project = store.get("A").unwrap();
        assert_eq!(project.name, "Renamed");
    }

    /// 存在しないプロジェクトに対する操作が何も変更しないことを確認する。
    #[test]
    fn test_operations_on_unknown_project_are_noops() {
        let mut store = empty_store();
        store.add_project("A").unwrap();
        let before = store.projects().clone();

        store.rename_project("missing", "B").unwrap();
        store.delete_project("missing").unwrap();
        store.commit_time("missing", 10.0, None).unwrap();
        store
            .edit_project_settings("missing", Some(100), None)
            .unwrap();
        store.edit_commit("missing", 0, 10.0, None).unwrap();

        assert_eq!(store.projects(), &before);
    }

    /// プロジェクトの削除でコミット履歴ごと消えることを確認する。
    #[test]
    fn test_delete_project() {
        let mut store = empty_store();
        store.add_project("A").unwrap();
        store.commit_time("A", 10.0, None).unwrap();

        store.delete_project("A").unwrap();

        assert!(store.projects().is_empty());
    }

    /// コミットが新しい順に並び、集計が合計と一致することを確認する。
    #[test]
    fn test_commit_time_sorts_and_aggregates() {
        let mut store = empty_store();
        store.add_project("A").unwrap();

        store.commit_time("A", 10.0, Some(2_000)).unwrap();
        store.commit_time("A", 20.0, Some(1_000)).unwrap();
        store.commit_time("A", 30.0, Some(3_000)).unwrap();

        let project = store.get("A").unwrap();
        assert_eq!(
            project
                .commits
                .iter()
                .map(|commit| commit.committed_at)
                .collect::<Vec<_>>(),
            vec![3_000, 2_000, 1_000]
        );
        assert_eq!(project.time, 60);
        assert_eq!(project.time, project.total_minutes());
    }

    /// 小数の分数が整数へ正規化されてから加算されることを確認する。
    #[rstest]
    #[case::round_down(1.4, 1)]
    #[case::round_up(1.5, 2)]
    fn test_commit_time_normalizes_fractional_minutes(
        #[case] amount: f64,
        #[case] expected: i64,
    ) {
        let mut store = empty_store();
        store.add_project("A").unwrap();

        store.commit_time("A", amount, Some(1_000)).unwrap();

        let project = store.get("A").unwrap();
        assert_eq!(project.commits[0].amount, expected);
        assert_eq!(project.time, expected);
    }

    /// コミット時刻を省略した場合に現在時刻が利用されることを確認する。
    #[test]
    fn test_commit_time_defaults_to_now() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        mock_datetime::set_mock_time(now);
        let mut store = empty_store();
        store.add_project("A").unwrap();

        store.commit_time("A", 5.0, None).unwrap();

        let project = store.get("A").unwrap();
        assert_eq!(project.commits[0].committed_at, now.timestamp_millis());
        assert_eq!(project.updated_at, now.timestamp_millis());

        mock_datetime::clear_mock_time();
    }

    /// `Some(0)`のような値でも設定できることを確認する。
    #[test]
    fn test_edit_project_settings_accepts_zero_values() {
        let mut store = empty_store();
        store.add_project("A").unwrap();

        store.edit_project_settings("A", Some(0), None).unwrap();

        let project = store.get("A").unwrap();
        assert_eq!(project.time_budget, Some(0));
        assert_eq!(project.deadline, None);

        store.edit_project_settings("A", None, Some(1_234)).unwrap();

        let project = store.get("A").unwrap();
        assert_eq!(project.time_budget, Some(0));
        assert_eq!(project.deadline, Some(1_234));
    }

    /// コミット修正後も集計時間が合計と一致することを確認する。
    #[test]
    fn test_edit_commit_recomputes_aggregate() {
        let mut store = empty_store();
        store.add_project("A").unwrap();
        store.commit_time("A", 10.0, Some(1_000)).unwrap();
        store.commit_time("A", 20.0, Some(2_000)).unwrap();

        store.edit_commit("A", 1_000, 50.0, None).unwrap();

        let project = store.get("A").unwrap();
        assert_eq!(project.time, 70);
        assert_eq!(project.time, project.total_minutes());
    }

    /// コミット時刻の移動後に並び順が新しい順へ戻ることを確認する。
    #[test]
    fn test_edit_commit_moves_timestamp_and_resorts() {
        let mut store = empty_store();
        store.add_project("A").unwrap();
        store.commit_time("A", 10.0, Some(1_000)).unwrap();
        store.commit_time("A", 20.0, Some(2_000)).unwrap();

        store.edit_commit("A", 1_000, 10.0, Some(3_000)).unwrap();

        let project = store.get("A").unwrap();
        assert_eq!(
            project
                .commits
                .iter()
                .map(|commit| (commit.committed_at, commit.amount))
                .collect::<Vec<_>>(),
            vec![(3_000, 10), (2_000, 20)]
        );
        assert_eq!(project.time, project.total_minutes());
    }

    /// 存在しないコミットの修正が何も変更しないことを確認する。
    #[test]
    fn test_edit_commit_on_unknown_commit_is_noop() {
        let mut store = empty_store();
        store.add_project("A").unwrap();
        store.commit_time("A", 10.0, Some(1_000)).unwrap();
        let before = store.projects().clone();

        store.edit_commit("A", 9_999, 50.0, None).unwrap();

        assert_eq!(store.projects(), &before);
    }

    /// どのような操作列の後でも集計の不変条件が保たれることを確認する。
    #[test]
    fn test_aggregate_invariant_over_operation_sequence() {
        let mut store = empty_store();
        store.add_project("A").unwrap();

        store.commit_time("A", 10.0, Some(1_000)).unwrap();
        store.commit_time("A", 2.5, Some(2_000)).unwrap();
        store.edit_commit("A", 1_000, 0.0, None).unwrap();
        store.commit_time("A", 45.0, Some(500)).unwrap();
        store.edit_commit("A", 2_000, 90.0, Some(4_000)).unwrap();

        let project = store.get("A").unwrap();
        assert_eq!(project.time, project.total_minutes());
    }

    /// エクスポートした一覧を取り込み直しても同じ内容になることを確認する。
    #[test]
    fn test_import_roundtrip() {
        let mut store = empty_store();
        store.add_project("A").unwrap();
        store.commit_time("A", 10.0, Some(1_000)).unwrap();
        store.edit_project_settings("A", Some(100), None).unwrap();

        let exported = serde_json::to_string_pretty(store.projects()).unwrap();
        let imported: ProjectMap = serde_json::from_str(&exported).unwrap();
        let before = store.projects().clone();

        store.import_projects(imported).unwrap();

        assert_eq!(store.projects(), &before);
        assert_eq!(
            serde_json::to_value(store.projects()).unwrap(),
            serde_json::from_str::<serde_json::Value>(&exported).unwrap()
        );
    }

    /// 保存に失敗した場合にメモリ上の状態が変わらないことを確認する。
    #[test]
    fn test_failed_persistence_leaves_state_untouched() {
        let mut repository = MockStateRepository::new();
        repository
            .expect_load_projects()
            .return_once(|| Ok(Some(ProjectMap::new())));
        repository
            .expect_save_projects()
            .returning(|_| Err(anyhow!("disk full")));
        let mut store = ProjectStore::load_or_seed(repository).unwrap();

        let result = store.add_project("A");

        assert!(result.is_err());
        assert!(store.projects().is_empty());
    }
}
