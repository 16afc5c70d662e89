use std::io::Write;

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};

use crate::project::{Project, ProjectMap};

/// Consoleにプロジェクトとコミット履歴を表示するためのtrait。
pub trait ConsolePresenter {
    /// プロジェクト一覧を表示する。
    ///
    /// # Arguments
    ///
    /// * `projects` - 表示するプロジェクト一覧
    fn show_projects(&mut self, projects: &ProjectMap) -> Result<()>;

    /// 1プロジェクトのコミット履歴を表示する。
    ///
    /// # Arguments
    ///
    /// * `project` - 表示するプロジェクト
    fn show_commits(&mut self, project: &Project) -> Result<()>;
}

/// プロジェクトとコミット履歴をMarkdownのlist形式で表示する。
pub struct ConsoleMarkdownList<'a, W: Write> {
    writer: &'a mut W,
}

impl<'a, W: Write> ConsoleMarkdownList<'a, W> {
    /// 新しい`ConsoleMarkdownList`を返す。
    pub fn new(writer: &'a mut W) -> Self {
        Self { writer }
    }
}

impl<'a, W: Write> ConsolePresenter for ConsoleMarkdownList<'a, W> {
    // プロジェクトをlist形式で表示する。目標値は設定されている場合のみ添える。
    fn show_projects(&mut self, projects: &ProjectMap) -> Result<()> {
        for (id, project) in projects {
            let mut line = if project.name == *id {
                format!(
                    "- {}: {} min across {} commits",
                    project.name,
                    project.time,
                    project.commits.len()
                )
            } else {
                format!(
                    "- {} ({}): {} min across {} commits",
                    project.name,
                    id,
                    project.time,
                    project.commits.len()
                )
            };
            if let Some(time_budget) = project.time_budget {
                if time_budget > 0 {
                    line.push_str(&format!(
                        ", {}% of {} min",
                        project.time * 100 / time_budget,
                        time_budget
                    ));
                }
            }
            if let Some(deadline) = project.deadline {
                let deadline = Local
                    .timestamp_millis_opt(deadline)
                    .single()
                    .context("Failed to convert the deadline timestamp")?;
                line.push_str(&format!(", due {}", deadline.format("%Y-%m-%d")));
            }

            writeln!(self.writer, "{}", line)
                .with_context(|| format!("Failed to write project line: {}", id))?;
        }

        Ok(())
    }

    // コミットを保存されている順(新しい順)でlist形式で表示する。
    // 角括弧内のエポックミリ秒は`amend`でコミットを特定するためのキー。
    fn show_commits(&mut self, project: &Project) -> Result<()> {
        for commit in &project.commits {
            let committed_at = Local
                .timestamp_millis_opt(commit.committed_at)
                .single()
                .context("Failed to convert the commit timestamp")?;
            writeln!(
                self.writer,
                "- {} [{}]: {} min",
                committed_at.format("%Y-%m-%d %H:%M"),
                commit.committed_at,
                commit.amount
            )
            .with_context(|| format!("Failed to write commit line: {:?}", commit))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone};

    use crate::project::{Commit, Project, ProjectMap};

    use super::ConsoleMarkdownList;
    use super::ConsolePresenter;

    /// テスト用にダミーのProjectを作成する。
    fn dummy_project(pattern: u8) -> Project {
        match pattern {
            1 => Project {
                name: "alpha".to_string(),
                time: 60,
                commits: vec![
                    Commit {
                        committed_at: millis(2024, 6, 2, 10, 30),
                        amount: 40,
                    },
                    Commit {
                        committed_at: millis(2024, 6, 1, 9, 0),
                        amount: 20,
                    },
                ],
                created_at: 0,
                updated_at: 0,
                time_budget: None,
                deadline: None,
            },
            2 => Project {
                name: "beta".to_string(),
                time: 50,
                commits: vec![Commit {
                    committed_at: millis(2024, 6, 3, 14, 15),
                    amount: 50,
                }],
                created_at: 0,
                updated_at: 0,
                time_budget: Some(200),
                deadline: Some(millis(2024, 7, 1, 0, 0)),
            },
            _ => panic!("Invalid pattern: {}", pattern),
        }
    }

    /// テスト用にLocalタイムゾーンのエポックミリ秒を作成する。
    fn millis(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> i64 {
        Local
            .with_ymd_and_hms(year, month, day, hour, minute, 0)
            .unwrap()
            .timestamp_millis()
    }

    /// プロジェクト一覧が目標値の有無に応じた形式で表示されることを確認する。
    #[test]
    fn test_show_projects() {
        let mut projects = ProjectMap::new();
        projects.insert("alpha".to_string(), dummy_project(1));
        projects.insert("beta".to_string(), dummy_project(2));
        let mut writer = Vec::new();
        let mut presenter = ConsoleMarkdownList::new(&mut writer);

        presenter.show_projects(&projects).unwrap();

        let expected = format!(
            "- alpha: 60 min across 2 commits\n- beta: 50 min across 1 commits, 25% of 200 min, due {}\n",
            Local
                .with_ymd_and_hms(2024, 7, 1, 0, 0, 0)
                .unwrap()
                .format("%Y-%m-%d")
        );
        assert_eq!(String::from_utf8(writer).unwrap(), expected);
    }

    /// 表示名と識別子が異なる場合に両方が表示されることを確認する。
    #[test]
    fn test_show_projects_with_renamed_project() {
        let mut project = dummy_project(1);
        project.name = "Alpha Renamed".to_string();
        let mut projects = ProjectMap::new();
        projects.insert("alpha".to_string(), project);
        let mut writer = Vec::new();
        let mut presenter = ConsoleMarkdownList::new(&mut writer);

        presenter.show_projects(&projects).unwrap();

        assert_eq!(
            String::from_utf8(writer).unwrap(),
            "- Alpha Renamed (alpha): 60 min across 2 commits\n"
        );
    }

    /// コミット履歴が保存順に表示されることを確認する。
    #[test]
    fn test_show_commits() {
        let project = dummy_project(1);
        let mut writer = Vec::new();
        let mut presenter = ConsoleMarkdownList::new(&mut writer);

        presenter.show_commits(&project).unwrap();

        let expected = format!(
            "- {} [{}]: 40 min\n- {} [{}]: 20 min\n",
            Local
                .with_ymd_and_hms(2024, 6, 2, 10, 30, 0)
                .unwrap()
                .format("%Y-%m-%d %H:%M"),
            millis(2024, 6, 2, 10, 30),
            Local
                .with_ymd_and_hms(2024, 6, 1, 9, 0, 0)
                .unwrap()
                .format("%Y-%m-%d %H:%M"),
            millis(2024, 6, 1, 9, 0),
        );
        assert_eq!(String::from_utf8(writer).unwrap(), expected);
    }

    /// コミットの無いプロジェクトで何も出力されないことを確認する。
    #[test]
    fn test_show_commits_empty() {
        let project = Project {
            name: "empty".to_string(),
            time: 0,
            commits: vec![],
            created_at: 0,
            updated_at: 0,
            time_budget: None,
            deadline: None,
        };
        let mut writer = Vec::new();
        let mut presenter = ConsoleMarkdownList::new(&mut writer);

        presenter.show_commits(&project).unwrap();

        assert_eq!(String::from_utf8(writer).unwrap(), "");
    }
}
