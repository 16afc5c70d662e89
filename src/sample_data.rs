use anyhow::{Context, Result};
use chrono::{Datelike, Duration, Local, Timelike};

use crate::datetime;
use crate::project::{Commit, Project, ProjectMap};

pub const SAMPLE_PROJECT_NAME: &str = "Sample Project";

/// サンプルコミットの定義。週の開始日(月曜)からの日数、時、分、記録する分数。
const SAMPLE_COMMITS: [(i64, u32, u32, i64); 14] = [
    (0, 9, 15, 25),
    (0, 11, 45, 60),
    (-1, 9, 20, 20),
    (-1, 10, 24, 40),
    (-1, 14, 36, 36),
    (-2, 16, 30, 120),
    (-2, 10, 0, 45),
    (-3, 13, 15, 90),
    (-5, 9, 30, 30),
    (-5, 15, 0, 75),
    (-7, 10, 45, 50),
    (-8, 14, 20, 65),
    (-10, 11, 10, 40),
    (-12, 16, 5, 80),
];

/// デモ用のサンプルプロジェクトを生成する。
///
/// 保存された状態が一切復元できなかった場合の初期データとして利用する。
/// コミットの構成は固定で、現在の週の月曜日を基準に過去2週間へ分散させる。
pub fn generate_sample_projects() -> Result<ProjectMap> {
    let now = datetime::now().with_timezone(&Local);
    let week_start = now - Duration::days(i64::from(now.weekday().num_days_from_monday()));

    let mut commits = Vec::with_capacity(SAMPLE_COMMITS.len());
    for (day_delta, hour, minute, amount) in SAMPLE_COMMITS {
        let committed_at = (week_start + Duration::days(day_delta))
            .with_hour(hour)
            .context("Failed to set hour")?
            .with_minute(minute)
            .context("Failed to set minute")?
            .with_second(0)
            .context("Failed to set second")?;

        commits.push(Commit {
            committed_at: committed_at.timestamp_millis(),
            amount,
        });
    }

    let mut project = Project {
        name: SAMPLE_PROJECT_NAME.to_string(),
        time: 0,
        commits,
        created_at: (datetime::now() - Duration::days(14)).timestamp_millis(),
        updated_at: datetime::now_millis(),
        time_budget: Some(2_000),
        deadline: Some((datetime::now() + Duration::days(14)).timestamp_millis()),
    };
    project.sort_commits_newest_first();
    project.time = project.total_minutes();

    let mut projects = ProjectMap::new();
    projects.insert(project.name.clone(), project);

    Ok(projects)
}
