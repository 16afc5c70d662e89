use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// プロジェクト名(slug)をキーとするプロジェクト一覧。
pub type ProjectMap = BTreeMap<String, Project>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub committed_at: i64,
    pub amount: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub time: i64,
    pub commits: Vec<Commit>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_budget: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<i64>,
}

impl Project {
    /// コミットを新しい順に並べ直す。
    pub fn sort_commits_newest_first(&mut self) {
        self.commits
            .sort_by(|a, b| b.committed_at.cmp(&a.committed_at));
    }

    /// 全コミットの合計分数を計算する。
    ///
    /// `time`フィールドは常にこの合計と一致していなければならない。
    pub fn total_minutes(&self) -> i64 {
        self.commits.iter().map(|commit| commit.amount).sum()
    }
}

/// 分数の入力を整数の分に正規化する。
///
/// 小数の分数を受け付けるが、集計時の誤差を避けるため必ず整数へ丸めてから加算する。
pub fn normalize_minutes(amount: f64) -> i64 {
    amount.round() as i64
}
