use chrono::{DateTime, Utc};

#[cfg(not(test))]
/// 現在のUTC時間を取得する。
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// 現在時刻をエポックミリ秒で取得する。
///
/// プロジェクトとタイマーの永続化データはすべてエポックミリ秒のタイムスタンプを持つため、
/// 記録用の時刻はこの関数を経由して取得する。
pub fn now_millis() -> i64 {
    now().timestamp_millis()
}


#[cfg(test)]
pub use mock_datetime::now;
