use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use log::info;

use crate::storage::StateRepository;
use crate::store::ProjectStore;

/// `log`サブコマンドの引数を表す構造体。
#[derive(Debug, clap::Args)]
pub struct LogArgs {
    /// Project to log time against
    pub id: String,

    /// Minutes to log. Fractions are rounded to whole minutes
    pub minutes: f64,

    #[clap(
        long = "date",
        help = "Commit time in the format \"YYYY-MM-DD HH:MM\" or YYYY-MM-DD. Defaults to now",
        parse(try_from_str = parse_datetime),
    )]
    pub date: Option<i64>,
}

pub struct LogCommand<'a, R: StateRepository> {
    store: &'a mut ProjectStore<R>,
}

impl<'a, R: StateRepository> LogCommand<'a, R> {
    /// 新しい`LogCommand`を返す。
    pub fn new(store: &'a mut ProjectStore<R>) -> Self {
        Self { store }
    }

    /// `log`サブコマンドの処理を行う。手入力の時間をプロジェクトへコミットする。
    ///
    /// # Arguments
    ///
    /// * `args` - `log`サブコマンドの引数
    pub fn run(&mut self, args: LogArgs) -> Result<()> {
        if self.store.get(&args.id).is_none() {
            bail!(
                "Project {} does not exist. Create it first with `pomoro project add`.",
                args.id
            );
        }

        self.store.commit_time(&args.id, args.minutes, args.date)?;
        info!("Logged {} min to {}", args.minutes, args.id);

        Ok(())
    }
}

/// 日時をパースしてエポックミリ秒へ変換する。
///
/// `YYYY-MM-DD HH:MM`形式を優先し、日付のみの場合はLocalタイムゾーンの0時とする。
fn parse_datetime(s: &str) -> Result<i64> {
    let naive_datetime = match NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M") {
        Ok(naive_datetime) => naive_datetime,
        Err(_) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("Failed to parse date: {}", s))?
            .and_hms_opt(0, 0, 0)
            .context("Failed to set hour, minute, and second")?,
    };
    let datetime = Local
        .from_local_datetime(&naive_datetime)
        .single()
        .context("Failed to convert to DateTime<Local>")?;

    Ok(datetime.timestamp_millis())
}
