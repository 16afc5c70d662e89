use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::datetime;
use crate::project::Project;
use crate::storage::StateRepository;
use crate::store::ProjectStore;

/// 作業インターバルの既定の長さ(秒)。25分。
pub const DEFAULT_INITIAL_TIME: i64 = 1_500;

/// プロジェクト識別子をキーとするタイマー一覧。
pub type TimerMap = BTreeMap<String, TimerState>;

/// 永続化されるタイマーの状態。
///
/// 動作中のカウントダウンタスクはプロセスに属する資源であり、この構造体には含めない。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub time: i64,
    pub initial_time: i64,
    pub running: bool,
    pub last_updated: i64,
}

impl TimerState {
    /// 既定のインターバル長で停止中のタイマーを返す。
    fn idle() -> Self {
        Self {
            time: DEFAULT_INITIAL_TIME,
            initial_time: DEFAULT_INITIAL_TIME,
            running: false,
            last_updated: datetime::now_millis(),
        }
    }

    /// 一時停止中の未コミット時間から導出するコミット予定の分数。
    ///
    /// 停止中かつ残り時間が初期値を下回る場合のみ値を持つ。1分未満の作業も
    /// 切り捨てずに最低1分として扱う。導出値であり、状態としては保存しない。
    pub fn pending_partial_minutes(&self) -> Option<i64> {
        if self.running || self.time >= self.initial_time {
            return None;
        }

        let minutes = ((self.initial_time - self.time) as f64 / 60.0).round() as i64;
        Some(minutes.max(1))
    }

    /// 未コミットの経過時間を持つかどうか。確認プロンプトの要否の判定に利用する。
    fn has_unsaved_elapsed_time(&self) -> bool {
        self.time > 0 && self.time < self.initial_time
    }
}

/// タイマーの読み取りビュー。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimerView {
    pub time: i64,
    pub initial_time: i64,
    pub running: bool,
    pub pending_partial_minutes: Option<i64>,
}

/// `reset`の結果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetOutcome {
    Reset,
    NeedsConfirmation,
}

/// インターバル完了を通知するためのtrait。
///
/// 通知はベストエフォートであり、失敗しても状態遷移へ影響させてはならない。
pub trait CompletionNotifier: Send + Sync {
    /// インターバルの完了を通知する。
    ///
    /// # Arguments
    ///
    /// * `project_id` - 完了したタイマーのプロジェクト識別子
    /// * `minutes` - コミットされた分数
    fn interval_completed(&self, project_id: &str, minutes: i64);
}

/// シャットダウン前に呼び出されるフック。
///
/// 引数は動作中のタイマーが存在するかどうか。`false`を返すとシャットダウンを中断する。
pub type ShutdownHook = Box<dyn Fn(bool) -> bool + Send>;

/// tick処理の結果。カウントダウンタスクの継続可否を表す。
enum TickOutcome {
    Continue,
    Stop,
    Completed { minutes: i64 },
}

struct EngineInner<R: StateRepository + Send + 'static> {
    timers: TimerMap,
    handles: BTreeMap<String, JoinHandle<()>>,
    // startごとに増える世代番号。破棄済みタスクから遅れて届いたtickを無効化する
    epochs: BTreeMap<String, u64>,
    store: ProjectStore<R>,
    repository: R,
    notifier: Option<Arc<dyn CompletionNotifier>>,
    shutdown_hook: Option<ShutdownHook>,
}

impl<R: StateRepository + Send + 'static> EngineInner<R> {
    fn persist_timers(&self) -> Result<()> {
        self.repository
            .save_timers(&self.timers)
            .context("Failed to persist the timers document")
    }
}

/// プロジェクトごとに独立したカウントダウンを管理するエンジン。
///
/// タイマーはプロジェクト識別子をキーに遅延生成され、動作中のタイマーは
/// それぞれ専用のカウントダウンタスク(1秒間隔)を1つだけ持つ。
/// インターバルの完了時と部分コミット時に[`ProjectStore`]へ時間を記録する。
pub struct TimerEngine<R: StateRepository + Send + 'static> {
    inner: Arc<Mutex<EngineInner<R>>>,
}

impl<R: StateRepository + Send + 'static> TimerEngine<R> {
    /// 保存済みのタイマー一覧を読み込んで`TimerEngine`を返す。
    ///
    /// 前回のプロセスで動作中だったタイマーは一時停止として復元する。
    /// カウントダウンタスクはプロセスに属する資源であり、新しいプロセスが
    /// 引き継ぐことはできないため、再開には明示的な`start`を必要とする。
    pub fn new(repository: R, store: ProjectStore<R>) -> Result<Self> {
        let mut timers = repository
            .load_timers()
            .context("Failed to load the timers document")?
            .unwrap_or_default();

        let mut rehydrated = false;
        for (project_id, state) in timers.iter_mut() {
            if state.running {
                info!(
                    "Timer for {} was running when the previous process ended, restoring it as paused",
                    project_id
                );
                state.running = false;
                state.last_updated = datetime::now_millis();
                rehydrated = true;
            }
        }
        if rehydrated {
            repository
                .save_timers(&timers)
                .context("Failed to persist the restored timers document")?;
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(EngineInner {
                timers,
                handles: BTreeMap::new(),
                epochs: BTreeMap::new(),
                store,
                repository,
                notifier: None,
                shutdown_hook: None,
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner<R>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 完了通知の送信先を設定する。
    pub fn set_notifier(&self, notifier: Arc<dyn CompletionNotifier>) {
        self.lock().notifier = Some(notifier);
    }

    /// シャットダウン前に呼び出すフックを登録する。
    pub fn on_before_shutdown(&self, hook: ShutdownHook) {
        self.lock().shutdown_hook = Some(hook);
    }

    /// タイマーを開始する。
    ///
    /// 既に動作中の場合は何もしない(冪等)。残り時間が0の場合は初期値へ戻してから
    /// 開始する。タイマー1つにつきカウントダウンタスクは常に1つしか存在しない。
    pub fn start(&self, project_id: &str) -> Result<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        {
            let state = inner
                .timers
                .entry(project_id.to_string())
                .or_insert_with(TimerState::idle);
            if state.running {
                debug!("Timer for {} is already running", project_id);
                return Ok(());
            }
            if state.time == 0 {
                state.time = state.initial_time;
            }
            state.running = true;
            state.last_updated = datetime::now_millis();
        }
        inner.persist_timers()?;

        let epoch = {
            let counter = inner.epochs.entry(project_id.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let handle = Self::spawn_countdown(Arc::clone(&self.inner), project_id.to_string(), epoch);
        inner.handles.insert(project_id.to_string(), handle);

        Ok(())
    }

    /// タイマーを一時停止する。動作中でない場合は何もしない。
    ///
    /// カウントダウンタスクはこの呼び出しの中で確実に破棄される。
    pub fn stop(&self, project_id: &str) -> Result<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if let Some(handle) = inner.handles.remove(project_id) {
            handle.abort();
        }

        match inner.timers.get_mut(project_id) {
            Some(state) if state.running => {
                state.running = false;
                state.last_updated = datetime::now_millis();
            }
            _ => {
                debug!("Timer for {} is not running, nothing to stop", project_id);
                return Ok(());
            }
        }

        inner.persist_timers()
    }

    /// タイマーを初期状態へ戻す。
    ///
    /// 未コミットの経過時間が残っている状態で`confirmed`なしに呼ばれた場合は
    /// 状態を変更せずに[`ResetOutcome::NeedsConfirmation`]を返す。
    /// 確認の取り方は呼び出し側の責務とする。
    pub fn reset(&self, project_id: &str, confirmed: bool) -> Result<ResetOutcome> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        {
            let state = inner
                .timers
                .entry(project_id.to_string())
                .or_insert_with(TimerState::idle);
            if !confirmed && state.has_unsaved_elapsed_time() {
                return Ok(ResetOutcome::NeedsConfirmation);
            }
            state.time = state.initial_time;
            state.running = false;
            state.last_updated = datetime::now_millis();
        }

        if let Some(handle) = inner.handles.remove(project_id) {
            handle.abort();
        }
        inner.persist_timers()?;

        Ok(ResetOutcome::Reset)
    }

    /// インターバルの長さを分単位で設定する。
    ///
    /// 設定と同時に残り時間も新しい長さへ戻す。動作中の変更は受け付けない。
    pub fn configure(&self, project_id: &str, minutes: i64) -> Result<()> {
        if minutes <= 0 {
            bail!("Interval length must be a positive number of minutes");
        }

        let mut guard = self.lock();
        let inner = &mut *guard;

        {
            let state = inner
                .timers
                .entry(project_id.to_string())
                .or_insert_with(TimerState::idle);
            if state.running {
                bail!(
                    "Timer for {} is running. Stop it before changing the interval length.",
                    project_id
                );
            }
            state.initial_time = minutes * 60;
            state.time = state.initial_time;
            state.last_updated = datetime::now_millis();
        }

        inner.persist_timers()
    }

    /// 一時停止中の部分インターバルをコミットする。
    ///
    /// コミット予定の分数が導出できない場合は何もせず`None`を返す。
    /// コミットの永続化に成功した場合のみタイマーを初期状態へ戻し、
    /// コミットした分数を返す。
    pub fn commit_partial(&self, project_id: &str) -> Result<Option<i64>> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let minutes = match inner
            .timers
            .get(project_id)
            .and_then(TimerState::pending_partial_minutes)
        {
            Some(minutes) => minutes,
            None => {
                warn!("Timer for {} has no partial interval to commit", project_id);
                return Ok(None);
            }
        };

        // 先にコミットを永続化し、成功した場合のみタイマーを戻す
        inner
            .store
            .commit_time(project_id, minutes as f64, None)
            .context("Failed to commit the partial interval")?;

        if let Some(state) = inner.timers.get_mut(project_id) {
            state.time = state.initial_time;
            state.running = false;
            state.last_updated = datetime::now_millis();
        }
        inner.persist_timers()?;

        Ok(Some(minutes))
    }

    /// タイマーの読み取りビューを返す。
    ///
    /// 未知の識別子には既定値を返すだけで、タイマーの生成は行わない。
    pub fn timer_view(&self, project_id: &str) -> TimerView {
        let guard = self.lock();
        let state = guard
            .timers
            .get(project_id)
            .cloned()
            .unwrap_or_else(TimerState::idle);

        TimerView {
            time: state.time,
            initial_time: state.initial_time,
            running: state.running,
            pending_partial_minutes: state.pending_partial_minutes(),
        }
    }

    /// プロジェクトを1件取得する。表示用。
    pub fn project(&self, project_id: &str) -> Option<Project> {
        self.lock().store.get(project_id).cloned()
    }

    /// 動作中のタイマーが存在するかどうか。
    pub fn any_running(&self) -> bool {
        self.lock().timers.values().any(|state| state.running)
    }

    /// 動作中のタイマーのプロジェクト識別子を返す。
    pub fn running_projects(&self) -> Vec<String> {
        self.lock()
            .timers
            .iter()
            .filter(|(_, state)| state.running)
            .map(|(project_id, _)| project_id.clone())
            .collect()
    }

    /// すべてのカウントダウンを破棄し、動作中のタイマーを停止状態で永続化する。
    ///
    /// フックが登録されている場合は先に呼び出し、フックが`false`を返した場合は
    /// 何も変更せずに`Ok(false)`を返す。
    pub fn shutdown(&self) -> Result<bool> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let any_running = inner.timers.values().any(|state| state.running);
        if let Some(hook) = &inner.shutdown_hook {
            if !hook(any_running) {
                info!("Shutdown vetoed by the registered hook");
                return Ok(false);
            }
        }

        for (_, handle) in std::mem::take(&mut inner.handles) {
            handle.abort();
        }

        let mut changed = false;
        for state in inner.timers.values_mut() {
            if state.running {
                state.running = false;
                state.last_updated = datetime::now_millis();
                changed = true;
            }
        }
        if changed {
            inner.persist_timers()?;
        }

        Ok(true)
    }

    /// 1秒間隔のカウントダウンタスクを起動する。
    fn spawn_countdown(
        inner: Arc<Mutex<EngineInner<R>>>,
        project_id: String,
        epoch: u64,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            // 最初のtickは即座に完了するため読み捨てる
            interval.tick().await;

            loop {
                interval.tick().await;
                match Self::handle_tick(&inner, &project_id, epoch) {
                    TickOutcome::Continue => {}
                    TickOutcome::Stop => break,
                    TickOutcome::Completed { minutes } => {
                        Self::notify_completion(&inner, &project_id, minutes);
                        break;
                    }
                }
            }
        })
    }

    /// 1秒分のtickを処理する。
    ///
    /// 残り時間が0に到達した場合は、タイマーを戻す前にコミットを永続化する
    /// (コミット→リセットの順序)。同一の完了に対してコミットが二重に走ることは
    /// ない。完了後のタスクは終了し、以降のtickは明示的な`start`まで発生しない。
    fn handle_tick(
        inner: &Arc<Mutex<EngineInner<R>>>,
        project_id: &str,
        epoch: u64,
    ) -> TickOutcome {
        let mut guard = inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let inner = &mut *guard;

        // 別の世代のカウントダウンに属するtickは適用しない
        if inner.epochs.get(project_id).copied() != Some(epoch) {
            return TickOutcome::Stop;
        }

        let (remaining, initial_time) = match inner.timers.get_mut(project_id) {
            Some(state) if state.running && state.time > 0 => {
                state.time -= 1;
                state.last_updated = datetime::now_millis();
                (state.time, state.initial_time)
            }
            _ => return TickOutcome::Stop,
        };

        if remaining > 0 {
            if let Err(error) = inner.persist_timers() {
                warn!("Failed to persist timer state for {}: {:#}", project_id, error);
            }
            return TickOutcome::Continue;
        }

        // インターバル完了
        let minutes = (initial_time as f64 / 60.0).round() as i64;
        let outcome = match inner.store.commit_time(project_id, minutes as f64, None) {
            Ok(()) => {
                if let Some(state) = inner.timers.get_mut(project_id) {
                    state.time = state.initial_time;
                    state.running = false;
                    state.last_updated = datetime::now_millis();
                }
                TickOutcome::Completed { minutes }
            }
            Err(error) => {
                // コミットを永続化できなかった場合は残り0秒のまま停止させる。
                // 経過した分は部分コミットとして後から手動で記録できる。
                warn!(
                    "Failed to commit the completed interval for {}: {:#}",
                    project_id, error
                );
                if let Some(state) = inner.timers.get_mut(project_id) {
                    state.running = false;
                    state.last_updated = datetime::now_millis();
                }
                TickOutcome::Stop
            }
        };

        if let Err(error) = inner.persist_timers() {
            warn!("Failed to persist timer state for {}: {:#}", project_id, error);
        }
        inner.handles.remove(project_id);

        outcome
    }

    /// 完了通知を送る。ロックの外で呼び出し、失敗しても無視する。
    fn notify_completion(inner: &Arc<Mutex<EngineInner<R>>>, project_id: &str, minutes: i64) {
        let notifier = inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .notifier
            .clone();
        if let Some(notifier) = notifier {
            notifier.interval_completed(project_id, minutes);
        }
    }
}
