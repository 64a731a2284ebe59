// attendance-backup/src/backup/scheduler.rs
use chrono::{Local, NaiveDateTime, NaiveTime};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::config::ScheduleConfig;

pub const BACKUP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Today at `at`, or tomorrow if that instant is not after `now`.
pub fn next_fire_time(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

pub fn initial_delay(now: NaiveDateTime, at: NaiveTime) -> Duration {
    (next_fire_time(now, at) - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Handle to a running schedule. Dropping it does not stop the schedule.
pub struct ScheduleHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    /// Prevents every future firing. A callback already running is not interrupted.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.task.is_finished()
    }
}

/// Schedules `on_fire` daily at the configured time.
///
/// Returns `None` without scheduling anything when backups are disabled.
pub fn start<F, Fut>(config: &ScheduleConfig, on_fire: F) -> Option<ScheduleHandle>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if !config.enabled {
        tracing::warn!("Automated backup is disabled in configuration");
        return None;
    }
    let Some(at) = NaiveTime::from_hms_opt(config.hour, config.minute, 0) else {
        tracing::error!(time = %config, "Invalid backup time, automated backup not scheduled");
        return None;
    };

    let now = Local::now().naive_local();
    let next = next_fire_time(now, at);
    tracing::info!(
        next_backup = %next.format("%Y-%m-%d %H:%M:%S"),
        "Automated backup scheduled for {} daily",
        config
    );
    Some(spawn_fixed_rate(initial_delay(now, at), BACKUP_PERIOD, on_fire))
}

/// Fires after `initial_delay` and then every `period` on a fixed-rate grid.
///
/// Ticks missed while a callback overran collapse into a single late firing;
/// later fire times stay on the original grid.
pub fn spawn_fixed_rate<F, Fut>(initial_delay: Duration, period: Duration, mut on_fire: F) -> ScheduleHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + initial_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => on_fire().await,
            }
        }
        tracing::debug!("Backup scheduler stopped");
    });

    ScheduleHandle { cancel, task }
}
