//! Background indexing scheduler.
//!
//! One recurring task drives the repository's background maintenance:
//! reload the set configuration from the collection-level records, then
//! run a full or incremental indexing pass. The timer is either a fixed
//! interval or a daily cron (a time of day, optionally restricted to a
//! weekday mask). Passes never overlap; starting a new timer cancels and
//! replaces any running one; `stop` is idempotent and waits for in-flight
//! work to reach the next between-files checkpoint before returning.

use crate::indexer::IndexingPassReport;
use crate::manager::RepositoryManager;
use async_trait::async_trait;
use chrono::{Datelike, NaiveTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// When the recurring task fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Every N seconds, first firing after a short startup delay.
    Interval(Duration),
    /// Daily at the given UTC time of day, optionally restricted to a
    /// subset of weekdays (1 = Monday … 7 = Sunday).
    Daily {
        time: NaiveTime,
        days_of_week: Option<Vec<u8>>,
    },
}

/// Notified after each completed indexing pass.
#[async_trait]
pub trait IndexingObserver: Send + Sync {
    async fn pass_completed(&self, report: &IndexingPassReport);
}

struct TimerState {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// The background indexing scheduler.
pub struct IndexingScheduler {
    manager: Arc<RepositoryManager>,
    state: Mutex<Option<TimerState>>,
}

impl IndexingScheduler {
    pub fn new(manager: Arc<RepositoryManager>) -> Self {
        Self {
            manager,
            state: Mutex::new(None),
        }
    }

    /// Start (or restart) the recurring task. Any running timer is
    /// cancelled and replaced; its in-flight pass winds down at the next
    /// between-files checkpoint.
    pub fn start(
        &self,
        schedule: Schedule,
        index_all: bool,
        observer: Option<Arc<dyn IndexingObserver>>,
    ) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_timer(
            self.manager.clone(),
            schedule.clone(),
            index_all,
            observer,
            cancel.clone(),
        ));

        let previous = self.state.lock().replace(TimerState { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
            info!("Indexing timer restarted: {:?}", schedule);
        } else {
            info!("Indexing timer started: {:?}", schedule);
        }
    }

    /// Stop the scheduler. Safe to call repeatedly and while a pass is
    /// mid-flight: the pass halts between files and this method returns
    /// once the timer task has drained.
    pub async fn stop(&self) {
        let state = self.state.lock().take();
        match state {
            Some(TimerState { cancel, handle }) => {
                cancel.cancel();
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        error!("Indexing timer task failed during shutdown: {}", e);
                    }
                }
                info!("Indexing timer stopped");
            }
            None => info!("Indexing timer already stopped"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .as_ref()
            .map(|s| !s.handle.is_finished())
            .unwrap_or(false)
    }
}

async fn run_timer(
    manager: Arc<RepositoryManager>,
    schedule: Schedule,
    index_all: bool,
    observer: Option<Arc<dyn IndexingObserver>>,
    cancel: CancellationToken,
) {
    match schedule {
        Schedule::Interval(period) => {
            // First firing after a short startup delay, then at the
            // configured period.
            let mut delay = Duration::from_secs(6).min(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                run_pass(&manager, index_all, observer.as_deref(), &cancel).await;
                if cancel.is_cancelled() {
                    break;
                }
                delay = period;
            }
        }
        Schedule::Daily { time, days_of_week } => loop {
            let wait = duration_until_next(time);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            let today = Utc::now().weekday().number_from_monday() as u8;
            let runs_today = days_of_week
                .as_ref()
                .map(|days| days.contains(&today))
                .unwrap_or(true);
            if runs_today {
                run_pass(&manager, index_all, observer.as_deref(), &cancel).await;
            } else {
                info!("Indexing timer: not scheduled to run today");
            }
            if cancel.is_cancelled() {
                break;
            }
        },
    }
}

// One firing: reload the set configuration from the collection-level
// records, then run the indexing pass on a blocking thread so the timer
// task can be awaited for a graceful drain.
async fn run_pass(
    manager: &Arc<RepositoryManager>,
    index_all: bool,
    observer: Option<&dyn IndexingObserver>,
    cancel: &CancellationToken,
) {
    let m = manager.clone();
    let token = cancel.clone();
    let result = tokio::task::spawn_blocking(move || {
        if let Err(e) = m.load_collection_records(false) {
            warn!("Indexing timer: error reloading collection records: {}", e);
        }
        m.index_files(index_all, &token)
    })
    .await;

    match result {
        Ok(report) => {
            if let Some(observer) = observer {
                observer.pass_completed(&report).await;
            }
        }
        Err(e) => error!("Indexing pass panicked: {}", e),
    }
}

// Time until the next strictly future occurrence of the given UTC time of
// day.
fn duration_until_next(time: NaiveTime) -> Duration {
    let now = Utc::now();
    let today = now.date_naive().and_time(time).and_utc();
    let next = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_until_next_is_future() {
        let wait = duration_until_next(NaiveTime::from_hms_opt(3, 0, 0).unwrap());
        assert!(wait <= Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn test_schedule_equality() {
        let a = Schedule::Daily {
            time: NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
            days_of_week: Some(vec![6, 7]),
        };
        assert_eq!(a, a.clone());
        assert_ne!(a, Schedule::Interval(Duration::from_secs(60)));
    }
}
