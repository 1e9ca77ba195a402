//! Staging-directory polling for platforms that hand over shared files
//! without a delivery callback.
//!
//! Each session is a fixed set of spawned checks (immediate, back-off
//! delays, a repeating interval and a hard ceiling). Cancelling a session
//! aborts all of them at once.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bridge::SharePipeline;
use crate::error::Result;
use crate::event::InboundEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSchedule {
    /// Extra one-shot checks, measured from the trigger.
    pub backoff: Vec<Duration>,
    pub interval: Duration,
    /// No check runs after this point.
    pub ceiling: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTrigger {
    Launch,
    Resume,
    InitialQuery,
    Manual,
}

struct PollerInner {
    inbox_dir: PathBuf,
    schedule: PollSchedule,
    cleanup_delay: Duration,
    pipeline: Arc<SharePipeline>,
    checking: AtomicBool,
    session: Mutex<Session>,
}

/// One poll session. `found` belongs to the session so a straggling check
/// from an earlier session cannot end a newer one.
#[derive(Default)]
struct Session {
    found: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct InboxPoller {
    inner: Arc<PollerInner>,
}

/// Holds the check-in-progress flag; released on drop, including abort.
struct CheckGuard<'a>(&'a AtomicBool);

impl<'a> CheckGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CheckGuard(flag))
    }
}

impl Drop for CheckGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl InboxPoller {
    pub fn new(
        inbox_dir: impl Into<PathBuf>,
        schedule: PollSchedule,
        cleanup_delay: Duration,
        pipeline: Arc<SharePipeline>,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                inbox_dir: inbox_dir.into(),
                schedule,
                cleanup_delay,
                pipeline,
                checking: AtomicBool::new(false),
                session: Mutex::new(Session::default()),
            }),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a new poll session, replacing any session in progress.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, trigger: PollTrigger) {
        let mut session = self.session();
        for task in session.tasks.drain(..) {
            task.abort();
        }
        let found = Arc::new(AtomicBool::new(false));
        session.found = Arc::clone(&found);

        info!(
            "Starting inbox poll ({:?}) on {}",
            trigger,
            self.inner.inbox_dir.display()
        );

        let schedule = &self.inner.schedule;

        let poller = self.clone();
        let flag = Arc::clone(&found);
        session
            .tasks
            .push(tokio::spawn(async move { poller.check(&flag).await }));

        for delay in schedule.backoff.iter().copied() {
            let poller = self.clone();
            let flag = Arc::clone(&found);
            session.tasks.push(tokio::spawn(async move {
                sleep(delay).await;
                poller.check(&flag).await;
            }));
        }

        let poller = self.clone();
        let flag = Arc::clone(&found);
        let interval = schedule.interval;
        session.tasks.push(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if flag.load(Ordering::Acquire) {
                    break;
                }
                poller.check(&flag).await;
            }
        }));

        let poller = self.clone();
        let ceiling = schedule.ceiling;
        session.tasks.push(tokio::spawn(async move {
            sleep(ceiling).await;
            debug!("Inbox poll reached its {:?} ceiling", ceiling);
            poller.cancel_session(&found);
        }));
    }

    /// Cancel the current session, if any.
    pub fn stop(&self) {
        let mut session = self.session();
        if !session.tasks.is_empty() {
            info!("Inbox poll stopped");
        }
        for task in session.tasks.drain(..) {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.session().tasks.iter().any(|task| !task.is_finished())
    }

    /// Abort the tasks of the session owning `found`. A no-op once a newer
    /// session has replaced it.
    fn cancel_session(&self, found: &Arc<AtomicBool>) {
        let mut session = self.session();
        if !Arc::ptr_eq(&session.found, found) {
            return;
        }
        for task in session.tasks.drain(..) {
            task.abort();
        }
    }

    async fn check(&self, found: &Arc<AtomicBool>) {
        if found.load(Ordering::Acquire) {
            return;
        }
        let Some(_guard) = CheckGuard::acquire(&self.inner.checking) else {
            debug!("Inbox check already running");
            return;
        };

        match self.find_unseen().await {
            Ok(Some(path)) => {
                if found.swap(true, Ordering::AcqRel) {
                    return;
                }
                info!("Found staged share {}", path.display());
                let poller = self.clone();
                tokio::spawn(async move { poller.process(path).await });
                self.cancel_session(found);
            }
            Ok(None) => {}
            Err(e) => warn!(
                "Cannot read inbox {}: {}",
                self.inner.inbox_dir.display(),
                e
            ),
        }
    }

    /// First file in the inbox that has not been delivered yet. The returned
    /// file is already marked as seen.
    async fn find_unseen(&self) -> Result<Option<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.inner.inbox_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if entry.file_type().await?.is_file() {
                candidates.push(entry.path());
            }
        }
        candidates.sort();

        let controller = self.inner.pipeline.controller();
        for path in candidates {
            if controller.mark_seen(&path.to_string_lossy()).await {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    async fn process(&self, path: PathBuf) {
        let delivered = self
            .inner
            .pipeline
            .handle_event(InboundEvent::StagedFile(path.clone()))
            .await;
        if delivered.is_none() {
            return;
        }

        sleep(self.inner.cleanup_delay).await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Removed staged file {}", path.display()),
            Err(e) => debug!("Could not remove staged file {}: {}", path.display(), e),
        }
    }
}
