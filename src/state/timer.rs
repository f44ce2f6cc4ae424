use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{task::AbortHandle, time::sleep};
use tracing::debug;
use uuid::Uuid;

/// Timed phase a scheduled action belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedPhase {
    /// Countdown before the first question.
    PreQuizCountdown,
    /// Team thinking time of a question.
    ThinkingTime {
        /// Position of the question.
        index: usize,
    },
    /// Answer window of a question.
    AnswerWindow {
        /// Position of the question.
        index: usize,
    },
    /// Pause after everyone answered.
    GraceDelay {
        /// Position of the question.
        index: usize,
    },
}

struct ScheduledTimer {
    id: u64,
    phase: TimedPhase,
    handle: AbortHandle,
}

/// Single-shot, cancelable delayed actions, at most one per session.
///
/// Scheduling a timer for a session cancels the one already pending for it. A timer leaves the
/// registry right before its action runs, so cancellation never interrupts a running action.
#[derive(Default)]
pub struct TimerService {
    timers: Arc<DashMap<Uuid, ScheduledTimer>>,
    next_id: AtomicU64,
}

impl TimerService {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay`, replacing any pending timer of the session.
    pub fn schedule<F, Fut>(&self, session_id: Uuid, phase: TimedPhase, delay: Duration, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // The entry guard is held while spawning so the task cannot look itself up too early.
        match self.timers.entry(session_id) {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.get();
                previous.handle.abort();
                debug!(
                    session_id = %session_id,
                    superseded = ?previous.phase,
                    phase = ?phase,
                    "timer superseded"
                );
                let handle = self.spawn(session_id, id, delay, action);
                occupied.insert(ScheduledTimer { id, phase, handle });
            }
            Entry::Vacant(vacant) => {
                let handle = self.spawn(session_id, id, delay, action);
                vacant.insert(ScheduledTimer { id, phase, handle });
            }
        }
    }

    /// Like [`TimerService::schedule`], but keep an already pending timer for the same phase.
    ///
    /// Returns whether a timer was scheduled.
    pub fn schedule_once<F, Fut>(
        &self,
        session_id: Uuid,
        phase: TimedPhase,
        delay: Duration,
        action: F,
    ) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.current(session_id) == Some(phase) {
            return false;
        }
        self.schedule(session_id, phase, delay, action);
        true
    }

    /// Cancel the pending timer of a session, returning its phase.
    pub fn cancel(&self, session_id: Uuid) -> Option<TimedPhase> {
        self.timers.remove(&session_id).map(|(_, timer)| {
            timer.handle.abort();
            timer.phase
        })
    }

    /// Phase of the timer pending for a session.
    pub fn current(&self, session_id: Uuid) -> Option<TimedPhase> {
        self.timers.get(&session_id).map(|timer| timer.phase)
    }

    /// Number of sessions with a pending timer.
    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    fn spawn<F, Fut>(&self, session_id: Uuid, id: u64, delay: Duration, action: F) -> AbortHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let timers = Arc::clone(&self.timers);
        tokio::spawn(async move {
            sleep(delay).await;
            if timers
                .remove_if(&session_id, |_, timer| timer.id == id)
                .is_none()
            {
                return;
            }
            action().await;
        })
        .abort_handle()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        for timer in self.timers.iter() {
            timer.handle.abort();
        }
    }
}
