//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Connect and silence timeouts
//!
//! Both timers run as sleeping tasks on the owner's context and deliver their
//! expiry on the owner's strand. Fire and cancel race through a single atomic
//! [`TimerState`]; whichever claims `Armed -> Canceled` first wins, so the
//! fault path runs at most once and a late expiry is a no-op.
//!
//! An armed timer holds a strong reference to its owner until it fires or is
//! canceled. `Canceled` is terminal: build a fresh timer for every start.

use crate::{Error, Executor, StrandCell};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

/// Default connect and handshake deadline
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default inactivity deadline
pub const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Timer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TimerState {
    Idle = 0,
    Armed = 1,
    Canceled = 2,
}

impl TimerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Armed,
            _ => Self::Canceled,
        }
    }
}

struct AtomicTimerState(AtomicU8);

impl AtomicTimerState {
    fn new() -> Self {
        Self(AtomicU8::new(TimerState::Idle as u8))
    }

    fn load(&self) -> TimerState {
        TimerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, from: TimerState, to: TimerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to `Canceled`, returning the state that was interrupted
    fn cancel(&self) -> TimerState {
        TimerState::from_u8(self.0.swap(TimerState::Canceled as u8, Ordering::AcqRel))
    }
}

/// Remaining time before an inactivity deadline, or `None` if it has passed
pub fn silence_remaining(elapsed: Duration, duration: Duration) -> Option<Duration> {
    duration.checked_sub(elapsed).filter(|remaining| !remaining.is_zero())
}

/// Deadline for an outbound connect or a handshake
#[derive(Clone)]
pub struct ConnectTimeout {
    inner: Arc<ConnectInner>,
}

struct ConnectInner {
    executor: Executor,
    duration: Duration,
    state: AtomicTimerState,
    task: StrandCell<Option<AbortHandle>>,
}

impl ConnectTimeout {
    pub fn new(executor: &Executor, duration: Duration) -> Self {
        Self {
            inner: Arc::new(ConnectInner {
                executor: executor.clone(),
                duration,
                state: AtomicTimerState::new(),
                task: StrandCell::new(executor, None),
            }),
        }
    }

    pub fn duration(&self) -> Duration {
        self.inner.duration
    }

    pub fn state(&self) -> TimerState {
        self.inner.state.load()
    }

    /// Start the deadline
    ///
    /// `on_timeout` runs on the strand with [`Error::TimedOut`] if the
    /// deadline elapses before [`cancel`](Self::cancel). Returns `false` if
    /// the timer was already armed or canceled. Must be called on the
    /// owner's strand.
    pub fn arm<C, F>(&self, owner: &Arc<C>, on_timeout: F) -> bool
    where
        C: Send + Sync + 'static,
        F: FnOnce(&Arc<C>, Error) + Send + 'static,
    {
        if !self.inner.state.transition(TimerState::Idle, TimerState::Armed) {
            return false;
        }
        let inner = self.inner.clone();
        let owner = owner.clone();
        let task = self.inner.executor.post_after(self.inner.duration, move || {
            if inner.state.transition(TimerState::Armed, TimerState::Canceled) {
                debug!(timeout = ?inner.duration, "Connect timeout elapsed");
                on_timeout(&owner, Error::TimedOut);
            }
        });
        self.inner.task.with(|slot| *slot = Some(task));
        true
    }

    /// Stop the deadline, returning `true` if it was armed
    ///
    /// Must be called on the owner's strand.
    pub fn cancel(&self) -> bool {
        let previous = self.inner.state.cancel();
        if let Some(task) = self.inner.task.with(Option::take) {
            task.abort();
        }
        previous == TimerState::Armed
    }
}

impl fmt::Debug for ConnectTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTimeout")
            .field("duration", &self.inner.duration)
            .field("state", &self.state())
            .finish()
    }
}

/// Inactivity deadline, renewed by traffic
#[derive(Clone)]
pub struct SilenceTimeout {
    inner: Arc<SilenceInner>,
}

struct SilenceInner {
    executor: Executor,
    duration: Duration,
    epoch: Instant,
    /// Nanoseconds since `epoch` of the last recorded activity
    last_alive: AtomicU64,
    state: AtomicTimerState,
    task: StrandCell<Option<AbortHandle>>,
}

impl SilenceInner {
    fn silence(&self) -> Duration {
        let now = self.epoch.elapsed();
        let last = Duration::from_nanos(self.last_alive.load(Ordering::Acquire));
        now.saturating_sub(last)
    }
}

impl SilenceTimeout {
    pub fn new(executor: &Executor, duration: Duration) -> Self {
        Self {
            inner: Arc::new(SilenceInner {
                executor: executor.clone(),
                duration,
                epoch: Instant::now(),
                last_alive: AtomicU64::new(0),
                state: AtomicTimerState::new(),
                task: StrandCell::new(executor, None),
            }),
        }
    }

    pub fn duration(&self) -> Duration {
        self.inner.duration
    }

    pub fn state(&self) -> TimerState {
        self.inner.state.load()
    }

    /// Record activity now; callable from any thread
    pub fn alive(&self) {
        let nanos = u64::try_from(self.inner.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.inner.last_alive.store(nanos, Ordering::Release);
    }

    /// Time since the last recorded activity
    pub fn silence(&self) -> Duration {
        self.inner.silence()
    }

    /// Start watching for inactivity
    ///
    /// Each expiry re-arms for the remainder of the window while traffic keeps
    /// arriving; once a full window passes in silence, `on_expire` runs on
    /// the strand with [`Error::TimedOut`]. Must be called on the owner's
    /// strand.
    pub fn arm<C, F>(&self, owner: &Arc<C>, on_expire: F) -> bool
    where
        C: Send + Sync + 'static,
        F: FnOnce(&Arc<C>, Error) + Send + 'static,
    {
        if !self.inner.state.transition(TimerState::Idle, TimerState::Armed) {
            return false;
        }
        self.alive();
        schedule_silence(self.inner.clone(), owner.clone(), on_expire, self.inner.duration);
        true
    }

    /// Stop watching, returning `true` if the timer was armed
    ///
    /// Must be called on the owner's strand.
    pub fn cancel(&self) -> bool {
        let previous = self.inner.state.cancel();
        if let Some(task) = self.inner.task.with(Option::take) {
            task.abort();
        }
        previous == TimerState::Armed
    }
}

fn schedule_silence<C, F>(inner: Arc<SilenceInner>, owner: Arc<C>, on_expire: F, delay: Duration)
where
    C: Send + Sync + 'static,
    F: FnOnce(&Arc<C>, Error) + Send + 'static,
{
    let timer = inner.clone();
    let task = inner
        .executor
        .post_after(delay, move || expire_silence(timer, owner, on_expire));
    inner.task.with(|slot| *slot = Some(task));
}

fn expire_silence<C, F>(inner: Arc<SilenceInner>, owner: Arc<C>, on_expire: F)
where
    C: Send + Sync + 'static,
    F: FnOnce(&Arc<C>, Error) + Send + 'static,
{
    if inner.state.load() != TimerState::Armed {
        return;
    }
    match silence_remaining(inner.silence(), inner.duration) {
        Some(remaining) => schedule_silence(inner, owner, on_expire, remaining),
        None => {
            if inner.state.transition(TimerState::Armed, TimerState::Canceled) {
                inner.task.with(|slot| slot.take());
                debug!(timeout = ?inner.duration, "Silence timeout elapsed");
                on_expire(&owner, Error::TimedOut);
            }
        }
    }
}

impl fmt::Debug for SilenceTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SilenceTimeout")
            .field("duration", &self.inner.duration)
            .field("state", &self.state())
            .field("silence", &self.silence())
            .finish()
    }
}
