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

//! Connection lifecycle states
//!
//! ```text
//! Constructed ─► Starting ─┬─► Connecting ─┬─► Handshaking ─┬─► Started ─► Stopping ─► Stopped
//!                          └─► Accepted ───┘                │                            │
//!                                          └────────────────┘                            │
//!     ▲                                                                                  │
//!     └──────────────────────────────── (restart) ◄──────────────────────────────────────┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a connection-like object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum State {
    /// Built but never started
    Constructed = 0,
    /// `start()` accepted, setup in progress
    Starting = 1,
    /// Outbound connect in progress
    Connecting = 2,
    /// Inbound connection accepted
    Accepted = 3,
    /// Protocol handshake in progress
    Handshaking = 4,
    /// Fully running
    Started = 5,
    /// Teardown in progress
    Stopping = 6,
    /// Torn down; may be started again
    Stopped = 7,
}

impl State {
    /// Convert from u8 (for atomic operations)
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Constructed,
            1 => Self::Starting,
            2 => Self::Connecting,
            3 => Self::Accepted,
            4 => Self::Handshaking,
            5 => Self::Started,
            6 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    /// Convert to u8 (for atomic operations)
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if the object is between `start()` and the end of teardown
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Connecting | Self::Accepted | Self::Handshaking | Self::Started
        )
    }

    /// Check if the object is being or has been torn down
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }

    /// Check if `start()` is allowed from this state
    pub fn is_startable(self) -> bool {
        matches!(self, Self::Constructed | Self::Stopped)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constructed => write!(f, "constructed"),
            Self::Starting => write!(f, "starting"),
            Self::Connecting => write!(f, "connecting"),
            Self::Accepted => write!(f, "accepted"),
            Self::Handshaking => write!(f, "handshaking"),
            Self::Started => write!(f, "started"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Lifecycle state readable from any thread
pub struct AtomicState(AtomicU8);

impl AtomicState {
    pub fn new(state: State) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn load(&self) -> State {
        State::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: State) {
        self.0.store(state.as_u8(), Ordering::Release);
    }

    /// Move from `from` to `to`, failing if the state was not `from`
    pub fn transition(&self, from: State, to: State) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to `to` from any state accepted by `allowed`
    ///
    /// Returns the previous state on success.
    pub fn transition_any(&self, allowed: impl Fn(State) -> bool, to: State) -> Option<State> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                allowed(State::from_u8(current)).then_some(to.as_u8())
            })
            .ok()
            .map(State::from_u8)
    }

    /// Claim teardown, returning the state it interrupted
    ///
    /// Exactly one caller wins for each run; later calls and calls on an
    /// object that never started return `None`.
    pub fn begin_stop(&self) -> Option<State> {
        self.transition_any(State::is_active, State::Stopping)
    }
}

impl Default for AtomicState {
    fn default() -> Self {
        Self::new(State::Constructed)
    }
}

impl fmt::Debug for AtomicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicState").field(&self.load()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_state_u8_conversion() {
        for state in [
            State::Constructed,
            State::Starting,
            State::Connecting,
            State::Accepted,
            State::Handshaking,
            State::Started,
            State::Stopping,
            State::Stopped,
        ] {
            assert_eq!(State::from_u8(state.as_u8()), state);
        }
        assert_eq!(State::from_u8(200), State::Stopped);
    }

    #[test]
    fn test_state_predicates() {
        assert!(State::Constructed.is_startable());
        assert!(State::Stopped.is_startable());
        assert!(!State::Started.is_startable());
        assert!(State::Handshaking.is_active());
        assert!(!State::Constructed.is_active());
        assert!(State::Stopping.is_terminal());
        assert!(!State::Started.is_terminal());
        assert_eq!(State::Started.to_string(), "started");
    }

    #[test]
    fn test_transition() {
        let state = AtomicState::default();
        assert!(state.transition(State::Constructed, State::Starting));
        assert!(!state.transition(State::Constructed, State::Starting));
        assert_eq!(state.load(), State::Starting);
    }

    #[test]
    fn test_begin_stop_only_once() {
        let state = AtomicState::new(State::Started);
        assert_eq!(state.begin_stop(), Some(State::Started));
        assert_eq!(state.begin_stop(), None);
        state.store(State::Stopped);
        assert_eq!(state.begin_stop(), None);
        assert_eq!(AtomicState::default().begin_stop(), None);
    }

    #[test]
    fn test_concurrent_begin_stop_has_one_winner() {
        let state = Arc::new(AtomicState::new(State::Started));
        let winners = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let state = state.clone();
                let winners = winners.clone();
                thread::spawn(move || {
                    if state.begin_stop().is_some() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(state.load(), State::Stopping);
    }
}
