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

//! Start/stop protocol shared by servers, sessions and clients

use crate::{AtomicState, Error, Result, State, StrandBound};
use std::sync::Arc;
use tracing::trace;

/// The start/stop state machine
///
/// Implementors supply the state cell and the two hooks; the provided
/// methods enforce the shareability check and the transitions. Both hooks
/// run on the object's strand.
pub trait Lifecycle: StrandBound {
    /// The object's lifecycle state
    fn state(&self) -> &AtomicState;

    /// Called once `Starting` has been claimed
    fn on_start(this: &Arc<Self>);

    /// Called once `Stopping` has been claimed, with the state that was
    /// interrupted and the cause of the stop
    fn on_stop(this: &Arc<Self>, interrupted: State, error: Option<Error>);

    /// Claim `Starting` and run [`on_start`](Self::on_start) on the strand
    ///
    /// Fails with [`Error::NotShareable`] if `self` is not `Arc`-owned and
    /// with [`Error::AlreadyRunning`] unless the object is constructed or
    /// stopped.
    fn begin_start(&self) -> Result<Arc<Self>> {
        let Some(this) = self.selfptr() else {
            contract!(false, "start() requires an Arc-owned object");
            return Err(Error::NotShareable);
        };
        if self
            .state()
            .transition_any(State::is_startable, State::Starting)
            .is_none()
        {
            return Err(Error::AlreadyRunning);
        }
        trace!("Lifecycle starting");
        let task = this.clone();
        self.executor().dispatch(move || Self::on_start(&task));
        Ok(this)
    }

    /// Request teardown without waiting for it
    ///
    /// [`on_stop`](Self::on_stop) runs on the strand at most once per run;
    /// repeated requests and requests on an idle object do nothing.
    fn begin_stop(&self, error: Option<Error>) {
        let Some(this) = self.selfptr() else {
            return;
        };
        self.executor().dispatch(move || {
            if let Some(interrupted) = this.state().begin_stop() {
                trace!(%interrupted, "Lifecycle stopping");
                Self::on_stop(&this, interrupted, error);
            }
        });
    }

    fn is_started(&self) -> bool {
        self.state().load() == State::Started
    }

    fn is_stopped(&self) -> bool {
        matches!(self.state().load(), State::Constructed | State::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Executor, ExecutorPool, SelfRef, Shared};
    use std::sync::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Machine {
        self_ref: SelfRef<Machine>,
        executor: Executor,
        state: AtomicState,
        events: Mutex<mpsc::Sender<String>>,
    }

    impl Shared for Machine {
        fn self_ref(&self) -> &SelfRef<Self> {
            &self.self_ref
        }
    }

    impl StrandBound for Machine {
        fn executor(&self) -> &Executor {
            &self.executor
        }
    }

    impl Lifecycle for Machine {
        fn state(&self) -> &AtomicState {
            &self.state
        }

        fn on_start(this: &Arc<Self>) {
            this.state.store(State::Started);
            this.events.lock().unwrap().send("start".into()).unwrap();
        }

        fn on_stop(this: &Arc<Self>, interrupted: State, error: Option<Error>) {
            this.state.store(State::Stopped);
            let cause = error.map(|e| e.to_string()).unwrap_or_default();
            this.events
                .lock()
                .unwrap()
                .send(format!("stop from {interrupted} {cause}"))
                .unwrap();
        }
    }

    fn machine(
        executor: Executor,
        self_ref: impl FnOnce(&std::sync::Weak<Machine>) -> SelfRef<Machine>,
    ) -> (Arc<Machine>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        let machine = Arc::new_cyclic(|weak| Machine {
            self_ref: self_ref(weak),
            executor,
            state: AtomicState::default(),
            events: Mutex::new(tx),
        });
        (machine, rx)
    }

    #[test]
    fn test_start_stop_restart() {
        let pool = ExecutorPool::new(1).unwrap();
        pool.run().unwrap();
        let (machine, rx) = machine(pool.acquire(), SelfRef::new);
        let wait = || rx.recv_timeout(Duration::from_secs(5)).unwrap();

        machine.begin_start().unwrap();
        assert_eq!(wait(), "start");
        assert!(machine.is_started());
        assert!(matches!(machine.begin_start(), Err(Error::AlreadyRunning)));

        machine.begin_stop(Some(Error::Closed));
        machine.begin_stop(None);
        assert_eq!(wait(), "stop from started Connection closed");
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(machine.is_stopped());

        machine.begin_start().unwrap();
        assert_eq!(wait(), "start");
        pool.stop().unwrap();
    }

    #[test]
    #[cfg_attr(feature = "strict-asserts", ignore = "contract violations panic")]
    fn test_start_requires_shared_ownership() {
        let pool = ExecutorPool::new(1).unwrap();
        let (machine, _rx) = machine(pool.acquire(), |_| SelfRef::disabled());
        assert!(matches!(machine.begin_start(), Err(Error::NotShareable)));
        assert_eq!(machine.state().load(), State::Constructed);
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let pool = ExecutorPool::new(1).unwrap();
        pool.run().unwrap();
        let (machine, rx) = machine(pool.acquire(), SelfRef::new);
        machine.begin_stop(None);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(machine.state().load(), State::Constructed);
        pool.stop().unwrap();
    }
}
