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

//! Connection composite
//!
//! [`ConnectionCore`] bundles the components every stream connection is made
//! of: self-ownership, the executor binding, the lifecycle state, the
//! operation queue, the socket and the two timeouts. The [`Connection`]
//! trait wires them together into the send path, the receive path and the
//! shared teardown sequence.

use crate::{
    AtomicState, ConnectTimeout, ConnectionConfig, Error, EventQueue, Executor, Lifecycle,
    ListenerRegistry, OperationQueue, Result, SelfRef, SilenceTimeout, SocketComponent, State,
    StrandCell,
};
use bytes::Bytes;
use metrics::counter;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

#[derive(Default)]
struct Timers {
    connect: Option<ConnectTimeout>,
    silence: Option<SilenceTimeout>,
}

/// Components shared by every stream connection
pub struct ConnectionCore<C: EventQueue> {
    self_ref: SelfRef<C>,
    executor: Executor,
    state: AtomicState,
    queue: OperationQueue<C>,
    socket: SocketComponent,
    timers: StrandCell<Timers>,
    config: ConnectionConfig,
}

impl<C: EventQueue> ConnectionCore<C> {
    /// Components for a connection being built by [`Arc::new_cyclic`]
    pub fn new(weak: &Weak<C>, executor: Executor, config: ConnectionConfig) -> Self {
        Self {
            self_ref: SelfRef::new(weak),
            state: AtomicState::default(),
            queue: OperationQueue::new(&executor),
            socket: SocketComponent::new(&executor),
            timers: StrandCell::new(&executor, Timers::default()),
            executor,
            config,
        }
    }

    pub fn self_ref(&self) -> &SelfRef<C> {
        &self.self_ref
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn state(&self) -> &AtomicState {
        &self.state
    }

    pub fn queue(&self) -> &OperationQueue<C> {
        &self.queue
    }

    pub fn socket(&self) -> &SocketComponent {
        &self.socket
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl<C: EventQueue> fmt::Debug for ConnectionCore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCore")
            .field("executor", &self.executor)
            .field("state", &self.state)
            .field("socket", &self.socket)
            .finish_non_exhaustive()
    }
}

/// A stream connection built from a [`ConnectionCore`]
pub trait Connection: Lifecycle + EventQueue {
    fn core(&self) -> &ConnectionCore<Self>;

    /// Observers notified of this connection's events
    fn listeners(&self) -> &ListenerRegistry<Self>;

    /// Called on the strand after a write completes
    fn on_sent(&self, _bytes: usize) {}

    /// Called on the strand before a received chunk is dispatched
    fn on_received(&self, _bytes: usize) {}

    /// Whether observers were told about this connection, so that stopping
    /// out of `interrupted` owes them a `disconnect`
    fn announced(&self, interrupted: State) -> bool {
        interrupted == State::Started
    }

    /// Queue `data` for writing
    ///
    /// Writes go out in call order, one at a time. A write failure stops the
    /// connection with the failure as its cause.
    fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        if !self.is_started() {
            return Err(Error::NotRunning);
        }
        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }
        self.push_event(move |slot| {
            let this = slot.owner().clone();
            if !this.is_started() {
                return;
            }
            this.core().socket().write(slot, data, |this, result| match result {
                Ok(n) => {
                    this.keep_alive();
                    this.on_sent(n);
                }
                Err(e) => {
                    warn!(error = %e, "Write failed");
                    counter!("strandio.errors.send").increment(1);
                    this.begin_stop(Some(e));
                }
            });
        })
    }

    /// Record activity on the silence timeout; callable from any thread
    fn keep_alive(&self) {
        if self.core().timers.is_accessible() {
            if let Some(silence) = self.core().timers.with(|t| t.silence.clone()) {
                silence.alive();
            }
        } else if let Some(this) = self.selfptr() {
            self.executor().post(move || this.keep_alive());
        }
    }

    /// Arm a fresh connect timeout that stops the connection when it fires
    ///
    /// Must be called on the strand.
    fn arm_connect_timeout(this: &Arc<Self>) {
        let timer = ConnectTimeout::new(this.executor(), this.core().config().connect_timeout);
        timer.arm(this, |this, error| this.begin_stop(Some(error)));
        if let Some(previous) = this.core().timers.with(|t| t.connect.replace(timer)) {
            previous.cancel();
        }
    }

    /// Cancel the connect timeout, returning `true` if it was still armed
    ///
    /// Must be called on the strand.
    fn cancel_connect_timeout(&self) -> bool {
        match self.core().timers.with(|t| t.connect.take()) {
            Some(timer) => timer.cancel(),
            None => false,
        }
    }

    /// Arm a fresh silence timeout that stops the connection when it fires
    ///
    /// Must be called on the strand.
    fn arm_silence_timeout(this: &Arc<Self>) {
        let timer = SilenceTimeout::new(this.executor(), this.core().config().silence_timeout);
        timer.arm(this, |this, error| {
            debug!("Connection silent for too long");
            this.begin_stop(Some(error));
        });
        if let Some(previous) = this.core().timers.with(|t| t.silence.replace(timer)) {
            previous.cancel();
        }
    }

    /// Start delivering received data to the `recv` observer
    ///
    /// End of stream or a read error stops the connection with that cause.
    /// Must be called on the strand.
    fn begin_read(this: &Arc<Self>) -> Result<()> {
        let buffer_size = this.core().config().read_buffer_size;
        this.core().socket().begin_read(
            this,
            buffer_size,
            |this, data| {
                this.keep_alive();
                this.on_received(data.len());
                this.listeners().notify_recv(this, data);
            },
            |this, fault| this.begin_stop(Some(fault)),
        )
    }

    /// Release every resource and fire `disconnect` if the connection was announced
    ///
    /// Cancels both timers, discards queued operations, closes the socket
    /// and leaves the state at `Stopped`. Must be called on the strand from
    /// [`Lifecycle::on_stop`].
    fn teardown(this: &Arc<Self>, interrupted: State, error: Option<&Error>) {
        let timers = this.core().timers.with(std::mem::take);
        if let Some(timer) = timers.connect {
            timer.cancel();
        }
        if let Some(timer) = timers.silence {
            timer.cancel();
        }
        let discarded = this.core().queue().clear();
        if discarded > 0 {
            debug!(discarded, "Discarded queued operations");
        }
        this.core().socket().close();

        if this.announced(interrupted) {
            this.listeners().notify_disconnect(this, error);
        }
        this.state().store(State::Stopped);
    }
}
