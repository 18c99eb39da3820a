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

//! Server-side session
//!
//! A session is created for every accepted socket and pinned to one executor
//! of the server's pool. Its lifecycle:
//!
//! ```text
//! Starting ─► Accepted ─┬─────────────────┬─► Started ─► Stopping ─► Stopped
//!                       └─► Handshaking ──┘
//! ```

use crate::server::ServerShared;
use crate::{SessionId, SessionInfo};
use bytes::Bytes;
use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use strandio_core::{
    AtomicState, BoxTransport, Connection, ConnectionCore, Error, EventQueue, Executor, Lifecycle,
    ListenerRegistry, OperationQueue, Result, Role, SelfRef, Shared, State, StrandBound,
    StrandCell,
};
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};

/// One accepted connection
pub struct TcpSession {
    core: ConnectionCore<TcpSession>,
    id: SessionId,
    peer_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    created_at: Instant,
    shared: Arc<ServerShared>,
    handshake_task: StrandCell<Option<AbortHandle>>,
    /// `accept` was delivered
    announced: AtomicBool,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    user_data: DashMap<String, Box<dyn Any + Send + Sync>>,
}

impl TcpSession {
    pub(crate) fn new(
        executor: Executor,
        id: SessionId,
        peer_addr: SocketAddr,
        local_addr: Option<SocketAddr>,
        shared: Arc<ServerShared>,
    ) -> Arc<Self> {
        let config = shared.config.connection.clone();
        Arc::new_cyclic(|weak| Self {
            core: ConnectionCore::new(weak, executor.clone(), config),
            id,
            peer_addr,
            local_addr,
            created_at: Instant::now(),
            shared,
            handshake_task: StrandCell::new(&executor, None),
            announced: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            user_data: DashMap::new(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn is_started(&self) -> bool {
        Lifecycle::is_started(self)
    }

    /// Point-in-time view of this session
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            state: self.core.state().load(),
            peer_addr: self.peer_addr,
            executor_index: self.core.executor().index(),
            created_at: self.created_at,
            bytes_sent: self.bytes_sent(),
            bytes_received: self.bytes_received(),
        }
    }

    /// Queue `data` for sending
    ///
    /// Fails with [`Error::NotRunning`] unless the session is started.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        Connection::send(self, data)
    }

    /// Stop the session without waiting for teardown
    pub fn stop(&self) {
        self.begin_stop(None);
    }

    // User data

    /// Store user-defined data under `key`
    pub fn set_data<T: Any + Send + Sync + Clone>(&self, key: &str, value: T) {
        self.user_data.insert(key.to_string(), Box::new(value));
    }

    /// Retrieve user-defined data
    ///
    /// Returns `None` if the key doesn't exist or the type doesn't match.
    pub fn get_data<T: Any + Send + Sync + Clone>(&self, key: &str) -> Option<T> {
        self.user_data
            .get(key)
            .and_then(|value| value.downcast_ref::<T>().cloned())
    }

    pub fn remove_data(&self, key: &str) -> bool {
        self.user_data.remove(key).is_some()
    }

    pub fn has_data(&self, key: &str) -> bool {
        self.user_data.contains_key(key)
    }

    /// Start the session on an accepted transport
    pub(crate) fn start(this: &Arc<Self>, transport: BoxTransport) -> Result<()> {
        this.begin_start()?;
        // Posted after on_start, so it observes `Accepted`
        let session = this.clone();
        this.executor()
            .post(move || Self::accepted(&session, transport));
        Ok(())
    }

    fn accepted(this: &Arc<Self>, transport: BoxTransport) {
        if this.core.state().load() != State::Accepted {
            return;
        }
        this.announced.store(true, Ordering::Release);
        this.shared.listeners.notify_accept(this);
        Self::arm_silence_timeout(this);

        let Some(handshake) = this.shared.handshake.clone() else {
            Self::established(this, transport);
            return;
        };
        if !this
            .core
            .state()
            .transition(State::Accepted, State::Handshaking)
        {
            return;
        }
        Self::arm_connect_timeout(this);
        let session = this.clone();
        let task = this.executor().spawn_then(
            async move {
                let mut transport = transport;
                let result = handshake.handshake(&mut transport, Role::Server).await;
                (transport, result)
            },
            move |(transport, result)| Self::handshaken(&session, transport, result),
        );
        this.handshake_task.with(|slot| *slot = Some(task));
    }

    fn handshaken(this: &Arc<Self>, transport: BoxTransport, result: Result<()>) {
        this.handshake_task.with(Option::take);
        if this.core.state().load() != State::Handshaking {
            return;
        }
        this.cancel_connect_timeout();
        match result {
            Ok(()) => {
                this.shared.listeners.notify_handshake(this, None);
                Self::arm_silence_timeout(this);
                Self::established(this, transport);
            }
            Err(e) => {
                warn!(session_id = %this.id, error = %e, "Handshake failed");
                this.shared.metrics.handshake_failure();
                // Teardown reports the failure to the handshake observer
                this.begin_stop(Some(e));
            }
        }
    }

    fn established(this: &Arc<Self>, transport: BoxTransport) {
        this.core.socket().attach(transport);
        if let Err(e) = Self::begin_read(this) {
            this.begin_stop(Some(e));
            return;
        }
        let from = this.core.state().transition_any(
            |state| matches!(state, State::Accepted | State::Handshaking),
            State::Started,
        );
        if from.is_some() {
            debug!(session_id = %this.id, peer = %this.peer_addr, "Session started");
            this.shared.listeners.notify_connect(this);
        }
    }
}

impl Shared for TcpSession {
    fn self_ref(&self) -> &SelfRef<Self> {
        self.core.self_ref()
    }
}

impl StrandBound for TcpSession {
    fn executor(&self) -> &Executor {
        self.core.executor()
    }
}

impl EventQueue for TcpSession {
    fn event_queue(&self) -> &OperationQueue<Self> {
        self.core.queue()
    }
}

impl Lifecycle for TcpSession {
    fn state(&self) -> &AtomicState {
        self.core.state()
    }

    fn on_start(this: &Arc<Self>) {
        if this.core.state().transition(State::Starting, State::Accepted) {
            this.shared.metrics.session_opened();
            this.shared.listeners.notify_init();
        }
    }

    #[instrument(skip_all, fields(session_id = %this.id, interrupted = %interrupted))]
    fn on_stop(this: &Arc<Self>, interrupted: State, error: Option<Error>) {
        if let Some(task) = this.handshake_task.with(Option::take) {
            task.abort();
        }
        if interrupted == State::Handshaking {
            let cause = error.clone().unwrap_or(Error::Aborted);
            this.shared.listeners.notify_handshake(this, Some(&cause));
        }
        if error.as_ref().is_some_and(Error::is_timeout) {
            this.shared.metrics.timeout();
        }

        Self::teardown(this, interrupted, error.as_ref());

        if interrupted != State::Starting {
            this.shared.metrics.session_closed(this.created_at.elapsed());
        }
        this.shared.sessions.remove(this.id);
        match &error {
            Some(e) => info!(error = %e, "Session stopped"),
            None => info!("Session stopped"),
        }
    }
}

impl Connection for TcpSession {
    fn core(&self) -> &ConnectionCore<Self> {
        &self.core
    }

    fn listeners(&self) -> &ListenerRegistry<Self> {
        &self.shared.listeners
    }

    fn on_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.shared.metrics.write_completed(bytes);
    }

    fn on_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.shared.metrics.read_completed(bytes);
    }

    fn announced(&self, _interrupted: State) -> bool {
        self.announced.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TcpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpSession")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}
