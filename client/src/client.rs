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

//! TCP client
//!
//! A client owns a single-context [`ExecutorPool`] and runs every handler on
//! that context's strand. Its lifecycle:
//!
//! ```text
//! Starting ─► Connecting ─┬──────────────────┬─► Started ─► Stopping ─► Stopped
//!                         └─► Handshaking ───┘                             │
//!                                  ▲            reconnect_delay            │
//!                                  └───────────────────────────────────────┘
//! ```
//!
//! The connect timeout covers both the connect and the handshake.

use crate::ClientConfig;
use bytes::Bytes;
use metrics::counter;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use strandio_core::{
    AtomicState, BoxTransport, Connection, ConnectionCore, Error, EventQueue, Executor,
    ExecutorPool, Handshake, Lifecycle, ListenerRegistry, Observer, OperationQueue, Result, Role,
    SelfRef, Shared, State, StrandBound, StrandCell, contract,
};
use tokio::net::TcpStream;
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};

type Waiter = Mutex<Option<mpsc::Sender<Result<()>>>>;

/// Strand-owned bookkeeping for connect and reconnect
#[derive(Default)]
struct Pending {
    /// Connect or handshake in flight
    connect: Option<AbortHandle>,
    /// Scheduled reconnection
    reconnect: Option<AbortHandle>,
    /// Consecutive reconnection attempts
    attempts: usize,
}

/// A TCP client with its own event loop
///
/// # Example
///
/// ```no_run
/// use strandio_client::{ClientConfig, Observer, TcpClient};
///
/// let client = TcpClient::new(ClientConfig::new("localhost", 7000)).unwrap();
/// client.bind(Observer::recv(|_, data| println!("{}", String::from_utf8_lossy(data))));
/// client.start().unwrap();
/// client.send("hello").unwrap();
/// client.stop().unwrap();
/// ```
pub struct TcpClient {
    core: ConnectionCore<TcpClient>,
    pool: ExecutorPool,
    config: ClientConfig,
    listeners: ListenerRegistry<TcpClient>,
    handshake: Option<Arc<dyn Handshake>>,
    pending: StrandCell<Pending>,
    stop_requested: AtomicBool,
    peer_addr: Mutex<Option<SocketAddr>>,
    local_addr: Mutex<Option<SocketAddr>>,
    start_waiter: Waiter,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl TcpClient {
    /// Create a client without a handshake
    pub fn new(config: ClientConfig) -> Result<Arc<Self>> {
        Self::build(config, None)
    }

    /// Create a client that runs `handshake` after every connect
    pub fn with_handshake(
        config: ClientConfig,
        handshake: Arc<dyn Handshake>,
    ) -> Result<Arc<Self>> {
        Self::build(config, Some(handshake))
    }

    fn build(config: ClientConfig, handshake: Option<Arc<dyn Handshake>>) -> Result<Arc<Self>> {
        config.validate()?;
        let pool = ExecutorPool::new(1)?;
        let executor = pool.acquire();
        Ok(Arc::new_cyclic(|weak| Self {
            core: ConnectionCore::new(weak, executor.clone(), config.connection.clone()),
            pending: StrandCell::new(&executor, Pending::default()),
            pool,
            config,
            listeners: ListenerRegistry::new(),
            handshake,
            stop_requested: AtomicBool::new(false),
            peer_addr: Mutex::new(None),
            local_addr: Mutex::new(None),
            start_waiter: Mutex::new(None),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }))
    }

    /// Bind an observer, returning the one it replaced
    pub fn bind(&self, observer: Observer<TcpClient>) -> Option<Observer<TcpClient>> {
        self.listeners.bind(observer)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
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

    /// Connect and block until connected or failed
    ///
    /// Must not be called from the client's own thread; use
    /// [`async_start`](Self::async_start) there.
    #[instrument(skip_all, fields(addr = %self.config.address()))]
    pub fn start(&self) -> Result<()> {
        if self.pool.running_in_pool_thread() {
            contract!(false, "TcpClient::start called from the client's own thread");
            return Err(Error::WouldDeadlock);
        }

        let (tx, rx) = mpsc::channel();
        *self.start_waiter.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        if let Err(e) = self.async_start() {
            self.start_waiter.lock().unwrap_or_else(PoisonError::into_inner).take();
            return Err(e);
        }
        rx.recv().unwrap_or(Err(Error::Aborted))
    }

    /// Begin connecting without waiting
    ///
    /// The outcome is reported through the `start` observer.
    pub fn async_start(&self) -> Result<()> {
        self.stop_requested.store(false, Ordering::Release);
        self.begin_start()?;
        if !self.pool.is_running() {
            if let Err(e) = self.pool.run() {
                self.abandon_start();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Give up a start whose `on_start` cannot run
    ///
    /// A queued `on_start` that runs later finds the client stopped and
    /// does nothing.
    fn abandon_start(&self) {
        self.core
            .state()
            .transition(State::Starting, State::Stopped);
    }

    /// Queue `data` for sending
    pub fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        Connection::send(self, data)
    }

    /// Disconnect and cancel any pending reconnection
    ///
    /// Off the client's thread this blocks until teardown finished and the
    /// event loop stopped. On the client's thread (from inside a callback) it
    /// only requests teardown and returns immediately.
    #[instrument(skip_all, fields(addr = %self.config.address()))]
    pub fn stop(&self) -> Result<()> {
        self.stop_requested.store(true, Ordering::Release);
        let Some(this) = self.selfptr() else {
            return Ok(());
        };

        if self.pool.running_in_pool_thread() {
            self.executor().dispatch(move || Self::stop_now(&this));
            return Ok(());
        }
        if !self.pool.is_running() {
            return Ok(());
        }

        let (done, finished) = mpsc::channel();
        self.executor().post(move || {
            Self::stop_now(&this);
            let _ = done.send(());
        });
        let _ = finished.recv();
        self.pool.stop()
    }

    fn stop_now(this: &Arc<Self>) {
        let reconnect = this.pending.with(|pending| {
            pending.attempts = 0;
            pending.reconnect.take()
        });
        if let Some(task) = reconnect {
            task.abort();
        }
        if let Some(interrupted) = this.core.state().begin_stop() {
            Self::on_stop(this, interrupted, None);
        }
    }

    fn connected(this: &Arc<Self>, result: Result<TcpStream>) {
        this.pending.with(|pending| pending.connect = None);
        if this.core.state().load() != State::Connecting {
            return;
        }
        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!(addr = %this.config.address(), error = %e, "Connect failed");
                this.begin_stop(Some(e));
                return;
            }
        };
        if this.config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "Failed to set TCP_NODELAY");
            }
        }
        *this.peer_addr.lock().unwrap_or_else(PoisonError::into_inner) = stream.peer_addr().ok();
        *this.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = stream.local_addr().ok();

        let transport: BoxTransport = Box::new(stream);
        let Some(handshake) = this.handshake.clone() else {
            Self::established(this, transport);
            return;
        };
        if !this
            .core
            .state()
            .transition(State::Connecting, State::Handshaking)
        {
            return;
        }
        let client = this.clone();
        let task = this.executor().spawn_then(
            async move {
                let mut transport = transport;
                let result = handshake.handshake(&mut transport, Role::Client).await;
                (transport, result)
            },
            move |(transport, result)| Self::handshaken(&client, transport, result),
        );
        this.pending.with(|pending| pending.connect = Some(task));
    }

    fn handshaken(this: &Arc<Self>, transport: BoxTransport, result: Result<()>) {
        this.pending.with(|pending| pending.connect = None);
        if this.core.state().load() != State::Handshaking {
            return;
        }
        match result {
            Ok(()) => {
                this.listeners.notify_handshake(this, None);
                Self::established(this, transport);
            }
            Err(e) => {
                warn!(error = %e, "Handshake failed");
                counter!("strandio.errors.handshake").increment(1);
                this.begin_stop(Some(e));
            }
        }
    }

    fn established(this: &Arc<Self>, transport: BoxTransport) {
        this.cancel_connect_timeout();
        this.core.socket().attach(transport);
        Self::arm_silence_timeout(this);
        if let Err(e) = Self::begin_read(this) {
            this.begin_stop(Some(e));
            return;
        }
        let from = this.core.state().transition_any(
            |state| matches!(state, State::Connecting | State::Handshaking),
            State::Started,
        );
        if from.is_none() {
            return;
        }

        this.pending.with(|pending| pending.attempts = 0);
        info!(peer = ?this.peer_addr(), "Client connected");
        this.listeners.notify_start(None);
        signal(&this.start_waiter, Ok(()));
        this.listeners.notify_connect(this);
    }

    fn should_reconnect(&self, was_connected: bool) -> bool {
        if !self.config.auto_reconnect || self.stop_requested.load(Ordering::Acquire) {
            return false;
        }
        was_connected || self.pending.with(|pending| pending.attempts > 0)
    }

    fn schedule_reconnect(this: &Arc<Self>) {
        let attempt = this.pending.with(|pending| {
            pending.attempts += 1;
            pending.attempts
        });
        if this
            .config
            .max_reconnect_attempts
            .is_some_and(|max| attempt > max)
        {
            warn!(attempts = attempt - 1, "Giving up reconnecting");
            this.pending.with(|pending| pending.attempts = 0);
            return;
        }

        let delay = this.config.reconnect_delay;
        info!(attempt, ?delay, "Reconnecting");
        counter!("strandio.client.reconnects").increment(1);
        let client = this.clone();
        let task = this.executor().post_after(delay, move || {
            client.pending.with(|pending| pending.reconnect = None);
            if client.stop_requested.load(Ordering::Acquire) {
                return;
            }
            if let Err(e) = client.begin_start() {
                debug!(error = %e, "Reconnect skipped");
            }
        });
        this.pending.with(|pending| pending.reconnect = Some(task));
    }
}

impl Shared for TcpClient {
    fn self_ref(&self) -> &SelfRef<Self> {
        self.core.self_ref()
    }
}

impl StrandBound for TcpClient {
    fn executor(&self) -> &Executor {
        self.core.executor()
    }
}

impl EventQueue for TcpClient {
    fn event_queue(&self) -> &OperationQueue<Self> {
        self.core.queue()
    }
}

impl Lifecycle for TcpClient {
    fn state(&self) -> &AtomicState {
        self.core.state()
    }

    fn on_start(this: &Arc<Self>) {
        if !this
            .core
            .state()
            .transition(State::Starting, State::Connecting)
        {
            return;
        }
        this.listeners.notify_init();
        Self::arm_connect_timeout(this);

        let address = this.config.address();
        debug!(%address, "Connecting");
        let client = this.clone();
        let task = this.executor().spawn_then(TcpStream::connect(address), move |result| {
            Self::connected(&client, result.map_err(Error::from))
        });
        this.pending.with(|pending| pending.connect = Some(task));
    }

    #[instrument(skip_all, fields(addr = %this.config.address(), interrupted = %interrupted))]
    fn on_stop(this: &Arc<Self>, interrupted: State, error: Option<Error>) {
        if let Some(task) = this.pending.with(|pending| pending.connect.take()) {
            task.abort();
        }
        if interrupted == State::Handshaking {
            let cause = error.clone().unwrap_or(Error::Aborted);
            this.listeners.notify_handshake(this, Some(&cause));
        }

        Self::teardown(this, interrupted, error.as_ref());

        let was_connected = interrupted == State::Started;
        if !was_connected {
            let cause = error.clone().unwrap_or(Error::Aborted);
            this.listeners.notify_start(Some(&cause));
            signal(&this.start_waiter, Err(cause));
        }
        this.listeners.notify_stop(error.as_ref());
        match &error {
            Some(e) => info!(error = %e, "Client stopped"),
            None => info!("Client stopped"),
        }

        if this.should_reconnect(was_connected) {
            Self::schedule_reconnect(this);
        } else {
            this.pending.with(|pending| pending.attempts = 0);
        }
    }
}

impl Connection for TcpClient {
    fn core(&self) -> &ConnectionCore<Self> {
        &self.core
    }

    fn listeners(&self) -> &ListenerRegistry<Self> {
        &self.listeners
    }

    fn on_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn on_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

impl fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpClient")
            .field("address", &self.config.address())
            .field("core", &self.core)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

fn signal(waiter: &Waiter, result: Result<()>) {
    if let Some(tx) = waiter.lock().unwrap_or_else(PoisonError::into_inner).take() {
        let _ = tx.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::net::TcpListener;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    #[traced_test]
    fn test_refused_connect_fails_start() {
        let client = TcpClient::new(ClientConfig::new("127.0.0.1", unused_port())).unwrap();
        let (tx, rx) = mpsc::channel();
        let events = Mutex::new(tx.clone());
        client.bind(Observer::start(move |error| {
            events.lock().unwrap().send(format!("start {}", error.is_some())).unwrap();
        }));
        let events = Mutex::new(tx);
        client.bind(Observer::stop(move |error| {
            events.lock().unwrap().send(format!("stop {}", error.is_some())).unwrap();
        }));

        let result = client.start();
        assert_eq!(
            result.err().and_then(|e| e.io_kind()),
            Some(io::ErrorKind::ConnectionRefused)
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "start true");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "stop true");
        assert!(!client.is_started());
        client.stop().unwrap();
    }

    #[test]
    fn test_abandoned_start_can_be_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = TcpClient::new(ClientConfig::new("127.0.0.1", port)).unwrap();

        // Claimed `Starting` with the event loop never brought up
        client.begin_start().unwrap();
        client.abandon_start();
        assert!(client.is_stopped());

        client.start().unwrap();
        assert!(client.is_started());
        client.stop().unwrap();
        assert!(client.is_stopped());
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let client = TcpClient::new(ClientConfig::new("127.0.0.1", 7)).unwrap();
        client.stop().unwrap();
        client.stop().unwrap();
        assert!(client.is_stopped());
    }

    #[test]
    fn test_send_requires_connection() {
        let client = TcpClient::new(ClientConfig::new("127.0.0.1", 7)).unwrap();
        assert!(matches!(client.send("early"), Err(Error::NotRunning)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(matches!(
            TcpClient::new(ClientConfig::default()),
            Err(Error::InvalidConfig(_))
        ));
    }
}
