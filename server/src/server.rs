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

//! TCP server
//!
//! The server owns an [`ExecutorPool`]. One executor of the pool runs the
//! acceptor; every accepted socket is handed to the next executor in
//! round-robin order and wrapped in a [`TcpSession`].
//!
//! ```text
//!            ┌──────────── TcpServer (acceptor strand) ────────────┐
//!            │  accept loop ──► TcpSession ──► pool.acquire()      │
//!            └─────────────────────────────────────────────────────┘
//!                 │                  │                  │
//!            executor 1         executor 2   ...   executor N
//! ```

use crate::{ServerConfig, ServerMetrics, SessionId, SessionManager, TcpSession};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use strandio_core::{
    AtomicState, Error, Executor, ExecutorPool, Handshake, Lifecycle, ListenerRegistry, Observer,
    Result, SelfRef, Shared, State, StrandBound, StrandCell, contract, is_resource_exhausted,
};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// State shared between the server and its sessions
pub(crate) struct ServerShared {
    pub(crate) config: ServerConfig,
    pub(crate) listeners: ListenerRegistry<TcpSession>,
    pub(crate) sessions: SessionManager,
    pub(crate) metrics: ServerMetrics,
    pub(crate) handshake: Option<Arc<dyn Handshake>>,
}

type Waiter = Mutex<Option<mpsc::Sender<Result<()>>>>;

/// The running accept loop
struct Acceptor {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// A multi-threaded TCP server
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use strandio_server::{Observer, ServerConfig, TcpServer, TcpSession};
///
/// let server = TcpServer::new(ServerConfig::new("127.0.0.1:7000".parse().unwrap())).unwrap();
/// server.bind(Observer::recv(|session: &Arc<TcpSession>, data| {
///     let _ = session.send(data.to_vec());
/// }));
/// server.start().unwrap();
/// // ...
/// server.stop().unwrap();
/// ```
///
/// The accept loop only holds a weak reference, but sessions keep running
/// until [`stop`](Self::stop) is called.
pub struct TcpServer {
    self_ref: SelfRef<TcpServer>,
    pool: ExecutorPool,
    executor: Executor,
    state: AtomicState,
    shared: Arc<ServerShared>,
    acceptor: StrandCell<Option<Acceptor>>,
    local_addr: Mutex<Option<SocketAddr>>,
    next_session_id: AtomicU64,
    start_waiter: Waiter,
    stop_waiter: Waiter,
}

impl TcpServer {
    /// Create a server without a handshake
    pub fn new(config: ServerConfig) -> Result<Arc<Self>> {
        Self::build(config, None)
    }

    /// Create a server that runs `handshake` on every accepted socket
    pub fn with_handshake(
        config: ServerConfig,
        handshake: Arc<dyn Handshake>,
    ) -> Result<Arc<Self>> {
        Self::build(config, Some(handshake))
    }

    fn build(config: ServerConfig, handshake: Option<Arc<dyn Handshake>>) -> Result<Arc<Self>> {
        config.validate()?;
        let pool = ExecutorPool::new(config.pool_size)?;
        let executor = pool.acquire();
        let shared = Arc::new(ServerShared {
            config,
            listeners: ListenerRegistry::new(),
            sessions: SessionManager::new(),
            metrics: ServerMetrics::new(),
            handshake,
        });
        Ok(Arc::new_cyclic(|weak| Self {
            self_ref: SelfRef::new(weak),
            acceptor: StrandCell::new(&executor, None),
            pool,
            executor,
            state: AtomicState::default(),
            shared,
            local_addr: Mutex::new(None),
            next_session_id: AtomicU64::new(1),
            start_waiter: Mutex::new(None),
            stop_waiter: Mutex::new(None),
        }))
    }

    /// Bind an observer for session and server events
    ///
    /// Returns the observer previously bound to the same event kind.
    pub fn bind(&self, observer: Observer<TcpSession>) -> Option<Observer<TcpSession>> {
        self.shared.listeners.bind(observer)
    }

    pub fn listeners(&self) -> &ListenerRegistry<TcpSession> {
        &self.shared.listeners
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.shared.sessions
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.shared.metrics
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Number of event loops, the acceptor's included
    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Address the listener is bound to while the server runs
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_started(&self) -> bool {
        Lifecycle::is_started(self)
    }

    /// Run the pool, bind the listener and start accepting
    ///
    /// Blocks until the listener is bound or binding failed. Must not be
    /// called from one of the server's own threads.
    #[instrument(skip_all, fields(addr = %self.shared.config.bind_address))]
    pub fn start(&self) -> Result<()> {
        if self.pool.running_in_pool_thread() {
            contract!(false, "TcpServer::start called from one of its own threads");
            return Err(Error::WouldDeadlock);
        }

        let (tx, rx) = mpsc::channel();
        *self.start_waiter.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        if let Err(e) = self.begin_start() {
            self.start_waiter.lock().unwrap_or_else(PoisonError::into_inner).take();
            return Err(e);
        }
        if let Err(e) = self.pool.run() {
            self.start_waiter.lock().unwrap_or_else(PoisonError::into_inner).take();
            self.state.store(State::Stopped);
            return Err(e);
        }

        let result = rx.recv().unwrap_or(Err(Error::Aborted));
        if result.is_err() {
            self.pool.stop()?;
        }
        result
    }

    /// Stop accepting, stop every session and shut the pool down
    ///
    /// Blocks until the sessions are gone or the shutdown timeout elapsed.
    /// Must not be called from one of the server's own threads; a session
    /// callback that wants the server gone should hand the request to
    /// another thread.
    #[instrument(skip_all)]
    pub fn stop(&self) -> Result<()> {
        if self.pool.running_in_pool_thread() {
            contract!(false, "TcpServer::stop called from one of its own threads");
            return Err(Error::WouldDeadlock);
        }
        let Some(this) = self.selfptr() else {
            return Ok(());
        };
        if !self.pool.is_running() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel();
        *self.stop_waiter.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        self.executor.post(move || match this.state.begin_stop() {
            Some(interrupted) => Self::on_stop(&this, interrupted, None),
            None => signal(&this.stop_waiter, Ok(())),
        });

        let result = rx.recv().unwrap_or(Ok(()));
        self.pool.stop()?;
        result
    }

    /// Hand an accepted socket to a fresh session
    fn admit(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let max_connections = self.shared.config.max_connections;
        if self.shared.sessions.count() >= max_connections {
            warn!(peer = %peer_addr, max_connections, "Session limit reached, dropping connection");
            self.shared.metrics.session_rejected();
            return;
        }

        let executor = self.pool.acquire();
        let stream = match rebind(stream, &executor) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "Failed to move accepted socket");
                self.shared.metrics.accept_error();
                return;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let id = SessionId::new(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        let local_addr = stream.local_addr().ok();
        let session = TcpSession::new(executor, id, peer_addr, local_addr, self.shared.clone());
        self.shared.sessions.insert(session.clone());
        debug!(session_id = %id, peer = %peer_addr, "Connection accepted");

        if let Err(e) = TcpSession::start(&session, Box::new(stream)) {
            warn!(session_id = %id, error = %e, "Failed to start session");
            self.shared.sessions.remove(id);
        }
    }

    fn finish_stop(this: &Arc<Self>, error: Option<Error>) {
        *this.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = None;
        this.state.store(State::Stopped);
        this.shared.listeners.notify_stop(error.as_ref());
        info!("Server stopped");
        signal(&this.stop_waiter, Ok(()));
    }
}

impl Shared for TcpServer {
    fn self_ref(&self) -> &SelfRef<Self> {
        &self.self_ref
    }
}

impl StrandBound for TcpServer {
    fn executor(&self) -> &Executor {
        &self.executor
    }
}

impl Lifecycle for TcpServer {
    fn state(&self) -> &AtomicState {
        &self.state
    }

    fn on_start(this: &Arc<Self>) {
        if this.state.load() != State::Starting {
            return;
        }
        let config = &this.shared.config;
        let listener = match bind_listener(config.bind_address, config.backlog) {
            Ok(listener) => listener,
            Err(e) => {
                let e = Error::from(e);
                error!(addr = %config.bind_address, error = %e, "Failed to bind listener");
                this.state.store(State::Stopped);
                this.shared.listeners.notify_start(Some(&e));
                this.shared.listeners.notify_stop(Some(&e));
                signal(&this.start_waiter, Err(e));
                return;
            }
        };

        let local_addr = listener.local_addr().ok();
        *this.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = local_addr;

        let token = CancellationToken::new();
        this.state.store(State::Started);
        // The accept task shares this thread, so it cannot run before the
        // start notification below.
        let task = this
            .executor
            .spawn(accept_loop(Arc::downgrade(this), listener, token.clone()));
        this.acceptor.with(|slot| *slot = Some(Acceptor { token, task }));

        info!(addr = ?local_addr, pool_size = this.pool.size(), "Server started");
        this.shared.listeners.notify_start(None);
        signal(&this.start_waiter, Ok(()));
    }

    fn on_stop(this: &Arc<Self>, interrupted: State, error: Option<Error>) {
        let acceptor = this.acceptor.with(Option::take);
        if let Some(acceptor) = &acceptor {
            acceptor.token.cancel();
        }
        debug!(
            %interrupted,
            sessions = this.shared.sessions.count(),
            "Stopping sessions"
        );
        this.shared.sessions.stop_all();

        let shared = this.shared.clone();
        let timeout = shared.config.shutdown_timeout;
        let server = this.clone();
        this.executor.spawn_then(
            async move {
                // The listener closes when the accept loop returns
                if let Some(acceptor) = acceptor {
                    let _ = acceptor.task.await;
                }
                tokio::time::timeout(timeout, shared.sessions.wait_empty())
                    .await
                    .is_ok()
            },
            move |drained| {
                if !drained {
                    warn!(
                        remaining = server.shared.sessions.count(),
                        "Shutdown timeout elapsed with sessions still running"
                    );
                    server.shared.sessions.clear();
                }
                Self::finish_stop(&server, error);
            },
        );
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        // Sessions hold the shared state, which holds the sessions
        let abandoned = self.shared.sessions.clear();
        if abandoned > 0 {
            debug!(abandoned, "Server dropped with live sessions");
        }
    }
}

impl fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpServer")
            .field("state", &self.state)
            .field("local_addr", &self.local_addr())
            .field("pool", &self.pool)
            .field("sessions", &self.shared.sessions.count())
            .finish_non_exhaustive()
    }
}

fn signal(waiter: &Waiter, result: Result<()>) {
    if let Some(tx) = waiter.lock().unwrap_or_else(PoisonError::into_inner).take() {
        let _ = tx.send(result);
    }
}

fn bind_listener(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// Re-register an accepted socket with the event loop of `executor`
fn rebind(stream: TcpStream, executor: &Executor) -> io::Result<TcpStream> {
    let stream = stream.into_std()?;
    let _context = executor.handle().enter();
    TcpStream::from_std(stream)
}

async fn accept_loop(server: Weak<TcpServer>, listener: TcpListener, token: CancellationToken) {
    trace!("Accept loop started");
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let Some(server) = server.upgrade() else {
            break;
        };
        match accepted {
            Ok((stream, peer_addr)) => server.admit(stream, peer_addr),
            Err(e) => {
                server.shared.metrics.accept_error();
                if is_resource_exhausted(&e) {
                    warn!(error = %e, "Out of file descriptors, pausing accept");
                } else {
                    warn!(error = %e, "Accept failed");
                }
                let backoff = server.shared.config.accept_backoff;
                drop(server);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
    trace!("Accept loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener as StdListener;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn local_config() -> ServerConfig {
        ServerConfig::default()
            .with_pool_size(2)
            .with_shutdown_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_start_stop_restart() {
        let server = TcpServer::new(local_config()).unwrap();
        let (tx, rx) = mpsc::channel();
        let events = Mutex::new(tx.clone());
        server.bind(Observer::start(move |error| {
            events.lock().unwrap().send(format!("start {}", error.is_some())).unwrap();
        }));
        let events = Mutex::new(tx);
        server.bind(Observer::stop(move |error| {
            events.lock().unwrap().send(format!("stop {}", error.is_some())).unwrap();
        }));

        server.start().unwrap();
        assert!(server.is_started());
        assert!(server.local_addr().is_some_and(|addr| addr.port() != 0));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "start false");
        assert!(matches!(server.start(), Err(Error::AlreadyRunning)));

        server.stop().unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "stop false");
        assert!(server.local_addr().is_none());
        server.stop().unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        server.start().unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "start false");
        server.stop().unwrap();
    }

    #[test]
    #[traced_test]
    fn test_bind_failure_is_reported() {
        let occupied = StdListener::bind("127.0.0.1:0").unwrap();
        let config = local_config().with_pool_size(1);
        let config = ServerConfig {
            bind_address: occupied.local_addr().unwrap(),
            ..config
        };
        let server = TcpServer::new(config).unwrap();
        let (tx, rx) = mpsc::channel();
        let events = Mutex::new(tx);
        server.bind(Observer::start(move |error| {
            events.lock().unwrap().send(error.cloned()).unwrap();
        }));

        let result = server.start();
        assert!(matches!(result, Err(Error::Io(_))));
        let reported = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            reported.and_then(|e| e.io_kind()),
            Some(io::ErrorKind::AddrInUse)
        );
        assert!(!server.is_started());
        assert!(!server.pool.is_running());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = local_config().with_max_connections(0);
        assert!(matches!(TcpServer::new(config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let server = TcpServer::new(local_config()).unwrap();
        server.stop().unwrap();
        assert!(!server.is_started());
    }
}
