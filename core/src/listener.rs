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

//! Typed event listeners
//!
//! A [`ListenerRegistry`] holds at most one observer per [`EventKind`]. The
//! observer's signature is fixed by its kind, so a mismatched callback is a
//! compile error rather than a runtime cast failure.

use crate::Error;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Kinds of user-visible events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Recv = 0,
    Connect = 1,
    Disconnect = 2,
    Accept = 3,
    Handshake = 4,
    Upgrade = 5,
    Init = 6,
    Start = 7,
    Stop = 8,
}

impl EventKind {
    /// Number of event kinds
    pub const COUNT: usize = 9;

    /// Every event kind, in slot order
    pub const ALL: [EventKind; Self::COUNT] = [
        Self::Recv,
        Self::Connect,
        Self::Disconnect,
        Self::Accept,
        Self::Handshake,
        Self::Upgrade,
        Self::Init,
        Self::Start,
        Self::Stop,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Recv => "recv",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Accept => "accept",
            Self::Handshake => "handshake",
            Self::Upgrade => "upgrade",
            Self::Init => "init",
            Self::Start => "start",
            Self::Stop => "stop",
        };
        f.write_str(name)
    }
}

type PlainFn = Arc<dyn Fn() + Send + Sync>;
type ConnFn<C> = Arc<dyn Fn(&Arc<C>) + Send + Sync>;
type ConnResultFn<C> = Arc<dyn Fn(&Arc<C>, Option<&Error>) + Send + Sync>;
type RecvFn<C> = Arc<dyn Fn(&Arc<C>, &[u8]) + Send + Sync>;
type ResultFn = Arc<dyn Fn(Option<&Error>) + Send + Sync>;

/// A user callback for one event kind
pub enum Observer<C> {
    Recv(RecvFn<C>),
    Connect(ConnFn<C>),
    Disconnect(ConnResultFn<C>),
    Accept(ConnFn<C>),
    Handshake(ConnResultFn<C>),
    Upgrade(ConnResultFn<C>),
    Init(PlainFn),
    Start(ResultFn),
    Stop(ResultFn),
}

impl<C> Observer<C> {
    pub fn recv(f: impl Fn(&Arc<C>, &[u8]) + Send + Sync + 'static) -> Self {
        Self::Recv(Arc::new(f))
    }

    pub fn connect(f: impl Fn(&Arc<C>) + Send + Sync + 'static) -> Self {
        Self::Connect(Arc::new(f))
    }

    pub fn disconnect(f: impl Fn(&Arc<C>, Option<&Error>) + Send + Sync + 'static) -> Self {
        Self::Disconnect(Arc::new(f))
    }

    pub fn accept(f: impl Fn(&Arc<C>) + Send + Sync + 'static) -> Self {
        Self::Accept(Arc::new(f))
    }

    pub fn handshake(f: impl Fn(&Arc<C>, Option<&Error>) + Send + Sync + 'static) -> Self {
        Self::Handshake(Arc::new(f))
    }

    pub fn upgrade(f: impl Fn(&Arc<C>, Option<&Error>) + Send + Sync + 'static) -> Self {
        Self::Upgrade(Arc::new(f))
    }

    pub fn init(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self::Init(Arc::new(f))
    }

    pub fn start(f: impl Fn(Option<&Error>) + Send + Sync + 'static) -> Self {
        Self::Start(Arc::new(f))
    }

    pub fn stop(f: impl Fn(Option<&Error>) + Send + Sync + 'static) -> Self {
        Self::Stop(Arc::new(f))
    }

    /// The event kind this observer handles
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Recv(_) => EventKind::Recv,
            Self::Connect(_) => EventKind::Connect,
            Self::Disconnect(_) => EventKind::Disconnect,
            Self::Accept(_) => EventKind::Accept,
            Self::Handshake(_) => EventKind::Handshake,
            Self::Upgrade(_) => EventKind::Upgrade,
            Self::Init(_) => EventKind::Init,
            Self::Start(_) => EventKind::Start,
            Self::Stop(_) => EventKind::Stop,
        }
    }
}

impl<C> Clone for Observer<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Recv(f) => Self::Recv(f.clone()),
            Self::Connect(f) => Self::Connect(f.clone()),
            Self::Disconnect(f) => Self::Disconnect(f.clone()),
            Self::Accept(f) => Self::Accept(f.clone()),
            Self::Handshake(f) => Self::Handshake(f.clone()),
            Self::Upgrade(f) => Self::Upgrade(f.clone()),
            Self::Init(f) => Self::Init(f.clone()),
            Self::Start(f) => Self::Start(f.clone()),
            Self::Stop(f) => Self::Stop(f.clone()),
        }
    }
}

impl<C> fmt::Debug for Observer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observer({})", self.kind())
    }
}

/// Table of observers indexed by event kind
pub struct ListenerRegistry<C> {
    slots: RwLock<[Option<Observer<C>>; EventKind::COUNT]>,
}

impl<C> ListenerRegistry<C> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Default::default()),
        }
    }

    /// Bind an observer to its kind's slot, returning the one it replaced
    pub fn bind(&self, observer: Observer<C>) -> Option<Observer<C>> {
        let index = observer.kind().index();
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots[index].replace(observer)
    }

    /// Remove the observer for `kind`
    pub fn unbind(&self, kind: EventKind) -> Option<Observer<C>> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots[kind.index()].take()
    }

    pub fn is_bound(&self, kind: EventKind) -> bool {
        self.get(kind).is_some()
    }

    /// Copy of the observer bound to `kind`
    pub fn get(&self, kind: EventKind) -> Option<Observer<C>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots[kind.index()].clone()
    }

    // Each notify clones the observer out so the table is unlocked while the
    // callback runs.

    pub fn notify_init(&self) {
        if let Some(Observer::Init(f)) = self.get(EventKind::Init) {
            f();
        }
    }

    pub fn notify_connect(&self, conn: &Arc<C>) {
        if let Some(Observer::Connect(f)) = self.get(EventKind::Connect) {
            f(conn);
        }
    }

    pub fn notify_accept(&self, conn: &Arc<C>) {
        if let Some(Observer::Accept(f)) = self.get(EventKind::Accept) {
            f(conn);
        }
    }

    pub fn notify_recv(&self, conn: &Arc<C>, data: &[u8]) {
        if let Some(Observer::Recv(f)) = self.get(EventKind::Recv) {
            f(conn, data);
        }
    }

    pub fn notify_disconnect(&self, conn: &Arc<C>, error: Option<&Error>) {
        if let Some(Observer::Disconnect(f)) = self.get(EventKind::Disconnect) {
            f(conn, error);
        }
    }

    pub fn notify_handshake(&self, conn: &Arc<C>, error: Option<&Error>) {
        if let Some(Observer::Handshake(f)) = self.get(EventKind::Handshake) {
            f(conn, error);
        }
    }

    pub fn notify_upgrade(&self, conn: &Arc<C>, error: Option<&Error>) {
        if let Some(Observer::Upgrade(f)) = self.get(EventKind::Upgrade) {
            f(conn, error);
        }
    }

    pub fn notify_start(&self, error: Option<&Error>) {
        if let Some(Observer::Start(f)) = self.get(EventKind::Start) {
            f(error);
        }
    }

    pub fn notify_stop(&self, error: Option<&Error>) {
        if let Some(Observer::Stop(f)) = self.get(EventKind::Stop) {
            f(error);
        }
    }
}

impl<C> Default for ListenerRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for ListenerRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound: Vec<EventKind> = EventKind::ALL
            .into_iter()
            .filter(|kind| self.is_bound(*kind))
            .collect();
        f.debug_struct("ListenerRegistry").field("bound", &bound).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Conn;

    #[test]
    fn test_unbound_is_noop() {
        let registry = ListenerRegistry::<Conn>::new();
        registry.notify_init();
        registry.notify_recv(&Arc::new(Conn), b"ignored");
        registry.notify_stop(None);
        assert!(!registry.is_bound(EventKind::Recv));
    }

    #[test]
    fn test_last_bind_wins() {
        let registry = ListenerRegistry::<Conn>::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let first = hits.clone();
        assert!(registry.bind(Observer::init(move || first.lock().unwrap().push(1))).is_none());
        let second = hits.clone();
        let replaced = registry.bind(Observer::init(move || second.lock().unwrap().push(2)));
        assert_eq!(replaced.map(|o| o.kind()), Some(EventKind::Init));

        registry.notify_init();
        assert_eq!(*hits.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_recv_receives_payload() {
        let registry = ListenerRegistry::<Conn>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry.bind(Observer::recv(move |_, data| sink.lock().unwrap().extend_from_slice(data)));

        let conn = Arc::new(Conn);
        registry.notify_recv(&conn, b"hello ");
        registry.notify_recv(&conn, b"world");
        assert_eq!(&*seen.lock().unwrap(), b"hello world");
    }

    #[test]
    fn test_error_is_forwarded() {
        let registry = ListenerRegistry::<Conn>::new();
        let timeouts = Arc::new(AtomicUsize::new(0));
        let counter = timeouts.clone();
        registry.bind(Observer::disconnect(move |_, error| {
            if error.is_some_and(Error::is_timeout) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let conn = Arc::new(Conn);
        registry.notify_disconnect(&conn, Some(&Error::TimedOut));
        registry.notify_disconnect(&conn, None);
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_rebind() {
        let registry = Arc::new(ListenerRegistry::<Conn>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let inner = registry.clone();
        let counter = calls.clone();
        registry.bind(Observer::stop(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner.unbind(EventKind::Stop);
        }));

        registry.notify_stop(None);
        registry.notify_stop(None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!registry.is_bound(EventKind::Stop));
    }
}
