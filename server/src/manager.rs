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

//! Session registry
//!
//! The manager owns a strong reference to every live session; a session
//! removes itself during teardown, which is what finally lets it drop.

use crate::{SessionId, SessionInfo, TcpSession};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use strandio_core::Error;
use tokio::sync::Notify;
use tracing::trace;

/// Outcome of a broadcast
#[derive(Debug, Default)]
pub struct BroadcastResult {
    /// Sessions the payload was offered to
    pub total: usize,
    /// Sessions that queued the payload
    pub succeeded: usize,
    /// Sessions that refused it
    pub failed: usize,
    pub errors: Vec<(SessionId, Error)>,
}

impl BroadcastResult {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.succeeded as f64 / self.total as f64) * 100.0
        }
    }
}

/// Registry of live sessions
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<TcpSession>>,
    drained: Notify,
}

impl SessionManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, session: Arc<TcpSession>) {
        self.sessions.insert(session.id(), session);
    }

    pub(crate) fn remove(&self, id: SessionId) -> Option<Arc<TcpSession>> {
        let removed = self.sessions.remove(&id).map(|(_, session)| session);
        if removed.is_some() {
            trace!(session_id = %id, remaining = self.sessions.len(), "Session removed");
        }
        if self.sessions.is_empty() {
            self.drained.notify_waiters();
        }
        removed
    }

    /// Resolves once no session is left
    pub(crate) async fn wait_empty(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.sessions.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Number of live sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn find(&self, id: SessionId) -> Option<Arc<TcpSession>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// First session matching `predicate`
    pub fn find_if(&self, predicate: impl Fn(&TcpSession) -> bool) -> Option<Arc<TcpSession>> {
        self.sessions
            .iter()
            .find(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn infos(&self) -> Vec<SessionInfo> {
        self.snapshot().iter().map(|session| session.info()).collect()
    }

    /// Call `f` for every live session
    ///
    /// Runs over a snapshot, so `f` may stop sessions.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<TcpSession>)) {
        for session in self.snapshot() {
            f(&session);
        }
    }

    /// Queue `data` on every started session
    pub fn broadcast(&self, data: impl Into<Bytes>) -> BroadcastResult {
        let data = data.into();
        let mut result = BroadcastResult::default();
        for session in self.snapshot() {
            result.total += 1;
            match session.send(data.clone()) {
                Ok(()) => result.succeeded += 1,
                Err(e) => {
                    result.failed += 1;
                    result.errors.push((session.id(), e));
                }
            }
        }
        result
    }

    /// Ask every session to stop without waiting
    pub(crate) fn stop_all(&self) {
        self.for_each(|session| session.stop());
    }

    /// Forget every session, returning how many were dropped
    pub(crate) fn clear(&self) -> usize {
        let dropped = self.sessions.len();
        self.sessions.clear();
        self.drained.notify_waiters();
        dropped
    }

    fn snapshot(&self) -> Vec<Arc<TcpSession>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }
}
