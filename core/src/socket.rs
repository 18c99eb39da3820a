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

//! Transport seam and socket component
//!
//! A [`SocketComponent`] splits a connected transport into a read half,
//! owned by a read loop task, and a write half that is lent to one write at a
//! time. Every read completion and write completion is delivered on the
//! owner's strand.

use crate::{Error, EventQueue, Executor, OpSlot, Result, StrandBound, StrandCell};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use metrics::counter;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

/// Default size of the read buffer
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8192;

/// A connected byte stream
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    fn peer_addr(&self) -> io::Result<SocketAddr>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Transport for TcpStream {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }
}

/// Type-erased transport
pub type BoxTransport = Box<dyn Transport>;

/// Side of the connection running a handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Protocol exchange run on a fresh transport before it is started
///
/// The handshake has exclusive use of the stream and runs under the
/// connection's connect timeout.
#[async_trait]
pub trait Handshake: Send + Sync + 'static {
    async fn handshake(&self, stream: &mut BoxTransport, role: Role) -> Result<()>;
}

/// Read loop and write half of one connection
pub struct SocketComponent {
    inner: Arc<SocketInner>,
}

struct SocketInner {
    executor: Executor,
    open: AtomicBool,
    io: StrandCell<SocketIo>,
}

#[derive(Default)]
struct SocketIo {
    reader: Option<ReadHalf<BoxTransport>>,
    writer: Option<WriteHalf<BoxTransport>>,
    read_task: Option<AbortHandle>,
    write_task: Option<AbortHandle>,
}

impl SocketComponent {
    pub fn new(executor: &Executor) -> Self {
        Self {
            inner: Arc::new(SocketInner {
                executor: executor.clone(),
                open: AtomicBool::new(false),
                io: StrandCell::new(executor, SocketIo::default()),
            }),
        }
    }

    /// Check whether a transport is attached and not yet closed
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Take ownership of a connected transport
    ///
    /// Any previous transport is closed first. Must be called on the owner's
    /// strand.
    pub fn attach(&self, transport: BoxTransport) {
        self.close();
        let (reader, writer) = tokio::io::split(transport);
        self.inner.io.with(|io| {
            io.reader = Some(reader);
            io.writer = Some(writer);
        });
        self.inner.open.store(true, Ordering::Release);
    }

    /// Start the read loop
    ///
    /// Each chunk is handed to `on_data` on the strand; the next read is not
    /// issued until that call returns. End of stream or a read error is
    /// handed to `on_fault` once and ends the loop. The loop holds a strong
    /// reference to `owner` until it ends or the socket is closed. Must be
    /// called on the owner's strand.
    pub fn begin_read<C, D, E>(
        &self,
        owner: &Arc<C>,
        buffer_size: usize,
        on_data: D,
        on_fault: E,
    ) -> Result<()>
    where
        C: StrandBound,
        D: Fn(&Arc<C>, &[u8]) + Send + Sync + 'static,
        E: FnOnce(&Arc<C>, Error) + Send + 'static,
    {
        let Some(mut reader) = self.inner.io.with(|io| io.reader.take()) else {
            return Err(Error::Closed);
        };
        let executor = owner.executor().clone();
        let strand = executor.clone();
        let owner = owner.clone();
        let on_data = Arc::new(on_data);
        let buffer_size = buffer_size.max(1);

        let task = executor.spawn(async move {
            let mut buffer = BytesMut::with_capacity(buffer_size);
            let fault = loop {
                buffer.reserve(buffer_size);
                match reader.read_buf(&mut buffer).await {
                    Ok(0) => break Error::Eof,
                    Ok(n) => {
                        trace!(bytes = n, "Read completed");
                        counter!("strandio.bytes.received").increment(n as u64);
                        let chunk = buffer.split().freeze();
                        let (ack, acked) = oneshot::channel();
                        let conn = owner.clone();
                        let handler = on_data.clone();
                        strand.post(move || {
                            handler(&conn, &chunk);
                            let _ = ack.send(());
                        });
                        if acked.await.is_err() {
                            break Error::Aborted;
                        }
                    }
                    Err(e) => break Error::from(e),
                }
            };
            debug!(error = %fault, "Read loop ended");
            strand.post(move || on_fault(&owner, fault));
        });
        self.inner.io.with(|io| io.read_task = Some(task.abort_handle()));
        Ok(())
    }

    /// Write `data` in full, then report on the strand
    ///
    /// The write half is lent to this write and returned when it completes,
    /// so the caller must hold the queue's slot; it is released after
    /// `on_done` returns. Must be called on the owner's strand.
    pub fn write<C, F>(&self, slot: OpSlot<C>, data: Bytes, on_done: F)
    where
        C: EventQueue,
        F: FnOnce(&Arc<C>, Result<usize>) + Send + 'static,
    {
        let owner = slot.owner().clone();
        let Some(mut writer) = self.inner.io.with(|io| io.writer.take()) else {
            on_done(&owner, Err(Error::Closed));
            drop(slot);
            return;
        };

        let inner = self.inner.clone();
        let task = owner.executor().spawn_then(
            async move {
                let result = writer.write_all(&data).await.map(|()| data.len());
                (writer, result)
            },
            move |(writer, result)| {
                let result = result.map_err(Error::from);
                if inner.open.load(Ordering::Acquire) {
                    inner.io.with(|io| {
                        io.writer = Some(writer);
                        io.write_task = None;
                    });
                }
                if let Ok(n) = result {
                    counter!("strandio.bytes.sent").increment(n as u64);
                }
                let conn = slot.owner().clone();
                on_done(&conn, result);
                drop(slot);
            },
        );
        self.inner.io.with(|io| io.write_task = Some(task));
    }

    /// Close the transport
    ///
    /// Stops the read loop and any write in flight, then shuts the write
    /// direction down in the background. Returns `false` if the socket was
    /// not open. Must be called on the owner's strand.
    pub fn close(&self) -> bool {
        let was_open = self.inner.open.swap(false, Ordering::AcqRel);
        let io = self.inner.io.with(std::mem::take);
        if let Some(task) = io.read_task {
            task.abort();
        }
        if let Some(task) = io.write_task {
            task.abort();
        }
        drop(io.reader);
        if let Some(mut writer) = io.writer {
            self.inner.executor.spawn(async move {
                let _ = writer.shutdown().await;
            });
        }
        was_open
    }
}

impl fmt::Debug for SocketComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketComponent")
            .field("open", &self.is_open())
            .finish()
    }
}
