//! In-process link.
//!
//! Two bounded byte pipes joined back to back. A write that does not fit
//! is short, exactly like a full socket buffer, which makes the pair useful
//! for the local loopback node and for exercising partial-write handling.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use super::{BoxFuture, Link};

#[derive(Debug)]
struct Pipe {
    data: VecDeque<u8>,
    capacity: usize,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    pipe: Mutex<Pipe>,
    space: Notify,
}

impl Shared {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            pipe: Mutex::new(Pipe {
                data: VecDeque::new(),
                capacity,
                closed: false,
            }),
            space: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Pipe> {
        self.pipe.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn close(&self) {
        self.lock().closed = true;
        self.space.notify_one();
    }
}

/// One end of an in-process link.
#[derive(Debug)]
pub struct MemoryLink {
    rx: Arc<Shared>,
    tx: Arc<Shared>,
    label: String,
}

impl MemoryLink {
    /// Create a connected pair. Each direction buffers at most `capacity`
    /// bytes.
    pub fn pair(capacity: usize) -> (MemoryLink, MemoryLink) {
        let a_to_b = Shared::new(capacity);
        let b_to_a = Shared::new(capacity);
        (
            MemoryLink {
                rx: b_to_a.clone(),
                tx: a_to_b.clone(),
                label: "memory:a".to_string(),
            },
            MemoryLink {
                rx: a_to_b,
                tx: b_to_a,
                label: "memory:b".to_string(),
            },
        )
    }

    /// Bytes written by this end that the peer has not read yet.
    pub fn unread_by_peer(&self) -> usize {
        self.tx.lock().data.len()
    }

    /// Change how many bytes the outgoing direction accepts.
    pub fn set_capacity(&self, capacity: usize) {
        self.tx.lock().capacity = capacity;
        self.tx.space.notify_one();
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.tx.close();
        self.rx.close();
    }
}

impl Link for MemoryLink {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.rx.lock();
        if pipe.data.is_empty() {
            return if pipe.closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }

        let n = buf.len().min(pipe.data.len());
        for (dst, src) in buf.iter_mut().zip(pipe.data.drain(..n)) {
            *dst = src;
        }
        drop(pipe);
        self.rx.space.notify_one();
        Ok(n)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.tx.lock();
        if pipe.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }

        let space = pipe.capacity.saturating_sub(pipe.data.len());
        if space == 0 && !buf.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(space);
        pipe.data.extend(&buf[..n]);
        Ok(n)
    }

    fn writable(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            loop {
                {
                    let pipe = self.tx.lock();
                    if pipe.closed || pipe.data.len() < pipe.capacity {
                        return Ok(());
                    }
                }
                self.tx.space.notified().await;
            }
        })
    }

    fn peer(&self) -> String {
        self.label.clone()
    }
}
