//! Command channels.
//!
//! A channel is one remote command's stdin/stdout pair, split into a
//! [`ChannelWriter`], a [`ChannelReader`] and a [`ChannelCloser`] with
//! independent lifetimes. Closing wakes any task blocked on the reader or
//! writer; from then on both fail with `BrokenPipe`. Dropping the last of
//! the three closes the channel too.

use std::collections::HashMap;
use std::io;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll, Waker};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use crate::connector::{BoxedReader, BoxedWriter, CommandHandle};
use crate::error::{TransportError, TransportResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "channel closed")
}

pub(crate) struct ChannelState {
    id: u64,
    closed: AtomicBool,
    read_waker: Mutex<Option<Waker>>,
    write_waker: Mutex<Option<Waker>>,
    handle: Mutex<Option<Box<dyn CommandHandle>>>,
    registry: Weak<ChannelRegistry>,
}

impl ChannelState {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Store the waker before the caller checks `closed`, so a concurrent
    /// close either sees this waker or is seen by the check.
    fn register(slot: &Mutex<Option<Waker>>, waker: &Waker) {
        let mut slot = lock(slot);
        match slot.as_ref() {
            Some(existing) if existing.will_wake(waker) => {}
            _ => *slot = Some(waker.clone()),
        }
    }

    pub(crate) fn attach(&self, mut handle: Box<dyn CommandHandle>) {
        let mut slot = lock(&self.handle);
        if self.is_closed() {
            handle.terminate();
        } else {
            *slot = Some(handle);
        }
    }

    /// Close the channel. Returns `false` if it was already closed.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        for slot in [&self.read_waker, &self.write_waker] {
            if let Some(waker) = lock(slot).take() {
                waker.wake();
            }
        }
        if let Some(mut handle) = lock(&self.handle).take() {
            handle.terminate();
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
        debug!(channel = self.id, "channel closed");
        true
    }
}

/// Owning reference to a reserved channel. The channel is closed when the
/// guard is dropped, so a channel never outlives every handle to it.
pub(crate) struct ChannelGuard(Arc<ChannelState>);

impl Deref for ChannelGuard {
    type Target = ChannelState;

    fn deref(&self) -> &ChannelState {
        &self.0
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        if self.0.close() {
            debug!(channel = self.0.id, "channel dropped without close");
        }
    }
}

/// Open channels of one session.
#[derive(Default)]
pub(crate) struct ChannelRegistry {
    channels: Mutex<HashMap<u64, Arc<ChannelState>>>,
    next_id: AtomicU64,
}

impl ChannelRegistry {
    /// Register a new channel. Fails with `ChannelBusy` when the connection
    /// cannot multiplex and another channel is open.
    pub(crate) fn reserve(self: &Arc<Self>, multiplexing: bool) -> TransportResult<ChannelGuard> {
        let mut channels = lock(&self.channels);
        if !multiplexing && !channels.is_empty() {
            return Err(TransportError::ChannelBusy);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(ChannelState {
            id,
            closed: AtomicBool::new(false),
            read_waker: Mutex::new(None),
            write_waker: Mutex::new(None),
            handle: Mutex::new(None),
            registry: Arc::downgrade(self),
        });
        channels.insert(id, Arc::clone(&state));
        Ok(ChannelGuard(state))
    }

    fn remove(&self, id: u64) {
        lock(&self.channels).remove(&id);
    }

    /// Take every open channel out of the registry.
    pub(crate) fn drain(&self) -> Vec<Arc<ChannelState>> {
        lock(&self.channels).drain().map(|(_, state)| state).collect()
    }

    pub(crate) fn open_count(&self) -> usize {
        lock(&self.channels).len()
    }
}

/// Read half of a channel: the remote command's stdout.
pub struct ChannelReader {
    inner: BoxedReader,
    state: Arc<ChannelGuard>,
}

/// Write half of a channel: the remote command's stdin.
///
/// Shutting the writer down sends end-of-file to the remote command without
/// closing the channel.
pub struct ChannelWriter {
    inner: BoxedWriter,
    state: Arc<ChannelGuard>,
}

/// Closes a channel from any task.
#[derive(Clone)]
pub struct ChannelCloser {
    state: Arc<ChannelGuard>,
}

pub(crate) fn split(
    guard: ChannelGuard,
    stdin: BoxedWriter,
    stdout: BoxedReader,
) -> (ChannelWriter, ChannelReader, ChannelCloser) {
    let state = Arc::new(guard);
    (
        ChannelWriter {
            inner: stdin,
            state: Arc::clone(&state),
        },
        ChannelReader {
            inner: stdout,
            state: Arc::clone(&state),
        },
        ChannelCloser { state },
    )
}

impl ChannelCloser {
    /// Close the channel and stop the remote command. Idempotent.
    pub fn close(&self) {
        self.state.close();
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        ChannelState::register(&this.state.read_waker, cx.waker());
        if this.state.is_closed() {
            return Poll::Ready(Err(closed_error()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        ChannelState::register(&this.state.write_waker, cx.waker());
        if this.state.is_closed() {
            return Poll::Ready(Err(closed_error()));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        ChannelState::register(&this.state.write_waker, cx.waker());
        if this.state.is_closed() {
            return Poll::Ready(Err(closed_error()));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.state.is_closed() {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

impl std::fmt::Debug for ChannelReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelReader").field("channel", &self.state.id).finish()
    }
}

impl std::fmt::Debug for ChannelWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelWriter").field("channel", &self.state.id).finish()
    }
}

impl std::fmt::Debug for ChannelCloser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCloser")
            .field("channel", &self.state.id)
            .field("closed", &self.state.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Flag(Arc<AtomicBool>);

    impl CommandHandle for Flag {
        fn terminate(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn open(registry: &Arc<ChannelRegistry>) -> (ChannelWriter, ChannelReader, ChannelCloser, tokio::io::DuplexStream) {
        let state = registry.reserve(true).unwrap();
        let (local, remote) = tokio::io::duplex(64);
        let (stdout, stdin) = tokio::io::split(local);
        let (w, r, c) = split(state, Box::new(stdin), Box::new(stdout));
        (w, r, c, remote)
    }

    #[tokio::test]
    async fn data_flows_both_ways() {
        let registry = Arc::new(ChannelRegistry::default());
        let (mut writer, mut reader, _closer, mut remote) = open(&registry);

        writer.write_all(b"want").await.unwrap();
        let mut got = [0u8; 4];
        remote.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"want");

        remote.write_all(b"pack").await.unwrap();
        reader.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"pack");
    }

    #[tokio::test]
    async fn close_wakes_blocked_reader() {
        let registry = Arc::new(ChannelRegistry::default());
        let (_writer, mut reader, closer, _remote) = open(&registry);

        let blocked = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            reader.read(&mut buf).await
        });
        tokio::task::yield_now().await;
        closer.close();

        let err = blocked.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(registry.open_count(), 0);
    }

    #[tokio::test]
    async fn writes_after_close_fail() {
        let registry = Arc::new(ChannelRegistry::default());
        let (mut writer, _reader, closer, _remote) = open(&registry);
        closer.close();
        let err = writer.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        writer.shutdown().await.unwrap();
    }

    #[test]
    fn close_is_idempotent_and_terminates_once_attached() {
        let registry = Arc::new(ChannelRegistry::default());
        let state = registry.reserve(true).unwrap();
        let terminated = Arc::new(AtomicBool::new(false));
        state.attach(Box::new(Flag(Arc::clone(&terminated))));

        assert!(state.close());
        assert!(terminated.load(Ordering::SeqCst));
        assert!(!state.close());
    }

    #[test]
    fn attach_after_close_terminates_immediately() {
        let registry = Arc::new(ChannelRegistry::default());
        let state = registry.reserve(true).unwrap();
        state.close();
        let terminated = Arc::new(AtomicBool::new(false));
        state.attach(Box::new(Flag(Arc::clone(&terminated))));
        assert!(terminated.load(Ordering::SeqCst));
    }

    #[test]
    fn single_channel_registry_refuses_second() {
        let registry = Arc::new(ChannelRegistry::default());
        let first = registry.reserve(false).unwrap();
        assert!(matches!(registry.reserve(false), Err(TransportError::ChannelBusy)));
        first.close();
        assert!(registry.reserve(false).is_ok());
    }

    #[tokio::test]
    async fn dropping_every_half_closes_the_channel() {
        let registry = Arc::new(ChannelRegistry::default());
        let state = registry.reserve(false).unwrap();
        let terminated = Arc::new(AtomicBool::new(false));
        state.attach(Box::new(Flag(Arc::clone(&terminated))));
        let (local, _remote) = tokio::io::duplex(64);
        let (stdout, stdin) = tokio::io::split(local);
        let (writer, reader, closer) = split(state, Box::new(stdin), Box::new(stdout));

        drop(writer);
        drop(closer);
        assert_eq!(registry.open_count(), 1);
        assert!(!terminated.load(Ordering::SeqCst));

        drop(reader);
        assert_eq!(registry.open_count(), 0);
        assert!(terminated.load(Ordering::SeqCst));
        assert!(registry.reserve(false).is_ok());
    }
}
