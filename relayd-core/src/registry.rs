//! Live-connection registry and per-connection traffic accounting.
use dashmap::DashMap;
use relayd_proto::Metadata;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use uuid::Uuid;

struct Entry {
    metadata: Metadata,
    upload_total: AtomicI64,
    download_total: AtomicI64,
    started_at: Instant,
}

/// Process-wide table of live relayed connections plus running upload/download
/// totals. Totals are the sum of per-connection deltas observed so far, not a
/// recomputation over the live set — so a closed connection's bytes remain
/// counted in the global total even after it leaves the registry.
#[derive(Clone, Default)]
pub struct Registry {
    entries: Arc<DashMap<Uuid, Entry>>,
    global_upload: Arc<AtomicI64>,
    global_download: Arc<AtomicI64>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, metadata: Metadata) -> Uuid {
        let id = metadata.id;
        self.entries.insert(
            id,
            Entry {
                metadata,
                upload_total: AtomicI64::new(0),
                download_total: AtomicI64::new(0),
                started_at: Instant::now(),
            },
        );
        id
    }

    pub fn leave(&self, id: Uuid) {
        self.entries.remove(&id);
    }

    pub fn push_uploaded(&self, id: Uuid, n: i64) {
        if let Some(entry) = self.entries.get(&id) {
            entry.upload_total.fetch_add(n, Ordering::Relaxed);
        }
        self.global_upload.fetch_add(n, Ordering::Relaxed);
    }

    pub fn push_downloaded(&self, id: Uuid, n: i64) {
        if let Some(entry) = self.entries.get(&id) {
            entry.download_total.fetch_add(n, Ordering::Relaxed);
        }
        self.global_download.fetch_add(n, Ordering::Relaxed);
    }

    pub fn global_totals(&self) -> (i64, i64) {
        (
            self.global_upload.load(Ordering::Relaxed),
            self.global_download.load(Ordering::Relaxed),
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Point-in-time snapshot of live connections for the observability surface.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.entries
            .iter()
            .map(|e| ConnectionInfo {
                id: *e.key(),
                metadata: e.value().metadata.clone(),
                upload_total: e.value().upload_total.load(Ordering::Relaxed),
                download_total: e.value().download_total.load(Ordering::Relaxed),
                elapsed: e.value().started_at.elapsed(),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub metadata: Metadata,
    pub upload_total: i64,
    pub download_total: i64,
    pub elapsed: std::time::Duration,
}

/// Wraps any duplex I/O type so reads/writes are pushed into the registry and
/// the entry is removed on first drop-equivalent close.
pub struct TrackedConn<T> {
    inner: T,
    id: Uuid,
    registry: Registry,
    closed: bool,
}

impl<T> TrackedConn<T> {
    pub fn new(inner: T, id: Uuid, registry: Registry) -> Self {
        Self {
            inner,
            id,
            registry,
            closed: false,
        }
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.registry.leave(self.id);
            self.closed = true;
        }
    }
}

impl<T> Drop for TrackedConn<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for TrackedConn<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let n = buf.filled().len() - before;
            if n > 0 {
                this.registry.push_downloaded(this.id, n as i64);
            }
        }
        poll
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for TrackedConn<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            this.registry.push_uploaded(this.id, *n as i64);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayd_proto::{Address, Kind, Network};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn sample_metadata() -> Metadata {
        Metadata::new(
            Network::Tcp,
            Kind::Http,
            Address::new("10.0.0.1", 1),
            Address::new("10.0.0.2", 2),
            Address::new("example.com", 80),
        )
    }

    #[test]
    fn join_and_leave_update_len() {
        let registry = Registry::new();
        let id = registry.join(sample_metadata());
        assert_eq!(registry.len(), 1);
        registry.leave(id);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn global_totals_survive_leave() {
        let registry = Registry::new();
        let id = registry.join(sample_metadata());
        registry.push_uploaded(id, 100);
        registry.push_downloaded(id, 50);
        registry.leave(id);
        assert_eq!(registry.global_totals(), (100, 50));
    }

    #[tokio::test]
    async fn tracked_conn_counts_bytes() {
        let registry = Registry::new();
        let id = registry.join(sample_metadata());
        let (a, mut b) = duplex(64);
        let mut tracked = TrackedConn::new(a, id, registry.clone());

        b.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        tracked.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        tracked.write_all(b"world!").await.unwrap();
        let mut echoed = [0u8; 6];
        b.read_exact(&mut echoed).await.unwrap();

        assert_eq!(registry.global_totals(), (6, 5));
        drop(tracked);
        assert_eq!(registry.len(), 0);
    }
}
