//! Live set of spliced stream pairs.
//!
//! Both the daemon (upgraded connections) and the client bridge (Unix socket
//! ↔ loopback TCP) splice two byte streams for the lifetime of a
//! connection. Each pair runs in its own task; the set exists only so an
//! owner can force-close every pair on shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite};
use tokio::task::AbortHandle;

#[derive(Debug, Clone, Default)]
pub struct TunnelSet {
    inner: Arc<Mutex<TunnelTable>>,
}

#[derive(Debug, Default)]
struct TunnelTable {
    next_id: u64,
    live: HashMap<u64, AbortHandle>,
}

impl TunnelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pairs still splicing.
    pub fn len(&self) -> usize {
        self.table().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splice `a` and `b` in a new task until either side finishes or errors.
    ///
    /// Both streams are dropped (closed) when the task ends, and the pair
    /// leaves the set exactly once whether it ended on its own or was
    /// aborted by [`TunnelSet::close_all`].
    pub fn splice<A, B>(&self, mut a: A, mut b: B, label: impl Into<String>)
    where
        A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let label = label.into();
        // Held across spawn so the pair is in the set before its guard can run.
        let mut table = self.table();
        let id = table.next_id;
        table.next_id += 1;

        let guard = TunnelGuard {
            set: self.clone(),
            id,
        };
        let task = tokio::spawn(async move {
            let _guard = guard;
            match copy_bidirectional(&mut a, &mut b).await {
                Ok((a_to_b, b_to_a)) => {
                    tracing::debug!(tunnel = %label, a_to_b, b_to_a, "tunnel closed");
                }
                Err(err) => {
                    tracing::debug!(tunnel = %label, error = %err, "tunnel closed with error");
                }
            }
        });
        table.live.insert(id, task.abort_handle());
    }

    /// Abort every live pair. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let handles: Vec<AbortHandle> = self.table().live.drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.abort();
        }
        handles.len()
    }

    fn table(&self) -> MutexGuard<'_, TunnelTable> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct TunnelGuard {
    set: TunnelSet,
    id: u64,
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        self.set.table().live.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    use super::*;

    async fn wait_for_empty(set: &TunnelSet) {
        for _ in 0..100 {
            if set.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("tunnel set did not drain, {} live", set.len());
    }

    #[tokio::test]
    async fn splice_relays_bytes_both_ways() {
        let set = TunnelSet::new();
        let (mut client, proxy_a) = duplex(1024);
        let (proxy_b, mut server) = duplex(1024);
        set.splice(proxy_a, proxy_b, "test");
        assert_eq!(set.len(), 1);

        client.write_all(b"ping").await.expect("write");
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").await.expect("write");
        client.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"pong");

        drop(client);
        drop(server);
        wait_for_empty(&set).await;
    }

    #[tokio::test]
    async fn close_all_tears_down_every_pair() {
        let set = TunnelSet::new();
        let mut clients = Vec::new();
        for idx in 0..3 {
            let (client, proxy_a) = duplex(64);
            let (proxy_b, server) = duplex(64);
            set.splice(proxy_a, proxy_b, format!("pair-{idx}"));
            clients.push((client, server));
        }
        assert_eq!(set.len(), 3);

        assert_eq!(set.close_all(), 3);
        assert!(set.is_empty());
        assert_eq!(set.close_all(), 0, "second close is a no-op");

        let (mut client, _server) = clients.pop().expect("pair");
        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(1), client.read_to_end(&mut buf))
            .await
            .expect("peer closed after abort")
            .expect("read");
        assert_eq!(read, 0);
    }
}
