//! Outbound Socket Management
//!
//! Purpose: Caches one outbound TCP connection per remote silo endpoint,
//! establishing sockets on demand and retiring them when they go idle or
//! the peer closes its end.
//!
//! Architecture Role: Sits below the message-sending agents. A sender asks
//! for the socket to a target endpoint; the manager either hands back the
//! cached connection or dials a new one, configures it (no delay, hard
//! close semantics), writes the connection preamble, and starts a watcher
//! thread whose only job is to notice the remote end closing the socket
//! and invalidate the cache entry.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use config::MessagingConfiguration;

use crate::error::{NetworkError, Result};
use crate::lru::Lru;

/// First bytes written on every newly opened connection so the accepting
/// side can distinguish silo traffic from stray connects.
pub const CONNECTION_PREAMBLE: Uuid = Uuid::from_u128(0x11111111_1111_1111_1111_111111111111);

/// An open outbound connection to a remote endpoint.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    closed: AtomicBool,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            closed: AtomicBool::new(false),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Write a full frame to the peer.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut stream = &self.stream;
        stream.write_all(bytes).map_err(|e| {
            NetworkError::connection_with_source("write failed", Some(self.peer), e)
        })?;
        stream.flush().map_err(|e| {
            NetworkError::connection_with_source("flush failed", Some(self.peer), e)
        })?;
        Ok(())
    }

    /// Shut the socket down. Safe to call more than once; errors from an
    /// already-dead socket are swallowed.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.stream.shutdown(Shutdown::Both);
        debug!(peer = %self.peer, "closed outbound socket");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Cache of outbound sockets keyed by remote endpoint.
pub struct SocketManager {
    cache: Lru<SocketAddr, Arc<Connection>>,
    // One lock per target so concurrent cold sends dial once, not twice.
    connect_locks: DashMap<SocketAddr, Arc<Mutex<()>>>,
    stopped: AtomicBool,
}

impl SocketManager {
    pub fn new(config: &MessagingConfiguration) -> Arc<Self> {
        // Connects are fallible, so entries are populated through
        // try_get/add rather than a cache-level loader.
        let cache = Lru::new(config.max_sockets, config.max_socket_age(), None);
        cache.set_flush_handler(Box::new(|_addr: &SocketAddr, conn: &Arc<Connection>| {
            conn.close();
        }));
        Arc::new(Self {
            cache,
            connect_locks: DashMap::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Get the cached socket to `target`, dialing a new one if needed.
    pub fn get_sending_socket(self: &Arc<Self>, target: SocketAddr) -> Result<Arc<Connection>> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(NetworkError::Stopped);
        }
        if let Some(conn) = self.cache.try_get(&target) {
            if !conn.is_closed() {
                return Ok(conn);
            }
        }
        let lock = self
            .connect_locks
            .entry(target)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _dialing = lock.lock();
        // Re-check under the lock: a racing caller may have dialed already,
        // and its socket must not be flushed out from under it.
        if let Some(conn) = self.cache.try_get(&target) {
            if !conn.is_closed() {
                return Ok(conn);
            }
            self.cache.remove_key(&target);
        }
        let conn = self.connect(target)?;
        self.cache.add(target, Arc::clone(&conn));
        self.spawn_watcher(target, &conn);
        Ok(conn)
    }

    fn connect(&self, target: SocketAddr) -> Result<Arc<Connection>> {
        let stream = TcpStream::connect(target).map_err(|e| {
            NetworkError::connection_with_source("connect failed", Some(target), e)
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %target, error = %e, "failed to disable Nagle on outbound socket");
        }
        configure_linger(&stream, target);

        let mut writer = &stream;
        writer
            .write_all(CONNECTION_PREAMBLE.as_bytes())
            .map_err(|e| {
                NetworkError::connection_with_source("preamble write failed", Some(target), e)
            })?;
        info!(peer = %target, "opened outbound socket");
        Ok(Arc::new(Connection::new(stream, target)))
    }

    /// The watcher blocks on a one-byte read. Outbound sockets carry no
    /// inbound traffic, so the read only completes when the remote end
    /// closes or resets the connection; at that point the cache entry is
    /// dropped so the next send dials fresh.
    fn spawn_watcher(self: &Arc<Self>, target: SocketAddr, conn: &Arc<Connection>) {
        let watcher_stream = match conn.stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                warn!(peer = %target, error = %e, "could not clone socket for close watcher");
                return;
            }
        };
        let manager: Weak<SocketManager> = Arc::downgrade(self);
        let watched = Arc::downgrade(conn);
        thread::Builder::new()
            .name(format!("socket-watcher/{target}"))
            .spawn(move || {
                let mut reader = &watcher_stream;
                let mut byte = [0u8; 1];
                let _ = reader.read(&mut byte);
                debug!(peer = %target, "remote endpoint closed outbound socket");
                if let Some(conn) = watched.upgrade() {
                    conn.close();
                }
                if let Some(manager) = manager.upgrade() {
                    manager.invalidate_entry(target);
                }
            })
            .map(|_| ())
            .unwrap_or_else(|e| {
                warn!(peer = %target, error = %e, "failed to spawn socket close watcher");
            });
    }

    /// Drop the cached socket for `target`, closing it if still open.
    pub fn invalidate_entry(&self, target: SocketAddr) {
        if let Some(conn) = self.cache.remove_key(&target) {
            conn.close();
        }
    }

    pub fn has_sending_socket(&self, target: SocketAddr) -> bool {
        self.cache.contains_key(&target)
    }

    pub fn socket_count(&self) -> usize {
        self.cache.count()
    }

    /// Stop handing out sockets and close every cached connection.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.cache.clear();
        info!("socket manager stopped");
    }
}

#[cfg(unix)]
fn configure_linger(stream: &TcpStream, target: SocketAddr) {
    use nix::sys::socket::{setsockopt, sockopt};
    // Hard close: a reset on close rather than lingering in TIME_WAIT.
    let linger = nix::libc::linger {
        l_onoff: 1,
        l_linger: 0,
    };
    if let Err(e) = setsockopt(stream, sockopt::Linger, &linger) {
        warn!(peer = %target, error = %e, "failed to set SO_LINGER on outbound socket");
    }
}

#[cfg(not(unix))]
fn configure_linger(_stream: &TcpStream, _target: SocketAddr) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    fn test_config() -> MessagingConfiguration {
        MessagingConfiguration::default()
    }

    #[test]
    fn test_connect_writes_preamble() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let manager = SocketManager::new(&test_config());

        let conn = manager.get_sending_socket(addr).unwrap();
        assert_eq!(conn.peer(), addr);

        let (mut accepted, _) = listener.accept().unwrap();
        let mut preamble = [0u8; 16];
        accepted.read_exact(&mut preamble).unwrap();
        assert_eq!(&preamble, CONNECTION_PREAMBLE.as_bytes());
    }

    #[test]
    fn test_socket_is_cached_and_reused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let manager = SocketManager::new(&test_config());

        let first = manager.get_sending_socket(addr).unwrap();
        let _accepted = listener.accept().unwrap();
        let second = manager.get_sending_socket(addr).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.socket_count(), 1);
    }

    #[test]
    fn test_concurrent_cold_connects_share_one_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let manager = SocketManager::new(&test_config());

        let dialers: Vec<_> = (0..4)
            .map(|_| {
                let manager = manager.clone();
                thread::spawn(move || manager.get_sending_socket(addr).unwrap())
            })
            .collect();
        let conns: Vec<_> = dialers.into_iter().map(|t| t.join().unwrap()).collect();

        assert!(conns.iter().all(|c| Arc::ptr_eq(c, &conns[0])));
        assert_eq!(manager.socket_count(), 1);

        // Exactly one dial reached the listener.
        let _accepted = listener.accept().unwrap();
        listener.set_nonblocking(true).unwrap();
        assert!(matches!(
            listener.accept(),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock
        ));
    }

    #[test]
    fn test_remote_close_invalidates_entry() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let manager = SocketManager::new(&test_config());

        let conn = manager.get_sending_socket(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        drop(accepted);

        // The watcher notices the close asynchronously.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while manager.has_sending_socket(addr) && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!manager.has_sending_socket(addr));
        assert!(conn.is_closed());
    }

    #[test]
    fn test_stop_closes_and_rejects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let manager = SocketManager::new(&test_config());

        let conn = manager.get_sending_socket(addr).unwrap();
        let _accepted = listener.accept().unwrap();
        manager.stop();

        assert_eq!(manager.socket_count(), 0);
        assert!(conn.is_closed());
        assert!(matches!(
            manager.get_sending_socket(addr),
            Err(NetworkError::Stopped)
        ));
    }

    #[test]
    fn test_invalidate_entry_closes_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let manager = SocketManager::new(&test_config());

        let conn = manager.get_sending_socket(addr).unwrap();
        let _accepted = listener.accept().unwrap();
        manager.invalidate_entry(addr);

        assert!(!manager.has_sending_socket(addr));
        assert!(conn.is_closed());
    }
}
