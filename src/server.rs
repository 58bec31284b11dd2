//! Server/listener.
//!
//! Two modes: `stdio` (a single synthetic connection with no close) and
//! `net` (TCP or Unix domain socket, parsed out of a `scheme://rest` URL —
//! socket-URL parsing is a thin external concern, so the parsing here is
//! deliberately minimal). `Accept` produces one
//! [`Connection`] per client; `single_session` mode honors exactly one.
//!
//! Stale Unix-socket files at the listen path are removed before binding
//! and again on clean shutdown. Cleanup ordering under abrupt disconnect is
//! explicit: drain events → close connection → close listener → unlink
//! socket.

use std::net::TcpListener;
#[cfg(unix)]
use std::os::unix::net::UnixListener;
use std::path::PathBuf;

use anyhow::{anyhow, Context};

use crate::transport::Connection;

#[derive(Debug, Clone)]
pub enum ListenAddr {
    Tcp(String),
    #[cfg_attr(not(unix), allow(dead_code))]
    Unix(PathBuf),
}

/// Parses `tcp://host:port` or `unix:///path/to/socket`. Anything else is a
/// fatal configuration error (listener errors are fatal for the process).
pub fn parse_addr(addr: &str) -> anyhow::Result<ListenAddr> {
    if let Some(rest) = addr.strip_prefix("tcp://") {
        return Ok(ListenAddr::Tcp(rest.to_string()));
    }
    if let Some(rest) = addr.strip_prefix("unix://") {
        return Ok(ListenAddr::Unix(PathBuf::from(rest)));
    }
    Err(anyhow!(
        "invalid -addr {addr:?}: expected tcp://host:port or unix:///path"
    ))
}

enum Inner {
    Stdio { consumed: bool },
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix { listener: UnixListener, path: PathBuf },
}

pub struct Listener {
    inner: Inner,
}

impl Listener {
    pub fn stdio() -> Self {
        Listener {
            inner: Inner::Stdio { consumed: false },
        }
    }

    pub fn bind(addr: &ListenAddr) -> anyhow::Result<Self> {
        match addr {
            ListenAddr::Tcp(host_port) => {
                let listener = TcpListener::bind(host_port)
                    .with_context(|| format!("bind tcp {host_port}"))?;
                Ok(Listener {
                    inner: Inner::Tcp(listener),
                })
            }
            #[cfg(unix)]
            ListenAddr::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path)
                        .with_context(|| format!("remove stale socket {}", path.display()))?;
                }
                let listener = UnixListener::bind(path)
                    .with_context(|| format!("bind unix {}", path.display()))?;
                Ok(Listener {
                    inner: Inner::Unix {
                        listener,
                        path: path.clone(),
                    },
                })
            }
            #[cfg(not(unix))]
            ListenAddr::Unix(_) => Err(anyhow!("unix sockets are not supported on this platform")),
        }
    }

    /// Accepts one connection. `stdio` mode yields exactly one connection
    /// ever, then `Ok(None)` forever after.
    pub fn accept(&mut self) -> anyhow::Result<Option<Connection>> {
        match &mut self.inner {
            Inner::Stdio { consumed } => {
                if *consumed {
                    return Ok(None);
                }
                *consumed = true;
                Ok(Some(Connection::stdio()))
            }
            Inner::Tcp(listener) => {
                let (stream, _addr) = listener.accept().context("accept tcp")?;
                Ok(Some(Connection::tcp(stream)?))
            }
            #[cfg(unix)]
            Inner::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().context("accept unix")?;
                Ok(Some(Connection::unix(stream)?))
            }
        }
    }

    /// Unlinks the backing Unix-socket file, if any. Called after the
    /// listener itself is dropped (closed), per the cleanup ordering above.
    pub fn cleanup(&self) {
        #[cfg(unix)]
        if let Inner::Unix { path, .. } = &self.inner {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_url() {
        match parse_addr("tcp://localhost:9229").unwrap() {
            ListenAddr::Tcp(hp) => assert_eq!(hp, "localhost:9229"),
            _ => panic!("expected tcp"),
        }
    }

    #[test]
    fn parses_unix_url() {
        match parse_addr("unix:///tmp/langdap.sock").unwrap() {
            ListenAddr::Unix(p) => assert_eq!(p, PathBuf::from("/tmp/langdap.sock")),
            _ => panic!("expected unix"),
        }
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(parse_addr("http://localhost").is_err());
    }

    #[test]
    fn stdio_listener_yields_exactly_one_connection() {
        let mut l = Listener::stdio();
        assert!(l.accept().unwrap().is_some());
        assert!(l.accept().unwrap().is_none());
    }
}
