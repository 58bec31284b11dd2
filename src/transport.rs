//! Connection abstraction over the three supported transports: `stdio`,
//! TCP, and Unix domain sockets. Boxed so [`crate::server::Listener`] can
//! hand a uniform `(Read, Write)` pair to `dap::server::Server` regardless
//! of which transport produced it.

use std::io::{self, BufReader, BufWriter, Read, Write};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::net::TcpStream;

/// The read half of a connection, boxed so stdio/TCP/Unix share one type.
pub type BoxedReader = Box<dyn Read + Send>;
/// The write half of a connection, boxed the same way.
pub type BoxedWriter = Box<dyn Write + Send>;

/// A single accepted connection, already split into buffered read/write
/// halves ready to feed `dap::server::Server::new`.
pub struct Connection {
    pub reader: BufReader<BoxedReader>,
    pub writer: BufWriter<BoxedWriter>,
    /// Human-readable description for logging (`"stdio"`, a peer address, …).
    pub peer: String,
}

impl Connection {
    pub fn stdio() -> Self {
        Connection {
            reader: BufReader::new(Box::new(io::stdin())),
            writer: BufWriter::new(Box::new(io::stdout())),
            peer: "stdio".to_string(),
        }
    }

    pub fn tcp(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "tcp".to_string());
        let read_half = stream.try_clone()?;
        Ok(Connection {
            reader: BufReader::new(Box::new(read_half)),
            writer: BufWriter::new(Box::new(stream)),
            peer,
        })
    }

    #[cfg(unix)]
    pub fn unix(stream: UnixStream) -> io::Result<Self> {
        let peer = stream
            .peer_addr()
            .ok()
            .and_then(|a| a.as_pathname().map(|p| p.display().to_string()))
            .unwrap_or_else(|| "unix".to_string());
        let read_half = stream.try_clone()?;
        Ok(Connection {
            reader: BufReader::new(Box::new(read_half)),
            writer: BufWriter::new(Box::new(stream)),
            peer,
        })
    }
}
