//! Shared DAP test client, grounded in the same request/response framing
//! the adapter itself speaks: `Content-Length`-prefixed JSON over a TCP
//! socket. Tests talk to a real `langdap` process in `net` mode rather than
//! calling `session::run` in-process, so the handshake and thread handoff
//! are exercised exactly as a real client would see them.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use serde_json::{json, Value};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct DapClient {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    next_seq: i64,
    pending_events: Vec<Value>,
}

impl DapClient {
    fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let start = Instant::now();
        let stream = loop {
            match TcpStream::connect(addr) {
                Ok(stream) => break stream,
                Err(err) => {
                    if start.elapsed() > CONNECT_TIMEOUT {
                        return Err(anyhow!("failed to connect to {addr}: {err}"));
                    }
                    thread::sleep(Duration::from_millis(25));
                }
            }
        };
        stream.set_read_timeout(Some(MESSAGE_TIMEOUT))?;
        stream.set_write_timeout(Some(MESSAGE_TIMEOUT))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self { stream, reader, next_seq: 1, pending_events: Vec::new() })
    }

    pub fn send_request(&mut self, command: &str, arguments: Value) -> anyhow::Result<i64> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let request = json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        self.write_message(&request)?;
        Ok(seq)
    }

    /// Sends `command` and blocks for its matching response, returning its
    /// `body` (or an error built from a non-success response).
    pub fn request(&mut self, command: &str, arguments: Value) -> anyhow::Result<Value> {
        let seq = self.send_request(command, arguments)?;
        let resp = self.read_response(seq)?;
        if resp.get("success").and_then(Value::as_bool) != Some(true) {
            return Err(anyhow!("{command} failed: {resp}"));
        }
        Ok(resp.get("body").cloned().unwrap_or(Value::Null))
    }

    pub fn read_response(&mut self, request_seq: i64) -> anyhow::Result<Value> {
        loop {
            let msg = self.read_message()?;
            match msg.get("type").and_then(Value::as_str) {
                Some("event") => self.pending_events.push(msg),
                Some("response") => {
                    if msg.get("request_seq").and_then(Value::as_i64) == Some(request_seq) {
                        return Ok(msg);
                    }
                }
                _ => {}
            }
        }
    }

    /// Blocks until an event named `name` arrives, buffering any others
    /// seen along the way so a later `wait_for_event` still finds them.
    pub fn wait_for_event(&mut self, name: &str) -> anyhow::Result<Value> {
        if let Some(pos) = self.pending_events.iter().position(|e| {
            e.get("event").and_then(Value::as_str) == Some(name)
        }) {
            return Ok(self.pending_events.remove(pos));
        }
        loop {
            let msg = self.read_message()?;
            if msg.get("type").and_then(Value::as_str) != Some("event") {
                continue;
            }
            if msg.get("event").and_then(Value::as_str) == Some(name) {
                return Ok(msg);
            }
            self.pending_events.push(msg);
        }
    }

    fn read_message(&mut self) -> anyhow::Result<Value> {
        let deadline = Instant::now() + MESSAGE_TIMEOUT;
        let mut content_length = None;
        loop {
            let mut line = String::new();
            let read_n = self.read_line_with_deadline(&mut line, deadline)?;
            if read_n == 0 {
                return Err(anyhow!("DAP connection closed"));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix("Content-Length:") {
                content_length = Some(value.trim().parse::<usize>()?);
            }
        }
        let len = content_length.ok_or_else(|| anyhow!("missing Content-Length"))?;
        let mut buf = vec![0u8; len];
        self.read_exact_with_deadline(&mut buf, deadline)?;
        Ok(serde_json::from_slice(&buf)?)
    }

    fn read_line_with_deadline(&mut self, line: &mut String, deadline: Instant) -> anyhow::Result<usize> {
        loop {
            match self.reader.read_line(line) {
                Ok(n) => return Ok(n),
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    if Instant::now() > deadline {
                        return Err(anyhow!("timed out waiting for a DAP header"));
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn read_exact_with_deadline(&mut self, buf: &mut [u8], deadline: Instant) -> anyhow::Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            match self.reader.read(&mut buf[offset..]) {
                Ok(0) => return Err(anyhow!("DAP connection closed")),
                Ok(n) => offset += n,
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    if Instant::now() > deadline {
                        return Err(anyhow!("timed out waiting for a DAP body"));
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn write_message(&mut self, message: &Value) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(message)?;
        write!(self.stream, "Content-Length: {}\r\n\r\n", payload.len())?;
        self.stream.write_all(&payload)?;
        self.stream.flush()?;
        Ok(())
    }
}

/// A `langdap --mode net` child process (single-session by default) plus a connected
/// client. Dropping it disconnects and waits for the process to exit.
pub struct Session {
    pub client: DapClient,
    process: Child,
    closed: bool,
}

impl Session {
    pub fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").context("bind test port")?;
        let addr = listener.local_addr()?;
        drop(listener);

        let bin = std::env::var("CARGO_BIN_EXE_langdap")
            .map(PathBuf::from)
            .context("CARGO_BIN_EXE_langdap not set")?;
        let process = Command::new(bin)
            .args(["--mode", "net", "--addr", &format!("tcp://{addr}"), "unused.script"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("spawn langdap")?;

        let client = DapClient::connect(addr)?;
        Ok(Self { client, process, closed: false })
    }

    /// Runs the handshake through `configurationDone`: `initialize` ->
    /// `launch` -> wait for `initialized` -> `setBreakpoints` (one call per
    /// `(path, lines)` pair, in order) -> `configurationDone`. Returns the
    /// resolved breakpoints from each `setBreakpoints` call, in order.
    pub fn handshake(
        &mut self,
        launch_args: Value,
        breakpoints: &[(&str, &[i64])],
    ) -> anyhow::Result<Vec<Value>> {
        self.client.request("initialize", json!({"adapterID": "langdap"}))?;
        self.client.request("launch", launch_args)?;
        self.client.wait_for_event("initialized")?;

        let mut resolved = Vec::new();
        for (path, lines) in breakpoints {
            let body = self.client.request(
                "setBreakpoints",
                json!({
                    "source": {"path": path},
                    "breakpoints": lines.iter().map(|l| json!({"line": l})).collect::<Vec<_>>(),
                }),
            )?;
            resolved.push(body);
        }

        self.client.request("configurationDone", json!({}))?;
        Ok(resolved)
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        self.client.request("disconnect", json!({"terminateDebuggee": true}))?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.disconnect();
        }
        let start = Instant::now();
        while self.process.try_wait().ok().flatten().is_none() {
            if start.elapsed() > SHUTDOWN_TIMEOUT {
                let _ = self.process.kill();
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

/// Writes `source` to a fresh temp file and returns its path, kept alive by
/// the returned guard (dropping it removes the file).
pub fn write_script(source: &str) -> (tempfile::TempPath, PathBuf) {
    let mut file = tempfile::Builder::new()
        .suffix(".lang")
        .tempfile()
        .expect("create temp script");
    file.write_all(source.as_bytes()).expect("write temp script");
    let path = file.path().to_path_buf();
    (file.into_temp_path(), path)
}
