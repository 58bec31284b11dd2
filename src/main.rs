//! `langdap` binary entry point: parses the CLI surface,
//! wires up logging, and runs the accept loop. One [`session::run`] call per
//! connection — `stdio` mode serves exactly one, `net` mode serves clients
//! sequentially until the first one ends, unless `--multi-session` was given.

use clap::Parser;

use langdap::cli::{Args, Mode};
use langdap::server::{self, Listener};
use langdap::{log as adapter_log, session};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logger(&args);

    let mut listener = match args.mode {
        Mode::Stdio => Listener::stdio(),
        Mode::Net => {
            let addr = server::parse_addr(&args.addr)?;
            Listener::bind(&addr)?
        }
    };

    loop {
        let conn = match listener.accept() {
            Ok(Some(conn)) => conn,
            Ok(None) => return Ok(()),
            Err(e) => {
                log::warn!(target: "langdap", "accept failed: {e:#}");
                continue;
            }
        };
        log::info!(target: "langdap", "client connected: {}", conn.peer);

        if let Err(e) = session::run(conn.reader, conn.writer, &args) {
            log::warn!(target: "langdap", "session ended with error: {e:#}");
        }

        if args.single_session() {
            return Ok(());
        }
    }
}

/// Routes log records through `--log`: a file path, `-` for stderr, or (the
/// default) whatever `RUST_LOG`/`env_logger`'s own defaults say. `stdout` is
/// never a valid log target — it's the DAP frame channel.
fn init_logger(args: &Args) {
    let mut builder = env_logger::Builder::from_default_env();

    if let Some(path) = &args.log {
        let path = path.to_string_lossy().into_owned();
        if path == "-" {
            builder.target(env_logger::Target::Stderr);
        } else {
            match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => {
                    builder.target(env_logger::Target::Pipe(Box::new(file)));
                }
                Err(e) => {
                    eprintln!("langdap: failed to open log file {path:?}: {e}; logging to stderr");
                }
            }
        }
    }

    let logger = builder.build();
    let filter = logger.filter();
    adapter_log::LOGGER_SWITCHER.switch(logger, filter);
}
