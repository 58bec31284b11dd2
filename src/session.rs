//! Per-connection protocol loop.
//!
//! Two tasks per session split reading from debuggee execution:
//!
//! - the thread running [`run`] below *is* the reader+dispatcher: it blocks
//!   in `dap::server::Server::poll_request`, then handles each request to
//!   completion before polling again (`dap`'s `Server` serializes responses
//!   for us, so there is no separate writer task to manage).
//! - the debuggee task is a `std::thread::spawn`'d interpreter run, driven
//!   by [`crate::debugger`]'s blocking [`crate::lang::StopHook`].
//!
//! `evaluate`/`setVariable` requests arriving while `Stopped` are serviced
//! by [`crate::debugger::Debugger::evaluate`]/`::assign`, which block this
//! thread until the parked debuggee thread answers — so from the
//! dispatcher's point of view they're ordinary synchronous calls.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use dap::events::Event;
use dap::requests::{Command, Request};
use dap::responses::{
    ContinueResponse, EvaluateResponse, Response, ResponseBody, ResponseMessage, ScopesResponse,
    SetBreakpointsResponse, SetFunctionBreakpointsResponse, SetVariableResponse, SourceResponse,
    StackTraceResponse, ThreadsResponse, VariablesResponse,
};
use dap::server::{Server, ServerOutput};
use dap::types::{
    Breakpoint, Capabilities, OutputEventCategory, Source, StackFrame, StackFramePresentationhint,
    Variable,
};
use itertools::Itertools;

use crate::adapter::{self, FeatureFlags, ProgramSource};
use crate::cli::Args;
use crate::debugger::{DebugeeEvents, Debugger, Hook, ScopeKind, SessionState, StepKind, StopReason};
use crate::lang::interp::InterpError;
use crate::lang::value::Value;
use crate::lang::Interpreter;
use crate::launch_args::LaunchArguments;
use crate::sourcemap::SourceMap;
use crate::variables::{self, VariableRegistry};

/// How long `disconnect` waits for the debuggee task to unwind on its own
/// before abandoning it (spec.md §5).
const DISCONNECT_GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(2);

/// Runs one DAP session to completion on `reader`/`writer`. Returns once the
/// client disconnects or the underlying transport is closed.
pub fn run<R, W>(reader: R, writer: W, args: &Args) -> anyhow::Result<()>
where
    R: Read + Send,
    W: Write + Send + 'static,
{
    let mut server = Server::new(reader, writer);
    let debugger = Arc::new(Debugger::new());
    let registry = Arc::new(Mutex::new(VariableRegistry::new()));
    let mut source_map = SourceMap::default();
    let mut program: Option<ProgramSource> = None;
    let mut launch_args = LaunchState::default();
    let mut debuggee: Option<Debuggee> = None;

    loop {
        let req = match server.poll_request()? {
            Some(req) => req,
            None => {
                // The transport closed without a `disconnect` request (the
                // client dropped its socket, or stdin hit EOF): spec.md §5's
                // state table still requires "connection lost -> Terminated,
                // cancel debuggee" here, not just returning and leaking the
                // debuggee thread.
                debugger.request_terminate();
                cancel_debuggee(&mut debuggee);
                return Ok(());
            }
        };

        log::debug!("{}: {:?}", req.seq, req.command);

        match handle(
            &req,
            &mut server,
            &debugger,
            &registry,
            &mut source_map,
            &mut program,
            &mut launch_args,
            &mut debuggee,
            args,
        ) {
            Ok(ControlFlow::Continue) => {}
            Ok(ControlFlow::Disconnect) => return Ok(()),
            Err(e) => {
                log::error!("{e}");
                server.respond(Response {
                    request_seq: req.seq,
                    success: false,
                    message: Some(ResponseMessage::Error(e.to_string())),
                    body: None,
                    error: None,
                })?;
            }
        }
    }
}

enum ControlFlow {
    Continue,
    Disconnect,
}

#[derive(Default)]
struct LaunchState {
    stop_at_entry: bool,
    source_path: String,
    /// Lines carrying an executable statement in the loaded program, used
    /// by `setBreakpoints` to decide `verified`. `None` until `launch`/
    /// `attach` has parsed a program.
    executable_lines: Option<std::collections::BTreeSet<u32>>,
}

/// The spawned interpreter thread plus the handle needed to tear it down.
struct Debuggee {
    join: Option<std::thread::JoinHandle<()>>,
}

struct EventSink<W: Write + Send + 'static> {
    output: Arc<Mutex<ServerOutput<W>>>,
    registry: Arc<Mutex<VariableRegistry>>,
}

impl<W: Write + Send + 'static> DebugeeEvents for EventSink<W> {
    fn on_stopped(&self, reason: StopReason) {
        // Every entry into `Stopped` starts a fresh handle epoch, whether or
        // not this particular stop ends up announced to the client (an
        // unannounced entry stop still parks the debuggee and still hands
        // out frame/scope/variable handles that must outlive it).
        self.registry.lock().unwrap().new_epoch();
        let mut out = self.output.lock().unwrap();
        let _ = out.send_event(crate::protocol::stopped_event(&reason));
    }

    fn on_output(&self, line: &str) {
        let mut out = self.output.lock().unwrap();
        let _ = out.send_event(crate::protocol::output_event(OutputEventCategory::Stdout, line));
    }

    fn on_exception(&self, message: &str) {
        // An uncaught error in the debuggee: still reported as a `stopped`
        // event per spec.md §7 ("emit stopped{reason: exception} ... if the
        // debuggee is still live"), not merely logged to the console, so a
        // client can inspect the stack at the point of failure before the
        // `terminated` event that follows once the interpreter returns.
        self.registry.lock().unwrap().new_epoch();
        let mut out = self.output.lock().unwrap();
        let _ = out.send_event(crate::protocol::stopped_event(&StopReason::Exception(message.to_string())));
    }

    fn on_terminated(&self, exit_code: i64) {
        let mut out = self.output.lock().unwrap();
        let _ = out.send_event(crate::protocol::thread_event(false));
        let _ = out.send_event(Event::Terminated(None));
        let _ = out.send_event(Event::Exited(dap::events::ExitedEventBody { exit_code }));
    }
}

#[allow(clippy::too_many_arguments)]
fn handle<R, W>(
    req: &Request,
    server: &mut Server<R, W>,
    debugger: &Arc<Debugger>,
    registry: &Arc<Mutex<VariableRegistry>>,
    source_map: &mut SourceMap,
    program: &mut Option<ProgramSource>,
    launch_args: &mut LaunchState,
    debuggee: &mut Option<Debuggee>,
    args: &Args,
) -> anyhow::Result<ControlFlow>
where
    R: Read + Send,
    W: Write + Send + 'static,
{
    match &req.command {
        Command::Initialize(_) => {
            server.respond(success(req.seq, ResponseBody::Initialize(capabilities())))?;
            // `initialized` is deferred to the launch/attach response per the
            // handshake ordering in spec.md §4.4, not emitted here.
        }

        Command::Launch(launch) => {
            let parsed: LaunchArguments = match &launch.additional_data {
                Some(data) => serde_json::from_value(data.clone()).context("parsing launch arguments")?,
                None => LaunchArguments::default(),
            };

            launch_args.stop_at_entry = parsed.stop_on_entry.unwrap_or(args.stop_at_entry);
            if let Some(map) = &parsed.source_map {
                *source_map = SourceMap::from_launch_arg(map);
            }

            let force_as_string = parsed.as_string.unwrap_or(args.as_string);
            let auto_import = !parsed.no_auto_import.unwrap_or(args.noautoimport);
            let flags = FeatureFlags {
                syscall: parsed.syscall.unwrap_or(args.syscall),
                r#unsafe: parsed.r#unsafe.unwrap_or(args.r#unsafe),
                unrestricted: parsed.unrestricted.unwrap_or(args.unrestricted),
            };
            let program_path = resolve_program_path(parsed.program.as_deref(), args)?;
            let program_args = parsed.args.clone().unwrap_or_else(|| args.args.clone());

            let loaded = adapter::load_program(&program_path, force_as_string)?;
            launch_args.source_path = source_map.to_source_id(&match &loaded {
                ProgramSource::Eval { name, .. } => name.clone(),
                ProgramSource::EvalPath(p) => p.display().to_string(),
            });
            launch_args.executable_lines = executable_lines(&loaded);
            *program = Some(loaded);

            spawn_debuggee(
                program.as_ref().unwrap(),
                flags,
                auto_import,
                program_args,
                debugger,
                server.output.clone(),
                registry.clone(),
                debuggee,
            )?;
            server.respond(success(req.seq, ResponseBody::Launch))?;
            server.send_event(crate::protocol::thread_event(true))?;
            server.send_event(Event::Initialized)?;
        }

        Command::Attach(attach) => {
            let parsed: LaunchArguments = match &attach.additional_data {
                Some(data) => serde_json::from_value(data.clone()).context("parsing attach arguments")?,
                None => LaunchArguments::default(),
            };
            if let Some(map) = &parsed.source_map {
                *source_map = SourceMap::from_launch_arg(map);
            }

            let force_as_string = parsed.as_string.unwrap_or(args.as_string);
            let auto_import = !parsed.no_auto_import.unwrap_or(args.noautoimport);
            let flags = FeatureFlags {
                syscall: parsed.syscall.unwrap_or(args.syscall),
                r#unsafe: parsed.r#unsafe.unwrap_or(args.r#unsafe),
                unrestricted: parsed.unrestricted.unwrap_or(args.unrestricted),
            };
            let program_path = resolve_program_path(parsed.program.as_deref(), args)?;
            let program_args = parsed.args.clone().unwrap_or_else(|| args.args.clone());

            let loaded = adapter::load_program(&program_path, force_as_string)?;
            launch_args.source_path = source_map.to_source_id(&match &loaded {
                ProgramSource::Eval { name, .. } => name.clone(),
                ProgramSource::EvalPath(p) => p.display().to_string(),
            });
            launch_args.executable_lines = executable_lines(&loaded);
            *program = Some(loaded);
            spawn_debuggee(
                program.as_ref().unwrap(),
                flags,
                auto_import,
                program_args,
                debugger,
                server.output.clone(),
                registry.clone(),
                debuggee,
            )?;
            server.respond(success(req.seq, ResponseBody::Attach))?;
            server.send_event(crate::protocol::thread_event(true))?;
            server.send_event(Event::Initialized)?;
        }

        Command::ConfigurationDone => {
            // `configure` unblocks the debuggee thread parked waiting for
            // this at its first node (see `Debugger::wait_for_configuration`).
            // `resume` is called unconditionally: if `stopOnEntry` (or a
            // breakpoint on the program's first line) causes an actual
            // `Stopped` transition, that happens strictly after this
            // `resume` runs and wins — the debuggee only unparks on a later,
            // explicit `continue`.
            debugger.configure(launch_args.stop_at_entry);
            server.respond(success(req.seq, ResponseBody::ConfigurationDone))?;
            debugger.resume();
        }

        Command::SetBreakpoints(bps) => {
            let source_id = source_map.to_source_id(bps.source.path.as_deref().unwrap_or_default());
            let lines: Vec<u32> = bps
                .breakpoints
                .iter()
                .flatten()
                .map(|b| b.line as u32)
                .collect();
            let resolved = debugger.breakpoints().set_breakpoints(&source_id, &lines, |requested| {
                match &launch_args.executable_lines {
                    // Program not loaded yet (client set breakpoints before
                    // `launch`): accept optimistically, resolved against the
                    // real line table on the next `setBreakpoints` call.
                    None => Some(requested),
                    Some(lines) => lines.contains(&requested).then_some(requested),
                }
            });

            let breakpoints = resolved
                .iter()
                .map(|bp| Breakpoint {
                    id: Some(bp.id),
                    verified: bp.verified,
                    source: Some(bps.source.clone()),
                    line: Some(bp.line as i64),
                    ..Default::default()
                })
                .collect_vec();

            server.respond(success(
                req.seq,
                ResponseBody::SetBreakpoints(SetBreakpointsResponse { breakpoints }),
            ))?;
        }

        Command::SetFunctionBreakpoints(fbps) => {
            let names: Vec<String> = fbps.breakpoints.iter().map(|b| b.name.clone()).collect();
            debugger.set_function_breakpoints(names.clone());
            let breakpoints = names
                .iter()
                .map(|name| Breakpoint {
                    verified: true,
                    message: Some(name.clone()),
                    ..Default::default()
                })
                .collect_vec();
            server.respond(success(
                req.seq,
                ResponseBody::SetFunctionBreakpoints(SetFunctionBreakpointsResponse { breakpoints }),
            ))?;
        }

        Command::SetExceptionBreakpoints(filters) => {
            debugger.set_exception_filters(filters.filters.iter().cloned());
            server.respond(success(
                req.seq,
                ResponseBody::SetExceptionBreakpoints(Default::default()),
            ))?;
        }

        Command::Threads => {
            server.respond(success(
                req.seq,
                ResponseBody::Threads(ThreadsResponse {
                    threads: vec![crate::protocol::main_thread()],
                }),
            ))?;
        }

        Command::StackTrace(_args) => {
            let frames = debugger.frames();
            let stack_frames = frames
                .iter()
                .map(|f| StackFrame {
                    id: f.depth as i64,
                    name: f.name.clone(),
                    source: Some(Source {
                        path: Some(source_map.to_client_path(&f.source)),
                        ..Default::default()
                    }),
                    line: f.pos.line as i64,
                    column: f.pos.column as i64,
                    presentation_hint: Some(StackFramePresentationhint::Normal),
                    ..Default::default()
                })
                .collect_vec();
            server.respond(success(
                req.seq,
                ResponseBody::StackTrace(StackTraceResponse {
                    total_frames: Some(stack_frames.len() as i64),
                    stack_frames,
                }),
            ))?;
        }

        Command::Scopes(scopes_args) => {
            let frame_depth = scopes_args.frame_id as usize;
            let mut reg = registry.lock().unwrap();
            let scopes = [ScopeKind::Local, ScopeKind::Global]
                .into_iter()
                .map(|kind| {
                    let handle = reg.scope_handle(frame_depth, kind);
                    crate::protocol::scope(kind, handle, source_map, &launch_args.source_path)
                })
                .collect_vec();
            server.respond(success(req.seq, ResponseBody::Scopes(ScopesResponse { scopes })))?;
        }

        Command::Variables(vars_args) => {
            let mut reg = registry.lock().unwrap();
            let frames = debugger.frames();
            let entries = reg.variables(
                vars_args.variables_reference as u32,
                |depth, scope| {
                    let bindings = frames
                        .iter()
                        .find(|f| f.depth == depth)
                        .map(|f| match scope {
                            ScopeKind::Local => f.locals.clone().into_iter().collect(),
                            ScopeKind::Global => (*f.globals).clone().into_iter().collect(),
                            ScopeKind::Closure => Vec::new(),
                        })
                        .unwrap_or_default();
                    variables::sorted(bindings)
                },
                vars_args.start.map(|s| s as usize),
                vars_args.count.map(|c| c as usize),
            )?;
            let vars = entries
                .into_iter()
                .map(|e| Variable {
                    name: e.name,
                    value: e.value,
                    type_field: Some(e.type_name.to_string()),
                    variables_reference: e.variables_reference as i64,
                    ..Default::default()
                })
                .collect_vec();
            server.respond(success(req.seq, ResponseBody::Variables(VariablesResponse { variables: vars })))?;
        }

        Command::SetVariable(set) => {
            // `assign`/`evaluate` block the dispatcher on the debugger's
            // request condvar, which is only ever serviced from inside the
            // debuggee's `park_until_resumed` — reachable solely while
            // `Stopped`. Outside that state nothing would ever wake this
            // wait, wedging the whole session rather than just failing this
            // one request, so this must be rejected up front rather than
            // left to block.
            if debugger.state() != SessionState::Stopped {
                return Err(anyhow::anyhow!("setVariable requires a stopped debuggee"));
            }
            let (frame_depth, _scope) = registry.lock().unwrap().scope_of(set.variables_reference as u32)?;
            debugger.assign(frame_depth, &set.name, &set.value)?;
            let value = debugger.evaluate(frame_depth, &set.name)?;
            server.respond(success(
                req.seq,
                ResponseBody::SetVariable(SetVariableResponse {
                    value: render(&value),
                    type_field: Some(value.type_name().to_string()),
                    variables_reference: Some(0),
                    named_variables: None,
                    indexed_variables: None,
                }),
            ))?;
        }

        Command::Evaluate(eval) => {
            // See the identical guard on `SetVariable` above: `evaluate`
            // (e.g. a watch expression sent while `Running`) must not be
            // allowed to reach `debugger.evaluate`'s blocking wait outside
            // `Stopped`, or it wedges the dispatcher forever.
            if debugger.state() != SessionState::Stopped {
                return Err(anyhow::anyhow!("evaluate requires a stopped debuggee"));
            }
            let frame_depth = eval.frame_id.unwrap_or(0) as usize;
            let value = debugger.evaluate(frame_depth, &eval.expression)?;
            server.respond(success(
                req.seq,
                ResponseBody::Evaluate(EvaluateResponse {
                    result: render(&value),
                    type_field: Some(value.type_name().to_string()),
                    presentation_hint: None,
                    variables_reference: 0,
                    named_variables: None,
                    indexed_variables: None,
                    memory_reference: None,
                }),
            ))?;
        }

        Command::Continue(_) => {
            debugger.resume();
            server.respond(success(
                req.seq,
                ResponseBody::Continue(ContinueResponse { all_threads_continued: Some(true) }),
            ))?;
            server.send_event(Event::Continued(dap::events::ContinuedEventBody {
                thread_id: crate::protocol::MAIN_THREAD_ID,
                all_threads_continued: Some(true),
            }))?;
        }

        Command::Next(_) => {
            debugger.step(StepKind::Over);
            server.respond(success(req.seq, ResponseBody::Next))?;
        }

        Command::StepIn(_) => {
            debugger.step(StepKind::In);
            server.respond(success(req.seq, ResponseBody::StepIn))?;
        }

        Command::StepOut(_) => {
            debugger.step(StepKind::Out);
            server.respond(success(req.seq, ResponseBody::StepOut))?;
        }

        Command::Pause(_) => {
            debugger.request_pause();
            server.respond(success(req.seq, ResponseBody::Pause))?;
        }

        Command::Source(source_args) => {
            let path = source_args
                .source
                .as_ref()
                .and_then(|s| s.path.as_ref())
                .ok_or_else(|| anyhow::anyhow!("source request without a path"))?;
            let content = std::fs::read_to_string(path)?;
            server.respond(success(
                req.seq,
                ResponseBody::Source(SourceResponse { content, mime_type: None }),
            ))?;
        }

        Command::Terminate(_) => {
            // Wakes the parked debuggee (if any) and lets it unwind on its
            // own; the debuggee thread's completion is what actually emits
            // `terminated`/`exited` (see `spawn_debuggee`), so this doesn't
            // send them itself and risk a duplicate.
            debugger.request_terminate();
            server.respond(success(req.seq, ResponseBody::Terminate))?;
        }

        Command::Disconnect(_) => {
            debugger.request_terminate();
            cancel_debuggee(debuggee);
            server.respond(success(req.seq, ResponseBody::Disconnect))?;
            return Ok(ControlFlow::Disconnect);
        }

        _ => {
            log::warn!("unknown command: {:?}", req.command);
            server.respond(Response {
                request_seq: req.seq,
                success: false,
                message: Some(ResponseMessage::Error("unknown command".to_string())),
                body: None,
                error: None,
            })?;
        }
    }

    Ok(ControlFlow::Continue)
}

/// Joins the spawned debuggee thread, bounded by a grace period per
/// spec.md §5: a debuggee wedged somewhere other than the stop hook (e.g. a
/// long-running builtin) is abandoned rather than hung onto forever — the
/// reaper thread outlives us in that case, which is fine, the process is
/// exiting anyway in single-session mode or moving on to the next
/// connection otherwise. Called both when the client sends `disconnect` and
/// when the transport is lost without one (spec.md §4.4's "connection lost"
/// row requires the same cancel-and-join, not just dropping the session).
fn cancel_debuggee(debuggee: &mut Option<Debuggee>) {
    let Some(mut d) = debuggee.take() else { return };
    let Some(join) = d.join.take() else { return };
    let (done_tx, done_rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = join.join();
        let _ = done_tx.send(());
    });
    if done_rx.recv_timeout(DISCONNECT_GRACE_PERIOD).is_err() {
        log::warn!("debuggee task did not unwind within the disconnect grace period; abandoning it");
    }
}

fn success(seq: i64, body: ResponseBody) -> Response {
    Response {
        request_seq: seq,
        success: true,
        message: None,
        body: Some(body),
        error: None,
    }
}

fn render(value: &Value) -> String {
    value.render()
}

/// Parses `program`'s source text to recover the set of lines that carry an
/// executable statement, used to verify requested breakpoint lines against
/// the same notion of "executable" the interpreter's stop predicate uses.
/// `None` (rather than propagating a parse error here) lets `setBreakpoints`
/// fall back to optimistic acceptance — a source that fails to parse will
/// fail loudly anyway once the debuggee thread tries to run it.
fn executable_lines(program: &ProgramSource) -> Option<std::collections::BTreeSet<u32>> {
    let text = match program {
        ProgramSource::Eval { source, .. } => source.clone(),
        ProgramSource::EvalPath(path) => std::fs::read_to_string(path).ok()?,
    };
    crate::lang::parser::parse(&text).ok().map(|p| p.executable_lines())
}

/// `launch`/`attach`'s `program` field is optional — the original CLI
/// surface (spec.md §6's positional `<script-path>`) is the fallback so
/// `langdap prog.x` still works without a client that sends it explicitly.
fn resolve_program_path(requested: Option<&str>, args: &Args) -> anyhow::Result<PathBuf> {
    match requested {
        Some(p) => Ok(PathBuf::from(p)),
        None if !args.script_path.as_os_str().is_empty() => Ok(args.script_path.clone()),
        None => Err(anyhow::anyhow!(
            "launch arguments carry no `program` and no script path was given on the command line"
        )),
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_debuggee<W: Write + Send + 'static>(
    program: &ProgramSource,
    flags: FeatureFlags,
    auto_import: bool,
    program_args: Vec<String>,
    debugger: &Arc<Debugger>,
    output: Arc<Mutex<ServerOutput<W>>>,
    registry: Arc<Mutex<VariableRegistry>>,
    debuggee: &mut Option<Debuggee>,
) -> anyhow::Result<()> {
    let program = program.clone();
    let debugger = debugger.clone();
    let events: Arc<dyn DebugeeEvents> = Arc::new(EventSink { output, registry });

    debugger.set_state(SessionState::Configured);

    let join = std::thread::spawn(move || {
        let terminal_events = events.clone();
        let hook: Arc<dyn crate::lang::StopHook> = Arc::new(Hook { debugger: debugger.clone(), events });
        let run = std::panic::AssertUnwindSafe(|| -> Result<(), InterpError> {
            let mut interp = adapter::build_interpreter(&program, &flags, auto_import, &program_args, hook)?;
            interp.run()
        });
        let exit_code = match std::panic::catch_unwind(run) {
            Ok(Ok(())) => 0,
            Ok(Err(e)) => {
                log::error!("debuggee exited with error: {e}");
                1
            }
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "debuggee panicked".to_string());
                log::error!("debuggee panicked: {msg}");
                1
            }
        };
        debugger.request_terminate();
        terminal_events.on_terminated(exit_code);
    });

    *debuggee = Some(Debuggee { join: Some(join) });
    Ok(())
}

fn capabilities() -> Capabilities {
    Capabilities {
        supports_configuration_done_request: Some(true),
        supports_set_variable: Some(true),
        supports_evaluate_for_hovers: Some(true),
        supports_terminate_request: Some(true),
        supports_function_breakpoints: Some(true),
        ..Default::default()
    }
}
