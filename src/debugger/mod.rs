//! Debugger core: the state machine over the debuggee interpreter. Owns
//! the breakpoint table, step mode, and stop reason, and implements
//! [`crate::lang::StopHook`] so the interpreter can be driven straight off
//! it.
//!
//! Concurrency: [`Debugger`] is shared (`Arc`) between the
//! dispatcher thread (which reacts to `continue`/`step`/`pause`/`evaluate`)
//! and the debuggee thread (which calls into [`Debugger::on_node`] from
//! inside the interpreter's tree walk and blocks there while `Stopped`).
//! The handoff is a single `Mutex<Shared>` plus one `Condvar`: the debuggee
//! thread waits on it both to be released back to `Running` and to notice a
//! pending `evaluate`/`setVariable` request, so the dispatcher never needs
//! a second rendezvous channel and the mutex is never held across I/O.

pub mod breakpoint;
pub mod step;

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};

use crate::lang::interp::{FrameInfo, FrameRequest, FrameResponse, InterpError, StopContext, StopHook};

pub use breakpoint::{Breakpoint, BreakpointTable};
pub use crate::lang::interp::ScopeKind;
pub use step::StepMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Configured,
    Running,
    Stopped,
    Terminated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Entry,
    Breakpoint(Vec<i64>),
    Step,
    Pause,
    Exception(String),
}

struct PendingRequest {
    id: u64,
    request: FrameRequest2,
}

/// An owned mirror of [`FrameRequest`] so it can cross the dispatcher →
/// debuggee handoff without borrowing the request's `&str` arguments past
/// the lifetime of the original DAP request.
enum FrameRequest2 {
    Eval { frame: usize, expr: String },
    Assign { frame: usize, name: String, expr: String },
}

enum RequestOutcome {
    Value(crate::lang::value::Value),
    Unit,
    Error(String),
}

struct Shared {
    session: SessionState,
    stop_reason: Option<StopReason>,
    step_mode: StepMode,
    pause_requested: bool,
    terminate_requested: bool,
    last_depth: Option<usize>,
    frames: Vec<FrameInfo>,
    pending_request: Option<PendingRequest>,
    request_outcome: Option<(u64, RequestOutcome)>,
    next_request_id: u64,
    function_breakpoints: HashSet<String>,
    exception_filters: HashSet<String>,
    announce_entry: bool,
    configuration_done: bool,
}

impl Default for Shared {
    fn default() -> Self {
        Shared {
            session: SessionState::Initializing,
            stop_reason: None,
            step_mode: StepMode::None,
            pause_requested: false,
            terminate_requested: false,
            last_depth: None,
            frames: Vec::new(),
            pending_request: None,
            request_outcome: None,
            next_request_id: 0,
            function_breakpoints: HashSet::new(),
            exception_filters: HashSet::new(),
            announce_entry: false,
            configuration_done: false,
        }
    }
}

/// The shared debugger core. One instance per session, wrapped in `Arc` and
/// installed as the interpreter's [`StopHook`].
pub struct Debugger {
    shared: Mutex<Shared>,
    cv: Condvar,
    breakpoints: Mutex<BreakpointTable>,
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

impl Debugger {
    pub fn new() -> Self {
        Debugger {
            shared: Mutex::new(Shared::default()),
            cv: Condvar::new(),
            breakpoints: Mutex::new(BreakpointTable::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().unwrap().session
    }

    pub fn set_state(&self, state: SessionState) {
        self.shared.lock().unwrap().session = state;
        self.cv.notify_all();
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.shared.lock().unwrap().stop_reason.clone()
    }

    /// Frames captured at the last stop. Only meaningful while `Stopped`;
    /// handles into them are invalidated by the variable registry's own
    /// epoch bump in the variable registry.
    pub fn frames(&self) -> Vec<FrameInfo> {
        self.shared.lock().unwrap().frames.clone()
    }

    pub fn breakpoints(&self) -> std::sync::MutexGuard<'_, BreakpointTable> {
        self.breakpoints.lock().unwrap()
    }

    pub fn set_function_breakpoints(&self, names: impl IntoIterator<Item = String>) {
        self.shared.lock().unwrap().function_breakpoints = names.into_iter().collect();
    }

    pub fn set_exception_filters(&self, filters: impl IntoIterator<Item = String>) {
        self.shared.lock().unwrap().exception_filters = filters.into_iter().collect();
    }

    /// Records that `configurationDone` has been processed and whether the
    /// client asked to stop at entry (`launch`'s `stopOnEntry`). Unblocks
    /// [`Debugger::wait_for_configuration`], which the debuggee thread parks
    /// in at its first statement until this call lands, so breakpoints set
    /// between `launch` and `configurationDone` are visible to the stop
    /// predicate's first evaluation and the `stopOnEntry` choice can't race
    /// the debuggee reaching that node first.
    pub fn configure(&self, stop_on_entry: bool) {
        let mut g = self.shared.lock().unwrap();
        g.announce_entry = stop_on_entry;
        g.configuration_done = true;
        self.cv.notify_all();
    }

    /// Blocks the debuggee thread until `configurationDone` has landed.
    /// Called only for the very first node a fresh debuggee thread visits;
    /// every later node finds `configuration_done` already true and returns
    /// immediately.
    fn wait_for_configuration(&self) {
        let mut g = self.shared.lock().unwrap();
        while !g.configuration_done && !g.terminate_requested {
            g = self.cv.wait(g).unwrap();
        }
    }

    pub fn request_pause(&self) {
        self.shared.lock().unwrap().pause_requested = true;
    }

    pub fn request_terminate(&self) {
        let mut g = self.shared.lock().unwrap();
        g.terminate_requested = true;
        self.cv.notify_all();
    }

    /// `continue`: clears step mode and releases the debuggee.
    pub fn resume(&self) {
        let mut g = self.shared.lock().unwrap();
        g.step_mode = StepMode::None;
        g.session = SessionState::Running;
        g.stop_reason = None;
        self.cv.notify_all();
    }

    /// `next`/`stepIn`/`stepOut`: anchors the step at the current depth and
    /// line, then releases the debuggee.
    pub fn step(&self, mode: StepKind) {
        let mut g = self.shared.lock().unwrap();
        let depth = g.frames.first().map(|f| f.depth).unwrap_or(0);
        let line = g.frames.first().map(|f| f.pos.line).unwrap_or(0);
        g.step_mode = match mode {
            StepKind::In => StepMode::In,
            StepKind::Over => StepMode::Over { anchor_depth: depth, anchor_line: line },
            StepKind::Out => StepMode::Out { anchor_depth: depth },
        };
        g.session = SessionState::Running;
        g.stop_reason = None;
        self.cv.notify_all();
    }

    /// Services an `evaluate`/`setVariable` request while the debuggee is
    /// parked in [`Self::on_node`]. Blocks until the debuggee thread answers.
    fn run_request(&self, request: FrameRequest2) -> Result<crate::lang::value::Value, InterpError> {
        let id = {
            let mut g = self.shared.lock().unwrap();
            let id = g.next_request_id;
            g.next_request_id += 1;
            g.pending_request = Some(PendingRequest { id, request });
            self.cv.notify_all();
            id
        };

        let mut g = self.shared.lock().unwrap();
        loop {
            if let Some((outcome_id, _)) = &g.request_outcome {
                if *outcome_id == id {
                    break;
                }
            }
            g = self.cv.wait(g).unwrap();
        }
        match g.request_outcome.take().unwrap().1 {
            RequestOutcome::Value(v) => Ok(v),
            RequestOutcome::Unit => Ok(crate::lang::value::Value::Unit),
            RequestOutcome::Error(e) => Err(InterpError::Other(e)),
        }
    }

    pub fn evaluate(&self, frame: usize, expr: &str) -> Result<crate::lang::value::Value, InterpError> {
        self.run_request(FrameRequest2::Eval { frame, expr: expr.to_string() })
    }

    pub fn assign(&self, frame: usize, name: &str, expr: &str) -> Result<(), InterpError> {
        self.run_request(FrameRequest2::Assign {
            frame,
            name: name.to_string(),
            expr: expr.to_string(),
        })
        .map(|_| ())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum StepKind {
    In,
    Over,
    Out,
}

/// Output and exception events surfacing from the debuggee thread, handed
/// to the session via a channel rather than a callback so the `StopHook`
/// methods below stay free of any dependency on the `dap` crate.
pub trait DebugeeEvents: Send + Sync {
    fn on_stopped(&self, reason: StopReason);
    fn on_output(&self, line: &str);
    fn on_exception(&self, message: &str);
    /// The debuggee thread has returned (cleanly, on an uncaught error, or
    /// on a panic) and will never execute another node. `exit_code` is 0 on
    /// a clean return, nonzero otherwise.
    fn on_terminated(&self, exit_code: i64);
}

/// Wraps a [`Debugger`] together with an event sink, implementing
/// [`StopHook`] — this is the seam the stop-predicate decision order is
/// actually implemented at.
pub struct Hook {
    pub debugger: Arc<Debugger>,
    pub events: Arc<dyn DebugeeEvents>,
}

impl StopHook for Hook {
    fn on_node(&self, mut ctx: StopContext<'_>) {
        {
            let mut g = self.debugger.shared.lock().unwrap();
            g.frames = ctx.frames.to_vec();
        }

        // The very first node a fresh debuggee thread visits doubles as the
        // rendezvous with `configurationDone`: block here so breakpoints set
        // between `launch` and `configurationDone` are already in the table
        // by the time `decide` evaluates this node, rather than racing them.
        let first_node = self.debugger.shared.lock().unwrap().last_depth.is_none();
        if first_node {
            self.debugger.wait_for_configuration();
        }

        if let Some(reason) = self.decide(&ctx, first_node) {
            self.enter_stopped(reason.clone());
            self.events.on_stopped(reason);
            self.park_until_resumed(&mut ctx);
        }
    }

    fn should_terminate(&self) -> bool {
        self.debugger.shared.lock().unwrap().terminate_requested
    }

    fn on_output(&self, line: &str) {
        self.events.on_output(line);
    }

    fn on_exception(&self, message: &str) {
        self.events.on_exception(message);
    }
}

impl Hook {
    /// Stop-predicate decision order: 1. pause flag, 2. breakpoint match,
    /// 3. step predicate, else continue — with one addition for the first
    /// node of a fresh debuggee thread (`first_node`): if nothing else
    /// claimed the stop, fall back to `Entry` when `stopOnEntry` was set.
    /// A breakpoint on the program's very first line still reports
    /// `Breakpoint`, not `Entry` — `Entry` is strictly the "nothing else
    /// fired" fallback, never a higher-priority reason.
    fn decide(&self, ctx: &StopContext<'_>, first_node: bool) -> Option<StopReason> {
        let mut g = self.debugger.shared.lock().unwrap();

        if g.pause_requested {
            g.pause_requested = false;
            g.last_depth = Some(ctx.depth);
            return Some(StopReason::Pause);
        }

        let entering_frame = !first_node && ctx.depth > g.last_depth.unwrap_or(ctx.depth);
        g.last_depth = Some(ctx.depth);

        if entering_frame {
            if let Some(top) = ctx.frames.first() {
                if g.function_breakpoints.contains(&top.name) {
                    return Some(StopReason::Breakpoint(vec![]));
                }
            }
        }

        let stop_on_entry = g.announce_entry;
        drop(g);

        let hits = self.debugger.breakpoints.lock().unwrap().hits(ctx.source, ctx.pos.line);
        if !hits.is_empty() {
            return Some(StopReason::Breakpoint(hits));
        }

        if first_node {
            return stop_on_entry.then_some(StopReason::Entry);
        }

        let g = self.debugger.shared.lock().unwrap();
        if g.step_mode.satisfied(ctx.depth, ctx.pos.line) {
            return Some(StopReason::Step);
        }

        None
    }

    fn enter_stopped(&self, reason: StopReason) {
        let mut g = self.debugger.shared.lock().unwrap();
        g.session = SessionState::Stopped;
        g.stop_reason = Some(reason);
        self.debugger.cv.notify_all();
    }

    /// Blocks the debuggee thread until the session resumes, answering any
    /// `evaluate`/`setVariable` requests that arrive in the meantime.
    fn park_until_resumed(&self, ctx: &mut StopContext<'_>) {
        let mut g = self.debugger.shared.lock().unwrap();
        loop {
            if g.terminate_requested || g.session == SessionState::Running {
                return;
            }
            if let Some(pending) = g.pending_request.take() {
                drop(g);
                let outcome = service_request(ctx, pending.request);
                g = self.debugger.shared.lock().unwrap();
                g.request_outcome = Some((pending.id, outcome));
                self.debugger.cv.notify_all();
                continue;
            }
            g = self.debugger.cv.wait(g).unwrap();
        }
    }
}

fn service_request(ctx: &mut StopContext<'_>, request: FrameRequest2) -> RequestOutcome {
    let result = match request {
        FrameRequest2::Eval { frame, expr } => (ctx.request)(FrameRequest::Eval { frame, expr: &expr }),
        FrameRequest2::Assign { frame, name, expr } => {
            (ctx.request)(FrameRequest::Assign { frame, name: &name, expr: &expr })
        }
    };
    match result {
        Ok(FrameResponse::Value(v)) => RequestOutcome::Value(v),
        Ok(FrameResponse::Unit) => RequestOutcome::Unit,
        Err(e) => RequestOutcome::Error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_clears_step_mode_and_reason() {
        let dbg = Debugger::new();
        dbg.set_state(SessionState::Stopped);
        dbg.step(StepKind::In);
        assert_eq!(dbg.state(), SessionState::Running);
        dbg.resume();
        assert!(dbg.stop_reason().is_none());
    }
}
