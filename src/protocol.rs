//! Internal state <-> `dap` crate type mapping.
//!
//! Keeps [`crate::session`] free of DAP-spec trivia: how a [`StopReason`]
//! renders as a `StoppedEventBody`, how a [`ScopeKind`] renders as a
//! `Scope`, and so on. Nothing here talks to a socket or a thread.
//!
//! Unknown or not-yet-implemented commands are never fatal to the
//! connection — `dap::responses::ResponseMessage::Cancelled` is a
//! well-formed `success: false` response, the shape the dispatcher falls
//! back to for a command it doesn't recognize.

use dap::events::{Event, OutputEventBody, StoppedEventBody, ThreadEventBody};
use dap::types::{OutputEventCategory, Scope, ScopePresentationhint, Source, StoppedEventReason, Thread, ThreadEventReason};

use crate::debugger::{ScopeKind, StopReason};
use crate::sourcemap::SourceMap;
use crate::variables::VarRef;

pub const MAIN_THREAD_ID: i64 = 1;

pub fn stopped_event(reason: &StopReason) -> Event {
    let (reason_kind, hit_ids, text) = match reason {
        StopReason::Entry => (StoppedEventReason::Entry, None, None),
        StopReason::Breakpoint(ids) => (
            StoppedEventReason::Breakpoint,
            Some(ids.clone()),
            None,
        ),
        StopReason::Step => (StoppedEventReason::Step, None, None),
        StopReason::Pause => (StoppedEventReason::Pause, None, None),
        StopReason::Exception(msg) => (StoppedEventReason::Exception, None, Some(msg.clone())),
    };
    Event::Stopped(StoppedEventBody {
        reason: reason_kind,
        description: None,
        thread_id: Some(MAIN_THREAD_ID),
        preserve_focus_hint: None,
        text,
        all_threads_stopped: Some(true),
        hit_breakpoint_ids: hit_ids,
    })
}

pub fn thread_event(started: bool) -> Event {
    Event::Thread(ThreadEventBody {
        reason: if started {
            ThreadEventReason::Started
        } else {
            ThreadEventReason::Exited
        },
        thread_id: MAIN_THREAD_ID,
    })
}

pub fn output_event(category: OutputEventCategory, line: impl Into<String>) -> Event {
    Event::Output(OutputEventBody {
        category: Some(category),
        output: line.into(),
        ..Default::default()
    })
}

pub fn main_thread() -> Thread {
    Thread { id: MAIN_THREAD_ID, name: "main".to_string() }
}

/// Packs `(frame_depth, scope)` into the DAP `frameId`/`variablesReference`
/// pair the client round-trips back to us: `scopes` is always called with a
/// `frameId` the client got verbatim from `stackTrace`, so frame depth is
/// threaded through as the DAP frame id directly — frames are not
/// separately handle-allocated.
pub fn scope(kind: ScopeKind, reference: VarRef, source: &SourceMap, source_path: &str) -> Scope {
    let (name, hint) = match kind {
        ScopeKind::Local => ("Locals", ScopePresentationhint::Locals),
        ScopeKind::Closure => ("Closure", ScopePresentationhint::Locals),
        ScopeKind::Global => ("Globals", ScopePresentationhint::Locals),
    };
    Scope {
        name: name.to_string(),
        presentation_hint: Some(hint),
        variables_reference: reference as i64,
        expensive: false,
        source: Some(Source {
            path: Some(source.to_client_path(source_path)),
            ..Default::default()
        }),
        ..Default::default()
    }
}
