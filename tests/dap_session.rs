//! End-to-end coverage of a debug session over the wire: one real
//! `langdap --mode net` process per test, driven through the same
//! handshake order a real client (e.g. an editor) would use.

mod support;

use serde_json::json;
use support::{write_script, Session};

#[test]
fn stop_on_entry_then_continue_to_completion() -> anyhow::Result<()> {
    let (_guard, path) = write_script(
        "let x := 1;\n\
         print x;\n",
    );
    let mut session = Session::start()?;
    session.handshake(
        json!({"program": path.display().to_string(), "stopOnEntry": true}),
        &[],
    )?;

    let stopped = session.client.wait_for_event("stopped")?;
    assert_eq!(stopped["body"]["reason"], "entry");

    session.client.request("continue", json!({}))?;

    let output = session.client.wait_for_event("output")?;
    assert_eq!(output["body"]["output"], "1");

    session.client.wait_for_event("terminated")?;
    session.client.wait_for_event("exited")?;
    Ok(())
}

#[test]
fn line_breakpoint_stops_then_evaluate_and_set_variable() -> anyhow::Result<()> {
    let (_guard, path) = write_script(
        "let x := 1;\n\
         let y := 2;\n\
         let z := x + y;\n\
         print z;\n",
    );
    let mut session = Session::start()?;
    let source = path.display().to_string();
    let resolved = session.handshake(
        json!({"program": source, "stopOnEntry": false}),
        &[(source.as_str(), &[3])],
    )?;
    let breakpoints = resolved[0]["breakpoints"].as_array().unwrap();
    assert_eq!(breakpoints.len(), 1);
    assert_eq!(breakpoints[0]["verified"], true);

    let stopped = session.client.wait_for_event("stopped")?;
    assert_eq!(stopped["body"]["reason"], "breakpoint");

    let threads = session.client.request("threads", json!({}))?;
    let thread_id = threads["threads"][0]["id"].as_i64().unwrap();
    let stack = session.client.request("stackTrace", json!({"threadId": thread_id}))?;
    let frame_id = stack["stackFrames"][0]["id"].as_i64().unwrap();
    assert_eq!(stack["stackFrames"][0]["line"], 3);

    let eval = session.client.request(
        "evaluate",
        json!({"expression": "x", "frameId": frame_id, "context": "watch"}),
    )?;
    assert_eq!(eval["result"], "1");

    let scopes = session.client.request("scopes", json!({"frameId": frame_id}))?;
    let locals_ref = scopes["scopes"][0]["variablesReference"].as_i64().unwrap();
    assert_ne!(locals_ref, 0, "a frame with bindings gets a real scope handle");

    let set = session.client.request(
        "setVariable",
        json!({"variablesReference": locals_ref, "name": "x", "value": "10"}),
    )?;
    assert_eq!(set["value"], "10");

    session.client.request("continue", json!({}))?;

    let output = session.client.wait_for_event("output")?;
    assert_eq!(output["body"]["output"], "12");

    session.client.wait_for_event("terminated")?;
    Ok(())
}

#[test]
fn step_over_call_does_not_stop_inside_callee() -> anyhow::Result<()> {
    let (_guard, path) = write_script(
        "fn add(a, b) {\n\
         return a + b;\n\
         }\n\
         let x := add(1, 2);\n\
         print x;\n",
    );
    let mut session = Session::start()?;
    let source = path.display().to_string();
    session.handshake(
        json!({"program": source, "stopOnEntry": false}),
        &[(source.as_str(), &[4])],
    )?;

    let stopped = session.client.wait_for_event("stopped")?;
    assert_eq!(stopped["body"]["reason"], "breakpoint");
    let stack = session.client.request("threads", json!({}))?;
    let thread_id = stack["threads"][0]["id"].as_i64().unwrap();

    session.client.request("next", json!({"threadId": thread_id}))?;
    let stopped = session.client.wait_for_event("stopped")?;
    assert_eq!(stopped["body"]["reason"], "step");

    let stack = session.client.request("stackTrace", json!({"threadId": thread_id}))?;
    assert_eq!(stack["stackFrames"][0]["line"], 5);
    assert_eq!(stack["stackFrames"].as_array().unwrap().len(), 1);

    session.client.request("continue", json!({}))?;
    let output = session.client.wait_for_event("output")?;
    assert_eq!(output["body"]["output"], "3");
    Ok(())
}

#[test]
fn evaluate_inside_a_called_frame() -> anyhow::Result<()> {
    let (_guard, path) = write_script(
        "fn add(a, b) {\n\
         return a + b;\n\
         }\n\
         let x := add(1, 2);\n\
         print x;\n",
    );
    let mut session = Session::start()?;
    let source = path.display().to_string();
    session.handshake(
        json!({"program": source, "stopOnEntry": false}),
        &[(source.as_str(), &[2])],
    )?;

    session.client.wait_for_event("stopped")?;
    let threads = session.client.request("threads", json!({}))?;
    let thread_id = threads["threads"][0]["id"].as_i64().unwrap();
    let stack = session.client.request("stackTrace", json!({"threadId": thread_id}))?;
    let frames = stack["stackFrames"].as_array().unwrap();
    assert_eq!(frames.len(), 2, "expected the call frame plus top-level");
    let frame_id = frames[0]["id"].as_i64().unwrap();

    let eval = session.client.request(
        "evaluate",
        json!({"expression": "a + b", "frameId": frame_id, "context": "watch"}),
    )?;
    assert_eq!(eval["result"], "3");
    Ok(())
}

#[test]
fn breakpoint_on_blank_line_is_unverified_once_program_is_loaded() -> anyhow::Result<()> {
    let (_guard, path) = write_script(
        "let x := 1;\n\
         \n\
         print x;\n",
    );
    let mut session = Session::start()?;
    let source = path.display().to_string();

    session.client.request("initialize", json!({"adapterID": "langdap"}))?;
    session.client.request("launch", json!({"program": source, "stopOnEntry": false}))?;
    session.client.wait_for_event("initialized")?;

    let resolved = session.client.request(
        "setBreakpoints",
        json!({"source": {"path": source}, "breakpoints": [{"line": 2}, {"line": 1}]}),
    )?;
    let breakpoints = resolved["breakpoints"].as_array().unwrap();
    assert_eq!(breakpoints[0]["verified"], false, "blank line has no statement");
    assert_eq!(breakpoints[1]["verified"], true, "line 1 carries a statement");

    session.client.request("configurationDone", json!({}))?;
    // Line 1 resolved to a verified breakpoint, so it fires before the
    // program can run to completion.
    let stopped = session.client.wait_for_event("stopped")?;
    assert_eq!(stopped["body"]["reason"], "breakpoint");
    session.client.request("continue", json!({}))?;
    session.client.wait_for_event("terminated")?;
    Ok(())
}

#[test]
fn breakpoints_set_before_launch_are_accepted_optimistically() -> anyhow::Result<()> {
    let mut session = Session::start()?;
    session.client.request("initialize", json!({"adapterID": "langdap"}))?;

    let resolved = session.client.request(
        "setBreakpoints",
        json!({"source": {"path": "not-yet-loaded.lang"}, "breakpoints": [{"line": 42}]}),
    )?;
    let breakpoints = resolved["breakpoints"].as_array().unwrap();
    assert_eq!(
        breakpoints[0]["verified"], true,
        "no program is loaded yet, so verification is deferred rather than rejected"
    );
    Ok(())
}
