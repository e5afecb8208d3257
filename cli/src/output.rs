//! Terminal output for events and results: compact human lines, or enveloped
//! JSON lines (task_id, node, iteration, event_id, timestamp) when requested.

use stream_event::{to_json, EnvelopeState};

use strand::stream::ProtocolEvent;
use strand::WorkflowResult;

/// Prints one progress event as an enveloped JSON line.
pub fn print_event_json(event: &ProtocolEvent, envelope: &mut EnvelopeState) {
    // Keep the envelope's node/iteration span in step with the engine.
    if let ProtocolEvent::NodeExecuted {
        node, iteration, ..
    } = event
    {
        envelope.enter_node(node.clone(), *iteration);
    }
    match to_json(event, envelope) {
        Ok(value) => println!("{value}"),
        Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
    }
}

/// Prints one progress event as a short human line.
pub fn print_event_human(event: &ProtocolEvent) {
    match event {
        ProtocolEvent::WorkflowStart { task, domain, .. } => {
            println!("▶ [{domain}] {task}");
        }
        ProtocolEvent::Classification {
            domain, confidence, ..
        } => {
            println!("  classified as {domain} (confidence {confidence:.2})");
        }
        ProtocolEvent::PlanCreated { plan, .. } => {
            let steps = plan
                .get("steps")
                .and_then(|s| s.as_array())
                .map(|a| a.len())
                .unwrap_or(0);
            println!("  plan created ({steps} steps)");
        }
        ProtocolEvent::ActionDecided {
            action, iteration, ..
        } => {
            println!("  [{iteration}] → {action}");
        }
        ProtocolEvent::ToolExecuted {
            tool,
            success,
            error,
            ..
        } => {
            if *success {
                println!("  [{tool}] ok");
            } else {
                println!("  [{tool}] failed: {}", error.as_deref().unwrap_or("?"));
            }
        }
        ProtocolEvent::SubTaskStart {
            subtask_id,
            agent_name,
        } => {
            println!("  ⇢ subtask {subtask_id} ({agent_name})");
        }
        ProtocolEvent::SubTaskComplete {
            subtask_id,
            success,
            duration_seconds,
        } => {
            let mark = if *success { "✓" } else { "✗" };
            println!("  {mark} subtask {subtask_id} ({duration_seconds:.1}s)");
        }
        ProtocolEvent::WorkflowError {
            error_type,
            message,
        } => {
            eprintln!("✗ {error_type}: {message}");
        }
        // Node transitions, chunks, and completion are quiet in human mode;
        // the final result is printed separately.
        _ => {}
    }
}

/// Prints the final result and returns the message for history storage.
pub fn print_result(result: &WorkflowResult, json: bool) -> String {
    if json {
        let value = serde_json::json!({
            "success": result.success,
            "output": result.output,
            "error": result.error,
            "iterations": result.iterations,
        });
        println!("{value}");
    } else if result.success {
        println!(
            "✓ done in {} iteration(s)\n{}",
            result.iterations,
            result.output.as_deref().unwrap_or("")
        );
    } else {
        eprintln!(
            "✗ failed after {} iteration(s): {}",
            result.iterations,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    result
        .output
        .clone()
        .or_else(|| result.error.clone())
        .unwrap_or_default()
}
