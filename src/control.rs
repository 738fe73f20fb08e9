//! Inbound control channel.
//!
//! The control surface is an external collaborator: it sends
//! `{"set": {..}}` messages, one JSON object per line, and receives no
//! acknowledgement. A background thread parses and forwards patches; the
//! frame loop drains them non-blockingly before each step.

use std::io::BufRead;
use std::sync::mpsc;
use std::thread;

use serde::Deserialize;

use crate::params::ParamPatch;

/// Wire format of a control message
#[derive(Debug, Deserialize)]
pub struct ControlMessage {
    pub set: ParamPatch,
}

/// Spawn the stdin listener. Malformed lines are logged and skipped; they
/// never reach the parameter store.
pub fn spawn_stdin_listener() -> mpsc::Receiver<ParamPatch> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::warn!("Control channel read error: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ControlMessage>(&line) {
                Ok(message) => {
                    if tx.send(message.set).is_err() {
                        break; // Frame loop is gone
                    }
                }
                Err(e) => log::warn!("Ignoring malformed control message: {e}"),
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_message_wire_format() {
        let message: ControlMessage =
            serde_json::from_str(r#"{"set": {"speed": 2.0, "text": "hello"}}"#).unwrap();
        assert_eq!(message.set.speed, Some(2.0));
        assert_eq!(message.set.text.as_deref(), Some("hello"));
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        // A newer control surface may send fields this build doesn't know
        let message: ControlMessage =
            serde_json::from_str(r#"{"set": {"volume": 0.5, "future_knob": 1.0}}"#).unwrap();
        assert_eq!(message.set.volume, Some(0.5));
    }
}
