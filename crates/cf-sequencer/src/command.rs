//! Operator command surface: `(command, argument)` in, `(status, message)`
//! out. Meant to sit behind an RPC shim; nothing here touches hardware.

use crate::error::SequencerError;
use crate::sequencer::Sequencer;
use cf_bus::Value;
use cf_script::ParamSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Failure,
}

/// Parse a bare JSON object (`{"temperature_k": 45}`) into a parameter
/// set. Nested values are rejected.
fn parse_params(text: &str) -> Result<ParamSet, SequencerError> {
    let bad = |why: &str| SequencerError::BadArg {
        arg: text.to_string(),
        why: why.to_string(),
    };
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|e| bad(&e.to_string()))?;
    let serde_json::Value::Object(map) = json else {
        return Err(bad("expected a JSON object of parameters"));
    };
    let mut params = ParamSet::new();
    for (key, val) in map {
        let value = match val {
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().ok_or_else(|| bad("unrepresentable number"))?),
            },
            serde_json::Value::String(s) => Value::Str(s),
            _ => return Err(bad("parameter values must be scalars")),
        };
        params.params.insert(key, value);
    }
    Ok(params)
}

fn parse_index(arg: &str) -> Result<usize, SequencerError> {
    arg.trim().parse().map_err(|_| SequencerError::BadArg {
        arg: arg.to_string(),
        why: "expected a queue index".to_string(),
    })
}

impl Sequencer {
    /// Dispatch one operator command. Never panics; every failure comes
    /// back as a status and a human-readable message.
    pub fn command(&mut self, cmd: &str, arg: &str) -> (CommandStatus, String) {
        let result = self.dispatch(cmd, arg);
        match result {
            Ok(msg) => (CommandStatus::Success, msg),
            Err(err) => (CommandStatus::Failure, err.to_string()),
        }
    }

    fn dispatch(&mut self, cmd: &str, arg: &str) -> Result<String, SequencerError> {
        match cmd {
            "add" => {
                let (name, rest) = match arg.split_once(char::is_whitespace) {
                    Some((name, rest)) => (name, rest.trim()),
                    None => (arg.trim(), ""),
                };
                let params = if rest.is_empty() {
                    ParamSet::new()
                } else {
                    parse_params(rest)?
                };
                self.add(name, params)?;
                Ok(format!("added {name}"))
            }
            "remove" => {
                let idx = parse_index(arg)?;
                self.remove(idx)?;
                Ok(format!("removed entry {idx}"))
            }
            "up" => {
                let idx = parse_index(arg)?;
                self.move_up(idx)?;
                Ok(format!("moved entry {idx} up"))
            }
            "down" => {
                let idx = parse_index(arg)?;
                self.move_down(idx)?;
                Ok(format!("moved entry {idx} down"))
            }
            "clear" => {
                self.clear()?;
                Ok("queue cleared".to_string())
            }
            "enable" => {
                self.enable()?;
                Ok("sequencer enabled".to_string())
            }
            "disable" => {
                self.disable();
                Ok("sequencer disabled".to_string())
            }
            _ => Err(SequencerError::BadArg {
                arg: cmd.to_string(),
                why: "unknown command".to_string(),
            }),
        }
    }
}
