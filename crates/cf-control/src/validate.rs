//! Configuration-time checks on a set of loop specs.

use crate::control_loop::LoopSpec;
use crate::error::{ControlError, ControlResult};
use std::collections::HashMap;

/// No two loops may drive the same actuator variable. Checked once when
/// the plant config is loaded, not at runtime.
pub fn check_exclusive_actuators(specs: &[LoopSpec]) -> ControlResult<()> {
    let mut claimed: HashMap<&str, &str> = HashMap::new();
    for spec in specs {
        if let Some(first) = claimed.insert(&spec.control_var, &spec.name) {
            return Err(ControlError::DuplicateActuator {
                var: spec.control_var.clone(),
                first: first.to_string(),
                second: spec.name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, ctrl: &str) -> LoopSpec {
        LoopSpec {
            name: name.to_string(),
            control_var: ctrl.to_string(),
            target_var: "PUR:CRY:TS510:RDTEMPK".to_string(),
            preconditions: Default::default(),
            zero_on_disable: false,
            ctrl_safe_value: None,
            panic: None,
            defaults: Default::default(),
            limits: Default::default(),
        }
    }

    #[test]
    fn distinct_actuators_pass() {
        let specs = [
            spec("a", "PUR:HE3:HTR105:CUR"),
            spec("b", "PUR:HE3:HTR107:CUR"),
        ];
        assert!(check_exclusive_actuators(&specs).is_ok());
    }

    #[test]
    fn shared_actuator_rejected() {
        let specs = [
            spec("a", "PUR:HE3:HTR105:CUR"),
            spec("b", "PUR:HE3:HTR105:CUR"),
        ];
        let err = check_exclusive_actuators(&specs).unwrap_err();
        assert!(matches!(err, ControlError::DuplicateActuator { .. }));
    }
}
