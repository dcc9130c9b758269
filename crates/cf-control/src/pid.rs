//! Discrete PID with clamped integral and on-measurement variants.
//!
//! The proportional and derivative terms can each act on the measurement
//! instead of the error, which removes proportional kick and derivative
//! kick on setpoint changes. The integral is clamped to the output limits
//! as anti-windup, and the whole output is clamped again on the way out.

use crate::error::{ControlError, ControlResult};

#[derive(Debug, Clone)]
pub struct Pid {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub setpoint: f64,
    out_low: f64,
    out_high: f64,
    pub proportional_on_measurement: bool,
    pub derivative_on_measurement: bool,
    // accumulated p-term, only used in on-measurement mode
    proportional: f64,
    integral: f64,
    last_input: Option<f64>,
    last_error: Option<f64>,
}

impl Pid {
    pub fn new(kp: f64, ki: f64, kd: f64, setpoint: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint,
            out_low: f64::NEG_INFINITY,
            out_high: f64::INFINITY,
            proportional_on_measurement: false,
            derivative_on_measurement: false,
            proportional: 0.0,
            integral: 0.0,
            last_input: None,
            last_error: None,
        }
    }

    pub fn set_output_limits(&mut self, low: f64, high: f64) -> ControlResult<()> {
        if low >= high {
            return Err(ControlError::InvalidArg {
                what: "output_limit_low must be less than output_limit_high",
            });
        }
        self.out_low = low;
        self.out_high = high;
        self.integral = self.integral.clamp(low, high);
        Ok(())
    }

    pub fn output_limits(&self) -> (f64, f64) {
        (self.out_low, self.out_high)
    }

    /// Clear accumulated history and park the output at `starting_output`,
    /// so control resumes from where the actuator currently sits rather
    /// than slewing from zero.
    pub fn reset(&mut self, starting_output: f64) {
        self.proportional = 0.0;
        self.last_input = None;
        self.last_error = None;
        self.integral = starting_output.clamp(self.out_low, self.out_high);
    }

    /// One controller step: `input` is the measured value, `dt` the time
    /// since the previous step in seconds.
    pub fn update(&mut self, input: f64, dt: f64) -> f64 {
        let error = self.setpoint - input;
        let d_input = input - self.last_input.unwrap_or(input);
        let d_error = error - self.last_error.unwrap_or(error);

        if self.proportional_on_measurement {
            self.proportional -= self.kp * d_input;
        } else {
            self.proportional = self.kp * error;
        }

        if dt > 0.0 {
            self.integral += self.ki * error * dt;
        }
        self.integral = self.integral.clamp(self.out_low, self.out_high);

        let derivative = if dt > 0.0 {
            if self.derivative_on_measurement {
                -self.kd * d_input / dt
            } else {
                self.kd * d_error / dt
            }
        } else {
            0.0
        };

        self.last_input = Some(input);
        self.last_error = Some(error);

        (self.proportional + self.integral + derivative).clamp(self.out_low, self.out_high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn pure_proportional_tracks_error() {
        let mut pid = Pid::new(2.0, 0.0, 0.0, 10.0);
        assert_eq!(pid.update(4.0, 1.0), 12.0);
        assert_eq!(pid.update(10.0, 1.0), 0.0);
    }

    #[test]
    fn integral_accumulates_and_clamps() {
        let mut pid = Pid::new(0.0, 1.0, 0.0, 1.0);
        pid.set_output_limits(0.0, 3.0).unwrap();
        assert_eq!(pid.update(0.0, 1.0), 1.0);
        assert_eq!(pid.update(0.0, 1.0), 2.0);
        assert_eq!(pid.update(0.0, 1.0), 3.0);
        // Saturated: further steps cannot push past the limit.
        assert_eq!(pid.update(0.0, 10.0), 3.0);
    }

    #[test]
    fn reset_parks_output_at_actuator_position() {
        let mut pid = Pid::new(0.0, 1.0, 0.0, 5.0);
        pid.set_output_limits(0.0, 100.0).unwrap();
        pid.reset(40.0);
        // First step barely moves from the starting output.
        let out = pid.update(5.0, 0.1);
        assert!((out - 40.0).abs() < 1e-12);
    }

    #[test]
    fn derivative_on_measurement_has_no_setpoint_kick() {
        let mut pid = Pid::new(0.0, 0.0, 1.0, 0.0);
        pid.derivative_on_measurement = true;
        pid.update(5.0, 1.0);
        // Setpoint jumps; measurement is steady, so no derivative spike.
        pid.setpoint = 100.0;
        assert_eq!(pid.update(5.0, 1.0), 0.0);
    }

    #[test]
    fn proportional_on_measurement_accumulates() {
        let mut pid = Pid::new(1.0, 0.0, 0.0, 0.0);
        pid.proportional_on_measurement = true;
        assert_eq!(pid.update(3.0, 1.0), 0.0); // no history yet
        assert_eq!(pid.update(5.0, 1.0), -2.0);
        assert_eq!(pid.update(4.0, 1.0), -1.0);
    }

    #[test]
    fn degenerate_limits_rejected() {
        let mut pid = Pid::new(1.0, 0.0, 0.0, 0.0);
        assert!(pid.set_output_limits(5.0, 5.0).is_err());
    }

    proptest! {
        #[test]
        fn output_always_within_limits(
            kp in -100.0..100.0f64,
            ki in -100.0..100.0f64,
            kd in -100.0..100.0f64,
            setpoint in -1000.0..1000.0f64,
            inputs in proptest::collection::vec(-1000.0..1000.0f64, 1..50),
            dt in 0.01..60.0f64,
        ) {
            let mut pid = Pid::new(kp, ki, kd, setpoint);
            pid.set_output_limits(-50.0, 50.0).unwrap();
            for input in inputs {
                let out = pid.update(input, dt);
                prop_assert!((-50.0..=50.0).contains(&out));
            }
        }
    }
}
