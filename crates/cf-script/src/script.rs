//! The script trait and the activation wrapper.

use crate::checklist::Checklist;
use crate::context::ScriptContext;
use crate::error::{ScriptError, ScriptResult};
use cf_bus::AlarmClass;
use cf_core::Pacer;

/// One guarded plant procedure.
///
/// `run` is the action sequence; `safe_exit` is the minimal cleanup for
/// the current run state and must be a no-op (and idempotent) while
/// `run_state` is `None`. Scripts arm the run state as `run` passes the
/// point where cleanup becomes necessary, and clear it again once the
/// plant is in a state that needs none.
pub trait Script {
    fn name(&self) -> &'static str;

    /// Preconditions walked before `run`.
    fn checklist(&self) -> Checklist {
        Checklist::default()
    }

    /// Settings keys the sequencer captures into queue entries.
    fn param_names(&self) -> &'static [&'static str] {
        &[]
    }

    /// Which cleanup applies if the script stops now. `None` means none.
    fn run_state(&self) -> Option<&'static str> {
        None
    }

    fn run(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()>;

    /// Leave the plant safe for the current run state.
    fn safe_exit(&mut self, _cx: &ScriptContext, _pacer: &mut dyn Pacer) -> ScriptResult<()> {
        Ok(())
    }
}

/// How one activation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// Run one activation of a script: checklist, body, and the guaranteed
/// cleanup path.
///
/// On any failure the error is logged, `exit_with_error` is flagged
/// (cancellation excepted), and `safe_exit` runs if the run state is
/// armed. The enable flag is always cleared last; that is the completion
/// signal the sequencer watches.
pub fn execute(
    script: &mut dyn Script,
    cx: &ScriptContext,
    pacer: &mut dyn Pacer,
) -> ScriptOutcome {
    cx.log(&format!("Started {}", script.name()), false);
    cx.set_flag("exit_with_error", false);

    let result = script
        .checklist()
        .verify(cx.registry(), cx.sink(), cx.dry_run())
        .and_then(|()| script.run(cx, pacer));

    let outcome = match result {
        Ok(()) => {
            cx.log(&format!("Finished {}", script.name()), false);
            ScriptOutcome::Completed
        }
        Err(err) if err.is_cancellation() => {
            cx.log(&format!("{} was cancelled", script.name()), false);
            run_safe_exit(script, cx, pacer);
            ScriptOutcome::Cancelled
        }
        Err(err) => {
            let tag = match err {
                ScriptError::Unexpected(_) => "unexpected error in",
                _ => "error in",
            };
            cx.log(&format!("{tag} {}: {err}", script.name()), true);
            cx.sink()
                .alarm(script.name(), &err.to_string(), AlarmClass::Alarm);
            cx.set_flag("exit_with_error", true);
            run_safe_exit(script, cx, pacer);
            ScriptOutcome::Failed
        }
    };

    cx.set_flag("enabled", false);
    outcome
}

fn run_safe_exit(script: &mut dyn Script, cx: &ScriptContext, pacer: &mut dyn Pacer) {
    let Some(state) = script.run_state() else {
        return;
    };
    cx.log(
        &format!("Putting plant in a safe state for {} ({state})", script.name()),
        false,
    );
    if let Err(err) = script.safe_exit(cx, pacer) {
        cx.log(
            &format!("safe exit of {} failed: {err}", script.name()),
            true,
        );
    }
}
