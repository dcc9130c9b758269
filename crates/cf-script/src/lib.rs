//! cf-script: guarded plant procedures.
//!
//! A [`Script`] is a precondition checklist, an action body, and a
//! guaranteed safe-exit path, executed by [`execute`] against a
//! [`ScriptContext`]. Concrete purifier procedures live in [`purifier`].

pub mod checklist;
pub mod context;
pub mod error;
pub mod params;
pub mod purifier;
pub mod script;

pub use checklist::Checklist;
pub use context::ScriptContext;
pub use error::{ScriptError, ScriptResult};
pub use params::{ParamSet, PARAMSET_VERSION};
pub use script::{execute, Script, ScriptOutcome};
