//! Refinement loop.
//!
//! - [`manager`] - the loop itself and its configuration
//! - [`repair`] - render-repair sub-loop
//! - [`limits`] - input validation and phase timeouts
//! - [`state`] - run outcome and termination types
//!
//! ```text
//!            ┌─────────────────────────────────────────────┐
//!            v                                             │
//!   ┌──────────────┐   ┌──────────┐   ┌──────┐   ┌─────────┴─┐
//!   │ Render       │──>│ Evaluate │──>│ Plan │──>│ Codegen   │
//!   │ (+ repair)   │   └────┬─────┘   └──────┘   └───────────┘
//!   └──────────────┘        │ fulfilled
//!                           v
//!                        Fulfilled
//! ```

pub mod limits;
pub mod manager;
mod repair;
pub mod state;

pub use limits::{validate_inputs, InputLimits, PhaseTimeouts};
pub use manager::{RefineConfig, RefinementLoop, RunOptions};
pub use state::{source_digest, AbortReason, RunOutcome, Termination};
