//! Agent subprocess execution.

mod binary;
mod runner;

pub use binary::AgentBinary;
pub use runner::{AgentInvocation, FIXED_FLAGS, RunOutput, SubprocessRunner, Termination};
