//! NDJSON interpreter for the agent's stream-json protocol.
//!
//! This module parses newline-delimited JSON captured from the agent's
//! stdout and selects the terminal result event.

mod parser;
mod types;

pub use parser::{ERROR_MARKER, InterpretError, interpret, parse_line};
pub use types::*;
