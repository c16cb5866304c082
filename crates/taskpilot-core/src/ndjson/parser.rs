//! NDJSON interpreter for agent stream-json output.
//!
//! Implements tolerant reader pattern: unknown fields ignored, unknown types
//! decoded as [`AgentEvent::Other`], undecodable lines skipped.

use tracing::trace;

use super::types::{AgentEvent, ResultEvent};
use crate::error::{Error, Result};

/// Literal marker the agent prints in plain-text failures.
pub const ERROR_MARKER: &str = "Error:";

/// Errors from interpreting a full output buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpretError {
    #[error("{detail}")]
    NoResultFound { detail: String },
}

/// Parse a single NDJSON line from the agent's stdout.
pub fn parse_line(line: &str) -> Result<AgentEvent> {
    serde_json::from_str(line).map_err(|e| Error::NdjsonParse(e.to_string()))
}

/// Pick the terminal result out of a captured stdout buffer.
///
/// The last result-tagged event wins.
pub fn interpret(raw: &str) -> std::result::Result<ResultEvent, InterpretError> {
    let last = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match parse_line(line) {
            Ok(AgentEvent::Result(result)) => Some(result),
            Ok(_) => None,
            Err(e) => {
                trace!(error = %e, "skipping non-JSON output line");
                None
            }
        })
        .last();

    last.ok_or_else(|| {
        let detail = if raw.contains(ERROR_MARKER) {
            raw.trim().to_string()
        } else {
            "No result found in agent output".to_string()
        };
        InterpretError::NoResultFound { detail }
    })
}
