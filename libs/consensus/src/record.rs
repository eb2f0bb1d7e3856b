//! Durable record codec
//!
//! The durable log is UTF-8 text, one JSON object per line. Two schemas
//! exist: a vote decision and a replicated entry. The `term` field of a
//! record is the term under which the line was written locally, which for
//! an entry may exceed its `spawn_term` when a follower accepts it later.

use crate::types::{LogIndex, NodeId, Term};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of the durable log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Record {
    /// The node granted its vote to `candidate` in `term`
    Vote {
        term: Term,
        #[serde(rename = "for")]
        candidate: NodeId,
    },

    /// A replicated log entry
    Entry {
        term: Term,
        spawn_term: Term,
        index: LogIndex,
        action: Value,
    },
}

impl Record {
    /// The term under which this record was written
    pub fn term(&self) -> Term {
        match self {
            Record::Vote { term, .. } => *term,
            Record::Entry { term, .. } => *term,
        }
    }

    /// Serialize to a single log line, without the trailing newline
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a single newline-stripped log line
    pub fn from_line(line: &str) -> Result<Record, serde_json::Error> {
        serde_json::from_str(line)
    }
}
