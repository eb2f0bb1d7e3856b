//! Raft consensus engine for replicated state-machine daemons
//!
//! This library implements the consensus core of a replicated daemon: leader
//! election, log replication, and commit decisions across a small, statically
//! configured cluster of nodes identified by opaque string endpoints.
//!
//! # Features
//!
//! - Leader election with externally randomized timeouts
//! - Log replication with the Raft commit restriction
//! - A durable write-ahead log of JSON records, fsynced on every append
//! - Crash recovery by replaying the log; torn tail writes are discarded
//! - Idempotent handling of retried and out-of-order RPCs
//!
//! The engine performs no I/O besides its own log file. Network sends, timer
//! scheduling, and delivery of committed actions all go through the
//! [`Handlers`] trait injected at construction, and every entry point must be
//! serialized by the embedding event loop.
//!
//! # Example
//!
//! ```no_run
//! use cairn_consensus::{
//!     AppendEntriesRequest, Handlers, NodeId, RaftNode, RequestVoteRequest, TimeoutKind,
//! };
//! use serde_json::Value;
//!
//! struct Transport;
//!
//! impl Handlers for Transport {
//!     fn send_append_entries(&mut self, _to: &NodeId, _rpc: AppendEntriesRequest) {
//!         // enqueue for the wire
//!     }
//!     fn send_request_vote(&mut self, _to: &NodeId, _rpc: RequestVoteRequest) {
//!         // enqueue for the wire
//!     }
//!     fn arm_timeout(&mut self, _kind: TimeoutKind) {
//!         // (re)schedule the timer; elections get a randomized duration
//!     }
//!     fn commit(&mut self, _action: Value) {
//!         // apply to the application state machine
//!     }
//! }
//!
//! fn main() -> cairn_consensus::Result<()> {
//!     let mut node = RaftNode::new(
//!         NodeId::from("alpha:4000"),
//!         [NodeId::from("beta:4000"), NodeId::from("gamma:4000")],
//!         "/var/lib/cairn/raft.log",
//!         Transport,
//!     )?;
//!
//!     // The event loop then feeds the node: node.timeout() when the armed
//!     // timer fires, node.append_entries(..) / node.request_vote(..) for
//!     // inbound RPCs, and node.propose(..) for client submissions.
//!     node.timeout()?;
//!     Ok(())
//! }
//! ```

mod handlers;
mod log;
mod node;
mod record;
mod rpc;
mod state;
mod types;

pub use handlers::{Handlers, TimeoutKind};
pub use log::RaftLog;
pub use node::RaftNode;
pub use record::Record;
pub use rpc::{
    AppendEntriesRequest, AppendEntriesResponse, EntryPayload, RequestVoteRequest,
    RequestVoteResponse,
};
pub use state::{CandidateState, LeaderState, NodeState, RaftRole};
pub use types::{Entry, LogIndex, NodeId, Term};

/// Result type for Raft operations
pub type Result<T> = std::result::Result<T, RaftError>;

/// Errors that can occur during Raft operations
///
/// Protocol-level rejections (stale terms, log mismatches) are not errors;
/// they travel back to the sender as ordinary `(term, false)` responses.
#[derive(Debug, thiserror::Error)]
pub enum RaftError {
    /// `propose` was called on a node that is not the leader
    #[error("not the leader (current leader: {0:?})")]
    NotLeader(Option<NodeId>),

    /// Log I/O failed; fatal, because a lost append can violate safety
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// A complete durable record failed to parse or violated a log
    /// invariant during recovery; the node refuses to start
    #[error("corrupt log record at line {line}: {reason}")]
    CorruptRecord { line: usize, reason: String },
}
