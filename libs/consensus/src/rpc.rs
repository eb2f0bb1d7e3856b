//! Raft RPC messages

use crate::types::{LogIndex, NodeId, Term};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry carried by an `AppendEntriesRequest`
///
/// The target index is implicit: the k-th payload lands at
/// `prev_log_index + k`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPayload {
    /// Term in which the originating leader created the entry
    pub spawn_term: Term,

    /// Opaque client action
    pub action: Value,
}

impl EntryPayload {
    pub fn new(spawn_term: Term, action: Value) -> Self {
        Self { spawn_term, action }
    }
}

/// AppendEntries RPC - sent by the leader to replicate log entries and
/// provide heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    /// Leader's term
    pub term: Term,

    /// So the follower can learn and redirect to the leader
    pub leader_id: NodeId,

    /// Index of the log entry immediately preceding the new ones
    pub prev_log_index: LogIndex,

    /// Spawn term of the entry at `prev_log_index` (0 when the index is 0)
    pub prev_log_term: Term,

    /// Entries to store (empty for heartbeat)
    pub entries: Vec<EntryPayload>,

    /// Leader's commit index
    pub leader_commit: LogIndex,
}

impl AppendEntriesRequest {
    /// Create a heartbeat message (no entries)
    pub fn heartbeat(
        term: Term,
        leader_id: NodeId,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        leader_commit: LogIndex,
    ) -> Self {
        Self {
            term,
            leader_id,
            prev_log_index,
            prev_log_term,
            entries: vec![],
            leader_commit,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Response to an `AppendEntriesRequest`
///
/// Alongside the responder's term and verdict, the response repeats the
/// identifying fields of the request it answers so the leader can update
/// `next_index`/`match_index` without keeping requests in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    /// Responder's current term, for the leader to update itself
    pub term: Term,

    /// True if the follower accepted the entries
    pub success: bool,

    /// Term the answered request was sent under
    pub request_term: Term,

    /// `prev_log_index` of the answered request
    pub prev_log_index: LogIndex,

    /// Number of entries the answered request carried
    pub entries_len: u64,
}

impl AppendEntriesResponse {
    /// Build the response to `request` with this node's `term` and verdict
    pub fn reply_to(request: &AppendEntriesRequest, term: Term, success: bool) -> Self {
        Self {
            term,
            success,
            request_term: request.term,
            prev_log_index: request.prev_log_index,
            entries_len: request.entries.len() as u64,
        }
    }
}

/// RequestVote RPC - sent by candidates to gather votes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    /// Candidate's term
    pub term: Term,

    /// Candidate requesting the vote
    pub candidate_id: NodeId,

    /// Index of the candidate's last log entry
    pub last_log_index: LogIndex,

    /// Spawn term of the candidate's last log entry
    pub last_log_term: Term,
}

/// Response to a `RequestVoteRequest`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    /// Responder's current term, for the candidate to update itself
    pub term: Term,

    /// True if the candidate received the vote
    pub vote_granted: bool,

    /// Term the answered request was sent under; the candidate drops
    /// responses from elections it has already left
    pub request_term: Term,
}

impl RequestVoteResponse {
    /// Build the response to `request` with this node's `term` and verdict
    pub fn reply_to(request: &RequestVoteRequest, term: Term, vote_granted: bool) -> Self {
        Self {
            term,
            vote_granted,
            request_term: request.term,
        }
    }
}
