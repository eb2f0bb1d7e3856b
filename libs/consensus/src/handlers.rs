//! Outbound interface of the consensus engine
//!
//! The engine never performs network I/O or owns timers. Everything it needs
//! from the outside world goes through this trait, injected at construction.
//! Handler calls happen synchronously inside the engine method that caused
//! them, after any durable log writes that method performed; implementations
//! must not reenter the engine from within a handler.

use crate::rpc::{AppendEntriesRequest, RequestVoteRequest};
use crate::types::NodeId;
use serde_json::Value;

/// Which timer the transport should arm
///
/// The engine only names the category; the transport chooses the concrete
/// duration (typically a uniform random sample from a configured range for
/// elections, and a fixed shorter interval for heartbeats). Arming replaces
/// any previously outstanding timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Election,
    Heartbeat,
}

/// Outbound callbacks the engine invokes
pub trait Handlers {
    /// Send an AppendEntries RPC to a peer
    fn send_append_entries(&mut self, to: &NodeId, rpc: AppendEntriesRequest);

    /// Send a RequestVote RPC to a peer
    fn send_request_vote(&mut self, to: &NodeId, rpc: RequestVoteRequest);

    /// Arm (or replace) the pending timeout
    fn arm_timeout(&mut self, kind: TimeoutKind);

    /// Deliver a newly committed action to the consumer
    ///
    /// Called once per committed entry, in strictly increasing index order.
    fn commit(&mut self, action: Value);
}
