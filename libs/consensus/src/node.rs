//! Core Raft engine
//!
//! `RaftNode` owns the durable log and the volatile node state, and drives
//! every protocol decision: term tracking, role transitions, vote
//! bookkeeping, per-peer replication indices, and commit advancement.
//!
//! The engine is single-threaded and cooperative. The caller (the transport
//! event loop) must serialize every entry point: the two inbound RPC
//! methods, the two response methods, `timeout`, and `propose`. The engine
//! itself never spawns tasks, never suspends, and blocks only on the
//! synchronous log append + fsync. Every durable write a method performs is
//! on disk before that method invokes an outbound handler or returns its
//! response, so a vote or acceptance is durable before it is externally
//! observable.

use crate::handlers::{Handlers, TimeoutKind};
use crate::log::RaftLog;
use crate::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, EntryPayload, RequestVoteRequest,
    RequestVoteResponse,
};
use crate::state::{NodeState, RaftRole};
use crate::types::{LogIndex, NodeId, Term};
use crate::{RaftError, Result};

use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

/// A Raft consensus node
pub struct RaftNode<H> {
    state: NodeState,
    log: RaftLog,
    handlers: H,
}

impl<H: Handlers> RaftNode<H> {
    /// Construct a node by replaying the durable log at `log_path`.
    ///
    /// The current term becomes the highest term in the log and the recorded
    /// vote for that term (if any) is restored. The node always starts as a
    /// follower with an election timeout armed; no RPCs are sent.
    pub fn new(
        id: NodeId,
        peers: impl IntoIterator<Item = NodeId>,
        log_path: impl AsRef<Path>,
        handlers: H,
    ) -> Result<Self> {
        let log = RaftLog::open(log_path)?;
        let mut state = NodeState::new(id, peers);
        state.current_term = log.max_term();
        state.voted_for = log.vote_for(state.current_term).cloned();

        info!(
            "{} starting as follower at term {} with log ({}, {})",
            state.id,
            state.current_term,
            log.last_index(),
            log.last_term()
        );

        let mut node = Self {
            state,
            log,
            handlers,
        };
        node.handlers.arm_timeout(TimeoutKind::Election);
        Ok(node)
    }

    /// Current role
    pub fn role(&self) -> RaftRole {
        self.state.role
    }

    /// Current term
    pub fn term(&self) -> Term {
        self.state.current_term
    }

    /// Known leader for the current term, if any
    pub fn leader(&self) -> Option<&NodeId> {
        self.state.leader_id.as_ref()
    }

    /// Highest entry index known committed
    pub fn commit_index(&self) -> LogIndex {
        self.state.commit_index
    }

    /// Read-only view of the durable log
    pub fn log(&self) -> &RaftLog {
        &self.log
    }

    /// Any RPC or response carrying a newer term demotes this node before
    /// role-specific handling. No durable record is written merely for
    /// observing the term; a vote record follows only if one is granted.
    fn observe_term(&mut self, term: Term) {
        if term > self.state.current_term {
            info!(
                "{} stepping down to follower: observed term {} above {}",
                self.state.id, term, self.state.current_term
            );
            self.state.become_follower(term, None);
            self.handlers.arm_timeout(TimeoutKind::Election);
        }
    }

    /// Handle an AppendEntries RPC; the returned response is for the caller
    /// to deliver back to the sender.
    pub fn append_entries(&mut self, req: &AppendEntriesRequest) -> Result<AppendEntriesResponse> {
        self.observe_term(req.term);

        if req.term < self.state.current_term {
            debug!(
                "{} rejecting stale append from {} at term {}",
                self.state.id, req.leader_id, req.term
            );
            return Ok(AppendEntriesResponse::reply_to(
                req,
                self.state.current_term,
                false,
            ));
        }

        match self.state.role {
            RaftRole::Leader => {
                // Two leaders in one term would break election safety; the
                // request is necessarily from a confused or partitioned peer.
                warn!(
                    "{} ignoring append from {} claiming leadership of term {}",
                    self.state.id, req.leader_id, req.term
                );
                return Ok(AppendEntriesResponse::reply_to(
                    req,
                    self.state.current_term,
                    false,
                ));
            }
            RaftRole::Candidate => {
                info!(
                    "{} yielding election: {} already leads term {}",
                    self.state.id, req.leader_id, req.term
                );
                self.state
                    .become_follower(req.term, Some(req.leader_id.clone()));
            }
            RaftRole::Follower => {
                self.state.leader_id = Some(req.leader_id.clone());
            }
        }

        // A live leader resets the election clock even when its entries are
        // rejected below.
        self.handlers.arm_timeout(TimeoutKind::Election);

        let log_ok = req.prev_log_index == LogIndex::ZERO
            || self.log.term_of(req.prev_log_index) == Some(req.prev_log_term);
        if !log_ok {
            debug!(
                "{} rejecting append from {}: no entry ({}, {}) here, log ends at ({}, {})",
                self.state.id,
                req.leader_id,
                req.prev_log_index,
                req.prev_log_term,
                self.log.last_index(),
                self.log.last_term()
            );
            return Ok(AppendEntriesResponse::reply_to(
                req,
                self.state.current_term,
                false,
            ));
        }

        for (offset, payload) in req.entries.iter().enumerate() {
            let index = req.prev_log_index + (offset as u64 + 1);
            match self.log.term_of(index) {
                // Duplicate delivery of an entry we already hold.
                Some(existing) if existing == payload.spawn_term => continue,
                Some(_) => {
                    debug_assert!(index > self.state.commit_index);
                    self.log.truncate_from(index)?;
                    self.log.append_entry(
                        self.state.current_term,
                        payload.spawn_term,
                        index,
                        payload.action.clone(),
                    )?;
                }
                None => {
                    self.log.append_entry(
                        self.state.current_term,
                        payload.spawn_term,
                        index,
                        payload.action.clone(),
                    )?;
                }
            }
        }

        let new_commit = req.leader_commit.min(self.log.last_index());
        if new_commit > self.state.commit_index {
            self.state.commit_index = new_commit;
        }
        self.deliver_committed();

        Ok(AppendEntriesResponse::reply_to(
            req,
            self.state.current_term,
            true,
        ))
    }

    /// Handle a RequestVote RPC; the returned response is for the caller to
    /// deliver back to the candidate.
    pub fn request_vote(&mut self, req: &RequestVoteRequest) -> Result<RequestVoteResponse> {
        self.observe_term(req.term);

        if req.term < self.state.current_term {
            debug!(
                "{} rejecting stale vote request from {} at term {}",
                self.state.id, req.candidate_id, req.term
            );
            return Ok(RequestVoteResponse::reply_to(
                req,
                self.state.current_term,
                false,
            ));
        }

        let can_vote = match &self.state.voted_for {
            None => true,
            Some(voted) => *voted == req.candidate_id,
        };
        let log_ok = req.last_log_term > self.log.last_term()
            || (req.last_log_term == self.log.last_term()
                && req.last_log_index >= self.log.last_index());

        if !(can_vote && log_ok) {
            info!(
                "{} denied vote to {} at term {} (voted_for: {:?}, their log ({}, {}), ours ({}, {}))",
                self.state.id,
                req.candidate_id,
                self.state.current_term,
                self.state.voted_for,
                req.last_log_index,
                req.last_log_term,
                self.log.last_index(),
                self.log.last_term()
            );
            return Ok(RequestVoteResponse::reply_to(
                req,
                self.state.current_term,
                false,
            ));
        }

        // The vote must be durable before the response leaves this method.
        // A retried grant for the same candidate writes nothing new.
        if self.state.voted_for.is_none() {
            self.log
                .append_vote(self.state.current_term, &req.candidate_id)?;
            self.state.voted_for = Some(req.candidate_id.clone());
        }
        info!(
            "{} granted vote to {} at term {}",
            self.state.id, req.candidate_id, self.state.current_term
        );
        self.handlers.arm_timeout(TimeoutKind::Election);

        Ok(RequestVoteResponse::reply_to(
            req,
            self.state.current_term,
            true,
        ))
    }

    /// Handle a vote response from `from`.
    pub fn request_vote_response(&mut self, from: &NodeId, rsp: &RequestVoteResponse) -> Result<()> {
        self.observe_term(rsp.term);

        if self.state.role != RaftRole::Candidate
            || rsp.request_term != self.state.current_term
            || rsp.term < self.state.current_term
        {
            debug!(
                "{} ignoring vote response from {} for term {}",
                self.state.id, from, rsp.request_term
            );
            return Ok(());
        }

        if !rsp.vote_granted {
            info!(
                "{} vote denied by {} at term {}",
                self.state.id, from, self.state.current_term
            );
            return Ok(());
        }
        info!(
            "{} vote granted by {} at term {}",
            self.state.id, from, self.state.current_term
        );

        let cluster_size = self.state.cluster_size();
        let won = match self.state.candidate_state.as_mut() {
            Some(votes) => {
                votes.add_vote(from.clone());
                votes.has_majority(cluster_size)
            }
            None => false,
        };
        if won {
            self.become_leader();
        }
        Ok(())
    }

    /// Handle an append response from `from`.
    pub fn append_entries_response(
        &mut self,
        from: &NodeId,
        rsp: &AppendEntriesResponse,
    ) -> Result<()> {
        self.observe_term(rsp.term);

        if self.state.role != RaftRole::Leader
            || rsp.request_term != self.state.current_term
            || rsp.term < self.state.current_term
        {
            debug!(
                "{} ignoring append response from {} for term {}",
                self.state.id, from, rsp.request_term
            );
            return Ok(());
        }

        if rsp.success {
            let reported = rsp.prev_log_index + rsp.entries_len;
            if let Some(leader) = self.state.leader_state.as_mut() {
                if let Some(next) = leader.next_index.get_mut(from) {
                    if reported + 1 > *next {
                        *next = reported + 1;
                    }
                }
                if let Some(matched) = leader.match_index.get_mut(from) {
                    if reported > *matched {
                        debug!(
                            "{} learned {} matches through {}",
                            self.state.id, from, reported
                        );
                        *matched = reported;
                    }
                }
            }
            self.advance_commit_index();
        } else {
            if let Some(leader) = self.state.leader_state.as_mut() {
                if let Some(next) = leader.next_index.get_mut(from) {
                    if *next > LogIndex(1) {
                        *next = *next - 1;
                    }
                    info!(
                        "{} walking next index for {} back to {}",
                        self.state.id, from, next
                    );
                }
            }
            // Retry straight away with the earlier prefix.
            self.send_append(from);
        }
        Ok(())
    }

    /// Timer expiration, delivered by the transport when the armed timeout
    /// fires: an election timeout for followers and candidates, a heartbeat
    /// tick for leaders.
    pub fn timeout(&mut self) -> Result<()> {
        match self.state.role {
            RaftRole::Follower | RaftRole::Candidate => self.start_election(),
            RaftRole::Leader => {
                debug!(
                    "{} heartbeat tick at term {}",
                    self.state.id, self.state.current_term
                );
                self.broadcast_append();
                self.handlers.arm_timeout(TimeoutKind::Heartbeat);
                Ok(())
            }
        }
    }

    /// Submit a client action for replication. Only legal on the leader.
    ///
    /// The entry is durable locally when this returns; replication to peers
    /// rides the next heartbeat tick.
    pub fn propose(&mut self, action: Value) -> Result<LogIndex> {
        if self.state.role != RaftRole::Leader {
            return Err(RaftError::NotLeader(self.state.leader_id.clone()));
        }

        let term = self.state.current_term;
        let index = self.log.last_index() + 1;
        self.log.append_entry(term, term, index, action)?;
        debug!("{} proposed entry {} at term {}", self.state.id, index, term);

        // With no peers this node alone is the majority.
        self.advance_commit_index();
        Ok(index)
    }

    fn start_election(&mut self) -> Result<()> {
        self.state.become_candidate();
        info!(
            "{} starting election for term {}",
            self.state.id, self.state.current_term
        );

        self.log
            .append_vote(self.state.current_term, &self.state.id)?;
        self.handlers.arm_timeout(TimeoutKind::Election);

        let won_already = self
            .state
            .candidate_state
            .as_ref()
            .map_or(false, |votes| votes.has_majority(self.state.cluster_size()));
        if won_already {
            self.become_leader();
            return Ok(());
        }

        let rpc = RequestVoteRequest {
            term: self.state.current_term,
            candidate_id: self.state.id.clone(),
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        let peers: Vec<NodeId> = self.state.peers.iter().cloned().collect();
        for peer in &peers {
            self.handlers.send_request_vote(peer, rpc.clone());
        }
        Ok(())
    }

    fn become_leader(&mut self) {
        info!(
            "{} won election for term {}",
            self.state.id, self.state.current_term
        );
        self.state.become_leader(self.log.last_index());
        self.broadcast_append();
        self.handlers.arm_timeout(TimeoutKind::Heartbeat);
    }

    /// Send one AppendEntries to every peer from its `next_index`.
    fn broadcast_append(&mut self) {
        let peers: Vec<NodeId> = self.state.peers.iter().cloned().collect();
        for peer in &peers {
            self.send_append(peer);
        }
    }

    /// Build and send the AppendEntries for `peer`: everything from its
    /// `next_index` through the end of the log, empty when it is caught up.
    fn send_append(&mut self, peer: &NodeId) {
        let next = match self
            .state
            .leader_state
            .as_ref()
            .and_then(|leader| leader.next_index.get(peer))
        {
            Some(next) => *next,
            None => return,
        };

        let prev_log_index = next - 1;
        let prev_log_term = match prev_log_index {
            LogIndex::ZERO => Term::default(),
            prev => self.log.term_of(prev).unwrap_or_default(),
        };

        let mut entries = Vec::new();
        let mut index = next;
        while index <= self.log.last_index() {
            if let Some(entry) = self.log.entry(index) {
                entries.push(EntryPayload::new(entry.spawn_term, entry.action));
            }
            index.increment();
        }

        let rpc = AppendEntriesRequest {
            term: self.state.current_term,
            leader_id: self.state.id.clone(),
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: self.state.commit_index,
        };
        self.handlers.send_append_entries(peer, rpc);
    }

    /// Find the greatest index replicated on a majority whose entry was
    /// spawned in the current term, then deliver anything newly committed.
    /// Entries from earlier terms commit only implicitly, beneath a
    /// current-term entry.
    fn advance_commit_index(&mut self) {
        let new_commit = {
            let leader = match self.state.leader_state.as_ref() {
                Some(leader) => leader,
                None => return,
            };
            let majority = self.state.cluster_size() / 2 + 1;
            let mut new_commit = self.state.commit_index;
            let mut candidate = self.state.commit_index + 1;
            while candidate <= self.log.last_index() {
                if self.log.term_of(candidate) == Some(self.state.current_term) {
                    let replicated = 1 + leader
                        .match_index
                        .values()
                        .filter(|&&matched| matched >= candidate)
                        .count();
                    if replicated >= majority {
                        new_commit = candidate;
                    }
                }
                candidate.increment();
            }
            new_commit
        };

        if new_commit > self.state.commit_index {
            debug!(
                "{} advancing commit index {} -> {}",
                self.state.id, self.state.commit_index, new_commit
            );
            self.state.commit_index = new_commit;
        }
        self.deliver_committed();
    }

    /// Hand newly committed actions to the consumer, in index order.
    fn deliver_committed(&mut self) {
        while self.state.last_applied < self.state.commit_index {
            self.state.last_applied.increment();
            if let Some(entry) = self.log.entry(self.state.last_applied) {
                debug!(
                    "{} delivering committed entry {}",
                    self.state.id, self.state.last_applied
                );
                self.handlers.commit(entry.action);
            }
        }
    }
}
