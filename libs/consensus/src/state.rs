//! Raft node state and role management

use crate::types::{LogIndex, NodeId, Term};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// The role a Raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftRole {
    /// Follower - accepts log entries from the leader
    Follower,
    /// Candidate - attempting to become leader
    Candidate,
    /// Leader - accepts client requests and replicates the log
    Leader,
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftRole::Follower => write!(f, "Follower"),
            RaftRole::Candidate => write!(f, "Candidate"),
            RaftRole::Leader => write!(f, "Leader"),
        }
    }
}

/// Candidate-specific state
#[derive(Debug, Clone)]
pub struct CandidateState {
    /// Nodes that have granted a vote in this election, self included
    pub votes_received: HashSet<NodeId>,
}

impl CandidateState {
    /// A fresh election always starts with the candidate's own vote
    pub fn new(own_vote: NodeId) -> Self {
        let mut votes_received = HashSet::new();
        votes_received.insert(own_vote);
        Self { votes_received }
    }

    pub fn add_vote(&mut self, node: NodeId) {
        self.votes_received.insert(node);
    }

    pub fn has_majority(&self, cluster_size: usize) -> bool {
        self.votes_received.len() >= cluster_size / 2 + 1
    }
}

/// Volatile state on leaders (reinitialized after election)
#[derive(Debug, Clone)]
pub struct LeaderState {
    /// For each peer, index of the next log entry to send
    pub next_index: HashMap<NodeId, LogIndex>,

    /// For each peer, index of the highest log entry known to be replicated
    pub match_index: HashMap<NodeId, LogIndex>,
}

impl LeaderState {
    pub fn new<'a>(peers: impl IntoIterator<Item = &'a NodeId>, last_log_index: LogIndex) -> Self {
        let mut next_index = HashMap::new();
        let mut match_index = HashMap::new();
        for peer in peers {
            next_index.insert(peer.clone(), last_log_index + 1);
            match_index.insert(peer.clone(), LogIndex::ZERO);
        }
        Self {
            next_index,
            match_index,
        }
    }
}

/// Complete volatile state of a Raft node
///
/// Everything here is rebuilt from the durable log on startup; the role is
/// always Follower after a restart.
#[derive(Debug)]
pub struct NodeState {
    /// This node's endpoint
    pub id: NodeId,

    /// The other members of the cluster (self excluded)
    pub peers: BTreeSet<NodeId>,

    /// Current role of this node
    pub role: RaftRole,

    /// Highest term observed (never decreases)
    pub current_term: Term,

    /// Endpoint that received this node's vote in `current_term`, if any
    pub voted_for: Option<NodeId>,

    /// Known leader for `current_term`, if any
    pub leader_id: Option<NodeId>,

    /// Index of the highest log entry known to be committed
    pub commit_index: LogIndex,

    /// Index of the highest log entry delivered to the consumer
    pub last_applied: LogIndex,

    /// Leader-specific state (only while role == Leader)
    pub leader_state: Option<LeaderState>,

    /// Candidate-specific state (only while role == Candidate)
    pub candidate_state: Option<CandidateState>,
}

impl NodeState {
    pub fn new(id: NodeId, peers: impl IntoIterator<Item = NodeId>) -> Self {
        let mut peers: BTreeSet<NodeId> = peers.into_iter().collect();
        peers.remove(&id);
        Self {
            id,
            peers,
            role: RaftRole::Follower,
            current_term: Term::default(),
            voted_for: None,
            leader_id: None,
            commit_index: LogIndex::ZERO,
            last_applied: LogIndex::ZERO,
            leader_state: None,
            candidate_state: None,
        }
    }

    /// Cluster size, counting self
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// Transition to follower at `term`
    ///
    /// The recorded vote survives only within its term; moving to a higher
    /// term clears it.
    pub fn become_follower(&mut self, term: Term, leader: Option<NodeId>) {
        if term > self.current_term {
            self.voted_for = None;
        }
        self.current_term = term;
        self.role = RaftRole::Follower;
        self.leader_id = leader;
        self.leader_state = None;
        self.candidate_state = None;
    }

    /// Transition to candidate: new term, vote for self
    pub fn become_candidate(&mut self) {
        self.role = RaftRole::Candidate;
        self.current_term.increment();
        self.voted_for = Some(self.id.clone());
        self.leader_id = None;
        self.candidate_state = Some(CandidateState::new(self.id.clone()));
        self.leader_state = None;
    }

    /// Transition to leader, reinitializing per-peer replication indices
    pub fn become_leader(&mut self, last_log_index: LogIndex) {
        self.role = RaftRole::Leader;
        self.leader_id = Some(self.id.clone());
        self.leader_state = Some(LeaderState::new(&self.peers, last_log_index));
        self.candidate_state = None;
    }
}
