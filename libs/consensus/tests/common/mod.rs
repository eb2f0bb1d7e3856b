#![allow(dead_code)]

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use cairn_consensus::{
    AppendEntriesRequest, Handlers, NodeId, RaftNode, RaftRole, RequestVoteRequest,
    RequestVoteResponse, Term, TimeoutKind,
};
use serde_json::Value;
use std::fs::File;
use std::io::Write;
use tempfile::TempDir;

/// Everything the engine asked the outside world to do
#[derive(Default)]
pub struct Outbox {
    pub appends: Vec<(NodeId, AppendEntriesRequest)>,
    pub votes: Vec<(NodeId, RequestVoteRequest)>,
    pub timeouts: Vec<TimeoutKind>,
    pub commits: Vec<Value>,
}

/// Recording handlers; clones share the same outbox so a test can keep one
/// half while the node owns the other.
#[derive(Clone, Default)]
pub struct Recorder(Rc<RefCell<Outbox>>);

impl Handlers for Recorder {
    fn send_append_entries(&mut self, to: &NodeId, rpc: AppendEntriesRequest) {
        self.0.borrow_mut().appends.push((to.clone(), rpc));
    }

    fn send_request_vote(&mut self, to: &NodeId, rpc: RequestVoteRequest) {
        self.0.borrow_mut().votes.push((to.clone(), rpc));
    }

    fn arm_timeout(&mut self, kind: TimeoutKind) {
        self.0.borrow_mut().timeouts.push(kind);
    }

    fn commit(&mut self, action: Value) {
        self.0.borrow_mut().commits.push(action);
    }
}

impl Recorder {
    pub fn appends(&self) -> Vec<(NodeId, AppendEntriesRequest)> {
        self.0.borrow().appends.clone()
    }

    pub fn appends_to(&self, to: &str) -> Vec<AppendEntriesRequest> {
        self.0
            .borrow()
            .appends
            .iter()
            .filter(|(peer, _)| peer.as_str() == to)
            .map(|(_, rpc)| rpc.clone())
            .collect()
    }

    pub fn votes(&self) -> Vec<(NodeId, RequestVoteRequest)> {
        self.0.borrow().votes.clone()
    }

    pub fn vote_to(&self, to: &str) -> Option<RequestVoteRequest> {
        self.0
            .borrow()
            .votes
            .iter()
            .find(|(peer, _)| peer.as_str() == to)
            .map(|(_, rpc)| rpc.clone())
    }

    pub fn timeouts(&self) -> Vec<TimeoutKind> {
        self.0.borrow().timeouts.clone()
    }

    pub fn commits(&self) -> Vec<Value> {
        self.0.borrow().commits.clone()
    }

    pub fn nothing_sent(&self) -> bool {
        let outbox = self.0.borrow();
        outbox.appends.is_empty() && outbox.votes.is_empty() && outbox.commits.is_empty()
    }

    pub fn clear(&self) {
        self.0.replace(Outbox::default());
    }
}

/// A three-entry log in a term-2 world: voted for beta in term 1, then
/// accepted one entry in each of terms 1 and 2.
pub const SEED_TERM_TWO: &[&str] = &[
    r#"{"term":1,"type":"vote","for":"beta"}"#,
    r#"{"term":1,"type":"entry","spawn_term":1,"index":1,"action":"thud"}"#,
    r#"{"term":2,"type":"entry","spawn_term":2,"index":2,"action":"thud"}"#,
];

/// On-disk fixture for a node named "alpha" in the cluster
/// {alpha, beta, gamma}
pub struct Fixture {
    dir: TempDir,
    pub handlers: Recorder,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            handlers: Recorder::default(),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.path().join("raft.log")
    }

    pub fn seed(&self, lines: &[&str]) {
        let mut file = File::create(self.log_path()).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    pub fn log_lines(&self) -> Vec<String> {
        std::fs::read_to_string(self.log_path())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    pub fn node(&self) -> RaftNode<Recorder> {
        self.node_with_peers(&["beta", "gamma"])
    }

    pub fn node_with_peers(&self, peers: &[&str]) -> RaftNode<Recorder> {
        RaftNode::new(
            NodeId::from("alpha"),
            peers.iter().copied().map(NodeId::from),
            self.log_path(),
            self.handlers.clone(),
        )
        .unwrap()
    }
}

/// Seed the term-2 log, run alpha through an election, and hand back the
/// freshly elected term-3 leader. One grant plus the self-vote is a majority
/// of three.
pub fn elected_leader(fx: &Fixture) -> RaftNode<Recorder> {
    fx.seed(SEED_TERM_TWO);
    let mut node = fx.node();
    node.timeout().unwrap();

    let request = fx.handlers.vote_to("gamma").unwrap();
    let grant = RequestVoteResponse::reply_to(&request, Term(3), true);
    node.request_vote_response(&NodeId::from("gamma"), &grant)
        .unwrap();

    assert_eq!(node.role(), RaftRole::Leader);
    node
}
