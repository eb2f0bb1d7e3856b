//! Three-node Raft cluster in a single process
//!
//! This example wires three engines together with queue-backed handlers and
//! plays the transport/event-loop role itself: it decides when timers fire
//! and shuttles RPCs and responses between the nodes.
//!
//! Run with: cargo run --example local_cluster

use cairn_consensus::{
    AppendEntriesRequest, AppendEntriesResponse, Handlers, NodeId, RaftNode, RequestVoteRequest,
    RequestVoteResponse, TimeoutKind,
};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// One message in flight between two nodes
enum Wire {
    Append(AppendEntriesRequest),
    AppendRsp(AppendEntriesResponse),
    Vote(RequestVoteRequest),
    VoteRsp(RequestVoteResponse),
}

type Queue = Rc<RefCell<VecDeque<(NodeId, NodeId, Wire)>>>;
type CommitLog = Rc<RefCell<Vec<(NodeId, Value)>>>;

/// Handlers that enqueue sends on the shared bus and record commits
struct Bus {
    from: NodeId,
    queue: Queue,
    commits: CommitLog,
}

impl Handlers for Bus {
    fn send_append_entries(&mut self, to: &NodeId, rpc: AppendEntriesRequest) {
        self.queue
            .borrow_mut()
            .push_back((self.from.clone(), to.clone(), Wire::Append(rpc)));
    }

    fn send_request_vote(&mut self, to: &NodeId, rpc: RequestVoteRequest) {
        self.queue
            .borrow_mut()
            .push_back((self.from.clone(), to.clone(), Wire::Vote(rpc)));
    }

    fn arm_timeout(&mut self, _kind: TimeoutKind) {
        // This driver fires timers explicitly; a real transport would
        // schedule a randomized election timeout or a heartbeat interval.
    }

    fn commit(&mut self, action: Value) {
        self.commits
            .borrow_mut()
            .push((self.from.clone(), action));
    }
}

/// Deliver queued messages until the cluster goes quiet
fn pump(queue: &Queue, nodes: &mut HashMap<NodeId, RaftNode<Bus>>) {
    loop {
        let next = queue.borrow_mut().pop_front();
        let Some((from, to, wire)) = next else { break };
        let Some(node) = nodes.get_mut(&to) else { continue };

        match wire {
            Wire::Vote(req) => {
                let rsp = node.request_vote(&req).expect("log write failed");
                queue
                    .borrow_mut()
                    .push_back((to, from, Wire::VoteRsp(rsp)));
            }
            Wire::VoteRsp(rsp) => {
                node.request_vote_response(&from, &rsp)
                    .expect("log write failed");
            }
            Wire::Append(req) => {
                let rsp = node.append_entries(&req).expect("log write failed");
                queue
                    .borrow_mut()
                    .push_back((to, from, Wire::AppendRsp(rsp)));
            }
            Wire::AppendRsp(rsp) => {
                node.append_entries_response(&from, &rsp)
                    .expect("log write failed");
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("=== cairn-consensus local cluster demo ===\n");

    let dir = tempfile::tempdir()?;
    let queue: Queue = Rc::new(RefCell::new(VecDeque::new()));
    let commits: CommitLog = Rc::new(RefCell::new(Vec::new()));

    let endpoints: Vec<NodeId> = ["alpha", "beta", "gamma"]
        .into_iter()
        .map(NodeId::from)
        .collect();

    let mut nodes: HashMap<NodeId, RaftNode<Bus>> = HashMap::new();
    for id in &endpoints {
        let node = RaftNode::new(
            id.clone(),
            endpoints.iter().cloned(),
            dir.path().join(format!("{}.log", id)),
            Bus {
                from: id.clone(),
                queue: Rc::clone(&queue),
                commits: Rc::clone(&commits),
            },
        )?;
        nodes.insert(id.clone(), node);
        println!("  started {}", id);
    }

    // The driver decides that alpha's election timer fires first.
    println!("\nalpha's election timeout fires...");
    let alpha = NodeId::from("alpha");
    nodes.get_mut(&alpha).unwrap().timeout()?;
    pump(&queue, &mut nodes);

    let leader = nodes[&alpha].leader().cloned().expect("no leader elected");
    println!("  leader of term {} is {}\n", nodes[&alpha].term(), leader);

    // Propose through the leader, then let two heartbeat rounds run: the
    // first replicates the entry, the second spreads the commit index.
    println!("proposing {{\"put\": \"greeting=hello\"}}...");
    let index = nodes
        .get_mut(&leader)
        .unwrap()
        .propose(json!({"put": "greeting=hello"}))?;
    println!("  accepted as entry {}", index);

    for _ in 0..2 {
        nodes.get_mut(&leader).unwrap().timeout()?;
        pump(&queue, &mut nodes);
    }

    println!("\ncommitted actions, per node:");
    for (node, action) in commits.borrow().iter() {
        println!("  {}: {}", node, action);
    }

    for id in &endpoints {
        println!(
            "{}: role {}, term {}, commit index {}",
            id,
            nodes[id].role(),
            nodes[id].term(),
            nodes[id].commit_index()
        );
    }

    Ok(())
}
