//! Log replication scenarios: the follower's consistency check and append
//! path, commit delivery, and the leader's per-peer bookkeeping.

mod common;

use cairn_consensus::{
    AppendEntriesRequest, AppendEntriesResponse, EntryPayload, LogIndex, NodeId, RaftRole, Term,
    TimeoutKind,
};
use common::{elected_leader, Fixture, SEED_TERM_TWO};
use serde_json::json;

fn append(
    term: u64,
    leader: &str,
    prev_log_index: u64,
    prev_log_term: u64,
    entries: Vec<EntryPayload>,
    leader_commit: u64,
) -> AppendEntriesRequest {
    AppendEntriesRequest {
        term: Term(term),
        leader_id: NodeId::from(leader),
        prev_log_index: LogIndex(prev_log_index),
        prev_log_term: Term(prev_log_term),
        entries,
        leader_commit: LogIndex(leader_commit),
    }
}

#[test]
fn stale_append_rejected_with_current_term() {
    let fx = Fixture::new();
    fx.seed(SEED_TERM_TWO);
    let mut node = fx.node();

    let rsp = node.append_entries(&append(1, "gamma", 1, 1, vec![], 1)).unwrap();

    assert_eq!(rsp.term, Term(2));
    assert!(!rsp.success);
    assert_eq!(node.role(), RaftRole::Follower);
    // A stale sender is not this term's leader.
    assert!(node.leader().is_none());
}

#[test]
fn mismatched_prev_log_term_rejected_without_mutation() {
    let fx = Fixture::new();
    fx.seed(SEED_TERM_TWO);
    let mut node = fx.node();

    let entries = vec![EntryPayload::new(Term(2), json!({"foo": "bar"}))];
    let rsp = node.append_entries(&append(2, "gamma", 1, 2, entries, 1)).unwrap();

    assert_eq!(rsp.term, Term(2));
    assert!(!rsp.success);
    // The sender holds the current term, so it is recorded as leader even
    // though its entries were refused.
    assert_eq!(node.leader(), Some(&NodeId::from("gamma")));
    assert_eq!(fx.log_lines().len(), 3);
}

#[test]
fn prev_log_index_past_our_end_rejected() {
    let fx = Fixture::new();
    fx.seed(SEED_TERM_TWO);
    let mut node = fx.node();

    let rsp = node.append_entries(&append(2, "gamma", 3, 2, vec![], 2)).unwrap();

    assert!(!rsp.success);
    assert_eq!(node.leader(), Some(&NodeId::from("gamma")));
    assert_eq!(fx.log_lines().len(), 3);
}

#[test]
fn matching_prev_log_appends_and_commits() {
    let fx = Fixture::new();
    fx.seed(SEED_TERM_TWO);
    let mut node = fx.node();

    let entries = vec![EntryPayload::new(Term(2), json!({"foo": "bar"}))];
    let rsp = node.append_entries(&append(2, "gamma", 2, 2, entries, 2)).unwrap();

    assert_eq!(rsp.term, Term(2));
    assert!(rsp.success);
    assert_eq!(node.leader(), Some(&NodeId::from("gamma")));

    let lines = fx.log_lines();
    assert_eq!(lines.len(), 4);
    let record: serde_json::Value = serde_json::from_str(&lines[3]).unwrap();
    assert_eq!(record["type"], "entry");
    assert_eq!(record["term"], 2);
    assert_eq!(record["spawn_term"], 2);
    assert_eq!(record["index"], 3);
    assert_eq!(record["action"]["foo"], "bar");

    // leader_commit = 2 commits the two seeded entries, in order; the new
    // entry at index 3 stays uncommitted.
    assert_eq!(node.commit_index(), LogIndex(2));
    assert_eq!(fx.handlers.commits(), vec![json!("thud"), json!("thud")]);
}

#[test]
fn accepted_append_arms_a_fresh_election_timer() {
    let fx = Fixture::new();
    fx.seed(SEED_TERM_TWO);
    let mut node = fx.node();

    node.append_entries(&append(2, "gamma", 2, 2, vec![], 2)).unwrap();

    // One from startup, one from the accept.
    assert_eq!(
        fx.handlers.timeouts(),
        vec![TimeoutKind::Election, TimeoutKind::Election]
    );
}

#[test]
fn replayed_append_is_idempotent() {
    let fx = Fixture::new();
    fx.seed(SEED_TERM_TWO);
    let mut node = fx.node();

    let request = append(
        2,
        "gamma",
        2,
        2,
        vec![EntryPayload::new(Term(2), json!({"foo": "bar"}))],
        2,
    );

    let first = node.append_entries(&request).unwrap();
    let lines_after_first = fx.log_lines();
    let commits_after_first = fx.handlers.commits();

    // The same RPC delivered again, byte for byte.
    let second = node.append_entries(&request).unwrap();

    assert_eq!(first, second);
    assert_eq!(fx.log_lines(), lines_after_first);
    assert_eq!(fx.handlers.commits(), commits_after_first);
}

#[test]
fn conflicting_suffix_is_truncated_then_replaced() {
    let fx = Fixture::new();
    fx.seed(SEED_TERM_TWO);
    let mut node = fx.node();

    let entries = vec![
        EntryPayload::new(Term(3), json!("x")),
        EntryPayload::new(Term(3), json!("y")),
    ];
    let rsp = node.append_entries(&append(3, "gamma", 1, 1, entries, 0)).unwrap();

    assert!(rsp.success);
    assert_eq!(node.term(), Term(3));
    assert_eq!(node.log().last_index(), LogIndex(3));
    assert_eq!(node.log().term_of(LogIndex(2)), Some(Term(3)));
    assert_eq!(node.log().entry(LogIndex(2)).unwrap().action, json!("x"));
    assert_eq!(node.log().entry(LogIndex(3)).unwrap().action, json!("y"));

    // The vote record from term 1 survived the rewrite.
    assert!(fx
        .log_lines()
        .iter()
        .any(|line| line.contains(r#""type":"vote""#)));

    // Nothing was committed.
    assert!(fx.handlers.commits().is_empty());
}

#[test]
fn follower_commit_is_capped_at_its_log_end() {
    let fx = Fixture::new();
    fx.seed(SEED_TERM_TWO);
    let mut node = fx.node();

    node.append_entries(&append(2, "gamma", 2, 2, vec![], 99)).unwrap();

    assert_eq!(node.commit_index(), LogIndex(2));
    assert_eq!(fx.handlers.commits().len(), 2);
}

#[test]
fn leader_heartbeat_tick_resends_to_every_peer() {
    let fx = Fixture::new();
    let mut node = elected_leader(&fx);
    fx.handlers.clear();

    node.timeout().unwrap();

    assert_eq!(node.role(), RaftRole::Leader);
    assert_eq!(fx.handlers.timeouts(), vec![TimeoutKind::Heartbeat]);
    for peer in ["beta", "gamma"] {
        let appends = fx.handlers.appends_to(peer);
        assert_eq!(appends.len(), 1);
        assert_eq!(appends[0].term, Term(3));
        assert_eq!(appends[0].prev_log_index, LogIndex(2));
        assert_eq!(appends[0].prev_log_term, Term(2));
        assert!(appends[0].is_heartbeat());
    }
}

#[test]
fn up_to_date_success_response_triggers_nothing() {
    let fx = Fixture::new();
    let mut node = elected_leader(&fx);

    let heartbeat = fx.handlers.appends_to("gamma").remove(0);
    fx.handlers.clear();

    let rsp = AppendEntriesResponse::reply_to(&heartbeat, Term(3), true);
    node.append_entries_response(&NodeId::from("gamma"), &rsp).unwrap();

    assert!(fx.handlers.appends().is_empty());
    assert_eq!(node.role(), RaftRole::Leader);
}

#[test]
fn failure_response_walks_next_index_back_and_resends() {
    let fx = Fixture::new();
    let mut node = elected_leader(&fx);

    let heartbeat = fx.handlers.appends_to("gamma").remove(0);
    fx.handlers.clear();

    let rsp = AppendEntriesResponse::reply_to(&heartbeat, Term(3), false);
    node.append_entries_response(&NodeId::from("gamma"), &rsp).unwrap();

    let resent = fx.handlers.appends();
    assert_eq!(resent.len(), 1);
    let (to, request) = &resent[0];
    assert_eq!(to, &NodeId::from("gamma"));
    assert_eq!(request.term, Term(3));
    assert_eq!(request.leader_id, NodeId::from("alpha"));
    assert_eq!(request.prev_log_index, LogIndex(1));
    assert_eq!(request.prev_log_term, Term(1));
    assert_eq!(request.entries.len(), 1);
    assert_eq!(request.entries[0].spawn_term, Term(2));
    assert_eq!(request.entries[0].action, json!("thud"));
}

#[test]
fn next_index_never_walks_below_one() {
    let fx = Fixture::new();
    fx.seed(&[r#"{"term":1,"type":"vote","for":"beta"}"#]);
    let mut node = fx.node();

    // Empty log: become leader of term 2.
    node.timeout().unwrap();
    let request = fx.handlers.vote_to("gamma").unwrap();
    let grant = cairn_consensus::RequestVoteResponse::reply_to(&request, Term(2), true);
    node.request_vote_response(&NodeId::from("gamma"), &grant).unwrap();
    assert_eq!(node.role(), RaftRole::Leader);

    let heartbeat = fx.handlers.appends_to("gamma").remove(0);
    fx.handlers.clear();

    let rsp = AppendEntriesResponse::reply_to(&heartbeat, Term(2), false);
    node.append_entries_response(&NodeId::from("gamma"), &rsp).unwrap();

    let resent = fx.handlers.appends();
    assert_eq!(resent.len(), 1);
    assert_eq!(resent[0].1.prev_log_index, LogIndex::ZERO);
    assert_eq!(resent[0].1.prev_log_term, Term(0));
}

#[test]
fn majority_replication_of_current_term_entry_advances_commit() {
    let fx = Fixture::new();
    let mut node = elected_leader(&fx);
    fx.handlers.clear();

    node.propose(json!({"foo": "bar"})).unwrap();
    assert_eq!(node.commit_index(), LogIndex::ZERO);

    // Replication rides the next heartbeat tick.
    node.timeout().unwrap();
    let sent = fx.handlers.appends_to("gamma").remove(0);
    assert_eq!(sent.entries.len(), 1);
    assert_eq!(sent.prev_log_index, LogIndex(2));

    let rsp = AppendEntriesResponse::reply_to(&sent, Term(3), true);
    node.append_entries_response(&NodeId::from("gamma"), &rsp).unwrap();

    // Entry 3 spawned in term 3 reached {alpha, gamma}: committed, along
    // with everything beneath it.
    assert_eq!(node.commit_index(), LogIndex(3));
    assert_eq!(
        fx.handlers.commits(),
        vec![json!("thud"), json!("thud"), json!({"foo": "bar"})]
    );
}

#[test]
fn older_term_entries_never_commit_by_count_alone() {
    let fx = Fixture::new();
    let mut node = elected_leader(&fx);

    let heartbeat = fx.handlers.appends_to("gamma").remove(0);
    let rsp = AppendEntriesResponse::reply_to(&heartbeat, Term(3), true);
    node.append_entries_response(&NodeId::from("gamma"), &rsp).unwrap();

    // Entries 1 and 2 are on a majority, but both spawned before term 3.
    assert_eq!(node.commit_index(), LogIndex::ZERO);
    assert!(fx.handlers.commits().is_empty());
}

#[test]
fn stale_success_response_cannot_regress_match_index() {
    let fx = Fixture::new();
    let mut node = elected_leader(&fx);
    fx.handlers.clear();

    node.propose(json!("a")).unwrap();
    node.timeout().unwrap();
    let with_entry = fx.handlers.appends_to("gamma").remove(0);

    let fresh = AppendEntriesResponse::reply_to(&with_entry, Term(3), true);
    node.append_entries_response(&NodeId::from("gamma"), &fresh).unwrap();
    assert_eq!(node.commit_index(), LogIndex(3));

    // A duplicate of the earlier heartbeat response arrives late.
    let stale = AppendEntriesResponse {
        term: Term(3),
        success: true,
        request_term: Term(3),
        prev_log_index: LogIndex(2),
        entries_len: 0,
    };
    node.append_entries_response(&NodeId::from("gamma"), &stale).unwrap();

    assert_eq!(node.commit_index(), LogIndex(3));
    fx.handlers.clear();
    node.timeout().unwrap();
    // gamma is still known to be caught up.
    assert!(fx.handlers.appends_to("gamma")[0].is_heartbeat());
}

#[test]
fn higher_term_response_demotes_the_leader() {
    let fx = Fixture::new();
    let mut node = elected_leader(&fx);

    let heartbeat = fx.handlers.appends_to("gamma").remove(0);
    let rsp = AppendEntriesResponse::reply_to(&heartbeat, Term(4), false);
    node.append_entries_response(&NodeId::from("gamma"), &rsp).unwrap();

    assert_eq!(node.role(), RaftRole::Follower);
    assert_eq!(node.term(), Term(4));
    assert!(node.leader().is_none());
}

#[test]
fn proposals_replicate_on_the_next_heartbeat() {
    let fx = Fixture::new();
    let mut node = elected_leader(&fx);
    fx.handlers.clear();

    let index = node.propose(json!({"put": "v"})).unwrap();
    assert_eq!(index, LogIndex(3));
    // Nothing goes out at propose time.
    assert!(fx.handlers.appends().is_empty());

    node.timeout().unwrap();
    for peer in ["beta", "gamma"] {
        let sent = fx.handlers.appends_to(peer);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].entries.len(), 1);
        assert_eq!(sent[0].entries[0].action, json!({"put": "v"}));
    }
}

#[test]
fn restarted_node_reports_the_log_it_shut_down_with() {
    let fx = Fixture::new();
    {
        let mut node = elected_leader(&fx);
        node.propose(json!("a")).unwrap();
        node.propose(json!("b")).unwrap();
        assert_eq!(node.log().last_index(), LogIndex(4));
    }

    let node = fx.node();
    assert_eq!(node.role(), RaftRole::Follower);
    assert_eq!(node.term(), Term(3));
    assert_eq!(node.log().last_index(), LogIndex(4));
    assert_eq!(node.log().last_term(), Term(3));
    assert_eq!(node.log().vote_for(Term(3)), Some(&NodeId::from("alpha")));
}
