//! Print the contents of a durable Raft log file
//!
//! The log format is one JSON record per line, which keeps it greppable as
//! is; this just renders the two record shapes in a tabular way.
//!
//! Run with: cargo run --example inspect_log -- /path/to/raft.log

use cairn_consensus::Record;
use std::fs;
use std::process::ExitCode;

fn main() -> ExitCode {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: inspect_log <log-file>");
        return ExitCode::FAILURE;
    };

    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            eprintln!("{}: {}", path, err);
            return ExitCode::FAILURE;
        }
    };

    for (number, line) in contents.lines().enumerate() {
        match Record::from_line(line) {
            Ok(Record::Vote { term, candidate }) => {
                println!("{:>5}  term {:>4}  vote   for {}", number + 1, term, candidate);
            }
            Ok(Record::Entry {
                term,
                spawn_term,
                index,
                action,
            }) => {
                println!(
                    "{:>5}  term {:>4}  entry  [{}] spawned at {}: {}",
                    number + 1,
                    term,
                    index,
                    spawn_term,
                    action
                );
            }
            Err(err) => {
                println!("{:>5}  unreadable: {}", number + 1, err);
            }
        }
    }
    ExitCode::SUCCESS
}
