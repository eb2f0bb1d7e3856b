//! Durable log storage
//!
//! The log is the source of truth for all consensus state that must survive
//! crashes: vote decisions and replicated entries. It is an append-only file
//! of JSON records, one per line, fsynced on every append so that nothing is
//! externally observable before it is durable. In-memory indices are rebuilt
//! by scanning the file on open.

use crate::record::Record;
use crate::types::{Entry, LogIndex, NodeId, Term};
use crate::{RaftError, Result};

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File-backed Raft log
///
/// Owned exclusively by the state machine; no other component opens the
/// file for writing.
pub struct RaftLog {
    path: PathBuf,
    file: File,
    records: Vec<Record>,
    /// Position in `records` of the entry at index i+1
    entry_pos: Vec<usize>,
    votes: BTreeMap<Term, NodeId>,
    max_term: Term,
}

impl RaftLog {
    /// Open the log at `path`, creating it if absent, and replay its records.
    ///
    /// An unterminated final line is treated as a torn write: it is discarded
    /// and the file truncated at the last complete newline. Any complete line
    /// that fails to parse, any gap in entry indices, and any term regression
    /// between records is fatal.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };

        let valid_len = contents.rfind('\n').map(|at| at + 1).unwrap_or(0);
        if valid_len < contents.len() {
            warn!(
                "discarding {} bytes of torn tail record in {}",
                contents.len() - valid_len,
                path.display()
            );
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        let mut log = RaftLog {
            file: OpenOptions::new().create(true).append(true).open(&path)?,
            path,
            records: Vec::new(),
            entry_pos: Vec::new(),
            votes: BTreeMap::new(),
            max_term: Term::default(),
        };

        for (number, line) in contents[..valid_len].lines().enumerate() {
            let record = Record::from_line(line).map_err(|err| RaftError::CorruptRecord {
                line: number + 1,
                reason: err.to_string(),
            })?;
            log.absorb(record).map_err(|reason| RaftError::CorruptRecord {
                line: number + 1,
                reason,
            })?;
        }

        Ok(log)
    }

    /// Fold a replayed record into the in-memory indices, validating the
    /// durable-log invariants.
    fn absorb(&mut self, record: Record) -> std::result::Result<(), String> {
        let term = record.term();
        if term < self.max_term {
            return Err(format!(
                "term {} regresses below {}",
                term, self.max_term
            ));
        }
        self.max_term = term;

        match &record {
            Record::Vote { term, candidate } => {
                if let Some(prior) = self.votes.get(term) {
                    if prior != candidate {
                        return Err(format!(
                            "conflicting votes for term {}: {} and {}",
                            term, prior, candidate
                        ));
                    }
                }
                self.votes.insert(*term, candidate.clone());
            }
            Record::Entry { index, .. } => {
                let expected = self.last_index() + 1;
                if *index != expected {
                    return Err(format!("entry index {} where {} expected", index, expected));
                }
                self.entry_pos.push(self.records.len());
            }
        }
        self.records.push(record);
        Ok(())
    }

    /// Write a record line, flush, and fsync before returning.
    fn append_record(&mut self, record: Record) -> Result<()> {
        let line = record
            .to_line()
            .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        self.file.sync_data()?;

        self.max_term = self.max_term.max(record.term());
        self.records.push(record);
        Ok(())
    }

    /// Durably record that this node voted for `candidate` in `term`.
    pub fn append_vote(&mut self, term: Term, candidate: &NodeId) -> Result<()> {
        assert!(
            term >= self.max_term,
            "vote for term {} behind log term {}",
            term,
            self.max_term
        );
        self.append_record(Record::Vote {
            term,
            candidate: candidate.clone(),
        })?;
        self.votes.insert(term, candidate.clone());
        Ok(())
    }

    /// Durably append the entry at `index`, which must be exactly one past
    /// the current last index.
    pub fn append_entry(
        &mut self,
        term: Term,
        spawn_term: Term,
        index: LogIndex,
        action: serde_json::Value,
    ) -> Result<()> {
        assert_eq!(
            index,
            self.last_index() + 1,
            "entry appended out of sequence"
        );
        let pos = self.records.len();
        self.append_record(Record::Entry {
            term,
            spawn_term,
            index,
            action,
        })?;
        self.entry_pos.push(pos);
        Ok(())
    }

    /// Remove every entry record with index >= `from`, preserving vote
    /// records and record order.
    ///
    /// The log is rewritten to a sibling temp file and atomically renamed
    /// into place, so a crash mid-truncation leaves either the old or the
    /// new log, never a mixture.
    pub fn truncate_from(&mut self, from: LogIndex) -> Result<()> {
        assert!(from > LogIndex::ZERO, "cannot truncate from index 0");
        if from > self.last_index() {
            return Ok(());
        }
        info!(
            "truncating log entries {}..={}",
            from,
            self.last_index()
        );

        let keep = |record: &Record| match record {
            Record::Vote { .. } => true,
            Record::Entry { index, .. } => *index < from,
        };

        let tmp_path = self.path.with_extension("rewrite");
        {
            let mut tmp = File::create(&tmp_path)?;
            for record in self.records.iter().filter(|record| keep(record)) {
                let line = record
                    .to_line()
                    .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;
                tmp.write_all(line.as_bytes())?;
                tmp.write_all(b"\n")?;
            }
            tmp.flush()?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.records.retain(keep);
        self.entry_pos.clear();
        for (at, record) in self.records.iter().enumerate() {
            if matches!(record, Record::Entry { .. }) {
                self.entry_pos.push(at);
            }
        }
        Ok(())
    }

    /// Index of the most recent entry record, or 0 if none
    pub fn last_index(&self) -> LogIndex {
        LogIndex(self.entry_pos.len() as u64)
    }

    /// Spawn term of the most recent entry record, or 0 if none
    pub fn last_term(&self) -> Term {
        self.entry_pos
            .last()
            .and_then(|&at| match &self.records[at] {
                Record::Entry { spawn_term, .. } => Some(*spawn_term),
                Record::Vote { .. } => None,
            })
            .unwrap_or_default()
    }

    /// The entry at `index`, if present
    pub fn entry(&self, index: LogIndex) -> Option<Entry> {
        if index == LogIndex::ZERO {
            return None;
        }
        let at = *self.entry_pos.get(index.0 as usize - 1)?;
        match &self.records[at] {
            Record::Entry {
                spawn_term, action, ..
            } => Some(Entry::new(*spawn_term, index, action.clone())),
            Record::Vote { .. } => None,
        }
    }

    /// Spawn term of the entry at `index`, if present
    pub fn term_of(&self, index: LogIndex) -> Option<Term> {
        if index == LogIndex::ZERO {
            return None;
        }
        let at = *self.entry_pos.get(index.0 as usize - 1)?;
        match &self.records[at] {
            Record::Entry { spawn_term, .. } => Some(*spawn_term),
            Record::Vote { .. } => None,
        }
    }

    /// The endpoint this node voted for in `term`, if any
    pub fn vote_for(&self, term: Term) -> Option<&NodeId> {
        self.votes.get(&term)
    }

    /// The highest term across all durable records
    pub fn max_term(&self) -> Term {
        self.max_term
    }
}
