//! YCSB-style workload traces.
//!
//! A trace file holds one operation per line: an upper-case token
//! (`INSERT`, `READ`, `UPDATE`, `DELETE`) followed by a numeric key.
//! Lines that do not parse are counted and skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One trace operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Insert the key.
    Insert(u64),
    /// Look the key up.
    Read(u64),
    /// Update the key's value.
    Update(u64),
    /// Delete the key.
    Delete(u64),
}

impl Op {
    /// The key the operation targets.
    pub fn key(&self) -> u64 {
        match *self {
            Op::Insert(k) | Op::Read(k) | Op::Update(k) | Op::Delete(k) => k,
        }
    }
}

/// Parse one trace line; `None` for blank or unrecognized lines.
pub fn parse_line(line: &str) -> Option<Op> {
    let mut parts = line.split_whitespace();
    let op = parts.next()?;
    let key: u64 = parts.next()?.parse().ok()?;
    match op {
        "INSERT" => Some(Op::Insert(key)),
        "READ" => Some(Op::Read(key)),
        "UPDATE" => Some(Op::Update(key)),
        "DELETE" => Some(Op::Delete(key)),
        _ => None,
    }
}

/// Load a whole trace file into memory.
pub fn load_trace(path: impl AsRef<Path>) -> std::io::Result<Vec<Op>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut ops = Vec::new();
    let mut skipped = 0u64;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Some(op) => ops.push(op),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::warn!(path = %path.display(), skipped, "unrecognized trace lines skipped");
    }
    Ok(ops)
}
