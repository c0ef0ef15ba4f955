//! Pending-change accumulation on the authority side.
//!
//! The log keeps at most one entry per variable id: a later change to
//! the same id overwrites the queued one, so a flush carries only final
//! states. A `Clear` supersedes everything queued before it; entries
//! recorded after it survive and flush behind it.

use std::collections::HashMap;

use crate::value::{Var, VarId};

/// Replicated operation kinds, one byte on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOp {
    Add,
    Set,
    Remove,
    Clear,
}

impl ChangeOp {
    pub fn wire_tag(&self) -> u8 {
        match self {
            ChangeOp::Add => 0,
            ChangeOp::Set => 1,
            ChangeOp::Remove => 2,
            ChangeOp::Clear => 3,
        }
    }

    pub fn from_wire_tag(tag: u8) -> Option<ChangeOp> {
        match tag {
            0 => Some(ChangeOp::Add),
            1 => Some(ChangeOp::Set),
            2 => Some(ChangeOp::Remove),
            3 => Some(ChangeOp::Clear),
            _ => None,
        }
    }
}

/// One queued (and one decoded) replication line
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEntry {
    pub op: ChangeOp,
    pub key: VarId,
    /// Payload; absent only for Clear
    pub var: Option<Var>,
    /// Authority instance id; carried on the wire for Add/Set only
    pub originator: i32,
}

impl ChangeEntry {
    pub fn clear() -> ChangeEntry {
        ChangeEntry {
            op: ChangeOp::Clear,
            key: 0,
            var: None,
            originator: 0,
        }
    }
}

/// Collapsing queue of unflushed changes
#[derive(Debug, Default)]
pub struct ChangeLog {
    changes: HashMap<VarId, ChangeEntry>,
    clear_pending: bool,
}

impl ChangeLog {
    pub fn new() -> ChangeLog {
        ChangeLog {
            changes: HashMap::new(),
            clear_pending: false,
        }
    }

    /// Queue a change. Per-id entries collapse. A Clear drops the
    /// entries queued so far; anything recorded afterwards is kept and
    /// replays on the observer after its wipe.
    pub fn record(&mut self, entry: ChangeEntry) {
        if entry.op == ChangeOp::Clear {
            self.changes.clear();
            self.clear_pending = true;
        } else {
            self.changes.insert(entry.key, entry);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && !self.clear_pending
    }

    pub fn len(&self) -> usize {
        self.changes.len() + usize::from(self.clear_pending)
    }

    /// Delta frames a flush of the current content would produce. The
    /// whole log goes out as one frame, so this is 0 or 1; snapshots
    /// embed it as the observer's skip-ahead counter.
    pub fn pending_frames(&self) -> u32 {
        u32::from(!self.is_empty())
    }

    /// Empty the log: any pending Clear first, then the surviving
    /// entries sorted by key
    pub fn drain_ordered(&mut self) -> Vec<ChangeEntry> {
        let mut out = Vec::with_capacity(self.len());
        if self.clear_pending {
            out.push(ChangeEntry::clear());
            self.clear_pending = false;
        }
        let mut entries: Vec<ChangeEntry> = self.changes.drain().map(|(_, e)| e).collect();
        entries.sort_unstable_by_key(|e| e.key);
        out.extend(entries);
        out
    }
}
