//! One-writer/N-replica state sync. The authority stays `Writable` and
//! queues everything it changes; an observer flips to `ReadOnly` the
//! first time any sync payload reaches it and from then on only ever
//! mirrors decoded frames.

use std::io;

use tracing::{debug, info, warn};

use crate::bus::{ChangeHandler, SubscriptionToken};
use crate::error::VarError;
use crate::ops::{Comparison, Operation};
use crate::scene::{Scene, VariableScope};
use crate::sync::changes::{ChangeEntry, ChangeLog, ChangeOp};
use crate::sync::codec::{self, DeltaFrame, SnapshotFrame};
use crate::trail::CausalTrail;
use crate::value::{is_global_id, Var, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRole {
    Writable,
    ReadOnly,
}

/// Observer-side hook invoked once per applied entry
pub type SyncCallback = Box<dyn FnMut(ChangeOp, VarId, Option<&Var>) + Send>;

/// A scene wrapped with replication state
pub struct SyncedScene {
    scene: Scene,
    role: SyncRole,
    log: ChangeLog,
    /// Delta frames still to discard because the snapshot already
    /// contained their content
    skip_ahead: u32,
    callback: Option<SyncCallback>,
    /// This instance's id, stamped on outgoing Add/Set entries
    instance_id: i32,
}

impl SyncedScene {
    pub fn new(scene: Scene, instance_id: i32) -> SyncedScene {
        SyncedScene {
            scene,
            role: SyncRole::Writable,
            log: ChangeLog::new(),
            skip_ahead: 0,
            callback: None,
            instance_id,
        }
    }

    pub fn role(&self) -> SyncRole {
        self.role
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn set_callback(&mut self, callback: SyncCallback) {
        self.callback = Some(callback);
    }

    pub fn pending_changes(&self) -> usize {
        self.log.len()
    }

    /// Local mutation. Queues a Set entry for observers when the value
    /// actually moved; global-range ids are forwarded by the scene and
    /// replicate through the global scope, never through this log.
    pub fn modify(&mut self, id: VarId, op: &Operation, originator: &str) -> Result<bool, VarError> {
        self.modify_traced(id, op, originator, CausalTrail::from_originator(originator))
    }

    /// Fire an Event variable and queue the edge for observers
    pub fn trigger(&mut self, id: VarId, originator: &str) -> Result<(), VarError> {
        self.trigger_traced(id, originator, CausalTrail::from_originator(originator))
    }

    /// Snapshot the current state of `id`, plus every link it
    /// recomputed, into the change log. Observers mirror link values
    /// rather than re-deriving them; complex definitions never travel.
    fn record_local_set(&mut self, id: VarId) {
        if is_global_id(id) {
            return;
        }
        let mut keys = vec![id];
        keys.extend(self.scene.transitive_dependents(id));
        for key in keys {
            if let Ok(var) = self.scene.var(key) {
                self.log.record(ChangeEntry {
                    op: ChangeOp::Set,
                    key,
                    var: Some(var),
                    originator: self.instance_id,
                });
            }
        }
    }

    /// Add a variable at runtime, outside the template
    pub fn insert(&mut self, var: Var) -> Result<(), VarError> {
        self.check_writable()?;
        let entry = ChangeEntry {
            op: ChangeOp::Add,
            key: var.id,
            var: Some(var.clone()),
            originator: self.instance_id,
        };
        self.scene.apply_remote_set(var, "insert");
        self.log.record(entry);
        Ok(())
    }

    pub fn remove(&mut self, id: VarId) -> Result<(), VarError> {
        self.check_writable()?;
        let var = self.scene.var(id)?;
        self.scene.apply_remote_remove(id);
        self.log.record(ChangeEntry {
            op: ChangeOp::Remove,
            key: id,
            var: Some(var),
            originator: self.instance_id,
        });
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), VarError> {
        self.check_writable()?;
        self.scene.apply_remote_clear();
        self.log.record(ChangeEntry::clear());
        Ok(())
    }

    fn check_writable(&self) -> Result<(), VarError> {
        match self.role {
            SyncRole::Writable => Ok(()),
            SyncRole::ReadOnly => Err(VarError::NotAuthorized),
        }
    }

    /// Full-state frame for a newly attached observer. Does not drain
    /// the log; the embedded counter tells the observer how many delta
    /// frames to discard instead.
    pub fn encode_snapshot(&self) -> io::Result<Vec<u8>> {
        let mut entries: Vec<Var> = self.scene.store().vars().cloned().collect();
        entries.sort_unstable_by_key(|v| v.id);
        codec::encode_snapshot(&SnapshotFrame {
            entries,
            pending_frames: self.log.pending_frames(),
        })
    }

    /// Flush queued changes into one delta frame; `None` when idle
    pub fn take_delta(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.log.is_empty() {
            return Ok(None);
        }
        let changes = self.log.drain_ordered();
        debug!(target: "sync", "Flushing {} change(s)", changes.len());
        codec::encode_delta(&DeltaFrame { changes }).map(Some)
    }

    /// Mirror a snapshot: drop local state, re-insert every entry
    /// through the normal mutation path (notifications fire), arm the
    /// skip-ahead counter.
    pub fn apply_snapshot(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.become_read_only();
        let frame = codec::decode_snapshot(bytes)?;

        self.scene.apply_remote_clear();
        for var in frame.entries {
            let key = var.id;
            let snapshot = var.clone();
            self.scene.apply_remote_set(var, "sync");
            if let Some(callback) = &mut self.callback {
                callback(ChangeOp::Add, key, Some(&snapshot));
            }
        }
        self.skip_ahead = frame.pending_frames;
        info!(target: "sync",
            "Snapshot applied: {} entries, skip-ahead {}",
            self.scene.len(), self.skip_ahead
        );
        Ok(())
    }

    /// Mirror one delta frame. Frames covered by the snapshot are
    /// parsed for validity but discarded whole.
    pub fn apply_delta(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.become_read_only();
        let frame = codec::decode_delta(bytes)?;

        if self.skip_ahead > 0 {
            self.skip_ahead -= 1;
            debug!(target: "sync",
                "Discarded delta already covered by snapshot ({} left to skip)",
                self.skip_ahead
            );
            return Ok(());
        }

        for change in frame.changes {
            match change.op {
                ChangeOp::Add | ChangeOp::Set => {
                    let Some(var) = change.var else { continue };
                    if change.op == ChangeOp::Set && !self.scene.store().contains(var.id) {
                        warn!(target: "sync",
                            "Set for unknown variable {}, inserting placeholder",
                            var.id
                        );
                    }
                    let key = var.id;
                    let snapshot = var.clone();
                    let originator = format!("remote:{}", change.originator);
                    self.scene.apply_remote_set(var, &originator);
                    if let Some(callback) = &mut self.callback {
                        callback(change.op, key, Some(&snapshot));
                    }
                }
                ChangeOp::Remove => {
                    self.scene.apply_remote_remove(change.key);
                    if let Some(callback) = &mut self.callback {
                        callback(ChangeOp::Remove, change.key, change.var.as_ref());
                    }
                }
                ChangeOp::Clear => {
                    self.scene.apply_remote_clear();
                    if let Some(callback) = &mut self.callback {
                        callback(ChangeOp::Clear, 0, None);
                    }
                }
            }
        }
        Ok(())
    }

    fn become_read_only(&mut self) {
        if self.role == SyncRole::Writable {
            self.role = SyncRole::ReadOnly;
            info!(target: "sync", "Instance {} now read-only", self.instance_id);
        }
    }
}

impl VariableScope for SyncedScene {
    fn modify_traced(
        &mut self,
        id: VarId,
        op: &Operation,
        originator: &str,
        trail: CausalTrail,
    ) -> Result<bool, VarError> {
        self.check_writable()?;
        let changed = self.scene.modify_traced(id, op, originator, trail)?;
        if changed {
            self.record_local_set(id);
        }
        Ok(changed)
    }

    fn trigger_traced(
        &mut self,
        id: VarId,
        originator: &str,
        trail: CausalTrail,
    ) -> Result<(), VarError> {
        self.check_writable()?;
        self.scene.trigger_traced(id, originator, trail)?;
        self.record_local_set(id);
        Ok(())
    }

    fn compare(&self, id: VarId, cmp: &Comparison) -> Result<bool, VarError> {
        self.scene.compare(id, cmp)
    }

    fn subscribe(&mut self, id: VarId, handler: ChangeHandler) -> SubscriptionToken {
        self.scene.subscribe(id, handler)
    }

    fn unsubscribe(&mut self, token: SubscriptionToken) {
        self.scene.unsubscribe(token)
    }
}
