pub mod changes;
pub mod codec;
pub mod replica;

pub use changes::{ChangeEntry, ChangeLog, ChangeOp};
pub use codec::{DeltaFrame, SnapshotFrame};
pub use replica::{SyncCallback, SyncRole, SyncedScene};
