//! Wire encoding for snapshot and delta frames. Everything is
//! little-endian; strings are u16 length-prefixed UTF-8 and Event
//! payloads occupy zero bytes.

use std::io::{self, Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::sync::changes::{ChangeEntry, ChangeOp};
use crate::value::{Value, Var, VarId, VarKind};

/// Full-state frame: every entry plus the skip-ahead counter the
/// observer arms against deltas already reflected in the snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotFrame {
    pub entries: Vec<Var>,
    pub pending_frames: u32,
}

/// Incremental frame: one flush of the authority's change log
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaFrame {
    pub changes: Vec<ChangeEntry>,
}

fn bad_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> io::Result<()> {
    match value {
        Value::Bool(b) => buf.write_u8(u8::from(*b))?,
        Value::Int(i) => buf.write_i32::<LittleEndian>(*i)?,
        Value::Float(f) => buf.write_f32::<LittleEndian>(*f)?,
        Value::Str(s) => {
            let bytes = s.as_bytes();
            if bytes.len() > u16::MAX as usize {
                return Err(bad_data(format!("string payload too long: {}", bytes.len())));
            }
            buf.write_u16::<LittleEndian>(bytes.len() as u16)?;
            buf.extend_from_slice(bytes);
        }
        Value::Event => {}
    }
    Ok(())
}

fn read_value(cur: &mut Cursor<&[u8]>, kind: VarKind) -> io::Result<Value> {
    let value = match kind {
        VarKind::Bool => Value::Bool(cur.read_u8()? != 0),
        VarKind::Int => Value::Int(cur.read_i32::<LittleEndian>()?),
        VarKind::Float => Value::Float(cur.read_f32::<LittleEndian>()?),
        VarKind::Str => {
            let len = cur.read_u16::<LittleEndian>()? as usize;
            let mut bytes = vec![0u8; len];
            cur.read_exact(&mut bytes)?;
            let s = String::from_utf8(bytes)
                .map_err(|e| bad_data(format!("invalid UTF-8 string payload: {}", e)))?;
            Value::Str(s)
        }
        VarKind::Event => Value::Event,
    };
    Ok(value)
}

/// `(id:i32, kind:u8, payload)`
fn write_var(buf: &mut Vec<u8>, var: &Var) -> io::Result<()> {
    buf.write_i32::<LittleEndian>(var.id)?;
    buf.write_u8(var.kind.wire_tag())?;
    write_value(buf, &var.value)
}

fn read_var(cur: &mut Cursor<&[u8]>) -> io::Result<Var> {
    let id: VarId = cur.read_i32::<LittleEndian>()?;
    let tag = cur.read_u8()?;
    let kind = VarKind::from_wire_tag(tag)
        .ok_or_else(|| bad_data(format!("unknown kind tag {} for variable {}", tag, id)))?;
    let value = read_value(cur, kind)?;
    Ok(Var::new(id, value))
}

pub fn encode_snapshot(frame: &SnapshotFrame) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(frame.entries.len() as u32)?;
    for var in &frame.entries {
        write_var(&mut buf, var)?;
    }
    buf.write_u32::<LittleEndian>(frame.pending_frames)?;
    Ok(buf)
}

pub fn decode_snapshot(bytes: &[u8]) -> io::Result<SnapshotFrame> {
    let mut cur = Cursor::new(bytes);
    let count = cur.read_u32::<LittleEndian>()?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        entries.push(read_var(&mut cur)?);
    }
    let pending_frames = cur.read_u32::<LittleEndian>()?;
    Ok(SnapshotFrame {
        entries,
        pending_frames,
    })
}

pub fn encode_delta(frame: &DeltaFrame) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(frame.changes.len() as u32)?;
    for change in &frame.changes {
        buf.write_u8(change.op.wire_tag())?;
        match change.op {
            ChangeOp::Add | ChangeOp::Set => {
                let var = change
                    .var
                    .as_ref()
                    .ok_or_else(|| bad_data(format!("{} without payload", change.op)))?;
                write_var(&mut buf, var)?;
                buf.write_i32::<LittleEndian>(change.originator)?;
            }
            ChangeOp::Remove => {
                let var = change
                    .var
                    .as_ref()
                    .ok_or_else(|| bad_data("REMOVE without payload".to_string()))?;
                write_var(&mut buf, var)?;
            }
            ChangeOp::Clear => {}
        }
    }
    Ok(buf)
}

pub fn decode_delta(bytes: &[u8]) -> io::Result<DeltaFrame> {
    let mut cur = Cursor::new(bytes);
    let count = cur.read_u32::<LittleEndian>()?;
    let mut changes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let tag = cur.read_u8()?;
        let op = ChangeOp::from_wire_tag(tag)
            .ok_or_else(|| bad_data(format!("unknown change op tag {}", tag)))?;
        let change = match op {
            ChangeOp::Add | ChangeOp::Set => {
                let var = read_var(&mut cur)?;
                let originator = cur.read_i32::<LittleEndian>()?;
                ChangeEntry {
                    op,
                    key: var.id,
                    var: Some(var),
                    originator,
                }
            }
            ChangeOp::Remove => {
                let var = read_var(&mut cur)?;
                ChangeEntry {
                    op,
                    key: var.id,
                    var: Some(var),
                    originator: 0,
                }
            }
            ChangeOp::Clear => ChangeEntry::clear(),
        };
        changes.push(change);
    }
    Ok(DeltaFrame { changes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_roundtrip() {
        let frame = SnapshotFrame {
            entries: vec![
                Var::bool(1, true),
                Var::int(2, -7),
                Var::float(3, 1.5),
                Var::string(4, "héllo"),
                Var::event(5),
            ],
            pending_frames: 2,
        };
        let bytes = encode_snapshot(&frame).unwrap();
        let decoded = decode_snapshot(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_delta_roundtrip_all_ops() {
        let frame = DeltaFrame {
            changes: vec![
                ChangeEntry {
                    op: ChangeOp::Add,
                    key: 1,
                    var: Some(Var::int(1, 42)),
                    originator: 9,
                },
                ChangeEntry {
                    op: ChangeOp::Set,
                    key: 2,
                    var: Some(Var::string(2, "state")),
                    originator: 9,
                },
                ChangeEntry {
                    op: ChangeOp::Remove,
                    key: 3,
                    var: Some(Var::bool(3, false)),
                    originator: 0,
                },
                ChangeEntry::clear(),
            ],
        };
        let bytes = encode_delta(&frame).unwrap();
        let decoded = decode_delta(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_unknown_tags_are_rejected() {
        // snapshot with one entry carrying kind tag 0xFF
        let mut bytes = Vec::new();
        byteorder::WriteBytesExt::write_u32::<LittleEndian>(&mut bytes, 1).unwrap();
        byteorder::WriteBytesExt::write_i32::<LittleEndian>(&mut bytes, 7).unwrap();
        bytes.push(0xFF);
        assert!(decode_snapshot(&bytes).is_err());

        // delta with op tag 0xFF
        let mut bytes = Vec::new();
        byteorder::WriteBytesExt::write_u32::<LittleEndian>(&mut bytes, 1).unwrap();
        bytes.push(0xFF);
        assert!(decode_delta(&bytes).is_err());
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let frame = SnapshotFrame {
            entries: vec![Var::string(4, "hello")],
            pending_frames: 0,
        };
        let bytes = encode_snapshot(&frame).unwrap();
        assert!(decode_snapshot(&bytes[..bytes.len() - 6]).is_err());
    }
}
