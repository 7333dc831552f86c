//! MongoDB wire protocol: framing, per-opcode codec, and reply builders.
//!
//! Three layers, leaves first:
//! - [`reader`] — the byte-budget-bound Framed Reader primitive decoders.
//! - [`codec`] — per-opcode decode routines and the OP_MSG section model.
//! - [`reply`] — OP_REPLY / OP_MSG reply builders and their wire encoding.

pub mod codec;
pub mod reader;
pub mod reply;

pub use codec::{
    decode_delete, decode_get_more, decode_insert, decode_kill_cursors, decode_op_msg,
    decode_query, decode_update, Delete, GetMore, Insert, KillCursors, Msg, MsgSection, Query,
    Update,
};
pub use reader::FramedReader;
pub use reply::{MsgReply, Reply, ResponseFlags};

pub const HEADER_LEN: usize = 16;

/// The closed set of opcodes named in the wire protocol (spec §3). Any other
/// `i32` is "unsupported" and is handled as an opaque, drain-only payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Reply,
    Update,
    Insert,
    Reserved,
    Query,
    GetMore,
    Delete,
    KillCursors,
    Msg,
}

pub const OP_REPLY: i32 = 1;
pub const OP_UPDATE: i32 = 2001;
pub const OP_INSERT: i32 = 2002;
pub const OP_RESERVED: i32 = 2003;
pub const OP_QUERY: i32 = 2004;
pub const OP_GET_MORE: i32 = 2005;
pub const OP_DELETE: i32 = 2006;
pub const OP_KILL_CURSORS: i32 = 2007;
pub const OP_MSG: i32 = 2013;

impl OpCode {
    pub fn from_i32(code: i32) -> Option<Self> {
        Some(match code {
            OP_REPLY => OpCode::Reply,
            OP_UPDATE => OpCode::Update,
            OP_INSERT => OpCode::Insert,
            OP_RESERVED => OpCode::Reserved,
            OP_QUERY => OpCode::Query,
            OP_GET_MORE => OpCode::GetMore,
            OP_DELETE => OpCode::Delete,
            OP_KILL_CURSORS => OpCode::KillCursors,
            OP_MSG => OpCode::Msg,
            _ => return None,
        })
    }

    pub fn as_i32(self) -> i32 {
        match self {
            OpCode::Reply => OP_REPLY,
            OpCode::Update => OP_UPDATE,
            OpCode::Insert => OP_INSERT,
            OpCode::Reserved => OP_RESERVED,
            OpCode::Query => OP_QUERY,
            OpCode::GetMore => OP_GET_MORE,
            OpCode::Delete => OP_DELETE,
            OpCode::KillCursors => OP_KILL_CURSORS,
            OpCode::Msg => OP_MSG,
        }
    }
}

/// The 16-byte, little-endian header that precedes every wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl MsgHeader {
    pub fn parse(buf: &[u8; HEADER_LEN]) -> Self {
        Self {
            message_length: i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            request_id: i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            response_to: i32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            op_code: i32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.message_length.to_le_bytes());
        out[4..8].copy_from_slice(&self.request_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.response_to.to_le_bytes());
        out[12..16].copy_from_slice(&self.op_code.to_le_bytes());
        out
    }

    /// Body length implied by `message_length`, i.e. `message_length - 16`.
    /// `None` if that would be negative (spec §4.6 step 2).
    pub fn body_len(&self) -> Option<usize> {
        let n = self.message_length - HEADER_LEN as i32;
        if n < 0 {
            None
        } else {
            Some(n as usize)
        }
    }
}
