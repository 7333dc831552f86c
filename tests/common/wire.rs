//! Shared wire-encoding helpers for black-box e2e tests. Hand-rolled rather
//! than reusing `mongowire::protocol`'s own encoder/decoder, so a bug in the
//! crate under test can't also hide itself in the test harness.

use bson::Document;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const OP_MSG: i32 = 2013;
pub const OP_QUERY: i32 = 2004;

/// Encodes a minimal OP_MSG with a single Body (kind 0) section.
pub fn encode_op_msg(body: &Document, request_id: i32) -> Vec<u8> {
    let doc_bytes = bson::to_vec(body).unwrap();
    let mut section = Vec::new();
    section.push(0u8);
    section.extend_from_slice(&doc_bytes);

    let body_len = 4 + section.len();
    let message_length = 16 + body_len;

    let mut out = Vec::with_capacity(message_length);
    out.extend_from_slice(&(message_length as i32).to_le_bytes());
    out.extend_from_slice(&request_id.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes()); // responseTo
    out.extend_from_slice(&OP_MSG.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // flagBits
    out.extend_from_slice(&section);
    out
}

/// Encodes a legacy OP_QUERY with an empty query document and no selector.
pub fn encode_op_query(full_collection_name: &str, query: &Document, request_id: i32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0i32.to_le_bytes()); // flags
    body.extend_from_slice(full_collection_name.as_bytes());
    body.push(0u8);
    body.extend_from_slice(&0i32.to_le_bytes()); // numberToSkip
    body.extend_from_slice(&1i32.to_le_bytes()); // numberToReturn
    body.extend_from_slice(&bson::to_vec(query).unwrap());

    let message_length = 16 + body.len();
    let mut out = Vec::with_capacity(message_length);
    out.extend_from_slice(&(message_length as i32).to_le_bytes());
    out.extend_from_slice(&request_id.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&OP_QUERY.to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Encodes a raw message with an arbitrary opcode and a body of raw bytes,
/// for exercising unsupported-opcode and truncated-frame scenarios.
pub fn encode_raw(op_code: i32, body: &[u8], request_id: i32) -> Vec<u8> {
    let message_length = 16 + body.len();
    let mut out = Vec::with_capacity(message_length);
    out.extend_from_slice(&(message_length as i32).to_le_bytes());
    out.extend_from_slice(&request_id.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&op_code.to_le_bytes());
    out.extend_from_slice(body);
    out
}

pub struct ReadReply {
    pub response_to: i32,
    pub op_code: i32,
    pub body: Vec<u8>,
}

pub async fn read_one_message(stream: &mut TcpStream) -> ReadReply {
    let mut header = [0u8; 16];
    stream.read_exact(&mut header).await.unwrap();
    let message_length = i32::from_le_bytes(header[0..4].try_into().unwrap());
    let response_to = i32::from_le_bytes(header[8..12].try_into().unwrap());
    let op_code = i32::from_le_bytes(header[12..16].try_into().unwrap());
    let mut body = vec![0u8; (message_length as usize) - 16];
    stream.read_exact(&mut body).await.unwrap();
    ReadReply {
        response_to,
        op_code,
        body,
    }
}

/// Decodes the single Body document out of an OP_MSG reply's bytes.
pub fn decode_op_msg_body(body: &[u8]) -> Document {
    // skip u32 flagBits
    let mut cursor = std::io::Cursor::new(&body[4..]);
    let kind = {
        use std::io::Read;
        let mut b = [0u8; 1];
        cursor.read_exact(&mut b).unwrap();
        b[0]
    };
    assert_eq!(kind, 0, "expected a kind-0 Body section");
    Document::from_reader(&mut cursor).unwrap()
}

/// Decodes the legacy OP_REPLY fixed fields plus its first document, if any.
pub fn decode_op_reply(body: &[u8]) -> (i32, Option<Document>) {
    let response_flags = i32::from_le_bytes(body[0..4].try_into().unwrap());
    let number_returned = i32::from_le_bytes(body[16..20].try_into().unwrap());
    let doc = if number_returned > 0 {
        let mut cursor = std::io::Cursor::new(&body[20..]);
        Some(Document::from_reader(&mut cursor).unwrap())
    } else {
        None
    };
    (response_flags, doc)
}

pub async fn connect(addr: std::net::SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

#[allow(dead_code)]
pub async fn send(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.unwrap();
}
