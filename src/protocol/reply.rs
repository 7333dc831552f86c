//! Reply Builder (spec §4.3): construction and wire serialization of
//! OP_REPLY and OP_MSG responses. Both builders serialize their body into a
//! scratch buffer first and only then prepend the header, since
//! `messageLength` is only computable once the body is sized — then the
//! whole thing goes to the transport in one `write_all` so a reply is never
//! observed half-written on the wire (spec §4.2, §5 "Ordering guarantees").

use crate::error::Result;
use crate::protocol::{MsgHeader, OP_MSG, OP_REPLY};
use bson::Document;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Bit flags for OP_REPLY's `responseFlags` field. The Go source
/// (`mongo.go`) numbers these as a plain 0..3 `iota` enum, but the wire
/// protocol defines them as individual bits (bit 0 = CursorNotFound, bit 1 =
/// QueryFailure, ...); spec.md's Testable Property 6 pins `responseFlags=2`
/// for `QueryFailure` explicitly, which only holds under the bit-flag
/// reading. Values below follow the bit positions, not the Go ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ResponseFlags {
    CursorNotFound = 1,
    QueryFailure = 2,
    ShardConfigStale = 4,
    AwaitCapable = 8,
}

/// An OP_REPLY builder (spec §4.3 `new_reply`).
pub struct Reply {
    pub response_to: i32,
    pub response_flags: i32,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub documents: Vec<Document>,
}

impl Reply {
    pub fn new(request_id: i32) -> Self {
        Self {
            response_to: request_id,
            response_flags: 0,
            cursor_id: 0,
            starting_from: 0,
            documents: Vec::new(),
        }
    }

    pub fn with_flags(mut self, flags: ResponseFlags) -> Self {
        self.response_flags = flags as i32;
        self
    }

    pub fn with_documents(mut self, documents: Vec<Document>) -> Self {
        self.documents = documents;
        self
    }

    /// Serialize and write the whole message in a single contiguous
    /// emission (spec §4.2).
    pub async fn write<W: AsyncWrite + Unpin>(&self, sink: &mut W) -> Result<()> {
        let mut docs_buf = Vec::new();
        for doc in &self.documents {
            docs_buf.extend_from_slice(&bson::to_vec(doc).map_err(|e| {
                crate::error::Error::MalformedDocument(format!("encoding reply document: {e}"))
            })?);
        }

        let number_returned = self.documents.len() as i32;
        let body_len = 4 + 8 + 4 + 4 + docs_buf.len();
        let header = MsgHeader {
            message_length: (crate::protocol::HEADER_LEN + body_len) as i32,
            request_id: 0,
            response_to: self.response_to,
            op_code: OP_REPLY,
        };

        let mut out = Vec::with_capacity(header.message_length as usize);
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&self.response_flags.to_le_bytes());
        out.extend_from_slice(&self.cursor_id.to_le_bytes());
        out.extend_from_slice(&self.starting_from.to_le_bytes());
        out.extend_from_slice(&number_returned.to_le_bytes());
        out.extend_from_slice(&docs_buf);

        sink.write_all(&out).await?;
        Ok(())
    }
}

/// One outbound OP_MSG section, mirroring [`crate::protocol::codec::MsgSection`]
/// on the encode side (spec §9 "model as a sum type... on the encode side
/// too, to compute section sizes correctly").
pub enum OutSection {
    Body(Document),
    DocumentSequence {
        identifier: String,
        documents: Vec<Document>,
    },
}

/// An OP_MSG reply builder (spec §4.3 `new_msg_reply`).
pub struct MsgReply {
    pub response_to: i32,
    pub flag_bits: u32,
    pub sections: Vec<OutSection>,
}

impl MsgReply {
    pub fn new(request_id: i32) -> Self {
        Self {
            response_to: request_id,
            flag_bits: 0,
            sections: Vec::new(),
        }
    }

    pub fn with_body(mut self, doc: Document) -> Self {
        self.sections.push(OutSection::Body(doc));
        self
    }

    pub fn with_document_sequence(
        mut self,
        identifier: impl Into<String>,
        documents: Vec<Document>,
    ) -> Self {
        self.sections.push(OutSection::DocumentSequence {
            identifier: identifier.into(),
            documents,
        });
        self
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, sink: &mut W) -> Result<()> {
        let mut body = Vec::new();
        for section in &self.sections {
            match section {
                OutSection::Body(doc) => {
                    body.push(0u8);
                    body.extend_from_slice(&bson::to_vec(doc).map_err(|e| {
                        crate::error::Error::MalformedDocument(format!(
                            "encoding reply section: {e}"
                        ))
                    })?);
                }
                OutSection::DocumentSequence {
                    identifier,
                    documents,
                } => {
                    let mut docs_buf = Vec::new();
                    for doc in documents {
                        docs_buf.extend_from_slice(&bson::to_vec(doc).map_err(|e| {
                            crate::error::Error::MalformedDocument(format!(
                                "encoding reply document sequence: {e}"
                            ))
                        })?);
                    }
                    let size = 4 + identifier.len() + 1 + docs_buf.len();
                    body.push(1u8);
                    body.extend_from_slice(&(size as i32).to_le_bytes());
                    body.extend_from_slice(identifier.as_bytes());
                    body.push(0u8);
                    body.extend_from_slice(&docs_buf);
                }
            }
        }

        let header = MsgHeader {
            message_length: (crate::protocol::HEADER_LEN + 4 + body.len()) as i32,
            request_id: 0,
            response_to: self.response_to,
            op_code: OP_MSG,
        };

        let mut out = Vec::with_capacity(header.message_length as usize);
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&self.flag_bits.to_le_bytes());
        out.extend_from_slice(&body);

        sink.write_all(&out).await?;
        Ok(())
    }
}
