//! Per-opcode decode routines (spec §4.2). Field orderings are copied from
//! the MongoDB wire spec via `examples/original_source/mongo.go`. Every
//! decoder here drains its own framed reader down to empty before returning,
//! so the server loop's explicit drain step is a no-op in the common case
//! and only matters when a decoder returns early on error.

use crate::error::Result;
use crate::protocol::reader::FramedReader;
use bson::Document;
use tokio::io::AsyncRead;

#[derive(Debug, Clone)]
pub struct Query {
    pub flags: i32,
    pub full_collection_name: String,
    pub number_to_skip: i32,
    pub number_to_return: i32,
    pub query: Document,
    pub return_fields_selector: Option<Document>,
}

pub async fn decode_query<R: AsyncRead + Unpin>(r: &mut FramedReader<'_, R>) -> Result<Query> {
    let flags = r.read_i32().await?;
    let full_collection_name = r.read_cstring().await?;
    let number_to_skip = r.read_i32().await?;
    let number_to_return = r.read_i32().await?;
    let query = r.read_document().await?;
    let return_fields_selector = if r.is_empty() {
        None
    } else {
        Some(r.read_document().await?)
    };
    Ok(Query {
        flags,
        full_collection_name,
        number_to_skip,
        number_to_return,
        query,
        return_fields_selector,
    })
}

#[derive(Debug, Clone)]
pub struct Insert {
    pub flags: i32,
    pub full_collection_name: String,
    pub documents: Vec<Document>,
}

pub async fn decode_insert<R: AsyncRead + Unpin>(r: &mut FramedReader<'_, R>) -> Result<Insert> {
    let flags = r.read_i32().await?;
    let full_collection_name = r.read_cstring().await?;
    let documents = r.read_documents().await?;
    Ok(Insert {
        flags,
        full_collection_name,
        documents,
    })
}

#[derive(Debug, Clone)]
pub struct Update {
    pub full_collection_name: String,
    pub flags: i32,
    pub selector: Document,
    pub update: Document,
}

pub async fn decode_update<R: AsyncRead + Unpin>(r: &mut FramedReader<'_, R>) -> Result<Update> {
    let _zero = r.read_i32().await?;
    let full_collection_name = r.read_cstring().await?;
    let flags = r.read_i32().await?;
    let selector = r.read_document().await?;
    let update = r.read_document().await?;
    Ok(Update {
        full_collection_name,
        flags,
        selector,
        update,
    })
}

#[derive(Debug, Clone)]
pub struct Delete {
    pub full_collection_name: String,
    pub flags: i32,
    pub selector: Document,
}

pub async fn decode_delete<R: AsyncRead + Unpin>(r: &mut FramedReader<'_, R>) -> Result<Delete> {
    let _zero = r.read_i32().await?;
    let full_collection_name = r.read_cstring().await?;
    let flags = r.read_i32().await?;
    let selector = r.read_document().await?;
    Ok(Delete {
        full_collection_name,
        flags,
        selector,
    })
}

#[derive(Debug, Clone)]
pub struct GetMore {
    pub full_collection_name: String,
    pub number_to_return: i32,
    pub cursor_id: i64,
}

pub async fn decode_get_more<R: AsyncRead + Unpin>(
    r: &mut FramedReader<'_, R>,
) -> Result<GetMore> {
    let _zero = r.read_i32().await?;
    let full_collection_name = r.read_cstring().await?;
    let number_to_return = r.read_i32().await?;
    let cursor_id = r.read_i64().await?;
    Ok(GetMore {
        full_collection_name,
        number_to_return,
        cursor_id,
    })
}

#[derive(Debug, Clone)]
pub struct KillCursors {
    pub number_of_cursor_ids: i32,
    pub cursor_ids: Vec<i64>,
}

pub async fn decode_kill_cursors<R: AsyncRead + Unpin>(
    r: &mut FramedReader<'_, R>,
) -> Result<KillCursors> {
    let _zero = r.read_i32().await?;
    let number_of_cursor_ids = r.read_i32().await?;
    let mut cursor_ids = Vec::new();
    while !r.is_empty() {
        cursor_ids.push(r.read_i64().await?);
    }
    Ok(KillCursors {
        number_of_cursor_ids,
        cursor_ids,
    })
}

/// One OP_MSG section: either the single command Body (kind 0) or a
/// Document Sequence (kind 1) carrying a named, possibly-empty list of
/// documents (spec §3).
#[derive(Debug, Clone)]
pub enum MsgSection {
    Body(Document),
    DocumentSequence {
        identifier: String,
        documents: Vec<Document>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Msg {
    pub flag_bits: u32,
    pub sections: Vec<MsgSection>,
}

impl Msg {
    /// The single Body section's document, if one was present (spec §3
    /// invariant: at most one Body section per message).
    pub fn body(&self) -> Option<&Document> {
        self.sections.iter().find_map(|s| match s {
            MsgSection::Body(doc) => Some(doc),
            _ => None,
        })
    }

    /// Documents carried under a Document Sequence with the given
    /// identifier (e.g. `"documents"`, `"updates"`).
    pub fn document_sequence(&self, identifier: &str) -> Option<&[Document]> {
        self.sections.iter().find_map(|s| match s {
            MsgSection::DocumentSequence {
                identifier: id,
                documents,
            } if id == identifier => Some(documents.as_slice()),
            _ => None,
        })
    }
}

/// Decode an OP_MSG body: a `u32 flagBits` followed by sections until the
/// framed body is exhausted (spec §3, §4.2).
pub async fn decode_op_msg<R: AsyncRead + Unpin>(r: &mut FramedReader<'_, R>) -> Result<Msg> {
    let flag_bits = r.read_u32().await?;
    let mut sections = Vec::new();
    while !r.is_empty() {
        let kind = r.read_u8().await?;
        match kind {
            0 => {
                let doc = r.read_document().await?;
                sections.push(MsgSection::Body(doc));
            }
            1 => {
                let size = r.read_i32().await?;
                let mut sub = r.sub_reader((size as usize).saturating_sub(4))?;
                // `sub`'s budget is already charged against `r.remaining` in
                // full (see `FramedReader::sub_reader`), so `r` only stays in
                // sync with the real stream position if every byte reserved
                // for this section is actually consumed — including when the
                // identifier or documents fail to decode partway through.
                // Drain whatever `sub` has left before propagating any inner
                // error, never short-circuit past it.
                let inner: Result<(String, Vec<Document>)> = async {
                    let identifier = sub.read_cstring().await?;
                    let documents = sub.read_documents().await?;
                    Ok((identifier, documents))
                }
                .await;
                sub.drain().await?;
                let (identifier, documents) = inner?;
                sections.push(MsgSection::DocumentSequence {
                    identifier,
                    documents,
                });
            }
            other => {
                return Err(crate::error::Error::MalformedDocument(format!(
                    "unknown OP_MSG section kind {other}"
                )))
            }
        }
    }
    Ok(Msg { flag_bits, sections })
}
