//! The Framed Reader: a read-side adapter bound to a known byte budget
//! (spec §4.1). The budget comes from the enclosing message's
//! `messageLength`, or, for an OP_MSG document-sequence section, from that
//! section's own `size` field. Bounding every decoder to its declared budget
//! is what keeps malformed input from reading into the next message.

use crate::error::{Error, Result};
use bson::Document;
use tokio::io::{AsyncRead, AsyncReadExt};

pub struct FramedReader<'a, R> {
    inner: &'a mut R,
    remaining: usize,
}

impl<'a, R: AsyncRead + Unpin> FramedReader<'a, R> {
    pub fn new(inner: &'a mut R, limit: usize) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    /// A reader bound to the next `n` bytes of this one, for OP_MSG
    /// document-sequence sections (spec §3, §4.2). The `n` bytes are
    /// reserved out of `self`'s own budget immediately, so a sub-reader that
    /// doesn't fully consume its slice still leaves `self` correctly
    /// positioned once the caller moves on — callers MUST still drain any
    /// sub-reader residue themselves (see [`FramedReader::drain`]) or the
    /// underlying stream position will desync from `self.remaining`.
    pub fn sub_reader(&mut self, n: usize) -> Result<FramedReader<'_, R>> {
        if n > self.remaining {
            return Err(Error::UnexpectedEof);
        }
        self.remaining -= n;
        Ok(FramedReader {
            inner: &mut *self.inner,
            remaining: n,
        })
    }

    async fn take_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.len() > self.remaining {
            return Err(Error::UnexpectedEof);
        }
        self.inner.read_exact(buf).await?;
        self.remaining -= buf.len();
        Ok(())
    }

    pub async fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.take_exact(&mut buf).await?;
        Ok(i32::from_le_bytes(buf))
    }

    pub async fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_i32().await? as u32)
    }

    pub async fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.take_exact(&mut buf).await?;
        Ok(i64::from_le_bytes(buf))
    }

    pub async fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.take_exact(&mut buf).await?;
        Ok(buf)
    }

    pub async fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1).await?[0])
    }

    /// Bytes up to and including a NUL terminator; returns the bytes before
    /// it as UTF-8. Fails with `UnexpectedEof` if the budget is exhausted
    /// before a terminator is found.
    pub async fn read_cstring(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        loop {
            let b = self.read_u8().await?;
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        String::from_utf8(bytes).map_err(|e| Error::MalformedDocument(e.to_string()))
    }

    /// Peek the 4-byte little-endian length prefix `L`, then read `L - 4`
    /// further bytes and hand the full `L`-byte blob to the BSON decoder
    /// (spec §4.1, §6). `L < 5` is `MalformedDocument` before any further
    /// read is attempted.
    pub async fn read_document(&mut self) -> Result<Document> {
        let len_bytes_buf = {
            let mut buf = [0u8; 4];
            self.take_exact(&mut buf).await?;
            buf
        };
        let len = i32::from_le_bytes(len_bytes_buf);
        if len < 5 {
            return Err(Error::MalformedDocument(format!(
                "document length {len} is below the minimum of 5"
            )));
        }
        let rest = self.read_bytes(len as usize - 4).await?;
        let mut blob = Vec::with_capacity(len as usize);
        blob.extend_from_slice(&len_bytes_buf);
        blob.extend_from_slice(&rest);
        Document::from_reader(&mut std::io::Cursor::new(&blob))
            .map_err(|e| Error::MalformedDocument(e.to_string()))
    }

    /// Repeatedly `read_document` until the budget is exhausted. Unlike every
    /// other primitive, reaching the end of input here is not an error — it
    /// is how variable-count suffixes (inserted documents, a document
    /// sequence's members) legally terminate.
    pub async fn read_documents(&mut self) -> Result<Vec<Document>> {
        let mut docs = Vec::new();
        while !self.is_empty() {
            docs.push(self.read_document().await?);
        }
        Ok(docs)
    }

    /// Discard any unread residue so the caller (the server loop) can resume
    /// at the next message's header (spec §4.6 step 5, Testable Property 4).
    pub async fn drain(&mut self) -> Result<()> {
        let mut buf = [0u8; 4096];
        while self.remaining > 0 {
            let n = self.remaining.min(buf.len());
            self.take_exact(&mut buf[..n]).await?;
        }
        Ok(())
    }
}
