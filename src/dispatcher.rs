//! Dispatcher (spec §4.5): opcode→handler routing, with a default fallback
//! and a fault barrier that turns a returned error or a caught panic into an
//! OP_REPLY/OP_MSG `$err` response instead of tearing down the connection.

use crate::conn::ConnectionContext;
use crate::error::{Error, Result};
use crate::protocol::reply::{MsgReply, Reply, ResponseFlags};
use crate::protocol::{self, FramedReader, MsgHeader, OpCode};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::net::tcp::OwnedReadHalf;

/// Embedder-supplied code that interprets a decoded request and writes a
/// reply (spec §6 "Handler interface"). A handler borrows its Framed Reader
/// and Connection Context for the call's duration only; it must not retain
/// them past return.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn process(
        &self,
        header: &MsgHeader,
        reader: &mut FramedReader<'_, OwnedReadHalf>,
        conn: &mut ConnectionContext,
    ) -> Result<()>;
}

/// Logs the decoded request and replies with a minimal `{"ok": 1}`, in
/// whichever wire form matches the inbound opcode (spec §4.5, §9 item 5 —
/// an OP_MSG request gets an OP_MSG reply, anything else gets a legacy
/// OP_REPLY, since a modern driver speaking OP_MSG would reject a legacy
/// reply).
pub struct DefaultHandler;

#[async_trait]
impl Handler for DefaultHandler {
    async fn process(
        &self,
        header: &MsgHeader,
        reader: &mut FramedReader<'_, OwnedReadHalf>,
        conn: &mut ConnectionContext,
    ) -> Result<()> {
        match OpCode::from_i32(header.op_code) {
            Some(OpCode::Query) => {
                let q = protocol::decode_query(reader).await?;
                tracing::info!(?q, "default handler: OP_QUERY");
            }
            Some(OpCode::Insert) => {
                let i = protocol::decode_insert(reader).await?;
                tracing::info!(collection = %i.full_collection_name, count = i.documents.len(), "default handler: OP_INSERT");
            }
            Some(OpCode::Update) => {
                let u = protocol::decode_update(reader).await?;
                tracing::info!(collection = %u.full_collection_name, "default handler: OP_UPDATE");
            }
            Some(OpCode::Delete) => {
                let d = protocol::decode_delete(reader).await?;
                tracing::info!(collection = %d.full_collection_name, "default handler: OP_DELETE");
            }
            Some(OpCode::GetMore) => {
                let g = protocol::decode_get_more(reader).await?;
                tracing::info!(cursor_id = g.cursor_id, "default handler: OP_GET_MORE");
            }
            Some(OpCode::KillCursors) => {
                let k = protocol::decode_kill_cursors(reader).await?;
                tracing::info!(count = k.cursor_ids.len(), "default handler: OP_KILL_CURSORS");
            }
            Some(OpCode::Msg) => {
                let m = protocol::decode_op_msg(reader).await?;
                tracing::info!(?m, "default handler: OP_MSG");
                let reply = MsgReply::new(header.request_id).with_body(bson::doc! { "ok": 1.0 });
                conn.write_msg_reply(&reply).await?;
                return Ok(());
            }
            Some(OpCode::Reply) | Some(OpCode::Reserved) | None => {
                tracing::warn!(op_code = header.op_code, "unsupported opcode");
            }
        }

        let reply =
            Reply::new(header.request_id).with_documents(vec![bson::doc! { "ok": 1.0 }]);
        conn.write_reply(&reply).await
    }
}

/// Holds a mapping from opcode to handler plus the single default handler,
/// read-only after construction (spec §4.5, §5 "the handler table is
/// read-only after construction").
pub struct Dispatcher {
    handlers: HashMap<i32, Arc<dyn Handler>>,
    default_handler: Arc<dyn Handler>,
}

pub struct DispatcherBuilder {
    handlers: HashMap<i32, Arc<dyn Handler>>,
    default_handler: Arc<dyn Handler>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default_handler: Arc::new(DefaultHandler),
        }
    }

    pub fn register(mut self, op_code: i32, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(op_code, handler);
        self
    }

    pub fn default_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.default_handler = handler;
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
            default_handler: self.default_handler,
        }
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Route one inbound message (spec §4.5 dispatch algorithm). Returns
    /// `Err` only for a `TransportError` encountered while writing the
    /// error reply itself — every other handler failure is absorbed into a
    /// written `$err` reply and this returns `Ok(())`.
    pub async fn dispatch(
        &self,
        header: &MsgHeader,
        reader: &mut FramedReader<'_, OwnedReadHalf>,
        conn: &mut ConnectionContext,
    ) -> Result<()> {
        let handler = self
            .handlers
            .get(&header.op_code)
            .unwrap_or(&self.default_handler)
            .clone();

        let outcome = AssertUnwindSafe(handler.process(header, reader, conn))
            .catch_unwind()
            .await;

        let handler_result = match outcome {
            Ok(result) => result,
            Err(panic) => Err(Error::Handler(panic_message(panic))),
        };

        if let Err(e) = handler_result {
            if matches!(e, Error::Transport(_)) {
                return Err(e);
            }
            tracing::warn!(error = %e, "handler failed; writing error reply");
            write_error_reply(header, &e, conn).await?;
        }

        Ok(())
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Format the failure and emit an OP_REPLY with `QueryFailure`, a single
/// `{"$err": <message>}` document, and `responseTo` matching the request
/// (spec §4.5 step 4, Testable Property 6). If the error reply itself fails
/// to write, that's a `TransportError` and it propagates to close the
/// connection.
async fn write_error_reply(
    header: &MsgHeader,
    err: &Error,
    conn: &mut ConnectionContext,
) -> Result<()> {
    let reply = Reply::new(header.request_id)
        .with_flags(ResponseFlags::QueryFailure)
        .with_documents(vec![bson::doc! { "$err": err.to_string() }]);
    conn.write_reply(&reply).await
}
