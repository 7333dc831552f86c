//! Connection Context (spec §4.4): wraps the write side of the transport
//! and a small string-keyed attribute map so handlers can stash
//! per-connection state (e.g. an authenticated identity) across messages.
//! Owned exclusively by the one worker that services the connection; never
//! shared, so no internal locking.

use crate::error::Result;
use crate::protocol::{MsgReply, Reply};
use std::any::Any;
use std::collections::HashMap;
use tokio::net::tcp::OwnedWriteHalf;

pub struct ConnectionContext {
    write_half: OwnedWriteHalf,
    attributes: HashMap<String, Box<dyn Any + Send>>,
}

impl ConnectionContext {
    pub fn new(write_half: OwnedWriteHalf) -> Self {
        Self {
            write_half,
            attributes: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Any + Send) {
        self.attributes.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.attributes.get(key).and_then(|v| v.downcast_ref())
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.attributes.remove(key).is_some()
    }

    pub async fn write_reply(&mut self, reply: &Reply) -> Result<()> {
        reply.write(&mut self.write_half).await
    }

    pub async fn write_msg_reply(&mut self, reply: &MsgReply) -> Result<()> {
        reply.write(&mut self.write_half).await
    }
}
