//! Malformed-frame dispatch failures surface as a `$err` OP_REPLY with
//! `QueryFailure` set and `responseTo` matching the request (Testable
//! Property 6). The connection survives and serves the next request
//! normally — the failure is absorbed at the per-message boundary, not the
//! per-connection one.

use bson::doc;
use mongowire::config::Config;
use mongowire::dispatcher::DispatcherBuilder;
use mongowire::server::spawn_with_shutdown;
use std::sync::Arc;

#[path = "common/wire.rs"]
mod wire;

const OP_MSG: i32 = 2013;

/// A hand-crafted OP_MSG body whose section's document length prefix claims
/// far more bytes than the frame actually carries.
fn truncated_op_msg_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_le_bytes()); // flagBits
    body.push(0u8); // kind 0, Body section
    body.extend_from_slice(&100i32.to_le_bytes()); // claimed document length
    body.extend_from_slice(&[0u8; 10]); // far fewer bytes than claimed
    body
}

/// An OP_MSG body whose single section is a kind=1 Document Sequence, and
/// whose first document inside it has a length prefix below the minimum of
/// 5 — this fails inside the sub-reader for that section, after only the
/// identifier and the bad length prefix have been consumed, leaving trailing
/// padding bytes still reserved for (but unread from) the section.
fn malformed_document_sequence_op_msg_body() -> Vec<u8> {
    let ident = b"documents\0";
    let mut doc_bytes = Vec::new();
    doc_bytes.extend_from_slice(&2i32.to_le_bytes()); // claimed length < 5
    doc_bytes.extend_from_slice(&[0xAA; 4]); // padding still owed to the section

    let size = 4 + ident.len() + doc_bytes.len();

    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_le_bytes()); // flagBits
    body.push(1u8); // kind 1, Document Sequence
    body.extend_from_slice(&(size as i32).to_le_bytes());
    body.extend_from_slice(ident);
    body.extend_from_slice(&doc_bytes);
    body
}

#[tokio::test]
async fn malformed_frame_gets_err_reply_and_connection_survives() {
    let cfg = Config {
        listen_addr: "127.0.0.1:0".to_string(),
        log_level: None,
    };
    let dispatcher = Arc::new(DispatcherBuilder::new().build());
    let (addr, shutdown, handle) = spawn_with_shutdown(cfg, dispatcher).await.unwrap();
    let mut stream = wire::connect(addr).await;

    let bad = wire::encode_raw(OP_MSG, &truncated_op_msg_body(), 11);
    wire::send(&mut stream, &bad).await;

    let reply = wire::read_one_message(&mut stream).await;
    assert_eq!(reply.response_to, 11);
    let (flags, doc) = wire::decode_op_reply(&reply.body);
    assert_eq!(flags, 2, "QueryFailure flag must be set");
    let err_doc = doc.expect("error reply carries exactly one $err document");
    assert!(err_doc.get_str("$err").is_ok());

    // The connection is still alive and serves subsequent requests.
    let good = wire::encode_op_msg(&doc! { "ping": 1, "$db": "test" }, 12);
    wire::send(&mut stream, &good).await;
    let reply = wire::read_one_message(&mut stream).await;
    assert_eq!(reply.response_to, 12);
    let doc = wire::decode_op_msg_body(&reply.body);
    assert_eq!(doc.get_f64("ok").unwrap(), 1.0);

    shutdown.cancel();
    let _ = handle.await.unwrap();
}

/// A malformed document inside a kind=1 Document Sequence section must not
/// leave residue on the wire: the section's reserved-but-unread padding has
/// to be drained along with everything else, or the next pipelined
/// message's header reads out of alignment (Testable Properties 3 and 4).
#[tokio::test]
async fn malformed_document_sequence_does_not_desync_the_stream() {
    let cfg = Config {
        listen_addr: "127.0.0.1:0".to_string(),
        log_level: None,
    };
    let dispatcher = Arc::new(DispatcherBuilder::new().build());
    let (addr, shutdown, handle) = spawn_with_shutdown(cfg, dispatcher).await.unwrap();
    let mut stream = wire::connect(addr).await;

    // Both messages are written in a single burst so a stream desync caused
    // by the first would corrupt the second's header read.
    let mut pipeline = Vec::new();
    pipeline.extend_from_slice(&wire::encode_raw(
        OP_MSG,
        &malformed_document_sequence_op_msg_body(),
        21,
    ));
    pipeline.extend_from_slice(&wire::encode_op_msg(
        &doc! { "ping": 1, "$db": "test" },
        22,
    ));
    wire::send(&mut stream, &pipeline).await;

    let reply = wire::read_one_message(&mut stream).await;
    assert_eq!(reply.response_to, 21);
    let (flags, doc) = wire::decode_op_reply(&reply.body);
    assert_eq!(flags, 2, "QueryFailure flag must be set");
    assert!(doc.expect("error reply carries exactly one $err document").get_str("$err").is_ok());

    let reply = wire::read_one_message(&mut stream).await;
    assert_eq!(reply.response_to, 22);
    assert_eq!(reply.op_code, wire::OP_MSG);
    let doc = wire::decode_op_msg_body(&reply.body);
    assert_eq!(doc.get_f64("ok").unwrap(), 1.0);

    shutdown.cancel();
    let _ = handle.await.unwrap();
}
