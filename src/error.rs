use std::result::Result as StdResult;

/// Error taxonomy for the wire-protocol façade (see spec §7).
///
/// `UnexpectedEof` and `MalformedDocument` are per-message decode failures:
/// the dispatcher turns them into an `$err` reply rather than killing the
/// connection. `Transport` always kills the connection.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unexpected end of frame")]
    UnexpectedEof,

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("unsupported opcode: {0}")]
    UnsupportedOpCode(i32),

    #[error("{0}")]
    Handler(String),

    #[error(transparent)]
    Transport(#[from] std::io::Error),

    #[error("{0}")]
    Msg(String),
}

pub type Result<T> = StdResult<T, Error>;
