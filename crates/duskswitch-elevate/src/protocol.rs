//! Wire protocol for the companion elevation service.
//!
//! One request/reply transaction per connection. Every frame is a
//! big-endian `u32` body length followed by the body:
//!
//! ```text
//! request: u32 code | str interface_token | str command
//! reply:   u8 status | payload
//! str:     u32 byte length | UTF-8 bytes
//! ```
//!
//! Reply statuses: `0` exit code (`i32`), `1` security rejection (str),
//! `2` bad interface token (str), `3` unknown transaction (no payload),
//! `4` interface descriptor (str).

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;

/// First transaction code available to user-defined calls.
pub const FIRST_USER_TRANSACTION: u32 = 1;

/// Execute a shell command and return its exit code.
pub const EXECUTE_TRANSACTION: u32 = FIRST_USER_TRANSACTION + 1;

/// Ask the service for its interface descriptor (`"_NTF"`).
pub const INTERFACE_TRANSACTION: u32 = 0x5f4e_5446;

/// Interface identity token every execute request must carry.
pub const INTERFACE_DESCRIPTOR: &str = "dev.duskswitch.elevate.GrantService";

/// Upper bound on a single frame body.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const STATUS_EXIT_CODE: u8 = 0;
const STATUS_SECURITY: u8 = 1;
const STATUS_BAD_TOKEN: u8 = 2;
const STATUS_UNKNOWN: u8 = 3;
const STATUS_DESCRIPTOR: u8 = 4;

// ── Messages ─────────────────────────────────────────────────────────

/// A single transaction sent to the companion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub code: u32,
    pub interface_token: String,
    pub command: String,
}

impl Request {
    /// Build an execute request carrying the correct interface token.
    pub fn execute(command: impl Into<String>) -> Self {
        Self {
            code: EXECUTE_TRANSACTION,
            interface_token: INTERFACE_DESCRIPTOR.to_owned(),
            command: command.into(),
        }
    }

    /// Build a descriptor query. Used as a liveness ping.
    pub fn interface_query() -> Self {
        Self {
            code: INTERFACE_TRANSACTION,
            interface_token: String::new(),
            command: String::new(),
        }
    }
}

/// The service's answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    ExitCode(i32),
    SecurityRejected(String),
    BadInterfaceToken(String),
    UnknownTransaction,
    Descriptor(String),
}

// ── Codecs ───────────────────────────────────────────────────────────

/// Server side: decodes [`Request`]s, encodes [`Reply`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceCodec;

/// Client side: encodes [`Request`]s, decodes [`Reply`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientCodec;

impl Decoder for ServiceCodec {
    type Item = Request;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Request>, Error> {
        let Some(mut body) = take_frame(src)? else {
            return Ok(None);
        };
        let code = get_u32(&mut body, "transaction code")?;
        let interface_token = get_string(&mut body, "interface token")?;
        let command = get_string(&mut body, "command")?;
        Ok(Some(Request {
            code,
            interface_token,
            command,
        }))
    }
}

impl Encoder<Reply> for ServiceCodec {
    type Error = Error;

    fn encode(&mut self, reply: Reply, dst: &mut BytesMut) -> Result<(), Error> {
        let mut body = BytesMut::new();
        match reply {
            Reply::ExitCode(code) => {
                body.put_u8(STATUS_EXIT_CODE);
                body.put_i32(code);
            }
            Reply::SecurityRejected(msg) => {
                body.put_u8(STATUS_SECURITY);
                put_string(&mut body, &msg)?;
            }
            Reply::BadInterfaceToken(msg) => {
                body.put_u8(STATUS_BAD_TOKEN);
                put_string(&mut body, &msg)?;
            }
            Reply::UnknownTransaction => body.put_u8(STATUS_UNKNOWN),
            Reply::Descriptor(desc) => {
                body.put_u8(STATUS_DESCRIPTOR);
                put_string(&mut body, &desc)?;
            }
        }
        put_frame(&body, dst)
    }
}

impl Encoder<Request> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, req: Request, dst: &mut BytesMut) -> Result<(), Error> {
        let mut body = BytesMut::new();
        body.put_u32(req.code);
        put_string(&mut body, &req.interface_token)?;
        put_string(&mut body, &req.command)?;
        put_frame(&body, dst)
    }
}

impl Decoder for ClientCodec {
    type Item = Reply;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Reply>, Error> {
        let Some(mut body) = take_frame(src)? else {
            return Ok(None);
        };
        if !body.has_remaining() {
            return Err(Error::Malformed("empty reply".into()));
        }
        let reply = match body.get_u8() {
            STATUS_EXIT_CODE => {
                if body.remaining() < 4 {
                    return Err(Error::Malformed("truncated exit code".into()));
                }
                Reply::ExitCode(body.get_i32())
            }
            STATUS_SECURITY => Reply::SecurityRejected(get_string(&mut body, "message")?),
            STATUS_BAD_TOKEN => Reply::BadInterfaceToken(get_string(&mut body, "message")?),
            STATUS_UNKNOWN => Reply::UnknownTransaction,
            STATUS_DESCRIPTOR => Reply::Descriptor(get_string(&mut body, "descriptor")?),
            other => return Err(Error::Malformed(format!("unknown reply status {other}"))),
        };
        Ok(Some(reply))
    }
}

// ── Framing helpers ──────────────────────────────────────────────────

fn take_frame(src: &mut BytesMut) -> Result<Option<BytesMut>, Error> {
    if src.len() < 4 {
        return Ok(None);
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&src[..4]);
    let len = usize::try_from(u32::from_be_bytes(len_bytes))
        .map_err(|_| Error::Malformed("frame length overflow".into()))?;
    if len > MAX_FRAME_LEN {
        return Err(Error::Malformed(format!(
            "frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"
        )));
    }
    if src.len() < 4 + len {
        src.reserve(4 + len - src.len());
        return Ok(None);
    }
    src.advance(4);
    Ok(Some(src.split_to(len)))
}

fn put_frame(body: &[u8], dst: &mut BytesMut) -> Result<(), Error> {
    if body.len() > MAX_FRAME_LEN {
        return Err(Error::Malformed(format!(
            "frame of {} bytes exceeds limit of {MAX_FRAME_LEN}",
            body.len()
        )));
    }
    let len = u32::try_from(body.len()).map_err(|_| Error::Malformed("frame too large".into()))?;
    dst.reserve(4 + body.len());
    dst.put_u32(len);
    dst.extend_from_slice(body);
    Ok(())
}

fn put_string(buf: &mut BytesMut, s: &str) -> Result<(), Error> {
    let len = u32::try_from(s.len()).map_err(|_| Error::Malformed("string too large".into()))?;
    buf.put_u32(len);
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn get_u32(buf: &mut BytesMut, what: &str) -> Result<u32, Error> {
    if buf.remaining() < 4 {
        return Err(Error::Malformed(format!("truncated {what}")));
    }
    Ok(buf.get_u32())
}

fn get_string(buf: &mut BytesMut, what: &str) -> Result<String, Error> {
    let len = usize::try_from(get_u32(buf, what)?)
        .map_err(|_| Error::Malformed(format!("{what} length overflow")))?;
    if buf.remaining() < len {
        return Err(Error::Malformed(format!("truncated {what}")));
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| Error::Malformed(format!("{what} is not UTF-8")))
}

// ── Tests ────────────────────────────────────────────────────────────
