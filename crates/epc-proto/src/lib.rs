//! Wire framing and message grammar for the EPC protocol.
//!
//! Every message travels as one frame:
//! - A 6-byte ASCII lowercase-hex length header
//! - The UTF-8 text of one s-expression
//! - A trailing newline (counted by the header)
//!
//! The s-expression decodes to `(kind uid fields...)`, where `kind` is one
//! of `call`, `methods`, `return`, `return-error`, or `epc-error`. This
//! crate owns the codec, the blocking reader/writer, and the [`Message`]
//! grammar with its per-kind arity contract. No partial reads, no buffer
//! management in user code.

pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use message::{GrammarError, Message, MessageError, Uid};
pub use reader::FrameReader;
pub use writer::FrameWriter;
