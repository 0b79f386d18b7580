//! S-expression values for the EPC wire protocol.
//!
//! Every EPC message body is one textual s-expression. This crate provides
//! the in-memory value model ([`Value`]), a parser ([`parse`]), and a
//! canonical printer (`Value`'s `Display` impl). Printing then parsing any
//! value yields the value back.
//!
//! This is the lowest layer of the stack. Everything else builds on top of
//! the [`Value`] type provided here.

pub mod error;
pub mod parser;
pub mod value;

pub use error::{Result, SexpError};
pub use parser::parse;
pub use value::Value;
