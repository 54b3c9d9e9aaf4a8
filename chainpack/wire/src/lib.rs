//! ChainPack value model and binary codec.
//!
//! This crate provides the self-describing binary value format used by the
//! ChainPack RPC layer: a closed set of value types, optional per-value
//! metadata, and a compact variable-length integer encoding shared by all
//! numeric payloads.
//!
//! ## Features
//!
//! - **Self-Describing Values**: every payload carries its own type byte
//! - **Tiny Integers**: integers below 64 pack into a single byte
//! - **Per-Value Metadata**: integer-tagged annotations ahead of any value
//! - **Streaming Decode**: incomplete input is distinguished from malformed
//! - **Homogeneous Arrays**: typed element runs without per-element tags
//!
//! ## Value Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | metadata block (opt) | 0x81/0x82 markers, 0x91 map|
//! +----------------------+----------------------------+
//! | type byte            | 0x00..0x7F tiny int, or    |
//! |                      | 0x83..0x91, or base | 0x40 |
//! +----------------------+----------------------------+
//! | payload              | varint / 8B double / bytes |
//! |                      | or elements ended by 0x80  |
//! +----------------------+----------------------------+
//! ```
//!
//! Containers are terminated rather than length-prefixed: list, map, and
//! imap bodies run until a `0x80` byte in value position. No packed value
//! starts with `0x80`, so the terminator can never be mistaken for content.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod datetime;
pub mod error;
pub mod meta;
pub mod value;
pub mod varint;

// Re-export main types
pub use codec::{pack, pack_into, unpack, unpack_exact};
pub use datetime::DateTime;
pub use error::UnpackError;
pub use meta::{MetaData, TAG_META_TYPE_ID, TAG_META_TYPE_NAMESPACE_ID, TAG_USER};
pub use value::{Array, RpcValue, TypeMismatch, Value, ValueType};
