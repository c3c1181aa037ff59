//! Zenoh bridge for EXO multi-parameter sondes.
//!
//! This bridge polls an EXO sonde over Modbus RTU, decodes its measurement
//! registers into named parameters and publishes each cycle as one packed
//! payload on Zenoh.
//!
//! # Key Expressions
//!
//! ```text
//! <key_prefix>/<instrument>/rawzb64.data
//! <key_prefix>/@/status
//! ```
//!
//! The `rawzb64.data` payload is an envelope whose `value` is the JSON list
//! of decoded records, zlib compressed and base64 encoded.

pub mod acquisition;
pub mod config;
pub mod decoder;
pub mod lookup;
pub mod publisher;
pub mod registers;
pub mod transport;
