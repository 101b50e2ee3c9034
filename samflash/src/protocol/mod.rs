//! Wire protocols.
//!
//! Pure frame builders and response parsers. Nothing here performs I/O; the
//! device interfaces pair these with a
//! [`SerialTransport`](crate::transport::SerialTransport).

pub mod odin;
pub mod pit;
pub mod samba;
