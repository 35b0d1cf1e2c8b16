//! Core value types shared by the interpreter, the spool and the driver.

pub mod header;

pub use header::{Header, Headers, InvalidHeader};
