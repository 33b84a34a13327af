//! Core types for HQS
//!
//! This crate provides the error codes and request identifiers shared by the
//! queue engine and the server binary.

pub mod error;
pub mod request_id;

pub use error::{ErrorCode, HqsError};
pub use request_id::{RequestId, REQUEST_ID_HEADER};
