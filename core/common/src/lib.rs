//! Common utilities and types shared across SealShare modules.
//!
//! This module provides the error taxonomy and the identity types used by
//! every other crate, so that vault, crypto and remote code agree on what a
//! user, a file and a failure look like.

pub mod error;
pub mod types;

pub use error::{AggregateError, Error, Result};
pub use types::{Credentials, FileId, Namespace, Username};
