//! Secure sharing for SealShare.
//!
//! This module provides:
//! - [`SharingOrchestrator`]: re-keys a file under a document key and
//!   registers it for a recipient
//! - [`SharePoller`]: accepts inbound shares in the background while
//!   logged in
//!
//! Raw document keys never leave the client: the server only ever sees them
//! wrapped under a master key or a certified public key.

pub mod orchestrator;
pub mod poller;

pub use orchestrator::SharingOrchestrator;
pub use poller::{PollerHandle, SharePoller};
