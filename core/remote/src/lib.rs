//! Server-side collaborators for SealShare.
//!
//! This crate defines the interfaces the client consumes (authentication,
//! certificate directory, share metadata, file transfer) and two backends
//! implementing all of them:
//! - [`MemoryServer`] keeps everything in memory
//! - [`LocalServer`] persists to a directory so separate processes can share
//!
//! # Design Principles
//! - Every call authenticates its credentials independently
//! - Servers only ever see ciphertext and wrapped keys
//! - Bookkeeping rules live in [`ServerState`], shared by both backends

pub mod local;
pub mod memory;
pub mod service;
pub mod state;

pub use local::{LocalServer, DEFAULT_CA_BITS, TRUST_ANCHOR_FILE};
pub use memory::MemoryServer;
pub use service::{
    AccessKey, AuthService, CertificateDirectory, FileTransferService, PendingShare,
    RemoteServices, ShareMetadataService,
};
pub use state::ServerState;
