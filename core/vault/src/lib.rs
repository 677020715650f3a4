//! Client-side vault for SealShare.
//!
//! This module provides:
//! - Session handling with key material held only while logged in
//! - The open/closed state machine for local vault files
//! - Transactional file records with commit and rollback
//! - The [`VaultClient`] facade used by the sharing layer and the CLI
//!
//! # Architecture
//! The vault sits between the user interface and the remote collaborators.
//! Files are stored encrypted at rest and decrypted in place only while open.

pub mod client;
pub mod config;
pub mod record;
pub mod session;
pub mod tracker;

pub use client::{FileStatus, VaultClient};
pub use config::{ClientConfig, CONFIG_FILENAME, DEFAULT_POLL_INTERVAL_SECS};
pub use record::FileRecord;
pub use session::{ActiveSession, Session, SessionGuard};
pub use tracker::VaultFileTracker;
