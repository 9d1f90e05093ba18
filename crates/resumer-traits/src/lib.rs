//! Resumer Traits - Shared trait definitions and core abstractions.
//!
//! This crate provides the interfaces used across the resumer workspace:
//! - AccessGate, Caller, Credentials, AccessLevel
//! - OwnershipDirectory, OwnershipRecord, ClaimOutcome
//! - RedirectTarget and advertised-address comparison
//! - ResumerError, the error taxonomy shared by server and client

pub mod access;
pub mod address;
pub mod directory;
pub mod error;

// ── Top-level re-exports ─────────────────────────────────────────────

// Error types
pub use error::{Result, ResumerError};

// Access
pub use access::{AccessGate, AccessLevel, Caller, Credentials, require_access};

// Addresses
pub use address::{RedirectTarget, same_address};

// Ownership directory
pub use directory::{ClaimOutcome, OwnershipDirectory, OwnershipRecord};
