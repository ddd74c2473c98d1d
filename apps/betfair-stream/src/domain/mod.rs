//! Domain Layer - Session lifecycle types.
//!
//! Pure types with no I/O: the session state machine and the running flag
//! that governs the read loop.

/// Session state machine and running flag.
pub mod session;
