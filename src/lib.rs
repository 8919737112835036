//! prepgate — backend for AI-driven mock interviews.
//!
//! Caches AI-generated interview feedback by a content hash of the
//! transcript, reuses previously generated question sets, and gates
//! interview access behind an M-Pesa payment flow.
//!
//! # Subsystems
//!
//! - **Feedback cache**: transcript text is normalized and hashed into a
//!   stable key; repeated submissions of the same conversation are served
//!   from the cache with TTL-based lazy expiry and hit/miss accounting.
//! - **Question cache**: generated question sets are keyed on
//!   (role, level, type, count) and reused with usage counters.
//! - **Payment gating**: an STK push creates a `pending` transaction that a
//!   gateway webhook moves to `paid` or `failed` exactly once; one paid
//!   transaction unlocks exactly one interview.

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod feedback;
pub mod hashing;
pub mod metrics;
pub mod mpesa;
pub mod payment;
pub mod questions;
pub mod server;

pub use error::{Error, Result};
