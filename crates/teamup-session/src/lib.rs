//! Session lifecycle for Teamup.
//!
//! A session is one booked engagement between a client and a teammate.
//! This crate owns two things:
//!
//! 1. **Authentication**: turning a handshake token into an
//!    [`Identity`](teamup_protocol::Identity) ([`Authenticator`] trait)
//! 2. **The state machine**: which actions move a session between
//!    Pending, Active, Completed and Cancelled, and who may perform them
//!    ([`SessionManager`], [`SessionAction`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Matchmaking (above)  ← creates Pending sessions, drives transitions
//!     ↕
//! Session Layer (this crate)  ← guards every transition
//!     ↕
//! Protocol Layer (below)  ← provides Session, SessionStatus, UserId
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod manager;
mod session;

pub use auth::{Authenticator, DevAuthenticator};
pub use error::SessionError;
pub use manager::SessionManager;
pub use session::{NewSession, SessionAction};
