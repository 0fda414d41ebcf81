//! Identity-provider client.
//!
//! Sign-in is delegated to a hosted GoTrue-style provider; this module
//! only consumes its REST surface: password sign-in, sign-up, sign-out,
//! session refresh, and browser-based OAuth captured on a loopback
//! listener. Auth state changes are published on a watch channel that the
//! UI layer subscribes to, instead of living in ambient shared state.

mod callback;
mod client;

pub use client::{AuthClient, AuthError, AuthState, Session, SessionStore, User};
