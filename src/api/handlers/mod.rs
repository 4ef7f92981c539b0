//! API handlers for the gateway.
//!
//! This module organizes the service's route handlers. Shared cookie and
//! validation helpers live next to the auth handlers that use them.

pub mod auth;
pub mod gate;
pub mod health;
pub mod root;
