//! Authentication module — credentials + JWT
//!
//! Provides:
//! - JWT token encoding/decoding (`jwt` submodule)
//! - Bearer-token middleware for protected routes (`middleware` submodule)

pub mod jwt;
pub mod middleware;
