//! `TaskDeck` stub server library.
//!
//! A small axum server speaking the same JSON task API as the public demo
//! backend. Used for local development and by the HTTP gateway tests.

pub mod config;
pub mod server;
pub mod store;
