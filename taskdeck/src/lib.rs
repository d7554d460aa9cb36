//! `TaskDeck` task list client library.
//!
//! The remote task API is eventually consistent, so the client keeps a
//! persisted overlay of local corrections and applies edits optimistically:
//! - [`storage`]: synchronous key-value persistence
//! - [`gateway`]: the remote API contract plus HTTP and scripted clients
//! - [`tasks`]: overlay, merge, refresh, cache and mutation coordinator
//! - [`session`]: the facade a UI talks to
//! - [`auth`]: stored login session
//! - [`config`]: layered CLI / env / file configuration

pub mod auth;
pub mod config;
pub mod gateway;
pub mod session;
pub mod storage;
pub mod tasks;
