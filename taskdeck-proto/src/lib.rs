//! Shared data model and wire format for `TaskDeck`.

pub mod task;
pub mod wire;
