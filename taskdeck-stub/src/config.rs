//! Startup options for the stub server.
//!
//! Everything is a flag with a `TASKDECK_STUB_*` variable behind it. The one
//! file input is an optional TOML fixture naming the todos to serve; without
//! it the table is filled with generated samples.
//!
//! ```toml
//! [[todo]]
//! id = 1
//! todo = "Water the plants"
//! completed = false
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use taskdeck_proto::task::Task;

use crate::store::TodoStore;

/// Errors raised while loading a fixture file.
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("cannot read fixture {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid fixture {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// The server would answer two todos for one id.
    #[error("fixture {path} lists id {id} more than once")]
    DuplicateId { path: PathBuf, id: i64 },
}

/// Command line of `taskdeck-stub`.
#[derive(clap::Parser, Debug, Clone)]
#[command(version, about = "Local stand-in for the TaskDeck task API")]
pub struct StubOptions {
    /// Socket address to listen on.
    #[arg(long, default_value = "127.0.0.1:8080", env = "TASKDECK_STUB_ADDR")]
    pub addr: SocketAddr,

    /// Keep writes so later reads see them. Without it the stub forgets
    /// writes the way the public demo API does.
    #[arg(long)]
    pub persist: bool,

    /// Number of generated sample todos.
    #[arg(long, default_value_t = 30, env = "TASKDECK_STUB_SEED")]
    pub seed: usize,

    /// TOML file of `[[todo]]` tables served instead of generated samples.
    #[arg(long, env = "TASKDECK_STUB_FIXTURE")]
    pub fixture: Option<PathBuf>,

    /// Tracing filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info", env = "TASKDECK_STUB_LOG")]
    pub log: String,
}

impl StubOptions {
    /// Builds the todo table these options describe.
    ///
    /// A fixture replaces the generated samples and `--seed` is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError`] if the fixture cannot be read or is invalid.
    pub fn build_store(&self) -> Result<TodoStore, FixtureError> {
        match &self.fixture {
            Some(path) => Ok(TodoStore::with_todos(load_fixture(path)?, self.persist)),
            None => Ok(TodoStore::seeded(self.seed, self.persist)),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct Fixture {
    #[serde(default)]
    todo: Vec<Task>,
}

/// Reads the todos listed in a fixture file, in file order.
///
/// # Errors
///
/// Returns [`FixtureError`] if the file is unreadable, is not a valid
/// fixture, or repeats an id.
pub fn load_fixture(path: &Path) -> Result<Vec<Task>, FixtureError> {
    let text = std::fs::read_to_string(path).map_err(|source| FixtureError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_fixture(&text, path)
}

fn parse_fixture(text: &str, path: &Path) -> Result<Vec<Task>, FixtureError> {
    let fixture: Fixture = toml::from_str(text).map_err(|source| FixtureError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut seen = HashSet::new();
    if let Some(dup) = fixture.todo.iter().find(|t| !seen.insert(t.id)) {
        return Err(FixtureError::DuplicateId {
            path: path.to_path_buf(),
            id: dup.id.get(),
        });
    }
    Ok(fixture.todo)
}
