//! CLI command implementations.
//!
//! The binary owns argument parsing and terminal I/O; this module holds the
//! parts worth testing: fixture loading, request construction and rendering.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ask` | Answer a question against a session fixture |
//! | `config` | Show the effective configuration |
//!
//! # Example Usage
//!
//! ```bash
//! # Answer from session material only
//! groundline ask --fixture standup.yaml "what did we decide about the budget?"
//!
//! # Allow web search, approving proposals interactively
//! groundline ask --fixture standup.yaml --web "what is the market rate?"
//!
//! # Auto-approve and print the audit trail
//! groundline ask --fixture standup.yaml --web --approve --trail "..."
//! ```

mod ask;
mod config;
mod fixture;

pub use ask::{AskCommand, OutputFormat, render_answer, render_trail, spawn_decider};
pub use config::render_config;
pub use fixture::{
    DEFAULT_SESSION_ID, Fixture, FixtureDocument, FixtureHit, RecapWindow, TranscriptLine,
    VisualEvent, build_stores,
};
