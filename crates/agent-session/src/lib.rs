//! Interactive assistant-CLI session supervision.
//!
//! This library spawns child assistant CLI processes on a pseudo-terminal and
//! drives them the way a human operator would: messages are typed and
//! submitted with a carriage return, special keys are translated to their
//! terminal escape sequences, and responses are framed by *idle detection*:
//! a reply is considered complete once output has arrived and the terminal
//! has then stayed silent for a configured interval.
//!
//! A dedicated reader task per session drains the PTY into an append-only
//! byte buffer, so every read from the library side is non-blocking.
//!
//! # Quick Start
//!
//! ```no_run
//! use agent_session::{SessionSupervisor, SpawnConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let supervisor = SessionSupervisor::new();
//!
//!     let session = supervisor.start(SpawnConfig::new("claude"))?;
//!     let reply = session
//!         .send("hello", Duration::from_secs(20), true)
//!         .await?;
//!     println!("{}", reply.unwrap_or_default());
//!
//!     supervisor.stop(&session.id).await?;
//!     Ok(())
//! }
//! ```

pub mod keys;
pub mod scrub;
pub mod session;
pub mod supervisor;

pub use session::{InteractiveSession, SessionStatus, SpawnConfig, StoppedSession};
pub use supervisor::SessionSupervisor;

/// Session supervision error type
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session already exists: {0}")]
    AlreadyExists(String),

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("Session no longer alive: {0}")]
    Dead(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Session result type
pub type SessionResult<T> = std::result::Result<T, SessionError>;
