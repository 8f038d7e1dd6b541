//! padsync Client - the editing side of a shared notepad
//!
//! - [`EditSession`]: last-writer-wins content sync with debounced writes
//!   and echo suppression
//! - [`CursorBroadcaster`]: throttled cursor broadcasts and the remote cursor map
//! - [`Notepad`]: both of the above wired to a store and a change channel
//! - [`RemoteClient`]: store and channel over a TCP connection to `padsyncd`
//!
//! ```no_run
//! use std::sync::Arc;
//! use padsync_client::{Notepad, RemoteClient, SyncConfig};
//! use padsync_core::DocumentId;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = Arc::new(RemoteClient::connect("127.0.0.1:6380").await?);
//! let pad = Notepad::open(DocumentId::new("abc123")?, conn.clone(), conn, SyncConfig::default()).await?;
//! pad.edit("Hello");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod cursor;
pub mod error;
pub mod notepad;
pub mod remote;
pub mod session;

pub use config::SyncConfig;
pub use cursor::{CursorBroadcaster, CursorMap, PointerThrottle, Position, RemoteCursor, SurfaceRect};
pub use error::{Notice, SyncError, SyncResult};
pub use notepad::Notepad;
pub use remote::{RemoteClient, RequestError};
pub use session::{EditSession, RemoteOutcome, SessionEvent, SessionState};
