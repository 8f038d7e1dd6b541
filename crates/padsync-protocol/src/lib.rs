//! padsync wire protocol
//!
//! A line-oriented text protocol in the style of Redis RESP. Document content
//! travels as a JSON string so that multi-line text stays on one line.
//!
//! ## Command Format
//! ```text
//! COMMAND <document_id> [ARGUMENTS]
//! ```
//!
//! ## Response Format
//! ```text
//! +OK [message]            # Success
//! -ERR <code> <message>    # Error
//! :<integer>               # Integer
//! $<length>\r\n<data>      # Bulk data
//! $-1                      # Null
//! *<count>\r\n<items>      # Array
//! >KIND <id> <payload>     # Push frame for a subscribed document
//! ```

pub mod command;
pub mod decoder;
pub mod error;
pub mod parser;
pub mod response;

pub use command::{Command, CommandKind};
pub use decoder::ResponseDecoder;
pub use error::{ProtocolError, ProtocolResult};
pub use parser::Parser;
pub use response::Response;

/// Maximum size of one buffered message (1MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
