//! Logging and lifecycle events shared by the Herald bot and admin CLI.

mod event;
mod logging;
mod redact;

pub use event::{emit_event, EventKind, ObservabilityEvent, ProcessKind, EVENT_TARGET};
pub use logging::{init_process_logging, logs_dir, LogFiles, DEFAULT_RETENTION_DAYS};
pub use redact::{redact_text, short_hash};
