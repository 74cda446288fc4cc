//! Structured lifecycle events. They share one target so the JSONL stream can
//! be filtered down to them (`RUST_LOG=herald.obs=info`).

use tracing::Level;

pub const EVENT_TARGET: &str = "herald.obs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    /// Long-running bot (`herald serve`).
    Bot,
    /// One-shot admin commands.
    Cli,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Bot => "bot",
            ProcessKind::Cli => "cli",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    LoggingInitialized,
    BotStarted,
    BotStopped,
    /// A scheduled post reached the broadcast channel.
    PostDelivered,
    /// A scheduled post could not be sent; `status` says whether it was
    /// requeued or dropped.
    PostFailed,
    ChannelUnhealthy,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::LoggingInitialized => "logging.initialized",
            EventKind::BotStarted => "bot.started",
            EventKind::BotStopped => "bot.stopped",
            EventKind::PostDelivered => "post.delivered",
            EventKind::PostFailed => "post.failed",
            EventKind::ChannelUnhealthy => "channel.unhealthy",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservabilityEvent<'a> {
    pub kind: EventKind,
    pub component: &'a str,
    pub chat_id: Option<&'a str>,
    pub status: Option<&'a str>,
    pub error_code: Option<&'a str>,
    pub detail: Option<&'a str>,
}

impl<'a> ObservabilityEvent<'a> {
    pub fn new(kind: EventKind, component: &'a str) -> Self {
        Self {
            kind,
            component,
            chat_id: None,
            status: None,
            error_code: None,
            detail: None,
        }
    }

    pub fn chat(mut self, chat_id: &'a str) -> Self {
        self.chat_id = Some(chat_id);
        self
    }

    pub fn status(mut self, status: &'a str) -> Self {
        self.status = Some(status);
        self
    }

    pub fn error_code(mut self, code: &'a str) -> Self {
        self.error_code = Some(code);
        self
    }

    pub fn detail(mut self, detail: &'a str) -> Self {
        self.detail = Some(detail);
        self
    }
}

// `tracing::event!` needs a constant level, so the field list lives here once
// and is expanded per level below.
macro_rules! log_event {
    ($level:expr, $process:expr, $ev:expr) => {
        tracing::event!(
            target: "herald.obs",
            $level,
            process = $process.as_str(),
            component = $ev.component,
            event = $ev.kind.as_str(),
            chat_id = $ev.chat_id.unwrap_or(""),
            status = $ev.status.unwrap_or(""),
            error_code = $ev.error_code.unwrap_or(""),
            detail = $ev.detail.unwrap_or(""),
            "observability_event"
        )
    };
}

/// Log `event` at `level`. Levels below INFO are raised to INFO.
pub fn emit_event(level: Level, process: ProcessKind, event: ObservabilityEvent<'_>) {
    if level == Level::ERROR {
        log_event!(Level::ERROR, process, event);
    } else if level == Level::WARN {
        log_event!(Level::WARN, process, event);
    } else {
        log_event!(Level::INFO, process, event);
    }
}
