//! Inbound message dispatcher: routes chat messages to FAQ commands or the
//! FAQ resolver.
//!
//! ## Slash commands
//!
//! `/addfaq <keywords> <answer> [--image_url <url>]`, `/listfaqs`, `/help`
//!
//! Commands are accepted from any chat. Plain text is answered only when it
//! comes from the configured discussion group.

use std::sync::Arc;
use std::time::Duration;

use herald_core::faq::escape_html;
use herald_core::{answer_query, FaqTable, Outbox, ReplyContext, SendMessage, StoreError};
use herald_observability::{emit_event, EventKind, ObservabilityEvent, ProcessKind};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::traits::{Channel, ChannelMessage};

const ADD_FAQ_USAGE: &str = concat!(
    "Usage: /addfaq &lt;comma-separated keywords&gt; &lt;answer&gt; ",
    "[--image_url &lt;image url&gt;]"
);
const IMAGE_URL_MISSING: &str = "Image URL missing after --image_url.";
const NO_FAQS: &str = "No FAQs saved yet.";
const STORE_UNAVAILABLE: &str = "⚠️ FAQ storage is unavailable, please try again later.";

// ---------------------------------------------------------------------------
// Slash command parsing
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum SlashCommand {
    AddFaq { args: Vec<String> },
    ListFaqs,
    Help,
}

/// Parse a slash command. Group chats address commands as `/cmd@botname`;
/// when `own_username` is known, commands addressed to another bot are not
/// ours and yield `None`.
fn parse_slash_command(content: &str, own_username: Option<&str>) -> Option<SlashCommand> {
    let trimmed = content.trim();
    let rest = trimmed.strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let head = parts.next()?;
    let name = match head.split_once('@') {
        Some((name, addressee)) => {
            if let Some(own) = own_username {
                if !addressee.eq_ignore_ascii_case(own.trim_start_matches('@')) {
                    return None;
                }
            }
            name
        }
        None => head,
    };
    match name.to_ascii_lowercase().as_str() {
        "addfaq" => Some(SlashCommand::AddFaq {
            args: parts.map(str::to_string).collect(),
        }),
        "listfaqs" => Some(SlashCommand::ListFaqs),
        "help" | "start" => Some(SlashCommand::Help),
        _ => None,
    }
}

#[derive(Debug, PartialEq, Eq)]
struct AddFaqArgs {
    keywords: String,
    answer: String,
    image_url: Option<String>,
}

/// Split `/addfaq` arguments. `Err` carries the reply for the user.
fn parse_add_faq_args(args: &[String]) -> Result<AddFaqArgs, &'static str> {
    if args.len() < 2 {
        return Err(ADD_FAQ_USAGE);
    }

    let mut args = args;
    let mut image_url = None;
    if let Some(pos) = args.iter().position(|a| a == "--image_url") {
        let Some(url) = args.get(pos + 1) else {
            return Err(IMAGE_URL_MISSING);
        };
        image_url = Some(url.clone());
        args = &args[..pos];
    }

    let Some((keywords, answer)) = args.split_first() else {
        return Err(ADD_FAQ_USAGE);
    };
    Ok(AddFaqArgs {
        keywords: keywords.clone(),
        answer: answer.join(" "),
        image_url,
    })
}

fn help_text() -> String {
    [
        "<b>Herald commands</b>",
        concat!(
            "/addfaq &lt;keywords,comma,separated&gt; &lt;answer&gt; ",
            "[--image_url &lt;url&gt;]: add an FAQ entry"
        ),
        "/listfaqs: list stored FAQ entries",
        "/help: show this message",
        "",
        "Questions asked in the discussion group are answered automatically.",
    ]
    .join("\n")
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// What the router did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Command,
    Answered,
    Unanswered,
    Ignored,
}

pub struct MessageRouter {
    faqs: Arc<FaqTable>,
    group_id: String,
    bot_username: Option<String>,
}

impl MessageRouter {
    pub fn new(faqs: Arc<FaqTable>, group_id: i64) -> Self {
        Self {
            faqs,
            group_id: group_id.to_string(),
            bot_username: None,
        }
    }

    /// Only accept `/cmd@name` suffixes naming this bot. Without it any
    /// suffix is accepted.
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    /// Handle a single incoming message: run a slash command or answer from
    /// the FAQ table.
    pub async fn handle(&self, msg: &ChannelMessage, outbox: &dyn Outbox) -> Routed {
        if msg.content.trim_start().starts_with('/') {
            let Some(cmd) = parse_slash_command(&msg.content, self.bot_username.as_deref())
            else {
                debug!("ignoring command not meant for this bot from {}", msg.sender);
                return Routed::Ignored;
            };
            let response = self.handle_slash_command(cmd, msg).await;
            reply(outbox, msg, response).await;
            return Routed::Command;
        }

        if msg.reply_target != self.group_id {
            return Routed::Ignored;
        }

        let context = ReplyContext {
            chat_id: msg.reply_target.clone(),
            message_id: Some(msg.id.clone()),
        };
        match answer_query(&self.faqs, outbox, &context, &msg.content).await {
            Some(_) => Routed::Answered,
            None => Routed::Unanswered,
        }
    }

    async fn handle_slash_command(&self, cmd: SlashCommand, msg: &ChannelMessage) -> String {
        match cmd {
            SlashCommand::AddFaq { args } => self.add_faq_text(&args, msg).await,
            SlashCommand::ListFaqs => match self.faqs.list_faqs().await {
                Ok(listing) if listing.is_empty() => NO_FAQS.to_string(),
                Ok(listing) => listing.render(),
                Err(e) => {
                    error!("failed to read FAQ table: {e}");
                    STORE_UNAVAILABLE.to_string()
                }
            },
            SlashCommand::Help => help_text(),
        }
    }

    async fn add_faq_text(&self, args: &[String], msg: &ChannelMessage) -> String {
        let parsed = match parse_add_faq_args(args) {
            Ok(parsed) => parsed,
            Err(reply) => return reply.to_string(),
        };

        match self
            .faqs
            .add_faq([parsed.keywords.as_str()], &parsed.answer, parsed.image_url.as_deref())
            .await
        {
            Ok(record) => {
                info!("FAQ added by {} via {}", msg.sender, msg.channel);
                let mut response = "FAQ added!".to_string();
                if let Some(url) = record.image_ref() {
                    response.push_str(&format!("\nWith image from: {}", escape_html(url)));
                }
                response
            }
            Err(StoreError::Validation(_)) => ADD_FAQ_USAGE.to_string(),
            Err(e) => {
                error!("failed to save FAQ: {e}");
                "⚠️ Failed to save FAQ, please try again.".to_string()
            }
        }
    }
}

async fn reply(outbox: &dyn Outbox, msg: &ChannelMessage, content: String) {
    let message = SendMessage {
        content,
        recipient: msg.reply_target.clone(),
        reply_to: Some(msg.id.clone()),
    };
    if let Err(e) = outbox.send(&message).await {
        warn!("failed to reply to {} in {}: {e}", msg.sender, msg.reply_target);
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Start the listener for `channel`. Returns a `JoinSet` that completes once
/// `cancel` fires and in-flight handlers have finished.
pub fn start_channel_listeners<C: Channel + 'static>(
    channel: Arc<C>,
    router: Arc<MessageRouter>,
    cancel: CancellationToken,
) -> JoinSet<()> {
    let mut set = JoinSet::new();
    let name = channel.name().to_string();
    set.spawn(supervise(channel, router, cancel));
    info!("herald-channels: {name} listener started");
    set
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Runs a channel listener with exponential-backoff restart on failure.
async fn supervise<C: Channel + 'static>(
    channel: Arc<C>,
    router: Arc<MessageRouter>,
    cancel: CancellationToken,
) {
    let mut backoff_secs: u64 = 1;
    let mut handlers = JoinSet::new();

    'outer: loop {
        let (tx, mut rx) = mpsc::channel::<ChannelMessage>(64);

        let channel_listen = channel.clone();
        let listen_handle = tokio::spawn(async move {
            if let Err(e) = channel_listen.listen(tx).await {
                error!("channel listener error: {e}");
            }
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    listen_handle.abort();
                    break 'outer;
                }
                Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    let ch = channel.clone();
                    let router = router.clone();
                    handlers.spawn(async move {
                        let routed = router.handle(&msg, &*ch).await;
                        debug!("{} message {} routed: {routed:?}", msg.channel, msg.id);
                    });
                }
            }
        }

        listen_handle.abort();

        if channel.health_check().await {
            backoff_secs = 1;
        } else {
            let detail = format!("restarting in {backoff_secs}s");
            emit_event(
                tracing::Level::WARN,
                ProcessKind::Bot,
                ObservabilityEvent::new(EventKind::ChannelUnhealthy, "herald.channels")
                    .status("restarting")
                    .detail(&detail),
            );
            tokio::select! {
                _ = cancel.cancelled() => break 'outer,
                _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
            }
            backoff_secs = (backoff_secs * 2).min(60);
        }
    }

    while handlers.join_next().await.is_some() {}
    info!("herald-channels: {} listener stopped", channel.name());
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
