use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, FixedOffset, Local, Utc};
use clap::{Parser, Subcommand};
use herald_channels::{
    resolve_state_dir, start_channel_listeners, HeraldConfig, MessageRouter, TelegramChannel,
};
use herald_core::{
    parse_due_at, FaqTable, Outbox, PostDispatcher, ScheduleStore, ScheduledPost,
};
use herald_observability::{
    emit_event, init_process_logging, logs_dir, EventKind, ObservabilityEvent, ProcessKind,
    DEFAULT_RETENTION_DAYS,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const COMPONENT: &str = "herald.main";

#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(about = "Telegram channel scheduler and FAQ bot")]
struct Cli {
    /// Directory holding the schedule, FAQ table and logs.
    #[arg(long, global = true, value_name = "DIR")]
    state_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bot: publish due posts and answer group questions.
    Serve,
    /// Queue a post for the broadcast channel.
    AddPost {
        text: String,
        /// RFC 3339 or local `YYYY-MM-DD HH:MM[:SS]` timestamp.
        #[arg(long, conflicts_with = "in_minutes", required_unless_present = "in_minutes")]
        at: Option<String>,
        #[arg(long)]
        in_minutes: Option<i64>,
    },
    ListPosts,
    /// Add an FAQ entry; keywords are comma separated.
    AddFaq {
        keywords: String,
        answer: String,
        #[arg(long)]
        image_url: Option<String>,
    },
    ListFaqs,
    /// Show which FAQ entry a question would be answered with.
    Ask { query: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => serve(cli.state_dir).await?,
        command => {
            let state_dir = resolve_state_dir(cli.state_dir);
            let (_log_guard, _) = init_process_logging(
                ProcessKind::Cli,
                &logs_dir(&state_dir),
                DEFAULT_RETENTION_DAYS,
            )?;
            run_admin(command, &state_dir).await?;
        }
    }
    Ok(())
}

async fn serve(state_dir_flag: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = HeraldConfig::from_env().context("invalid bot configuration")?;
    if let Some(dir) = state_dir_flag {
        config.state_dir = dir;
    }

    let (_log_guard, log_info) = init_process_logging(
        ProcessKind::Bot,
        &logs_dir(&config.state_dir),
        DEFAULT_RETENTION_DAYS,
    )?;
    emit_event(
        tracing::Level::INFO,
        ProcessKind::Bot,
        ObservabilityEvent::new(EventKind::LoggingInitialized, COMPONENT)
            .status("ok")
            .detail("bot jsonl logging initialized"),
    );
    info!("bot logging initialized: {:?}", log_info);
    log_startup_paths(&config);

    let schedule = Arc::new(ScheduleStore::in_dir(&config.state_dir));
    let faqs = Arc::new(FaqTable::in_dir(&config.state_dir));
    let channel = Arc::new(TelegramChannel::new(config.telegram.clone())?);
    let cancel = CancellationToken::new();

    let outbox: Arc<dyn Outbox> = channel.clone();
    let dispatcher = PostDispatcher::new(schedule, outbox, config.channel_id.to_string())
        .with_interval(config.dispatch_interval)
        .with_policy(config.delivery_policy);
    let dispatcher_task = tokio::spawn(dispatcher.run(cancel.clone()));

    let mut router = MessageRouter::new(faqs, config.group_id);
    match channel.bot_username().await {
        Ok(username) => {
            info!("connected as @{username}");
            router = router.with_bot_username(username);
        }
        Err(e) => warn!("bot username unknown, accepting commands addressed to any bot: {e}"),
    }
    let mut listeners = start_channel_listeners(channel, Arc::new(router), cancel.clone());

    emit_event(
        tracing::Level::INFO,
        ProcessKind::Bot,
        ObservabilityEvent::new(EventKind::BotStarted, COMPONENT).status("ok"),
    );

    let signal = shutdown_signal()?.await;
    info!("{signal} received, draining in-flight work");
    cancel.cancel();

    while let Some(joined) = listeners.join_next().await {
        if let Err(e) = joined {
            warn!("listener task ended abnormally: {e}");
        }
    }
    if let Err(e) = dispatcher_task.await {
        warn!("dispatcher task ended abnormally: {e}");
    }

    emit_event(
        tracing::Level::INFO,
        ProcessKind::Bot,
        ObservabilityEvent::new(EventKind::BotStopped, COMPONENT)
            .status("ok")
            .detail(signal),
    );
    Ok(())
}

/// Resolves with the name of the first shutdown signal. Handlers are
/// installed before this returns, so a signal sent afterwards is not lost.
#[cfg(unix)]
fn shutdown_signal() -> anyhow::Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;
    Ok(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("ctrl-c handler failed: {e}");
                }
                "ctrl-c"
            }
            _ = terminate.recv() => "SIGTERM",
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> anyhow::Result<impl Future<Output = &'static str>> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("ctrl-c handler failed: {e}");
        }
        "ctrl-c"
    })
}

fn log_startup_paths(config: &HeraldConfig) {
    info!(
        "herald starting: state_dir={} channel_id={} group_id={} interval={}s max_attempts={}",
        config.state_dir.display(),
        config.channel_id,
        config.group_id,
        config.dispatch_interval.as_secs(),
        config.delivery_policy.max_attempts,
    );
}

async fn run_admin(command: Command, state_dir: &Path) -> anyhow::Result<()> {
    match command {
        Command::Serve => bail!("serve is not an offline command"),
        Command::AddPost {
            text,
            at,
            in_minutes,
        } => {
            let due_at = resolve_due_at(at.as_deref(), in_minutes, Local::now().fixed_offset())?;
            let store = ScheduleStore::in_dir(state_dir);
            let post = store.add_post(&text, due_at).await?;
            println!("Scheduled for {}: {}", post.due_at.to_rfc3339(), post.text);
        }
        Command::ListPosts => {
            let posts = ScheduleStore::in_dir(state_dir).load().await?;
            if posts.is_empty() {
                println!("No posts scheduled.");
            }
            let now = Utc::now();
            for (i, post) in posts.iter().enumerate() {
                println!("{}", describe_post(i + 1, post, now));
            }
        }
        Command::AddFaq {
            keywords,
            answer,
            image_url,
        } => {
            let table = FaqTable::in_dir(state_dir);
            let record = table
                .add_faq([keywords.as_str()], &answer, image_url.as_deref())
                .await?;
            println!("FAQ added for keywords: {}", record.keywords.join(", "));
            if let Some(url) = record.image_ref() {
                println!("With image from: {url}");
            }
        }
        Command::ListFaqs => {
            let listing = FaqTable::in_dir(state_dir).list_faqs().await?;
            if listing.is_empty() {
                println!("No FAQs saved yet.");
            } else {
                print!("{}", listing.render());
            }
        }
        Command::Ask { query } => match FaqTable::in_dir(state_dir).resolve(&query).await? {
            Some(record) => {
                println!("Matched keywords: {}", record.keywords.join(", "));
                println!("{}", record.answer);
                if let Some(url) = record.image_ref() {
                    println!("Image: {url}");
                }
            }
            None => println!("No matching FAQ."),
        },
    }
    Ok(())
}

fn resolve_due_at(
    at: Option<&str>,
    in_minutes: Option<i64>,
    now: DateTime<FixedOffset>,
) -> anyhow::Result<DateTime<FixedOffset>> {
    match (at, in_minutes) {
        (Some(raw), _) => {
            parse_due_at(raw).with_context(|| format!("unrecognized timestamp {raw:?}"))
        }
        (None, Some(minutes)) => {
            if minutes < 0 {
                bail!("--in-minutes must not be negative");
            }
            Ok(now + chrono::Duration::minutes(minutes))
        }
        (None, None) => bail!("either --at or --in-minutes is required"),
    }
}

fn describe_post(index: usize, post: &ScheduledPost, now: DateTime<Utc>) -> String {
    let status = if post.is_due(now) { "due" } else { "pending" };
    let mut line = format!(
        "{index}. [{status}] {} {}",
        post.due_at.to_rfc3339(),
        post.text
    );
    if post.attempts > 0 {
        line.push_str(&format!(" (attempts: {})", post.attempts));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2030, 1, 1, 9, 0, 0)
            .unwrap()
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::parse_from([
            "herald",
            "--state-dir",
            "/tmp/h",
            "add-post",
            "hi",
            "--in-minutes",
            "5",
        ]);
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/h")));
        assert!(matches!(
            cli.command,
            Command::AddPost { in_minutes: Some(5), at: None, .. }
        ));

        let cli = Cli::parse_from([
            "herald",
            "add-faq",
            "harga,price",
            "Rp 10.000",
            "--image-url",
            "https://x/y.jpg",
        ]);
        assert!(matches!(cli.command, Command::AddFaq { image_url: Some(_), .. }));
    }

    #[test]
    fn add_post_requires_a_time() {
        assert!(Cli::try_parse_from(["herald", "add-post", "hi"]).is_err());
        let both = [
            "herald",
            "add-post",
            "hi",
            "--at",
            "2030-01-01T00:00:00Z",
            "--in-minutes",
            "1",
        ];
        assert!(Cli::try_parse_from(both).is_err());
    }

    #[test]
    fn due_at_from_explicit_timestamp() {
        let due = resolve_due_at(Some("2030-02-01T10:00:00+07:00"), None, fixed_now()).unwrap();
        assert_eq!(due.to_rfc3339(), "2030-02-01T10:00:00+07:00");
        assert!(resolve_due_at(Some("next tuesday"), None, fixed_now()).is_err());
    }

    #[test]
    fn due_at_from_relative_minutes() {
        let due = resolve_due_at(None, Some(30), fixed_now()).unwrap();
        assert_eq!(due.to_rfc3339(), "2030-01-01T09:30:00+07:00");
        assert!(resolve_due_at(None, Some(-1), fixed_now()).is_err());
    }

    #[test]
    fn describe_post_marks_due_and_attempts() {
        let mut post = ScheduledPost::new("Launch day", fixed_now());
        let later = fixed_now().with_timezone(&Utc) + chrono::Duration::minutes(1);
        assert_eq!(
            describe_post(1, &post, later),
            "1. [due] 2030-01-01T09:00:00+07:00 Launch day"
        );

        post.attempts = 2;
        let earlier = fixed_now().with_timezone(&Utc) - chrono::Duration::minutes(1);
        assert_eq!(
            describe_post(3, &post, earlier),
            "3. [pending] 2030-01-01T09:00:00+07:00 Launch day (attempts: 2)"
        );
    }

    #[tokio::test]
    async fn admin_commands_edit_state_dir() {
        let temp = tempfile::tempdir().unwrap();
        run_admin(
            Command::AddFaq {
                keywords: "Harga, price".to_string(),
                answer: "Rp 10.000".to_string(),
                image_url: None,
            },
            temp.path(),
        )
        .await
        .unwrap();
        run_admin(
            Command::AddPost {
                text: "Hello channel".to_string(),
                at: Some("2030-01-01T00:00:00Z".to_string()),
                in_minutes: None,
            },
            temp.path(),
        )
        .await
        .unwrap();

        let faqs = FaqTable::in_dir(temp.path()).load().await.unwrap();
        assert_eq!(faqs.len(), 1);
        assert_eq!(faqs[0].keywords, vec!["harga", "price"]);

        let posts = ScheduleStore::in_dir(temp.path()).load().await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].text, "Hello channel");
    }

    #[tokio::test]
    async fn blank_post_text_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let result = run_admin(
            Command::AddPost {
                text: "   ".to_string(),
                at: None,
                in_minutes: Some(1),
            },
            temp.path(),
        )
        .await;
        assert!(result.is_err());
        assert!(ScheduleStore::in_dir(temp.path()).load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ask_reports_unreadable_faq_table() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir(FaqTable::in_dir(temp.path()).path()).unwrap();
        let result = run_admin(
            Command::Ask {
                query: "harga".to_string(),
            },
            temp.path(),
        )
        .await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_triggers_shutdown() {
        let wait = shutdown_signal().unwrap();
        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let signal = tokio::time::timeout(std::time::Duration::from_secs(5), wait)
            .await
            .unwrap();
        assert_eq!(signal, "SIGTERM");
    }
}
