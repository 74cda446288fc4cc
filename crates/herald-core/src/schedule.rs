use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::storage::{load_values, save_records};

pub const SCHEDULE_FILE: &str = "scheduled_posts.json";

/// Longer than any real-world DST jump.
const GAP_LOOKBACK_HOURS: i64 = 6;

/// A text post waiting to be published to the broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledPost {
    pub text: String,
    #[serde(rename = "time", serialize_with = "serialize_rfc3339")]
    pub due_at: DateTime<FixedOffset>,
    /// Failed delivery attempts so far. Only non-zero under a retry policy.
    #[serde(skip_serializing_if = "is_zero")]
    pub attempts: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

fn serialize_rfc3339<S: serde::Serializer>(
    dt: &DateTime<FixedOffset>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&dt.to_rfc3339())
}

impl ScheduledPost {
    pub fn new(text: impl Into<String>, due_at: DateTime<FixedOffset>) -> Self {
        Self {
            text: text.into(),
            due_at,
            attempts: 0,
        }
    }

    pub fn is_due(&self, now: DateTime<chrono::Utc>) -> bool {
        self.due_at <= now
    }

    /// Decode one stored entry, reporting why it is unusable.
    pub fn from_value(value: &Value) -> std::result::Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "entry is not an object".to_string())?;

        let text = match obj.get("text") {
            Some(Value::String(text)) if !text.trim().is_empty() => text.clone(),
            Some(Value::String(_)) => return Err("empty `text`".to_string()),
            Some(_) => return Err("`text` is not a string".to_string()),
            None => return Err("missing `text`".to_string()),
        };

        let due_at = match obj.get("time") {
            Some(Value::String(raw)) => {
                parse_due_at(raw).ok_or_else(|| format!("unparseable `time` {raw:?}"))?
            }
            Some(_) => return Err("`time` is not a string".to_string()),
            None => return Err("missing `time`".to_string()),
        };

        let attempts = match obj.get("attempts") {
            None | Some(Value::Null) => 0,
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| "`attempts` is not a small unsigned integer".to_string())?,
        };

        Ok(Self {
            text,
            due_at,
            attempts,
        })
    }
}

/// Parse an ISO-8601 timestamp. Values without an offset are taken as host
/// local time; a bare date means local midnight.
pub fn parse_due_at(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    localize(&naive)
}

/// Attach the host zone's offset to `naive`. An ambiguous time (DST fold)
/// takes the earlier instant. A time skipped by a DST jump keeps the offset
/// in effect before the jump, which lands it just past the gap.
fn localize(naive: &NaiveDateTime) -> Option<DateTime<FixedOffset>> {
    match Local.from_local_datetime(naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Some(dt.fixed_offset()),
        LocalResult::None => {
            let before = naive.checked_sub_signed(chrono::Duration::hours(GAP_LOOKBACK_HOURS))?;
            let offset = *Local.from_local_datetime(&before).earliest()?.offset();
            offset.from_local_datetime(naive).single()
        }
    }
}

/// Outcome of loading the schedule file.
#[derive(Debug, Default)]
pub(crate) struct LoadedSchedule {
    pub posts: Vec<ScheduledPost>,
    pub malformed: usize,
}

/// Durable queue of scheduled posts backed by a single JSON file.
///
/// The file is re-read on every operation. Mutations inside this process are
/// serialized; a separate process writing the same file races and the last
/// writer wins.
pub struct ScheduleStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at `<state_dir>/scheduled_posts.json`.
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(SCHEDULE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every well-formed post in storage order. Malformed entries are
    /// logged and skipped.
    pub async fn load(&self) -> Result<Vec<ScheduledPost>> {
        Ok(self.load_checked().await?.posts)
    }

    pub async fn save(&self, posts: &[ScheduledPost]) -> Result<()> {
        save_records(&self.path, posts).await
    }

    /// Append a post and persist the schedule.
    pub async fn add_post(
        &self,
        text: &str,
        due_at: DateTime<FixedOffset>,
    ) -> Result<ScheduledPost> {
        if text.trim().is_empty() {
            return Err(StoreError::Validation(
                "post text must not be empty".to_string(),
            ));
        }
        let post = ScheduledPost::new(text, due_at);

        let _guard = self.lock().await;
        let mut posts = self.load().await?;
        posts.push(post.clone());
        self.save(&posts).await?;

        info!("post scheduled for {}", due_at.to_rfc3339());
        Ok(post)
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub(crate) async fn load_checked(&self) -> Result<LoadedSchedule> {
        let mut loaded = LoadedSchedule::default();
        for value in load_values(&self.path).await? {
            match ScheduledPost::from_value(&value) {
                Ok(post) => loaded.posts.push(post),
                Err(reason) => {
                    warn!("dropping malformed scheduled post {value}: {reason}");
                    loaded.malformed += 1;
                }
            }
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    fn at(raw: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(raw).unwrap()
    }

    #[test]
    fn parse_due_at_accepts_rfc3339_and_naive_forms() {
        assert_eq!(
            parse_due_at("2025-01-31T09:30:00+07:00"),
            Some(at("2025-01-31T09:30:00+07:00"))
        );

        let naive = parse_due_at("2025-01-31T09:30:00").unwrap();
        assert_eq!(naive.naive_local().to_string(), "2025-01-31 09:30:00");

        let micros = parse_due_at("2025-01-31T09:30:00.123456").unwrap();
        assert_eq!(micros.timestamp_subsec_micros(), 123456);

        let date_only = parse_due_at("2025-01-31").unwrap();
        assert_eq!(date_only.naive_local().to_string(), "2025-01-31 00:00:00");

        assert!(parse_due_at("tomorrow morning").is_none());
        assert!(parse_due_at("").is_none());
    }

    #[test]
    fn from_value_reports_malformed_shapes() {
        let ok = serde_json::json!({"text": "hi", "time": "2025-01-31T09:30:00Z"});
        assert!(ScheduledPost::from_value(&ok).is_ok());

        for bad in [
            serde_json::json!({"text": "hi"}),
            serde_json::json!({"time": "2025-01-31T09:30:00Z"}),
            serde_json::json!({"text": "", "time": "2025-01-31T09:30:00Z"}),
            serde_json::json!({"text": "hi", "time": "not a time"}),
            serde_json::json!({"text": 5, "time": "2025-01-31T09:30:00Z"}),
            serde_json::json!({"text": "hi", "time": "2025-01-31T09:30:00Z", "attempts": -1}),
            serde_json::json!("just a string"),
        ] {
            assert!(ScheduledPost::from_value(&bad).is_err(), "{bad}");
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let temp = tempdir().unwrap();
        let store = ScheduleStore::in_dir(temp.path());

        let mut retried = ScheduledPost::new("second", at("2031-06-01T12:00:00-05:00"));
        retried.attempts = 2;
        let posts = vec![
            ScheduledPost::new("first <b>bold</b>", at("2030-01-01T00:00:00Z")),
            retried,
        ];
        store.save(&posts).await.unwrap();

        assert_eq!(store.load().await.unwrap(), posts);
    }

    #[tokio::test]
    async fn attempts_are_omitted_when_zero() {
        let temp = tempdir().unwrap();
        let store = ScheduleStore::in_dir(temp.path());
        store
            .save(&[ScheduledPost::new("hello", at("2030-01-01T00:00:00Z"))])
            .await
            .unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let json: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json[0]["text"], "hello");
        assert_eq!(json[0]["time"], "2030-01-01T00:00:00+00:00");
        assert!(json[0].get("attempts").is_none());
    }

    #[tokio::test]
    async fn add_post_appends_in_order() {
        let temp = tempdir().unwrap();
        let store = ScheduleStore::in_dir(temp.path());
        let past = (Utc::now() - Duration::hours(1)).fixed_offset();
        let future = (Utc::now() + Duration::hours(1)).fixed_offset();

        store.add_post("one", future).await.unwrap();
        store.add_post("two", past).await.unwrap();

        let texts: Vec<_> = store.load().await.unwrap().into_iter().map(|p| p.text).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn add_post_rejects_blank_text() {
        let temp = tempdir().unwrap();
        let store = ScheduleStore::in_dir(temp.path());
        let err = store
            .add_post("   ", Utc::now().fixed_offset())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty_and_is_overwritten() {
        let temp = tempdir().unwrap();
        let store = ScheduleStore::in_dir(temp.path());
        std::fs::write(store.path(), "[{\"text\": \"half").unwrap();

        assert!(store.load().await.unwrap().is_empty());

        store
            .add_post("fresh", at("2030-01-01T00:00:00Z"))
            .await
            .unwrap();
        let posts = store.load().await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].text, "fresh");
    }

    #[tokio::test]
    async fn unreadable_store_rejects_add_without_writing() {
        let temp = tempdir().unwrap();
        let store = ScheduleStore::in_dir(temp.path());
        std::fs::create_dir(store.path()).unwrap();

        assert!(matches!(store.load().await, Err(StoreError::Io(_))));
        let err = store
            .add_post("lost?", at("2030-01-01T00:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(store.path().is_dir());
    }
}
