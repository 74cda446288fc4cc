use herald_observability::redact_text;
use tracing::{info, warn};

use crate::faq::{FaqRecord, FaqTable};
use crate::outbox::{Outbox, SendMessage, SendPhoto};

/// Where an FAQ answer goes: the querying chat, threaded under the question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyContext {
    pub chat_id: String,
    pub message_id: Option<String>,
}

/// Resolve `query` and deliver the winning answer.
///
/// The answer text is sent first when non-empty; the image, when present, is
/// attempted afterwards regardless of how the text send went. Send failures
/// and an unreadable FAQ table are logged only. Returns the matched record,
/// if any.
pub async fn answer_query(
    table: &FaqTable,
    outbox: &dyn Outbox,
    reply: &ReplyContext,
    query: &str,
) -> Option<FaqRecord> {
    let record = match table.resolve(query).await {
        Ok(found) => found?,
        Err(e) => {
            warn!("cannot read FAQ table {}: {e}", table.path().display());
            return None;
        }
    };

    if !record.answer.trim().is_empty() {
        let message = SendMessage {
            content: record.answer.clone(),
            recipient: reply.chat_id.clone(),
            reply_to: reply.message_id.clone(),
        };
        if let Err(e) = outbox.send(&message).await {
            warn!("failed to send FAQ answer to {}: {e}", reply.chat_id);
        }
    }

    if let Some(url) = record.image_ref() {
        let photo = SendPhoto {
            url: url.to_string(),
            recipient: reply.chat_id.clone(),
            reply_to: reply.message_id.clone(),
        };
        match outbox.send_photo(&photo).await {
            Ok(()) => info!("sent FAQ image from {url}"),
            Err(e) => warn!("failed to send FAQ image from '{url}': {e}"),
        }
    }

    info!(
        "answered FAQ query {} with keywords {:?}",
        redact_text(query),
        record.keywords
    );
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingOutbox {
        texts: Mutex<Vec<SendMessage>>,
        photos: Mutex<Vec<SendPhoto>>,
        fail_text: bool,
        fail_photo: bool,
    }

    #[async_trait::async_trait]
    impl Outbox for RecordingOutbox {
        async fn send(&self, message: &SendMessage) -> anyhow::Result<()> {
            self.texts.lock().push(message.clone());
            if self.fail_text {
                anyhow::bail!("Bad Request: can't parse entities");
            }
            Ok(())
        }

        async fn send_photo(&self, photo: &SendPhoto) -> anyhow::Result<()> {
            self.photos.lock().push(photo.clone());
            if self.fail_photo {
                anyhow::bail!("Bad Request: wrong file identifier");
            }
            Ok(())
        }
    }

    fn group_reply() -> ReplyContext {
        ReplyContext {
            chat_id: "-200".to_string(),
            message_id: Some("42".to_string()),
        }
    }

    #[tokio::test]
    async fn sends_answer_as_reply() {
        let temp = tempdir().unwrap();
        let table = FaqTable::in_dir(temp.path());
        table.add_faq(["harga"], "<b>Rp 10.000</b>", None).await.unwrap();
        let outbox = RecordingOutbox::default();

        let matched = answer_query(&table, &outbox, &group_reply(), "Berapa HARGA nya?").await;
        assert!(matched.is_some());

        let texts = outbox.texts.lock();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].content, "<b>Rp 10.000</b>");
        assert_eq!(texts[0].recipient, "-200");
        assert_eq!(texts[0].reply_to.as_deref(), Some("42"));
        assert!(outbox.photos.lock().is_empty());
    }

    #[tokio::test]
    async fn no_match_sends_nothing() {
        let temp = tempdir().unwrap();
        let table = FaqTable::in_dir(temp.path());
        let outbox = RecordingOutbox::default();
        assert!(answer_query(&table, &outbox, &group_reply(), "hello").await.is_none());

        table.add_faq(["refund"], "No refunds", None).await.unwrap();
        assert!(answer_query(&table, &outbox, &group_reply(), "hello").await.is_none());

        assert!(outbox.texts.lock().is_empty());
        assert!(outbox.photos.lock().is_empty());
    }

    #[tokio::test]
    async fn image_is_sent_even_when_text_fails() {
        let temp = tempdir().unwrap();
        let table = FaqTable::in_dir(temp.path());
        table
            .add_faq(["promo"], "<b broken", Some("https://img/promo.jpg"))
            .await
            .unwrap();
        let outbox = RecordingOutbox {
            fail_text: true,
            ..RecordingOutbox::default()
        };

        let matched = answer_query(&table, &outbox, &group_reply(), "any promo?").await;
        assert!(matched.is_some());
        assert_eq!(outbox.texts.lock().len(), 1);
        let photos = outbox.photos.lock();
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].url, "https://img/promo.jpg");
    }

    #[tokio::test]
    async fn photo_failure_is_swallowed() {
        let temp = tempdir().unwrap();
        let table = FaqTable::in_dir(temp.path());
        table
            .add_faq(["promo"], "", Some("https://img/promo.jpg"))
            .await
            .unwrap();
        let outbox = RecordingOutbox {
            fail_photo: true,
            ..RecordingOutbox::default()
        };

        let matched = answer_query(&table, &outbox, &group_reply(), "promo").await;
        assert!(matched.is_some());
        // Empty answer: only the image is attempted, once.
        assert!(outbox.texts.lock().is_empty());
        assert_eq!(outbox.photos.lock().len(), 1);
    }

    #[tokio::test]
    async fn unreadable_table_sends_nothing() {
        let temp = tempdir().unwrap();
        let table = FaqTable::in_dir(temp.path());
        std::fs::create_dir(table.path()).unwrap();
        let outbox = RecordingOutbox::default();

        assert!(answer_query(&table, &outbox, &group_reply(), "harga").await.is_none());
        assert!(outbox.texts.lock().is_empty());
    }
}
