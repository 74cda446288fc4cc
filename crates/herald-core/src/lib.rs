pub mod dispatch;
pub mod error;
pub mod faq;
pub mod outbox;
pub mod responder;
pub mod schedule;
mod storage;

pub use dispatch::{CycleReport, DeliveryPolicy, PostDispatcher, DEFAULT_DISPATCH_INTERVAL};
pub use error::StoreError;
pub use faq::{best_match, normalize_keywords, FaqListing, FaqRecord, FaqTable};
pub use outbox::{Outbox, SendMessage, SendPhoto};
pub use responder::{answer_query, ReplyContext};
pub use schedule::{parse_due_at, ScheduleStore, ScheduledPost};
