pub mod config;
pub mod dispatcher;
pub mod telegram;
pub mod traits;

pub use config::{resolve_state_dir, HeraldConfig, TelegramConfig};
pub use dispatcher::{start_channel_listeners, MessageRouter, Routed};
pub use telegram::TelegramChannel;
pub use traits::{Channel, ChannelMessage};
