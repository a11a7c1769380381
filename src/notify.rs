use crate::telegram::TelegramClient;
use tracing::{debug, info, warn};

/// Best-effort run notifications to one Telegram chat.
///
/// Delivery failures are logged and swallowed; a notification never changes
/// the outcome of the run it reports on.
#[derive(Clone, Default)]
pub struct Notifier {
    sink: Option<(TelegramClient, String)>,
}

impl Notifier {
    pub fn new(telegram: Option<TelegramClient>, chat_id: Option<&str>) -> Self {
        let chat_id = chat_id.map(str::trim).filter(|id| !id.is_empty());
        let sink = match (telegram, chat_id) {
            (Some(client), Some(chat_id)) => Some((client, chat_id.to_string())),
            _ => None,
        };
        Self { sink }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub async fn notify(&self, text: &str) {
        let Some((client, chat_id)) = &self.sink else {
            debug!(target = "feeds.notify", "telegram not configured; skip notify");
            return;
        };
        match client.send_message(chat_id, text, None).await {
            Ok(()) => info!(target = "feeds.notify", chat_id = %chat_id, "notification sent"),
            Err(err) => warn!(target = "feeds.notify", error = %err, "notification failed"),
        }
    }
}
