use crate::config::TelegramSettings;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("telegram {method} request failed: {message}")]
    Http { method: String, message: String },
    #[error("telegram {method} rejected: {description}")]
    Rejected { method: String, description: String },
}

/// Thin Bot API client. Every call is a JSON `POST /bot<token>/<method>`.
#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    /// `None` when no bot token is configured.
    pub fn new(http: Client, settings: &TelegramSettings) -> Option<Self> {
        let token = settings
            .bot_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())?;
        Some(Self {
            http,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn call(&self, method: &str, payload: &Value) -> Result<Value, TelegramError> {
        let url = format!("{}/bot{}/{method}", self.api_base, self.token);
        let http_err = |message: String| TelegramError::Http {
            method: method.to_string(),
            message,
        };

        let response = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            // reqwest errors embed the URL, which carries the token
            .map_err(|err| http_err(err.without_url().to_string()))?;
        let status = response.status();
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|_| http_err(format!("HTTP {status}")))?;

        if !body.ok {
            return Err(TelegramError::Rejected {
                method: method.to_string(),
                description: body
                    .description
                    .unwrap_or_else(|| format!("HTTP {status}")),
            });
        }
        Ok(body.result.unwrap_or(Value::Null))
    }

    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        let mut payload = json!({ "chat_id": chat_id, "text": text });
        if let Some(keyboard) = keyboard {
            payload["reply_markup"] = json!(keyboard);
        }
        self.call("sendMessage", &payload).await.map(|_| ())
    }

    pub async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<(), TelegramError> {
        let payload = json!({
            "callback_query_id": callback_id,
            "text": text,
            "show_alert": false,
        });
        self.call("answerCallbackQuery", &payload).await.map(|_| ())
    }

    pub async fn set_webhook(
        &self,
        url: &str,
        secret: Option<&str>,
        drop_pending: bool,
    ) -> Result<Value, TelegramError> {
        let mut payload = json!({
            "url": url,
            "allowed_updates": ["message", "callback_query"],
            "drop_pending_updates": drop_pending,
        });
        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            payload["secret_token"] = json!(secret);
        }
        self.call("setWebhook", &payload).await
    }

    pub async fn webhook_info(&self) -> Result<Value, TelegramError> {
        self.call("getWebhookInfo", &json!({})).await
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
    result: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub text: Option<String>,
    pub chat: Chat,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub data: Option<String>,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

/// Local stand-in for the Bot API that records every call.
#[cfg(test)]
pub(crate) mod fake {
    use axum::{
        Json, Router,
        body::Bytes,
        extract::{Path, State},
        http::StatusCode,
        routing::post,
    };
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    pub(crate) const REJECTED_TOKEN: &str = "revoked";

    #[derive(Clone, Default)]
    pub(crate) struct FakeTelegram {
        calls: Arc<Mutex<Vec<(String, Value)>>>,
    }

    impl FakeTelegram {
        pub(crate) async fn start() -> (Self, String) {
            let fake = Self::default();
            let router = Router::new()
                .route("/{token}/{method}", post(record))
                .with_state(fake.clone());
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind");
            let addr = listener.local_addr().expect("addr");
            tokio::spawn(async move {
                let _ = axum::serve(listener, router).await;
            });
            (fake, format!("http://{addr}"))
        }

        pub(crate) fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().expect("calls").clone()
        }

        pub(crate) fn calls_to(&self, method: &str) -> Vec<Value> {
            self.calls()
                .into_iter()
                .filter(|(name, _)| name == method)
                .map(|(_, body)| body)
                .collect()
        }
    }

    async fn record(
        State(fake): State<FakeTelegram>,
        Path((token, method)): Path<(String, String)>,
        body: Bytes,
    ) -> (StatusCode, Json<Value>) {
        if token == format!("bot{REJECTED_TOKEN}") {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "ok": false, "description": "Unauthorized" })),
            );
        }
        let payload = serde_json::from_slice(&body).unwrap_or(Value::Null);
        fake.calls.lock().expect("calls").push((method, payload));
        (StatusCode::OK, Json(json!({ "ok": true, "result": true })))
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{FakeTelegram, REJECTED_TOKEN};
    use super::*;
    use crate::config::HttpSettings;
    use crate::http::build_client;

    fn client(api_base: &str, token: &str) -> TelegramClient {
        let settings = TelegramSettings {
            api_base: api_base.to_string(),
            bot_token: Some(token.to_string()),
            ..TelegramSettings::default()
        };
        let http = build_client(&HttpSettings::default()).expect("client");
        TelegramClient::new(http, &settings).expect("token set")
    }

    #[test]
    fn blank_token_means_no_client() {
        let http = build_client(&HttpSettings::default()).expect("client");
        let settings = TelegramSettings {
            bot_token: Some("  ".into()),
            ..TelegramSettings::default()
        };
        assert!(TelegramClient::new(http, &settings).is_none());
    }

    #[tokio::test]
    async fn sends_message_with_keyboard() {
        let (fake, base) = FakeTelegram::start().await;
        let keyboard = InlineKeyboardMarkup {
            inline_keyboard: vec![vec![InlineKeyboardButton {
                text: "Обновить MAUDAU".into(),
                callback_data: "run:maudau".into(),
            }]],
        };
        client(&base, "t0k")
            .send_message("42", "hello", Some(&keyboard))
            .await
            .expect("sent");

        let sent = fake.calls_to("sendMessage");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["chat_id"], "42");
        assert_eq!(
            sent[0]["reply_markup"]["inline_keyboard"][0][0]["callback_data"],
            "run:maudau"
        );
    }

    #[tokio::test]
    async fn set_webhook_sends_secret_and_updates() {
        let (fake, base) = FakeTelegram::start().await;
        let bot = client(&base, "t0k");
        bot.set_webhook("https://hook.example/telegram/webhook", Some("s"), true)
            .await
            .expect("set");
        bot.webhook_info().await.expect("info");

        let set = fake.calls_to("setWebhook");
        assert_eq!(set[0]["secret_token"], "s");
        assert_eq!(set[0]["drop_pending_updates"], true);
        assert_eq!(set[0]["allowed_updates"], json!(["message", "callback_query"]));
        assert_eq!(fake.calls_to("getWebhookInfo").len(), 1);
    }

    #[tokio::test]
    async fn rejected_call_reports_description() {
        let (_fake, base) = FakeTelegram::start().await;
        let err = client(&base, REJECTED_TOKEN)
            .send_message("42", "hello", None)
            .await
            .expect_err("rejected");
        assert!(matches!(
            err,
            TelegramError::Rejected { ref description, .. } if description == "Unauthorized"
        ));
    }

    #[test]
    fn parses_callback_update() {
        let raw = r#"{"update_id":1,"callback_query":{"id":"cb1","data":"run:maudau",
            "from":{"id":7},"message":{"message_id":3,"chat":{"id":-100,"type":"group"}}}}"#;
        let update: Update = serde_json::from_str(raw).expect("update");
        let query = update.callback_query.expect("callback");
        assert_eq!(query.data.as_deref(), Some("run:maudau"));
        assert_eq!(query.message.expect("message").chat.id, -100);
        assert!(update.message.is_none());
    }
}
