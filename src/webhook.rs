use crate::{
    config::TargetConfig,
    jobs::{RunRegistry, TargetStatus, TriggerError},
    models::ApiError,
    security::{TriggerAuth, require_trigger_key, verify_telegram_secret},
    telegram::{
        CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, Message, TelegramClient,
        TelegramError, Update,
    },
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const CONTROL_COMMANDS: &[&str] = &["/start", "/feeds", "/update", "start", "feeds", "update"];
const UNKNOWN_COMMAND: &str = "Неизвестная команда";
const ACCESS_DENIED: &str = "Нет доступа";

#[derive(Clone)]
pub struct AppState {
    registry: RunRegistry,
    telegram: Option<TelegramClient>,
}

impl AppState {
    pub fn new(registry: RunRegistry, telegram: Option<TelegramClient>) -> Self {
        Self { registry, telegram }
    }
}

pub fn router(state: AppState) -> Router {
    let auth = TriggerAuth::new(state.registry.config().trigger.api_key.as_deref());
    let protected = Router::new()
        .route("/targets/{name}/run", post(trigger_target))
        .route("/targets/{name}/status", get(target_status))
        .route_layer(middleware::from_fn_with_state(auth, require_trigger_key));

    Router::new()
        .route("/health", get(health))
        .route("/telegram/webhook", post(telegram_webhook))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Liveness plus the list of settings the service is missing.
async fn health(State(state): State<AppState>) -> Json<Value> {
    let config = state.registry.config();
    let mut missing = Vec::new();
    if state.telegram.is_none() {
        missing.push("TELEGRAM_BOT_TOKEN");
    }
    if config.telegram.webhook_secret.is_none() {
        missing.push("TELEGRAM_WEBHOOK_SECRET");
    }
    let has_workflows = config
        .targets
        .values()
        .any(|target| matches!(target, TargetConfig::Workflow(_)));
    if has_workflows && config.trigger.github_token.is_none() {
        missing.push("GH_DISPATCH_TOKEN");
    }
    if missing.is_empty() {
        Json(json!({ "status": "ok" }))
    } else {
        Json(json!({ "status": "degraded", "missing_env": missing.join(", ") }))
    }
}

async fn telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    crate::metrics::inc_requests("/telegram/webhook");
    let secret = state.registry.config().telegram.webhook_secret.as_deref();
    if !verify_telegram_secret(secret, &headers) {
        warn!(target = "feeds.webhook", "telegram update with invalid secret");
        return Err(AppError::Forbidden);
    }
    let update: Update =
        serde_json::from_slice(&body).map_err(|err| AppError::BadRequest(err.to_string()))?;

    let Some(telegram) = state.telegram.as_ref() else {
        warn!(target = "feeds.webhook", "telegram update ignored; bot token not configured");
        return Ok(Json(json!({ "ok": true })));
    };
    let bot = Bot {
        state: &state,
        telegram,
    };
    let result = if let Some(message) = update.message {
        bot.on_message(message).await
    } else if let Some(query) = update.callback_query {
        bot.on_callback(query).await
    } else {
        Ok(())
    };
    if let Err(err) = result {
        warn!(target = "feeds.webhook", error = %err, "telegram reply failed");
    }
    Ok(Json(json!({ "ok": true })))
}

struct Bot<'a> {
    state: &'a AppState,
    telegram: &'a TelegramClient,
}

impl Bot<'_> {
    fn is_allowed_chat(&self, chat_id: &str) -> bool {
        match self.state.registry.config().telegram.chat_id.as_deref() {
            Some(allowed) if !allowed.trim().is_empty() => allowed.trim() == chat_id,
            _ => true,
        }
    }

    async fn on_message(&self, message: Message) -> Result<(), TelegramError> {
        let chat_id = message.chat.id.to_string();
        if !self.is_allowed_chat(&chat_id) {
            let text = format!("{ACCESS_DENIED}. chat_id={chat_id}");
            return self.telegram.send_message(&chat_id, &text, None).await;
        }
        let command = normalize_command(message.text.as_deref().unwrap_or_default());
        if CONTROL_COMMANDS.contains(&command.as_str()) {
            let keyboard = self.keyboard();
            self.telegram
                .send_message(&chat_id, "Выберите фид для обновления:", Some(&keyboard))
                .await?;
        }
        Ok(())
    }

    async fn on_callback(&self, query: CallbackQuery) -> Result<(), TelegramError> {
        let chat_id = query.message.as_ref().map(|m| m.chat.id.to_string());
        let Some(chat_id) = chat_id.filter(|id| self.is_allowed_chat(id)) else {
            return self.telegram.answer_callback(&query.id, ACCESS_DENIED).await;
        };
        let data = query.data.as_deref().unwrap_or_default().trim();
        let Some(name) = data.strip_prefix("run:") else {
            return self.telegram.answer_callback(&query.id, UNKNOWN_COMMAND).await;
        };

        let (answer, text) = match self.state.registry.trigger(name).await {
            Ok(started) => {
                info!(target = "feeds.webhook", target_name = name, "started from telegram");
                let text = format!("Запущено: {}", started.title);
                (text.clone(), Some(text))
            }
            Err(TriggerError::UnknownTarget(_)) => (UNKNOWN_COMMAND.to_string(), None),
            Err(TriggerError::AlreadyRunning(title)) => {
                let text = format!("Уже выполняется: {title}");
                (text.clone(), Some(text))
            }
            Err(TriggerError::Remote { title, source }) => (
                "Ошибка запуска".to_string(),
                Some(format!("Ошибка запуска {title}: {source}")),
            ),
        };
        self.telegram.answer_callback(&query.id, &answer).await?;
        if let Some(text) = text {
            self.telegram.send_message(&chat_id, &text, None).await?;
        }
        Ok(())
    }

    fn keyboard(&self) -> InlineKeyboardMarkup {
        let inline_keyboard = self
            .state
            .registry
            .config()
            .targets
            .iter()
            .map(|(name, target)| {
                vec![InlineKeyboardButton {
                    text: format!("Обновить {}", target.title(name)),
                    callback_data: format!("run:{name}"),
                }]
            })
            .collect();
        InlineKeyboardMarkup { inline_keyboard }
    }
}

/// `/Update@feed_bot now` → `/update`.
fn normalize_command(text: &str) -> String {
    let first = text.split_whitespace().next().unwrap_or_default();
    let command = if first.starts_with('/') {
        first.split('@').next().unwrap_or_default()
    } else {
        first
    };
    command.to_lowercase()
}

async fn trigger_target(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    crate::metrics::inc_requests("/targets/run");
    let started = state.registry.trigger(&name).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "target": name,
            "title": started.title,
            "status": "started",
        })),
    ))
}

async fn target_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<TargetStatus>, AppError> {
    crate::metrics::inc_requests("/targets/status");
    state
        .registry
        .status(&name)
        .await
        .map(Json)
        .ok_or(AppError::Trigger(TriggerError::UnknownTarget(name)))
}

#[derive(Debug)]
enum AppError {
    Trigger(TriggerError),
    Forbidden,
    BadRequest(String),
}

impl From<TriggerError> for AppError {
    fn from(value: TriggerError) -> Self {
        Self::Trigger(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::Trigger(err) => {
                let (status, code) = match &err {
                    TriggerError::UnknownTarget(_) => (StatusCode::NOT_FOUND, "unknown_target"),
                    TriggerError::AlreadyRunning(_) => (StatusCode::CONFLICT, "already_running"),
                    TriggerError::Remote { .. } => (StatusCode::BAD_GATEWAY, "remote_failed"),
                };
                (status, ApiError::new(code, err.to_string()))
            }
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                ApiError::new("invalid_secret", "invalid secret"),
            ),
            AppError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, ApiError::new("invalid_update", detail))
            }
        };
        (status, Json(payload)).into_response()
    }
}
