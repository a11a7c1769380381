use regex::Regex;
use serde::Deserialize;
use serde_yaml::Value;
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::LazyLock,
};
use thiserror::Error;
use tracing::info;

const DEFAULT_OUTPUT: &str = "update_maudau.xml";
const DEFAULT_TARGET: &str = "maudau";

static ENV_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env reference pattern")
});

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("invalid config: {0}")]
    Parse(String),
    #[error("environment variable {0} is not set")]
    MissingEnv(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Process-wide settings, built once at start-up and shared read-only.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub telegram: TelegramSettings,
    #[serde(default)]
    pub trigger: TriggerSettings,
    #[serde(default)]
    pub default_target: Option<String>,
    pub targets: BTreeMap<String, TargetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 180,
            connect_timeout_secs: 10,
            user_agent: "Mozilla/5.0 (compatible; maudau-feed-bot/1.0)".into(),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    pub api_base: String,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub webhook_secret: Option<String>,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".into(),
            bot_token: None,
            chat_id: None,
            webhook_secret: None,
        }
    }
}

impl TelegramSettings {
    /// Bot settings alone, for commands that need no feed targets.
    pub fn from_env(env: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();
        fill(&mut settings.bot_token, env("TELEGRAM_BOT_TOKEN"));
        fill(&mut settings.chat_id, env("TELEGRAM_CHAT_ID"));
        fill(&mut settings.webhook_secret, env("TELEGRAM_WEBHOOK_SECRET"));
        settings
    }
}

impl fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("api_base", &self.api_base)
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("chat_id", &self.chat_id)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    /// Key for the `/targets` HTTP API. The API is closed when unset.
    pub api_key: Option<String>,
    pub github_token: Option<String>,
    pub github_api_base: String,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            github_token: None,
            github_api_base: "https://api.github.com".into(),
        }
    }
}

impl fmt::Debug for TriggerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field(
                "github_token",
                &self.github_token.as_ref().map(|_| "<redacted>"),
            )
            .field("github_api_base", &self.github_api_base)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetConfig {
    /// Reconcile two feeds in-process and publish the result.
    Pipeline(PipelineTarget),
    /// Remote generator that starts on a plain GET.
    Url(UrlTarget),
    /// GitHub Actions workflow dispatch.
    Workflow(WorkflowTarget),
}

impl TargetConfig {
    pub fn title<'a>(&'a self, name: &'a str) -> &'a str {
        let title = match self {
            TargetConfig::Pipeline(target) => target.title.as_deref(),
            TargetConfig::Url(target) => target.title.as_deref(),
            TargetConfig::Workflow(target) => target.title.as_deref(),
        };
        title.unwrap_or(name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineTarget {
    #[serde(default)]
    pub title: Option<String>,
    pub primary: FeedSource,
    pub reference: FeedSource,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default = "default_vendor_exceptions")]
    pub vendor_exceptions: Vec<String>,
    #[serde(default = "default_locales")]
    pub locales: Vec<LocaleMapping>,
    #[serde(default)]
    pub schema: SchemaRules,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlTarget {
    #[serde(default)]
    pub title: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowTarget {
    #[serde(default)]
    pub title: Option<String>,
    pub owner: String,
    pub repo: String,
    pub workflow: String,
    #[serde(default = "default_ref", rename = "ref")]
    pub git_ref: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSource {
    /// `http(s)://` URL or local file path.
    pub location: String,
    #[serde(default)]
    pub auth: FeedAuth,
}

impl FeedSource {
    pub fn url(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            auth: FeedAuth::None,
        }
    }

    pub fn is_remote(&self) -> bool {
        let lower = self.location.trim().to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedAuth {
    #[default]
    None,
    Basic {
        username: String,
        #[serde(default)]
        password: String,
    },
    Bearer {
        token: String,
    },
    Header {
        name: String,
        value: String,
    },
    Cookie {
        value: String,
    },
}

impl fmt::Debug for FeedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            FeedAuth::None => "none",
            FeedAuth::Basic { .. } => "basic",
            FeedAuth::Bearer { .. } => "bearer",
            FeedAuth::Header { .. } => "header",
            FeedAuth::Cookie { .. } => "cookie",
        };
        write!(f, "FeedAuth({kind})")
    }
}

/// How one target locale field is filled from the source feed.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LocaleMapping {
    pub target: String,
    /// Source tags tried in order; the first non-empty wins.
    pub sources: Vec<String>,
    /// Another mapping's target to copy when every source is empty.
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(default)]
    pub strip_html: bool,
}

impl LocaleMapping {
    pub fn new(target: &str, sources: &[&str], strip_html: bool) -> Self {
        Self {
            target: target.to_string(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            fallback: None,
            strip_html,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchemaRules {
    pub required_fields: Vec<String>,
    pub require_picture: bool,
    pub max_pictures: usize,
    pub id_policy: IdPolicy,
}

impl Default for SchemaRules {
    fn default() -> Self {
        Self {
            required_fields: [
                "name_ua",
                "name_ru",
                "description_ua",
                "description_ru",
                "price",
                "categoryId",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            require_picture: true,
            max_pictures: 12,
            id_policy: IdPolicy::Sanitize,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdPolicy {
    /// Strip everything except ASCII letters and digits; drop when nothing is left.
    #[default]
    Sanitize,
    /// Drop the offer when the id has any character outside ASCII letters and digits.
    Strict,
}

fn default_output() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT)
}

fn default_ref() -> String {
    "main".into()
}

pub fn default_vendor_exceptions() -> Vec<String> {
    vec!["мойдодыр".into(), "dusel".into()]
}

pub fn default_locales() -> Vec<LocaleMapping> {
    vec![
        LocaleMapping::new("name_ru", &["name_ru", "name"], true),
        LocaleMapping::new("name_ua", &["name_ua"], true),
        LocaleMapping::new("description_ru", &["description_ru", "description"], false),
        LocaleMapping::new("description_ua", &["description_ua"], false),
    ]
}

impl AppConfig {
    /// Loads `path` when given, otherwise builds a single target from env.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env = process_env;
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                })?;
                Self::from_yaml(&raw, env)?
            }
            None => Self::from_env(env)?,
        };
        info!(
            target = "feeds.config",
            targets = config.targets.len(),
            telegram = config.telegram.bot_token.is_some(),
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn from_yaml(raw: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut document: Value =
            serde_yaml::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        expand_env(&mut document, &env)?;
        let mut config: AppConfig =
            serde_yaml::from_value(document).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.apply_env(&env);
        config.validate()?;
        Ok(config)
    }

    pub fn from_env(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let require = |key: &str| env(key).ok_or_else(|| ConfigError::MissingEnv(key.to_string()));
        let target = PipelineTarget {
            title: Some("MAUDAU".into()),
            primary: FeedSource::url(require("PRIMARY_FEED_URL")?),
            reference: FeedSource::url(require("REFERENCE_FEED_URL")?),
            output: env("OUTPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_output),
            vendor_exceptions: default_vendor_exceptions(),
            locales: default_locales(),
            schema: SchemaRules::default(),
        };
        let mut config = AppConfig {
            http: HttpSettings::default(),
            telegram: TelegramSettings::default(),
            trigger: TriggerSettings::default(),
            default_target: Some(DEFAULT_TARGET.into()),
            targets: BTreeMap::from([(DEFAULT_TARGET.to_string(), TargetConfig::Pipeline(target))]),
        };
        config.apply_env(&env);
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        if let Some(value) = env("HTTP_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
            self.http.timeout_secs = value;
        }
        if let Some(value) = env("HTTP_CONNECT_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
            self.http.connect_timeout_secs = value;
        }
        fill(&mut self.telegram.bot_token, env("TELEGRAM_BOT_TOKEN"));
        fill(&mut self.telegram.chat_id, env("TELEGRAM_CHAT_ID"));
        fill(
            &mut self.telegram.webhook_secret,
            env("TELEGRAM_WEBHOOK_SECRET"),
        );
        fill(&mut self.trigger.github_token, env("GH_DISPATCH_TOKEN"));
        fill(&mut self.trigger.api_key, env("TRIGGER_API_KEY"));
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::Invalid("no targets configured".into()));
        }
        if let Some(name) = &self.default_target
            && !self.targets.contains_key(name)
        {
            return Err(ConfigError::Invalid(format!(
                "default_target `{name}` is not a configured target"
            )));
        }
        for (name, target) in &self.targets {
            let TargetConfig::Pipeline(pipeline) = target else {
                continue;
            };
            for mapping in &pipeline.locales {
                if let Some(fallback) = &mapping.fallback
                    && !pipeline.locales.iter().any(|m| &m.target == fallback)
                {
                    return Err(ConfigError::Invalid(format!(
                        "target `{name}`: locale `{}` falls back to unknown `{fallback}`",
                        mapping.target
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.get(name)
    }

    /// Explicit name, then `default_target`, then the only pipeline target.
    pub fn resolve_pipeline_target<'a>(
        &'a self,
        name: Option<&'a str>,
    ) -> Result<(&'a str, &'a PipelineTarget), ConfigError> {
        let name = match name.or(self.default_target.as_deref()) {
            Some(name) => name,
            None => {
                let mut pipelines = self
                    .targets
                    .iter()
                    .filter(|(_, t)| matches!(t, TargetConfig::Pipeline(_)));
                match (pipelines.next(), pipelines.next()) {
                    (Some((name, _)), None) => name.as_str(),
                    _ => {
                        return Err(ConfigError::Invalid(
                            "several pipeline targets configured; pass --target".into(),
                        ));
                    }
                }
            }
        };
        match self.targets.get(name) {
            Some(TargetConfig::Pipeline(target)) => Ok((name, target)),
            Some(_) => Err(ConfigError::Invalid(format!(
                "target `{name}` is not a pipeline target"
            ))),
            None => Err(ConfigError::Invalid(format!("unknown target `{name}`"))),
        }
    }
}

/// Non-blank process environment value.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.as_deref().is_none_or(|s| s.trim().is_empty()) {
        *slot = value;
    }
}

/// Replaces `${NAME}` inside string values of the parsed document with env
/// var `NAME`. Substituted text is never read as YAML, except that a value
/// consisting of a single reference may resolve to a number or a bool.
fn expand_env(value: &mut Value, env: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
    match value {
        Value::String(text) => {
            if let Some(expanded) = expand_text(text, env)? {
                *value = expanded;
            }
        }
        Value::Sequence(items) => {
            for item in items {
                expand_env(item, env)?;
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                expand_env(item, env)?;
            }
        }
        Value::Tagged(tagged) => expand_env(&mut tagged.value, env)?,
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}

fn expand_text(
    text: &str,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<Option<Value>, ConfigError> {
    if !ENV_REF.is_match(text) {
        return Ok(None);
    }
    let mut missing = None;
    let expanded = ENV_REF.replace_all(text, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        match env(key) {
            Some(value) => value,
            None => {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });
    if let Some(key) = missing {
        return Err(ConfigError::MissingEnv(key));
    }
    let whole = ENV_REF
        .find(text)
        .is_some_and(|found| found.start() == 0 && found.end() == text.len());
    let scalar = whole
        .then(|| serde_yaml::from_str::<Value>(&expanded).ok())
        .flatten();
    if let Some(scalar @ (Value::Number(_) | Value::Bool(_))) = scalar {
        return Ok(Some(scalar));
    }
    Ok(Some(Value::String(expanded.into_owned())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const YAML: &str = r#"
telegram:
  chat_id: "42"
targets:
  maudau:
    kind: pipeline
    title: MAUDAU
    primary:
      location: https://example.com/base.xml
      auth:
        type: basic
        username: shop
        password: ${BASE_PASSWORD}
    reference:
      location: ./rozetka.xml
    output: out/update_maudau.xml
  hotline:
    kind: url
    title: HOTLINE
    url: https://example.com/generate/hotline
  epicenter:
    kind: workflow
    owner: acme
    repo: epicenter-feed
    workflow: update.yml
"#;

    #[test]
    fn parses_targets_with_defaults() {
        let config = AppConfig::from_yaml(
            YAML,
            env_of(&[("BASE_PASSWORD", "s3cret"), ("TELEGRAM_BOT_TOKEN", "t")]),
        )
        .expect("config");
        assert_eq!(config.targets.len(), 3);
        assert_eq!(config.telegram.chat_id.as_deref(), Some("42"));
        assert_eq!(config.telegram.bot_token.as_deref(), Some("t"));

        let (name, target) = config
            .resolve_pipeline_target(None)
            .expect("single pipeline target");
        assert_eq!(name, "maudau");
        assert!(target.primary.is_remote());
        assert!(!target.reference.is_remote());
        assert!(matches!(
            &target.primary.auth,
            FeedAuth::Basic { password, .. } if password == "s3cret"
        ));
        assert_eq!(target.vendor_exceptions, default_vendor_exceptions());
        assert_eq!(target.locales, default_locales());
        assert_eq!(target.schema.max_pictures, 12);

        match config.target("epicenter") {
            Some(TargetConfig::Workflow(workflow)) => assert_eq!(workflow.git_ref, "main"),
            other => panic!("unexpected target {other:?}"),
        }
        assert_eq!(config.targets["epicenter"].title("epicenter"), "epicenter");
        assert_eq!(config.targets["hotline"].title("hotline"), "HOTLINE");
    }

    #[test]
    fn missing_interpolated_env_is_an_error() {
        let err = AppConfig::from_yaml(YAML, env_of(&[])).expect_err("missing env");
        assert!(matches!(err, ConfigError::MissingEnv(key) if key == "BASE_PASSWORD"));
    }

    #[test]
    fn interpolated_values_are_not_read_as_yaml() {
        let raw = r#"
# rotate ${UNSET_IN_COMMENT} yearly
http:
  timeout_secs: ${TIMEOUT}
targets:
  t:
    kind: pipeline
    primary:
      location: ${PRIMARY}
      auth:
        type: bearer
        token: ${TOKEN}
    reference:
      location: ./rozetka.xml
"#;
        let config = AppConfig::from_yaml(
            raw,
            env_of(&[
                ("TOKEN", "abc #def: x"),
                ("PRIMARY", "*feed"),
                ("TIMEOUT", "45"),
            ]),
        )
        .expect("config");
        assert_eq!(config.http.timeout_secs, 45);
        let (_, target) = config.resolve_pipeline_target(None).expect("target");
        assert_eq!(target.primary.location, "*feed");
        assert!(matches!(
            &target.primary.auth,
            FeedAuth::Bearer { token } if token == "abc #def: x"
        ));
    }

    #[test]
    fn env_only_config_builds_default_target() {
        let config = AppConfig::from_env(env_of(&[
            ("PRIMARY_FEED_URL", "https://example.com/a.xml"),
            ("REFERENCE_FEED_URL", "https://example.com/b.xml"),
            ("HTTP_TIMEOUT_SECS", "30"),
        ]))
        .expect("config");
        assert_eq!(config.http.timeout_secs, 30);
        let (name, target) = config.resolve_pipeline_target(None).expect("target");
        assert_eq!(name, "maudau");
        assert_eq!(target.output, PathBuf::from(DEFAULT_OUTPUT));

        let err = AppConfig::from_env(env_of(&[])).expect_err("urls required");
        assert!(matches!(err, ConfigError::MissingEnv(key) if key == "PRIMARY_FEED_URL"));
    }

    #[test]
    fn telegram_settings_from_env_only() {
        let settings = TelegramSettings::from_env(env_of(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("TELEGRAM_WEBHOOK_SECRET", "s"),
        ]));
        assert_eq!(settings.bot_token.as_deref(), Some("t"));
        assert_eq!(settings.webhook_secret.as_deref(), Some("s"));
        assert_eq!(settings.chat_id, None);
        assert_eq!(settings.api_base, "https://api.telegram.org");
        assert!(!format!("{settings:?}").contains("\"t\""));
    }

    #[test]
    fn rejects_unknown_locale_fallback() {
        let raw = r#"
targets:
  t:
    kind: pipeline
    primary: { location: a.xml }
    reference: { location: b.xml }
    locales:
      - { target: name_ru, sources: [name] }
      - { target: name_ua, sources: [name_ua], fallback: name_en }
"#;
        let err = AppConfig::from_yaml(raw, env_of(&[])).expect_err("bad fallback");
        assert!(err.to_string().contains("name_en"));
    }

    #[test]
    fn resolving_non_pipeline_target_fails() {
        let config = AppConfig::from_yaml(YAML, env_of(&[("BASE_PASSWORD", "x")])).expect("config");
        assert!(config.resolve_pipeline_target(Some("hotline")).is_err());
        assert!(config.resolve_pipeline_target(Some("nope")).is_err());
    }
}
