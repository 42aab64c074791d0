//! Runtime configuration for the stamp worker.
//!
//! All worker behaviour is controlled through [`WorkerConfig`], built via
//! [`WorkerConfigBuilder`] or read from the environment with
//! [`WorkerConfig::from_env`]. Per-type options (text, color, date field)
//! are keyed by stamp type, the `<type>` in a `stamp:<type>` tag.

use crate::error::StampError;
use crate::pipeline::render::hex_to_rgb;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Default delay between poll cycles, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
/// Default stamp color (dark blue).
pub const DEFAULT_COLOR: &str = "#003399";
/// Default HTTP timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Built-in stamp types with their default text and date field.
const BUILTIN_TYPES: &[(&str, &str, &str)] = &[
    ("paid", "PAID", "Paid Date"),
    ("received", "RECEIVED", "Received Date"),
];

/// Configuration for the stamp worker.
#[derive(Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Base URL of the Paperless-ngx instance, without trailing slash.
    pub paperless_url: String,

    /// API token sent as `Authorization: Token <token>`.
    pub paperless_token: String,

    /// Delay between poll cycles in seconds. Default: 60.
    pub poll_interval_secs: u64,

    /// Per-request HTTP timeout in seconds. Default: 30.
    pub timeout_secs: u64,

    /// Fallback color for any stamp type without an override.
    pub default_color: String,

    /// Per-type color overrides.
    pub colors: HashMap<String, String>,

    /// Per-type display text overrides. Upper-cased when the stamp is built.
    pub texts: HashMap<String, String>,

    /// Per-type custom field holding the stamp date.
    pub date_fields: HashMap<String, String>,

    /// What to do when a `received` stamp has no date field value.
    pub received_date_fallback: DateFallback,

    /// Endpoint template for uploading stamped versions, `{id}` is replaced
    /// by the document id. `None` means the store cannot take new versions.
    pub version_endpoint: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let mut texts = HashMap::new();
        let mut date_fields = HashMap::new();
        for (stamp_type, text, field) in BUILTIN_TYPES {
            texts.insert(stamp_type.to_string(), text.to_string());
            date_fields.insert(stamp_type.to_string(), field.to_string());
        }
        Self {
            paperless_url: String::new(),
            paperless_token: String::new(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            default_color: DEFAULT_COLOR.to_string(),
            colors: HashMap::new(),
            texts,
            date_fields,
            received_date_fallback: DateFallback::default(),
            version_endpoint: None,
        }
    }
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("paperless_url", &self.paperless_url)
            .field("paperless_token", &"<redacted>")
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("timeout_secs", &self.timeout_secs)
            .field("default_color", &self.default_color)
            .field("colors", &self.colors)
            .field("texts", &self.texts)
            .field("date_fields", &self.date_fields)
            .field("received_date_fallback", &self.received_date_fallback)
            .field("version_endpoint", &self.version_endpoint)
            .finish()
    }
}

impl WorkerConfig {
    /// Create a new builder seeded with the built-in defaults.
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self, StampError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// [`WorkerConfig::from_env`] delegates here; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StampError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let url = get("PAPERLESS_URL").ok_or_else(|| {
            StampError::InvalidConfig("PAPERLESS_URL environment variable is required".into())
        })?;
        let token = get("PAPERLESS_TOKEN").ok_or_else(|| {
            StampError::InvalidConfig("PAPERLESS_TOKEN environment variable is required".into())
        })?;

        let mut builder = Self::builder().paperless_url(url).paperless_token(token);

        if let Some(raw) = get("STAMP_POLL_INTERVAL") {
            builder = builder.poll_interval_secs(parse_secs("STAMP_POLL_INTERVAL", &raw)?);
        }
        if let Some(raw) = get("PAPERLESS_TIMEOUT") {
            builder = builder.timeout_secs(parse_secs("PAPERLESS_TIMEOUT", &raw)?);
        }
        if let Some(color) = get("STAMP_DEFAULT_COLOR") {
            builder = builder.default_color(color);
        }

        for (stamp_type, _, _) in BUILTIN_TYPES {
            let env_key = stamp_type.to_uppercase();
            if let Some(color) = get(&format!("STAMP_COLOR_{env_key}")) {
                builder = builder.color(*stamp_type, color);
            }
            if let Some(text) = get(&format!("STAMP_TEXT_{env_key}")) {
                builder = builder.text(*stamp_type, text);
            }
            if let Some(field) = get(&format!("STAMP_DATE_FIELD_{env_key}")) {
                builder = builder.date_field(*stamp_type, field);
            }
        }

        if let Some(raw) = get("STAMP_RECEIVED_DATE_FALLBACK") {
            builder = builder.received_date_fallback(DateFallback::parse(&raw));
        }
        if let Some(endpoint) = get("PAPERLESS_VERSION_ENDPOINT") {
            builder = builder.version_endpoint(endpoint);
        }

        builder.build()
    }

    /// Display text for a stamp type; unknown types use the upper-cased type.
    pub fn stamp_text(&self, stamp_type: &str) -> String {
        self.texts
            .get(stamp_type)
            .cloned()
            .unwrap_or_else(|| stamp_type.to_uppercase())
    }

    /// Color for a stamp type, falling back to [`WorkerConfig::default_color`].
    pub fn stamp_color(&self, stamp_type: &str) -> &str {
        self.colors
            .get(stamp_type)
            .map(String::as_str)
            .unwrap_or(&self.default_color)
    }

    /// Custom field name holding the date for a stamp type, if any.
    pub fn date_field(&self, stamp_type: &str) -> Option<&str> {
        self.date_fields.get(stamp_type).map(String::as_str)
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<u64, StampError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| StampError::InvalidConfig(format!("{key} must be a whole number of seconds, got {raw:?}")))
}

/// Builder for [`WorkerConfig`].
#[derive(Debug)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn paperless_url(mut self, url: impl Into<String>) -> Self {
        self.config.paperless_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn paperless_token(mut self, token: impl Into<String>) -> Self {
        self.config.paperless_token = token.into();
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_interval_secs = secs;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn default_color(mut self, color: impl Into<String>) -> Self {
        self.config.default_color = color.into();
        self
    }

    pub fn color(mut self, stamp_type: impl Into<String>, color: impl Into<String>) -> Self {
        self.config.colors.insert(stamp_type.into(), color.into());
        self
    }

    pub fn text(mut self, stamp_type: impl Into<String>, text: impl Into<String>) -> Self {
        self.config.texts.insert(stamp_type.into(), text.into());
        self
    }

    pub fn date_field(mut self, stamp_type: impl Into<String>, field: impl Into<String>) -> Self {
        self.config.date_fields.insert(stamp_type.into(), field.into());
        self
    }

    pub fn received_date_fallback(mut self, fallback: DateFallback) -> Self {
        self.config.received_date_fallback = fallback;
        self
    }

    pub fn version_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.version_endpoint = Some(endpoint.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<WorkerConfig, StampError> {
        let c = &self.config;
        if c.poll_interval_secs == 0 {
            return Err(StampError::InvalidConfig(
                "Poll interval must be ≥ 1 second".into(),
            ));
        }
        if c.timeout_secs == 0 {
            return Err(StampError::InvalidConfig("HTTP timeout must be ≥ 1 second".into()));
        }
        hex_to_rgb(&c.default_color)
            .map_err(|_| StampError::InvalidConfig(format!("Invalid default color {:?}", c.default_color)))?;
        for (stamp_type, color) in &c.colors {
            hex_to_rgb(color).map_err(|_| {
                StampError::InvalidConfig(format!("Invalid color {color:?} for stamp type '{stamp_type}'"))
            })?;
        }
        if let Some(ref endpoint) = c.version_endpoint {
            if !endpoint.contains("{id}") {
                return Err(StampError::InvalidConfig(format!(
                    "Version endpoint must contain '{{id}}', got {endpoint:?}"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Date source for `received` stamps when the date field is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DateFallback {
    /// Use the date portion of the document's `created` timestamp. (default)
    #[default]
    Created,
    /// No fallback; the stamp carries no date.
    Disabled,
}

impl DateFallback {
    /// `created` (any case) selects [`DateFallback::Created`]; anything else disables it.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("created") {
            DateFallback::Created
        } else {
            DateFallback::Disabled
        }
    }
}
