use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Which upstream backend a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Chat,
    Codex,
}

/// Connection fields for one upstream backend, borrowed from the config.
pub struct Backend<'a> {
    pub api_base: &'a str,
    pub api_key: &'a str,
    pub organization: Option<&'a str>,
    pub project: Option<&'a str>,
}

/// Process-wide configuration, read once at startup and immutable afterwards.
/// Field names double as the JSON tags of the external config document and as
/// the `OVERRIDE_<TAG>` environment variable tags.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// 监听地址，例如 `127.0.0.1:8181`。
    #[serde(default)]
    pub bind: String,
    /// Optional outbound proxy URL for upstream traffic.
    #[serde(default)]
    pub proxy_url: String,
    /// Per-request timeout in seconds; 0 disables the deadline.
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub codex_api_base: String,
    #[serde(default)]
    pub codex_api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codex_api_organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codex_api_project: Option<String>,
    #[serde(default)]
    pub chat_api_base: String,
    #[serde(default)]
    pub chat_api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_api_organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_api_project: Option<String>,
    /// Fallback model for chat requests whose model is not in the map.
    #[serde(default)]
    pub chat_model_default: String,
    /// Caller-supplied model name -> backend model name.
    #[serde(default)]
    pub chat_model_map: HashMap<String, String>,
    /// Ceiling applied to caller-supplied `max_tokens`.
    #[serde(default)]
    pub chat_max_tokens: u64,
    #[serde(default)]
    pub chat_locale: String,
}

impl Config {
    /// Read the config document and merge `OVERRIDE_*` environment values
    /// over it.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read config {}", path.display()))?;
        let mut cfg: Config = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        cfg.apply_overrides(|tag| env::var(format!("OVERRIDE_{}", tag.to_ascii_uppercase())).ok());
        Ok(cfg)
    }

    pub fn backend(&self, kind: BackendKind) -> Backend<'_> {
        match kind {
            BackendKind::Chat => Backend {
                api_base: &self.chat_api_base,
                api_key: &self.chat_api_key,
                organization: self.chat_api_organization.as_deref(),
                project: self.chat_api_project.as_deref(),
            },
            BackendKind::Codex => Backend {
                api_base: &self.codex_api_base,
                api_key: &self.codex_api_key,
                organization: self.codex_api_organization.as_deref(),
                project: self.codex_api_project.as_deref(),
            },
        }
    }

    /// Locale injected into chat requests; `zh_CN` when unconfigured.
    pub fn locale(&self) -> &str {
        if self.chat_locale.is_empty() {
            "zh_CN"
        } else {
            &self.chat_locale
        }
    }

    /// Merge override values over the file values, one table row per
    /// overridable scalar field. A value that fails to coerce to the field
    /// type is skipped, keeping the file value. `chat_model_map` has no
    /// scalar coercion and is deliberately absent from the table.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let slots: [(&str, Slot<'_>); 14] = [
            ("bind", Slot::Text(&mut self.bind)),
            ("proxy_url", Slot::Text(&mut self.proxy_url)),
            ("timeout", Slot::Unsigned(&mut self.timeout)),
            ("codex_api_base", Slot::Text(&mut self.codex_api_base)),
            ("codex_api_key", Slot::Text(&mut self.codex_api_key)),
            (
                "codex_api_organization",
                Slot::OptText(&mut self.codex_api_organization),
            ),
            (
                "codex_api_project",
                Slot::OptText(&mut self.codex_api_project),
            ),
            ("chat_api_base", Slot::Text(&mut self.chat_api_base)),
            ("chat_api_key", Slot::Text(&mut self.chat_api_key)),
            (
                "chat_api_organization",
                Slot::OptText(&mut self.chat_api_organization),
            ),
            ("chat_api_project", Slot::OptText(&mut self.chat_api_project)),
            (
                "chat_model_default",
                Slot::Text(&mut self.chat_model_default),
            ),
            ("chat_max_tokens", Slot::Unsigned(&mut self.chat_max_tokens)),
            ("chat_locale", Slot::Text(&mut self.chat_locale)),
        ];
        for (tag, mut slot) in slots {
            if let Some(raw) = lookup(tag) {
                slot.assign(&raw);
            }
        }
    }
}

/// A typed override target.
enum Slot<'a> {
    Text(&'a mut String),
    OptText(&'a mut Option<String>),
    Unsigned(&'a mut u64),
}

impl Slot<'_> {
    fn assign(&mut self, raw: &str) {
        match self {
            Slot::Text(v) => **v = raw.to_string(),
            Slot::OptText(v) => **v = Some(raw.to_string()),
            Slot::Unsigned(v) => {
                if let Ok(n) = raw.trim().parse::<u64>() {
                    **v = n;
                }
            }
        }
    }
}
