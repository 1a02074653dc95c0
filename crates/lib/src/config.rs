//! Settings types, loading and persistence.
//!
//! Settings are stored as JSON (e.g. `~/.clawface/settings.json`) and merged over the
//! defaults on load. The chat session reads them once per request.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::gateway::SessionConfig;

const DEFAULT_GATEWAY_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "qwen2.5-coder:7b";

/// User-editable application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Gateway base URL, without the `/v1/...` suffix.
    pub gateway_url: String,

    /// Model id sent with every completion request.
    pub model: String,

    /// Optional agent routing hint (empty = none).
    pub agent_id: String,

    /// Bearer token (empty = none). Overridden by CLAWFACE_GATEWAY_TOKEN env.
    pub token: String,

    pub theme: Theme,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            agent_id: String::new(),
            token: String::new(),
            theme: Theme::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Follow the OS preference.
    #[default]
    System,
    Light,
    Dark,
}

impl Theme {
    pub const ALL: [Theme; 3] = [Theme::System, Theme::Light, Theme::Dark];

    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::System => "system",
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

impl std::str::FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Theme::System),
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("unknown theme: {}", other)),
        }
    }
}

/// Partial update for [`Settings`]; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub gateway_url: Option<String>,
    pub model: Option<String>,
    pub agent_id: Option<String>,
    pub token: Option<String>,
    pub theme: Option<Theme>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self == &SettingsPatch::default()
    }
}

impl Settings {
    /// Shallow-merge a patch into these settings.
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(v) = patch.gateway_url {
            self.gateway_url = v;
        }
        if let Some(v) = patch.model {
            self.model = v;
        }
        if let Some(v) = patch.agent_id {
            self.agent_id = v;
        }
        if let Some(v) = patch.token {
            self.token = v;
        }
        if let Some(v) = patch.theme {
            self.theme = v;
        }
        self.normalize();
    }

    /// An empty gateway URL is never kept.
    fn normalize(&mut self) {
        if self.gateway_url.trim().is_empty() {
            self.gateway_url = DEFAULT_GATEWAY_URL.to_string();
        }
    }

    /// The request-time view used by the gateway client.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            gateway_base_url: self.gateway_url.trim().to_string(),
            model_id: non_empty(&self.model),
            agent_id: non_empty(&self.agent_id),
            auth_token: resolve_gateway_token(self),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Resolve the gateway token: env CLAWFACE_GATEWAY_TOKEN overrides settings.
pub fn resolve_gateway_token(settings: &Settings) -> Option<String> {
    std::env::var("CLAWFACE_GATEWAY_TOKEN")
        .ok()
        .and_then(|s| non_empty(&s))
        .or_else(|| non_empty(&settings.token))
}

/// Resolve settings path from env or default.
pub fn default_settings_path() -> PathBuf {
    std::env::var("CLAWFACE_SETTINGS_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".clawface").join("settings.json"))
                .unwrap_or_else(|| PathBuf::from("settings.json"))
        })
}

/// Load settings from `path`. Missing file => defaults.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        log::debug!("settings file not found, using defaults: {}", path.display());
        return Ok(Settings::default());
    }
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings from {}", path.display()))?;
    let mut settings: Settings = serde_json::from_str(&s)
        .with_context(|| format!("parsing settings from {}", path.display()))?;
    settings.normalize();
    Ok(settings)
}

/// Write settings as pretty JSON, creating the parent directory if needed.
pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating settings directory {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, json)
        .with_context(|| format!("writing settings to {}", path.display()))?;
    Ok(())
}

/// Shared settings with get/update; persisted to a file when it has a path.
pub struct SettingsStore {
    path: Option<PathBuf>,
    current: RwLock<Settings>,
}

impl SettingsStore {
    /// Load from `path` (or the default path) and persist updates there.
    pub fn open(path: Option<PathBuf>) -> Result<Self> {
        let path = path.unwrap_or_else(default_settings_path);
        let settings = load_settings(&path)?;
        Ok(Self {
            path: Some(path),
            current: RwLock::new(settings),
        })
    }

    /// Store that lives only in memory.
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            current: RwLock::new(settings),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self) -> Settings {
        match self.current.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Merge `patch` and persist. The in-memory value is updated even if the write fails.
    pub fn update(&self, patch: SettingsPatch) -> Result<Settings> {
        let updated = {
            let mut g = match self.current.write() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            g.apply(patch);
            g.clone()
        };
        if let Some(ref path) = self.path {
            save_settings(path, &updated)?;
            log::info!("saved settings to {}", path.display());
        }
        Ok(updated)
    }
}
