use crate::payload::{FixtureTable, DEFAULT_LANGUAGE_CODE};
use crate::phone::DEFAULT_COUNTRY_PREFIX;
use crate::types::RunConfiguration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub whatsapp: WhatsAppConfig,
    pub dispatch: DispatchConfig,
    pub fixtures: FixtureTable,
    pub auto_replies: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub sqlite_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            sqlite_path: "~/.wa-dispatch/messages.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    pub access_token: Option<String>,
    pub phone_number_id: Option<String>,
    pub business_account_id: Option<String>,
    pub api_version: String,
    pub base_url: String,
    pub timeout_seconds: u64,
    pub verify_token: Option<String>,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            phone_number_id: None,
            business_account_id: None,
            api_version: "v17.0".to_string(),
            base_url: "https://graph.facebook.com".to_string(),
            timeout_seconds: 30,
            verify_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub interval_seconds: u64,
    pub daily_limit: u32,
    pub country_prefix: String,
    pub language_code: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 1,
            daily_limit: 1000,
            country_prefix: DEFAULT_COUNTRY_PREFIX.to_string(),
            language_code: DEFAULT_LANGUAGE_CODE.to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn run_configuration(&self) -> RunConfiguration {
        RunConfiguration {
            interval_seconds: self.interval_seconds,
            daily_limit: self.daily_limit,
        }
    }
}

fn default_auto_replies() -> HashMap<String, String> {
    let mut replies = HashMap::new();
    replies.insert(
        "Tenho Interesse".to_string(),
        "Olá! Que bom falar com você! Um de nossos consultores entrará em contato em breve para dar seguimento ao seu atendimento.".to_string(),
    );
    replies.insert(
        "Não".to_string(),
        "Tudo bem, obrigado pelo seu retorno. Se precisar de um empréstimo futuramente, pode contar com a gente.".to_string(),
    );
    replies
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            database: DatabaseConfig::default(),
            whatsapp: WhatsAppConfig::default(),
            dispatch: DispatchConfig::default(),
            fixtures: FixtureTable::default(),
            auto_replies: default_auto_replies(),
        }
    }
}

/// Immutable settings for one Cloud API transport instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub access_token: String,
    pub phone_number_id: String,
    pub business_account_id: Option<String>,
    pub api_version: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl TransportConfig {
    pub fn from_whatsapp(cfg: &WhatsAppConfig) -> anyhow::Result<Self> {
        let access_token = cfg
            .access_token
            .clone()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("WHATSAPP_TOKEN is not configured"))?;
        let phone_number_id = cfg
            .phone_number_id
            .clone()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("PHONE_NUMBER_ID is not configured"))?;
        Ok(Self {
            access_token,
            phone_number_id,
            business_account_id: cfg.business_account_id.clone(),
            api_version: cfg.api_version.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(cfg.timeout_seconds.max(1)),
        })
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn resolve_config_path() -> PathBuf {
    env::var("WA_DISPATCH_CONFIG")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| expand_tilde("~/.wa-dispatch/wa-dispatch.json"))
}

fn env_override(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn load_config() -> Config {
    let config_path = resolve_config_path();

    let mut cfg = Config::default();

    if config_path.exists() {
        if let Ok(raw) = fs::read_to_string(&config_path) {
            match serde_json::from_str::<Config>(&raw) {
                Ok(file_cfg) => cfg = file_cfg,
                Err(err) => tracing::warn!(
                    path = %config_path.display(),
                    "ignoring unreadable config file: {err}"
                ),
            }
        }
    }

    apply_env_overrides(&mut cfg);
    cfg
}

pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(token) = env_override("WA_DISPATCH_TOKEN") {
        cfg.auth.token = Some(token);
    }
    if let Some(url) = env_override("WA_DISPATCH_DATABASE_URL") {
        cfg.database.url = Some(url);
    }
    if let Some(path) = env_override("WA_DISPATCH_SQLITE_PATH") {
        cfg.database.sqlite_path = path;
    }
    if let Some(token) = env_override("WHATSAPP_TOKEN") {
        cfg.whatsapp.access_token = Some(token);
    }
    if let Some(id) = env_override("PHONE_NUMBER_ID") {
        cfg.whatsapp.phone_number_id = Some(id);
    }
    if let Some(id) = env_override("WHATSAPP_BUSINESS_ACCOUNT_ID") {
        cfg.whatsapp.business_account_id = Some(id);
    }
    if let Some(token) = env_override("WHATSAPP_VERIFY_TOKEN") {
        cfg.whatsapp.verify_token = Some(token);
    }
}

pub fn resolve_database_url(cfg: &Config) -> String {
    if let Some(url) = cfg.database.url.as_ref() {
        return url.to_string();
    }

    let path = expand_tilde(&cfg.database.sqlite_path);
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    format!("sqlite://{}?mode=rwc", path.to_string_lossy())
}
