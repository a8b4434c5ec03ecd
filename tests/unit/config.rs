use wa_dispatch::config::{
    apply_env_overrides, expand_tilde, resolve_database_url, Config, DatabaseConfig,
    TransportConfig, WhatsAppConfig,
};
use wa_dispatch::types::ParameterFormat;
use std::time::Duration;

#[test]
fn test_default_config() {
    let cfg = Config::default();
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 8080);
    assert!(cfg.auth.token.is_none());
    assert!(cfg.database.url.is_none());
    assert_eq!(cfg.database.sqlite_path, "~/.wa-dispatch/messages.sqlite");
}

#[test]
fn test_default_whatsapp_config() {
    let cfg = Config::default();
    assert_eq!(cfg.whatsapp.api_version, "v17.0");
    assert_eq!(cfg.whatsapp.base_url, "https://graph.facebook.com");
    assert_eq!(cfg.whatsapp.timeout_seconds, 30);
    assert!(cfg.whatsapp.access_token.is_none());
    assert!(cfg.whatsapp.verify_token.is_none());
}

#[test]
fn test_default_dispatch_config() {
    let cfg = Config::default();
    assert_eq!(cfg.dispatch.interval_seconds, 1);
    assert_eq!(cfg.dispatch.daily_limit, 1000);
    assert_eq!(cfg.dispatch.country_prefix, "55");
    assert_eq!(cfg.dispatch.language_code, "pt_BR");
}

#[test]
fn test_default_fixtures_and_replies() {
    let cfg = Config::default();
    let fixture = cfg.fixtures.get("OFERTA_INSS").unwrap();
    assert_eq!(fixture.parameter_format, Some(ParameterFormat::Named));
    assert_eq!(fixture.components.len(), 1);
    assert!(cfg.auto_replies.contains_key("Tenho Interesse"));
    assert!(cfg.auto_replies.contains_key("Não"));
}

#[test]
fn test_config_file_fixtures_replace_defaults() {
    let raw = r#"{
        "fixtures": {
            "Boas_Vindas": {
                "components": [
                    {"type": "header", "parameters": [{"type": "image", "image": {"link": "https://example.com/a.png"}}]}
                ]
            }
        },
        "auto_replies": {"Sim": "Obrigado!"}
    }"#;
    let cfg: Config = serde_json::from_str(raw).unwrap();
    assert!(cfg.fixtures.get("boas_vindas").is_some());
    assert!(cfg.fixtures.get("oferta_inss").is_none());
    assert_eq!(cfg.auto_replies.len(), 1);
}

#[test]
fn test_expand_tilde_home() {
    let path = expand_tilde("~/.wa-dispatch/messages.sqlite");
    if let Some(home) = dirs::home_dir() {
        assert_eq!(path, home.join(".wa-dispatch/messages.sqlite"));
    }
}

#[test]
fn test_resolve_database_url_sqlite_path() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nested").join("wa.sqlite");
    let cfg = Config {
        database: DatabaseConfig {
            url: None,
            sqlite_path: path.to_string_lossy().to_string(),
        },
        ..Config::default()
    };
    let url = resolve_database_url(&cfg);
    assert!(url.starts_with("sqlite://"));
    assert!(url.ends_with("?mode=rwc"));
    assert!(path.parent().unwrap().exists());
}

#[test]
fn test_transport_config_from_whatsapp() {
    let wa = WhatsAppConfig {
        access_token: Some("EAAB".to_string()),
        phone_number_id: Some("1098".to_string()),
        business_account_id: Some("777".to_string()),
        timeout_seconds: 0,
        ..WhatsAppConfig::default()
    };
    let cfg = TransportConfig::from_whatsapp(&wa).unwrap();
    assert_eq!(cfg.phone_number_id, "1098");
    assert_eq!(cfg.business_account_id.as_deref(), Some("777"));
    assert_eq!(cfg.timeout, Duration::from_secs(1));
}

#[test]
fn test_transport_config_rejects_blank_token() {
    let wa = WhatsAppConfig {
        access_token: Some("  ".to_string()),
        phone_number_id: Some("1098".to_string()),
        ..WhatsAppConfig::default()
    };
    assert!(TransportConfig::from_whatsapp(&wa).is_err());
}

#[test]
fn test_env_overrides() {
    std::env::set_var("WHATSAPP_TOKEN", "env-token");
    std::env::set_var("PHONE_NUMBER_ID", "env-phone");
    std::env::set_var("WHATSAPP_VERIFY_TOKEN", "env-verify");
    std::env::set_var("WA_DISPATCH_TOKEN", "");

    let mut cfg = Config::default();
    apply_env_overrides(&mut cfg);
    assert_eq!(cfg.whatsapp.access_token.as_deref(), Some("env-token"));
    assert_eq!(cfg.whatsapp.phone_number_id.as_deref(), Some("env-phone"));
    assert_eq!(cfg.whatsapp.verify_token.as_deref(), Some("env-verify"));
    assert!(cfg.auth.token.is_none());

    std::env::remove_var("WHATSAPP_TOKEN");
    std::env::remove_var("PHONE_NUMBER_ID");
    std::env::remove_var("WHATSAPP_VERIFY_TOKEN");
    std::env::remove_var("WA_DISPATCH_TOKEN");
}
