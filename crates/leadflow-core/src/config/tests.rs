use super::*;

#[test]
fn test_defaults() {
    let cfg = Config::default();
    assert_eq!(cfg.dispatch.poll_interval_secs, 60);
    assert_eq!(cfg.dispatch.max_attempts, 3);
    assert_eq!(cfg.followup.default_campaign, "no_response");
    assert_eq!(cfg.followup.grace_minutes, 15);
    assert_eq!(cfg.transport.kind, "log");
    assert!(cfg.reminder.enabled);
    assert!(!cfg.api.enabled);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let toml_str = r#"
        [dispatch]
        max_attempts = 5

        [followup]
        grace_minutes = 30
    "#;
    let cfg: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(cfg.dispatch.max_attempts, 5);
    assert_eq!(cfg.dispatch.poll_interval_secs, 60);
    assert!(cfg.dispatch.enabled);
    assert_eq!(cfg.followup.grace_minutes, 30);
    assert_eq!(cfg.followup.attribution_window_hours, 24);
    assert_eq!(cfg.store.max_connections, 4);
}

#[test]
fn test_webhook_requires_url() {
    let toml_str = r#"
        [transport]
        kind = "webhook"
    "#;
    let cfg: Config = toml::from_str(toml_str).unwrap();
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("webhook_url"));
}

#[test]
fn test_unknown_transport_rejected() {
    let mut cfg = Config::default();
    cfg.transport.kind = "carrier-pigeon".into();
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_attempts_rejected() {
    let mut cfg = Config::default();
    cfg.dispatch.max_attempts = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_followup_windows_are_bounded() {
    let mut cfg = Config::default();
    cfg.followup.grace_minutes = MAX_GRACE_MINUTES;
    cfg.followup.attribution_window_hours = MAX_ATTRIBUTION_WINDOW_HOURS;
    assert!(cfg.validate().is_ok());

    cfg.followup.grace_minutes = i64::MAX;
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("grace_minutes"));

    cfg.followup.grace_minutes = -1;
    assert!(cfg.validate().is_err());

    cfg.followup.grace_minutes = 15;
    cfg.followup.attribution_window_hours = 10_000_000_000_000;
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("attribution_window_hours"));
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let cfg = load("/nonexistent/__leadflow_test__/config.toml").unwrap();
    assert_eq!(cfg.leadflow.name, "leadflow");
}

#[test]
fn test_load_from_file() {
    let tmp = std::env::temp_dir().join("__leadflow_test_config__.toml");
    std::fs::write(
        &tmp,
        "[api]\nenabled = true\nport = 8088\n\n[transport]\nkind = \"webhook\"\nwebhook_url = \"http://localhost:9/send\"\n",
    )
    .unwrap();
    let cfg = load(tmp.to_str().unwrap()).unwrap();
    assert!(cfg.api.enabled);
    assert_eq!(cfg.api.port, 8088);
    assert_eq!(cfg.transport.webhook_url, "http://localhost:9/send");
    let _ = std::fs::remove_file(&tmp);
}

#[test]
fn test_shellexpand_home() {
    if let Some(home) = std::env::var_os("HOME") {
        let expanded = shellexpand("~/x/y.db");
        assert_eq!(expanded, format!("{}/x/y.db", home.to_string_lossy()));
    }
    assert_eq!(shellexpand("/abs/path"), "/abs/path");
}
