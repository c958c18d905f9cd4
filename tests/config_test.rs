// Integration tests for configuration loading

use deployctl::config::{load_config, DnsPreflight, HealthTarget};

fn write_config(dir: &tempfile::TempDir, contents: &str) -> String {
    let path = dir.path().join("deploy.toml");
    std::fs::write(&path, contents).unwrap();
    path.to_str().unwrap().to_string()
}

#[test]
fn test_load_full_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
            [service_group]
            name = "stack"
            compose_file = "docker-compose.yml"
            work_dir = "/opt/stack"
            proxy_service = "nginx"

            [[service_group.services]]
            name = "workflow"
            health = { type = "http", url = "http://127.0.0.1:5678/healthz" }

            [[service_group.services]]
            name = "db"
            health = { type = "command", command = "pg_isready -q" }
            timeout_secs = 240

            [lets_encrypt]
            email = "ops@example.com"
            domains = ["app.example.com", "kb.example.com"]
            staging = true
            store_dir = "/var/lib/certs"
            renew_days_before_expiry = 21
            dns_preflight = "enforce"

            [health]
            poll_interval_secs = 2
            max_wait_secs = 60

            [logging]
            level = "debug"
            format = "json"
        "#,
    );

    let config = load_config(&path).unwrap();

    assert_eq!(config.service_group.name, "stack");
    assert_eq!(config.service_group.work_dir, "/opt/stack");
    assert_eq!(config.service_group.proxy_service, "nginx");
    assert_eq!(config.service_group.services.len(), 2);
    assert!(matches!(
        config.service_group.services[1].health,
        HealthTarget::Command { .. }
    ));
    assert_eq!(config.lets_encrypt.domains.len(), 2);
    assert!(config.lets_encrypt.staging);
    assert_eq!(config.lets_encrypt.store_dir, "/var/lib/certs");
    assert_eq!(config.lets_encrypt.renew_days_before_expiry, 21);
    assert_eq!(config.lets_encrypt.dns_preflight, DnsPreflight::Enforce);
    assert_eq!(config.health.poll_interval_secs, 2);
    assert_eq!(config.health.max_wait_secs, 60);
    assert_eq!(config.logging.level, "debug");
    assert!(config.validate().is_ok());
}

#[test]
fn test_load_missing_file_fails() {
    let result = load_config("/nonexistent/deploy.toml");
    let err = result.unwrap_err();
    assert!(err.to_string().contains("Failed to read"));
}

#[test]
fn test_load_invalid_toml_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "service_group = not valid toml [");

    let result = load_config(&path);
    let err = result.unwrap_err();
    assert!(err.to_string().contains("Failed to parse"));
}

#[test]
fn test_load_rejects_config_without_required_sections() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
            [service_group]
            name = "stack"
            compose_file = "docker-compose.yml"
            services = []
        "#,
    );

    // lets_encrypt section absent entirely: a deserialization error.
    assert!(load_config(&path).is_err());
}
