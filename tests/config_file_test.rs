// Integration test for configuration file support

use infergov::config::GovernorConfig;
use infergov::GovernorError;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_full_toml_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("governor.toml");

    let toml_content = r#"
        [server]
        server_dir = "/opt/model-server"
        entrypoint = "serve.py"
        interpreter = "/usr/bin/python3"
        args = ["--model", "small"]
        port = 9100
        startup_timeout_ms = 120000
        max_restart_attempts = 5

        [server.env]
        MODEL_CACHE = "/var/cache/models"

        [monitor]
        sample_interval_ms = 5000
        history_capacity = 50

        [monitor.thresholds]
        max_memory_percent = 90.0
        max_queue_length = 5.0

        [governor]
        max_concurrent = 2
        max_queue_size = 8
        default_timeout_ms = 30000
        priority_levels = 5

        [governor.throttle]
        base_delay_ms = 250
    "#;

    fs::write(&config_path, toml_content).unwrap();

    let config = GovernorConfig::from_file(&config_path).unwrap();

    assert_eq!(config.server.server_dir.to_str(), Some("/opt/model-server"));
    assert_eq!(config.server.entrypoint, "serve.py");
    assert_eq!(config.server.args, vec!["--model", "small"]);
    assert_eq!(config.server.port, 9100);
    assert_eq!(config.server.base_url(), "http://127.0.0.1:9100");
    assert_eq!(config.server.max_restart_attempts, 5);
    assert_eq!(
        config.server.env.get("MODEL_CACHE").map(String::as_str),
        Some("/var/cache/models")
    );
    // Unset keys keep their defaults
    assert_eq!(config.server.stop_timeout_ms, 10_000);

    assert_eq!(config.monitor.sample_interval_ms, 5000);
    assert_eq!(config.monitor.history_capacity, 50);
    assert_eq!(config.monitor.thresholds.max_memory_percent, 90.0);
    assert_eq!(config.monitor.thresholds.max_cpu_percent, 80.0);
    assert_eq!(config.monitor.thresholds.max_queue_length, 5.0);

    assert_eq!(config.governor.max_concurrent, 2);
    assert_eq!(config.governor.max_queue_size, 8);
    assert_eq!(config.governor.priority_levels, 5);
    assert_eq!(config.governor.throttle.base_delay_ms, 250);
    assert_eq!(config.governor.throttle.stress_multiplier, 2.0);
}

#[test]
fn test_load_json_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("governor.json");

    let json_content = r#"{
        "server": {
            "server_dir": "/srv/llm",
            "port": 8500,
            "args": ["--threads", "4"]
        },
        "governor": {
            "max_concurrent": 1,
            "throttle_threshold": 0.5
        }
    }"#;

    fs::write(&config_path, json_content).unwrap();

    let config = GovernorConfig::from_file(&config_path).unwrap();

    assert_eq!(config.server.server_dir.to_str(), Some("/srv/llm"));
    assert_eq!(config.server.port, 8500);
    assert_eq!(config.server.entrypoint, "main.py");
    assert_eq!(config.governor.max_concurrent, 1);
    assert_eq!(config.governor.throttle_threshold, 0.5);
    assert_eq!(config.governor.max_queue_size, 20);
    assert_eq!(config.monitor.history_capacity, 100);
}

#[test]
fn test_empty_toml_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("governor.toml");
    fs::write(&config_path, "").unwrap();

    let config = GovernorConfig::from_file(&config_path).unwrap();

    assert_eq!(config.server.port, 8001);
    assert_eq!(config.server.server_dir, temp_dir.path().join("smack-server"));
    assert_eq!(config.governor.max_concurrent, 4);
    assert_eq!(config.monitor.sample_interval_ms, 15_000);
}

#[test]
fn test_env_vars_expanded_in_args() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("governor.toml");

    std::env::set_var("INFERGOV_TEST_MODEL", "tiny-llama");

    let toml_content = r#"
        [server]
        server_dir = "/opt/model-server"
        args = ["--model", "${INFERGOV_TEST_MODEL}"]

        [server.env]
        MODEL_NAME = "$INFERGOV_TEST_MODEL"
    "#;
    fs::write(&config_path, toml_content).unwrap();

    let config = GovernorConfig::from_file(&config_path).unwrap();

    assert_eq!(config.server.args, vec!["--model", "tiny-llama"]);
    assert_eq!(
        config.server.env.get("MODEL_NAME").map(String::as_str),
        Some("tiny-llama")
    );

    std::env::remove_var("INFERGOV_TEST_MODEL");
}

#[test]
fn test_malformed_files_are_rejected() {
    let temp_dir = TempDir::new().unwrap();

    let toml_path = temp_dir.path().join("broken.toml");
    fs::write(&toml_path, "[server\nport = 1").unwrap();
    assert!(matches!(
        GovernorConfig::from_file(&toml_path),
        Err(GovernorError::InvalidConfig(_))
    ));

    let json_path = temp_dir.path().join("broken.json");
    fs::write(&json_path, "{ \"server\": ").unwrap();
    assert!(matches!(
        GovernorConfig::from_file(&json_path),
        Err(GovernorError::InvalidConfig(_))
    ));
}

#[test]
fn test_out_of_range_values_fail_validation() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("governor.toml");

    fs::write(
        &config_path,
        "[monitor.thresholds]\nmax_cpu_percent = -5.0\n",
    )
    .unwrap();

    assert!(matches!(
        GovernorConfig::from_file(&config_path),
        Err(GovernorError::ConfigValidationError(_))
    ));
}

#[test]
fn test_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let result = GovernorConfig::from_file(&temp_dir.path().join("absent.toml"));
    assert!(matches!(result, Err(GovernorError::ConfigError(_))));
}
