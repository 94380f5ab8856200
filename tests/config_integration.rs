use assistant_stream_client::config::AppConfig;
use serial_test::serial;
use std::env;
use std::fs;
use std::time::Duration;

const ARGS: [&str; 1] = ["assistant-chat"];

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    // SAFETY: every test touching the environment is #[serial].
    unsafe {
        env::remove_var("ASSISTANT_API__BASE_URL");
        env::remove_var("ASSISTANT_STREAM__URL");
        env::remove_var("ASSISTANT_STREAM__REPLY_TIMEOUT_SECS");
        env::remove_var("ASSISTANT_STREAM__END_OF_TURN_MARKER");
        env::remove_var("CONFIG_FILE");
        env::remove_var("API_URL");
        env::remove_var("WS_URL");
    }
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = AppConfig::load_from_args(ARGS).expect("Failed to load config");
    assert_eq!(config.api.base_url, "http://localhost:8000");
    assert_eq!(config.stream.url, "ws://localhost:8000");
    assert_eq!(config.stream.end_of_turn_marker, "[DONE]");

    let settings = config.stream.session_settings();
    assert_eq!(settings.connect_timeout, Some(Duration::from_secs(10)));
    assert_eq!(settings.reply_timeout, None);
    assert_eq!(settings.event_capacity, 256);
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    // SAFETY: serial test.
    unsafe {
        env::set_var("ASSISTANT_STREAM__URL", "wss://chat.example.com");
        env::set_var("ASSISTANT_STREAM__REPLY_TIMEOUT_SECS", "30");
    }

    let config = AppConfig::load_from_args(ARGS).expect("Failed to load config");
    assert_eq!(config.stream.url, "wss://chat.example.com");
    assert_eq!(
        config.stream.session_settings().reply_timeout,
        Some(Duration::from_secs(30))
    );

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = dir.path().join("assistant.yaml");
    fs::write(
        &file_path,
        r#"
api:
  base_url: "https://api.example.com"
stream:
  end_of_turn_marker: ""
  connect_timeout_secs: 0
"#,
    )
    .expect("Failed to write temp config");

    // SAFETY: serial test.
    unsafe {
        env::set_var("CONFIG_FILE", &file_path);
    }

    let config = AppConfig::load_from_args(ARGS).expect("Failed to load config from file");
    assert_eq!(config.api.base_url, "https://api.example.com");
    // Keys missing from the file keep their defaults.
    assert_eq!(config.stream.url, "ws://localhost:8000");

    let settings = config.stream.session_settings();
    assert_eq!(settings.end_of_turn_marker, None);
    assert_eq!(settings.connect_timeout, None);

    clear_env_vars();
}

#[test]
#[serial]
fn test_env_beats_file_and_cli_beats_env() {
    clear_env_vars();

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = dir.path().join("assistant.yaml");
    fs::write(&file_path, "api:\n  base_url: \"http://from-file:8000\"\n")
        .expect("Failed to write temp config");

    // SAFETY: serial test.
    unsafe {
        env::set_var("ASSISTANT_API__BASE_URL", "http://from-env:8000");
    }

    let path = file_path.to_string_lossy().into_owned();
    let config = AppConfig::load_from_args(["assistant-chat", "--config", path.as_str()])
        .expect("Failed to load config");
    assert_eq!(config.api.base_url, "http://from-env:8000");

    let config = AppConfig::load_from_args([
        "assistant-chat",
        "--config",
        path.as_str(),
        "--api-url",
        "http://from-cli:8000",
    ])
    .expect("Failed to load config");
    assert_eq!(config.api.base_url, "http://from-cli:8000");

    clear_env_vars();
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::write(
        dir.path().join("config.yaml"),
        "stream:\n  url: \"ws://from-cwd:9000\"\n",
    )
    .expect("Failed to write ./config.yaml");

    let original = env::current_dir().expect("No current dir");
    env::set_current_dir(dir.path()).expect("Failed to enter temp dir");
    let config = AppConfig::load_from_args(ARGS);
    env::set_current_dir(original).expect("Failed to restore current dir");

    assert_eq!(config.expect("Failed to load config").stream.url, "ws://from-cwd:9000");
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env_vars();
    assert!(AppConfig::load_from_args(["assistant-chat", "--config", "/nonexistent/assistant.yaml"]).is_err());
}
