//! Integration tests for logging helpers

use bridge_traits::time::LogLevel;
use core_runtime::logging::{
    redact_if_sensitive, redact_uri, strip_path, LogFormat, LoggingConfig,
};

#[test]
fn test_config_builder() {
    // Logging can be initialized once per process, so only the builder is
    // exercised here.
    let config = LoggingConfig::default()
        .with_format(LogFormat::Json)
        .with_level(LogLevel::Debug)
        .with_redaction(true)
        .with_spans(true);

    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, LogLevel::Debug);
    assert!(config.redact_sensitive);
    assert!(config.enable_spans);
    assert!(config.logger_sink.is_none());
}

#[test]
fn test_key_material_is_redacted() {
    assert_eq!(redact_if_sensitive("cipher_key", "00ff00ff"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("passphrase", "hunter2"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("Authorization", "Bearer x"), "[REDACTED]");
}

#[test]
fn test_signed_urls_lose_query() {
    assert_eq!(
        redact_if_sensitive("source_uri", "https://cdn.example.com/a.mp3?X-Sig=abc"),
        "https://cdn.example.com/a.mp3"
    );
    assert_eq!(
        redact_uri("https://cdn.example.com/a.mp3#t=30"),
        "https://cdn.example.com/a.mp3"
    );
    assert_eq!(redact_uri("relative/path.mp3"), "relative/path.mp3");
}

#[test]
fn test_ordinary_fields_pass_through() {
    assert_eq!(redact_if_sensitive("offset", "4096"), "4096");
    assert_eq!(redact_if_sensitive("span_id", "17"), "17");
}

#[test]
fn test_path_stripping() {
    assert_eq!(
        strip_path("/home/ana/.cache/media-cache/spans/ab12/0.3.span"),
        "0.3.span"
    );
    assert_eq!(strip_path("C:\\Users\\Ana\\cache\\index.json"), "index.json");
    assert_eq!(strip_path("index.json"), "index.json");
    assert_eq!(strip_path("/var/cache/"), "");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_format_default_follows_build_profile() {
    #[cfg(debug_assertions)]
    assert_eq!(LoggingConfig::default().format, LogFormat::Pretty);

    #[cfg(not(debug_assertions))]
    assert_eq!(LoggingConfig::default().format, LogFormat::Json);
}

#[test]
fn test_filter_and_display_options() {
    let config = LoggingConfig::default()
        .with_filter("core_playback=trace,bridge_desktop=debug")
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_redaction(false)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(
        config.filter.as_deref(),
        Some("core_playback=trace,bridge_desktop=debug")
    );
    assert_eq!(config.format, LogFormat::Compact);
    assert!(!config.redact_sensitive);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
}
