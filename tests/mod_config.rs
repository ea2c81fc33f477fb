use docgate::errors::{ConfigError, ErrorKind};
use docgate::orchestrator::BreakerFeedback;
use docgate::GatewayConfig;
use std::io::Write;
use std::time::Duration;

#[test]
fn test_defaults() {
    let cfg = GatewayConfig::default();
    assert!(cfg.cache.enabled);
    assert_eq!(cfg.cache.max_size, 1000);
    assert_eq!(cfg.cache.default_ttl, Duration::from_secs(300));
    assert_eq!(cfg.rate_limit.rps, 10.0);
    assert_eq!(cfg.rate_limit.burst, 20);
    assert_eq!(cfg.rate_limit.circuit_breaker.failure_threshold, 5);
    assert_eq!(cfg.rate_limit.circuit_breaker.recovery_timeout, Duration::from_secs(60));
    assert_eq!(cfg.rate_limit.circuit_breaker.half_open_max_calls, 3);
    assert_eq!(cfg.retry.max_retries, 3);
    assert!(!cfg.adaptive.enabled);
    assert_eq!(cfg.breaker_feedback, BreakerFeedback::InfrastructureOnly);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_load_partial_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
breaker_feedback = "all_failures"

[cache]
max_size = 64
item_ttl_ms = 1500

[rate_limit.circuit_breaker]
failure_threshold = 2
recovery_timeout_ms = 250

[retry]
max_retries = 1
retryable_kinds = ["network", "api"]

[adaptive]
enabled = true
min_rps = 2.0
max_rps = 8.0
"#
    )
    .unwrap();

    let cfg = GatewayConfig::load(file.path()).unwrap();
    assert_eq!(cfg.cache.max_size, 64);
    assert_eq!(cfg.cache.item_ttl, Duration::from_millis(1500));
    assert_eq!(cfg.cache.search_ttl, Duration::from_secs(120));
    assert_eq!(cfg.rate_limit.circuit_breaker.failure_threshold, 2);
    assert_eq!(cfg.rate_limit.circuit_breaker.recovery_timeout, Duration::from_millis(250));
    assert_eq!(cfg.rate_limit.rps, 10.0);
    assert_eq!(cfg.retry.max_retries, 1);
    assert!(cfg.retry.is_retryable_kind(ErrorKind::UpstreamApi));
    assert!(!cfg.retry.is_retryable_kind(ErrorKind::Timeout));
    assert!(cfg.adaptive.enabled);
    assert_eq!(cfg.breaker_feedback, BreakerFeedback::AllFailures);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = GatewayConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let err = GatewayConfig::from_toml_str("[cache\nmax_size = 1").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_validation_rules() {
    let cases = [
        "[cache]\nmax_size = 0",
        "[retry]\nbackoff_multiplier = 0.5",
        "[retry]\ninitial_delay_ms = 5000\nmax_delay_ms = 100",
        "[adaptive]\nmin_rps = 10.0\nmax_rps = 5.0",
    ];
    for input in cases {
        let err = GatewayConfig::from_toml_str(input).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{input}");
    }
}

#[test]
fn test_round_trip_through_toml() {
    let cfg = GatewayConfig::default();
    let text = toml::to_string(&cfg).unwrap();
    assert!(text.contains("default_ttl_ms = 300000"));
    assert_eq!(GatewayConfig::from_toml_str(&text).unwrap(), cfg);
}
