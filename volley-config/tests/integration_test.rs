//! Integration tests for volley-config

use std::io::Write;
use std::time::Duration;
use temp_env::with_vars;
use volley_config::*;

#[test]
fn test_default_config_validation() {
    let config = VolleyConfig::default();
    assert!(config.validate_all().is_ok());
    assert!(config.mirror.is_none());
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("VOLLEY_LOG_LEVEL", Some("debug")),
        ("VOLLEY_SWEEP_INTERVAL", Some("30")),
        ("VOLLEY_TRACKED_HEADERS", Some("x-version, via")),
        ("VOLLEY_REGISTRY_URL", Some("http://registry:8080")),
        ("VOLLEY_CLIENT_KEY", Some("peer1")),
    ];

    with_vars(vars, || {
        let config = ConfigLoader::new().from_env().unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.http.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.results.tracked_headers, vec!["x-version", "via"]);

        let mirror = config.mirror.expect("registry url enables mirroring");
        assert_eq!(mirror.registry_url, "http://registry:8080");
        assert_eq!(mirror.client_key, "peer1");
    });
}

#[test]
fn test_config_loader_rejects_bad_env() {
    with_vars(vec![("VOLLEY_RESULT_QUEUE_CAPACITY", Some("lots"))], || {
        let result = ConfigLoader::new().from_env();
        assert!(matches!(result, Err(ConfigError::EnvError(_))));
    });
}

#[test]
fn test_yaml_config_round_trip() {
    let yaml = VolleyConfig::generate_sample();
    let parsed: VolleyConfig = serde_yaml::from_str(&yaml).unwrap();
    assert!(parsed.validate_all().is_ok());
    assert!(parsed.mirror.is_some());
}

#[test]
fn test_config_from_file() {
    let yaml = r#"
invocation:
  result_queue_capacity: 500
  backlog_warn_threshold: 100
  min_round_delay: 25

http:
  max_idle_per_host: 20
  sweep_interval: 60
  idle_sweeps_before_evict: 5

results:
  collect_all_targets: true
  tracked_headers:
    - x-upstream

logging:
  level: warn
  format: json

mirror:
  registry_url: "http://registry.local:9000"
  peer_name: "runner"
  address: "10.0.0.5:8081"
  client_key: "runner-1"
"#;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let config = ConfigLoader::with_prefix("VOLLEY_FILE_TEST")
        .from_file(file.path())
        .unwrap();

    assert_eq!(config.invocation.result_queue_capacity, 500);
    assert_eq!(config.invocation.min_round_delay, Duration::from_millis(25));
    assert_eq!(config.http.max_idle_per_host, 20);
    assert_eq!(config.http.idle_sweeps_before_evict, 5);
    assert!(config.results.collect_all_targets);
    assert!(config.results.collect_target_results);
    assert_eq!(config.logging.level, LogLevel::Warn);
    assert_eq!(config.logging.format, LogFormat::Json);

    let mirror = config.mirror.unwrap();
    assert_eq!(mirror.peer_name, "runner");
    assert_eq!(mirror.drain_timeout, Duration::from_secs(5));
}

#[test]
fn test_invalid_domain_in_file() {
    let yaml = r#"
mirror:
  registry_url: "ftp://registry"
"#;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let result = ConfigLoader::with_prefix("VOLLEY_FILE_TEST").from_file(file.path());
    assert!(matches!(result, Err(ConfigError::DomainError { .. })));
}
