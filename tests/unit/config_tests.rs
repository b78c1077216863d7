use cinder::config::GlobalConfig;

#[test]
fn minimal_config_applies_defaults() {
    let config = GlobalConfig::from_toml_str("data_dir = \"/tmp/cinder\"").unwrap();
    assert_eq!(config.bus_capacity, 256);
    assert_eq!(config.defaults.delay, 60);
    assert!(config.defaults.jitter.abs() < f64::EPSILON);
    assert_eq!(config.defaults.lost_limit, 60);
    assert!(config.filter.allow.is_empty());
    assert_eq!(config.db_path(), std::path::Path::new("/tmp/cinder/cinder.db"));
}

#[test]
fn full_config_parses() {
    let config = GlobalConfig::from_toml_str(
        r#"
data_dir = "/var/lib/cinder"
bus_capacity = 64

[defaults]
delay = 30
jitter = 0.2
lost_limit = 10

[filter]
allow = ["10.4."]
deny = ["10.4.99.1"]
"#,
    )
    .unwrap();
    assert_eq!(config.bus_capacity, 64);
    assert_eq!(config.defaults.delay, 30);
    assert_eq!(config.filter.deny, vec!["10.4.99.1".to_owned()]);

    let options = config.listener_defaults();
    assert_eq!(options.default_delay, 30);
    assert_eq!(options.default_lost_limit, 10);
}

#[test]
fn invalid_values_are_rejected() {
    assert!(GlobalConfig::from_toml_str("data_dir = \"/d\"\nbus_capacity = 0").is_err());
    assert!(GlobalConfig::from_toml_str("data_dir = \"/d\"\n[defaults]\ndelay = 0").is_err());
    assert!(GlobalConfig::from_toml_str("data_dir = \"/d\"\n[defaults]\njitter = 2.0").is_err());
    assert!(GlobalConfig::from_toml_str("not valid toml =").is_err());
}

#[test]
fn missing_data_dir_is_rejected() {
    assert!(GlobalConfig::from_toml_str("bus_capacity = 8").is_err());
}
