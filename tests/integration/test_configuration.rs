use std::fs;

use tallyctl::commands::config::{init_config, validate_config};
use tallyctl::CliError;
use tallyman_recorder::{
    build_strategy, ConfigError, GroupAccountingType, MonitoringGroupSettings, RecorderConfig, ResourceType,
    StrategyKind, ThreadsInfo,
};
use tempfile::TempDir;

#[test]
fn test_file_overrides_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("recorder.toml");
    fs::write(
        &path,
        r#"
[recording]
strategy = "buffered"
group_accounting = "indirect"
default_group_resources = ["cpu_time", "memory"]

[output]
out_interval = 5
"#,
    )
    .unwrap();

    let config = RecorderConfig::from_file(&path).unwrap();
    assert_eq!(config.recording.strategy, StrategyKind::Buffered);
    assert_eq!(config.recording.group_accounting, GroupAccountingType::Indirect);
    assert_eq!(
        config.recording.default_group_resources,
        vec![ResourceType::CpuTime, ResourceType::Memory]
    );
    assert_eq!(config.recording.accountable_resources, vec![ResourceType::All]);
    assert_eq!(config.output.out_interval, 5);
    assert_eq!(config.tcp.port, 6002);
}

#[test]
fn test_saved_config_loads_back() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("recorder.toml");
    let mut config = RecorderConfig::default();
    config.recording.variant_contributions = true;
    config.recording.extra.insert("hook.sample".to_string(), "on".to_string());
    config.save_to_file(&path).unwrap();

    assert_eq!(RecorderConfig::from_file(&path).unwrap(), config);
}

#[test]
fn test_invalid_files_are_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("recorder.toml");

    fs::write(&path, "[recording]\ngroup_accounting = \"default\"\n").unwrap();
    assert!(matches!(
        RecorderConfig::from_file(&path),
        Err(ConfigError::InvalidValue { field, .. }) if field == "recording.group_accounting"
    ));

    fs::write(&path, "[recording]\naccountable_resources = []\n").unwrap();
    assert!(RecorderConfig::from_file(&path).is_err());

    fs::write(&path, "[recording\n").unwrap();
    assert!(matches!(
        RecorderConfig::from_file(&path),
        Err(ConfigError::ParseError { .. })
    ));

    assert!(matches!(
        RecorderConfig::from_file(temp_dir.path().join("missing.toml")),
        Err(ConfigError::FileNotFound { .. })
    ));
}

#[test]
fn test_tcp_strategy_needs_a_port() {
    let mut config = RecorderConfig::default();
    config.recording.strategy = StrategyKind::Tcp;
    config.tcp.port = 0;
    assert!(config.validate().is_err());

    // the port only matters when forwarding
    config.recording.strategy = StrategyKind::Default;
    assert!(config.validate().is_ok());
}

#[test]
fn test_cli_init_produces_loadable_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("recorder.toml");
    init_config(&path, false).unwrap();

    assert!(validate_config(Some(&path)).unwrap().contains("recorder.toml"));
    assert!(matches!(init_config(&path, false), Err(CliError::FileExists { .. })));
    assert_eq!(RecorderConfig::from_file(&path).unwrap(), RecorderConfig::default());
}

#[test]
fn test_built_strategy_follows_config() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = RecorderConfig::default();
    config.recording.strategy = StrategyKind::Buffered;
    config.output.out_file = Some(temp_dir.path().join("report.tsv").display().to_string());

    let strategy = build_strategy(&config).unwrap();
    strategy.register_for_recording("app.Foo", None, &MonitoringGroupSettings::with_ids(["foo"]));
    strategy.enter(Some("foo"), 0, ThreadsInfo::new(1, 10), false);
    strategy.exit(Some("foo"), 0, ThreadsInfo::new(1, 30), false);
    strategy.print_statistics(&tallyman_recorder::ProcessData::new());
    strategy.end_system().unwrap();

    let text = fs::read_to_string(temp_dir.path().join("report.tsv")).unwrap();
    assert!(text.contains("\nfoo\t"));
}
