use std::fs;

use action_test::config::RunnerConfig;
use action_test::value::Value;
use anyhow::Result;
use serde_json::json;
use tempfile::tempdir;

#[test]
fn config_file_and_constants_merge() -> Result<()> {
    let dir = tempdir()?;
    let config = dir.path().join("action-test.yaml");
    fs::write(
        &config,
        "service: user_service\ncaller:\n  command: bin/call\n  args: [\"--json\"]\nconstants:\n  admin: {id: 1, name: root}\nfixtures: [tests/fixtures]\n",
    )?;
    let extra = dir.path().join("constants.json");
    fs::write(&extra, r#"{"admin": {"name": "alice"}, "tenant": "acme"}"#)?;

    let mut cfg = RunnerConfig::discover(Some(&config))?;
    assert_eq!(cfg.service.as_deref(), Some("user_service"));
    assert_eq!(cfg.caller.args, vec!["--json".to_string()]);
    assert_eq!(cfg.caller.command, Some(dir.path().join("bin/call").display().to_string()));
    assert_eq!(cfg.fixtures, vec![dir.path().join("tests/fixtures")]);

    cfg.merge_constants_file(&extra)?;
    assert_eq!(
        cfg.constants,
        Value::from(json!({"admin": {"id": 1, "name": "alice"}, "tenant": "acme"}))
    );
    Ok(())
}

#[test]
fn broken_yaml_names_the_file() -> Result<()> {
    let dir = tempdir()?;
    let config = dir.path().join("bad.yaml");
    fs::write(&config, "service: [unterminated\n")?;
    let err = RunnerConfig::load(&config).unwrap_err();
    assert!(format!("{err:#}").contains("bad.yaml"));
    Ok(())
}
