use assert_cmd::Command;
use houdini_adaptor_test_support::FakeHoudini;
use houdini_adaptor_test_support::ScriptedHost;
use predicates::str::contains;
use serde_json::Value;
use serde_json::json;

#[test]
fn version_info_prints_json() -> Result<(), Box<dyn std::error::Error>> {
    let output = Command::cargo_bin("houdini-adaptor")?
        .arg("version-info")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let info: Value = serde_json::from_slice(&output)?;
    assert_eq!(info["integration_data_interface_version"], json!("0.2"));
    assert_eq!(info["adaptor_version"], json!(env!("CARGO_PKG_VERSION")));
    Ok(())
}

#[test]
fn invalid_init_data_exits_with_failure() -> Result<(), Box<dyn std::error::Error>> {
    Command::cargo_bin("houdini-adaptor")?
        .args(["run", "--init-data", r#"{"scene_file": "/tmp/scene.hip"}"#])
        .env_remove("RUST_LOG")
        .assert()
        .failure()
        .code(1)
        .stderr(contains("render_node"));
    Ok(())
}

#[test]
fn run_renders_frames_with_a_config_file() -> Result<(), Box<dyn std::error::Error>> {
    let fake = FakeHoudini::client_driven(0)?;
    let client = fake.attach_client(ScriptedHost::new());
    let config = fake.dir().join("adaptor.toml");
    std::fs::write(
        &config,
        format!(
            "executable = \"/bin/sh\"\n\
             client_script = \"{}\"\n\
             log_level = \"debug\"\n\
             \n\
             [timeouts]\n\
             houdini_start = 20\n\
             houdini_end = 10\n\
             \n\
             [poll]\n\
             action_drain = 10\n\
             render = 10\n\
             shutdown = 10\n",
            fake.script().display()
        ),
    )?;
    let run_data = fake.dir().join("run.json");
    std::fs::write(&run_data, r#"{"frame": 2}"#)?;

    Command::cargo_bin("houdini-adaptor")?
        .arg("run")
        .arg("--init-data")
        .arg(fake.init_data().to_string())
        .arg("--run-data")
        .arg(r#"{"frame": 1}"#)
        .arg("--run-data")
        .arg(format!("file://{}", run_data.display()))
        .arg("--config")
        .arg(&config)
        .arg("--path-mapping-rules")
        .arg(r#"[{"source_path": "/projects", "destination_path": "/mnt/projects"}]"#)
        .env_remove("RUST_LOG")
        .assert()
        .success()
        .stdout(contains("openjd_status: Initializing Houdini"))
        .stdout(contains("openjd_progress: 50.0"))
        .stdout(contains("openjd_progress: 100.0"));

    let host = client.join().map_err(|_| "client thread panicked")??;
    assert_eq!(host.rendered(), [1, 2]);
    assert_eq!(
        fake.pathmap().as_deref(),
        Some("{'/projects': '/mnt/projects'}")
    );
    Ok(())
}
