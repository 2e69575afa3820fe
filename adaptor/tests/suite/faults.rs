use assert_matches::assert_matches;
use houdini_adaptor::AdaptorError;
use houdini_adaptor::AdaptorState;
use houdini_adaptor::HoudiniAdaptor;
use houdini_adaptor::RenderFault;
use houdini_adaptor::telemetry::RecordKind;
use houdini_adaptor_client::ClientError;
use houdini_adaptor_test_support::FakeHoudini;
use houdini_adaptor_test_support::RecordingReporter;
use houdini_adaptor_test_support::ScriptedHost;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn houdini_exiting_mid_render_is_reported_with_its_exit_code() {
    let fake = FakeHoudini::client_driven(7).expect("fake houdini");
    let client = fake.attach_client(ScriptedHost::new().failing_on(3));
    let mut adaptor =
        HoudiniAdaptor::with_reporter(fake.init_data(), fake.config(), RecordingReporter::new());
    adaptor.on_start().expect("on_start");

    assert_matches!(
        adaptor.on_run(json!({"frame": 3})),
        Err(AdaptorError::UnexpectedExit { exit_code: 7 })
    );
    assert!(!adaptor.session().is_rendering());

    let error = adaptor
        .telemetry()
        .records()
        .into_iter()
        .find(|record| record.kind == RecordKind::Error)
        .expect("error record");
    assert_eq!(error.details["exit_code"], json!(7));
    assert_eq!(error.details["exception_scope"], json!("on_run"));
    assert_eq!(error.details["exception_type"], json!("UnexpectedExit"));

    assert_matches!(
        adaptor.on_run(json!({"frame": 4})),
        Err(AdaptorError::NotRunning)
    );

    adaptor.on_cleanup();
    assert_eq!(adaptor.state(), AdaptorState::CleanedUp);
    assert_matches!(
        client.join().expect("client thread"),
        Err(ClientError::Host { action, .. }) if action == "start_render"
    );
}

#[test]
fn strict_error_checking_fails_the_task_on_an_error_line() {
    let fake = FakeHoudini::client_driven(0).expect("fake houdini");
    let host = ScriptedHost::new().with_render_output(&["Error: out of memory"]);
    let client = fake.attach_client(host);
    let mut init_data = fake.init_data();
    init_data["strict_error_checking"] = json!(true);
    let reporter = RecordingReporter::new();
    let mut adaptor = HoudiniAdaptor::with_reporter(init_data, fake.config(), reporter.clone());
    adaptor.on_start().expect("on_start");

    let err = adaptor.on_run(json!({"frame": 1})).expect_err("error line");
    assert_matches!(
        err,
        AdaptorError::Render(RenderFault::ErrorLine { ref line }) if line == "Error: out of memory"
    );
    assert_eq!(
        err.to_string(),
        "Houdini Encountered an Error: Error: out of memory"
    );
    // The completion line printed after the error was ignored.
    assert!(!reporter.progress().contains(&100.0));

    adaptor.on_cleanup();
    assert_eq!(adaptor.state(), AdaptorState::CleanedUp);
    assert!(!adaptor.houdini_is_running());
    let host = client
        .join()
        .expect("client thread")
        .expect("client session");
    assert!(host.exited());
}

#[test]
fn error_lines_are_ignored_without_strict_checking() {
    let fake = FakeHoudini::client_driven(0).expect("fake houdini");
    let host = ScriptedHost::new().with_render_output(&["Error: out of memory"]);
    let client = fake.attach_client(host);
    let mut adaptor =
        HoudiniAdaptor::with_reporter(fake.init_data(), fake.config(), RecordingReporter::new());
    adaptor.on_start().expect("on_start");

    adaptor.on_run(json!({"frame": 1})).expect("frame 1");
    adaptor.on_stop();
    adaptor.on_cleanup();
    client
        .join()
        .expect("client thread")
        .expect("client session");
}

#[test]
fn license_failure_reports_free_disk_space() {
    let fake = FakeHoudini::client_driven(0).expect("fake houdini");
    let host = ScriptedHost::new()
        .with_render_output(&["RuntimeError: Error encountered when initializing Houdini"]);
    let client = fake.attach_client(host);
    let mut adaptor =
        HoudiniAdaptor::with_reporter(fake.init_data(), fake.config(), RecordingReporter::new());
    adaptor.on_start().expect("on_start");

    let err = adaptor.on_run(json!({"frame": 1})).expect_err("license error");
    assert_matches!(
        err,
        AdaptorError::Render(RenderFault::License { ref line, .. })
            if line == "RuntimeError: Error encountered when initializing Houdini"
    );
    assert!(err.to_string().contains("Free disc space: "));

    adaptor.on_cleanup();
    client
        .join()
        .expect("client thread")
        .expect("client session");
}
