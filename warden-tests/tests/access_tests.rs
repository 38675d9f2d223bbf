//! Per-execution credentials handed to children

use std::time::Duration;

use tempfile::TempDir;
use warden_daemon::config::AccessMode;
use warden_tests::{
    wait_for_running, MarkerFileHelper, TestConfigBuilder, TestServiceBuilder, TestSupervisor,
};

/// The credential a child receives resolves to its service until it stops
#[tokio::test]
async fn test_child_credential_resolves_to_service() {
    let temp_dir = TempDir::new().unwrap();
    let marker = MarkerFileHelper::new(temp_dir.path());
    let config = TestConfigBuilder::new()
        .add_service(
            "api",
            TestServiceBuilder::shell(format!(
                r#"printf '%s' "$WARDEN_ACCESS_PEM" > {}; sleep 3600"#,
                marker.marker_path("pem").display()
            ))
            .build(),
        )
        .build();
    let supervisor = TestSupervisor::new(&config);

    supervisor.orchestrator.start("api").unwrap();
    wait_for_running(&supervisor.orchestrator, "api", Duration::from_secs(5)).await.unwrap();
    let pem = marker
        .wait_for_marker_content("pem", Duration::from_secs(5))
        .await
        .expect("child should export its credential");

    let context = supervisor.key_store.lookup_pem(&pem).expect("credential registered");
    assert_eq!(context.service, "api");

    supervisor.shutdown(Duration::from_secs(10)).await;
    assert!(supervisor.key_store.lookup_pem(&pem).is_none());
}

/// Every attempt gets a fresh credential
#[tokio::test]
async fn test_restart_issues_new_credential() {
    let temp_dir = TempDir::new().unwrap();
    let marker = MarkerFileHelper::new(temp_dir.path());
    let config = TestConfigBuilder::new()
        .add_service(
            "api",
            TestServiceBuilder::shell(format!(
                r#"echo "$WARDEN_ACCESS_PEM" | sed -n 2p >> {}; sleep 3600"#,
                marker.marker_path("tokens").display()
            ))
            .build(),
        )
        .build();
    let supervisor = TestSupervisor::new(&config);

    supervisor.orchestrator.start("api").unwrap();
    assert!(marker.wait_for_marker_lines("tokens", 1, Duration::from_secs(5)).await);
    supervisor.orchestrator.restart("api").unwrap();
    assert!(marker.wait_for_marker_lines("tokens", 2, Duration::from_secs(5)).await);

    let tokens = marker.read_lines("tokens");
    assert_eq!(tokens.len(), 2);
    assert_ne!(tokens[0], tokens[1]);

    // the replaced attempt's token goes away with it
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while supervisor.key_store.len() != 1 {
        assert!(std::time::Instant::now() < deadline, "old credential never revoked");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    supervisor.shutdown(Duration::from_secs(10)).await;
    assert!(supervisor.key_store.is_empty());
}

/// access: none exports nothing and registers nothing
#[tokio::test]
async fn test_access_none() {
    let temp_dir = TempDir::new().unwrap();
    let marker = MarkerFileHelper::new(temp_dir.path());
    let config = TestConfigBuilder::new()
        .add_service(
            "batch",
            TestServiceBuilder::shell(format!(
                r#"test -z "$WARDEN_ACCESS_PEM" && {}; sleep 3600"#,
                marker.touch_script("clean")
            ))
            .with_access(AccessMode::None)
            .build(),
        )
        .build();
    let supervisor = TestSupervisor::new(&config);

    supervisor.orchestrator.start("batch").unwrap();
    assert!(marker.wait_for_marker("clean", Duration::from_secs(5)).await);
    assert!(supervisor.key_store.is_empty());

    supervisor.shutdown(Duration::from_secs(10)).await;
}
