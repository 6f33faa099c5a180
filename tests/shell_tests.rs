//! Integration tests for the shell session manager
//!
//! These spawn real `sh` processes inside a temporary workspace root.

use std::sync::Arc;
use std::time::Duration;

use taskloop::shell::{ShellSessionManager, ShellStatus};
use taskloop::WorkspaceRoot;

fn manager() -> (ShellSessionManager, tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let root = WorkspaceRoot::new(dir.path()).unwrap();
    let root_str = root.path().to_str().unwrap().to_string();
    let manager = ShellSessionManager::new(root).with_kill_grace(Duration::from_millis(500));
    (manager, dir, root_str)
}

#[tokio::test]
async fn test_exec_wait_view() {
    let (manager, _dir, root) = manager();

    let started = manager.exec("a", &root, "echo hi").await;
    assert_eq!(started.status, ShellStatus::Success);
    assert!(started.pid.is_some());

    let waited = manager.wait("a", Some(5)).await;
    assert_eq!(waited.status, ShellStatus::Success);
    assert_eq!(waited.exit_code, Some(0));
    assert_eq!(waited.output, Some(vec!["hi".to_string()]));

    let viewed = manager.view("a").await;
    assert_eq!(viewed.status, ShellStatus::Success);
    assert_eq!(viewed.running, Some(false));
    assert_eq!(viewed.exit_code, Some(0));
    assert!(viewed.output.unwrap().contains(&"hi".to_string()));
}

#[tokio::test]
async fn test_wait_zero_times_out_and_leaves_process_running() {
    let (manager, _dir, root) = manager();

    manager.exec("sleepy", &root, "sleep 5").await;
    let waited = manager.wait("sleepy", Some(0)).await;
    assert_eq!(waited.status, ShellStatus::Timeout);
    assert_eq!(waited.running, Some(true));

    let viewed = manager.view("sleepy").await;
    assert_eq!(viewed.running, Some(true));

    manager.kill("sleepy").await;
}

#[tokio::test]
async fn test_exec_outside_root_is_rejected() {
    let (manager, _dir, _root) = manager();
    let outside = tempfile::tempdir().unwrap();

    let response = manager
        .exec("x", outside.path().to_str().unwrap(), "touch created")
        .await;
    assert_eq!(response.status, ShellStatus::Error);
    assert!(response.message.unwrap().contains("outside"));
    assert!(!outside.path().join("created").exists());
    assert!(manager.list().await.is_empty());
}

#[tokio::test]
async fn test_relative_exec_dir_is_rejected() {
    let (manager, _dir, _root) = manager();
    let response = manager.exec("x", "relative/dir", "true").await;
    assert_eq!(response.status, ShellStatus::Error);
}

#[tokio::test]
async fn test_kill_twice_never_faults() {
    let (manager, _dir, root) = manager();

    manager.exec("k", &root, "sleep 30").await;
    let first = manager.kill("k").await;
    assert_eq!(first.status, ShellStatus::Success);
    assert_eq!(first.running, Some(false));

    let second = manager.kill("k").await;
    assert_eq!(second.status, ShellStatus::Success);
    assert!(second.message.unwrap().contains("No live process"));

    let unknown = manager.kill("never-created").await;
    assert_eq!(unknown.status, ShellStatus::Success);
}

#[tokio::test]
async fn test_write_to_process() {
    let (manager, _dir, root) = manager();

    manager.exec("cat", &root, "read line; echo got $line").await;
    let written = manager.write("cat", "ping", true).await;
    assert_eq!(written.status, ShellStatus::Success);

    let waited = manager.wait("cat", Some(5)).await;
    assert_eq!(waited.exit_code, Some(0));
    assert_eq!(waited.output, Some(vec!["got ping".to_string()]));

    let after_exit = manager.write("cat", "again", true).await;
    assert_eq!(after_exit.status, ShellStatus::Error);
}

#[tokio::test]
async fn test_exec_reuse_replaces_running_process() {
    let (manager, _dir, root) = manager();

    manager.exec("r", &root, "sleep 30").await;
    let replaced = manager.exec("r", &root, "echo second").await;
    assert_eq!(replaced.status, ShellStatus::Success);

    let waited = manager.wait("r", Some(5)).await;
    assert_eq!(waited.exit_code, Some(0));
    assert_eq!(waited.output, Some(vec!["second".to_string()]));
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let (manager, _dir, root) = manager();
    let manager = Arc::new(manager);

    manager.exec("slow", &root, "sleep 30").await;
    manager.exec("fast", &root, "echo quick").await;

    // A long wait on one session must not block another
    let slow = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.wait("slow", Some(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let fast = tokio::time::timeout(Duration::from_secs(1), manager.wait("fast", Some(5)))
        .await
        .expect("wait on an independent session was blocked");
    assert_eq!(fast.exit_code, Some(0));

    assert_eq!(slow.await.unwrap().status, ShellStatus::Timeout);
    manager.shutdown().await;
    assert!(manager.list().await.iter().all(|s| !s.running));
}

#[tokio::test]
async fn test_stderr_is_merged() {
    let (manager, _dir, root) = manager();

    manager.exec("e", &root, "echo oops 1>&2; exit 3").await;
    let waited = manager.wait("e", Some(5)).await;
    assert_eq!(waited.exit_code, Some(3));
    assert_eq!(waited.output, Some(vec!["oops".to_string()]));
}

#[tokio::test]
async fn test_wait_with_huge_duration_is_clamped() {
    let (manager, _dir, root) = manager();

    manager.exec("long", &root, "sleep 1").await;
    let waited = manager.wait("long", Some(u64::MAX)).await;
    assert_eq!(waited.status, ShellStatus::Success);
    assert_eq!(waited.exit_code, Some(0));
}

#[tokio::test]
async fn test_kill_stops_background_jobs_of_exited_command() {
    let (manager, dir, root) = manager();
    let marker = dir.path().join("marker");

    manager.exec("bg", &root, "(sleep 2; touch marker) & echo started").await;
    let waited = manager.wait("bg", Some(5)).await;
    assert_eq!(waited.exit_code, Some(0));
    assert_eq!(waited.running, Some(false));

    let killed = manager.kill("bg").await;
    assert_eq!(killed.status, ShellStatus::Success);
    assert!(killed.message.unwrap().contains("terminated"));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!marker.exists());

    let again = manager.kill("bg").await;
    assert!(again.message.unwrap().contains("No live process"));
}

#[tokio::test]
async fn test_concurrent_view_and_wait_keep_buffer_intact() {
    let (manager, _dir, root) = manager();

    manager
        .exec("n", &root, "for i in 1 2 3 4 5 6; do echo line$i; sleep 0.1; done")
        .await;
    let (waited, v1, v2, v3) = tokio::join!(
        manager.wait("n", Some(5)),
        manager.view("n"),
        manager.view("n"),
        manager.view("n"),
    );
    assert_eq!(waited.exit_code, Some(0));
    for view in [v1, v2, v3] {
        assert_eq!(view.status, ShellStatus::Success);
    }

    let expected: Vec<String> = (1..=6).map(|i| format!("line{i}")).collect();
    let final_view = manager.view("n").await;
    assert_eq!(final_view.output, Some(expected));
}
