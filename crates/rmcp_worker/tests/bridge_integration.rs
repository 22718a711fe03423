//! Worker bridge integration tests.
//!
//! Uses /bin/sh as a stand-in runtime so no R installation is needed: the
//! "scripts" are shell scripts receiving `<script> <args.json> <result.json>`
//! exactly like the real runtime.

#![cfg(unix)]

use rmcp_worker::{CancelToken, WorkerBridge, WorkerConfig, WorkerEnv, WorkerError};
use std::path::Path;
use std::time::{Duration, Instant};

fn write_script(dir: &Path, id: &str, body: &str) {
    std::fs::write(dir.join(format!("{}.R", id)), body).unwrap();
}

fn bridge(scripts: &Path, work_root: &Path) -> WorkerBridge {
    WorkerBridge::new(WorkerConfig {
        program: "/bin/sh".to_string(),
        leading_args: vec![],
        scripts_dir: scripts.to_path_buf(),
        max_concurrent: 2,
        exec_timeout: Duration::from_secs(5),
        queue_timeout: Duration::from_secs(5),
        grace_period: Duration::from_millis(200),
        stderr_tail_bytes: 4096,
        work_root: Some(work_root.to_path_buf()),
    })
}

fn leftover_temp_dirs(work_root: &Path) -> usize {
    std::fs::read_dir(work_root)
        .map(|entries| entries.filter_map(|e| e.ok()).count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_success_roundtrip_strips_formatting() {
    let scripts = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_script(
        scripts.path(),
        "descriptive_stats",
        r##"printf '{"mean": 4.5, "n": 10, "_formatting": "# Stats\n\nmean = 4.5"}' > "$2""##,
    );

    let bridge = bridge(scripts.path(), work.path());
    let output = bridge
        .run_script(
            "descriptive_stats",
            &serde_json::json!({ "column": "mpg" }),
            WorkerEnv::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.result["mean"], 4.5);
    assert_eq!(output.result.get("_formatting"), None);
    assert_eq!(output.formatting.as_deref(), Some("# Stats\n\nmean = 4.5"));
    assert_eq!(leftover_temp_dirs(work.path()), 0);
}

#[tokio::test]
async fn test_args_file_carries_env_block() {
    let scripts = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    // Echo the args document back as the result.
    write_script(scripts.path(), "echo_args", r#"cat "$1" > "$2""#);

    let bridge = bridge(scripts.path(), work.path());
    let output = bridge
        .run_script(
            "echo_args",
            &serde_json::json!({ "x": 1 }),
            WorkerEnv {
                log_level: "debug".to_string(),
                output_path: None,
            },
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.result["x"], 1);
    assert_eq!(output.result["_env"]["abi"], 1);
    assert_eq!(output.result["_env"]["log_level"], "debug");
}

#[tokio::test]
async fn test_nonzero_exit_surfaces_code_and_stderr() {
    let scripts = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_script(
        scripts.path(),
        "crash",
        "echo 'Error in lm.fit: singular matrix' >&2\nexit 3",
    );

    let bridge = bridge(scripts.path(), work.path());
    let err = bridge
        .run_script(
            "crash",
            &serde_json::json!({}),
            WorkerEnv::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        WorkerError::ExecutionFailed { code, stderr_tail } => {
            assert_eq!(code, Some(3));
            assert!(stderr_tail.contains("singular matrix"));
        }
        other => panic!("expected ExecutionFailed, got {:?}", other),
    }
    assert_eq!(leftover_temp_dirs(work.path()), 0);
}

#[tokio::test]
async fn test_garbage_result_is_protocol_error() {
    let scripts = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_script(scripts.path(), "garbage", r#"printf 'not json' > "$2""#);

    let bridge = bridge(scripts.path(), work.path());
    let err = bridge
        .run_script(
            "garbage",
            &serde_json::json!({}),
            WorkerEnv::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::ProtocolError { .. }));
    assert_eq!(err.to_server_error().kind.code(), -32011);
}

#[tokio::test]
async fn test_deadline_kills_worker_and_cleans_up() {
    let scripts = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_script(scripts.path(), "sleepy", "sleep 30");

    let bridge = WorkerBridge::new(WorkerConfig {
        program: "/bin/sh".to_string(),
        leading_args: vec![],
        scripts_dir: scripts.path().to_path_buf(),
        max_concurrent: 2,
        exec_timeout: Duration::from_millis(300),
        queue_timeout: Duration::from_secs(5),
        grace_period: Duration::from_millis(100),
        stderr_tail_bytes: 4096,
        work_root: Some(work.path().to_path_buf()),
    });

    let start = Instant::now();
    let err = bridge
        .run_script(
            "sleepy",
            &serde_json::json!({}),
            WorkerEnv::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::Timeout { .. }));
    assert!(start.elapsed() < Duration::from_millis(1500));
    assert_eq!(err.to_server_error().kind.code(), -32012);
    assert_eq!(leftover_temp_dirs(work.path()), 0);
}

#[tokio::test]
async fn test_cancel_token_reaps_worker() {
    let scripts = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_script(scripts.path(), "sleepy", "sleep 30");

    let bridge = bridge(scripts.path(), work.path());
    let cancel = CancelToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let err = bridge
        .run_script("sleepy", &serde_json::json!({}), WorkerEnv::default(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(err.to_server_error().kind.code(), -32800);
    assert_eq!(leftover_temp_dirs(work.path()), 0);
}

#[tokio::test]
async fn test_queue_timeout_when_all_slots_busy() {
    let scripts = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_script(scripts.path(), "sleepy", "sleep 5");
    write_script(scripts.path(), "quick", r#"printf '{}' > "$2""#);

    let bridge = WorkerBridge::new(WorkerConfig {
        program: "/bin/sh".to_string(),
        leading_args: vec![],
        scripts_dir: scripts.path().to_path_buf(),
        max_concurrent: 1,
        exec_timeout: Duration::from_secs(10),
        queue_timeout: Duration::from_millis(200),
        grace_period: Duration::from_millis(100),
        stderr_tail_bytes: 4096,
        work_root: Some(work.path().to_path_buf()),
    });

    let occupant = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            let _ = bridge
                .run_script(
                    "sleepy",
                    &serde_json::json!({}),
                    WorkerEnv::default(),
                    &CancelToken::new(),
                )
                .await;
        })
    };

    // Give the occupant time to take the only slot.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = bridge
        .run_script(
            "quick",
            &serde_json::json!({}),
            WorkerEnv::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::QueueTimeout { .. }));
    assert_eq!(err.to_server_error().kind.code(), -32012);

    occupant.abort();
}

#[tokio::test]
async fn test_unknown_script_rejected_before_spawn() {
    let scripts = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();

    let bridge = bridge(scripts.path(), work.path());
    let err = bridge
        .run_script(
            "no_such_script",
            &serde_json::json!({}),
            WorkerEnv::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::UnknownScript { .. }));

    // Path separators never reach the filesystem.
    let err = bridge
        .run_script(
            "../etc/passwd",
            &serde_json::json!({}),
            WorkerEnv::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::UnknownScript { .. }));
}
