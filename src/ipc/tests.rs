//! Tests for the IPC drop directory primitives and watcher

use super::*;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn write(path: &Path, contents: impl AsRef<[u8]>) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

#[tokio::test]
async fn test_read_valid_command_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cmd.json");
    write(&path, r#"{"type":"message","text":"hi"}"#);

    let value = read_ipc_json_file(&path, "group-a").await;
    assert_eq!(value, Some(json!({"type": "message", "text": "hi"})));
}

#[tokio::test]
async fn test_read_accepts_any_json_value() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("list.json");
    write(&path, "[1, 2, 3]");

    assert_eq!(read_ipc_json_file(&path, "g").await, Some(json!([1, 2, 3])));
}

#[cfg(unix)]
#[tokio::test]
async fn test_read_rejects_symlink() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("secret.json");
    write(&target, r#"{"stolen":true}"#);
    let link = dir.path().join("link.json");
    std::os::unix::fs::symlink(&target, &link).unwrap();

    assert_eq!(read_ipc_json_file(&link, "g").await, None);
    assert!(matches!(
        try_read_ipc_json_file(&link).await,
        Err(IngressError::NotRegularFile(_))
    ));
}

#[tokio::test]
async fn test_read_rejects_directory() {
    let dir = TempDir::new().unwrap();
    let sub = dir.path().join("nested.json");
    std::fs::create_dir(&sub).unwrap();

    assert!(matches!(
        try_read_ipc_json_file(&sub).await,
        Err(IngressError::NotRegularFile(_))
    ));
}

#[tokio::test]
async fn test_read_size_limit_is_inclusive() {
    let dir = TempDir::new().unwrap();

    // A JSON string of exactly the limit: quotes plus filler
    let at_limit = dir.path().join("at_limit.json");
    let filler = "a".repeat(IPC_MAX_FILE_SIZE as usize - 2);
    write(&at_limit, format!("\"{filler}\""));
    assert!(read_ipc_json_file(&at_limit, "g").await.is_some());

    let over = dir.path().join("over.json");
    write(&over, format!("\"{filler}a\""));
    match try_read_ipc_json_file(&over).await {
        Err(IngressError::TooLarge { size, limit, .. }) => {
            assert_eq!(size, IPC_MAX_FILE_SIZE + 1);
            assert_eq!(limit, IPC_MAX_FILE_SIZE);
        }
        other => panic!("expected TooLarge, got {other:?}"),
    }
    assert_eq!(read_ipc_json_file(&over, "g").await, None);
}

#[tokio::test]
async fn test_read_failures_map_to_error_kinds() {
    let dir = TempDir::new().unwrap();

    let missing = dir.path().join("missing.json");
    assert!(matches!(
        try_read_ipc_json_file(&missing).await,
        Err(IngressError::Metadata { .. })
    ));

    let broken = dir.path().join("broken.json");
    write(&broken, "{not json");
    assert!(matches!(
        try_read_ipc_json_file(&broken).await,
        Err(IngressError::Json { .. })
    ));

    let binary = dir.path().join("binary.json");
    write(&binary, [b'"', 0xff, 0xfe, b'"']);
    assert!(matches!(
        try_read_ipc_json_file(&binary).await,
        Err(IngressError::Utf8 { .. })
    ));

    let empty = dir.path().join("empty.json");
    write(&empty, "");
    assert!(matches!(
        try_read_ipc_json_file(&empty).await,
        Err(IngressError::Json { .. })
    ));
    assert_eq!(read_ipc_json_file(&empty, "g").await, None);
}

#[tokio::test]
async fn test_list_missing_directory_is_empty() {
    let dir = TempDir::new().unwrap();
    assert!(list_ipc_json_files(&dir.path().join("nope")).await.is_empty());
}

#[tokio::test]
async fn test_list_keeps_only_regular_json_files() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("b.json"), "{}");
    write(&dir.path().join("a.json"), "{}");
    write(&dir.path().join("notes.txt"), "{}");
    write(&dir.path().join("partial.json.tmp"), "{}");
    std::fs::create_dir(dir.path().join("folder.json")).unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink(dir.path().join("a.json"), dir.path().join("link.json")).unwrap();

    assert_eq!(
        list_ipc_json_files(dir.path()).await,
        vec!["a.json".to_string(), "b.json".to_string()]
    );
}

#[test]
fn test_quarantine_moves_file_unchanged() {
    let dir = TempDir::new().unwrap();
    let base = dir.path();
    let source = base.join("team").join("tasks").join("job.json");
    write(&source, "{broken");

    let destination = quarantine_file(&source, "team", "job.json", base).unwrap();

    assert_eq!(destination, base.join("errors").join("team-job.json"));
    assert!(!source.exists());
    assert_eq!(std::fs::read_to_string(&destination).unwrap(), "{broken");
}

#[test]
fn test_quarantine_missing_source_is_an_error() {
    let dir = TempDir::new().unwrap();
    let result = quarantine_file(&dir.path().join("gone.json"), "g", "gone.json", dir.path());
    assert!(matches!(result, Err(QuarantineError::Rename { .. })));
}

#[test]
fn test_consume_removes_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("done.json");
    write(&path, "{}");

    consume_file(&path).unwrap();
    assert!(!path.exists());
    assert!(matches!(consume_file(&path), Err(QuarantineError::Remove { .. })));
}

/// Records every command and rejects those whose type is "reject"
#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<IpcCommand>>,
}

#[async_trait]
impl CommandHandler for RecordingHandler {
    async fn handle(&self, command: &IpcCommand) -> Result<()> {
        self.seen.lock().unwrap().push(command.clone());
        if command.command_type() == Some("reject") {
            anyhow::bail!("unsupported command");
        }
        Ok(())
    }
}

fn watcher(base: &Path, handler: Arc<RecordingHandler>) -> IpcWatcher {
    IpcWatcher::new(
        WatcherConfig {
            base_dir: base.to_path_buf(),
            poll_interval: Duration::from_millis(20),
            main_group: "main".to_string(),
        },
        handler,
    )
}

#[tokio::test]
async fn test_watcher_consumes_and_quarantines() {
    let dir = TempDir::new().unwrap();
    let base = dir.path();
    write(&base.join("main/messages/001.json"), r#"{"type":"message","text":"hi"}"#);
    write(&base.join("team/tasks/002.json"), r#"{"type":"reject"}"#);
    write(&base.join("team/tasks/003.json"), "{truncated");

    let handler = Arc::new(RecordingHandler::default());
    let report = watcher(base, Arc::clone(&handler)).process_once().await.unwrap();

    assert_eq!(
        report,
        ScanReport {
            groups: 2,
            discovered: 3,
            validated: 2,
            consumed: 1,
            quarantined: 2,
        }
    );
    assert!(!base.join("main/messages/001.json").exists());
    assert!(base.join("errors/team-002.json").exists());
    assert!(base.join("errors/team-003.json").exists());

    let seen = handler.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].source_group, "main");
    assert_eq!(seen[0].channel, IpcChannel::Messages);
    assert!(seen[0].is_main);
    assert_eq!(seen[1].source_group, "team");
    assert_eq!(seen[1].channel, IpcChannel::Tasks);
    assert!(!seen[1].is_main);
}

#[tokio::test]
async fn test_watcher_never_scans_errors_directory() {
    let dir = TempDir::new().unwrap();
    let base = dir.path();
    write(&base.join("errors/messages/old.json"), r#"{"type":"message"}"#);

    let handler = Arc::new(RecordingHandler::default());
    let report = watcher(base, Arc::clone(&handler)).process_once().await.unwrap();

    assert_eq!(report.groups, 0);
    assert!(handler.seen.lock().unwrap().is_empty());
    assert!(base.join("errors/messages/old.json").exists());
}

#[tokio::test]
async fn test_watcher_missing_base_directory_is_empty_pass() {
    let dir = TempDir::new().unwrap();
    let handler = Arc::new(RecordingHandler::default());
    let report = watcher(&dir.path().join("absent"), handler)
        .process_once()
        .await
        .unwrap();
    assert_eq!(report, ScanReport::default());
}

#[tokio::test]
async fn test_watcher_run_stops_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("ipc");
    let handler = Arc::new(RecordingHandler::default());
    let watcher = watcher(&base, Arc::clone(&handler));

    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let writer = {
        let base = base.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            // Write then rename so a scan never sees a half-written file
            let staged = base.join("late/messages/1.json.tmp");
            write(&staged, r#"{"type":"message"}"#);
            std::fs::rename(&staged, base.join("late/messages/1.json")).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = stop.send(());
        }
    };

    let (result, ()) = tokio::join!(
        watcher.run(async {
            let _ = stopped.await;
        }),
        writer
    );

    result.unwrap();
    assert!(base.is_dir());
    assert_eq!(handler.seen.lock().unwrap().len(), 1);
    assert!(!base.join("late/messages/1.json").exists());
}
