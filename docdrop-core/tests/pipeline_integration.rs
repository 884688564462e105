use chrono::NaiveDate;
use docdrop_core::config::{AgentConfig, AgentSection, ConflictPolicy, RemoteTarget, SettleConfig};
use docdrop_core::contract::{
    ExecOutput, FixedClock, MockReachabilityProbe, MockRemoteSession, MockRemoteTransport,
    RemoteSession,
};
use docdrop_core::error::{CredentialError, SessionError};
use docdrop_core::filer::Outcome;
use docdrop_core::pipeline::{Pipeline, RunReport};
use docdrop_core::watch::{WatchEvent, WatchEventKind};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};

const REMOTE_FINAL: &str = "/srv/site/content/05OCT2025_my_notes.md";

struct Dirs {
    _root: TempDir,
    watch: PathBuf,
    processed: PathBuf,
    failed: PathBuf,
    work: PathBuf,
}

fn dirs() -> Dirs {
    let root = tempdir().unwrap();
    let watch = root.path().join("inbox");
    let processed = root.path().join("processed");
    let failed = root.path().join("failed");
    let work = root.path().join("work");
    for d in [&watch, &work] {
        fs::create_dir_all(d).unwrap();
    }
    Dirs {
        watch,
        processed,
        failed,
        work,
        _root: root,
    }
}

fn config(d: &Dirs, on_conflict: ConflictPolicy) -> Arc<AgentConfig> {
    Arc::new(AgentConfig {
        agent: AgentSection {
            watch_dir: d.watch.clone(),
            processed_dir: d.processed.clone(),
            failed_dir: d.failed.clone(),
            log_file: d.work.join("agent.log"),
            log_level: "INFO".into(),
            author: "Alex".into(),
            extension: "md".into(),
            work_dir: Some(d.work.clone()),
            settle: SettleConfig {
                delay_ms: 0,
                interval_ms: 1,
                max_checks: 2,
            },
        },
        remote: RemoteTarget {
            host: "build.local".into(),
            port: 22,
            user: "deploy".into(),
            upload_dir: "/srv/site/content/".into(),
            build_command: "/srv/site/build.sh".into(),
            private_key_path: None,
            password: Some("pw".into()),
            known_hosts: None,
            on_conflict,
            connect_timeout_secs: 5,
            command_timeout_secs: None,
        },
    })
}

fn clock() -> FixedClock {
    FixedClock(NaiveDate::from_ymd_opt(2025, 10, 5).unwrap())
}

fn probe(reachable: bool) -> MockReachabilityProbe {
    let mut probe = MockReachabilityProbe::new();
    probe
        .expect_reachable()
        .times(1)
        .returning(move |_, _, _| reachable);
    probe
}

fn write_source(d: &Dirs, name: &str, body: &str) -> PathBuf {
    let path = d.watch.join(name);
    fs::write(&path, body).unwrap();
    path
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).map(|mut it| it.next().is_none()).unwrap_or(true)
}

/// Session that accepts the upload and records the artifact content it saw.
fn upload_session(seen: Arc<Mutex<Option<String>>>) -> MockRemoteSession {
    let mut session = MockRemoteSession::new();
    session.expect_put().times(1).returning(move |local, remote| {
        assert!(remote.ends_with(".part"), "upload must go to a part file: {remote}");
        *seen.lock().unwrap() = Some(fs::read_to_string(local).unwrap());
        Ok(())
    });
    session
        .expect_rename()
        .times(1)
        .withf(|from, to| from.ends_with(".part") && to.ends_with(REMOTE_FINAL))
        .returning(|_, _| Ok(()));
    session.expect_close().times(1).returning(|| Ok(()));
    session
}

fn exec_session(exit_code: i32, stderr: &str) -> MockRemoteSession {
    let stderr = stderr.to_string();
    let mut session = MockRemoteSession::new();
    session
        .expect_exec()
        .times(1)
        .withf(|command| command.ends_with("/srv/site/build.sh"))
        .returning(move |_| {
            Ok(ExecOutput {
                exit_code,
                stdout: "built".into(),
                stderr: stderr.clone(),
            })
        });
    session.expect_close().times(1).returning(|| Ok(()));
    session
}

/// Transport that hands out the given sessions in order, one per connect.
fn transport(sessions: Vec<MockRemoteSession>) -> MockRemoteTransport {
    let count = sessions.len();
    let queue = Mutex::new(sessions.into_iter().rev().collect::<Vec<_>>());
    let mut transport = MockRemoteTransport::new();
    transport.expect_connect().times(count).returning(move |_| {
        let session = queue.lock().unwrap().pop().expect("unexpected extra connect");
        Ok(Box::new(session) as Box<dyn RemoteSession>)
    });
    transport
}

#[tokio::test]
async fn successful_run_files_into_processed_and_cleans_up() {
    let d = dirs();
    let source = write_source(&d, "my_notes.md", "# Hello\n");
    let seen = Arc::new(Mutex::new(None));
    let pipeline = Pipeline::new(
        config(&d, ConflictPolicy::Replace),
        transport(vec![upload_session(seen.clone()), exec_session(0, "")]),
        probe(true),
        clock(),
    );

    let outcome = pipeline.process(&source).await;

    assert_eq!(outcome, Outcome::Success);
    assert!(d.processed.join("my_notes.md").exists());
    assert!(!d.failed.join("my_notes.md").exists());
    assert!(!source.exists());
    assert!(is_empty_dir(&d.work), "artifact must be removed");
    assert_eq!(
        seen.lock().unwrap().as_deref(),
        Some("---\ntitle: My Notes\nauthor: Alex\ndate: 05OCT2025\n---\n\n# Hello\n")
    );
    assert_eq!(
        fs::read_to_string(d.processed.join("my_notes.md")).unwrap(),
        "# Hello\n",
        "filed original is not modified"
    );
}

#[tokio::test]
async fn unreachable_host_opens_no_session() {
    let d = dirs();
    let source = write_source(&d, "my_notes.md", "body");
    let mut transport = MockRemoteTransport::new();
    transport.expect_connect().times(0);
    let pipeline = Pipeline::new(
        config(&d, ConflictPolicy::Replace),
        transport,
        probe(false),
        clock(),
    );

    let outcome = pipeline.process(&source).await;

    assert_eq!(outcome, Outcome::PreflightFailed);
    assert!(d.failed.join("my_notes.md").exists());
    assert!(!d.processed.join("my_notes.md").exists());
    assert!(is_empty_dir(&d.work));
}

#[tokio::test]
async fn non_zero_exit_fails_even_after_successful_upload() {
    let d = dirs();
    let source = write_source(&d, "my_notes.md", "body");
    let seen = Arc::new(Mutex::new(None));
    let pipeline = Pipeline::new(
        config(&d, ConflictPolicy::Replace),
        transport(vec![upload_session(seen.clone()), exec_session(3, "boom")]),
        probe(true),
        clock(),
    );

    let outcome = pipeline.process(&source).await;

    assert_eq!(outcome, Outcome::RemoteExecFailed);
    assert!(seen.lock().unwrap().is_some(), "upload happened");
    assert!(d.failed.join("my_notes.md").exists());
    assert!(!d.processed.join("my_notes.md").exists());
    assert!(is_empty_dir(&d.work));
}

#[tokio::test]
async fn stderr_alone_is_not_a_failure() {
    let d = dirs();
    let source = write_source(&d, "my_notes.md", "body");
    let pipeline = Pipeline::new(
        config(&d, ConflictPolicy::Replace),
        transport(vec![
            upload_session(Arc::new(Mutex::new(None))),
            exec_session(0, "warning: deprecated flag"),
        ]),
        probe(true),
        clock(),
    );

    assert_eq!(pipeline.process(&source).await, Outcome::Success);
    assert!(d.processed.join("my_notes.md").exists());
}

#[tokio::test]
async fn failed_put_removes_part_file_and_skips_build() {
    let d = dirs();
    let source = write_source(&d, "my_notes.md", "body");
    let mut session = MockRemoteSession::new();
    session
        .expect_put()
        .times(1)
        .returning(|_, _| Err(SessionError::Transfer("disk full".into())));
    session
        .expect_remove()
        .times(1)
        .withf(|remote| remote.ends_with(".part"))
        .returning(|_| Ok(()));
    session.expect_rename().times(0);
    session.expect_exec().times(0);
    session.expect_close().times(1).returning(|| Ok(()));

    let pipeline = Pipeline::new(
        config(&d, ConflictPolicy::Replace),
        transport(vec![session]),
        probe(true),
        clock(),
    );

    assert_eq!(pipeline.process(&source).await, Outcome::UploadFailed);
    assert!(d.failed.join("my_notes.md").exists());
    assert!(is_empty_dir(&d.work));
}

#[tokio::test]
async fn missing_credential_surfaces_as_upload_failure() {
    let d = dirs();
    let source = write_source(&d, "my_notes.md", "body");
    let mut transport = MockRemoteTransport::new();
    transport
        .expect_connect()
        .times(1)
        .returning(|_| Err(SessionError::Credential(CredentialError::NoCredential)));
    let pipeline = Pipeline::new(
        config(&d, ConflictPolicy::Replace),
        transport,
        probe(true),
        clock(),
    );

    assert_eq!(pipeline.process(&source).await, Outcome::UploadFailed);
    assert!(d.failed.join("my_notes.md").exists());
}

#[tokio::test]
async fn reject_policy_refuses_to_overwrite_remote_file() {
    let d = dirs();
    let source = write_source(&d, "my_notes.md", "body");
    let mut session = MockRemoteSession::new();
    session
        .expect_exists()
        .times(1)
        .withf(|remote| remote.ends_with(REMOTE_FINAL))
        .returning(|_| Ok(true));
    session.expect_put().times(0);
    session.expect_close().times(1).returning(|| Ok(()));

    let pipeline = Pipeline::new(
        config(&d, ConflictPolicy::Reject),
        transport(vec![session]),
        probe(true),
        clock(),
    );

    assert_eq!(pipeline.process(&source).await, Outcome::UploadFailed);
    assert!(d.failed.join("my_notes.md").exists());
}

#[tokio::test]
async fn failed_rename_removes_part_file_and_skips_build() {
    let d = dirs();
    let source = write_source(&d, "my_notes.md", "body");
    let part = Arc::new(Mutex::new(None::<String>));
    let mut session = MockRemoteSession::new();
    let written = part.clone();
    session.expect_put().times(1).returning(move |_, remote| {
        *written.lock().unwrap() = Some(remote.to_string());
        Ok(())
    });
    session
        .expect_rename()
        .times(1)
        .returning(|_, _| Err(SessionError::Transfer("permission denied".into())));
    let removed = part.clone();
    session
        .expect_remove()
        .times(1)
        .withf(move |remote| {
            removed
                .lock()
                .unwrap()
                .as_deref()
                .is_some_and(|part| remote.ends_with(part))
        })
        .returning(|_| Ok(()));
    session.expect_exec().times(0);
    session.expect_close().times(1).returning(|| Ok(()));

    let pipeline = Pipeline::new(
        config(&d, ConflictPolicy::Replace),
        transport(vec![session]),
        probe(true),
        clock(),
    );

    assert_eq!(pipeline.process(&source).await, Outcome::UploadFailed);
    assert!(d.failed.join("my_notes.md").exists());
    assert!(!d.processed.join("my_notes.md").exists());
    assert!(is_empty_dir(&d.work));
}

#[tokio::test]
async fn exec_transport_error_still_closes_session() {
    let d = dirs();
    let source = write_source(&d, "my_notes.md", "body");
    let mut exec = MockRemoteSession::new();
    exec.expect_exec()
        .times(1)
        .returning(|_| Err(SessionError::Exec("channel closed".into())));
    exec.expect_close().times(1).returning(|| Ok(()));

    let pipeline = Pipeline::new(
        config(&d, ConflictPolicy::Replace),
        transport(vec![upload_session(Arc::new(Mutex::new(None))), exec]),
        probe(true),
        clock(),
    );

    assert_eq!(pipeline.process(&source).await, Outcome::RemoteExecFailed);
    assert!(d.failed.join("my_notes.md").exists());
    assert!(is_empty_dir(&d.work));
}

#[tokio::test]
async fn exists_error_under_reject_policy_fails_upload_and_closes() {
    let d = dirs();
    let source = write_source(&d, "my_notes.md", "body");
    let mut session = MockRemoteSession::new();
    session
        .expect_exists()
        .times(1)
        .returning(|_| Err(SessionError::Transfer("stat failed".into())));
    session.expect_put().times(0);
    session.expect_rename().times(0);
    session.expect_exec().times(0);
    session.expect_close().times(1).returning(|| Ok(()));

    let pipeline = Pipeline::new(
        config(&d, ConflictPolicy::Reject),
        transport(vec![session]),
        probe(true),
        clock(),
    );

    assert_eq!(pipeline.process(&source).await, Outcome::UploadFailed);
    assert!(d.failed.join("my_notes.md").exists());
    assert!(is_empty_dir(&d.work));
}

#[tokio::test]
async fn unwritable_work_dir_is_transform_failure() {
    let d = dirs();
    let source = write_source(&d, "my_notes.md", "body");
    let mut cfg = (*config(&d, ConflictPolicy::Replace)).clone();
    cfg.agent.work_dir = Some(d.work.join("does/not/exist"));
    let mut probe = MockReachabilityProbe::new();
    probe.expect_reachable().times(0);
    let mut transport = MockRemoteTransport::new();
    transport.expect_connect().times(0);

    let pipeline = Pipeline::new(Arc::new(cfg), transport, probe, clock());

    assert_eq!(pipeline.process(&source).await, Outcome::TransformFailed);
    assert!(d.failed.join("my_notes.md").exists());
    assert!(!source.exists());
}

#[tokio::test]
async fn run_until_processes_candidates_and_ignores_the_rest() {
    let d = dirs();
    let good = write_source(&d, "my_notes.md", "body");
    let other = write_source(&d, "notes.txt", "ignored");
    let folder = d.watch.join("folder.md");
    fs::create_dir_all(&folder).unwrap();

    let pipeline = Pipeline::new(
        config(&d, ConflictPolicy::Replace),
        transport(vec![
            upload_session(Arc::new(Mutex::new(None))),
            exec_session(0, ""),
        ]),
        probe(true),
        clock(),
    );

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    tx.send(WatchEvent::created(&other)).await.unwrap();
    tx.send(WatchEvent {
        path: folder.clone(),
        kind: WatchEventKind::DirectoryCreated,
    })
    .await
    .unwrap();
    tx.send(WatchEvent::created(d.watch.join("vanished.md")))
        .await
        .unwrap();
    tx.send(WatchEvent::created(&good)).await.unwrap();
    drop(tx);

    let report = pipeline.run_until(rx, std::future::pending()).await;

    assert_eq!(
        report,
        RunReport {
            processed: 1,
            failed: 0
        }
    );
    assert!(d.processed.join("my_notes.md").exists());
    assert!(other.exists(), "non-matching files stay put");
    assert!(folder.is_dir());
}

#[tokio::test]
async fn run_until_stops_on_shutdown() {
    let d = dirs();
    let mut transport = MockRemoteTransport::new();
    transport.expect_connect().times(0);
    let pipeline = Pipeline::new(
        config(&d, ConflictPolicy::Replace),
        transport,
        MockReachabilityProbe::new(),
        clock(),
    );

    let (_tx, rx) = tokio::sync::mpsc::channel(1);
    let report = pipeline.run_until(rx, async {}).await;

    assert_eq!(report, RunReport::default());
}
