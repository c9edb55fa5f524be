//! End-to-end sync runs against a mock backup API.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wabackup::pipeline::select_backups;
use wabackup::{
    FailureKind, PipelineConfig, RunStatus, SchedulerConfig, Session, SyncPipeline,
    TransferOutcome,
};

// MD5 of one thousand 'B' bytes, as hex and as the API's base64 form.
const BODY_MD5: &str = "912485fe921b64abf79d3839057f7f36";
const BODY_MD5_B64: &str = "kSSF/pIbZKv3nTg5BX9/Ng==";

fn body() -> Vec<u8> {
    vec![b'B'; 1000]
}

fn config(server: &MockServer, root: &std::path::Path, max_retries: u32) -> PipelineConfig {
    PipelineConfig {
        backup_root: root.to_path_buf(),
        api_base: server.uri(),
        scheduler: SchedulerConfig {
            concurrency: 4,
            max_retries,
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(20),
            smallest_first: false,
        },
        attempt_timeout: Duration::from_secs(5),
        only: None,
        list_attempts: 2,
        list_backoff: Duration::from_millis(10),
    }
}

fn file_json(name: &str) -> serde_json::Value {
    json!({
        "name": format!("clients/wa/backups/1658/files/{}", name),
        "sizeBytes": "1000",
        "md5Hash": BODY_MD5_B64,
    })
}

async fn mount_listing(server: &MockServer, names: &[&str]) {
    Mock::given(method("GET"))
        .and(path("/clients/wa/backups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "backups": [{
                "name": "clients/wa/backups/1658",
                "sizeBytes": "1000",
                "updateTime": "2024-01-01T00:00:00Z",
                "metadata": "{\"numOfMessages\": 7}",
            }]
        })))
        .mount(server)
        .await;

    let files: Vec<_> = names.iter().map(|n| file_json(n)).collect();
    Mock::given(method("GET"))
        .and(path("/clients/wa/backups/1658/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": files })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn fresh_sync_materializes_and_verifies_every_file() {
    let server = MockServer::start().await;
    let names = [
        "Databases/msgstore.db.crypt15",
        "Media/WhatsApp Images/IMG-0001.jpg",
        "gdrive_file_map",
    ];
    mount_listing(&server, &names).await;
    for name in names {
        // The client requests spaces percent-encoded.
        let encoded = name.replace(' ', "%20");
        Mock::given(method("GET"))
            .and(path(format!("/clients/wa/backups/1658/files/{}", encoded)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body()))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let pipeline = SyncPipeline::new(Session::with_token("tok"), config(&server, dir.path(), 1));

    let backups = pipeline.backups().await.unwrap();
    let selected = select_backups(&backups, Some("1658")).unwrap();
    assert_eq!(selected[0].metadata.as_ref().unwrap().num_of_messages, 7);

    let report = pipeline
        .sync(selected[0], CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(report.status(), RunStatus::Success);
    assert_eq!(report.completed_count(), 3);
    assert_eq!(report.bytes_fetched(), 3000);
    for name in names {
        let local = dir.path().join("1658/files").join(name);
        assert_eq!(std::fs::read(&local).unwrap(), body());
    }

    let manifest = std::fs::read_to_string(dir.path().join("md5sum.txt")).unwrap();
    assert_eq!(manifest.lines().count(), 3);
    for line in manifest.lines() {
        assert!(line.starts_with(&format!("{} *1658/files/", BODY_MD5)));
    }
}

#[tokio::test]
async fn interrupted_run_resumes_from_flushed_offset() {
    let server = MockServer::start().await;
    mount_listing(&server, &["Media/clip.mp4"]).await;
    // The stream dies at byte 600 of 1000; no retries this run.
    Mock::given(method("GET"))
        .and(path("/clients/wa/backups/1658/files/Media/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'B'; 600]))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let pipeline = SyncPipeline::new(Session::with_token("tok"), config(&server, dir.path(), 0));
    let backup = pipeline.backups().await.unwrap().remove(0);

    let report = pipeline
        .sync(&backup, CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(report.status(), RunStatus::PartialFailure);
    assert!(matches!(
        report.outcomes()[0].outcome,
        TransferOutcome::Failed(FailureKind::Transient { .. })
    ));
    let local = dir.path().join("1658/files/Media/clip.mp4");
    assert_eq!(std::fs::metadata(&local).unwrap().len(), 600);

    // Next run asks only for the missing tail.
    server.reset().await;
    mount_listing(&server, &["Media/clip.mp4"]).await;
    Mock::given(method("GET"))
        .and(path("/clients/wa/backups/1658/files/Media/clip.mp4"))
        .and(header("range", "bytes=600-"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![b'B'; 400]))
        .expect(1)
        .mount(&server)
        .await;

    let report = pipeline
        .sync(&backup, CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(report.status(), RunStatus::Success);
    assert_eq!(report.bytes_fetched(), 400);
    assert_eq!(std::fs::read(&local).unwrap(), body());
}

#[tokio::test]
async fn second_sync_is_idempotent() {
    let server = MockServer::start().await;
    mount_listing(&server, &["Media/clip.mp4"]).await;
    Mock::given(method("GET"))
        .and(path("/clients/wa/backups/1658/files/Media/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let pipeline = SyncPipeline::new(Session::with_token("tok"), config(&server, dir.path(), 1));
    let backup = pipeline.backups().await.unwrap().remove(0);

    let first = pipeline
        .sync(&backup, CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(first.completed_count(), 1);

    let second = pipeline
        .sync(&backup, CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(second.status(), RunStatus::Success);
    assert_eq!(second.already_complete_count(), 1);
    assert_eq!(second.bytes_fetched(), 0);
}

#[tokio::test]
async fn concurrent_entries_land_in_their_own_files() {
    let server = MockServer::start().await;
    let names: Vec<String> = (0..12).map(|i| format!("Media/IMG-{:04}.jpg", i)).collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    mount_listing(&server, &name_refs).await;
    for name in &names {
        Mock::given(method("GET"))
            .and(path(format!("/clients/wa/backups/1658/files/{}", name)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body()))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let pipeline = SyncPipeline::new(Session::with_token("tok"), config(&server, dir.path(), 1));
    let backup = pipeline.backups().await.unwrap().remove(0);

    let report = pipeline
        .sync(&backup, CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(report.status(), RunStatus::Success);
    assert_eq!(report.completed_count(), 12);
    for name in &names {
        let local = dir.path().join("1658/files").join(name);
        assert_eq!(std::fs::read(&local).unwrap(), body(), "file {}", name);
    }
}

#[tokio::test]
async fn cancelled_run_keeps_progress_and_reports_cancelled() {
    let server = MockServer::start().await;
    mount_listing(&server, &["Media/clip.mp4"]).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let pipeline = SyncPipeline::new(Session::with_token("tok"), config(&server, dir.path(), 1));
    let backup = pipeline.backups().await.unwrap().remove(0);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = pipeline.sync(&backup, cancel, None).await.unwrap();

    assert_eq!(report.status(), RunStatus::PartialFailure);
    assert_eq!(
        report.outcomes()[0].outcome,
        TransferOutcome::Failed(FailureKind::Cancelled)
    );
}

#[tokio::test]
async fn mismatched_download_is_reported_and_truncated() {
    let server = MockServer::start().await;
    mount_listing(&server, &["Media/clip.mp4"]).await;
    // Right length, wrong bytes.
    Mock::given(method("GET"))
        .and(path("/clients/wa/backups/1658/files/Media/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'C'; 1000]))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let pipeline = SyncPipeline::new(Session::with_token("tok"), config(&server, dir.path(), 1));
    let backup = pipeline.backups().await.unwrap().remove(0);

    let report = pipeline
        .sync(&backup, CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(report.status(), RunStatus::PartialFailure);
    assert!(matches!(
        report.outcomes()[0].outcome,
        TransferOutcome::Failed(FailureKind::ChecksumMismatch { .. })
    ));
    let local = dir.path().join("1658/files/Media/clip.mp4");
    assert_eq!(std::fs::metadata(&local).unwrap().len(), 0);
    // The failed entry never appears in the checksum manifest.
    let manifest = std::fs::read_to_string(dir.path().join("md5sum.txt")).unwrap();
    assert!(manifest.is_empty());
}

// select_backups is exercised through the module tests; keep one check
// of the public surface here.
#[tokio::test]
async fn unknown_backup_id_is_an_error() {
    let server = MockServer::start().await;
    mount_listing(&server, &[]).await;

    let dir = TempDir::new().unwrap();
    let pipeline = SyncPipeline::new(Session::with_token("tok"), config(&server, dir.path(), 1));
    let backups = pipeline.backups().await.unwrap();
    assert!(select_backups(&backups, Some("nope")).is_err());
}

#[tokio::test]
async fn progress_events_cover_every_entry() {
    let server = MockServer::start().await;
    let names = ["Media/a.jpg", "Media/b.jpg"];
    mount_listing(&server, &names).await;
    for name in names {
        Mock::given(method("GET"))
            .and(path(format!("/clients/wa/backups/1658/files/{}", name)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body()))
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let pipeline = SyncPipeline::new(Session::with_token("tok"), config(&server, dir.path(), 1));
    let backup = pipeline.backups().await.unwrap().remove(0);

    let resolved = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&resolved);
    let callback: wabackup::ProgressCallback = Arc::new(move |event| {
        if let wabackup::ProgressEvent::Resolved { .. } = event {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    });

    pipeline
        .sync(&backup, CancellationToken::new(), Some(callback))
        .await
        .unwrap();
    assert_eq!(resolved.load(std::sync::atomic::Ordering::SeqCst), 2);
}
