use savebridged::{Bridge, BridgeConfig};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

fn config_in(dir: &std::path::Path) -> BridgeConfig {
    BridgeConfig {
        downloads_dir: dir.join("downloads").display().to_string(),
        chunk_size: 4,
        ..BridgeConfig::default()
    }
}

#[tokio::test]
async fn saved_bytes_land_under_the_downloads_dir() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Bridge::start(config_in(dir.path())).unwrap();

    let content = b"first line\nsecond line\n";
    let report = bridge.save(Some("notes.txt"), &content[..]).await.unwrap();

    assert_eq!(report.path, dir.path().join("downloads").join("notes.txt"));
    assert_eq!(report.bytes, content.len() as u64);
    assert_eq!(std::fs::read(&report.path).unwrap(), content);
    assert_eq!(report.url.query_param("filename").as_deref(), Some("notes.txt"));
}

#[tokio::test]
async fn suggested_name_cannot_escape_the_downloads_dir() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Bridge::start(config_in(dir.path())).unwrap();

    let report = bridge.save(Some("../../escape.txt"), &b"x"[..]).await.unwrap();
    assert_eq!(report.path, dir.path().join("downloads").join("escape.txt"));
}

#[tokio::test]
async fn unnamed_save_uses_the_staged_id() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Bridge::start(config_in(dir.path())).unwrap();

    let first = bridge.save(None, &b"one"[..]).await.unwrap();
    let second = bridge.save(None, &b"two"[..]).await.unwrap();
    assert_ne!(first.path, second.path);
    assert_eq!(std::fs::read(&first.path).unwrap(), b"one");
    assert_eq!(std::fs::read(&second.path).unwrap(), b"two");
    assert_eq!(bridge.worker().registry().len(), 2);
}

struct FailingSource {
    sent: bool,
}

impl AsyncRead for FailingSource {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.sent {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "source vanished")));
        }
        self.sent = true;
        buf.put_slice(b"part");
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn failing_source_aborts_the_download() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Bridge::start(config_in(dir.path())).unwrap();

    let err = bridge.save(Some("broken.bin"), FailingSource { sent: false }).await.unwrap_err();
    assert!(format!("{err:#}").contains("source vanished"));
    assert!(!dir.path().join("downloads").join("broken.bin").exists());

    let report = bridge.save(Some("after.bin"), &b"ok"[..]).await.unwrap();
    assert_eq!(std::fs::read(report.path).unwrap(), b"ok");
}

#[tokio::test]
async fn probe_reports_the_helper_location() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Bridge::start(config_in(dir.path())).unwrap();

    let helper = bridge.probe().await.unwrap();
    assert_eq!(helper.location().as_str(), bridge.config().helper_url);
}

#[tokio::test]
async fn invalid_urls_fail_at_startup() {
    let config = BridgeConfig { worker_url: "sw.js".into(), ..BridgeConfig::default() };
    assert!(Bridge::start(config).is_err());
}
