//! Page, helper and worker contexts wired together in one process.
//!
//! Downloads land on disk: when the helper triggers a staged URL, the fetch
//! goes through the worker's interceptor and the body is written under the
//! configured directory.

use crate::config::BridgeConfig;
use anyhow::{anyhow, Context as _, Result};
use log::{debug, info, warn};
use savebridge_rpc::{Context, ContextHandle, Endpoint, Establisher, HelperHost, Location};
use savebridge_stream::{
    DownloadTrigger, FetchInterceptor, FilePicker, HelperService, HelperSettings, ReadableStream,
    StreamRegistry, WorkerService, WritableStream, DEFAULT_STREAM_CAPACITY,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub url: Location,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Fetches triggered URLs through the worker and stores the bodies in `dir`.
#[derive(Debug)]
pub struct DiskDownloads {
    interceptor: FetchInterceptor,
    dir: PathBuf,
    reports: UnboundedSender<Result<DownloadReport, String>>,
}

impl DiskDownloads {
    pub fn new(
        interceptor: FetchInterceptor,
        dir: PathBuf,
    ) -> (Self, UnboundedReceiver<Result<DownloadReport, String>>) {
        let (reports, rx) = unbounded_channel();
        let downloads = Self { interceptor, dir, reports };
        (downloads, rx)
    }
}

impl DownloadTrigger for DiskDownloads {
    fn trigger(&self, url: Location) {
        let interceptor = self.interceptor.clone();
        let dir = self.dir.clone();
        let reports = self.reports.clone();
        tokio::spawn(async move {
            let outcome = download(&interceptor, &dir, url).await.map_err(|err| format!("{err:#}"));
            if let Err(err) = &outcome {
                warn!("download failed: {err}");
            }
            let _ = reports.send(outcome);
        });
    }
}

async fn download(
    interceptor: &FetchInterceptor,
    dir: &Path,
    url: Location,
) -> Result<DownloadReport> {
    let response = interceptor
        .on_fetch(&url)
        .into_response()
        .ok_or_else(|| anyhow!("{url} is not staged by the worker"))?;
    let mut body = response
        .take_body()
        .ok_or_else(|| anyhow!("body of {url} was already consumed"))?;

    let path = dir.join(file_name_for(&url, response.suggested_filename().as_deref()));
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let mut file = tokio::fs::File::create(&path)
        .await
        .with_context(|| format!("failed to create {}", path.display()))?;

    let written = write_body(&mut body, &mut file, &path).await;
    drop(file);
    match written {
        Ok(bytes) => {
            info!("saved {bytes} bytes to {}", path.display());
            Ok(DownloadReport { url, path, bytes })
        }
        Err(err) => {
            if let Err(remove) = tokio::fs::remove_file(&path).await {
                warn!("could not remove partial download {}: {remove}", path.display());
            }
            Err(err)
        }
    }
}

async fn write_body(
    body: &mut ReadableStream,
    file: &mut tokio::fs::File,
    path: &Path,
) -> Result<u64> {
    let mut bytes = 0u64;
    while let Some(chunk) = body.read().await.context("download stream failed")? {
        file.write_all(&chunk)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        bytes += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(bytes)
}

/// The suggested name reduced to its final component, or the staged id.
fn file_name_for(url: &Location, suggested: Option<&str>) -> PathBuf {
    if let Some(name) = suggested.and_then(|name| Path::new(name).file_name()) {
        return PathBuf::from(name);
    }
    let stripped = url.stripped();
    let id = stripped.as_str().rsplit('/').next().unwrap_or("download");
    PathBuf::from(if id.is_empty() { "download" } else { id })
}

/// Launches helpers as tasks of this process.
pub struct InProcessHelperHost {
    worker: ContextHandle,
    downloads: Arc<dyn DownloadTrigger>,
    settings: HelperSettings,
}

impl InProcessHelperHost {
    pub fn new(
        worker: ContextHandle,
        downloads: Arc<dyn DownloadTrigger>,
        settings: HelperSettings,
    ) -> Self {
        Self { worker, downloads, settings }
    }
}

impl HelperHost for InProcessHelperHost {
    fn launch(&self, context: Context, parent: ContextHandle) {
        let helper = HelperService::new(
            context,
            self.worker.clone(),
            Arc::clone(&self.downloads),
            self.settings.clone(),
        );
        debug!("launched helper {} for {}", helper.handle().id(), parent.id());
        tokio::spawn(async move {
            if let Err(err) = helper.announce_to(&parent).await {
                warn!("helper {} could not announce readiness: {err}", helper.handle().id());
            }
        });
    }

    fn teardown(&self, helper: &ContextHandle) {
        debug!("tearing down helper {}", helper.id());
        helper.close();
    }
}

/// The whole pipeline as seen from the page.
pub struct Bridge {
    config: BridgeConfig,
    worker: WorkerService,
    establisher: Arc<Establisher>,
    picker: FilePicker,
    reports: Mutex<UnboundedReceiver<Result<DownloadReport, String>>>,
}

impl Bridge {
    /// Must be called inside a tokio runtime.
    pub fn start(config: BridgeConfig) -> Result<Self> {
        let worker_location = config.worker_location()?;
        let registry = StreamRegistry::with_ttl(worker_location.clone(), config.stream_ttl());
        let worker = WorkerService::new(Context::new(worker_location), registry);

        let (downloads, reports) =
            DiskDownloads::new(worker.interceptor(), config.downloads_path());
        let settings = HelperSettings {
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            heartbeat_interval: config.heartbeat_interval(),
            probe_timeout: config.call_timeout(),
        };
        let host = InProcessHelperHost::new(worker.handle().clone(), Arc::new(downloads), settings);

        let page = Endpoint::new(Context::new(config.page_location()?));
        let establisher = Arc::new(
            Establisher::new(page.clone(), config.helper_location()?, Arc::new(host))
                .with_timeout(config.handshake_timeout()),
        );
        let picker = FilePicker::new(page.caller(), Arc::clone(&establisher))
            .with_call_timeout(config.call_timeout());

        Ok(Self { config, worker, establisher, picker, reports: Mutex::new(reports) })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn worker(&self) -> &WorkerService {
        &self.worker
    }

    /// Establishes the helper if needed and returns its handle.
    pub async fn probe(&self) -> Result<ContextHandle> {
        self.establisher.helper().await.context("helper is not available")
    }

    /// Streams `source` through the pipeline into a download named after
    /// `suggested_name`. Saves run one at a time.
    pub async fn save<R>(
        &self,
        suggested_name: Option<&str>,
        mut source: R,
    ) -> Result<DownloadReport>
    where
        R: AsyncRead + Unpin,
    {
        let mut reports = self.reports.lock().await;
        // Reports left over from saves that failed on the page side.
        while let Ok(stale) = reports.try_recv() {
            debug!("discarding stale download report: {stale:?}");
        }

        let options = match suggested_name {
            Some(name) => json!({ "suggestedName": name }),
            None => json!({}),
        };
        let mut handle = self.picker.show_save_file_picker(options).await?;
        let mut writable = handle.create_writable()?;

        let copied = copy_into(&mut source, &mut writable, self.config.chunk_size).await;
        drop(writable);
        let report = reports.recv().await;
        copied?;
        match report {
            Some(Ok(report)) => Ok(report),
            Some(Err(err)) => Err(anyhow!(err)),
            None => Err(anyhow!("download target stopped before the save finished")),
        }
    }
}

async fn copy_into<R>(
    source: &mut R,
    writable: &mut WritableStream,
    chunk_size: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; chunk_size.max(1)];
    loop {
        let read = match source.read(&mut buffer).await {
            Ok(read) => read,
            Err(err) => {
                let _ = writable.abort(err.to_string()).await;
                return Err(err).context("failed to read save source");
            }
        };
        if read == 0 {
            break;
        }
        writable.write(buffer[..read].to_vec()).await?;
    }
    writable.close()?;
    Ok(())
}
