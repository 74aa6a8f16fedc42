//! The helper context: turns a page's save request into a staged download.
//!
//! On `CallHelper` the helper creates a byte stream, hands the readable end to
//! the worker for staging, starts the download of the staged URL and returns
//! the writable end to the page. A keep-alive heartbeat runs against the
//! worker until the page closes or drops the writable.

use crate::stream::{byte_stream, WritableStream, DEFAULT_STREAM_CAPACITY};
use crate::worker::PublishRequest;
use log::{info, warn};
use savebridge_rpc::{
    announce, probe, spawn_keepalive, CallOptions, CallOrigin, Caller, Context, ContextHandle,
    Endpoint, ErrorValue, Location, MethodId, Payload, Readiness, RegisterOptions, RpcError,
    TargetOrigin, DEFAULT_CALL_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL,
};
use std::sync::Arc;
use std::time::Duration;

/// Starts a download of a staged URL, the way navigating a frame would.
pub trait DownloadTrigger: Send + Sync {
    fn trigger(&self, url: Location);
}

#[derive(Clone, Debug)]
pub struct HelperSettings {
    pub stream_capacity: usize,
    pub heartbeat_interval: Duration,
    /// Bound on the readiness probe of the worker.
    pub probe_timeout: Duration,
}

impl Default for HelperSettings {
    fn default() -> Self {
        Self {
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            probe_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

#[derive(Clone)]
struct WorkerLink {
    caller: Caller,
    worker: ContextHandle,
    worker_origin: TargetOrigin,
}

impl WorkerLink {
    fn options(&self) -> CallOptions {
        CallOptions::new(self.worker_origin.clone())
    }
}

pub struct HelperService {
    endpoint: Endpoint,
    link: WorkerLink,
    settings: HelperSettings,
}

impl HelperService {
    /// Runs the helper in `context`, talking to `worker`.
    pub fn new(
        context: Context,
        worker: ContextHandle,
        download: Arc<dyn DownloadTrigger>,
        settings: HelperSettings,
    ) -> Self {
        let endpoint = Endpoint::new(context);
        let link = WorkerLink {
            caller: endpoint.caller(),
            worker_origin: TargetOrigin::of(&worker.location()),
            worker,
        };

        let handler_link = link.clone();
        let handler_settings = settings.clone();
        endpoint.register(
            MethodId::CallHelper,
            move |params: Payload, origin: CallOrigin| {
                let link = handler_link.clone();
                let settings = handler_settings.clone();
                let download = Arc::clone(&download);
                async move {
                    open_download(&link, &settings, download.as_ref(), params, origin).await
                }
            },
            RegisterOptions::default().transfer_result(),
        );
        Self { endpoint, link, settings }
    }

    pub fn handle(&self) -> &ContextHandle {
        self.endpoint.handle()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Checks the worker answers, then reports the result to `parent`.
    /// Returns what was announced.
    pub async fn announce_to(&self, parent: &ContextHandle) -> Result<Readiness, RpcError> {
        let options = self.link.options().with_timeout(self.settings.probe_timeout);
        let readiness = match probe(&self.link.caller, &self.link.worker, options).await {
            Ok(()) => Readiness::ready(),
            Err(err) => {
                warn!("worker {} did not answer the readiness probe: {err}", self.link.worker.id());
                Readiness::failed(err.to_error_value())
            }
        };
        let parent_origin = TargetOrigin::of(&parent.location());
        announce(&self.endpoint.caller(), parent, parent_origin, readiness.clone()).await?;
        Ok(readiness)
    }
}

async fn open_download(
    link: &WorkerLink,
    settings: &HelperSettings,
    download: &dyn DownloadTrigger,
    params: Payload,
    origin: CallOrigin,
) -> Result<Payload, ErrorValue> {
    let (mut writable, readable) = byte_stream(settings.stream_capacity);
    let request = PublishRequest {
        requestor_origin: origin.origin.to_string(),
        untrusted_options: params.data,
    };
    let staged = Payload::encode(&request)?.with_transfer(readable);

    // Staging waits on the worker however long it takes.
    let reply = link
        .caller
        .call(&link.worker, MethodId::CallWorker, staged, link.options().without_timeout())
        .await?;
    let url: String = reply.decode()?;
    let url = Location::parse(&url)?;

    info!("download staged for {} at {url}", origin.origin);
    download.trigger(url);
    writable.attach_keepalive(spawn_keepalive(
        link.caller.clone(),
        link.worker.clone(),
        link.worker_origin.clone(),
        settings.heartbeat_interval,
    ));
    Ok(Payload::empty().with_transfer::<WritableStream>(writable))
}
