//! Streamed downloads on top of the RPC layer: byte streams, the worker's
//! staging registry and fetch hook, the helper's download service and the
//! page-side picker.

pub mod chunk;
pub mod helper;
pub mod intercept;
pub mod picker;
pub mod registry;
pub mod stream;
pub mod worker;

pub use chunk::{Blob, WriteChunk};
pub use helper::{DownloadTrigger, HelperService, HelperSettings};
pub use intercept::{FetchInterceptor, FetchOutcome};
pub use picker::{FileHandle, FilePicker, PickerFuture, SaveFilePicker};
pub use registry::{StagedResponse, StreamRegistry, DEFAULT_STREAM_TTL, STREAM_PREFIX};
pub use stream::{byte_stream, ReadableStream, StreamError, WritableStream, DEFAULT_STREAM_CAPACITY};
pub use worker::{PublishRequest, WorkerService};
