use crate::chunk::Blob;
use crate::stream::WritableStream;
use savebridge_rpc::{
    CallOptions, Caller, Establisher, MethodId, Payload, RpcError, TargetOrigin,
    DEFAULT_CALL_TIMEOUT,
};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub type PickerFuture = Pin<Box<dyn Future<Output = Result<FileHandle, RpcError>> + Send>>;

/// A save dialog provided by the host environment itself.
pub trait SaveFilePicker: Send + Sync {
    fn show(&self, options: JsonValue) -> PickerFuture;
}

/// Handle to a file chosen for saving. Only writing is supported.
#[derive(Debug)]
pub struct FileHandle {
    writable: Option<WritableStream>,
}

impl FileHandle {
    pub fn new(writable: WritableStream) -> Self {
        Self { writable: Some(writable) }
    }

    pub fn create_writable(&mut self) -> Result<WritableStream, RpcError> {
        self.writable.take().ok_or_else(|| {
            RpcError::Validation("the writable of this handle is already in use".into())
        })
    }

    pub fn get_file(&self) -> Result<Blob, RpcError> {
        Err(RpcError::NotImplemented("getFile not available.".into()))
    }

    pub fn create_sync_access_handle(&self) -> Result<(), RpcError> {
        Err(RpcError::NotImplemented("createSyncAccessHandle not available.".into()))
    }
}

/// Page-side entry point: the native picker when there is one, otherwise the
/// helper and worker pipeline.
pub struct FilePicker {
    caller: Caller,
    establisher: Arc<Establisher>,
    helper_origin: TargetOrigin,
    call_timeout: Duration,
    native: Option<Arc<dyn SaveFilePicker>>,
}

impl FilePicker {
    pub fn new(caller: Caller, establisher: Arc<Establisher>) -> Self {
        let helper_origin = TargetOrigin::of(establisher.helper_location());
        Self {
            caller,
            establisher,
            helper_origin,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            native: None,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_native(mut self, native: Arc<dyn SaveFilePicker>) -> Self {
        self.native = Some(native);
        self
    }

    /// `options._usePolyfill` bypasses the native picker.
    pub async fn show_save_file_picker(&self, options: JsonValue) -> Result<FileHandle, RpcError> {
        if let Some(native) = &self.native {
            if !is_truthy(options.get("_usePolyfill")) {
                return native.show(options).await;
            }
        }

        let helper = self.establisher.helper().await?;
        let mut reply = self
            .caller
            .call(
                &helper,
                MethodId::CallHelper,
                Payload::json(options),
                CallOptions::new(self.helper_origin.clone()).with_timeout(self.call_timeout),
            )
            .await?;
        let writable = reply.take::<WritableStream>().ok_or_else(|| {
            RpcError::Delivery("helper reply carried no writable stream".into())
        })?;
        Ok(FileHandle::new(writable))
    }
}

fn is_truthy(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => false,
        Some(JsonValue::Bool(flag)) => *flag,
        Some(JsonValue::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Some(JsonValue::String(text)) => !text.is_empty(),
        Some(JsonValue::Array(_) | JsonValue::Object(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::byte_stream;
    use serde_json::json;

    #[test]
    fn polyfill_flag_follows_truthiness() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(is_truthy(Some(&json!(true))));
        assert!(is_truthy(Some(&json!("yes"))));
        assert!(is_truthy(Some(&json!({}))));
    }

    #[test]
    fn handle_supports_writing_only() {
        let (writable, _readable) = byte_stream(1);
        let mut handle = FileHandle::new(writable);
        assert!(matches!(handle.get_file(), Err(RpcError::NotImplemented(_))));
        assert!(matches!(handle.create_sync_access_handle(), Err(RpcError::NotImplemented(_))));
        assert!(handle.create_writable().is_ok());
        assert!(handle.create_writable().is_err());
    }
}
