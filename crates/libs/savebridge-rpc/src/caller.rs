use crate::context::{ContextHandle, PostOptions, TargetOrigin};
use crate::error::RpcError;
use crate::message::{reply_channel, CallEnvelope, Payload, ReplyEnvelope};
use crate::method::MethodId;
use crate::DEFAULT_CALL_TIMEOUT;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallOptions {
    pub target_origin: TargetOrigin,
    /// `None` disables the timer; the call then waits for a reply or a channel fault.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn new(target_origin: TargetOrigin) -> Self {
        Self { target_origin, timeout: Some(DEFAULT_CALL_TIMEOUT) }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }
}

/// Issues calls on behalf of one source context.
#[derive(Clone, Debug)]
pub struct Caller {
    source: ContextHandle,
}

impl Caller {
    pub fn new(source: ContextHandle) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &ContextHandle {
        &self.source
    }

    /// Calls `method` on `target` and settles exactly once: with the reply,
    /// with a reply channel fault, or with a timeout, whichever comes first.
    pub async fn call(
        &self,
        target: &ContextHandle,
        method: MethodId,
        params: Payload,
        options: CallOptions,
    ) -> Result<Payload, RpcError> {
        let (reply_port, reply) = reply_channel();
        let envelope = CallEnvelope { method, params, reply_port };
        let (data, transfer, ports) = envelope.into_wire();
        let post = PostOptions { target_origin: options.target_origin, transfer, ports };
        target.post_message(&self.source, data, post)?;

        let settled = async move {
            match reply.await {
                Ok(ReplyEnvelope::Result(result)) => Ok(result),
                Ok(ReplyEnvelope::Error(error)) => Err(RpcError::Remote(error)),
                Err(_) => Err(RpcError::Delivery(format!(
                    "reply channel for {method} closed before a reply arrived"
                ))),
            }
        };

        let Some(limit) = options.timeout else {
            return settled.await;
        };
        match tokio::time::timeout(limit, settled).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!("{method} call to {} timed out after {limit:?}", target.id());
                Err(RpcError::Timeout("Timed out waiting for RPC call.".into()))
            }
        }
    }

    /// [`Caller::call`] with JSON params and a decoded result. A result that
    /// does not decode is a delivery fault.
    pub async fn call_typed<P, R>(
        &self,
        target: &ContextHandle,
        method: MethodId,
        params: &P,
        options: CallOptions,
    ) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = Payload::encode(params)?;
        self.call(target, method, params, options).await?.decode()
    }
}
