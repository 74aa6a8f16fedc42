use crate::intercept::{FetchInterceptor, FetchOutcome};
use crate::registry::StreamRegistry;
use crate::stream::ReadableStream;
use savebridge_rpc::{
    register_heartbeat, CallOrigin, Context, ContextHandle, Endpoint, ErrorValue, Location,
    MethodId, Payload, RegisterOptions,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

/// Params of `CallWorker`. The readable stream travels in the transfer list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub requestor_origin: String,
    #[serde(default)]
    pub untrusted_options: JsonValue,
}

/// The worker context: stages streams for download and serves them on fetch.
#[derive(Clone, Debug)]
pub struct WorkerService {
    endpoint: Endpoint,
    registry: StreamRegistry,
}

impl WorkerService {
    pub fn new(context: Context, registry: StreamRegistry) -> Self {
        let endpoint = Endpoint::new(context);
        let publisher = registry.clone();
        endpoint.register(
            MethodId::CallWorker,
            move |params: Payload, origin: CallOrigin| {
                let outcome = publish(&publisher, params, &origin);
                async move { outcome }
            },
            RegisterOptions::default(),
        );
        register_heartbeat(&endpoint);
        Self { endpoint, registry }
    }

    pub fn handle(&self) -> &ContextHandle {
        self.endpoint.handle()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn interceptor(&self) -> FetchInterceptor {
        FetchInterceptor::new(self.registry.clone())
    }

    pub fn on_fetch(&self, request_url: &Location) -> FetchOutcome {
        self.interceptor().on_fetch(request_url)
    }
}

fn publish(
    registry: &StreamRegistry,
    mut params: Payload,
    origin: &CallOrigin,
) -> Result<Payload, ErrorValue> {
    let request: PublishRequest = params.decode().map_err(|err| {
        ErrorValue::type_error(format!("invalid CallWorker params from {}: {err}", origin.origin))
    })?;
    let readable = params
        .take::<ReadableStream>()
        .ok_or_else(|| ErrorValue::type_error("a readable stream must be transferred"))?;
    let url = registry
        .publish(readable, &request.requestor_origin, &request.untrusted_options)
        .map_err(|err| err.to_error_value())?;
    Ok(Payload::json(json!(url.as_str())))
}
