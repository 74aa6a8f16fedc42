//! One-shot readiness handshake with a helper context.
//!
//! The creating context registers a single-use `Establish` handler scoped to
//! the helper it is about to launch, then waits for the helper to announce
//! `{ready: true}` or `{ready: false, error}`. Each attempt is a small state
//! machine `Waiting -> SettledOk | SettledFail`; leaving `Waiting` always
//! deregisters the handler, and a failed or abandoned attempt also tears the
//! helper down.

use crate::caller::{CallOptions, Caller};
use crate::context::{lock, Context, ContextHandle, TargetOrigin};
use crate::endpoint::{CallOrigin, Endpoint, RegisterOptions, Registration};
use crate::error::{ErrorValue, RpcError};
use crate::location::Location;
use crate::message::Payload;
use crate::method::MethodId;
use crate::DEFAULT_HANDSHAKE_TIMEOUT;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::{oneshot, watch};

/// Params of the `Establish` announcement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorValue>,
}

impl Readiness {
    pub fn ready() -> Self {
        Self { ready: true, error: None }
    }

    pub fn failed(error: ErrorValue) -> Self {
        Self { ready: false, error: Some(error) }
    }
}

/// Creates and destroys helper contexts on behalf of an [`Establisher`].
pub trait HelperHost: Send + Sync {
    /// Starts the helper program in `context`. `parent` is the creating context,
    /// which the helper announces its readiness to.
    fn launch(&self, context: Context, parent: ContextHandle);

    fn teardown(&self, helper: &ContextHandle) {
        helper.close();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EstablishState {
    Idle,
    Waiting,
    SettledOk,
    SettledFail,
}

/// Confirms a helper context is alive, once, with bounded patience.
///
/// The handshake runs on its own task, so callers that stop waiting do not
/// abandon it half way; later calls observe the same outcome.
pub struct Establisher {
    handshake: Handshake,
    state: Arc<Mutex<EstablishState>>,
    outcome: OnceLock<watch::Receiver<Option<Result<ContextHandle, RpcError>>>>,
}

impl Establisher {
    pub fn new(endpoint: Endpoint, helper_location: Location, host: Arc<dyn HelperHost>) -> Self {
        Self {
            handshake: Handshake {
                endpoint,
                helper_location,
                host,
                timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            },
            state: Arc::new(Mutex::new(EstablishState::Idle)),
            outcome: OnceLock::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.handshake.timeout = timeout;
        self
    }

    pub fn helper_location(&self) -> &Location {
        &self.handshake.helper_location
    }

    pub fn state(&self) -> EstablishState {
        *lock(&self.state)
    }

    /// The helper handle. The first call starts the handshake; every call
    /// returns the same outcome, success or failure. Must be called inside a
    /// tokio runtime.
    pub async fn helper(&self) -> Result<ContextHandle, RpcError> {
        let mut outcome = self.outcome.get_or_init(|| self.spawn_handshake()).clone();
        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(settled) => Option::clone(&settled),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| {
            Err(RpcError::Establishment(ErrorValue::error("helper handshake was aborted")))
        })
    }

    fn spawn_handshake(&self) -> watch::Receiver<Option<Result<ContextHandle, RpcError>>> {
        let (tx, rx) = watch::channel(None);
        let handshake = self.handshake.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let outcome = handshake.run(state).await;
            tx.send_replace(Some(outcome));
        });
        rx
    }
}

#[derive(Clone)]
struct Handshake {
    endpoint: Endpoint,
    helper_location: Location,
    host: Arc<dyn HelperHost>,
    timeout: Duration,
}

impl Handshake {
    async fn run(self, state: Arc<Mutex<EstablishState>>) -> Result<ContextHandle, RpcError> {
        let current = self.endpoint.handle().clone();
        if current.location().stripped() == self.helper_location.stripped() {
            *lock(&state) = EstablishState::SettledOk;
            return Ok(current);
        }

        let context = Context::new(self.helper_location.clone());
        let helper = context.handle().clone();
        let (tx, rx) = oneshot::channel();
        let announced = Arc::new(Mutex::new(Some(tx)));
        let registration = self.endpoint.register(
            MethodId::Establish,
            move |params: Payload, origin: CallOrigin| {
                if let Some(tx) = lock(&announced).take() {
                    let _ = tx.send(readiness_outcome(&params, origin));
                }
                async { Ok(Payload::empty()) }
            },
            RegisterOptions::default().from_source(helper.id()).once(),
        );

        let mut attempt = Attempt { state, registration, helper, host: Arc::clone(&self.host) };
        attempt.enter_waiting();
        self.host.launch(context, current);

        let outcome = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(source))) => Ok(source),
            Ok(Ok(Err(error))) => Err(RpcError::Establishment(error)),
            Ok(Err(_)) => Err(RpcError::Establishment(ErrorValue::error(
                "helper announcement channel closed",
            ))),
            Err(_) => Err(RpcError::Timeout("Timed out waiting for helper to be ready.".into())),
        };
        attempt.settle(outcome)
    }
}

fn readiness_outcome(params: &Payload, origin: CallOrigin) -> Result<ContextHandle, ErrorValue> {
    match params.decode::<Readiness>() {
        Ok(Readiness { ready: true, .. }) => Ok(origin.source),
        Ok(Readiness { error, .. }) => {
            Err(error.unwrap_or_else(|| ErrorValue::error("helper reported it is not ready")))
        }
        Err(err) => Err(err.to_error_value()),
    }
}

struct Attempt {
    state: Arc<Mutex<EstablishState>>,
    registration: Registration,
    helper: ContextHandle,
    host: Arc<dyn HelperHost>,
}

impl Attempt {
    fn enter_waiting(&mut self) {
        *lock(&self.state) = EstablishState::Waiting;
    }

    fn settle(
        &mut self,
        outcome: Result<ContextHandle, RpcError>,
    ) -> Result<ContextHandle, RpcError> {
        let mut state = lock(&self.state);
        if *state != EstablishState::Waiting {
            return outcome;
        }
        self.registration.deregister();
        match &outcome {
            Ok(helper) => {
                *state = EstablishState::SettledOk;
                info!("helper {} at {} is ready", helper.id(), helper.location());
            }
            Err(err) => {
                *state = EstablishState::SettledFail;
                warn!("helper {} failed to establish: {err}", self.helper.id());
                self.host.teardown(&self.helper);
            }
        }
        outcome
    }
}

impl Drop for Attempt {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if *state == EstablishState::Waiting {
            self.registration.deregister();
            *state = EstablishState::SettledFail;
            warn!("handshake with helper {} was abandoned", self.helper.id());
            self.host.teardown(&self.helper);
        }
    }
}

/// Helper side of the handshake: tells `parent` whether setup succeeded.
pub async fn announce(
    caller: &Caller,
    parent: &ContextHandle,
    parent_origin: TargetOrigin,
    readiness: Readiness,
) -> Result<(), RpcError> {
    let params = Payload::encode(&readiness)?;
    caller.call(parent, MethodId::Establish, params, CallOptions::new(parent_origin)).await?;
    Ok(())
}
