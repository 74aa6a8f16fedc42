//! Cross-context RPC: method dispatch, call/reply correlation, timeout racing
//! and one-time helper establishment.

pub mod caller;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod establish;
pub mod heartbeat;
pub mod location;
pub mod message;
pub mod method;

use std::time::Duration;

pub use caller::{CallOptions, Caller};
pub use context::{
    lock as lock_unpoisoned, Context, ContextHandle, ContextId, MessageEvent, PostOptions,
    TargetOrigin,
};
pub use endpoint::{CallOrigin, Endpoint, Handler, HandlerFuture, RegisterOptions, Registration};
pub use error::{ErrorValue, RpcError};
pub use establish::{announce, EstablishState, Establisher, HelperHost, Readiness};
pub use heartbeat::{probe, register_heartbeat, spawn_keepalive, KeepAlive};
pub use location::{decode_uri_component, encode_uri_component, Location, Origin};
pub use message::{
    reply_channel, CallEnvelope, EnvelopeRejection, Payload, ReplyEnvelope, ReplyPort,
    ReplyReceiver, Transferable,
};
pub use method::MethodId;

pub const ONE_SECOND: Duration = Duration::from_secs(1);
pub const FIVE_SECONDS: Duration = Duration::from_secs(5);
pub const TEN_SECONDS: Duration = Duration::from_secs(10);

/// Default bound for an ordinary call.
pub const DEFAULT_CALL_TIMEOUT: Duration = FIVE_SECONDS;
/// Default bound for the helper readiness handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = TEN_SECONDS;
/// Default period between keep-alive heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = ONE_SECOND;
