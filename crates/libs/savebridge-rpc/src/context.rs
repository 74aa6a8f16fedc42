use crate::error::RpcError;
use crate::location::{Location, Origin};
use crate::message::{ReplyPort, Transferable};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Locks `mutex`, recovering the guard if a previous holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identity of a context; used by source filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Which origin the receiving context must have for delivery to happen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetOrigin {
    Any,
    Exact(Origin),
}

impl TargetOrigin {
    pub fn of(location: &Location) -> Self {
        Self::Exact(location.origin())
    }

    fn admits(&self, origin: &Origin) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == origin,
        }
    }
}

/// A message as observed by the receiving context.
#[derive(Debug)]
pub struct MessageEvent {
    pub data: JsonValue,
    pub transfer: Vec<Transferable>,
    pub ports: Vec<ReplyPort>,
    pub origin: Origin,
    pub source: ContextHandle,
}

#[derive(Debug)]
pub struct PostOptions {
    pub target_origin: TargetOrigin,
    pub transfer: Vec<Transferable>,
    pub ports: Vec<ReplyPort>,
}

impl PostOptions {
    pub fn new(target_origin: TargetOrigin) -> Self {
        Self { target_origin, transfer: Vec::new(), ports: Vec::new() }
    }
}

struct ContextShared {
    id: ContextId,
    location: Mutex<Location>,
    inbox: Mutex<Option<UnboundedSender<MessageEvent>>>,
}

/// Cloneable address of a context.
#[derive(Clone)]
pub struct ContextHandle {
    shared: Arc<ContextShared>,
}

impl ContextHandle {
    pub fn id(&self) -> ContextId {
        self.shared.id
    }

    pub fn location(&self) -> Location {
        lock(&self.shared.location).clone()
    }

    pub fn origin(&self) -> Origin {
        self.location().origin()
    }

    /// Loads another document into this context. Later deliveries see the new origin.
    pub fn navigate(&self, location: Location) {
        *lock(&self.shared.location) = location;
    }

    /// Tears the context down; queued and future messages are dropped.
    pub fn close(&self) {
        lock(&self.shared.inbox).take();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.inbox).as_ref().map_or(true, UnboundedSender::is_closed)
    }

    /// Delivers `data` from `source` into this context's inbox.
    ///
    /// Fails when this context's live origin is not admitted by
    /// `options.target_origin`, or when the context has been torn down.
    pub fn post_message(
        &self,
        source: &ContextHandle,
        data: JsonValue,
        options: PostOptions,
    ) -> Result<(), RpcError> {
        let actual = self.origin();
        if !options.target_origin.admits(&actual) {
            let expected = match &options.target_origin {
                TargetOrigin::Exact(origin) => origin.to_string(),
                TargetOrigin::Any => "*".to_string(),
            };
            return Err(RpcError::OriginMismatch { expected, actual: actual.to_string() });
        }

        let event = MessageEvent {
            data,
            transfer: options.transfer,
            ports: options.ports,
            origin: source.origin(),
            source: source.clone(),
        };
        let inbox = lock(&self.shared.inbox);
        let Some(sender) = inbox.as_ref() else {
            return Err(RpcError::Delivery(format!("context {} is closed", self.id())));
        };
        sender
            .send(event)
            .map_err(|_| RpcError::Delivery(format!("context {} stopped listening", self.id())))
    }
}

impl PartialEq for ContextHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ContextHandle {}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("id", &self.id())
            .field("location", &self.location().as_str())
            .finish()
    }
}

/// An execution environment: an address plus the inbox only it reads.
pub struct Context {
    handle: ContextHandle,
    inbox: UnboundedReceiver<MessageEvent>,
}

impl Context {
    pub fn new(location: Location) -> Self {
        let (tx, rx) = unbounded_channel();
        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        let shared = ContextShared {
            id,
            location: Mutex::new(location),
            inbox: Mutex::new(Some(tx)),
        };
        Self {
            handle: ContextHandle { shared: Arc::new(shared) },
            inbox: rx,
        }
    }

    pub fn handle(&self) -> &ContextHandle {
        &self.handle
    }

    pub async fn recv(&mut self) -> Option<MessageEvent> {
        self.inbox.recv().await
    }

    pub fn into_parts(self) -> (ContextHandle, UnboundedReceiver<MessageEvent>) {
        (self.handle, self.inbox)
    }
}
