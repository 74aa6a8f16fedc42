//! Inbound side of the protocol: a per-context handler table and the loop
//! that dispatches call envelopes into it.
//!
//! Registrations are matched in the order they were added: the first entry
//! whose method matches and whose source filter (if any) names the sending
//! context wins. Several registrations for one method are legal; they are
//! usually scoped to different senders.

use crate::caller::Caller;
use crate::context::{lock, Context, ContextHandle, ContextId, MessageEvent};
use crate::error::ErrorValue;
use crate::location::Origin;
use crate::message::{CallEnvelope, EnvelopeRejection, Payload, ReplyEnvelope, ReplyPort};
use crate::method::MethodId;
use log::debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc::UnboundedReceiver;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Payload, ErrorValue>> + Send>>;

/// Who sent the call being handled.
#[derive(Clone, Debug)]
pub struct CallOrigin {
    pub origin: Origin,
    pub source: ContextHandle,
}

pub trait Handler: Send + Sync + 'static {
    fn call(&self, params: Payload, origin: CallOrigin) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Payload, CallOrigin) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload, ErrorValue>> + Send + 'static,
{
    fn call(&self, params: Payload, origin: CallOrigin) -> HandlerFuture {
        Box::pin(self(params, origin))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegisterOptions {
    /// Only calls from this context are dispatched to the handler.
    pub source: Option<ContextId>,
    /// Deregister on first dispatch, before the handler runs.
    pub once: bool,
    /// The result's transferables are moved to the caller; the result must carry one.
    pub transfer_result: bool,
}

impl RegisterOptions {
    pub fn from_source(mut self, source: ContextId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn transfer_result(mut self) -> Self {
        self.transfer_result = true;
        self
    }
}

struct Entry {
    id: u64,
    method: MethodId,
    options: RegisterOptions,
    handler: Arc<dyn Handler>,
}

#[derive(Default)]
struct HandlerTable {
    next_id: u64,
    entries: Vec<Entry>,
}

impl HandlerTable {
    fn insert(
        &mut self,
        method: MethodId,
        options: RegisterOptions,
        handler: Arc<dyn Handler>,
    ) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.push(Entry { id, method, options, handler });
        id
    }

    fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    /// Finds the first match; a `once` entry leaves the table here.
    fn take_match(
        &mut self,
        method: MethodId,
        source: ContextId,
    ) -> Option<(Arc<dyn Handler>, bool)> {
        let index = self.entries.iter().position(|entry| {
            entry.method == method && entry.options.source.map_or(true, |wanted| wanted == source)
        })?;
        let entry = &self.entries[index];
        let matched = (Arc::clone(&entry.handler), entry.options.transfer_result);
        if entry.options.once {
            self.entries.remove(index);
        }
        Some(matched)
    }
}

/// Capability to remove one registration.
#[derive(Debug, Clone)]
pub struct Registration {
    id: u64,
    method: MethodId,
    table: Weak<Mutex<HandlerTable>>,
}

impl Registration {
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Returns false when the registration was already gone.
    pub fn deregister(&self) -> bool {
        self.table.upgrade().is_some_and(|table| lock(&table).remove(self.id))
    }

    pub fn is_active(&self) -> bool {
        self.table
            .upgrade()
            .is_some_and(|table| lock(&table).entries.iter().any(|entry| entry.id == self.id))
    }
}

/// The handler table of one context plus the loop feeding it.
#[derive(Clone)]
pub struct Endpoint {
    context: ContextHandle,
    table: Arc<Mutex<HandlerTable>>,
}

impl Endpoint {
    /// Takes over `context`'s inbox. Must be called inside a tokio runtime.
    pub fn new(context: Context) -> Self {
        let (handle, inbox) = context.into_parts();
        let table = Arc::new(Mutex::new(HandlerTable::default()));
        tokio::spawn(dispatch_loop(inbox, Arc::clone(&table)));
        Self { context: handle, table }
    }

    pub fn handle(&self) -> &ContextHandle {
        &self.context
    }

    /// A caller whose calls originate from this context.
    pub fn caller(&self) -> Caller {
        Caller::new(self.context.clone())
    }

    pub fn register<F, Fut>(
        &self,
        method: MethodId,
        handler: F,
        options: RegisterOptions,
    ) -> Registration
    where
        F: Fn(Payload, CallOrigin) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, ErrorValue>> + Send + 'static,
    {
        self.register_handler(method, handler, options)
    }

    pub fn register_handler<H: Handler>(
        &self,
        method: MethodId,
        handler: H,
        options: RegisterOptions,
    ) -> Registration {
        let id = lock(&self.table).insert(method, options, Arc::new(handler));
        Registration { id, method, table: Arc::downgrade(&self.table) }
    }

    /// Number of live registrations for `method`.
    pub fn registered(&self, method: MethodId) -> usize {
        lock(&self.table).entries.iter().filter(|entry| entry.method == method).count()
    }

    /// Tears the context down; the dispatch loop exits.
    pub fn close(&self) {
        self.context.close();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint").field("context", &self.context).finish()
    }
}

async fn dispatch_loop(
    mut inbox: UnboundedReceiver<MessageEvent>,
    table: Arc<Mutex<HandlerTable>>,
) {
    while let Some(event) = inbox.recv().await {
        if inbox.is_closed() {
            debug!("context torn down; dropping queued message from {}", event.source.id());
            break;
        }
        dispatch(&table, event);
    }
}

fn dispatch(table: &Mutex<HandlerTable>, event: MessageEvent) {
    let MessageEvent { data, transfer, ports, origin, source } = event;
    let envelope = match CallEnvelope::from_wire(data, transfer, ports) {
        Ok(envelope) => envelope,
        Err(EnvelopeRejection::Malformed(reason)) => {
            debug!("ignoring message from {}: {reason}", source.id());
            return;
        }
        Err(EnvelopeRejection::UnknownMethod(token)) => {
            debug!("dropping call from {} for unknown method token {token}", source.id());
            return;
        }
    };

    let CallEnvelope { method, params, reply_port } = envelope;
    let Some((handler, transfer_result)) = lock(table).take_match(method, source.id()) else {
        debug!("no handler for {method} from {}; dropping reply port", source.id());
        return;
    };

    let call_origin = CallOrigin { origin, source };
    tokio::spawn(async move {
        let reply = match handler.call(params, call_origin).await {
            Err(error) => ReplyEnvelope::Error(error),
            Ok(result) => match transmittable(result, transfer_result) {
                Ok(result) => ReplyEnvelope::Result(result),
                Err(error) => ReplyEnvelope::Error(error),
            },
        };
        send_reply(method, reply_port, reply);
    });
}

/// Checks the result can cross the boundary as requested. A failure here
/// replaces the successful result.
fn transmittable(result: Payload, transfer_result: bool) -> Result<Payload, ErrorValue> {
    match (transfer_result, result.transfer.first()) {
        (true, None) => Err(ErrorValue::data_clone("result is not a transferable object")),
        (false, Some(object)) => {
            Err(ErrorValue::data_clone(format!("{} could not be cloned", object.kind())))
        }
        _ => Ok(result),
    }
}

fn send_reply(method: MethodId, port: ReplyPort, reply: ReplyEnvelope) {
    if let Err(err) = port.post_message(reply) {
        debug!("reply for {method} not delivered: {err}");
    }
}
