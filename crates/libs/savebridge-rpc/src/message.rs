use crate::error::{ErrorValue, RpcError};
use crate::method::MethodId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::any::Any;
use tokio::sync::oneshot;

/// An owned object that is moved, not copied, across a context boundary.
pub struct Transferable {
    kind: &'static str,
    value: Box<dyn Any + Send>,
}

impl Transferable {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self { kind: std::any::type_name::<T>(), value: Box::new(value) }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        let kind = self.kind;
        self.value.downcast::<T>().map(|value| *value).map_err(|value| Self { kind, value })
    }
}

impl std::fmt::Debug for Transferable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transferable").field("kind", &self.kind).finish()
    }
}

/// Params or result of a call: cloneable JSON plus a transfer list.
#[derive(Debug, Default)]
pub struct Payload {
    pub data: JsonValue,
    pub transfer: Vec<Transferable>,
}

impl Payload {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn json(data: JsonValue) -> Self {
        Self { data, transfer: Vec::new() }
    }

    pub fn encode<T: Serialize>(value: &T) -> Result<Self, RpcError> {
        serde_json::to_value(value)
            .map(Self::json)
            .map_err(|err| RpcError::Delivery(format!("could not clone value: {err}")))
    }

    pub fn with_transfer<T: Any + Send>(mut self, value: T) -> Self {
        self.transfer.push(Transferable::new(value));
        self
    }

    /// Removes the first transferable of type `T`.
    pub fn take<T: Any>(&mut self) -> Option<T> {
        let index = self.transfer.iter().position(Transferable::is::<T>)?;
        self.transfer.remove(index).downcast::<T>().ok()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        serde_json::from_value(self.data.clone())
            .map_err(|err| RpcError::Delivery(format!("could not decode payload: {err}")))
    }
}

/// Exactly one of result or error.
#[derive(Debug)]
pub enum ReplyEnvelope {
    Result(Payload),
    Error(ErrorValue),
}

pub type ReplyReceiver = oneshot::Receiver<ReplyEnvelope>;

/// Sending half of a single-use reply channel. Posting consumes it.
#[derive(Debug)]
pub struct ReplyPort {
    tx: oneshot::Sender<ReplyEnvelope>,
}

impl ReplyPort {
    pub fn post_message(self, reply: ReplyEnvelope) -> Result<(), RpcError> {
        self.tx.send(reply).map_err(|_| {
            RpcError::Delivery("reply channel closed; the call already settled".into())
        })
    }

    /// True once the caller stopped listening (settled or gave up).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Creates the private channel owned by a single call.
pub fn reply_channel() -> (ReplyPort, ReplyReceiver) {
    let (tx, rx) = oneshot::channel();
    (ReplyPort { tx }, rx)
}

#[derive(Debug)]
pub struct CallEnvelope {
    pub method: MethodId,
    pub params: Payload,
    pub reply_port: ReplyPort,
}

/// Why an inbound message was not treated as a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeRejection {
    Malformed(&'static str),
    UnknownMethod(String),
}

impl CallEnvelope {
    /// Splits into message data, transfer list and port list.
    pub fn into_wire(self) -> (JsonValue, Vec<Transferable>, Vec<ReplyPort>) {
        let data = json!({
            "method": self.method.token(),
            "params": self.params.data,
            "replyPort": 0,
        });
        (data, self.params.transfer, vec![self.reply_port])
    }

    pub fn from_wire(
        data: JsonValue,
        transfer: Vec<Transferable>,
        ports: Vec<ReplyPort>,
    ) -> Result<Self, EnvelopeRejection> {
        let JsonValue::Object(mut fields) = data else {
            return Err(EnvelopeRejection::Malformed("message is not an object"));
        };
        let Some(JsonValue::String(token)) = fields.remove("method") else {
            return Err(EnvelopeRejection::Malformed("missing method"));
        };
        let Some(params) = fields.remove("params") else {
            return Err(EnvelopeRejection::Malformed("missing params"));
        };
        let Some(port_index) = fields.get("replyPort").and_then(JsonValue::as_u64) else {
            return Err(EnvelopeRejection::Malformed("missing replyPort"));
        };
        let Some(reply_port) = usize::try_from(port_index)
            .ok()
            .and_then(|i| ports.into_iter().nth(i))
        else {
            return Err(EnvelopeRejection::Malformed("replyPort does not name a transferred port"));
        };
        let Some(method) = MethodId::from_token(&token) else {
            return Err(EnvelopeRejection::UnknownMethod(token));
        };
        Ok(Self {
            method,
            params: Payload { data: params, transfer },
            reply_port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_take_moves_the_first_matching_transferable() {
        let mut payload = Payload::json(json!({"k": 1}))
            .with_transfer(7_u32)
            .with_transfer(String::from("s"));
        assert_eq!(payload.take::<String>().as_deref(), Some("s"));
        assert_eq!(payload.take::<String>(), None);
        assert_eq!(payload.take::<u32>(), Some(7));
        assert!(payload.transfer.is_empty());
    }

    #[test]
    fn envelope_survives_wire_split() {
        let (port, _rx) = reply_channel();
        let envelope = CallEnvelope {
            method: MethodId::CallWorker,
            params: Payload::json(json!({"requestorOrigin": "https://a.example"}))
                .with_transfer(1_u8),
            reply_port: port,
        };
        let (data, transfer, ports) = envelope.into_wire();
        assert_eq!(data["method"], json!(MethodId::CallWorker.token()));

        let decoded = CallEnvelope::from_wire(data, transfer, ports).expect("valid envelope");
        assert_eq!(decoded.method, MethodId::CallWorker);
        assert_eq!(decoded.params.data["requestorOrigin"], json!("https://a.example"));
        assert_eq!(decoded.params.transfer.len(), 1);
    }

    #[test]
    fn structurally_invalid_messages_are_rejected() {
        let reject = |data: JsonValue, with_port: bool| {
            let ports = if with_port { vec![reply_channel().0] } else { Vec::new() };
            CallEnvelope::from_wire(data, Vec::new(), ports).expect_err("must reject")
        };
        assert!(matches!(reject(json!("hello"), true), EnvelopeRejection::Malformed(_)));
        assert!(matches!(
            reject(json!({"method": MethodId::Heartbeat.token(), "replyPort": 0}), true),
            EnvelopeRejection::Malformed("missing params")
        ));
        let heartbeat = json!({
            "method": MethodId::Heartbeat.token(),
            "params": null,
            "replyPort": 0,
        });
        assert!(matches!(reject(heartbeat, false), EnvelopeRejection::Malformed(_)));
        assert_eq!(
            reject(json!({"method": "other", "params": null, "replyPort": 0}), true),
            EnvelopeRejection::UnknownMethod("other".into())
        );
    }

    #[tokio::test]
    async fn reply_port_reports_a_gone_caller() {
        let (port, rx) = reply_channel();
        drop(rx);
        assert!(port.is_closed());
        let err = port.post_message(ReplyEnvelope::Result(Payload::empty())).expect_err("closed");
        assert!(matches!(err, RpcError::Delivery(_)));
    }
}
