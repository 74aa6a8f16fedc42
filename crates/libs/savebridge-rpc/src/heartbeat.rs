use crate::caller::{CallOptions, Caller};
use crate::context::{ContextHandle, TargetOrigin};
use crate::endpoint::{Endpoint, RegisterOptions, Registration};
use crate::error::RpcError;
use crate::message::Payload;
use crate::method::MethodId;
use log::debug;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Registers the no-op handler that answers liveness probes.
pub fn register_heartbeat(endpoint: &Endpoint) -> Registration {
    endpoint.register(
        MethodId::Heartbeat,
        |_, _| async { Ok(Payload::empty()) },
        RegisterOptions::default(),
    )
}

/// One ordinary round trip to `target`; success proves it is responsive.
pub async fn probe(
    caller: &Caller,
    target: &ContextHandle,
    options: CallOptions,
) -> Result<(), RpcError> {
    caller.call(target, MethodId::Heartbeat, Payload::empty(), options).await.map(|_| ())
}

/// Periodic heartbeats that keep a worker busy while a stream is open.
/// Stops when dropped.
#[derive(Debug)]
pub struct KeepAlive {
    task: JoinHandle<()>,
}

impl KeepAlive {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Sends a heartbeat to `target` every `interval`, without a call timeout,
/// until the returned guard is dropped or the target stops answering.
pub fn spawn_keepalive(
    caller: Caller,
    target: ContextHandle,
    target_origin: TargetOrigin,
    interval: Duration,
) -> KeepAlive {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let options = CallOptions::new(target_origin.clone()).without_timeout();
            if let Err(err) = probe(&caller, &target, options).await {
                debug!("keep-alive to {} ended: {err}", target.id());
                return;
            }
        }
    });
    KeepAlive { task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::location::Location;

    fn endpoint(url: &str) -> Endpoint {
        Endpoint::new(Context::new(Location::parse(url).expect("location")))
    }

    #[tokio::test]
    async fn probe_succeeds_against_a_heartbeat_handler() {
        let worker = endpoint("https://w.example/sw.js");
        let helper = endpoint("https://h.example/helper.html");
        register_heartbeat(&worker);

        let options = CallOptions::new(TargetOrigin::of(&worker.handle().location()));
        probe(&helper.caller(), worker.handle(), options).await.expect("worker answers");
    }

    #[tokio::test]
    async fn probe_fails_fast_without_a_handler() {
        let worker = endpoint("https://w.example/sw.js");
        let helper = endpoint("https://h.example/helper.html");

        let err = probe(&helper.caller(), worker.handle(), CallOptions::new(TargetOrigin::Any))
            .await
            .expect_err("nobody answers heartbeats");
        assert!(matches!(err, RpcError::Delivery(_)));
    }

    #[tokio::test]
    async fn keepalive_ends_when_the_target_closes() {
        let worker = endpoint("https://w.example/sw.js");
        let helper = endpoint("https://h.example/helper.html");
        register_heartbeat(&worker);

        let keepalive = spawn_keepalive(
            helper.caller(),
            worker.handle().clone(),
            TargetOrigin::Any,
            Duration::from_millis(5),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!keepalive.is_finished());

        worker.close();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !keepalive.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("keep-alive stops once the worker is gone");
    }
}
