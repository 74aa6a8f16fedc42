use savebridge_rpc::{
    CallOptions, Context, Endpoint, ErrorValue, Location, MethodId, Payload, RegisterOptions,
    RpcError, TargetOrigin,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn endpoint(url: &str) -> Endpoint {
    Endpoint::new(Context::new(Location::parse(url).unwrap()))
}

fn to(endpoint: &Endpoint) -> CallOptions {
    CallOptions::new(TargetOrigin::of(&endpoint.handle().location()))
}

#[tokio::test]
async fn round_trip_returns_exactly_the_handler_value() {
    let worker = endpoint("https://w.example/sw.js");
    let helper = endpoint("https://h.example/helper.html");
    worker.register(
        MethodId::CallWorker,
        |params: Payload, _| async move { Ok(Payload::json(params.data)) },
        RegisterOptions::default(),
    );

    let values = [
        json!(null),
        json!(42),
        json!("text"),
        json!({"nested": {"list": [1, 2.5, false]}, "unicode": "ü"}),
    ];
    for value in values {
        let result = helper
            .caller()
            .call(worker.handle(), MethodId::CallWorker, Payload::json(value.clone()), to(&worker))
            .await
            .unwrap();
        assert_eq!(result.data, value);
    }
}

#[tokio::test]
async fn handler_error_reaches_the_caller() {
    let worker = endpoint("https://w.example/sw.js");
    let helper = endpoint("https://h.example/helper.html");
    worker.register(
        MethodId::CallWorker,
        |_, _| async {
            Err(ErrorValue::type_error("suggestedName should be a string, or undefined"))
        },
        RegisterOptions::default(),
    );

    let err = helper
        .caller()
        .call(worker.handle(), MethodId::CallWorker, Payload::empty(), to(&worker))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RpcError::Remote(ErrorValue::type_error("suggestedName should be a string, or undefined"))
    );
}

#[tokio::test(start_paused = true)]
async fn reply_before_timeout_resolves() {
    let worker = endpoint("https://w.example/sw.js");
    let helper = endpoint("https://h.example/helper.html");
    worker.register(
        MethodId::Heartbeat,
        |_, _| async {
            tokio::time::sleep(Duration::from_secs(4)).await;
            Ok(Payload::json(json!("late but in time")))
        },
        RegisterOptions::default(),
    );

    let result = helper
        .caller()
        .call(worker.handle(), MethodId::Heartbeat, Payload::empty(), to(&worker))
        .await
        .unwrap();
    assert_eq!(result.data, json!("late but in time"));
}

#[tokio::test(start_paused = true)]
async fn timeout_wins_and_the_late_reply_is_ignored() {
    let worker = endpoint("https://w.example/sw.js");
    let helper = endpoint("https://h.example/helper.html");
    let completed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&completed);
    worker.register(
        MethodId::Heartbeat,
        move |params: Payload, _| {
            let counter = Arc::clone(&counter);
            async move {
                let delay = params.data.as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_secs(delay)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Payload::json(json!(delay)))
            }
        },
        RegisterOptions::default(),
    );

    let err = helper
        .caller()
        .call(
            worker.handle(),
            MethodId::Heartbeat,
            Payload::json(json!(3)),
            to(&worker).with_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(completed.load(Ordering::SeqCst), 1, "handler still ran to completion");

    let result = helper
        .caller()
        .call(worker.handle(), MethodId::Heartbeat, Payload::json(json!(0)), to(&worker))
        .await
        .unwrap();
    assert_eq!(result.data, json!(0));
}

#[tokio::test(start_paused = true)]
async fn disabled_timeout_waits_past_the_default() {
    let worker = endpoint("https://w.example/sw.js");
    let helper = endpoint("https://h.example/helper.html");
    worker.register(
        MethodId::CallWorker,
        |_, _| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Payload::json(json!("done")))
        },
        RegisterOptions::default(),
    );

    let result = helper
        .caller()
        .call(
            worker.handle(),
            MethodId::CallWorker,
            Payload::empty(),
            to(&worker).without_timeout(),
        )
        .await
        .unwrap();
    assert_eq!(result.data, json!("done"));
}

#[tokio::test]
async fn concurrent_calls_stay_correlated() {
    let worker = endpoint("https://w.example/sw.js");
    let helper = endpoint("https://h.example/helper.html");
    worker.register(
        MethodId::CallWorker,
        |params: Payload, _| async move {
            let n = params.data.as_u64().unwrap_or(0);
            // The first call finishes last.
            let delay = if n == 1 { 40 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(Payload::json(json!(n * 10)))
        },
        RegisterOptions::default(),
    );

    let caller = helper.caller();
    let first = caller.call(
        worker.handle(),
        MethodId::CallWorker,
        Payload::json(json!(1)),
        to(&worker),
    );
    let second = caller.call(
        worker.handle(),
        MethodId::CallWorker,
        Payload::json(json!(2)),
        to(&worker),
    );
    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.unwrap().data, json!(10));
    assert_eq!(second.unwrap().data, json!(20));
}

#[tokio::test]
async fn navigated_target_refuses_the_call() {
    let worker = endpoint("https://w.example/sw.js");
    let helper = endpoint("https://h.example/helper.html");
    let options = to(&helper);
    let elsewhere = Location::parse("https://elsewhere.example/").unwrap();
    helper.handle().navigate(elsewhere);

    let err = worker
        .caller()
        .call(helper.handle(), MethodId::CallHelper, Payload::empty(), options)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::OriginMismatch { .. }));
}

#[tokio::test]
async fn panicking_handler_surfaces_as_channel_fault() {
    let worker = endpoint("https://w.example/sw.js");
    let helper = endpoint("https://h.example/helper.html");
    worker.register(
        MethodId::CallWorker,
        |params: Payload, _| async move {
            assert!(params.data.is_null(), "handler crashed");
            Ok(Payload::empty())
        },
        RegisterOptions::default(),
    );

    let err = helper
        .caller()
        .call(
            worker.handle(),
            MethodId::CallWorker,
            Payload::json(json!("boom")),
            to(&worker).without_timeout(),
        )
        .await
        .unwrap_err();
    match err {
        RpcError::Delivery(message) => assert!(message.contains("closed before a reply")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn typed_call_reports_undecodable_results_as_delivery_faults() {
    #[derive(serde::Deserialize, Debug)]
    struct Url {
        #[allow(dead_code)]
        url: String,
    }

    let worker = endpoint("https://w.example/sw.js");
    let helper = endpoint("https://h.example/helper.html");
    worker.register(
        MethodId::CallWorker,
        |_, _| async { Ok(Payload::json(json!({"href": 1}))) },
        RegisterOptions::default(),
    );

    let err = helper
        .caller()
        .call_typed::<Value, Url>(worker.handle(), MethodId::CallWorker, &json!({}), to(&worker))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Delivery(_)));
}

#[tokio::test]
async fn transferables_move_with_the_call_and_the_result() {
    let worker = endpoint("https://w.example/sw.js");
    let helper = endpoint("https://h.example/helper.html");
    worker.register(
        MethodId::CallWorker,
        |mut params: Payload, _| async move {
            let token: Vec<u8> = params.take().unwrap_or_default();
            Ok(Payload::empty().with_transfer(token.len()))
        },
        RegisterOptions::default().transfer_result(),
    );

    let mut result = helper
        .caller()
        .call(
            worker.handle(),
            MethodId::CallWorker,
            Payload::empty().with_transfer(vec![1_u8, 2, 3]),
            to(&worker),
        )
        .await
        .unwrap();
    assert_eq!(result.take::<usize>(), Some(3));
}
