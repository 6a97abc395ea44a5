//! Discovery pipeline integration tests.
//!
//! Runs the whole client-side pipeline together: a manually driven
//! instancer feeding an endpointer, a balancer over its cache, and retry on
//! top, while the instance set churns underneath.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshkit_core::{Context, Endpoint, EndpointError};
use meshkit_discovery::{
    factory_fn, retry, simple_factory, Balancer, Closer, Endpointer, Factory, MemoryRegistry,
    Registrar, Registration, RetryConfig, RoundRobin, SubjectInstancer, TtlRegistrar,
};

/// Factory whose endpoints answer with their instance name; "bad*" instances
/// always fail. Per-instance call counts are shared with the test body.
fn echo_factory(calls: Arc<Mutex<HashMap<String, u32>>>) -> Factory<(), String> {
    simple_factory(move |instance| {
        let instance = instance.to_string();
        let calls = Arc::clone(&calls);
        Ok(Endpoint::new(move |_ctx, _req| {
            let instance = instance.clone();
            let calls = Arc::clone(&calls);
            async move {
                *calls.lock().unwrap().entry(instance.clone()).or_insert(0) += 1;
                if instance.starts_with("bad") {
                    Err(EndpointError::Transport("connect refused".into()))
                } else {
                    Ok(instance)
                }
            }
        }))
    })
}

/// Polls until the endpointer's cache reaches `n` endpoints.
async fn wait_for_size(endpointer: &Endpointer<(), String>, n: usize) {
    for _ in 0..200 {
        if endpointer.endpoints().len() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!(
        "cache never reached {n} endpoints (at {})",
        endpointer.endpoints().len()
    );
}

// ============================================================================
// Instancer -> cache -> balancer
// ============================================================================

#[tokio::test]
async fn test_round_robin_fairness_through_the_pipeline() {
    let instancer = Arc::new(SubjectInstancer::new());
    instancer.update(["a", "b", "c"]);

    let calls = Arc::new(Mutex::new(HashMap::new()));
    let endpointer = Endpointer::new(instancer, echo_factory(calls));
    wait_for_size(&endpointer, 3).await;

    let balancer = RoundRobin::new(endpointer.cache());
    let mut picks = Vec::new();
    for _ in 0..6 {
        let res = balancer
            .endpoint()
            .unwrap()
            .call(Context::background(), ())
            .await
            .unwrap();
        picks.push(res);
    }
    assert_eq!(picks, ["a", "b", "c", "a", "b", "c"]);
}

#[tokio::test]
async fn test_duplicate_identifiers_collapse_to_the_set() {
    let instancer = Arc::new(SubjectInstancer::new());
    instancer.update(["a", "a", "b", "a"]);

    let calls = Arc::new(Mutex::new(HashMap::new()));
    let endpointer = Endpointer::new(instancer, echo_factory(calls));
    wait_for_size(&endpointer, 2).await;
}

#[tokio::test]
async fn test_churn_to_empty_yields_no_endpoints() {
    let instancer = Arc::new(SubjectInstancer::new());
    instancer.update(["a"]);

    let calls = Arc::new(Mutex::new(HashMap::new()));
    let endpointer = Endpointer::new(instancer.clone(), echo_factory(calls));
    wait_for_size(&endpointer, 1).await;

    instancer.update(Vec::<String>::new());
    wait_for_size(&endpointer, 0).await;

    let balancer = RoundRobin::new(endpointer.cache());
    assert!(matches!(
        balancer.endpoint().unwrap_err(),
        EndpointError::NoEndpoints
    ));
}

#[tokio::test]
async fn test_departure_closes_endpoint_exactly_once() {
    let closes = Arc::new(Mutex::new(HashMap::<String, u32>::new()));
    let factory: Factory<(), ()> = {
        let closes = Arc::clone(&closes);
        factory_fn(move |instance| {
            let instance = instance.to_string();
            let closes = Arc::clone(&closes);
            Ok((
                Endpoint::new(|_ctx, _req| async { Ok(()) }),
                Box::new(move || {
                    *closes.lock().unwrap().entry(instance).or_insert(0) += 1;
                }) as Closer,
            ))
        })
    };

    let instancer = Arc::new(SubjectInstancer::new());
    instancer.update(["a", "b"]);
    let endpointer = Endpointer::new(instancer.clone(), factory);
    for _ in 0..200 {
        if endpointer.endpoints().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    instancer.update(["a"]);
    for _ in 0..200 {
        if endpointer.endpoints().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let closes = closes.lock().unwrap();
    assert_eq!(closes.get("b"), Some(&1));
    assert_eq!(closes.get("a"), None);
}

// ============================================================================
// Retry over a churning fleet
// ============================================================================

#[tokio::test]
async fn test_retry_fails_over_to_the_healthy_instance() {
    let instancer = Arc::new(SubjectInstancer::new());
    instancer.update(["bad", "good"]);

    let calls = Arc::new(Mutex::new(HashMap::new()));
    let endpointer = Endpointer::new(instancer, echo_factory(Arc::clone(&calls)));
    wait_for_size(&endpointer, 2).await;

    let balancer: Arc<dyn Balancer<(), String>> = Arc::new(RoundRobin::new(endpointer.cache()));
    let ep = retry(RetryConfig::new(2, Duration::from_secs(1)), balancer);

    let res = ep.call(Context::background(), ()).await.unwrap();
    assert_eq!(res, "good");
    let calls = calls.lock().unwrap();
    assert_eq!(calls.get("bad"), Some(&1));
    assert_eq!(calls.get("good"), Some(&1));
}

#[tokio::test]
async fn test_retry_picks_up_replacement_instances() {
    let instancer = Arc::new(SubjectInstancer::new());
    instancer.update(["bad1"]);

    let calls = Arc::new(Mutex::new(HashMap::new()));
    let endpointer = Endpointer::new(instancer.clone(), echo_factory(Arc::clone(&calls)));
    wait_for_size(&endpointer, 1).await;

    let balancer: Arc<dyn Balancer<(), String>> = Arc::new(RoundRobin::new(endpointer.cache()));
    let ep = retry(RetryConfig::new(2, Duration::from_secs(1)), balancer);

    ep.call(Context::background(), ()).await.unwrap_err();

    // The bad instance is replaced; the same retrying endpoint succeeds once
    // the cache has applied the new event.
    instancer.update(["good1"]);
    let mut res = None;
    for _ in 0..200 {
        match ep.call(Context::background(), ()).await {
            Ok(v) => {
                res = Some(v);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(2)).await,
        }
    }
    assert_eq!(res.as_deref(), Some("good1"));
}

#[tokio::test]
async fn test_caller_deadline_bounds_the_whole_pipeline() {
    let instancer = Arc::new(SubjectInstancer::new());
    instancer.update(["slow"]);

    let hung = Arc::new(AtomicU32::new(0));
    let factory: Factory<(), String> = {
        let hung = Arc::clone(&hung);
        simple_factory(move |_instance| {
            let hung = Arc::clone(&hung);
            Ok(Endpoint::new(move |_ctx, _req| {
                let hung = Arc::clone(&hung);
                async move {
                    hung.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok("never".to_string())
                }
            }))
        })
    };
    let endpointer = Endpointer::new(instancer, factory);
    for _ in 0..200 {
        if endpointer.endpoints().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let balancer: Arc<dyn Balancer<(), String>> = Arc::new(RoundRobin::new(endpointer.cache()));
    let ep = retry(RetryConfig::new(10, Duration::from_secs(1)), balancer);

    let ctx = Context::background().with_timeout(Duration::from_millis(100));
    let start = std::time::Instant::now();
    let err = ep.call(ctx, ()).await.unwrap_err();
    assert!(matches!(err, EndpointError::DeadlineExceeded { .. }));
    assert!(start.elapsed() < Duration::from_millis(300));
    assert_eq!(hung.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_callers_share_the_rotation() {
    let instancer = Arc::new(SubjectInstancer::new());
    instancer.update(["a", "b", "c"]);

    let calls = Arc::new(Mutex::new(HashMap::new()));
    let endpointer = Endpointer::new(instancer, echo_factory(Arc::clone(&calls)));
    wait_for_size(&endpointer, 3).await;

    let balancer: Arc<dyn Balancer<(), String>> = Arc::new(RoundRobin::new(endpointer.cache()));
    let ep = retry(RetryConfig::new(1, Duration::from_secs(1)), balancer);

    let results = futures::future::join_all((0..30).map(|_| {
        let ep = ep.clone();
        async move { ep.call(Context::background(), ()).await }
    }))
    .await;
    for res in results {
        res.unwrap();
    }

    // 30 calls over 3 instances, one pick each: an even 10/10/10 split.
    let calls = calls.lock().unwrap();
    assert_eq!(calls.get("a"), Some(&10));
    assert_eq!(calls.get("b"), Some(&10));
    assert_eq!(calls.get("c"), Some(&10));
}

// ============================================================================
// Registrar round trip
// ============================================================================

#[tokio::test]
async fn test_register_deregister_restores_initial_state() {
    let registry = Arc::new(MemoryRegistry::new());
    let registrar = TtlRegistrar::new(
        Arc::clone(&registry),
        Registration::new("api-1:7000", Duration::from_secs(10)),
    );

    assert!(registry.list().is_empty());
    registrar.register().await.unwrap();
    assert_eq!(registry.list().len(), 1);
    registrar.deregister().await.unwrap();
    assert!(registry.list().is_empty());
}
