// Execution pipeline integration tests
//
// Cache keys, request sharing, dependency invalidation, response handling,
// timeout and abort through real contexts and a scripted transport.

#[cfg(test)]
mod tests {
    use super::super::harness::{context_config, wait_until, MockTransport, TestEnv};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::FutureExt;
    use hikyaku::cache::{CacheOptions, ReadScope};
    use hikyaku::method::{Method, Progress, RequestBody, RequestConfig};
    use hikyaku::snapshot::SnapshotRegistry;
    use hikyaku::{
        AutoInvalidateScope, ContextConfig, EngineError, GlobalConfig, Matcher,
        RequestInterceptor, RespondedHandler, Result, TransportResponse,
    };
    use parking_lot::Mutex;
    use regex::Regex;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    const WAIT: Duration = Duration::from_secs(2);

    // ------------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_cache_key_is_deterministic() {
        let env = TestEnv::new(MockTransport::echo());
        let a = env
            .context
            .get("/users")
            .param("page", 1)
            .header("X-Trace", "1")
            .build();
        let b = env
            .context
            .get("/users")
            .param("page", 1)
            .header("x-trace", "1")
            .build();
        let c = env.context.get("/users").param("page", 2).build();
        let d = env.context.post("/users", json!({ "page": 1 })).build();

        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert_ne!(a.key(), d.key());
    }

    #[tokio::test]
    async fn test_absent_param_dropped_from_url_and_key() {
        let env = TestEnv::new(MockTransport::echo());
        let with_none = env
            .context
            .get("/search")
            .param("q", "rust lang")
            .param_opt("cursor", None::<String>)
            .build();
        let without = env.context.get("/search").param("q", "rust lang").build();
        assert_eq!(with_none.key(), without.key());

        with_none.send(false).await.unwrap();
        let requests = env.transport.requests();
        assert_eq!(requests[0].url, "/api/search?q=rust%20lang");
    }

    // ------------------------------------------------------------------------
    // Cache hits
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_default_get_policy_serves_second_send_from_cache() {
        let env = TestEnv::new(MockTransport::echo());
        let first = env.context.get("/todos").build();
        let second = env.context.get("/todos").build();

        let sent = first.execute(false).await.unwrap();
        assert!(!sent.from_cache);
        assert_eq!(first.from_cache(), Some(false));

        let cached = second.execute(false).await.unwrap();
        assert!(cached.from_cache);
        assert_eq!(cached.data, sent.data);
        assert_eq!(second.from_cache(), Some(true));
        assert_eq!(env.transport.dispatches(), 1);
    }

    #[tokio::test]
    async fn test_force_bypasses_cache() {
        let env = TestEnv::new(MockTransport::echo());
        let method = env.context.get("/todos").build();

        method.send(false).await.unwrap();
        let forced = method.execute(true).await.unwrap();
        assert!(!forced.from_cache);
        assert_eq!(forced.data["n"], json!(1));
        assert_eq!(env.transport.dispatches(), 2);
    }

    #[tokio::test]
    async fn test_post_not_cached_by_default() {
        let env = TestEnv::new(MockTransport::echo());
        let method = env.context.post("/todos", json!({ "title": "a" })).build();

        method.send(false).await.unwrap();
        method.send(false).await.unwrap();
        assert_eq!(env.transport.dispatches(), 2);
    }

    #[tokio::test]
    async fn test_cache_supplier_replaces_tier_lookup() {
        let env = TestEnv::new(MockTransport::echo());
        let method = env
            .context
            .get("/supplied")
            .cache_from(|| async { Some(json!("from supplier")) }.boxed())
            .build();

        let outcome = method.execute(false).await.unwrap();
        assert!(outcome.from_cache);
        assert_eq!(outcome.data, json!("from supplier"));
        assert_eq!(env.transport.dispatches(), 0);
    }

    #[tokio::test]
    async fn test_method_is_awaitable() {
        let env = TestEnv::new(MockTransport::fixed(json!([1, 2, 3])));
        let method = env.context.get("/numbers").build();
        assert_eq!(method.clone().await.unwrap(), json!([1, 2, 3]));
    }

    // ------------------------------------------------------------------------
    // Request sharing
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_concurrent_sends_share_one_dispatch() {
        let gate = Arc::new(Notify::new());
        let env = TestEnv::new(MockTransport::echo().with_gate(gate.clone()));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let method = env.context.get("/shared").build();
            handles.push(tokio::spawn(async move { method.send(false).await }));
        }

        assert!(wait_until(WAIT, || env.transport.dispatches() == 1).await);
        // Let the other sends join before releasing the leader
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.notify_one();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }
        assert!(results.iter().all(|r| r == &results[0]));
        assert_eq!(env.transport.dispatches(), 1);
        assert_eq!(env.engine.sharing().in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_shared_failure_reaches_every_caller() {
        let gate = Arc::new(Notify::new());
        let env = TestEnv::new(MockTransport::failing("boom").with_gate(gate.clone()));

        let first = env.context.get("/flaky").build();
        let second = env.context.get("/flaky").build();
        let a = tokio::spawn(async move { first.send(false).await });
        assert!(wait_until(WAIT, || env.transport.dispatches() == 1).await);
        let b = tokio::spawn(async move { second.send(false).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.notify_one();

        for result in [a.await.unwrap(), b.await.unwrap()] {
            match result {
                Err(EngineError::Transport(err)) => assert_eq!(err.status, Some(500)),
                other => panic!("expected transport error, got {:?}", other),
            }
        }
        assert_eq!(env.transport.dispatches(), 1);
    }

    #[tokio::test]
    async fn test_sharing_disabled_dispatches_each_send() {
        let env = TestEnv::new(MockTransport::echo().with_delay(Duration::from_millis(30)));

        let first = env.context.get("/solo").share_request(false).build();
        let second = env.context.get("/solo").share_request(false).build();
        let (a, b) = tokio::join!(first.send(false), second.send(false));
        a.unwrap();
        b.unwrap();
        assert_eq!(env.transport.dispatches(), 2);
    }

    // ------------------------------------------------------------------------
    // Dependency invalidation
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_mutation_invalidates_named_dependency() {
        let env = TestEnv::new(MockTransport::echo());
        let list = env.context.get("/todos").name("todo-list").build();
        list.send(false).await.unwrap();
        assert!(env
            .context
            .coordinator()
            .read(&list, ReadScope::All)
            .await
            .is_some());

        let create = env
            .context
            .post("/todos", json!({ "title": "write tests" }))
            .hit_source("todo-list")
            .build();
        create.send(false).await.unwrap();

        assert_eq!(
            env.context.coordinator().read(&list, ReadScope::All).await,
            None
        );
        assert!(!list.execute(false).await.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_dependent_declares_tag_on_source_name() {
        let env = TestEnv::new(MockTransport::echo());
        let list = env
            .context
            .get("/todos")
            .name("todo-list")
            .hit_source("create-todo")
            .build();
        list.send(false).await.unwrap();

        env.context
            .post("/todos", json!({}))
            .name("create-todo")
            .build()
            .send(false)
            .await
            .unwrap();

        assert_eq!(
            env.context.coordinator().read(&list, ReadScope::All).await,
            None
        );
    }

    #[tokio::test]
    async fn test_tagged_read_leaves_its_tag_target_cached() {
        let env = TestEnv::new(MockTransport::echo());
        let list = env.context.get("/todos").name("list").build();
        list.send(false).await.unwrap();

        let detail = env
            .context
            .get("/todos/1")
            .name("detail")
            .hit_source("list")
            .build();
        detail.send(false).await.unwrap();
        detail.send(true).await.unwrap();

        assert!(env
            .context
            .coordinator()
            .read(&list, ReadScope::All)
            .await
            .is_some());
        assert!(list.execute(false).await.unwrap().from_cache);
        assert_eq!(env.transport.dispatches(), 3);
    }

    #[tokio::test]
    async fn test_dependency_by_descriptor_key() {
        let env = TestEnv::new(MockTransport::echo());
        let detail = env.context.get("/todos/1").build();
        let detail_named = env.context.get("/todos/1").name("detail").build();
        detail_named.send(false).await.unwrap();

        env.context
            .put("/todos/1", json!({ "done": true }))
            .hit_source(&detail)
            .build()
            .send(false)
            .await
            .unwrap();

        assert!(!detail.execute(false).await.unwrap().from_cache);
    }

    async fn scoped_invalidation(scope: AutoInvalidateScope) -> (bool, bool) {
        let env = TestEnv::with_config(
            GlobalConfig {
                auto_invalidate_scope: scope,
                ..GlobalConfig::default()
            },
            context_config("a"),
            MockTransport::echo(),
        );
        let other = env.add_context(context_config("b"));

        let local = env.context.get("/todos").name("todos-a").build();
        let remote = other.get("/todos").name("todos-b").build();
        local.send(false).await.unwrap();
        remote.send(false).await.unwrap();

        env.context
            .post("/todos", json!({}))
            .hit_source(Regex::new("^todos-").unwrap())
            .build()
            .send(false)
            .await
            .unwrap();

        let local_cached = local.execute(false).await.unwrap().from_cache;
        let remote_cached = remote.execute(false).await.unwrap().from_cache;
        (local_cached, remote_cached)
    }

    #[tokio::test]
    async fn test_global_scope_invalidates_every_context() {
        assert_eq!(
            scoped_invalidation(AutoInvalidateScope::Global).await,
            (false, false)
        );
    }

    #[tokio::test]
    async fn test_self_scope_invalidates_own_context_only() {
        assert_eq!(
            scoped_invalidation(AutoInvalidateScope::SelfContext).await,
            (false, true)
        );
    }

    #[tokio::test]
    async fn test_off_scope_never_invalidates() {
        assert_eq!(
            scoped_invalidation(AutoInvalidateScope::Off).await,
            (true, true)
        );
    }

    // ------------------------------------------------------------------------
    // Response handling
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_special_body_never_cached() {
        let env = TestEnv::new(MockTransport::echo());
        let upload = || {
            env.context
                .post("/upload", RequestBody::Binary(Bytes::from_static(b"\x00\x01")))
                .cache(CacheOptions::memory(60_000))
                .build()
        };

        upload().send(false).await.unwrap();
        let second = upload().execute(false).await.unwrap();
        assert!(!second.from_cache);
        assert_eq!(env.transport.dispatches(), 2);
    }

    struct Fallback;

    #[async_trait]
    impl RespondedHandler for Fallback {
        async fn on_success(&self, response: TransportResponse, _method: &Method) -> Result<Value> {
            Ok(json!({ "wrapped": response.body }))
        }

        async fn on_error(&self, _error: EngineError, _method: &Method) -> Result<Value> {
            Ok(json!("fallback"))
        }
    }

    #[tokio::test]
    async fn test_error_handler_data_is_not_cached() {
        let env = TestEnv::with_options(
            GlobalConfig::default(),
            MockTransport::failing("down"),
            |options| options.responded(Arc::new(Fallback)),
        );
        let method = env.context.get("/status").build();

        assert_eq!(method.send(false).await.unwrap(), json!("fallback"));
        let second = method.execute(false).await.unwrap();
        assert!(!second.from_cache);
        assert_eq!(env.transport.dispatches(), 2);
    }

    #[tokio::test]
    async fn test_responded_and_transform_shape_cached_data() {
        let env = TestEnv::with_options(
            GlobalConfig::default(),
            MockTransport::fixed(json!(1)),
            |options| options.responded(Arc::new(Fallback)),
        );
        let method = env
            .context
            .get("/value")
            .transform(|data, _headers| Ok(json!([data])))
            .build();

        let expected = json!([{ "wrapped": 1 }]);
        assert_eq!(method.send(false).await.unwrap(), expected);
        let cached = method.execute(false).await.unwrap();
        assert!(cached.from_cache);
        assert_eq!(cached.data, expected);
    }

    #[tokio::test]
    async fn test_transform_error_propagates() {
        let env = TestEnv::new(MockTransport::fixed(json!("not a list")));
        let method = env
            .context
            .get("/list")
            .transform(|data, _| match data {
                Value::Array(_) => Ok(data),
                _ => Err(EngineError::Handler("expected a list".to_string())),
            })
            .build();

        assert!(matches!(
            method.send(false).await,
            Err(EngineError::Handler(_))
        ));
        assert_eq!(
            env.context.coordinator().read(&method, ReadScope::All).await,
            None
        );
    }

    struct Stamp {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RequestInterceptor for Stamp {
        async fn before_request(&self, request: &mut RequestConfig, _method: &Method) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            request.set_header("Authorization", "Bearer token");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_interceptor_changes_dispatch_not_key() {
        let stamp = Arc::new(Stamp {
            calls: AtomicUsize::new(0),
        });
        let interceptor = stamp.clone();
        let env = TestEnv::with_options(GlobalConfig::default(), MockTransport::echo(), |options| {
            options.before_request(interceptor)
        });

        let method = env.context.get("/me").build();
        let key_before = method.key().to_string();
        method.send(false).await.unwrap();

        assert_eq!(method.key(), key_before);
        assert!(method.config().header("authorization").is_none());
        let requests = env.transport.requests();
        assert!(requests[0]
            .headers
            .iter()
            .any(|(name, value)| name == "Authorization" && value == "Bearer token"));
        assert_eq!(stamp.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_context_defaults_merge_into_descriptor() {
        let env = TestEnv::with_config(
            GlobalConfig::default(),
            ContextConfig {
                timeout_ms: Some(5_000),
                ..ContextConfig::new("https://api.example.com/v1/")
            },
            MockTransport::echo(),
        );
        let method = env.context.get("items").build();
        let own_timeout = env.context.get("items").timeout_ms(100).build();

        method.send(false).await.unwrap();
        assert_eq!(method.config().timeout_ms, Some(5_000));
        assert_eq!(own_timeout.config().timeout_ms, Some(100));
        assert_eq!(
            env.transport.requests()[0].url,
            "https://api.example.com/v1/items"
        );
    }

    // ------------------------------------------------------------------------
    // Timeout and abort
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_timeout_cancels_dispatch() {
        let env = TestEnv::new(MockTransport::echo().with_delay(Duration::from_millis(500)));
        let method = env.context.get("/slow").timeout_ms(20).build();

        let result = method.send(false).await;
        assert!(matches!(result, Err(EngineError::Timeout(20))));
        assert!(wait_until(WAIT, || env.transport.cancelled() == 1).await);
        assert_eq!(env.transport.completed(), 0);
    }

    #[tokio::test]
    async fn test_abort_in_flight_request() {
        let env = TestEnv::new(MockTransport::echo().with_delay(Duration::from_millis(500)));
        let method = env.context.get("/long").build();

        let sending = method.clone();
        let handle = tokio::spawn(async move { sending.send(false).await });
        assert!(wait_until(WAIT, || env.transport.dispatches() == 1).await);
        method.abort();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(EngineError::Aborted)));
        assert!(wait_until(WAIT, || env.transport.cancelled() == 1).await);
        assert_eq!(env.engine.sharing().in_flight_count(), 0);
    }

    struct SlowInterceptor;

    #[async_trait]
    impl RequestInterceptor for SlowInterceptor {
        async fn before_request(&self, _request: &mut RequestConfig, _method: &Method) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_abort_before_transport_is_reached() {
        let env = TestEnv::with_options(GlobalConfig::default(), MockTransport::echo(), |options| {
            options.before_request(Arc::new(SlowInterceptor))
        });
        let method = env.context.get("/never").build();

        let sending = method.clone();
        let handle = tokio::spawn(async move { sending.send(false).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        method.abort();

        assert!(matches!(handle.await.unwrap(), Err(EngineError::Aborted)));
        assert_eq!(env.transport.dispatches(), 0);
    }

    #[tokio::test]
    async fn test_send_after_abort_dispatches_fresh() {
        let env = TestEnv::new(MockTransport::echo().with_delay(Duration::from_millis(100)));
        let method = env.context.get("/retry").build();

        let sending = method.clone();
        let handle = tokio::spawn(async move { sending.send(false).await });
        assert!(wait_until(WAIT, || env.transport.dispatches() == 1).await);
        method.abort();
        assert!(handle.await.unwrap().is_err());

        let data = method.send(false).await.unwrap();
        assert_eq!(data["n"], json!(1));
    }

    // ------------------------------------------------------------------------
    // Progress
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_download_progress_reaches_subscribers() {
        let env = TestEnv::new(MockTransport::echo());
        let method = env.context.get("/file").build();
        let seen: Arc<Mutex<Vec<Progress>>> = Arc::default();

        let sink = seen.clone();
        let subscription = method.on_download(move |progress| sink.lock().push(progress));
        method.send(true).await.unwrap();
        assert_eq!(seen.lock().as_slice(), &[Progress::new(1, 1)]);

        subscription.unsubscribe();
        method.send(true).await.unwrap();
        assert_eq!(seen.lock().len(), 1);
    }

    // ------------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_snapshot_registry_resolves_sent_descriptors() {
        let env = TestEnv::new(MockTransport::echo());
        env.context
            .get("/users")
            .name("users-page")
            .param("page", 1)
            .build()
            .send(false)
            .await
            .unwrap();
        env.context
            .get("/users")
            .name("users-page")
            .param("page", 2)
            .build()
            .send(false)
            .await
            .unwrap();
        env.context.get("/anon").build().send(false).await.unwrap();

        let snapshots = env.engine.snapshots();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots.matches(&Matcher::name("users-page"), true).len(), 2);
        assert_eq!(snapshots.matches(&Matcher::name("users-page"), false).len(), 1);
        assert_eq!(
            snapshots
                .matches(&Matcher::pattern("^users").unwrap(), true)
                .len(),
            2
        );

        let by_url = Matcher::filter(None, |method| method.url().contains("users"));
        assert_eq!(snapshots.matches(&by_url, true).len(), 2);
        assert!(snapshots.match_one(&Matcher::name("anon")).is_none());
    }

    #[tokio::test]
    async fn test_snapshot_capacity_refuses_new_descriptors() {
        let env = TestEnv::with_config(
            GlobalConfig {
                snapshot_capacity: 1,
                ..GlobalConfig::default()
            },
            ContextConfig::new("/api"),
            MockTransport::echo(),
        );
        let first = env.context.get("/a").name("a").build();
        let second = env.context.get("/b").name("b").build();
        first.send(false).await.unwrap();
        second.send(false).await.unwrap();

        let snapshots: &SnapshotRegistry = env.engine.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots.match_one(&Matcher::name("a")).is_some());
        assert!(snapshots.match_one(&Matcher::name("b")).is_none());

        // Re-sending a stored descriptor still replaces it
        first.send(true).await.unwrap();
        assert_eq!(snapshots.len(), 1);
    }

    #[test]
    fn test_bad_matcher_pattern_is_config_error() {
        assert!(matches!(
            Matcher::pattern("(unclosed"),
            Err(EngineError::Config(_))
        ));
    }
}
