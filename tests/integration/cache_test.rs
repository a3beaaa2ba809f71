// Cache integration tests
//
// TTL, restore promotion, tag mismatch, read-modify-write through the engine
// cache API, invalidation and swallowed tier failures.

#[cfg(test)]
mod tests {
    use super::super::harness::{context_config, MockTransport, TestEnv};
    use async_trait::async_trait;
    use hikyaku::cache::{
        CacheError, CacheMode, CacheObserver, CacheOptions, CacheTier, CachedRecord, FileTier,
        MapTier, MemoryTier, ReadScope, TierOperation,
    };
    use hikyaku::{ContextConfig, ContextOptions, Engine, EngineError, GlobalConfig, Matcher};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn restore(expire_ms: Option<u64>, tag: Option<&str>) -> CacheOptions {
        CacheOptions {
            mode: CacheMode::Restore,
            expire_ms,
            tag: tag.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_memory_ttl_expires_with_clock() {
        let env = TestEnv::new(MockTransport::echo());
        let method = env
            .context
            .get("/users")
            .cache(CacheOptions::memory(1000))
            .build();

        let first = method.execute(false).await.unwrap();
        assert!(!first.from_cache);

        env.clock.advance_ms(999);
        let second = method.execute(false).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.data, first.data);
        assert_eq!(env.transport.dispatches(), 1);

        env.clock.advance_ms(1);
        let third = method.execute(false).await.unwrap();
        assert!(!third.from_cache);
        assert_eq!(env.transport.dispatches(), 2);
    }

    #[tokio::test]
    async fn test_zero_expiry_never_caches() {
        let env = TestEnv::new(MockTransport::echo());
        let method = env.context.get("/users").cache(CacheOptions::disabled()).build();

        method.send(false).await.unwrap();
        method.send(false).await.unwrap();
        assert_eq!(env.transport.dispatches(), 2);
        assert_eq!(
            env.context.coordinator().read(&method, ReadScope::All).await,
            None
        );
    }

    #[tokio::test]
    async fn test_restore_hit_after_restart_promotes_to_volatile() {
        let env = TestEnv::new(MockTransport::echo());
        let observer = Arc::new(RecordingObserver::default());
        let durable: Arc<dyn CacheTier> =
            Arc::new(MapTier::new().with_observer(observer.clone()));

        let before = env.add_context_with_tiers(
            context_config("app"),
            Arc::new(MemoryTier::new(100)),
            durable.clone(),
        );
        let method = before.get("/profile").cache(restore(Some(60_000), None)).build();
        let sent = method.send(false).await.unwrap();
        assert_eq!(env.transport.dispatches(), 1);

        // Same id and durable storage, empty volatile tier
        let after = env.add_context_with_tiers(
            context_config("app"),
            Arc::new(MemoryTier::new(100)),
            durable,
        );
        let method = after.get("/profile").cache(restore(Some(60_000), None)).build();
        assert_eq!(after.coordinator().read(&method, ReadScope::L1).await, None);
        observer.successes.lock().clear();

        for _ in 0..2 {
            let outcome = method.execute(false).await.unwrap();
            assert!(outcome.from_cache);
            assert_eq!(outcome.data, sent);
        }
        assert_eq!(env.transport.dispatches(), 1);
        // The second read is served by the promoted volatile copy
        assert_eq!(observer.count(TierOperation::Get), 1);
        assert_eq!(
            after.coordinator().read(&method, ReadScope::L1).await,
            Some(sent)
        );
    }

    #[tokio::test]
    async fn test_restore_expired_durable_entry_refetches() {
        let env = TestEnv::new(MockTransport::echo());
        let durable: Arc<dyn CacheTier> = Arc::new(MapTier::new());

        let first = env.add_context_with_tiers(
            context_config("app"),
            Arc::new(MemoryTier::new(100)),
            durable.clone(),
        );
        first
            .get("/profile")
            .cache(restore(Some(1000), None))
            .build()
            .send(false)
            .await
            .unwrap();

        env.clock.advance_ms(1000);
        let second = env.add_context_with_tiers(
            context_config("app"),
            Arc::new(MemoryTier::new(100)),
            durable.clone(),
        );
        let method = second.get("/profile").cache(restore(Some(1000), None)).build();
        let outcome = method.execute(false).await.unwrap();
        assert!(!outcome.from_cache);
        assert_eq!(env.transport.dispatches(), 2);
    }

    #[tokio::test]
    async fn test_tag_mismatch_is_a_miss_and_removes_record() {
        let env = TestEnv::new(MockTransport::echo());
        let durable = Arc::new(MapTier::new());

        let v1 = env.add_context_with_tiers(
            context_config("app"),
            Arc::new(MemoryTier::new(100)),
            durable.clone(),
        );
        v1.get("/config")
            .cache(restore(None, Some("v1")))
            .build()
            .send(false)
            .await
            .unwrap();
        assert_eq!(durable.len(), 1);

        let v2 = env.add_context_with_tiers(
            context_config("app"),
            Arc::new(MemoryTier::new(100)),
            durable.clone(),
        );
        let method = v2.get("/config").cache(restore(None, Some("v2"))).build();
        assert_eq!(v2.coordinator().read(&method, ReadScope::L2).await, None);
        // The stale v1 record was dropped on read
        assert!(durable.is_empty());

        let outcome = method.execute(false).await.unwrap();
        assert!(!outcome.from_cache);
        assert_eq!(env.transport.dispatches(), 2);
    }

    #[tokio::test]
    async fn test_memory_mode_never_touches_durable_tier() {
        let env = TestEnv::new(MockTransport::echo());
        let durable = Arc::new(MapTier::new());
        let context = env.add_context_with_tiers(
            context_config("mem"),
            Arc::new(MemoryTier::new(100)),
            durable.clone(),
        );

        context
            .get("/items")
            .cache(CacheOptions::memory(10_000))
            .build()
            .send(false)
            .await
            .unwrap();
        assert!(durable.is_empty());
    }

    #[tokio::test]
    async fn test_file_tier_survives_context_restart() {
        let dir = tempfile::tempdir().unwrap();
        let env = TestEnv::new(MockTransport::echo());

        let config = || hikyaku::ContextConfig {
            durable_dir: Some(dir.path().to_path_buf()),
            ..context_config("files")
        };

        let first = env.add_context(config());
        let sent = first
            .get("/doc")
            .cache(restore(None, None))
            .build()
            .send(false)
            .await
            .unwrap();

        let second = env.add_context(config());
        let outcome = second
            .get("/doc")
            .cache(restore(None, None))
            .build()
            .execute(false)
            .await
            .unwrap();
        assert!(outcome.from_cache);
        assert_eq!(outcome.data, sent);
        assert_eq!(env.transport.dispatches(), 1);
    }

    #[tokio::test]
    async fn test_restart_without_explicit_id_finds_durable_entries() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::echo());
        let options = || {
            let config = ContextConfig {
                durable_dir: Some(dir.path().to_path_buf()),
                ..ContextConfig::new("/api")
            };
            ContextOptions::new(transport.clone()).config(config)
        };

        let first = Engine::new(GlobalConfig::default()).unwrap();
        let before = first.create_context(options()).unwrap();
        let sent = before
            .get("/doc")
            .cache(restore(None, None))
            .build()
            .send(false)
            .await
            .unwrap();

        let second = Engine::new(GlobalConfig::default()).unwrap();
        let after = second.create_context(options()).unwrap();
        assert_eq!(after.id(), before.id());

        let outcome = after
            .get("/doc")
            .cache(restore(None, None))
            .build()
            .execute(false)
            .await
            .unwrap();
        assert!(outcome.from_cache);
        assert_eq!(outcome.data, sent);
        assert_eq!(transport.dispatches(), 1);
    }

    #[tokio::test]
    async fn test_set_cache_updates_and_removes() {
        let env = TestEnv::new(MockTransport::fixed(json!({ "count": 1 })));
        let method = env.context.get("/counter").name("counter").build();
        method.send(false).await.unwrap();

        let matcher = Matcher::name("counter");
        env.engine
            .set_cache(&matcher, |current| {
                let count = current
                    .as_ref()
                    .and_then(|v| v["count"].as_i64())
                    .unwrap_or(0);
                Some(json!({ "count": count + 1 }))
            })
            .await
            .unwrap();
        assert_eq!(
            env.engine.query_cache(&matcher, ReadScope::All).await,
            Some(json!({ "count": 2 }))
        );

        env.engine.set_cache(&matcher, |_| None).await.unwrap();
        assert_eq!(env.engine.query_cache(&matcher, ReadScope::All).await, None);
    }

    #[tokio::test]
    async fn test_set_cache_without_match_is_assertion() {
        let env = TestEnv::new(MockTransport::echo());
        let err = env
            .engine
            .set_cache(&Matcher::name("missing"), |v| v)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Assertion(_)));
        assert_eq!(
            env.engine
                .query_cache(&Matcher::name("missing"), ReadScope::All)
                .await,
            None
        );
    }

    #[tokio::test]
    async fn test_set_cache_on_unregistered_descriptor() {
        let env = TestEnv::new(MockTransport::echo());
        let method = env.context.get("/never-sent").build();

        env.engine
            .set_cache(&Matcher::from(&method), |_| Some(json!("seeded")))
            .await
            .unwrap();
        let outcome = method.execute(false).await.unwrap();
        assert!(outcome.from_cache);
        assert_eq!(outcome.data, json!("seeded"));
        assert_eq!(env.transport.dispatches(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_cache_by_matcher_and_all() {
        let env = TestEnv::new(MockTransport::echo());
        let users = env.context.get("/users").name("users").build();
        let posts = env.context.get("/posts").name("posts").build();
        users.send(false).await.unwrap();
        posts.send(false).await.unwrap();

        env.engine
            .invalidate_cache(Some(&Matcher::name("users")))
            .await;
        assert!(!users.execute(false).await.unwrap().from_cache);
        assert!(posts.execute(false).await.unwrap().from_cache);

        env.engine.invalidate_cache(None).await;
        assert!(!users.execute(false).await.unwrap().from_cache);
        assert!(!posts.execute(false).await.unwrap().from_cache);
    }

    #[derive(Default)]
    struct RecordingObserver {
        successes: Mutex<Vec<TierOperation>>,
        failures: Mutex<Vec<TierOperation>>,
    }

    impl RecordingObserver {
        fn count(&self, op: TierOperation) -> usize {
            self.successes.lock().iter().filter(|o| **o == op).count()
        }
    }

    impl CacheObserver for RecordingObserver {
        fn on_success(&self, op: TierOperation, _key: &str) {
            self.successes.lock().push(op);
        }

        fn on_failure(&self, op: TierOperation, _key: &str, _error: &CacheError) {
            self.failures.lock().push(op);
        }
    }

    struct BrokenTier {
        observer: Arc<RecordingObserver>,
    }

    #[async_trait]
    impl CacheTier for BrokenTier {
        async fn get(&self, _key: &str) -> Result<Option<CachedRecord>, CacheError> {
            Err(CacheError::Backend("unavailable".to_string()))
        }

        async fn set(&self, _key: &str, _record: CachedRecord) -> Result<(), CacheError> {
            Err(CacheError::Backend("storage full".to_string()))
        }

        async fn remove(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("unavailable".to_string()))
        }

        async fn clear(&self) -> Result<(), CacheError> {
            Err(CacheError::Backend("unavailable".to_string()))
        }

        fn observer(&self) -> Option<&dyn CacheObserver> {
            Some(self.observer.as_ref())
        }
    }

    #[tokio::test]
    async fn test_durable_failures_never_fail_the_send() {
        let env = TestEnv::new(MockTransport::fixed(json!(["a"])));
        let observer = Arc::new(RecordingObserver::default());
        let context = env.add_context_with_tiers(
            context_config("broken"),
            Arc::new(MemoryTier::new(100)),
            Arc::new(BrokenTier {
                observer: observer.clone(),
            }),
        );

        let method = context.get("/list").cache(restore(None, None)).build();
        assert_eq!(method.send(false).await.unwrap(), json!(["a"]));
        assert!(observer.failures.lock().contains(&TierOperation::Set));

        // The volatile write still went through
        assert!(method.execute(false).await.unwrap().from_cache);
        assert!(context.coordinator().stats().failures >= 1);

        env.engine.invalidate_cache(None).await;
        assert!(observer.failures.lock().contains(&TierOperation::Clear));
    }

    #[tokio::test]
    async fn test_file_tier_records_use_hashed_names() {
        let dir = tempfile::tempdir().unwrap();
        let tier = FileTier::new(dir.path());
        tier.set("hikyaku.app|key", CachedRecord::new(Value::from(1), None, None))
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("entries"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].as_ref().unwrap().file_name();
        assert!(!name.to_string_lossy().contains('|'));
    }
}
