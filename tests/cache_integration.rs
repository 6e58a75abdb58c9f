//! Report Cache Integration Tests
//!
//! Exercise the fully built stack (integrity → durable → warm/warehouse):
//! - Round-trips across chunk boundaries
//! - Warm/durable tier interplay
//! - Corruption detection and read-only/threshold policies

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};

use reportcache::cache::metrics::{counters, CacheMetrics};
use reportcache::cache::{CacheBuilder, ChunkedCacheConfig, InMemoryWarehouse, InMemoryWarmCache};
use reportcache::domain::{Cache, CallContext, ManualClock};

const HOUR: Duration = Duration::from_secs(3600);
const SECOND: Duration = Duration::from_secs(1);

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

struct Stack {
    warehouse: Arc<InMemoryWarehouse>,
    warm: Arc<InMemoryWarmCache>,
    metrics: Arc<CacheMetrics>,
    clock: Arc<ManualClock>,
}

impl Stack {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        Self {
            warehouse: Arc::new(InMemoryWarehouse::new()),
            warm: Arc::new(InMemoryWarmCache::with_clock(clock.clone())),
            metrics: Arc::new(CacheMetrics::new()),
            clock,
        }
    }

    fn builder(&self, config: ChunkedCacheConfig) -> CacheBuilder {
        CacheBuilder::new(self.warehouse.clone())
            .config(config)
            .metrics(self.metrics.clone())
            .clock(self.clock.clone())
    }

    fn with_warm(&self, config: ChunkedCacheConfig) -> Arc<dyn Cache> {
        self.builder(config)
            .warm_tier(self.warm.clone())
            .build()
            .unwrap()
    }

    fn durable_only(&self, config: ChunkedCacheConfig) -> Arc<dyn Cache> {
        self.builder(config).build().unwrap()
    }
}

fn small_chunks() -> ChunkedCacheConfig {
    ChunkedCacheConfig {
        chunk_size: 64,
        ..Default::default()
    }
}

fn pseudo_random(len: usize) -> Bytes {
    let mut state: u32 = 0x9e37_79b9;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect::<Vec<u8>>()
        .into()
}

// =============================================================================
// Round-Trip
// =============================================================================

mod roundtrip_tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_multi_chunk_roundtrip() {
        let stack = Stack::new();
        let cache = stack.durable_only(small_chunks());
        let ctx = CallContext::new();
        let payload = pseudo_random(10_000);

        cache.set(&ctx, "k", payload.clone(), HOUR).await.unwrap();

        assert!(stack.warehouse.len() > 100);
        assert_eq!(cache.get(&ctx, "k", HOUR).await.unwrap(), Some(payload));
    }

    #[tokio::test]
    async fn test_chunk_boundary_produces_two_records() {
        use reportcache::cache::integrity::DIGEST_LEN;
        use reportcache::cache::{Compressor, Lz4Compressor};

        let payload = pseudo_random(85);
        let envelope_len = Lz4Compressor::new().compress(&payload).unwrap().len() + DIGEST_LEN;

        // Envelope is one byte past the chunk size.
        let stack = Stack::new();
        let cache = stack.durable_only(ChunkedCacheConfig {
            chunk_size: envelope_len - 1,
            ..Default::default()
        });
        let ctx = CallContext::new();
        cache.set(&ctx, "k", payload.clone(), HOUR).await.unwrap();

        let rows = stack.warehouse.rows();
        let indexes: Vec<u32> = rows.iter().map(|r| r.chunk_index).collect();
        assert_eq!(indexes, vec![0, 1]);
        assert_eq!(rows[0].data.len(), envelope_len - 1);
        assert_eq!(rows[1].data.len(), 1);
        assert_eq!(cache.get(&ctx, "k", HOUR).await.unwrap(), Some(payload));
    }

    #[tokio::test]
    async fn test_reverse_fetch_order_reassembles() {
        let stack = Stack::new();
        let cache = stack.durable_only(small_chunks());
        let ctx = CallContext::new();
        let payload = pseudo_random(1_000);

        cache.set(&ctx, "k", payload.clone(), HOUR).await.unwrap();
        stack.warehouse.set_reverse_fetch(true);

        assert_eq!(cache.get(&ctx, "k", HOUR).await.unwrap(), Some(payload));
    }

    #[tokio::test]
    async fn test_empty_payload_is_indistinguishable_from_miss() {
        let stack = Stack::new();
        let cache = stack.with_warm(small_chunks());
        let ctx = CallContext::new();

        cache.set(&ctx, "k", Bytes::new(), HOUR).await.unwrap();

        assert_eq!(stack.warehouse.total_calls(), 0);
        assert!(stack.warm.is_empty());
        assert_eq!(cache.get(&ctx, "k", HOUR).await.unwrap(), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_set_then_get_returns_payload(
            data in proptest::collection::vec(any::<u8>(), 1..4096),
            chunk_size in 1usize..256,
        ) {
            let stack = Stack::new();
            let cache = stack.durable_only(ChunkedCacheConfig {
                chunk_size,
                ..Default::default()
            });
            let ctx = CallContext::new();
            let payload = Bytes::from(data);

            let result = tokio_test::block_on(async {
                cache.set(&ctx, "k", payload.clone(), HOUR).await?;
                cache.get(&ctx, "k", HOUR).await
            });
            prop_assert_eq!(result.unwrap(), Some(payload));
        }
    }
}

// =============================================================================
// Tier Interplay
// =============================================================================

mod tier_tests {
    use super::*;

    #[tokio::test]
    async fn test_durable_hit_promotes_with_remaining_lifetime() {
        let stack = Stack::new();
        let ctx = CallContext::new();
        let writer = stack.durable_only(small_chunks());
        let payload = pseudo_random(500);
        writer.set(&ctx, "k", payload.clone(), 10 * HOUR).await.unwrap();

        stack.clock.advance(2 * HOUR);
        let reader = stack.with_warm(small_chunks());
        assert!(stack.warm.is_empty());

        let result = reader.get(&ctx, "k", 10 * HOUR).await.unwrap();

        assert_eq!(result, Some(payload.clone()));
        assert_eq!(stack.warm.ttl_of("cc~k"), Some(8 * HOUR));
        assert_eq!(stack.metrics.get(counters::WARM_BACKFILL), 1);

        // The next read is served by the warm tier alone.
        let probes = stack.warehouse.probe_calls();
        assert_eq!(reader.get(&ctx, "k", 10 * HOUR).await.unwrap(), Some(payload));
        assert_eq!(stack.warehouse.probe_calls(), probes);
    }

    #[tokio::test]
    async fn test_below_threshold_only_touches_warm_tier() {
        let stack = Stack::new();
        let cache = stack.with_warm(small_chunks());
        let ctx = CallContext::new();
        let short = 10 * 60 * SECOND;

        cache
            .set(&ctx, "k", Bytes::from_static(b"quick"), short)
            .await
            .unwrap();
        assert_eq!(
            cache.get(&ctx, "k", short).await.unwrap(),
            Some(Bytes::from_static(b"quick"))
        );
        stack.warm.clear();
        assert_eq!(cache.get(&ctx, "k", short).await.unwrap(), None);

        assert_eq!(stack.warehouse.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_read_only_reader_with_separate_writer() {
        let stack = Stack::new();
        let ctx = CallContext::new();
        let reader = stack.with_warm(ChunkedCacheConfig {
            read_only: true,
            ..small_chunks()
        });

        reader
            .set(&ctx, "k", Bytes::from_static(b"reader value"), HOUR)
            .await
            .unwrap();
        assert_eq!(stack.warehouse.insert_calls(), 0);
        assert!(stack.warm.contains("cc~k"));
        assert_eq!(stack.metrics.get(counters::BLOCKED_WRITE), 1);

        let writer = stack.durable_only(small_chunks());
        writer
            .set(&ctx, "other", Bytes::from_static(b"writer value"), HOUR)
            .await
            .unwrap();
        assert_eq!(
            reader.get(&ctx, "other", HOUR).await.unwrap(),
            Some(Bytes::from_static(b"writer value"))
        );
    }

    #[tokio::test]
    async fn test_expiration_boundary() {
        let stack = Stack::new();
        let cache = stack.durable_only(small_chunks());
        let ctx = CallContext::new();

        cache
            .set(&ctx, "k", Bytes::from_static(b"value"), 3 * HOUR)
            .await
            .unwrap();

        stack.clock.advance(3 * HOUR - SECOND);
        assert!(cache.get(&ctx, "k", 3 * HOUR).await.unwrap().is_some());

        stack.clock.advance(2 * SECOND);
        assert!(cache.get(&ctx, "k", 3 * HOUR).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_newer_generation_wins() {
        let stack = Stack::new();
        let cache = stack.durable_only(small_chunks());
        let ctx = CallContext::new();

        cache
            .set(&ctx, "k", Bytes::from_static(b"first"), HOUR)
            .await
            .unwrap();
        stack.clock.advance(SECOND);
        cache
            .set(&ctx, "k", Bytes::from_static(b"second"), HOUR)
            .await
            .unwrap();

        assert_eq!(
            cache.get(&ctx, "k", HOUR).await.unwrap(),
            Some(Bytes::from_static(b"second"))
        );
    }

    #[tokio::test]
    async fn test_concurrent_writers_never_splice() {
        let stack = Stack::new();
        let cache = stack.durable_only(small_chunks());
        let ctx = CallContext::new();
        let payloads: Vec<Bytes> = (1..=8).map(|n| pseudo_random(n * 300)).collect();

        let writes = payloads
            .iter()
            .map(|p| cache.set(&ctx, "k", p.clone(), HOUR));
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        // Every generation shares modified_at; only the generation filter
        // keeps them apart.
        let result = cache.get(&ctx, "k", HOUR).await.unwrap().unwrap();
        assert!(payloads.contains(&result));
    }
}

// =============================================================================
// Corruption
// =============================================================================

mod corruption_tests {
    use super::*;
    use reportcache::cache::ChunkRecord;
    use reportcache::Error;

    fn tampered(rows: Vec<ChunkRecord>, tamper: impl Fn(&mut ChunkRecord)) -> Arc<InMemoryWarehouse> {
        let warehouse = Arc::new(InMemoryWarehouse::new());
        for mut row in rows {
            tamper(&mut row);
            warehouse.push_row(row);
        }
        warehouse
    }

    #[tokio::test]
    async fn test_flipped_byte_is_reported_as_corruption() {
        let stack = Stack::new();
        let ctx = CallContext::new();
        stack
            .durable_only(small_chunks())
            .set(&ctx, "k", pseudo_random(300), HOUR)
            .await
            .unwrap();

        let rows = stack.warehouse.rows();
        let last = rows.len() as u32 - 1;
        let warehouse = tampered(rows, |row| {
            if row.chunk_index == last {
                let mut data = row.data.to_vec();
                let end = data.len() - 1;
                data[end] ^= 0x40;
                row.data = data.into();
            }
        });

        let metrics = Arc::new(CacheMetrics::new());
        let reader = CacheBuilder::new(warehouse)
            .config(small_chunks())
            .metrics(metrics.clone())
            .clock(stack.clock.clone())
            .build()
            .unwrap();

        let err = reader.get(&ctx, "k", HOUR).await.unwrap_err();
        assert!(err.is_corruption(), "unexpected error: {err}");
        assert_eq!(metrics.get(counters::CORRUPTION), 1);
    }

    #[tokio::test]
    async fn test_truncated_payload_is_underflow() {
        let stack = Stack::new();
        let ctx = CallContext::new();
        stack
            .durable_only(small_chunks())
            .set(&ctx, "k", Bytes::from_static(b"tiny"), HOUR)
            .await
            .unwrap();

        let warehouse = tampered(stack.warehouse.rows(), |row| {
            row.data = row.data.slice(..8);
        });
        let reader = CacheBuilder::new(warehouse)
            .config(small_chunks())
            .clock(stack.clock.clone())
            .build()
            .unwrap();

        let result = reader.get(&ctx, "k", HOUR).await;
        assert!(matches!(
            result,
            Err(Error::UnderflowCorruption { len: 8, min: 16 })
        ));
    }

    #[tokio::test]
    async fn test_partial_write_is_not_promoted_and_recovers() {
        let stack = Stack::new();
        let ctx = CallContext::new();
        let writer = stack.durable_only(small_chunks());
        let reader = stack.with_warm(small_chunks());
        let payload = pseudo_random(1_000);

        stack.warehouse.fail_insert_at(3);
        let err = writer.set(&ctx, "k", payload.clone(), 8 * HOUR).await.unwrap_err();
        assert!(matches!(err, Error::PartialWrite { written: 2, .. }));
        assert_eq!(stack.warehouse.len(), 2);

        // The surviving rows are chunks 0 and 1: contiguous, tail missing.
        let err = reader.get(&ctx, "k", 8 * HOUR).await.unwrap_err();
        assert!(err.is_corruption(), "unexpected error: {err}");
        assert!(!stack.warm.contains("cc~k"));
        assert_eq!(stack.metrics.get(counters::WARM_BACKFILL), 0);

        stack.clock.advance(60 * SECOND);
        writer.set(&ctx, "k", payload.clone(), 8 * HOUR).await.unwrap();

        assert_eq!(reader.get(&ctx, "k", 8 * HOUR).await.unwrap(), Some(payload));
        assert!(stack.warm.contains("cc~k"));
    }

    #[tokio::test]
    async fn test_missing_chunk_is_never_returned_as_data() {
        let stack = Stack::new();
        let ctx = CallContext::new();
        stack
            .durable_only(small_chunks())
            .set(&ctx, "k", pseudo_random(1_000), HOUR)
            .await
            .unwrap();

        let rows: Vec<ChunkRecord> = stack
            .warehouse
            .rows()
            .into_iter()
            .filter(|r| r.chunk_index != 3)
            .collect();
        let warehouse = tampered(rows, |_| {});
        let reader = CacheBuilder::new(warehouse)
            .config(small_chunks())
            .clock(stack.clock.clone())
            .build()
            .unwrap();

        let err = reader.get(&ctx, "k", HOUR).await.unwrap_err();
        assert!(matches!(err, Error::IncompleteGeneration { .. }));
    }
}

// =============================================================================
// Cache-or-Generate
// =============================================================================

mod request_tests {
    use super::*;
    use reportcache::cache::{prefixed_cache_key, PrometheusMetricsSink};
    use reportcache::{get_or_generate, Error, RequestOptions};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Serialize)]
    struct ReportRequest {
        release: &'static str,
        include_flakes: bool,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Report {
        regressions: Vec<String>,
    }

    #[tokio::test]
    async fn test_generate_once_then_serve_from_durable() {
        let stack = Stack::new();
        let ctx = CallContext::new();
        let cache = stack.durable_only(ChunkedCacheConfig::default());
        let key = prefixed_cache_key(
            "RegressionReport~",
            &ReportRequest {
                release: "4.17",
                include_flakes: false,
            },
        )
        .unwrap();
        let runs = AtomicU32::new(0);

        for _ in 0..3 {
            let report: Report = get_or_generate(
                &ctx,
                Some(cache.as_ref()),
                &RequestOptions::default(),
                &key,
                || async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Error>(Report {
                        regressions: vec!["sig-network".into()],
                    })
                },
            )
            .await
            .unwrap();
            assert_eq!(report.regressions, vec!["sig-network".to_string()]);
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(stack.warehouse.rows()[0].key, format!("cc~{}", key));
    }

    #[tokio::test]
    async fn test_prometheus_sink_counts_stack_events() {
        let registry = prometheus::Registry::new();
        let sink = Arc::new(PrometheusMetricsSink::new(&registry).unwrap());
        let cache = CacheBuilder::new(Arc::new(InMemoryWarehouse::new()))
            .metrics(sink.clone())
            .build()
            .unwrap();
        let ctx = CallContext::new();

        tokio_test::assert_ok!(
            cache
                .set(&ctx, "k", Bytes::from_static(b"value"), HOUR)
                .await
        );
        tokio_test::assert_ok!(cache.get(&ctx, "k", HOUR).await);
        tokio_test::assert_ok!(cache.get(&ctx, "absent", HOUR).await);

        assert_eq!(sink.value(counters::DURABLE_SET), 1);
        assert_eq!(sink.value(counters::DURABLE_HIT), 1);
        assert_eq!(sink.value(counters::DURABLE_MISS), 1);
    }
}
