//! End-to-end tests over the full engine with local providers.
//!
//! Everything runs offline: a deterministic hashing embedder, a canned
//! answer model, and a fetcher over in-memory chat data.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use telegram_recall::integrations::{AnswerModel, EmbeddingProvider};
use telegram_recall::store::memory::MemoryStore;
use telegram_recall::store::Store;
use telegram_recall::telegram::ExportFetcher;
use telegram_recall::{
    Chat, ChatKind, Config, Error, JobStatus, RawMessage, RecallService, SearchFilters,
};

const DIM: usize = 16;
const TENANT_A: i64 = 9;
const TENANT_B: i64 = 8;
const CHAT_ID: i64 = -1001000;

struct HashEmbedder {
    delay: Duration,
}

impl HashEmbedder {
    fn instant() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> telegram_recall::Result<Vec<Vec<f32>>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; DIM];
                for token in t.to_lowercase().split_whitespace() {
                    let mut hasher = DefaultHasher::new();
                    token.hash(&mut hasher);
                    v[(hasher.finish() as usize) % DIM] += 1.0;
                }
                v
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

struct CannedLlm;

#[async_trait]
impl AnswerModel for CannedLlm {
    async fn complete(
        &self,
        _system: &str,
        user: &str,
        _max: u32,
    ) -> telegram_recall::Result<String> {
        let url = user
            .lines()
            .find_map(|l| l.strip_prefix("URL: "))
            .unwrap_or("none");
        Ok(format!("Based on your messages: see source:{url}"))
    }
}

fn test_config() -> Config {
    Config {
        embedding_model: "local-hash".to_string(),
        embedding_dimension: DIM,
        query_timeout_seconds: 10,
        ..Default::default()
    }
}

fn message(msg_id: i64, sender_id: i64, hms: (u32, u32, u32), text: &str) -> RawMessage {
    RawMessage {
        chat_id: CHAT_ID,
        msg_id,
        sender_id,
        sender_name: format!("User{sender_id}"),
        sender_username: None,
        date: Utc.with_ymd_and_hms(2023, 1, 7, hms.0, hms.1, hms.2).unwrap(),
        text: text.to_string(),
        reply_to_msg_id: None,
    }
}

fn build_service(
    messages: Vec<RawMessage>,
    embedder: HashEmbedder,
) -> (RecallService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new(DIM));
    let fetcher = ExportFetcher::new(
        vec![Chat::new(CHAT_ID, "Site Ops", ChatKind::Supergroup)],
        messages,
    );
    let service = RecallService::new(
        test_config(),
        store.clone() as Arc<dyn Store>,
        Arc::new(fetcher),
        Arc::new(embedder),
        Arc::new(CannedLlm),
    )
    .unwrap();
    (service, store)
}

async fn index_and_wait(service: &RecallService, tenant: i64) -> telegram_recall::IndexingJob {
    let job_id = service.submit_indexing(tenant, vec![CHAT_ID]).await.unwrap();
    service
        .coordinator()
        .wait(tenant, job_id, Duration::from_secs(10))
        .await
        .unwrap()
}

#[tokio::test]
async fn tenant_isolation_follows_membership() {
    let (service, store) = build_service(
        vec![message(56, 7, (14, 17, 29), "Ordered 190 kW generator from Billy Smith.")],
        HashEmbedder::instant(),
    );

    // Tenant A indexes; tenant B merely holds membership of the message.
    let job = index_and_wait(&service, TENANT_A).await;
    assert_eq!(job.status, JobStatus::Completed);

    let message_id = store.message_id(CHAT_ID, 56).await.unwrap().unwrap();
    store.add_membership(TENANT_B, message_id).await.unwrap();

    // B never indexed, but the chunk is already embedded and B is a member.
    let response = service
        .query_answer(TENANT_B, "190 kW generator", SearchFilters::default())
        .await
        .unwrap();
    assert_eq!(response.sources.len(), 1);

    // Revoking B's membership makes the message disappear for B only.
    store.remove_membership(TENANT_B, message_id).await.unwrap();
    let response = service
        .query_answer(TENANT_B, "190 kW generator", SearchFilters::default())
        .await
        .unwrap();
    assert!(response.sources.is_empty());

    let response = service
        .query_answer(TENANT_A, "190 kW generator", SearchFilters::default())
        .await
        .unwrap();
    assert_eq!(response.sources.len(), 1);
}

#[tokio::test]
async fn reindexing_is_idempotent() {
    let (service, store) = build_service(
        vec![
            message(1, 7, (10, 0, 0), "Ordered the generator today."),
            message(2, 8, (10, 5, 0), "About time."),
        ],
        HashEmbedder::instant(),
    );

    let first = index_and_wait(&service, TENANT_A).await;
    assert_eq!(first.status, JobStatus::Completed);
    let stats_after_first = store.stats().await.unwrap();

    let second = index_and_wait(&service, TENANT_A).await;
    assert_eq!(second.status, JobStatus::Completed);

    // Same expected totals, no new chunk or embedding rows, nothing
    // re-embedded.
    assert_eq!(second.messages_total, first.messages_total);
    assert_eq!(second.embeddings_completed, 0);
    assert_eq!(store.stats().await.unwrap(), stats_after_first);

    // Messages stayed unique on (chat, msg_id).
    assert_eq!(store.stats().await.unwrap().messages, 2);
}

#[tokio::test]
async fn single_short_message_yields_one_chunk() {
    let (service, store) = build_service(
        vec![message(1, 7, (10, 0, 0), "short and sweet")],
        HashEmbedder::instant(),
    );
    let job = index_and_wait(&service, TENANT_A).await;
    assert_eq!(job.chunks_produced, 1);
    assert_eq!(store.stats().await.unwrap().chunks, 1);
}

#[tokio::test]
async fn query_length_boundary_is_exact() {
    let (service, _store) = build_service(vec![], HashEmbedder::instant());
    index_and_wait(&service, TENANT_A).await;

    let padding = "pump status ".repeat(50);
    let exactly_max = &padding[..500];
    assert!(service
        .query_answer(TENANT_A, exactly_max, SearchFilters::default())
        .await
        .is_ok());

    let one_over = &padding[..501];
    let err = service
        .query_answer(TENANT_A, one_over, SearchFilters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidQuery(_)));
}

#[tokio::test]
async fn timeline_output_matches_stable_shape() {
    let (service, _store) = build_service(
        vec![
            message(56, 7, (14, 17, 29), "Ordered 190 kW generator from Billy Smith."),
            message(92, 7, (16, 40, 0), "Genny delivery slipped again, new ETA Friday."),
        ],
        HashEmbedder::instant(),
    );
    index_and_wait(&service, TENANT_A).await;

    let timeline = service
        .query_timeline(
            TENANT_A,
            "timeline of 190kw genny delays",
            None,
            SearchFilters::default(),
        )
        .await
        .unwrap();

    let json = serde_json::to_value(&timeline.items).unwrap();
    assert_eq!(
        json,
        serde_json::json!([
            {
                "ts": "2023-01-07T14:17:29Z",
                "text": "Ordered 190 kW generator from Billy Smith.",
                "url": "https://t.me/c/1000/56"
            },
            {
                "ts": "2023-01-07T16:40:00Z",
                "text": "Genny delivery slipped again, new ETA Friday.",
                "url": "https://t.me/c/1000/92"
            }
        ])
    );
}

#[tokio::test]
async fn saved_timeline_round_trips() {
    let (service, _store) = build_service(
        vec![
            message(56, 7, (14, 17, 29), "Ordered 190 kW generator from Billy Smith."),
            message(92, 7, (16, 40, 0), "Genny delivery slipped again."),
        ],
        HashEmbedder::instant(),
    );
    index_and_wait(&service, TENANT_A).await;

    let saved = service
        .query_timeline(
            TENANT_A,
            "genny delays",
            Some("generator saga".to_string()),
            SearchFilters::default(),
        )
        .await
        .unwrap();

    let reloaded = service.get_timeline(TENANT_A, saved.id).await.unwrap();
    assert_eq!(reloaded.items, saved.items);
    assert_eq!(reloaded.query, "genny delays");

    let listed = service.list_timelines(TENANT_A).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].item_count, saved.items.len());
}

#[tokio::test]
async fn reply_to_unfetched_parent_still_chunks() {
    let mut reply = message(10, 7, (10, 0, 0), "No haven't checked");
    reply.reply_to_msg_id = Some(900); // parent outside the fetched range
    let (service, store) = build_service(vec![reply], HashEmbedder::instant());

    let job = index_and_wait(&service, TENANT_A).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.chunks_produced, 1);
    assert_eq!(store.stats().await.unwrap().chunks, 1);

    let response = service
        .query_answer(TENANT_A, "haven't checked", SearchFilters::default())
        .await
        .unwrap();
    assert_eq!(response.sources.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_counters_grow_monotonically() {
    // A slow embedder and many messages keep the job observable mid-flight.
    let messages: Vec<RawMessage> = (1..=40)
        .map(|i| {
            message(
                i,
                i, // distinct senders, so one chunk per message
                (10, (i as u32) % 60, 0),
                &format!("status update number {i} from the site"),
            )
        })
        .collect();
    let (service, _store) = build_service(
        messages,
        HashEmbedder {
            delay: Duration::from_millis(20),
        },
    );

    let job_id = service
        .submit_indexing(TENANT_A, vec![CHAT_ID])
        .await
        .unwrap();

    let mut last = (0u64, 0u64, 0u64);
    loop {
        let job = service.get_job(TENANT_A, job_id).await.unwrap();
        let now = (
            job.messages_processed,
            job.chunks_produced,
            job.embeddings_completed,
        );
        assert!(now.0 >= last.0, "messages_processed went backwards");
        assert!(now.1 >= last.1, "chunks_produced went backwards");
        assert!(now.2 >= last.2, "embeddings_completed went backwards");
        last = now;
        if job.status.is_terminal() {
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.messages_total, Some(40));
            assert_eq!(job.embeddings_completed, 40);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn degraded_answer_when_llm_is_down() {
    struct DownLlm;

    #[async_trait]
    impl AnswerModel for DownLlm {
        async fn complete(
            &self,
            _system: &str,
            _user: &str,
            _max: u32,
        ) -> telegram_recall::Result<String> {
            Err(Error::upstream("llm", "connection refused"))
        }
    }

    let store = Arc::new(MemoryStore::new(DIM));
    let fetcher = ExportFetcher::new(
        vec![Chat::new(CHAT_ID, "Site Ops", ChatKind::Supergroup)],
        vec![message(56, 7, (14, 17, 29), "Ordered the generator.")],
    );
    let service = RecallService::new(
        test_config(),
        store as Arc<dyn Store>,
        Arc::new(fetcher),
        Arc::new(HashEmbedder::instant()),
        Arc::new(DownLlm),
    )
    .unwrap();
    index_and_wait(&service, TENANT_A).await;

    let response = service
        .query_answer(TENANT_A, "generator order", SearchFilters::default())
        .await
        .unwrap();

    assert!(response.degraded);
    assert_eq!(response.sources.len(), 1);
}

#[tokio::test]
async fn chat_filter_restricts_results() {
    let other_chat = -1002000i64;
    let store = Arc::new(MemoryStore::new(DIM));
    let fetcher = ExportFetcher::new(
        vec![
            Chat::new(CHAT_ID, "Site Ops", ChatKind::Supergroup),
            Chat::new(other_chat, "Family", ChatKind::Group),
        ],
        vec![
            message(1, 7, (10, 0, 0), "generator ordered for the site"),
            RawMessage {
                chat_id: other_chat,
                ..message(2, 7, (11, 0, 0), "generator for the cabin arrived")
            },
        ],
    );
    let service = RecallService::new(
        test_config(),
        store as Arc<dyn Store>,
        Arc::new(fetcher),
        Arc::new(HashEmbedder::instant()),
        Arc::new(CannedLlm),
    )
    .unwrap();

    let job_id = service.submit_indexing(TENANT_A, vec![]).await.unwrap();
    service
        .coordinator()
        .wait(TENANT_A, job_id, Duration::from_secs(10))
        .await
        .unwrap();

    let all = service
        .query_answer(TENANT_A, "generator", SearchFilters::default())
        .await
        .unwrap();
    assert_eq!(all.sources.len(), 2);

    let filtered = service
        .query_answer(TENANT_A, "generator", SearchFilters::chats(vec![CHAT_ID]))
        .await
        .unwrap();
    assert_eq!(filtered.sources.len(), 1);
    assert!(filtered.sources[0].url.contains("/1000/"));
}

#[tokio::test]
async fn second_tenant_indexing_same_chat_reuses_embeddings() {
    let (service, store) = build_service(
        vec![message(1, 7, (10, 0, 0), "shared history line")],
        HashEmbedder::instant(),
    );

    index_and_wait(&service, TENANT_A).await;
    let stats = store.stats().await.unwrap();

    let job = index_and_wait(&service, TENANT_B).await;
    assert_eq!(job.status, JobStatus::Completed);
    // Cross-tenant dedup: no new provider work, no new rows.
    assert_eq!(job.embeddings_completed, 0);
    assert_eq!(store.stats().await.unwrap(), stats);

    // Both tenants can retrieve it.
    for tenant in [TENANT_A, TENANT_B] {
        let response = service
            .query_answer(tenant, "shared history", SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(response.sources.len(), 1);
    }
}
