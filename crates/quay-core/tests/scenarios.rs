//! Scenarios - request surface を通したエンドツーエンドのシナリオ

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use serde_json::{Value, json};

use quay_core::app::{ApiRequest, ApiResponse, Method, QueueService, ServiceConfig, dispatch};
use quay_core::impls::{InMemoryQueueDirectory, InMemoryStoreFactory, RedbStoreFactory};
use quay_core::ports::{FixedClock, StoreFactory};

const BODIES: [&str; 5] = ["every", "good", "boy", "does", "fine"];

struct Harness {
    service: QueueService,
    clock: Arc<FixedClock>,
}

impl Harness {
    fn new() -> Self {
        Self::with_stores(Arc::new(InMemoryStoreFactory::new()))
    }

    fn with_stores(stores: Arc<dyn StoreFactory>) -> Self {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let service = QueueService::new(
            ServiceConfig::default(),
            Arc::new(InMemoryQueueDirectory::new()),
            stores,
            clock.clone(),
        );
        Self { service, clock }
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> ApiResponse {
        dispatch(
            &self.service,
            ApiRequest {
                method,
                path: path.to_string(),
                body,
            },
        )
        .await
    }

    async fn create_queue(&self) -> String {
        let response = self.call(Method::Post, "/queues", Some(json!({}))).await;
        assert_eq!(response.status, 201, "{:?}", response.body);
        response.body["queue_id"].as_str().unwrap().to_string()
    }

    async fn enqueue(&self, queue: &str, body: &str) -> ApiResponse {
        self.call(
            Method::Post,
            &format!("/queues/{queue}/messages"),
            Some(json!({ "message_body": body })),
        )
        .await
    }

    async fn lease(&self, queue: &str, query: &str) -> Vec<Value> {
        let response = self
            .call(Method::Get, &format!("/queues/{queue}/messages?{query}"), None)
            .await;
        assert_eq!(response.status, 200, "{:?}", response.body);
        response.body["messages"].as_array().unwrap().clone()
    }

    async fn acknowledge(&self, queue: &str, message_id: &str, receipt: &str) -> ApiResponse {
        self.call(
            Method::Delete,
            &format!("/queues/{queue}/messages/{message_id}?pop_receipt={receipt}"),
            None,
        )
        .await
    }

    async fn seeded(&self) -> String {
        let queue = self.create_queue().await;
        for body in BODIES {
            assert_eq!(self.enqueue(&queue, body).await.status, 202);
        }
        queue
    }
}

fn bodies(messages: &[Value]) -> Vec<&str> {
    messages
        .iter()
        .map(|m| m["message_body"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn lease_all_returns_enqueue_order() {
    let h = Harness::new();
    let q = h.seeded().await;
    assert_eq!(bodies(&h.lease(&q, "limit=10").await), BODIES.to_vec());
}

#[tokio::test]
async fn lease_two_leaves_three_visible() {
    let h = Harness::new();
    let q = h.seeded().await;

    assert_eq!(bodies(&h.lease(&q, "limit=2").await), vec!["every", "good"]);
    assert_eq!(
        bodies(&h.lease(&q, "limit=10").await),
        vec!["boy", "does", "fine"]
    );
}

#[tokio::test]
async fn lease_reports_visibility_timeout() {
    let h = Harness::new();
    let q = h.seeded().await;

    let leased = h.lease(&q, "limit=10&visibility_timeout=69").await;
    assert_eq!(leased.len(), 5);
    assert!(leased.iter().all(|m| m["visibility_timeout"] == 69));
}

#[tokio::test]
async fn lease_one_then_the_rest() {
    let h = Harness::new();
    let q = h.seeded().await;

    assert_eq!(bodies(&h.lease(&q, "").await), vec!["every"]);
    assert_eq!(
        bodies(&h.lease(&q, "limit=10").await),
        vec!["good", "boy", "does", "fine"]
    );
}

#[tokio::test]
async fn expired_lease_makes_the_message_visible_again() {
    let h = Harness::new();
    let q = h.seeded().await;

    let first = h.lease(&q, "visibility_timeout=10").await;
    h.lease(&q, "limit=4&visibility_timeout=100").await;
    assert!(h.lease(&q, "limit=10").await.is_empty());

    h.clock.advance(Duration::seconds(10));
    let again = h.lease(&q, "limit=10").await;
    assert_eq!(bodies(&again), vec!["every"]);
    assert_eq!(again[0]["message_id"], first[0]["message_id"]);
    assert_ne!(again[0]["pop_receipt"], first[0]["pop_receipt"]);
}

#[tokio::test]
async fn zero_visibility_timeout_is_immediately_eligible() {
    let h = Harness::new();
    let q = h.create_queue().await;
    h.enqueue(&q, "again").await;

    let first = h.lease(&q, "visibility_timeout=0").await;
    let second = h.lease(&q, "visibility_timeout=0").await;
    assert_eq!(first[0]["message_id"], second[0]["message_id"]);
}

#[tokio::test]
async fn acknowledged_message_never_returns() {
    let h = Harness::new();
    let q = h.create_queue().await;
    h.enqueue(&q, "once").await;

    let leased = h.lease(&q, "visibility_timeout=0").await;
    let id = leased[0]["message_id"].as_str().unwrap();
    let receipt = leased[0]["pop_receipt"].as_str().unwrap();
    assert_eq!(h.acknowledge(&q, id, receipt).await.body, json!("OK"));

    h.clock.advance(Duration::minutes(5));
    assert!(h.lease(&q, "limit=10").await.is_empty());

    // receipt は使い捨て
    assert_eq!(h.acknowledge(&q, id, receipt).await.status, 400);
}

#[tokio::test]
async fn wrong_receipt_leaves_the_lease_alone() {
    let h = Harness::new();
    let q = h.create_queue().await;
    h.enqueue(&q, "held").await;

    let leased = h.lease(&q, "visibility_timeout=30").await;
    let id = leased[0]["message_id"].as_str().unwrap();
    let bogus = ulid::Ulid::new().to_string();
    assert_eq!(h.acknowledge(&q, id, &bogus).await.status, 400);

    h.clock.advance(Duration::seconds(30));
    let again = h.lease(&q, "").await;
    assert_eq!(again[0]["message_id"], leased[0]["message_id"]);
}

#[tokio::test]
async fn empty_body_is_invalid() {
    let h = Harness::new();
    let q = h.create_queue().await;
    assert_eq!(h.enqueue(&q, "").await.status, 400);
}

#[tokio::test]
async fn bogus_acknowledge_on_empty_queue_is_invalid() {
    let h = Harness::new();
    let q = h.create_queue().await;

    let response = h.acknowledge(&q, "X", "bogus").await;
    assert_eq!(response.status, 400);
    assert!(response.body["error"].is_string());
}

#[tokio::test]
async fn deleted_queue_rejects_everything() {
    let h = Harness::new();
    let q = h.seeded().await;
    let leased = h.lease(&q, "").await;

    let deleted = h.call(Method::Delete, &format!("/queues/{q}"), None).await;
    assert_eq!(deleted.status, 200);

    assert_eq!(h.enqueue(&q, "late").await.status, 404);
    let lease = h
        .call(Method::Get, &format!("/queues/{q}/messages"), None)
        .await;
    assert_eq!(lease.status, 404);
    let ack = h
        .acknowledge(
            &q,
            leased[0]["message_id"].as_str().unwrap(),
            leased[0]["pop_receipt"].as_str().unwrap(),
        )
        .await;
    assert_eq!(ack.status, 404);
    assert_eq!(
        h.call(Method::Get, &format!("/queues/{q}"), None)
            .await
            .status,
        404
    );
}

#[tokio::test]
async fn listing_paginates_with_cursor() {
    let h = Harness {
        service: QueueService::new(
            ServiceConfig {
                list_page_size: 2,
                ..ServiceConfig::default()
            },
            Arc::new(InMemoryQueueDirectory::new()),
            Arc::new(InMemoryStoreFactory::new()),
            Arc::new(FixedClock::new(Utc::now())),
        ),
        clock: Arc::new(FixedClock::new(Utc::now())),
    };
    let mut created = Vec::new();
    for _ in 0..5 {
        created.push(h.create_queue().await);
    }

    let mut seen = Vec::new();
    let mut path = "/queues".to_string();
    loop {
        let page = h.call(Method::Get, &path, None).await;
        assert_eq!(page.status, 200);
        for queue in page.body["queues"].as_array().unwrap() {
            seen.push(queue["queue_id"].as_str().unwrap().to_string());
        }
        match page.body.get("cursor").and_then(Value::as_str) {
            Some(cursor) => path = format!("/queues?cursor={cursor}"),
            None => break,
        }
    }

    created.sort();
    seen.sort();
    assert_eq!(seen, created);
}

#[tokio::test]
async fn redb_backed_queues_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    // 1 つ目のサービスのアクタータスクがまだ Database を握っていても使えるよう、
    // ファクトリは共有する
    let stores = Arc::new(RedbStoreFactory::create(dir.path().join("quay.redb")).unwrap());

    let (q, message_id) = {
        let h = Harness::with_stores(stores.clone());
        let q = h.create_queue().await;
        h.enqueue(&q, "durable").await;
        let leased = h.lease(&q, "visibility_timeout=0").await;
        (q, leased[0]["message_id"].clone())
    };

    let h = Harness::with_stores(stores);
    assert_eq!(h.service.restore().await.unwrap(), 1);

    h.enqueue(&q, "after restart").await;
    let leased = h.lease(&q, "limit=10").await;
    assert_eq!(bodies(&leased), vec!["durable", "after restart"]);
    assert_eq!(leased[0]["message_id"], message_id);
}

#[tokio::test]
async fn redb_file_reopens_after_the_factory_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("quay.redb");

    let q = {
        let stores = Arc::new(RedbStoreFactory::create(&path).unwrap());
        let h = Harness::with_stores(stores);
        let q = h.create_queue().await;
        h.enqueue(&q, "kept").await;
        let gone = h.create_queue().await;
        h.call(Method::Delete, &format!("/queues/{gone}"), None).await;
        q
    };
    // アクタータスクが Arc<Database> を手放すまで待つ
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let stores = Arc::new(RedbStoreFactory::create(&path).unwrap());
    let h = Harness::with_stores(stores);
    assert_eq!(h.service.restore().await.unwrap(), 1);
    assert_eq!(bodies(&h.lease(&q, "limit=10").await), vec!["kept"]);
}

#[tokio::test]
async fn huge_visibility_timeout_does_not_wrap_around() {
    let h = Harness::new();
    let q = h.create_queue().await;
    h.enqueue(&q, "a").await;
    h.enqueue(&q, "b").await;

    assert_eq!(
        bodies(&h.lease(&q, "visibility_timeout=279770866311").await),
        vec!["a"]
    );
    assert_eq!(bodies(&h.lease(&q, "limit=10").await), vec!["b"]);
}
