//! Redis Staging Queue Integration Tests
//!
//! These tests require Redis to be running:
//! docker run -d -p 6379:6379 redis:7
//!
//! Each test works on its own queue so runs never see each other's entries.

#![cfg(feature = "redis")]

use std::sync::Arc;
use std::time::Duration;

use ted_queue::{QueueError, RedisStagingBackend, RedisStagingConfig, StagingMetrics, StagingQueue};

const REDIS_ADDR: &str = "127.0.0.1:6379";

async fn is_redis_available() -> bool {
    matches!(
        tokio::time::timeout(
            Duration::from_secs(2),
            tokio::net::TcpStream::connect(REDIS_ADDR)
        )
        .await,
        Ok(Ok(_))
    )
}

async fn create_staging(lease: Duration) -> StagingQueue {
    let config = RedisStagingConfig {
        url: format!("redis://{}", REDIS_ADDR),
        namespace: "ted-test".to_string(),
        queue_name: format!("projection-{}", uuid::Uuid::new_v4()),
    };
    let backend = RedisStagingBackend::connect(config)
        .await
        .expect("Failed to connect to Redis");
    StagingQueue::new(Arc::new(backend)).with_lease(lease)
}

#[tokio::test]
async fn test_setup_is_idempotent() {
    if !is_redis_available().await {
        eprintln!("Skipping test - Redis not available");
        return;
    }

    let staging = create_staging(Duration::from_secs(60)).await;
    staging.setup().await.unwrap();
    staging.setup().await.unwrap();
}

#[tokio::test]
async fn test_push_peek_remove() {
    if !is_redis_available().await {
        eprintln!("Skipping test - Redis not available");
        return;
    }

    let staging = create_staging(Duration::from_secs(60)).await;
    staging.setup().await.unwrap();

    staging.push_pending("users/42/posts/7").await.unwrap();
    staging.push_pending("users").await.unwrap();

    let first = staging.peek_pending().await.expect("entry expected");
    assert_eq!(first.payload, "users/42/posts");
    assert_eq!(first.receive_count, 1);

    let second = staging.peek_pending().await.expect("entry expected");
    assert_eq!(second.payload, "users");
    assert!(staging.peek_pending().await.is_none());

    assert_eq!(
        staging.metrics().await.unwrap(),
        StagingMetrics { visible: 0, leased: 2 }
    );

    staging.remove_pending(&first.lease_id).await.unwrap();
    staging.remove_pending(&second.lease_id).await.unwrap();
    assert!(matches!(
        staging.remove_pending(&first.lease_id).await,
        Err(QueueError::NotFound(_))
    ));
    assert_eq!(staging.metrics().await.unwrap(), StagingMetrics::default());
}

#[tokio::test]
async fn test_expired_lease_is_redelivered() {
    if !is_redis_available().await {
        eprintln!("Skipping test - Redis not available");
        return;
    }

    let staging = create_staging(Duration::from_millis(200)).await;
    staging.setup().await.unwrap();
    staging.push_pending("users/42/posts").await.unwrap();

    let first = staging.peek_pending().await.expect("entry expected");
    assert!(staging.peek_pending().await.is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;

    let second = staging.peek_pending().await.expect("entry redelivered");
    assert_eq!(second.message_id, first.message_id);
    assert_eq!(second.receive_count, 2);

    assert!(staging.remove_pending(&first.lease_id).await.is_err());
    staging.remove_pending(&second.lease_id).await.unwrap();
}
