//! Write-to-projection flow tests
//!
//! Wires the whole pipeline in process: write hook -> SQLite staging -> drainer ->
//! in-memory broker -> router -> registered projection.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sqlx::sqlite::SqlitePoolOptions;

use ted_common::DocumentPath;
use ted_projection::{
    DrainerConfig, ProjectionPipeline, ProjectionRegistry, ProjectionRouter, StagingDrainer,
};
use ted_queue::{
    projection_fn, CallbackError, InMemoryBroker, ProjectionCallback, SqliteStagingBackend,
    StagingQueue, TaskBroker,
};

struct Harness {
    pipeline: ProjectionPipeline,
    drainer: StagingDrainer,
    broker: InMemoryBroker,
    registry: Arc<ProjectionRegistry>,
}

async fn create_harness() -> Harness {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let staging = Arc::new(StagingQueue::new(Arc::new(SqliteStagingBackend::new(
        pool,
        "projection-tasks",
    ))));
    staging.setup().await.unwrap();

    let registry = Arc::new(ProjectionRegistry::new());
    let broker = InMemoryBroker::new("projection-tasks");

    Harness {
        pipeline: ProjectionPipeline::new(registry.clone(), staging.clone()),
        drainer: StagingDrainer::new(DrainerConfig::default(), staging, Arc::new(broker.clone())),
        broker,
        registry,
    }
}

fn recorder(log: Arc<Mutex<Vec<String>>>) -> Arc<dyn ProjectionCallback> {
    Arc::new(projection_fn(move |path: DocumentPath| {
        let log = log.clone();
        async move {
            log.lock().push(path.to_string());
            Ok::<(), CallbackError>(())
        }
    }))
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test]
async fn test_writes_are_projected_per_collection() {
    let harness = create_harness().await;
    let posts = Arc::new(Mutex::new(Vec::new()));
    let users = Arc::new(Mutex::new(Vec::new()));
    harness.registry.register("users/posts", recorder(posts.clone())).unwrap();
    harness.registry.register("users", recorder(users.clone())).unwrap();

    assert!(harness.pipeline.after_write("users/42/posts/7").await.unwrap());
    assert!(harness.pipeline.after_write("users/42").await.unwrap());
    assert!(!harness.pipeline.after_write("orders/1").await.unwrap());

    assert_eq!(harness.drainer.drain_once().await.unwrap(), 2);

    let router = Arc::new(ProjectionRouter::new(harness.registry.clone()));
    let subscription = harness.broker.run_tasks(router, 1).await.unwrap();
    wait_for(|| harness.broker.acknowledged() == 2).await;
    subscription.stop().await.unwrap();

    assert_eq!(*posts.lock(), vec!["users/42/posts"]);
    assert_eq!(*users.lock(), vec!["users"]);
}

#[tokio::test]
async fn test_registration_removed_before_delivery() {
    let harness = create_harness().await;
    let posts = Arc::new(Mutex::new(Vec::new()));
    harness.registry.register("users/posts", recorder(posts.clone())).unwrap();

    harness.pipeline.after_write("users/42/posts/7").await.unwrap();
    harness.drainer.drain_once().await.unwrap();
    harness.registry.unregister("users/posts");

    let router = Arc::new(ProjectionRouter::new(harness.registry.clone()));
    let subscription = harness.broker.run_tasks(router, 1).await.unwrap();
    wait_for(|| harness.broker.acknowledged() == 1).await;
    subscription.stop().await.unwrap();

    assert!(posts.lock().is_empty());
    assert_eq!(harness.broker.rejected(), 0);
}
