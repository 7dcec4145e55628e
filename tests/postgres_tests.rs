// tests/postgres_tests.rs
//
// Runs against a real database: `DATABASE_URL=... cargo test -- --ignored`

use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use serde_json::Value;
use threadboard::{
    config::Config,
    engine::{counters, ledger, tree},
    models::{comment::Container, post::NewPost, vote::VoteTarget},
    routes,
    state::AppState,
    store::{PgStore, Store, StoreTx},
};
use tower::ServiceExt;

async fn store() -> Arc<dyn Store> {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PgStore::connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing.");
    store.migrate().await.expect("Failed to migrate database");
    Arc::new(store)
}

fn unique_user() -> String {
    format!("u_{}", &uuid::Uuid::new_v4().to_string()[..8])
}

async fn seed_post(store: &dyn Store, author: &str) -> i64 {
    let mut tx = store.begin().await.unwrap();
    let post = tx
        .insert_post(&NewPost {
            author_id: author.to_string(),
            title: "Postgres post".to_string(),
            url: None,
            content: Some("body".to_string()),
        })
        .await
        .unwrap();
    tx.commit().await.unwrap();
    post.id
}

#[tokio::test]
#[ignore]
async fn concurrent_toggles_keep_points_consistent() {
    let store = store().await;
    let author = unique_user();
    let post_id = seed_post(store.as_ref(), &author).await;
    let voter = unique_user();

    let mut handles = Vec::new();
    for _ in 0..9 {
        let store = store.clone();
        let voter = voter.clone();
        handles.push(tokio::spawn(async move {
            ledger::toggle(store.as_ref(), &voter, VoteTarget::post(post_id)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let post = tree::get_post(store.as_ref(), post_id, Some(&voter))
        .await
        .unwrap();
    assert_eq!(post.points, 1);
    assert!(post.is_upvoted);
}

#[tokio::test]
#[ignore]
async fn nested_replies_update_ancestors() {
    let store = store().await;
    let author = unique_user();
    let post_id = seed_post(store.as_ref(), &author).await;

    let top = counters::create_comment(store.as_ref(), &author, Container::Post(post_id), "top")
        .await
        .unwrap();
    let reply =
        counters::create_comment(store.as_ref(), &author, Container::Comment(top.id), "reply")
            .await
            .unwrap();
    counters::create_comment(store.as_ref(), &author, Container::Comment(reply.id), "deeper")
        .await
        .unwrap();

    let post = tree::get_post(store.as_ref(), post_id, None).await.unwrap();
    assert_eq!(post.comment_count, 3);

    let mut tx = store.snapshot().await.unwrap();
    let top = tx.find_comment(top.id, None).await.unwrap().unwrap();
    assert_eq!(top.comment_count, 2);
}

#[tokio::test]
#[ignore]
async fn router_serves_post_from_postgres() {
    let store = store().await;
    let post_id = seed_post(store.as_ref(), &unique_user()).await;
    let app = routes::create_router(AppState {
        store,
        config: Config::for_testing("postgres_test_secret"),
    });

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/posts/{post_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["data"]["id"], post_id);
    assert_eq!(json["data"]["commentCount"], 0);
}
