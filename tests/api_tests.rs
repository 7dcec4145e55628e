// tests/api_tests.rs

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Value, json};
use threadboard::{
    config::Config,
    routes,
    state::AppState,
    store::{MemoryStore, Store},
    utils::session::issue_session,
};

const SECRET: &str = "test_secret_for_integration_tests";

struct TestApp {
    address: String,
    client: reqwest::Client,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.address, path)
    }

    async fn get(&self, path: &str, user: Option<&str>) -> (u16, Value) {
        let mut request = self.client.get(self.url(path));
        if let Some(user) = user {
            request = request.header("Cookie", format!("session={}", token(user)));
        }
        let response = request.send().await.expect("Failed to execute request");
        let status = response.status().as_u16();
        (status, response.json().await.expect("Failed to parse json"))
    }

    async fn post(&self, path: &str, user: Option<&str>, body: Value) -> (u16, Value) {
        let mut request = self.client.post(self.url(path)).json(&body);
        if let Some(user) = user {
            request = request.header("Cookie", format!("session={}", token(user)));
        }
        let response = request.send().await.expect("Failed to execute request");
        let status = response.status().as_u16();
        (status, response.json().await.expect("Failed to parse json"))
    }

    async fn create_post(&self, user: &str, title: &str) -> i64 {
        let (status, body) = self
            .post(
                "/posts",
                Some(user),
                json!({ "title": title, "content": "Some body text" }),
            )
            .await;
        assert_eq!(status, 201, "{body}");
        body["data"]["postId"].as_i64().expect("postId missing")
    }

    async fn comment(&self, path: &str, user: &str, content: &str) -> Value {
        let (status, body) = self
            .post(path, Some(user), json!({ "content": content }))
            .await;
        assert_eq!(status, 201, "{body}");
        body["data"].clone()
    }
}

fn token(user: &str) -> String {
    issue_session(&Config::for_testing(SECRET), user).expect("Failed to sign session")
}

/// Spawns the app on a random port over the in-memory store.
async fn spawn_app() -> TestApp {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let state = AppState {
        store,
        config: Config::for_testing(SECRET),
    };
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        client: reqwest::Client::new(),
    }
}

fn ids(body: &Value) -> Vec<i64> {
    body["data"]
        .as_array()
        .expect("data is not an array")
        .iter()
        .map(|item| item["id"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn unknown_route_returns_error_envelope() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(format!("{}/random_path_that_does_not_exist", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["isFormError"], false);
}

#[tokio::test]
async fn writes_require_a_session() {
    let app = spawn_app().await;

    let (status, body) = app
        .post("/posts", None, json!({ "title": "Hello", "content": "World" }))
        .await;
    assert_eq!(status, 401);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Unauthorized");

    let response = app
        .client
        .post(app.url("/posts/1/upvote"))
        .header("Cookie", "session=not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn bearer_header_is_accepted() {
    let app = spawn_app().await;

    let response = app
        .client
        .post(app.url("/posts"))
        .header("Authorization", format!("Bearer {}", token("dana")))
        .json(&json!({ "title": "Via header", "url": "https://example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
}

#[tokio::test]
async fn invalid_post_is_a_form_error() {
    let app = spawn_app().await;

    let (status, body) = app
        .post("/posts", Some("alice"), json!({ "title": "Hi", "content": "x" }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["isFormError"], true);
    assert_eq!(body["error"], "Title must be between 3 and 100 characters");

    let (status, body) = app
        .post("/posts", Some("alice"), json!({ "title": "No body at all" }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Either URL or content must be provided");
}

#[tokio::test]
async fn script_only_post_is_a_form_error() {
    let app = spawn_app().await;

    let (status, body) = app
        .post(
            "/posts",
            Some("alice"),
            json!({ "title": "Sneaky post", "content": "<script>alert(1)</script>" }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["isFormError"], true);
    assert_eq!(body["error"], "Either URL or content must be provided");

    let (_, body) = app.get("/posts", None).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn post_title_is_sanitized() {
    let app = spawn_app().await;
    let id = app
        .create_post("alice", "<img src=x onerror=alert(1)>Hello there")
        .await;

    let (_, body) = app.get(&format!("/posts/{id}"), None).await;
    let title = body["data"]["title"].as_str().unwrap();
    assert!(!title.contains("onerror"), "{title}");
    assert!(title.ends_with("Hello there"), "{title}");
}

#[tokio::test]
async fn post_round_trip() {
    let app = spawn_app().await;
    let id = app.create_post("alice", "First post").await;

    let (status, body) = app.get(&format!("/posts/{id}"), None).await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    let post = &body["data"];
    assert_eq!(post["title"], "First post");
    assert_eq!(post["authorId"], "alice");
    assert_eq!(post["points"], 0);
    assert_eq!(post["commentCount"], 0);
    assert_eq!(post["isUpvoted"], false);
}

#[tokio::test]
async fn missing_resources_are_404() {
    let app = spawn_app().await;

    let (status, body) = app.get("/posts/999", None).await;
    assert_eq!(status, 404);
    assert_eq!(body["isFormError"], false);

    let (status, _) = app.get("/posts/999/comments", None).await;
    assert_eq!(status, 404);

    let (status, _) = app.post("/comments/999/upvote", Some("alice"), json!({})).await;
    assert_eq!(status, 404);

    let (status, _) = app
        .post("/comments/999", Some("alice"), json!({ "content": "orphan reply" }))
        .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn post_without_comments_has_zero_pages() {
    let app = spawn_app().await;
    let id = app.create_post("alice", "Quiet post").await;

    let (status, body) = app.get(&format!("/posts/{id}/comments"), None).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"], json!([]));
    assert_eq!(body["pagination"], json!({ "page": 1, "totalPages": 0 }));
}

#[tokio::test]
async fn comment_pages_cover_every_comment_once() {
    let app = spawn_app().await;
    let id = app.create_post("alice", "Busy post").await;
    for i in 0..5 {
        app.comment(&format!("/posts/{id}/comment"), "bob", &format!("comment number {i}"))
            .await;
    }

    let mut seen = HashSet::new();
    for page in 1..=3 {
        let (status, body) = app
            .get(
                &format!("/posts/{id}/comments?page={page}&limit=2&sortBy=recent&order=asc"),
                None,
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["pagination"]["totalPages"], 3);
        assert_eq!(body["pagination"]["page"], page);
        for comment_id in ids(&body) {
            assert!(seen.insert(comment_id), "duplicate comment {comment_id}");
        }
    }
    assert_eq!(seen.len(), 5);

    let (status, body) = app
        .get(&format!("/posts/{id}/comments?page=4&limit=2"), None)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"], json!([]));
    assert_eq!(body["pagination"]["totalPages"], 3);
}

#[tokio::test]
async fn recent_order_is_reversible() {
    let app = spawn_app().await;
    let first = app.create_post("alice", "Older post").await;
    let second = app.create_post("alice", "Newer post").await;

    let (_, newest) = app.get("/posts?sortBy=recent&order=desc", None).await;
    assert_eq!(ids(&newest), vec![second, first]);

    let (_, oldest) = app.get("/posts?sortBy=recent&order=asc", None).await;
    assert_eq!(ids(&oldest), vec![first, second]);
}

#[tokio::test]
async fn invalid_listing_parameters_are_rejected() {
    let app = spawn_app().await;

    let (status, body) = app.get("/posts?page=0", None).await;
    assert_eq!(status, 400);
    assert_eq!(body["isFormError"], true);

    let (status, _) = app.get("/posts?limit=500", None).await;
    assert_eq!(status, 400);

    let (status, _) = app.get("/posts?sortBy=random", None).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn replies_update_every_ancestor_count() {
    let app = spawn_app().await;
    let post_id = app.create_post("alice", "Threaded post").await;

    let top = app
        .comment(&format!("/posts/{post_id}/comment"), "bob", "top level")
        .await;
    let top_id = top["id"].as_i64().unwrap();
    assert_eq!(top["depth"], 0);

    let reply = app
        .comment(&format!("/comments/{top_id}"), "carol", "first reply")
        .await;
    let reply_id = reply["id"].as_i64().unwrap();
    assert_eq!(reply["depth"], 1);
    assert_eq!(reply["parentCommentId"], top_id);

    let nested = app
        .comment(&format!("/comments/{reply_id}"), "dana", "reply to the reply")
        .await;
    assert_eq!(nested["depth"], 2);
    assert_eq!(nested["postId"], post_id);

    let (_, post) = app.get(&format!("/posts/{post_id}"), None).await;
    assert_eq!(post["data"]["commentCount"], 3);

    let (_, listing) = app.get(&format!("/posts/{post_id}/comments"), None).await;
    assert_eq!(ids(&listing), vec![top_id]);
    assert_eq!(listing["data"][0]["commentCount"], 2);

    let (_, replies) = app.get(&format!("/comments/{top_id}/comments"), None).await;
    assert_eq!(ids(&replies), vec![reply_id]);
    assert_eq!(replies["data"][0]["commentCount"], 1);
}

#[tokio::test]
async fn include_children_attaches_first_reply_page() {
    let app = spawn_app().await;
    let post_id = app.create_post("alice", "Preview post").await;
    let top = app
        .comment(&format!("/posts/{post_id}/comment"), "bob", "top level")
        .await;
    let top_id = top["id"].as_i64().unwrap();
    for i in 0..3 {
        app.comment(&format!("/comments/{top_id}"), "carol", &format!("reply {i}"))
            .await;
    }
    let lonely = app
        .comment(&format!("/posts/{post_id}/comment"), "bob", "no replies here")
        .await;

    let (_, listing) = app
        .get(
            &format!("/posts/{post_id}/comments?includeChildren=true&sortBy=recent&order=asc"),
            None,
        )
        .await;
    let comments = listing["data"].as_array().unwrap();
    assert_eq!(comments[0]["id"], top_id);
    assert_eq!(comments[0]["childComments"].as_array().unwrap().len(), 2);
    assert_eq!(comments[1]["id"], lonely["id"]);
    assert!(comments[1].get("childComments").is_none());

    let (_, plain) = app.get(&format!("/posts/{post_id}/comments"), None).await;
    assert!(plain["data"][0].get("childComments").is_none());
}

#[tokio::test]
async fn upvote_toggles_per_user() {
    let app = spawn_app().await;
    let id = app.create_post("alice", "Vote on me").await;
    let path = format!("/posts/{id}/upvote");

    let (status, body) = app.post(&path, Some("bob"), json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"], json!({ "count": 1, "isUpvoted": true }));

    let (_, body) = app.post(&path, Some("carol"), json!({})).await;
    assert_eq!(body["data"], json!({ "count": 2, "isUpvoted": true }));

    let (_, as_bob) = app.get(&format!("/posts/{id}"), Some("bob")).await;
    assert_eq!(as_bob["data"]["isUpvoted"], true);
    let (_, anonymous) = app.get(&format!("/posts/{id}"), None).await;
    assert_eq!(anonymous["data"]["isUpvoted"], false);
    assert_eq!(anonymous["data"]["points"], 2);

    let (_, body) = app.post(&path, Some("bob"), json!({})).await;
    assert_eq!(body["data"], json!({ "count": 1, "isUpvoted": false }));
}

#[tokio::test]
async fn comment_upvote_reports_new_count() {
    let app = spawn_app().await;
    let post_id = app.create_post("alice", "Comment votes").await;
    let comment = app
        .comment(&format!("/posts/{post_id}/comment"), "bob", "vote this")
        .await;
    let comment_id = comment["id"].as_i64().unwrap();

    let (status, body) = app
        .post(&format!("/comments/{comment_id}/upvote"), Some("carol"), json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Comment updated");
    assert_eq!(body["data"]["count"], 1);
    assert_eq!(body["data"]["isUpvoted"], true);
}

#[tokio::test]
async fn concurrent_toggles_settle_on_parity() {
    let app = Arc::new(spawn_app().await);
    let id = app.create_post("alice", "Hammered post").await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            app.post(&format!("/posts/{id}/upvote"), Some("bob"), json!({}))
                .await
        }));
    }
    for handle in handles {
        let (status, _) = handle.await.unwrap();
        assert_eq!(status, 200);
    }

    let (_, body) = app.get(&format!("/posts/{id}"), Some("bob")).await;
    assert_eq!(body["data"]["points"], 0);
    assert_eq!(body["data"]["isUpvoted"], false);
}

#[tokio::test]
async fn site_filter_matches_url_substring() {
    let app = spawn_app().await;
    let (status, _) = app
        .post(
            "/posts",
            Some("alice"),
            json!({ "title": "Linked story", "url": "https://news.Example.org/a" }),
        )
        .await;
    assert_eq!(status, 201);
    app.create_post("bob", "Text only").await;

    let (_, body) = app.get("/posts?site=example.org", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["title"], "Linked story");

    let (_, body) = app.get("/posts?author=bob", None).await;
    assert_eq!(body["data"][0]["title"], "Text only");
    assert_eq!(body["pagination"]["totalPages"], 1);
}
