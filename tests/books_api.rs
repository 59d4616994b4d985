use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use libris_app::modules::{
    self,
    books::{
        create_module,
        models::{Book, BookChanges, NewBook},
        store::BookStore,
    },
};
use libris_db::{Database, DbError};
use libris_kernel::ModuleRegistry;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn app() -> Router {
    let db = Database::in_memory().await.unwrap();
    let mut registry = ModuleRegistry::new();
    modules::register_all(&mut registry, &db);
    db.migrate(&registry.collect_migrations()).await.unwrap();
    libris_http::build_router(&registry)
}

fn app_with_store(store: Arc<dyn BookStore>) -> Router {
    let mut registry = ModuleRegistry::new();
    registry.register(create_module(store));
    libris_http::build_router(&registry)
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<&str>) -> Reply {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(raw) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(raw.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    Reply {
        status,
        headers,
        body,
    }
}

const DUNE: &str =
    r#"{"title":"Dune","author":"Herbert","genre":"SciFi","published_year":1965,"isbn":"123"}"#;

async fn create_dune(router: &Router) -> i64 {
    let reply = send(router, Method::POST, "/books", Some(DUNE)).await;
    assert_eq!(reply.status, StatusCode::CREATED);
    reply.body["id"].as_i64().unwrap()
}

async fn book_count(router: &Router) -> usize {
    let reply = send(router, Method::GET, "/books", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    reply.body.as_array().unwrap().len()
}

#[tokio::test]
async fn dune_lifecycle() {
    let router = app().await;

    let created = send(&router, Method::POST, "/books", Some(DUNE)).await;
    assert_eq!(created.status, StatusCode::CREATED);
    let id = created.body["id"].as_i64().expect("integer id");
    assert_eq!(
        created.body,
        json!({
            "id": id,
            "title": "Dune",
            "author": "Herbert",
            "genre": "SciFi",
            "published_year": 1965,
            "isbn": "123",
            "availability": false
        })
    );

    let fetched = send(&router, Method::GET, &format!("/books/{id}"), None).await;
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.body, created.body);

    let deleted = send(&router, Method::DELETE, &format!("/books/{id}"), None).await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.body, json!({"message": "Book deleted"}));

    let gone = send(&router, Method::GET, &format!("/books/{id}"), None).await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
    assert_eq!(gone.body, json!({"error": "Book not found"}));
}

#[tokio::test]
async fn list_starts_empty_and_grows() {
    let router = app().await;

    let empty = send(&router, Method::GET, "/books", None).await;
    assert_eq!(empty.status, StatusCode::OK);
    assert_eq!(empty.body, json!([]));

    create_dune(&router).await;
    create_dune(&router).await;

    assert_eq!(book_count(&router).await, 2);
}

#[tokio::test]
async fn unknown_or_malformed_ids_are_not_found() {
    let router = app().await;
    create_dune(&router).await;

    for id in ["999", "0", "-1", "abc", "1.5"] {
        let reply = send(&router, Method::GET, &format!("/books/{id}"), None).await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND, "id {id}");
        assert_eq!(reply.body["error"], "Book not found");
    }
}

#[tokio::test]
async fn create_rejects_each_missing_required_field() {
    let router = app().await;
    let complete: Value = serde_json::from_str(DUNE).unwrap();

    for field in ["title", "author", "genre", "published_year", "isbn"] {
        let mut payload = complete.clone();
        payload.as_object_mut().unwrap().remove(field);

        let reply = send(&router, Method::POST, "/books", Some(&payload.to_string())).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST, "without {field}");
        assert!(
            reply.body["error"].as_str().unwrap().contains(field),
            "error for {field}: {}",
            reply.body
        );
    }

    assert_eq!(book_count(&router).await, 0);
}

#[tokio::test]
async fn create_rejects_zero_values() {
    let router = app().await;

    let reply = send(
        &router,
        Method::POST,
        "/books",
        Some(r#"{"title":"","author":"Herbert","genre":"SciFi","published_year":0,"isbn":"123"}"#),
    )
    .await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.body["error"],
        "missing required field(s): title, published_year"
    );
    assert_eq!(book_count(&router).await, 0);
}

#[tokio::test]
async fn create_rejects_malformed_json() {
    let router = app().await;

    let syntax = send(&router, Method::POST, "/books", Some(r#"{"title": "Dune""#)).await;
    assert_eq!(syntax.status, StatusCode::BAD_REQUEST);
    assert!(syntax.body["error"].is_string());

    let wrong_type = send(
        &router,
        Method::POST,
        "/books",
        Some(r#"{"title":"Dune","author":"Herbert","genre":"SciFi","published_year":"1965","isbn":"123"}"#),
    )
    .await;
    assert_eq!(wrong_type.status, StatusCode::BAD_REQUEST);

    assert_eq!(book_count(&router).await, 0);
}

#[tokio::test]
async fn create_ignores_content_type() {
    let router = app().await;

    for content_type in [None, Some("application/x-www-form-urlencoded"), Some("text/plain")] {
        let mut builder = Request::builder().method(Method::POST).uri("/books");
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        let request = builder.body(Body::from(DUNE)).unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED, "{content_type:?}");
    }

    assert_eq!(book_count(&router).await, 3);
}

#[tokio::test]
async fn create_treats_null_availability_as_false() {
    let router = app().await;

    let reply = send(
        &router,
        Method::POST,
        "/books",
        Some(r#"{"title":"Dune","author":"Herbert","genre":"SciFi","published_year":1965,"isbn":"123","availability":null}"#),
    )
    .await;

    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["availability"], false);
}

#[tokio::test]
async fn create_reports_null_required_field_as_missing() {
    let router = app().await;

    let reply = send(
        &router,
        Method::POST,
        "/books",
        Some(r#"{"title":null,"author":"Herbert","genre":"SciFi","published_year":1965,"isbn":"123"}"#),
    )
    .await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["error"], "missing required field(s): title");
}

#[tokio::test]
async fn create_honours_availability() {
    let router = app().await;

    let reply = send(
        &router,
        Method::POST,
        "/books",
        Some(r#"{"title":"Emma","author":"Austen","genre":"Classic","published_year":1815,"isbn":"9","availability":true}"#),
    )
    .await;

    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["availability"], true);
}

#[tokio::test]
async fn update_changes_only_supplied_fields() {
    let router = app().await;
    let id = create_dune(&router).await;
    let before = send(&router, Method::GET, &format!("/books/{id}"), None).await.body;

    let updated = send(
        &router,
        Method::PUT,
        &format!("/books/{id}"),
        Some(r#"{"availability": true}"#),
    )
    .await;

    assert_eq!(updated.status, StatusCode::OK);
    let mut expected = before.clone();
    expected["availability"] = json!(true);
    assert_eq!(updated.body, expected);

    let fetched = send(&router, Method::GET, &format!("/books/{id}"), None).await;
    assert_eq!(fetched.body, expected);
}

#[tokio::test]
async fn update_keeps_id_and_skips_blank_values() {
    let router = app().await;
    let id = create_dune(&router).await;

    let updated = send(
        &router,
        Method::PUT,
        &format!("/books/{id}"),
        Some(r#"{"id": 500, "title": "", "genre": "Space Opera", "published_year": 0}"#),
    )
    .await;

    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["id"], id);
    assert_eq!(updated.body["title"], "Dune");
    assert_eq!(updated.body["genre"], "Space Opera");
    assert_eq!(updated.body["published_year"], 1965);

    let moved = send(&router, Method::GET, "/books/500", None).await;
    assert_eq!(moved.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_of_unknown_book_is_not_found_before_body_is_read() {
    let router = app().await;

    let reply = send(&router, Method::PUT, "/books/41", Some("not json")).await;

    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["error"], "Book not found");
}

#[tokio::test]
async fn update_with_malformed_body_is_bad_request() {
    let router = app().await;
    let id = create_dune(&router).await;

    let reply = send(&router, Method::PUT, &format!("/books/{id}"), Some("not json")).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.body["error"].is_string());
}

#[tokio::test]
async fn deleting_twice_is_not_found() {
    let router = app().await;
    let id = create_dune(&router).await;

    let first = send(&router, Method::DELETE, &format!("/books/{id}"), None).await;
    assert_eq!(first.status, StatusCode::OK);

    let second = send(&router, Method::DELETE, &format!("/books/{id}"), None).await;
    assert_eq!(second.status, StatusCode::NOT_FOUND);
    assert_eq!(second.body["error"], "Book not found");

    assert_eq!(book_count(&router).await, 0);
}

#[tokio::test]
async fn cors_headers_are_on_every_response() {
    let router = app().await;

    let reply = send(&router, Method::GET, "/books/12", None).await;

    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(
        reply.headers[header::ACCESS_CONTROL_ALLOW_METHODS],
        "GET, POST, PUT, DELETE"
    );
    assert_eq!(
        reply.headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
        "Content-Type"
    );
}

/// Store double: reads succeed for book 1, everything else fails, and
/// every call is counted.
#[derive(Default)]
struct FlakyStore {
    calls: AtomicUsize,
}

impl FlakyStore {
    fn fail(&self) -> DbError {
        DbError::Sqlx(sqlx::Error::PoolTimedOut)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BookStore for FlakyStore {
    async fn list(&self) -> Result<Vec<Book>, DbError> {
        self.touch();
        Err(self.fail())
    }

    async fn find(&self, id: i64) -> Result<Option<Book>, DbError> {
        self.touch();
        Ok((id == 1).then(stored_dune))
    }

    async fn insert(&self, _book: NewBook) -> Result<Book, DbError> {
        self.touch();
        Err(self.fail())
    }

    async fn update(&self, _id: i64, _changes: &BookChanges) -> Result<Option<Book>, DbError> {
        self.touch();
        Err(self.fail())
    }

    async fn delete(&self, _id: i64) -> Result<bool, DbError> {
        self.touch();
        Err(self.fail())
    }
}

#[tokio::test]
async fn storage_failures_map_to_generic_500s() {
    let router = app_with_store(Arc::new(FlakyStore::default()));

    let cases = [
        (Method::GET, "/books", None, "Failed to retrieve books"),
        (Method::POST, "/books", Some(DUNE), "Failed to add book"),
        (
            Method::PUT,
            "/books/1",
            Some(r#"{"availability": true}"#),
            "Failed to update book",
        ),
        (Method::DELETE, "/books/1", None, "Failed to delete book"),
    ];

    for (method, uri, body, message) in cases {
        let reply = send(&router, method.clone(), uri, body).await;
        assert_eq!(
            reply.status,
            StatusCode::INTERNAL_SERVER_ERROR,
            "{method} {uri}"
        );
        assert_eq!(reply.body, json!({ "error": message }));
    }

    let found = send(&router, Method::GET, "/books/1", None).await;
    assert_eq!(found.status, StatusCode::OK);
}

fn stored_dune() -> Book {
    Book {
        id: 1,
        title: "Dune".to_string(),
        author: "Herbert".to_string(),
        genre: "SciFi".to_string(),
        published_year: 1965,
        isbn: "123".to_string(),
        availability: false,
    }
}

/// Store double whose every call fails.
struct UnreachableStore;

#[async_trait]
impl BookStore for UnreachableStore {
    async fn list(&self) -> Result<Vec<Book>, DbError> {
        Err(DbError::Sqlx(sqlx::Error::PoolClosed))
    }

    async fn find(&self, _id: i64) -> Result<Option<Book>, DbError> {
        Err(DbError::Sqlx(sqlx::Error::PoolClosed))
    }

    async fn insert(&self, _book: NewBook) -> Result<Book, DbError> {
        Err(DbError::Sqlx(sqlx::Error::PoolClosed))
    }

    async fn update(&self, _id: i64, _changes: &BookChanges) -> Result<Option<Book>, DbError> {
        Err(DbError::Sqlx(sqlx::Error::PoolClosed))
    }

    async fn delete(&self, _id: i64) -> Result<bool, DbError> {
        Err(DbError::Sqlx(sqlx::Error::PoolClosed))
    }
}

#[tokio::test]
async fn failed_lookup_is_a_500_not_a_404() {
    let router = app_with_store(Arc::new(UnreachableStore));

    let cases = [
        (Method::GET, None),
        (Method::PUT, Some(r#"{"availability": true}"#)),
        (Method::DELETE, None),
    ];

    for (method, body) in cases {
        let reply = send(&router, method.clone(), "/books/1", body).await;
        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR, "{method}");
        assert_eq!(reply.body, json!({ "error": "Failed to retrieve book" }));
    }
}

/// Store double where book 1 is found but vanishes before it can be
/// written, as when another request deletes it in between.
struct VanishingStore;

#[async_trait]
impl BookStore for VanishingStore {
    async fn list(&self) -> Result<Vec<Book>, DbError> {
        Ok(vec![])
    }

    async fn find(&self, id: i64) -> Result<Option<Book>, DbError> {
        Ok((id == 1).then(stored_dune))
    }

    async fn insert(&self, book: NewBook) -> Result<Book, DbError> {
        Ok(book.into_book(1))
    }

    async fn update(&self, _id: i64, _changes: &BookChanges) -> Result<Option<Book>, DbError> {
        Ok(None)
    }

    async fn delete(&self, _id: i64) -> Result<bool, DbError> {
        Ok(false)
    }
}

#[tokio::test]
async fn book_removed_mid_request_is_not_found() {
    let router = app_with_store(Arc::new(VanishingStore));

    let updated = send(
        &router,
        Method::PUT,
        "/books/1",
        Some(r#"{"title": "Dune Messiah"}"#),
    )
    .await;
    assert_eq!(updated.status, StatusCode::NOT_FOUND);
    assert_eq!(updated.body, json!({ "error": "Book not found" }));

    let deleted = send(&router, Method::DELETE, "/books/1", None).await;
    assert_eq!(deleted.status, StatusCode::NOT_FOUND);
    assert_eq!(deleted.body, json!({ "error": "Book not found" }));
}

#[tokio::test]
async fn invalid_create_never_reaches_storage() {
    let store = Arc::new(FlakyStore::default());
    let router = app_with_store(store.clone());

    let reply = send(&router, Method::POST, "/books", Some(r#"{"title":"Dune"}"#)).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn preflight_is_answered_without_storage() {
    let store = Arc::new(FlakyStore::default());
    let router = app_with_store(store.clone());

    for uri in ["/books", "/books/1", "/books/nope"] {
        let reply = send(&router, Method::OPTIONS, uri, None).await;

        assert_eq!(reply.status, StatusCode::OK, "OPTIONS {uri}");
        assert_eq!(reply.body, Value::Null);
        assert_eq!(reply.headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(reply
            .headers
            .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
        assert!(reply
            .headers
            .contains_key(header::ACCESS_CONTROL_ALLOW_HEADERS));
    }

    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn health_and_openapi_are_served() {
    let router = app().await;

    let health = router
        .clone()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let docs = send(&router, Method::GET, "/docs/openapi.json", None).await;
    assert_eq!(docs.status, StatusCode::OK);
    assert!(docs.body["paths"]["/books"]["post"].is_object());
    assert!(docs.body["paths"]["/books/{id}"]["put"].is_object());
    assert!(docs.body["components"]["schemas"]["Book"].is_object());
}
