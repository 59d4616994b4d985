use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use libris_http::error::AppError;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::models::{Book, BookChanges, NewBook};
use super::store::BookStore;

pub type SharedStore = Arc<dyn BookStore>;

const BOOK_NOT_FOUND: &str = "Book not found";

/// Routes of the books module, relative to its `/books` mount point.
pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/", get(list_books).post(create_book))
        .route("/{id}", get(get_book).put(update_book).delete(delete_book))
        .with_state(store)
}

async fn list_books(State(store): State<SharedStore>) -> Result<Json<Vec<Book>>, AppError> {
    let books = store
        .list()
        .await
        .map_err(|err| AppError::internal("Failed to retrieve books", err))?;
    Ok(Json(books))
}

async fn get_book(
    State(store): State<SharedStore>,
    Path(id): Path<String>,
) -> Result<Json<Book>, AppError> {
    let book = find_existing(store.as_ref(), &id).await?;
    Ok(Json(book))
}

async fn create_book(
    State(store): State<SharedStore>,
    body: Bytes,
) -> Result<(StatusCode, Json<Book>), AppError> {
    let new_book: NewBook = decode_body(&body)?;
    new_book
        .validate()
        .map_err(|err| AppError::bad_request(err.to_string()))?;

    let book = store
        .insert(new_book)
        .await
        .map_err(|err| AppError::internal("Failed to add book", err))?;

    tracing::info!(book_id = book.id, "book created");
    Ok((StatusCode::CREATED, Json(book)))
}

/// The body is only looked at once the book is known to exist.
async fn update_book(
    State(store): State<SharedStore>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Book>, AppError> {
    let existing = find_existing(store.as_ref(), &id).await?;
    let changes: BookChanges = decode_body(&body)?;

    let book = store
        .update(existing.id, &changes)
        .await
        .map_err(|err| AppError::internal("Failed to update book", err))?
        // Deleted between the lookup and the update.
        .ok_or_else(|| AppError::not_found(BOOK_NOT_FOUND))?;

    tracing::info!(book_id = book.id, "book updated");
    Ok(Json(book))
}

async fn delete_book(
    State(store): State<SharedStore>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let existing = find_existing(store.as_ref(), &id).await?;

    let deleted = store
        .delete(existing.id)
        .await
        .map_err(|err| AppError::internal("Failed to delete book", err))?;
    if !deleted {
        return Err(AppError::not_found(BOOK_NOT_FOUND));
    }

    tracing::info!(book_id = existing.id, "book deleted");
    Ok(Json(json!({ "message": "Book deleted" })))
}

/// Ids that do not parse can never match a row, so they are reported as
/// not found rather than as bad requests.
async fn find_existing(store: &dyn BookStore, raw_id: &str) -> Result<Book, AppError> {
    let Ok(id) = raw_id.parse::<i64>() else {
        return Err(AppError::not_found(BOOK_NOT_FOUND));
    };

    store
        .find(id)
        .await
        .map_err(|err| AppError::internal("Failed to retrieve book", err))?
        .ok_or_else(|| AppError::not_found(BOOK_NOT_FOUND))
}

/// Bodies are decoded as JSON whatever `Content-Type` the client sent.
fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|err| AppError::bad_request(err.to_string()))
}
