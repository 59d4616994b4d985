use async_trait::async_trait;
use libris_db::{Database, DbError};
use sqlx::sqlite::{Sqlite, SqlitePool};

use super::models::{Book, BookChanges, NewBook};

/// Persistence operations behind the book handlers.
#[async_trait]
pub trait BookStore: Send + Sync {
    /// Every book, in storage order.
    async fn list(&self) -> Result<Vec<Book>, DbError>;

    async fn find(&self, id: i64) -> Result<Option<Book>, DbError>;

    /// Persist `book` and return it with its assigned id.
    async fn insert(&self, book: NewBook) -> Result<Book, DbError>;

    /// Merge `changes` into the stored row. `None` if the row does not exist.
    async fn update(&self, id: i64, changes: &BookChanges) -> Result<Option<Book>, DbError>;

    /// Hard-delete; `false` if there was nothing to delete.
    async fn delete(&self, id: i64) -> Result<bool, DbError>;
}

pub struct SqliteBookStore {
    pool: SqlitePool,
}

impl SqliteBookStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl BookStore for SqliteBookStore {
    async fn list(&self) -> Result<Vec<Book>, DbError> {
        let books = sqlx::query_as::<Sqlite, Book>(
            // language=sqlite
            r#"
            SELECT id, title, author, genre, published_year, isbn, availability
            FROM books
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(books)
    }

    async fn find(&self, id: i64) -> Result<Option<Book>, DbError> {
        let book = sqlx::query_as::<Sqlite, Book>(
            // language=sqlite
            r#"
            SELECT id, title, author, genre, published_year, isbn, availability
            FROM books
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(book)
    }

    async fn insert(&self, book: NewBook) -> Result<Book, DbError> {
        let id = sqlx::query(
            // language=sqlite
            r#"
            INSERT INTO books (title, author, genre, published_year, isbn, availability)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.genre)
        .bind(book.published_year)
        .bind(&book.isbn)
        .bind(book.availability)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        tracing::debug!(book_id = id, "book inserted");
        Ok(book.into_book(id))
    }

    /// Merge and write in a single statement, so a concurrent writer can
    /// neither interleave with it nor be read stale.
    async fn update(&self, id: i64, changes: &BookChanges) -> Result<Option<Book>, DbError> {
        let changes = changes.supplied();
        let book = sqlx::query_as::<Sqlite, Book>(
            // language=sqlite
            r#"
            UPDATE books
            SET title          = COALESCE(?, title),
                author         = COALESCE(?, author),
                genre          = COALESCE(?, genre),
                published_year = COALESCE(?, published_year),
                isbn           = COALESCE(?, isbn),
                availability   = COALESCE(?, availability)
            WHERE id = ?
            RETURNING id, title, author, genre, published_year, isbn, availability
            "#,
        )
        .bind(changes.title)
        .bind(changes.author)
        .bind(changes.genre)
        .bind(changes.published_year)
        .bind(changes.isbn)
        .bind(changes.availability)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if book.is_some() {
            tracing::debug!(book_id = id, "book updated");
        }
        Ok(book)
    }

    async fn delete(&self, id: i64) -> Result<bool, DbError> {
        let deleted = sqlx::query(
            // language=sqlite
            r#"
            DELETE FROM books
            WHERE id = ?
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(deleted > 0)
    }
}
