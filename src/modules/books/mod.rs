pub mod models;
pub mod routes;
pub mod store;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use libris_kernel::{InitCtx, Migration, Module};
use serde_json::json;

use routes::SharedStore;

/// Book catalog: CRUD over the `books` table, mounted at `/books`.
pub struct BooksModule {
    store: SharedStore,
}

impl BooksModule {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Schema for the `books` table.
    ///
    /// AUTOINCREMENT keeps ids of deleted books from being handed out again.
    pub fn schema() -> Vec<Migration> {
        vec![Migration {
            id: "001_init",
            up: r#"
                CREATE TABLE IF NOT EXISTS books (
                    id             INTEGER PRIMARY KEY AUTOINCREMENT,
                    title          TEXT    NOT NULL,
                    author         TEXT    NOT NULL,
                    genre          TEXT    NOT NULL,
                    published_year INTEGER NOT NULL,
                    isbn           TEXT    NOT NULL,
                    availability   BOOLEAN NOT NULL DEFAULT 0
                );
                "#,
        }]
    }
}

#[async_trait]
impl Module for BooksModule {
    fn name(&self) -> &'static str {
        "books"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            "books module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        routes::router(self.store.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        let book_ref = json!({ "$ref": "#/components/schemas/Book" });
        let error = |description: &str| {
            json!({
                "description": description,
                "content": {
                    "application/json": {
                        "schema": { "$ref": "#/components/schemas/ErrorResponse" }
                    }
                }
            })
        };
        let id_param = json!([{
            "name": "id",
            "in": "path",
            "required": true,
            "schema": { "type": "integer", "format": "int64" }
        }]);

        Some(json!({
            "paths": {
                "": {
                    "get": {
                        "summary": "List books",
                        "tags": ["Books"],
                        "responses": {
                            "200": {
                                "description": "Every book in the catalog",
                                "content": {
                                    "application/json": {
                                        "schema": { "type": "array", "items": book_ref }
                                    }
                                }
                            },
                            "500": error("Storage failure")
                        }
                    },
                    "post": {
                        "summary": "Add a book",
                        "tags": ["Books"],
                        "requestBody": {
                            "required": true,
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/NewBook" }
                                }
                            }
                        },
                        "responses": {
                            "201": {
                                "description": "Book created",
                                "content": { "application/json": { "schema": book_ref } }
                            },
                            "400": error("Missing required field or malformed JSON"),
                            "500": error("Storage failure")
                        }
                    }
                },
                "/{id}": {
                    "get": {
                        "summary": "Get a book",
                        "tags": ["Books"],
                        "parameters": id_param,
                        "responses": {
                            "200": {
                                "description": "The book",
                                "content": { "application/json": { "schema": book_ref } }
                            },
                            "404": error("Book not found")
                        }
                    },
                    "put": {
                        "summary": "Partially update a book",
                        "tags": ["Books"],
                        "parameters": id_param,
                        "requestBody": {
                            "required": true,
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/BookChanges" }
                                }
                            }
                        },
                        "responses": {
                            "200": {
                                "description": "The updated book",
                                "content": { "application/json": { "schema": book_ref } }
                            },
                            "400": error("Malformed JSON"),
                            "404": error("Book not found"),
                            "500": error("Storage failure")
                        }
                    },
                    "delete": {
                        "summary": "Delete a book",
                        "tags": ["Books"],
                        "parameters": id_param,
                        "responses": {
                            "200": {
                                "description": "Book deleted",
                                "content": {
                                    "application/json": {
                                        "schema": {
                                            "type": "object",
                                            "properties": { "message": { "type": "string" } }
                                        }
                                    }
                                }
                            },
                            "404": error("Book not found"),
                            "500": error("Storage failure")
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "Book": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "integer", "format": "int64" },
                            "title": { "type": "string" },
                            "author": { "type": "string" },
                            "genre": { "type": "string" },
                            "published_year": { "type": "integer", "format": "int32" },
                            "isbn": { "type": "string" },
                            "availability": { "type": "boolean" }
                        },
                        "required": ["id", "title", "author", "genre", "published_year", "isbn", "availability"]
                    },
                    "NewBook": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string", "minLength": 1 },
                            "author": { "type": "string", "minLength": 1 },
                            "genre": { "type": "string", "minLength": 1 },
                            "published_year": { "type": "integer", "format": "int32" },
                            "isbn": { "type": "string", "minLength": 1 },
                            "availability": { "type": "boolean", "default": false }
                        },
                        "required": ["title", "author", "genre", "published_year", "isbn"]
                    },
                    "BookChanges": {
                        "type": "object",
                        "description": "Omitted, null, empty-string and zero fields are left unchanged",
                        "properties": {
                            "title": { "type": "string" },
                            "author": { "type": "string" },
                            "genre": { "type": "string" },
                            "published_year": { "type": "integer", "format": "int32" },
                            "isbn": { "type": "string" },
                            "availability": { "type": "boolean" }
                        }
                    }
                }
            }
        }))
    }

    fn migrations(&self) -> Vec<Migration> {
        Self::schema()
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "books module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "books module stopped");
        Ok(())
    }
}

/// Create the books module backed by `store`
pub fn create_module(store: SharedStore) -> Arc<dyn Module> {
    Arc::new(BooksModule::new(store))
}
