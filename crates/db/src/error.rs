use thiserror::Error;

/// Errors raised by the storage layer.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("invalid database url '{url}'")]
    InvalidUrl {
        url: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to open database at '{url}'")]
    Connect {
        url: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("migration '{module}/{id}' failed")]
    Migration {
        module: String,
        id: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}
