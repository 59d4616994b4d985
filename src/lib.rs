//! Libris application library
//!
//! Wires the book catalog module to the shared SQLite handle and the HTTP
//! server. Both the `libris-app` binary and the `libris` CLI go through
//! [`serve`] and [`migrate`].

pub mod modules;

use anyhow::Context;
use libris_db::Database;
use libris_kernel::{settings::Settings, InitCtx, ModuleRegistry};

/// Open storage, apply migrations, and serve HTTP until shutdown.
pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let (db, registry) = open(&settings).await?;
    serve_until_shutdown(&db, &registry, &settings).await
}

/// Open storage and apply pending migrations, then exit.
pub async fn migrate(settings: Settings) -> anyhow::Result<()> {
    let (db, _registry) = open(&settings).await?;
    db.close().await;
    Ok(())
}

/// Storage is closed on every exit path, including a module that fails to
/// initialize or start.
async fn serve_until_shutdown(
    db: &Database,
    registry: &ModuleRegistry,
    settings: &Settings,
) -> anyhow::Result<()> {
    let outcome = run(registry, settings).await;
    db.close().await;
    outcome
}

async fn run(registry: &ModuleRegistry, settings: &Settings) -> anyhow::Result<()> {
    let ctx = InitCtx { settings };
    registry.init_all(&ctx).await?;
    registry.start_all(&ctx).await?;

    let served = libris_http::start_server(registry, &settings.server).await;

    registry.stop_all().await?;
    served
}

async fn open(settings: &Settings) -> anyhow::Result<(Database, ModuleRegistry)> {
    let db = Database::connect(&settings.database)
        .await
        .with_context(|| "failed to open book storage")?;

    let mut registry = ModuleRegistry::new();
    modules::register_all(&mut registry, &db);

    let applied = match db.migrate(&registry.collect_migrations()).await {
        Ok(applied) => applied,
        Err(err) => {
            db.close().await;
            return Err(err).with_context(|| "failed to apply migrations");
        }
    };
    tracing::info!(applied, "database schema ready");

    Ok((db, registry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use libris_kernel::{settings::DatabaseSettings, Module};
    use std::sync::Arc;

    struct UnstartableModule;

    #[async_trait]
    impl Module for UnstartableModule {
        fn name(&self) -> &'static str {
            "unstartable"
        }

        async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
            anyhow::bail!("refusing to start")
        }
    }

    fn settings_in(dir: &tempfile::TempDir) -> Settings {
        Settings {
            database: DatabaseSettings {
                url: format!("sqlite://{}", dir.path().join("library.db").display()),
                max_connections: 1,
            },
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn failed_start_still_closes_storage() {
        let settings = Settings::default();
        let db = Database::in_memory().await.unwrap();
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(UnstartableModule));

        let err = serve_until_shutdown(&db, &registry, &settings)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("'unstartable'"));
        assert!(db.pool().is_closed());
    }

    #[tokio::test]
    async fn migrate_can_run_repeatedly() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);

        migrate(settings.clone()).await.unwrap();
        migrate(settings.clone()).await.unwrap();

        let (db, registry) = open(&settings).await.unwrap();
        assert!(registry.get_module("books").is_some());
        db.close().await;
        assert!(db.pool().is_closed());
    }
}
