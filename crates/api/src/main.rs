use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use stratum_api::app::{self, AppState};
use stratum_infra::{AppConfig, LogMailer, PostgresDirectory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stratum_observability::init();

    let config = AppConfig::from_env()?;
    tracing::info!(?config, "configuration loaded");

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.db_acquire_timeout)
        .connect(config.require_database_url()?)
        .await
        .context("failed to connect to DATABASE_URL")?;

    let directory = PostgresDirectory::new(pool.clone());
    directory.migrate().await.context("schema migration failed")?;

    let state = AppState::build(&config, Arc::new(directory), Arc::new(LogMailer))?;

    if let Some(bootstrap) = &config.bootstrap {
        match state
            .services
            .engine
            .bootstrap_company(&bootstrap.name, &bootstrap.email)
            .await?
        {
            Some(id) => tracing::info!(principal_id = %id, "root company provisioned"),
            None => tracing::info!("root company already present"),
        }
    }

    let app = app::build_app(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::select! {
        joined = &mut server => {
            // The server stopped on its own; nothing left to drain.
            joined.context("server task panicked")??;
            pool.close().await;
            return Ok(());
        }
        () = shutdown_signal() => {}
    }

    tracing::info!(grace = ?config.shutdown_grace, "shutdown requested; draining in-flight requests");
    let _ = stop_tx.send(());

    match tokio::time::timeout(config.shutdown_grace, &mut server).await {
        Ok(joined) => joined.context("server task panicked")??,
        Err(_) => {
            tracing::warn!("grace period elapsed; aborting remaining requests");
            server.abort();
        }
    }

    pool.close().await;
    tracing::info!("store connections closed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
