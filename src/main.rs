use anyhow::Result;
use chrono::Utc;
use listing_promo::db::{establish_pool, run_migrations};
use listing_promo::settings::{settings, watch_settings};
use listing_promo::utils::{log_db_ready, log_generic_error, log_init};
use listing_promo::TrendingScorer;
use std::time::Duration;
use tracing::subscriber::set_global_default;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("listing_promo=info".parse()?))
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        );
    set_global_default(subscriber)?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "promo.db".to_string());
    let s = settings();
    log_init(&database_url, s.scheduler.interval_secs);

    let pool = establish_pool(&database_url)?;
    let applied = run_migrations(&pool)?;
    log_db_ready(applied);

    let _watcher = match watch_settings() {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            log_generic_error("[SETTINGS]", &format!("hot reload disabled: {e}"));
            None
        }
    };

    let scorer = TrendingScorer::new(pool);
    let mut interval = tokio::time::interval(Duration::from_secs(s.scheduler.interval_secs.max(1)));
    if !s.scheduler.run_on_startup {
        interval.tick().await;
    }

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let scorer = scorer.clone();
                let today = Utc::now().date_naive();
                match tokio::task::spawn_blocking(move || scorer.recompute_all(today)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => log_generic_error("[TRENDING]", &format!("recompute failed: {e}")),
                    Err(e) => log_generic_error("[TRENDING]", &format!("recompute task panicked: {e}")),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}
