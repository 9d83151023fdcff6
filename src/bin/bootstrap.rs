//! Operator entrypoint: ensure a leaderboard table exists and print its
//! current standings.

use std::{env, sync::Arc};

use anyhow::Context;
use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scoresync::{
    config::EngineConfig,
    dao::{
        models::ParticipantEntity,
        progress_store::{
            ProgressStore, pages,
            http::{HttpProgressStore, HttpStoreConfig},
        },
    },
    services::table_service,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut args = env::args().skip(1);
    let table_id = args
        .next()
        .context("usage: bootstrap <table-id> [display-name]")?;
    let display_name = args.next().unwrap_or_else(|| table_id.clone());

    let config = EngineConfig::load();
    let store_config = HttpStoreConfig::from_env()
        .context("reading SCORESYNC_API_BASE_URL")?
        .with_timeout(config.request_timeout)
        .with_retry(config.retry_policy());
    let store: Arc<dyn ProgressStore> =
        Arc::new(HttpProgressStore::connect(store_config).context("building store client")?);

    let table = table_service::ensure_table(&store, &table_id, &display_name)
        .await
        .context("ensuring table")?;
    println!(
        "table `{}` ({}): {} participant(s){}",
        table.table_id,
        table.display_name,
        table.user_count,
        if table.is_archived { ", archived" } else { "" },
    );

    let mut stream = Box::pin(pages::iter_users(
        store.clone(),
        table_id.clone(),
        config.page_size,
    ));
    let mut participants: Vec<ParticipantEntity> = Vec::new();
    while let Some(row) = stream.next().await {
        participants.push(row.context("listing participants")?);
    }

    participants.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for (index, participant) in participants.iter().enumerate() {
        println!(
            "{:>4}. {:<24} {:.4}  {}",
            index + 1,
            participant.username,
            participant.composite_score,
            participant.team_name.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
