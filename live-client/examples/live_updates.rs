//! Subscribe to a live endpoint and print pushes as they arrive.
//!
//! Run against any graphql-ws endpoint:
//!     cargo run --example live_updates -- ws://localhost:8080/graphql-ws

use futures::StreamExt;
use live_client::{EntityKey, LiveClient, Operation, ReconnectConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://localhost:8080/graphql-ws".to_string());

    let client = LiveClient::builder()
        .endpoint(&endpoint)
        .reconnect(
            ReconnectConfig::new()
                .with_initial_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(10)),
        )
        .build()?;

    tracing::info!("connected to {}", endpoint);

    let status = client
        .query(Operation::query("{ status { __typename id load } }"))
        .await?;
    println!("initial status: {:?}", status.data);

    let mut watch = client.watch_entity(EntityKey::new("Status", "singleton"));
    tokio::spawn(async move {
        while let Some(record) = watch.changed().await {
            tracing::info!("cache updated: {}", record);
        }
    });

    let mut updates = client.subscribe(Operation::subscription(
        "subscription { status { __typename id load peers } }",
    ))?;

    while let Some(update) = updates.next().await {
        match update {
            Ok(result) => println!("push: {:?}", result.data),
            Err(e) => {
                tracing::error!("subscription ended: {}", e);
                break;
            }
        }
    }

    client.shutdown();
    Ok(())
}
