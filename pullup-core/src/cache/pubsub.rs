use std::time::Duration;

use deadpool_redis::Pool;
use futures_util::StreamExt;
use log::{error, info, warn};
use tokio::sync::mpsc;

use super::{CacheError, CacheResult};

/// Cross-process fan-out over Redis pub/sub.
///
/// Publishing goes through the shared pool. Each subscription holds its own
/// dedicated client connection, which reconnects with a delay if the stream
/// drops.
#[derive(Clone)]
pub struct PubSub {
    pool: Pool,
    redis_url: String,
}

impl PubSub {
    pub fn new(pool: Pool, redis_url: String) -> Self {
        Self { pool, redis_url }
    }

    /// Publishes a payload to a channel. Failures are logged, never raised.
    pub async fn publish(&self, channel: &str, payload: &[u8]) {
        let result: CacheResult<()> = async {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| CacheError::Pool(e.to_string()))?;

            redis::cmd("PUBLISH")
                .arg(channel)
                .arg(payload)
                .query_async::<_, ()>(&mut conn)
                .await?;
            Ok(())
        }
        .await;

        if let Err(err) = result {
            warn!("Publish to {channel} failed: {err}");
        }
    }

    /// Subscribes to a channel on a dedicated connection, forwarding every
    /// payload into the returned receiver. The background task reconnects
    /// after a delay when the connection is lost, and exits once the
    /// receiver is dropped.
    pub fn subscribe(&self, channel: &str) -> mpsc::Receiver<Vec<u8>> {
        let (sender, receiver) = mpsc::channel(64);
        let url = self.redis_url.clone();
        let channel = channel.to_string();

        tokio::spawn(async move {
            loop {
                match run_subscription(&url, &channel, &sender).await {
                    Ok(()) => break,
                    Err(err) => {
                        error!("Subscription to {channel} dropped: {err}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }

                if sender.is_closed() {
                    break;
                }
            }
        });

        receiver
    }
}

async fn run_subscription(
    url: &str,
    channel: &str,
    sender: &mpsc::Sender<Vec<u8>>,
) -> Result<(), CacheError> {
    let client = redis::Client::open(url).map_err(CacheError::Redis)?;
    let mut pubsub = client.get_async_pubsub().await?;

    pubsub.subscribe(channel).await?;
    info!("Subscribed to {channel}");

    let mut stream = pubsub.on_message();

    loop {
        match stream.next().await {
            Some(message) => {
                let payload: Vec<u8> = message.get_payload().unwrap_or_default();

                if sender.send(payload).await.is_err() {
                    // Receiver is gone, the subscription is over.
                    return Ok(());
                }
            }
            None => {
                return Err(CacheError::Pool("pub/sub stream closed".to_string()));
            }
        }
    }
}
