use std::fmt;

use anyhow::Context;
use async_trait::async_trait;
use ::redis::{AsyncCommands, aio::ConnectionManager};

use super::{StatusEvent, StatusSink};

/// Channel the status gateway subscribes to.
pub const DEFAULT_CHANNEL: &str = "job_updates";

/// Publishes status events as JSON on a Redis pub/sub channel.
#[derive(Clone)]
pub struct RedisSink {
    conn: ConnectionManager,
    channel: String,
}

impl fmt::Debug for RedisSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSink")
            .field("connection", &"ConnectionManager")
            .field("channel", &self.channel)
            .finish()
    }
}

impl RedisSink {
    pub async fn connect(
        redis_url: &str,
        channel: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = ::redis::Client::open(redis_url)
            .context("failed to create redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to connect to redis")?;
        let channel = channel.into();

        tracing::info!(channel = %channel, "status sink connected to redis");
        Ok(Self { conn, channel })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl StatusSink for RedisSink {
    fn name(&self) -> &str {
        "redis"
    }

    async fn deliver(&self, event: &StatusEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        let _receivers: i64 = conn
            .publish(&self.channel, payload)
            .await
            .context("redis PUBLISH failed")?;
        Ok(())
    }
}
