//! Redis streams broker

use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::traits::{StreamBroker, DATA_FIELD};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult, Value};
use tracing::{debug, info};

/// Error code Redis returns when `XGROUP CREATE` targets an existing group
const BUSYGROUP: &str = "BUSYGROUP";

/// Redis-backed [`StreamBroker`]
///
/// Give every producer and consumer its own broker: a consumer keeps a
/// blocking `XREADGROUP` outstanding on its connection.
pub struct RedisBroker {
    connection: Mutex<Option<ConnectionManager>>,
}

impl RedisBroker {
    /// Connect to Redis and verify the connection
    pub async fn connect(redis_url: &str) -> MessagingResult<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            MessagingError::Configuration(format!("Invalid Redis URL: {}", e))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            MessagingError::BrokerCommunication(format!("Failed to connect to Redis: {}", e))
        })?;

        let mut test_conn = connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut test_conn)
            .await
            .map_err(|e| {
                MessagingError::BrokerCommunication(format!("Redis connection test failed: {}", e))
            })?;

        info!("Connected to Redis stream broker");

        Ok(Self {
            connection: Mutex::new(Some(connection)),
        })
    }

    fn connection(&self) -> MessagingResult<ConnectionManager> {
        self.connection
            .lock()
            .clone()
            .ok_or(MessagingError::ConnectionClosed)
    }
}

#[async_trait]
impl StreamBroker for RedisBroker {
    async fn append(
        &self,
        stream: &str,
        max_len: usize,
        id: Option<&str>,
        payload: &[u8],
    ) -> MessagingResult<String> {
        let mut conn = self.connection()?;

        let id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(max_len)
            .arg(id.unwrap_or("*"))
            .arg(DATA_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> MessagingResult<()> {
        let mut conn = self.connection()?;

        let created: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => {
                info!(stream, group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some(BUSYGROUP) => {
                debug!(stream, group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> MessagingResult<Value> {
        let mut conn = self.connection()?;

        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(0)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        Ok(reply)
    }

    async fn acknowledge(&self, stream: &str, group: &str, id: &str) -> MessagingResult<i64> {
        let mut conn = self.connection()?;

        let count: i64 = redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(id)
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn close(&self) -> MessagingResult<()> {
        if self.connection.lock().take().is_none() {
            debug!("Redis broker connection already closed");
        }
        Ok(())
    }
}
