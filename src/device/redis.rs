use async_trait::async_trait;
use redis::AsyncCommands;

use super::DeviceStore;
use crate::{services::redis::RedisService, store::StoreResult};

const COMPARE_AND_SET: &str = r#"
    local current = redis.call('GET', KEYS[1])
    if ARGV[1] == '1' then
        if current ~= ARGV[2] then
            return 0
        end
    elseif current then
        return 0
    end

    redis.call('SET', KEYS[1], ARGV[3])
    local ttl = tonumber(ARGV[4])
    if ttl > 0 then
        redis.call('EXPIRE', KEYS[1], ttl)
    end
    return 1
"#;

/// Anonymous device values kept in Redis, expiring after `ttl_secs` of inactivity.
#[derive(Clone)]
pub struct RedisDeviceStore {
    redis: RedisService,
    ttl_secs: u64,
}

impl RedisDeviceStore {
    pub fn new(redis: RedisService, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }
}

#[async_trait]
impl DeviceStore for RedisDeviceStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.redis.connection_manager().clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> StoreResult<bool> {
        let mut conn = self.redis.connection_manager().clone();
        let written: i32 = redis::Script::new(COMPARE_AND_SET)
            .key(key)
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or(""))
            .arg(value)
            .arg(self.ttl_secs)
            .invoke_async(&mut conn)
            .await?;

        Ok(written == 1)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.redis.connection_manager().clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok(())
    }
}
