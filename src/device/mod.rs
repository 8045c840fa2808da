use async_trait::async_trait;

use crate::store::StoreResult;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryDeviceStore;
pub use self::redis::RedisDeviceStore;

/// Per-device key/value storage holding plain-text values.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes `value` only if the current value equals `expected`
    /// (`None` meaning absent). Returns whether the write happened.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> StoreResult<bool>;

    async fn ping(&self) -> StoreResult<()>;
}
