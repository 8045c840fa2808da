use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    config::ImageListLimits,
    models::{
        image::StoredImage, AccountId, CounterMeta, GeneratedImageRecord, NewGeneratedImage,
        SavedImage,
    },
    services::Metrics,
    store::{paths, Document, DocumentStore, Precondition, StoreError, StoreResult},
    utils::{generate_image_id, is_valid_segment},
};

const MAX_COUNTER_ATTEMPTS: usize = 5;

/// Per-account history of generated images.
pub struct GeneratedImageStore {
    documents: Arc<dyn DocumentStore>,
    metrics: Arc<Metrics>,
    limits: ImageListLimits,
}

impl GeneratedImageStore {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        limits: ImageListLimits,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            documents,
            metrics,
            limits,
        }
    }

    /// Records a generated image. `None` on invalid metadata or any store failure.
    pub async fn save(&self, account: &AccountId, image: NewGeneratedImage) -> Option<SavedImage> {
        if let Err(reason) = validate(&image) {
            warn!("Rejected image metadata for {}: {}", account, reason);
            self.metrics.record_image_operation("save", false);
            return None;
        }

        match self.try_save(account, image).await {
            Ok(saved) => {
                info!("Saved image {} for {}", saved.image_id, account);
                self.metrics.record_image_operation("save", true);
                Some(saved)
            }
            Err(e) => {
                error!("Failed to save image for {}: {}", account, e);
                self.metrics.record_store_error("image_save");
                self.metrics.record_image_operation("save", false);
                None
            }
        }
    }

    async fn try_save(&self, account: &AccountId, image: NewGeneratedImage) -> StoreResult<SavedImage> {
        let number = self.reserve_number(account).await?;
        let image_id = generate_image_id();
        let path = paths::image(account, &image_id);

        let stored = StoredImage::new(image, number);
        self.documents
            .put(&path, serde_json::to_value(&stored)?, Precondition::MustNotExist)
            .await?;

        Ok(SavedImage { image_id, path })
    }

    /// Bumps the account counter and returns the reserved number.
    async fn reserve_number(&self, account: &AccountId) -> StoreResult<u64> {
        let path = paths::image_counter(account);

        for attempt in 1..=MAX_COUNTER_ATTEMPTS {
            let (current, precondition) = self.read_counter(&path).await?;
            let next = CounterMeta {
                total_count: current.total_count + 1,
            };

            match self
                .documents
                .put(&path, serde_json::to_value(next)?, precondition)
                .await
            {
                Ok(_) => return Ok(next.total_count),
                Err(StoreError::Conflict(_)) => {
                    debug!("Counter {} changed underneath us (attempt {})", path, attempt);
                }
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::Conflict(path))
    }

    async fn read_counter(&self, path: &str) -> StoreResult<(CounterMeta, Precondition)> {
        Ok(match self.documents.get(path).await? {
            Some(document) => (
                serde_json::from_value(document.data)?,
                Precondition::Revision(document.revision),
            ),
            None => (CounterMeta::default(), Precondition::MustNotExist),
        })
    }

    /// Newest first, at most `limit` (defaulted and clamped). Failures read as empty.
    pub async fn list(&self, account: &AccountId, limit: Option<usize>) -> Vec<GeneratedImageRecord> {
        let limit = limit
            .unwrap_or(self.limits.default_limit)
            .min(self.limits.max_limit);
        if limit == 0 {
            return Vec::new();
        }

        match self.documents.list(&paths::images(account), limit).await {
            Ok(documents) => {
                self.metrics.record_image_operation("list", true);
                documents.iter().filter_map(decode_record).collect()
            }
            Err(e) => {
                error!("Failed to list images for {}: {}", account, e);
                self.metrics.record_store_error("image_list");
                self.metrics.record_image_operation("list", false);
                Vec::new()
            }
        }
    }

    pub async fn get(&self, account: &AccountId, image_id: &str) -> Option<GeneratedImageRecord> {
        if !is_valid_segment(image_id) {
            return None;
        }

        match self.documents.get(&paths::image(account, image_id)).await {
            Ok(document) => document.as_ref().and_then(decode_record),
            Err(e) => {
                error!("Failed to fetch image {} for {}: {}", image_id, account, e);
                self.metrics.record_store_error("image_get");
                None
            }
        }
    }

    /// Hard delete. The counter is left alone so numbers are never reused.
    pub async fn delete(&self, account: &AccountId, image_id: &str) -> bool {
        if !is_valid_segment(image_id) {
            return false;
        }

        match self.documents.delete(&paths::image(account, image_id)).await {
            Ok(deleted) => {
                if deleted {
                    info!("Deleted image {} for {}", image_id, account);
                }
                self.metrics.record_image_operation("delete", deleted);
                deleted
            }
            Err(e) => {
                error!("Failed to delete image {} for {}: {}", image_id, account, e);
                self.metrics.record_store_error("image_delete");
                self.metrics.record_image_operation("delete", false);
                false
            }
        }
    }

    /// Images ever saved for the account, deleted ones included.
    pub async fn total_created(&self, account: &AccountId) -> Option<u64> {
        match self.read_counter(&paths::image_counter(account)).await {
            Ok((counter, _)) => Some(counter.total_count),
            Err(e) => {
                error!("Failed to read image counter for {}: {}", account, e);
                self.metrics.record_store_error("image_counter");
                None
            }
        }
    }

    /// Raises the counter to cover every stored record and number.
    pub async fn repair_counter(&self, account: &AccountId) -> StoreResult<u64> {
        let stats = self
            .documents
            .collection_stats(&paths::images(account), "imgNumber")
            .await?;
        let floor = stats.max_field.unwrap_or(0).max(stats.count);

        let path = paths::image_counter(account);
        for _ in 0..MAX_COUNTER_ATTEMPTS {
            let (current, precondition) = self.read_counter(&path).await?;
            if current.total_count >= floor {
                return Ok(current.total_count);
            }

            let repaired = CounterMeta { total_count: floor };
            match self
                .documents
                .put(&path, serde_json::to_value(repaired)?, precondition)
                .await
            {
                Ok(_) => {
                    info!(
                        "Repaired image counter for {}: {} -> {}",
                        account, current.total_count, floor
                    );
                    return Ok(floor);
                }
                Err(StoreError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::Conflict(path))
    }
}

fn validate(image: &NewGeneratedImage) -> Result<(), &'static str> {
    if image.prompt.trim().is_empty() {
        return Err("empty prompt");
    }
    if image.image_url.trim().is_empty() {
        return Err("empty image URL");
    }
    if image.width == 0 || image.height == 0 {
        return Err("dimensions must be positive");
    }
    Ok(())
}

fn decode_record(document: &Document) -> Option<GeneratedImageRecord> {
    match GeneratedImageRecord::from_document(document) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Skipping undecodable image record {}: {}", document.path, e);
            None
        }
    }
}
