use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Document;

/// Metadata of a completed generation, as handed to the image store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGeneratedImage {
    pub prompt: String,
    #[serde(rename = "imageURL")]
    pub image_url: String,
    pub model_used: String,
    pub width: u32,
    pub height: u32,
    pub seed: u64,
    #[serde(default)]
    pub nologo: bool,
}

/// Body of a record document; `imageId` and `createdAt` come from the envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredImage {
    pub prompt: String,
    #[serde(rename = "imageURL")]
    pub image_url: String,
    pub model_used: String,
    pub width: u32,
    pub height: u32,
    pub seed: u64,
    #[serde(default)]
    pub nologo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

impl StoredImage {
    pub fn new(image: NewGeneratedImage, img_number: u64) -> Self {
        Self {
            prompt: image.prompt,
            image_url: image.image_url,
            model_used: image.model_used,
            width: image.width,
            height: image.height,
            seed: image.seed,
            nologo: image.nologo,
            img_number: Some(img_number),
            container_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImageRecord {
    pub image_id: String,
    pub prompt: String,
    #[serde(rename = "imageURL")]
    pub image_url: String,
    pub model_used: String,
    pub width: u32,
    pub height: u32,
    pub seed: u64,
    pub nologo: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

impl GeneratedImageRecord {
    pub fn from_document(document: &Document) -> Result<Self, serde_json::Error> {
        let stored: StoredImage = serde_json::from_value(document.data.clone())?;
        Ok(Self {
            image_id: document.id().to_string(),
            prompt: stored.prompt,
            image_url: stored.image_url,
            model_used: stored.model_used,
            width: stored.width,
            height: stored.height,
            seed: stored.seed,
            nologo: stored.nologo,
            created_at: document.created_at,
            img_number: stored.img_number,
            container_id: stored.container_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedImage {
    pub image_id: String,
    pub path: String,
}

/// Per-account counter at `accounts/{id}/meta/images`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterMeta {
    #[serde(default)]
    pub total_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_legacy_document() {
        let now = Utc::now();
        let document = Document {
            path: "accounts/u1/images/img7".to_string(),
            data: json!({
                "prompt": "a lighthouse",
                "imageURL": "https://img.example/a",
                "modelUsed": "turbo",
                "width": 768,
                "height": 512,
                "seed": 99,
                "containerId": "c_abc"
            }),
            revision: 1,
            created_at: now,
            updated_at: now,
        };

        let record = GeneratedImageRecord::from_document(&document).unwrap();
        assert_eq!(record.image_id, "img7");
        assert_eq!(record.created_at, now);
        assert!(!record.nologo);
        assert_eq!(record.img_number, None);
        assert_eq!(record.container_id.as_deref(), Some("c_abc"));
    }

    #[test]
    fn test_stored_image_wire_names() {
        let stored = StoredImage::new(
            NewGeneratedImage {
                prompt: "a cat".to_string(),
                image_url: "https://img.example/cat".to_string(),
                model_used: "flux".to_string(),
                width: 512,
                height: 512,
                seed: 42,
                nologo: true,
            },
            3,
        );

        let value = serde_json::to_value(&stored).unwrap();
        assert_eq!(value["imageURL"], "https://img.example/cat");
        assert_eq!(value["modelUsed"], "flux");
        assert_eq!(value["imgNumber"], 3);
        assert!(value.get("containerId").is_none());
    }
}
