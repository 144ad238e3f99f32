//! Image ingest pipeline: compress, register with the search index, store the
//! original, write the public URL back into the index brief, persist the
//! gallery row.
//!
//! Each step is a single awaited call. Nothing is retried or rolled back: if
//! storage fails after the index accepted the image, the caller gets a partial
//! success and the index entry stays.

use chrono::Utc;
use db::{
    DBService,
    models::gallery_item::{CreateGalleryItem, GalleryError, GalleryItem},
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use utils_core::text::{now_millis, random_base36};

use super::{
    compression::{CompressOptions, CompressionError, compress_image},
    config::{Config, IngestConfig},
    storage::{BosStorage, StorageError, object_key, url_for_cont_sign},
    vision::{
        SimilarSearchClient, VisionError, parse_brief, registration_brief, storage_brief,
    },
};

const DEFAULT_CONTENT_TYPE: &str = "image/png";
const SHIPMENT_ID_SUFFIX_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No image provided")]
    EmptyUpload,
    #[error("Image is {size} bytes, the limit is {max}")]
    TooLarge { size: usize, max: usize },
    #[error("Server configuration error: storage domain is not set")]
    StorageNotConfigured,
    #[error(transparent)]
    Compression(#[from] CompressionError),
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("Image processing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// An uploaded file as received from a multipart form.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl Upload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            ..Default::default()
        }
    }

    fn filename_or(&self, fallback: &str) -> String {
        self.filename
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }

    fn content_type(&self) -> String {
        if let Some(content_type) = self
            .content_type
            .as_deref()
            .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream")
        {
            return content_type.to_string();
        }
        self.filename
            .as_deref()
            .and_then(|name| mime_guess::from_path(name).first_raw())
            .filter(|ct| ct.starts_with("image/"))
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub cont_sign: Option<String>,
    pub image_url: String,
    pub bos_key: String,
    pub filename: String,
    pub filesize: usize,
    pub is_existing: bool,
    pub is_compressed: bool,
    pub compressed_size: Option<usize>,
    pub storage_uploaded: bool,
    pub brief_update_success: bool,
    pub gallery_item: Option<GalleryItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_error: Option<String>,
}

impl IngestOutcome {
    pub fn message(&self) -> String {
        let mut message = match (self.storage_uploaded, self.is_existing) {
            (false, _) => "Image registered in search index, but storage upload failed".to_string(),
            (true, true) => "Image already exists in library".to_string(),
            (true, false) => "Image added".to_string(),
        };
        if self.is_compressed {
            message.push_str(" (search copy compressed)");
        }
        message
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub score: f64,
    pub cont_sign: String,
    pub image_url: Option<String>,
    pub bos_url: Option<String>,
    pub bos_key: String,
    pub filename: Option<String>,
    pub filesize: Option<u64>,
    pub upload_time: Option<String>,
    pub additional_info: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub is_compressed: bool,
    pub original_size: usize,
    pub search_size: usize,
    pub results: Vec<SearchResult>,
}

impl SearchOutcome {
    pub fn message(&self) -> String {
        format!("Found {} similar images", self.results.len())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexedEntry {
    pub cont_sign: String,
    pub brief: String,
    pub image_url: Option<String>,
    pub bos_url: Option<String>,
    pub filename: Option<String>,
    pub filesize: Option<u64>,
    pub date_added: Option<String>,
    pub additional_info: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexListing {
    pub total: u64,
    pub start: u32,
    pub count: u32,
    pub images: Vec<IndexedEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShipmentImage {
    pub cont_sign: String,
    pub url: String,
    pub bos_key: String,
}

fn brief_string(brief: &Value, key: &str) -> Option<String> {
    brief
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn brief_size(brief: &Value, key: &str) -> Option<u64> {
    brief.get(key).and_then(Value::as_u64)
}

#[derive(Clone)]
pub struct IngestService {
    vision: SimilarSearchClient,
    storage: BosStorage,
    settings: IngestConfig,
}

impl IngestService {
    pub fn new(config: &Config) -> Result<Self, IngestError> {
        Ok(Self {
            vision: SimilarSearchClient::new(&config.vision)?,
            storage: BosStorage::new(config)?,
            settings: config.ingest.clone(),
        })
    }

    pub fn vision(&self) -> &SimilarSearchClient {
        &self.vision
    }

    pub fn storage(&self) -> &BosStorage {
        &self.storage
    }

    /// Compress on the blocking pool when the upload is above the threshold.
    /// Returns the original bytes and the compressed copy, if one was made.
    async fn search_copy(
        &self,
        bytes: Vec<u8>,
    ) -> Result<(Vec<u8>, Option<Vec<u8>>), IngestError> {
        if bytes.len() <= self.settings.compress_threshold_bytes {
            return Ok((bytes, None));
        }

        let options = CompressOptions::from(&self.settings);
        let (original, compressed) = tokio::task::spawn_blocking(move || {
            let compressed = compress_image(&bytes, &options);
            (bytes, compressed)
        })
        .await?;
        let compressed = compressed?;
        tracing::info!(
            original = original.len(),
            compressed = compressed.len(),
            "Compressed search copy"
        );
        Ok((original, Some(compressed)))
    }

    /// Add an image to the library: index, storage, brief and gallery row.
    pub async fn add_to_library(
        &self,
        db: &DBService,
        upload: Upload,
    ) -> Result<IngestOutcome, IngestError> {
        let Some(domain) = self.storage.domain().map(str::to_string) else {
            tracing::error!("Storage domain is not configured, refusing image ingest");
            return Err(IngestError::StorageNotConfigured);
        };
        if upload.bytes.is_empty() {
            return Err(IngestError::EmptyUpload);
        }

        let filename = upload.filename_or("upload.jpg");
        let content_type = upload.content_type();
        let filesize = upload.bytes.len();

        let (original, compressed) = self.search_copy(upload.bytes).await?;
        let is_compressed = compressed.is_some();
        let compressed_size = compressed.as_ref().map(Vec::len);
        let search_bytes = compressed.as_deref().unwrap_or(&original);

        let registered = self
            .vision
            .add(
                search_bytes,
                &registration_brief(&filename, filesize, &content_type, Utc::now()),
            )
            .await?;
        tracing::info!(
            cont_sign = ?registered.cont_sign,
            is_existing = registered.is_existing,
            %filename,
            "Image registered in search index"
        );

        let cont_sign = registered.cont_sign.clone();
        let bos_key = match cont_sign.as_deref() {
            Some(sign) => object_key(None, Some(sign)),
            None => object_key(Some(&filename), None),
        };
        let image_url = super::storage::public_url(&domain, &bos_key);

        let mut outcome = IngestOutcome {
            cont_sign: cont_sign.clone(),
            image_url: image_url.clone(),
            bos_key: bos_key.clone(),
            filename: filename.clone(),
            filesize,
            is_existing: registered.is_existing,
            is_compressed,
            compressed_size,
            storage_uploaded: false,
            brief_update_success: false,
            gallery_item: None,
            storage_error: None,
        };

        let metadata = [
            ("original-filename", filename.clone()),
            ("cont-sign", cont_sign.clone().unwrap_or_default()),
        ];
        match self
            .storage
            .put_object(&bos_key, original, &content_type, &metadata)
            .await
        {
            Ok(_) => outcome.storage_uploaded = true,
            Err(err) => {
                tracing::error!(%bos_key, error = %err, "Storage upload failed after index registration");
                outcome.storage_error = Some(err.to_string());
            }
        }

        let Some(cont_sign) = cont_sign else {
            tracing::warn!(%filename, "Index reported a duplicate without a signature");
            return Ok(outcome);
        };

        let metadata = json!({
            "filename": filename,
            "filesize": filesize,
            "bosKey": bos_key,
            "isCompressed": is_compressed,
            "originalSize": filesize,
            "compressedSize": compressed_size,
            "updateTime": Utc::now().to_rfc3339(),
        });
        let brief = storage_brief(&cont_sign, &image_url, &bos_key, &metadata, Utc::now());
        outcome.brief_update_success = match self.vision.update_brief(&cont_sign, &brief).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%cont_sign, error = %err, "Failed to update image brief");
                false
            }
        };

        // The brief still points at the intended object; only stored images get a gallery row.
        if !outcome.storage_uploaded {
            return Ok(outcome);
        }

        let (item, existed) = GalleryItem::upsert_by_cont_sign(
            &db.pool,
            &CreateGalleryItem {
                cont_sign: cont_sign.clone(),
                image_url,
                bos_key: Some(bos_key),
                filename,
                filesize: filesize as i64,
                is_compressed,
                tags: Vec::new(),
            },
        )
        .await?;
        tracing::debug!(item_id = %item.id, existed, "Gallery item saved");
        outcome.gallery_item = Some(item);

        Ok(outcome)
    }

    /// Search the index for images similar to the upload.
    pub async fn search(&self, upload: Upload) -> Result<SearchOutcome, IngestError> {
        if upload.bytes.is_empty() {
            return Err(IngestError::EmptyUpload);
        }
        let original_size = upload.bytes.len();
        if original_size > self.settings.max_search_bytes {
            return Err(IngestError::TooLarge {
                size: original_size,
                max: self.settings.max_search_bytes,
            });
        }

        let (original, compressed) = self.search_copy(upload.bytes).await?;
        let search_bytes = compressed.as_deref().unwrap_or(&original);
        let hits = self.vision.search(search_bytes).await?;

        let domain = self.storage.domain();
        let results = hits
            .into_iter()
            .map(|hit| {
                let brief = parse_brief(&hit.brief);
                let image_url = domain.map(|domain| url_for_cont_sign(domain, &hit.cont_sign));
                SearchResult {
                    score: hit.score,
                    bos_key: object_key(None, Some(&hit.cont_sign)),
                    bos_url: image_url.clone(),
                    image_url,
                    filename: brief_string(&brief, "filename")
                        .or_else(|| brief_string(&brief, "fileName")),
                    filesize: brief_size(&brief, "filesize")
                        .or_else(|| brief_size(&brief, "fileSize")),
                    upload_time: brief_string(&brief, "uploadTime"),
                    cont_sign: hit.cont_sign,
                    additional_info: brief,
                }
            })
            .collect();

        Ok(SearchOutcome {
            is_compressed: compressed.is_some(),
            original_size,
            search_size: search_bytes.len(),
            results,
        })
    }

    /// One page of the vendor index, enriched from each brief.
    pub async fn list_indexed(&self, start: u32, count: u32) -> Result<IndexListing, IngestError> {
        let page = self.vision.list(start, count).await?;
        let images = page
            .images
            .into_iter()
            .map(|image| {
                let brief = parse_brief(&image.brief);
                IndexedEntry {
                    image_url: brief_string(&brief, "imageUrl"),
                    bos_url: brief_string(&brief, "bosUrl"),
                    filename: brief_string(&brief, "filename")
                        .or_else(|| brief_string(&brief, "fileName")),
                    filesize: brief_size(&brief, "filesize")
                        .or_else(|| brief_size(&brief, "fileSize")),
                    date_added: brief_string(&brief, "dateAdded")
                        .or_else(|| brief_string(&brief, "uploadTime")),
                    cont_sign: image.cont_sign,
                    brief: image.brief,
                    additional_info: brief,
                }
            })
            .collect();

        Ok(IndexListing {
            total: page.total,
            start,
            count,
            images,
        })
    }

    /// Store a shipment photo under a locally minted id. The search index is
    /// not involved.
    pub async fn upload_shipment_image(&self, upload: Upload) -> Result<ShipmentImage, IngestError> {
        if upload.bytes.is_empty() {
            return Err(IngestError::EmptyUpload);
        }
        let cont_sign = format!(
            "shipment_{}_{}",
            now_millis(),
            random_base36(SHIPMENT_ID_SUFFIX_LEN)
        );
        let bos_key = object_key(upload.filename.as_deref(), Some(&cont_sign));
        let content_type = upload.content_type();
        let filename = upload.filename_or("shipment.jpg");

        let stored = self
            .storage
            .put_object(
                &bos_key,
                upload.bytes,
                &content_type,
                &[("original-filename", filename)],
            )
            .await?;
        tracing::info!(%cont_sign, %bos_key, "Stored shipment image");

        Ok(ShipmentImage {
            cont_sign,
            url: stored.url,
            bos_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, sync::atomic::Ordering};

    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use test_support::vendor::{AddBehavior, MockVendor};

    use super::*;
    use crate::services::config::mock_vendor_config;

    async fn memory_db() -> DBService {
        DBService::connect("sqlite::memory:").await.unwrap()
    }

    fn png(width: u32, height: u32, noisy: bool) -> Vec<u8> {
        let mut state: u32 = 0x1234_5678;
        let buffer = ImageBuffer::from_fn(width, height, |x, y| {
            if noisy {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                let [a, b, c, _] = state.to_le_bytes();
                Rgb([a, b, c])
            } else {
                Rgb([(x % 256) as u8, (y % 256) as u8, 128])
            }
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(buffer)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn upload(bytes: Vec<u8>, name: &str) -> Upload {
        Upload {
            bytes,
            filename: Some(name.to_string()),
            content_type: Some("image/png".to_string()),
        }
    }

    #[tokio::test]
    async fn new_image_is_indexed_stored_and_persisted() {
        let vendor = MockVendor::start().await;
        let db = memory_db().await;
        let service = IngestService::new(&mock_vendor_config(&vendor)).unwrap();

        let original = png(64, 48, false);
        let outcome = service
            .add_to_library(&db, upload(original.clone(), "oak.png"))
            .await
            .unwrap();

        assert!(!outcome.is_existing);
        assert!(!outcome.is_compressed);
        assert!(outcome.storage_uploaded);
        assert!(outcome.brief_update_success);
        assert_eq!(outcome.message(), "Image added");

        let cont_sign = outcome.cont_sign.clone().unwrap();
        assert_eq!(outcome.bos_key, object_key(None, Some(&cont_sign)));
        assert_eq!(vendor.object(&outcome.bos_key).unwrap().bytes, original);

        let brief = parse_brief(&vendor.brief(&cont_sign).unwrap());
        assert_eq!(brief["imageUrl"], outcome.image_url.as_str());
        assert_eq!(brief["filename"], "oak.png");

        let item = GalleryItem::find_by_cont_sign(&db.pool, &cont_sign)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.image_url, outcome.image_url);
        assert_eq!(item.filesize, original.len() as i64);
    }

    #[tokio::test]
    async fn duplicate_is_reported_as_existing() {
        let vendor = MockVendor::start().await;
        vendor.set_add_behavior(AddBehavior::Duplicate {
            cont_sign: Some("77,88".to_string()),
        });
        let db = memory_db().await;
        let service = IngestService::new(&mock_vendor_config(&vendor)).unwrap();

        let outcome = service
            .add_to_library(&db, upload(png(32, 32, false), "dup.png"))
            .await
            .unwrap();

        assert!(outcome.is_existing);
        assert_eq!(outcome.cont_sign.as_deref(), Some("77,88"));
        assert_eq!(outcome.bos_key, "images/77_88.png");
        assert_eq!(outcome.message(), "Image already exists in library");
        assert!(outcome.gallery_item.is_some());
    }

    #[tokio::test]
    async fn duplicate_without_signature_uses_filename_key() {
        let vendor = MockVendor::start().await;
        vendor.set_add_behavior(AddBehavior::Duplicate { cont_sign: None });
        let db = memory_db().await;
        let service = IngestService::new(&mock_vendor_config(&vendor)).unwrap();

        let outcome = service
            .add_to_library(&db, upload(png(32, 32, false), "walnut table.png"))
            .await
            .unwrap();

        assert!(outcome.is_existing);
        assert!(outcome.bos_key.ends_with("-walnut_table.png"), "{}", outcome.bos_key);
        assert!(!outcome.brief_update_success);
        assert!(outcome.gallery_item.is_none());
    }

    #[tokio::test]
    async fn large_upload_is_compressed_for_search_only() {
        let vendor = MockVendor::start().await;
        let db = memory_db().await;
        let service = IngestService::new(&mock_vendor_config(&vendor)).unwrap();

        let original = png(1200, 1000, true);
        assert!(original.len() > 3 * 1024 * 1024);

        let outcome = service
            .add_to_library(&db, upload(original.clone(), "big.png"))
            .await
            .unwrap();

        assert!(outcome.is_compressed);
        let compressed = outcome.compressed_size.unwrap();
        assert!(compressed <= 3 * 1024 * 1024);
        assert_eq!(vendor.last_indexed_size(), Some(compressed));
        assert_eq!(vendor.object(&outcome.bos_key).unwrap().bytes.len(), original.len());
        assert_eq!(outcome.message(), "Image added (search copy compressed)");
    }

    #[tokio::test]
    async fn storage_failure_is_partial_success() {
        let vendor = MockVendor::start().await;
        vendor.fail_storage(true);
        let db = memory_db().await;
        let service = IngestService::new(&mock_vendor_config(&vendor)).unwrap();

        let outcome = service
            .add_to_library(&db, upload(png(32, 32, false), "x.png"))
            .await
            .unwrap();

        assert!(!outcome.storage_uploaded);
        assert!(outcome.storage_error.is_some());
        assert!(outcome.gallery_item.is_none());
        assert_eq!(vendor.indexed_count(), 1);
        assert!(outcome.message().contains("storage upload failed"));

        assert!(outcome.brief_update_success);
        let cont_sign = outcome.cont_sign.clone().unwrap();
        let brief = parse_brief(&vendor.brief(&cont_sign).unwrap());
        assert_eq!(brief["imageUrl"], outcome.image_url.as_str());
        assert_eq!(brief["bosKey"], outcome.bos_key.as_str());
        assert!(
            GalleryItem::find_by_cont_sign(&db.pool, &cont_sign)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn index_rejection_fails_the_request() {
        let vendor = MockVendor::start().await;
        vendor.set_add_behavior(AddBehavior::Fail {
            code: 216201,
            message: "image format error".to_string(),
        });
        let db = memory_db().await;
        let service = IngestService::new(&mock_vendor_config(&vendor)).unwrap();

        let err = service
            .add_to_library(&db, upload(png(32, 32, false), "x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Vision(VisionError::Api { code: 216201, .. })));
        assert!(vendor.object("images/x.png").is_none());
    }

    #[tokio::test]
    async fn missing_domain_refuses_before_calling_out() {
        let vendor = MockVendor::start().await;
        let mut config = mock_vendor_config(&vendor);
        config.storage.domain = None;
        let db = memory_db().await;
        let service = IngestService::new(&config).unwrap();

        let err = service
            .add_to_library(&db, upload(png(8, 8, false), "x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::StorageNotConfigured));
        assert_eq!(vendor.state.add_requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn search_enriches_hits_from_brief() {
        let vendor = MockVendor::start().await;
        let db = memory_db().await;
        let service = IngestService::new(&mock_vendor_config(&vendor)).unwrap();

        let image = png(40, 40, false);
        let added = service
            .add_to_library(&db, upload(image.clone(), "chair.png"))
            .await
            .unwrap();

        let found = service.search(Upload::new(image)).await.unwrap();
        assert!(!found.is_compressed);
        assert_eq!(found.results.len(), 1);
        let hit = &found.results[0];
        assert_eq!(hit.cont_sign, added.cont_sign.unwrap());
        assert_eq!(hit.image_url.as_deref(), Some(added.image_url.as_str()));
        assert_eq!(hit.filename.as_deref(), Some("chair.png"));

        let listing = service.list_indexed(0, 100).await.unwrap();
        assert_eq!(listing.total, 1);
        assert_eq!(listing.images[0].image_url.as_deref(), Some(added.image_url.as_str()));
    }

    #[tokio::test]
    async fn search_rejects_oversized_and_empty_uploads() {
        let vendor = MockVendor::start().await;
        let mut config = mock_vendor_config(&vendor);
        config.ingest.max_search_bytes = config.ingest.compress_threshold_bytes;
        let service = IngestService::new(&config).unwrap();

        let too_big = vec![0u8; config.ingest.max_search_bytes + 1];
        assert!(matches!(
            service.search(Upload::new(too_big)).await,
            Err(IngestError::TooLarge { .. })
        ));
        assert!(matches!(
            service.search(Upload::new(Vec::new())).await,
            Err(IngestError::EmptyUpload)
        ));
    }

    #[tokio::test]
    async fn shipment_images_skip_the_index() {
        let vendor = MockVendor::start().await;
        let service = IngestService::new(&mock_vendor_config(&vendor)).unwrap();

        let stored = service
            .upload_shipment_image(upload(png(16, 16, false), "box.jpg"))
            .await
            .unwrap();

        assert!(stored.cont_sign.starts_with("shipment_"));
        assert_eq!(stored.bos_key, format!("images/{}.png", stored.cont_sign));
        assert!(vendor.object(&stored.bos_key).is_some());
        assert_eq!(vendor.state.add_requests.load(Ordering::SeqCst), 0);
    }
}
