use std::{
    io::{Cursor, Write},
    time::Duration,
};

use chrono::{Local, NaiveDate};
use db::models::shipment::Shipment;
use reqwest::{
    header::{CONTENT_LENGTH, CONTENT_TYPE},
    redirect::Policy,
};
use thiserror::Error;
use url::Url;
use utils_core::text::sanitize_file_name;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use super::{config::Config, storage::public_url};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("No shipments selected for export")]
    Empty,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Archive task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Why a shipment image was left out of an archive.
#[derive(Debug, Error)]
enum FetchError {
    #[error("image URL is outside the storage domain")]
    Disallowed,
    #[error("image is larger than {0} bytes")]
    TooLarge(usize),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// What the archive contains, reflected in its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportSelection {
    Selected(usize),
    Pending,
}

impl ExportSelection {
    fn label(self) -> String {
        match self {
            ExportSelection::Selected(count) => format!("selected-{count}"),
            ExportSelection::Pending => "pending".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportArchive {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub images: usize,
    pub documents: usize,
}

pub fn archive_name(date: NaiveDate, selection: ExportSelection) -> String {
    format!("{}_{}.zip", date.format("%Y%m%d"), selection.label())
}

fn or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let value = value.trim();
    if value.is_empty() { fallback } else { value }
}

fn image_stem(number: &str, shipment: &Shipment) -> String {
    format!(
        "{number}_{}_{}",
        sanitize_file_name(or_default(&shipment.material, "unknown-material")),
        sanitize_file_name(or_default(&shipment.size, "standard"))
    )
}

fn document_name(number: &str, shipment: &Shipment) -> String {
    let first_segment = or_default(&shipment.address, "unknown-address")
        .split([',', '，'])
        .next()
        .map(str::trim)
        .unwrap_or_default();
    format!(
        "{number}_{}.txt",
        sanitize_file_name(or_default(first_segment, "unknown-address"))
    )
}

/// Packing slip text with CRLF line endings.
fn document_body(shipment: &Shipment) -> String {
    [
        "Shipping address:".to_string(),
        or_default(&shipment.address, "(no address)").to_string(),
        String::new(),
        "Item:".to_string(),
        format!("Material: {}", or_default(&shipment.material, "(not specified)")),
        format!("Size: {}", or_default(&shipment.size, "standard")),
        format!("Quantity: {}", shipment.quantity.max(1)),
        String::new(),
        "Notes:".to_string(),
        or_default(&shipment.notes, "(no notes)").to_string(),
        String::new(),
    ]
    .join("\r\n")
}

struct Entry {
    name: String,
    bytes: Vec<u8>,
}

/// Images are only fetched from the configured storage domain.
#[derive(Clone)]
pub struct ShipmentExporter {
    http: reqwest::Client,
    storage_base: Option<Url>,
    max_image_bytes: usize,
}

fn storage_base(config: &Config) -> Option<Url> {
    let domain = config.storage.domain.as_deref()?;
    match Url::parse(&public_url(domain, "")) {
        Ok(base) => Some(base),
        Err(err) => {
            tracing::warn!(%domain, error = %err, "Storage domain is not a valid URL");
            None
        }
    }
}

impl ShipmentExporter {
    pub fn new(config: &Config) -> Result<Self, ExportError> {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .redirect(Policy::none())
            .build()?;
        Ok(Self {
            http,
            storage_base: storage_base(config),
            max_image_bytes: config.ingest.max_search_bytes,
        })
    }

    fn allowed_url(&self, raw: &str) -> Option<Url> {
        let base = self.storage_base.as_ref()?;
        let url = Url::parse(raw).ok()?;
        (url.origin() == base.origin() && url.path().starts_with(base.path())).then_some(url)
    }

    async fn fetch_image(&self, raw: &str) -> Result<(Vec<u8>, &'static str), FetchError> {
        let url = self.allowed_url(raw).ok_or(FetchError::Disallowed)?;
        let mut response = self.http.get(url).send().await?.error_for_status()?;

        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.max_image_bytes) {
            return Err(FetchError::TooLarge(self.max_image_bytes));
        }
        let extension = match response.headers().get(CONTENT_TYPE) {
            Some(value) if value.to_str().is_ok_and(|ct| ct.contains("png")) => "png",
            _ => "jpg",
        };

        let mut bytes = Vec::with_capacity(declared.unwrap_or_default());
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > self.max_image_bytes {
                return Err(FetchError::TooLarge(self.max_image_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok((bytes, extension))
    }

    /// Build the archive for `shipments`, numbered in the given order.
    pub async fn export(
        &self,
        shipments: &[Shipment],
        selection: ExportSelection,
    ) -> Result<ExportArchive, ExportError> {
        self.export_on(shipments, selection, Local::now().date_naive())
            .await
    }

    pub async fn export_on(
        &self,
        shipments: &[Shipment],
        selection: ExportSelection,
        date: NaiveDate,
    ) -> Result<ExportArchive, ExportError> {
        if shipments.is_empty() {
            return Err(ExportError::Empty);
        }

        let mut entries = Vec::with_capacity(shipments.len() * 2);
        let mut images = 0;
        for (index, shipment) in shipments.iter().enumerate() {
            let number = format!("{:02}", index + 1);

            if let Some(url) = shipment.image_url.as_deref().filter(|u| !u.is_empty()) {
                match self.fetch_image(url).await {
                    Ok((bytes, extension)) => {
                        images += 1;
                        entries.push(Entry {
                            name: format!("{}.{extension}", image_stem(&number, shipment)),
                            bytes,
                        });
                    }
                    Err(err) => {
                        tracing::warn!(
                            shipment_id = %shipment.id,
                            url,
                            error = %err,
                            "Skipping shipment image in export"
                        );
                    }
                }
            }

            entries.push(Entry {
                name: document_name(&number, shipment),
                bytes: document_body(shipment).into_bytes(),
            });
        }

        let documents = shipments.len();
        let bytes = tokio::task::spawn_blocking(move || write_zip(entries)).await??;
        let file_name = archive_name(date, selection);
        tracing::info!(
            %file_name,
            documents,
            images,
            size = bytes.len(),
            "Built shipment export"
        );

        Ok(ExportArchive {
            file_name,
            bytes,
            images,
            documents,
        })
    }
}

fn write_zip(entries: Vec<Entry>) -> Result<Vec<u8>, ExportError> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for entry in entries {
        writer.start_file(entry.name, options)?;
        writer.write_all(&entry.bytes)?;
    }
    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use chrono::Utc;
    use db::types::ShipmentStatus;
    use test_support::vendor::MockVendor;
    use uuid::Uuid;
    use zip::ZipArchive;

    use super::*;
    use crate::services::config::mock_vendor_config;

    fn shipment(address: &str, material: &str, size: &str, image_url: Option<String>) -> Shipment {
        Shipment {
            id: Uuid::new_v4(),
            address: address.to_string(),
            material: material.to_string(),
            size: size.to_string(),
            quantity: 2,
            notes: String::new(),
            status: ShipmentStatus::Pending,
            tags: vec![],
            image_url,
            cont_sign: None,
            gallery_item_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn read_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Vec<u8> {
        let mut file = archive.by_name(name).unwrap();
        let mut out = Vec::new();
        file.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn names_are_sanitized_and_defaulted() {
        let s = shipment("12 Oak St, Springfield", "red oak", "", None);
        assert_eq!(image_stem("01", &s), "01_red_oak_standard");
        assert_eq!(document_name("01", &s), "01_12_Oak_St.txt");

        let blank = shipment("", "a/b", "3*4", None);
        assert_eq!(image_stem("07", &blank), "07_a_b_3_4");
        assert_eq!(document_name("07", &blank), "07_unknown-address.txt");

        assert_eq!(
            archive_name(
                NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
                ExportSelection::Selected(3)
            ),
            "20240309_selected-3.zip"
        );
    }

    #[test]
    fn document_uses_crlf() {
        let body = document_body(&shipment("1 Main St", "pine", "40x60", None));
        assert!(body.starts_with("Shipping address:\r\n1 Main St\r\n\r\n"));
        assert!(body.contains("Material: pine\r\n"));
        assert!(body.contains("Quantity: 2\r\n"));
        assert!(body.ends_with("(no notes)\r\n"));
    }

    #[tokio::test]
    async fn empty_selection_is_rejected() {
        let exporter = ShipmentExporter::new(&Config::default()).unwrap();
        assert!(matches!(
            exporter.export(&[], ExportSelection::Pending).await,
            Err(ExportError::Empty)
        ));
    }

    #[tokio::test]
    async fn archive_contains_images_and_documents() {
        let vendor = MockVendor::start().await;
        let image_url = vendor.store_object("images/walnut.png", b"png-bytes".to_vec(), "image/png");

        let shipments = vec![
            shipment("1 Main St, Town", "walnut", "30x40", Some(image_url)),
            shipment(
                "2 Side Rd",
                "pine",
                "",
                Some(format!("{}/missing.png", vendor.public_domain())),
            ),
        ];

        let exporter = ShipmentExporter::new(&mock_vendor_config(&vendor)).unwrap();
        let archive = exporter
            .export_on(
                &shipments,
                ExportSelection::Pending,
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(archive.file_name, "20240102_pending.zip");
        assert_eq!(archive.images, 1);
        assert_eq!(archive.documents, 2);

        let mut zip = ZipArchive::new(Cursor::new(archive.bytes)).unwrap();
        assert_eq!(zip.len(), 3);
        assert_eq!(read_entry(&mut zip, "01_walnut_30x40.png"), b"png-bytes");
        let text = String::from_utf8(read_entry(&mut zip, "02_2_Side_Rd.txt")).unwrap();
        assert!(text.contains("Material: pine"));
    }

    #[tokio::test]
    async fn images_outside_the_storage_domain_are_not_fetched() {
        let vendor = MockVendor::start().await;
        let other = MockVendor::start().await;
        let foreign = other.store_object("images/secret.png", b"internal".to_vec(), "image/png");
        let sibling_bucket = format!("{}/bos/other-bucket/x.png", vendor.base_url);

        let shipments = vec![
            shipment("1 Main St", "oak", "", Some(foreign)),
            shipment("2 Main St", "oak", "", Some(sibling_bucket)),
            shipment("3 Main St", "oak", "", Some("file:///etc/passwd".to_string())),
        ];

        let exporter = ShipmentExporter::new(&mock_vendor_config(&vendor)).unwrap();
        let archive = exporter
            .export(&shipments, ExportSelection::Selected(3))
            .await
            .unwrap();
        assert_eq!(archive.images, 0);
        assert_eq!(archive.documents, 3);

        let unconfigured = ShipmentExporter::new(&Config::default()).unwrap();
        let own = vendor.store_object("images/own.png", b"png".to_vec(), "image/png");
        let archive = unconfigured
            .export(
                &[shipment("1 Main St", "oak", "", Some(own))],
                ExportSelection::Pending,
            )
            .await
            .unwrap();
        assert_eq!(archive.images, 0);
    }

    #[tokio::test]
    async fn oversized_images_are_skipped() {
        let vendor = MockVendor::start().await;
        let url = vendor.store_object("images/big.png", vec![0u8; 4096], "image/png");

        let mut exporter = ShipmentExporter::new(&mock_vendor_config(&vendor)).unwrap();
        exporter.max_image_bytes = 1024;
        let archive = exporter
            .export(
                &[shipment("1 Main St", "oak", "", Some(url))],
                ExportSelection::Pending,
            )
            .await
            .unwrap();
        assert_eq!(archive.images, 0);
        assert_eq!(archive.documents, 1);
    }
}
