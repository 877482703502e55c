//! Image metadata from a local file or a URL.

use crate::models::{ModuleError, PartialResult, Query, QueryType};
use crate::modules::{encode_component, link_list, Module, ScanContext};
use crate::net::ProviderRequest;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::Path;

const MAX_IMAGE_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Tiff,
}

impl ImageFormat {
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageFormat::Webp)
        } else if bytes.starts_with(b"BM") {
            Some(ImageFormat::Bmp)
        } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            Some(ImageFormat::Tiff)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Tiff => "tiff",
        }
    }
}

/// Width and height, where the header encodes them.
pub fn dimensions(format: ImageFormat, bytes: &[u8]) -> Option<(u32, u32)> {
    match format {
        ImageFormat::Png => {
            let w = bytes.get(16..20)?;
            let h = bytes.get(20..24)?;
            Some((
                u32::from_be_bytes(w.try_into().ok()?),
                u32::from_be_bytes(h.try_into().ok()?),
            ))
        }
        ImageFormat::Gif => {
            let w = bytes.get(6..8)?;
            let h = bytes.get(8..10)?;
            Some((
                u16::from_le_bytes(w.try_into().ok()?) as u32,
                u16::from_le_bytes(h.try_into().ok()?) as u32,
            ))
        }
        ImageFormat::Bmp => {
            let w = bytes.get(18..22)?;
            let h = bytes.get(22..26)?;
            Some((
                i32::from_le_bytes(w.try_into().ok()?).unsigned_abs(),
                i32::from_le_bytes(h.try_into().ok()?).unsigned_abs(),
            ))
        }
        ImageFormat::Jpeg => jpeg_dimensions(bytes),
        ImageFormat::Webp | ImageFormat::Tiff => None,
    }
}

/// Walk JPEG segments up to the first start-of-frame marker.
fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2;
    while i + 4 <= bytes.len() {
        if bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        let length = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
        let is_sof = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            let h = bytes.get(i + 5..i + 7)?;
            let w = bytes.get(i + 7..i + 9)?;
            return Some((
                u16::from_be_bytes([w[0], w[1]]) as u32,
                u16::from_be_bytes([h[0], h[1]]) as u32,
            ));
        }
        i += 2 + length;
    }
    None
}

/// JPEG files carrying an APP1 Exif segment.
pub fn has_exif(format: ImageFormat, bytes: &[u8]) -> bool {
    match format {
        ImageFormat::Jpeg => bytes.windows(6).take(64 * 1024).any(|w| w == b"Exif\0\0"),
        ImageFormat::Tiff => true,
        _ => false,
    }
}

fn is_url(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://")
}

/// Format, dimensions, hash and reverse-search links.
pub struct ImageMetadataModule;

impl ImageMetadataModule {
    async fn load(&self, target: &str, ctx: &ScanContext) -> Result<Vec<u8>, ModuleError> {
        if is_url(target) {
            let response = ctx
                .fetch_ok(self.name(), ProviderRequest::get("image_host", target))
                .await?;
            return Ok(response.body);
        }

        let path = Path::new(target);
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            ModuleError::invalid_target(self.name(), format!("cannot read {}: {}", path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(ModuleError::invalid_target(self.name(), "not a regular file"));
        }
        if metadata.len() as usize > MAX_IMAGE_BYTES {
            return Err(ModuleError::invalid_target(self.name(), "image exceeds 25 MiB"));
        }

        tokio::fs::read(path)
            .await
            .map_err(|e| ModuleError::unknown(self.name(), format!("read failed: {}", e)))
    }
}

#[async_trait]
impl Module for ImageMetadataModule {
    fn name(&self) -> &'static str {
        "image_metadata"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Image]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        ctx.checkpoint(self.name())?;
        let target = query.value();
        let bytes = self.load(target, ctx).await?;

        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(ModuleError::invalid_target(self.name(), "image exceeds 25 MiB"));
        }
        let format = ImageFormat::detect(&bytes)
            .ok_or_else(|| ModuleError::invalid_target(self.name(), "not a recognized image format"))?;

        let digest = Sha256::digest(&bytes);
        let sha256: String = digest.iter().map(|b| format!("{:02x}", b)).collect();

        let mut result = PartialResult::new(self.name(), 0.95)
            .with_field("image.format", format.as_str())
            .with_field("image.size_bytes", bytes.len())
            .with_field("image.sha256", sha256)
            .with_field("image.source", if is_url(target) { "url" } else { "file" })
            .with_field("image.has_exif", has_exif(format, &bytes));

        match dimensions(format, &bytes) {
            Some((w, h)) => {
                result.set("image.width", w as u64);
                result.set("image.height", h as u64);
            }
            None => result.warn(format!("dimensions not available for {}", format.as_str())),
        }

        let links = if is_url(target) {
            let url = encode_component(target);
            link_list(&[
                ("Google Lens", format!("https://lens.google.com/uploadbyurl?url={}", url)),
                ("Yandex", format!("https://yandex.com/images/search?rpt=imageview&url={}", url)),
                ("Bing", format!("https://www.bing.com/images/search?view=detailv2&iss=sbi&q=imgurl:{}", url)),
                ("TinEye", format!("https://tineye.com/search?url={}", url)),
            ])
        } else {
            link_list(&[
                ("Google Lens", "https://lens.google.com/".to_string()),
                ("Yandex", "https://yandex.com/images/".to_string()),
                ("TinEye", "https://tineye.com/".to_string()),
            ])
        };
        result.set("links.reverse_search", links);

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorKind, FieldValue};
    use crate::modules::testing::*;
    use crate::net::ProviderResponse;
    use std::sync::Arc;

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
        bytes
    }

    #[test]
    fn test_detect_formats() {
        assert_eq!(ImageFormat::detect(&png_header(1, 1)), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::detect(b"GIF89a\x01\x00"), Some(ImageFormat::Gif));
        assert_eq!(ImageFormat::detect(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::detect(b"plain text"), None);
    }

    #[test]
    fn test_dimensions() {
        assert_eq!(dimensions(ImageFormat::Png, &png_header(640, 480)), Some((640, 480)));
        assert_eq!(
            dimensions(ImageFormat::Gif, b"GIF89a\x20\x03\x58\x02"),
            Some((800, 600))
        );

        // SOI, APP0 (length 4), SOF0 with height 2, width 3
        let jpeg = [
            0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00, 0xFF, 0xC0, 0x00, 0x11, 0x08, 0x00,
            0x02, 0x00, 0x03,
        ];
        assert_eq!(dimensions(ImageFormat::Jpeg, &jpeg), Some((3, 2)));
    }

    #[tokio::test]
    async fn test_local_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        std::fs::write(&path, png_header(1920, 1080)).unwrap();

        let ctx = context(Arc::new(MockProvider::new()));
        let query = Query::new(QueryType::Image, path.to_string_lossy()).unwrap();

        let result = ImageMetadataModule.investigate(&query, &ctx).await.unwrap();

        assert_eq!(result.fields["image.format"], FieldValue::from("png"));
        assert_eq!(result.fields["image.width"], FieldValue::from(1920u64));
        assert_eq!(result.fields["image.source"], FieldValue::from("file"));
        assert_eq!(result.fields["image.sha256"].to_string().len(), 64);
    }

    #[tokio::test]
    async fn test_missing_file_is_invalid_target() {
        let ctx = context(Arc::new(MockProvider::new()));
        let query = Query::new(QueryType::Image, "/definitely/not/here.jpg").unwrap();

        let err = ImageMetadataModule.investigate(&query, &ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTarget);
    }

    #[tokio::test]
    async fn test_remote_image() {
        let mock = Arc::new(MockProvider::new().on(
            "img.example.com",
            ProviderResponse::new(200, png_header(10, 20)),
        ));
        let ctx = context(mock.clone());
        let query = Query::new(QueryType::Image, "https://img.example.com/a.png").unwrap();

        let result = ImageMetadataModule.investigate(&query, &ctx).await.unwrap();

        assert_eq!(result.fields["image.source"], FieldValue::from("url"));
        assert!(result.fields["links.reverse_search"].to_string().contains("tineye.com/search"));
        assert_eq!(mock.calls()[0].provider, "image_host");
    }
}
