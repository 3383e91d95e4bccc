//! `IMG` objects: uploads are re-encoded to WebP with a thumbnail and a
//! blurhash placeholder, and their files are removed with them.

use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat};
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use super::{AfterDeleteTrigger, AfterSaveTrigger, BeforeSaveTrigger, Trigger, TriggerContext, TriggerError};
use crate::files::LocalFilesAdapter;
use crate::store::{file_name, file_value, Document};

const CLASS: &str = "IMG";
const MAX_WIDTH: u32 = 1000;
const THUMBNAIL_SIZE: u32 = 300;
const BLURHASH_WIDTH: u32 = 100;
const BLURHASH_COMPONENTS: u32 = 4;

/// Encoded outputs for one source image.
#[derive(Debug)]
pub struct ProcessedImage {
    pub image: Vec<u8>,
    pub thumbnail: Vec<u8>,
    pub blur_hash: String,
}

fn encode_webp(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut out, ImageFormat::WebP)?;
    Ok(out.into_inner())
}

fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    ((height as u64 * target_width as u64) / width.max(1) as u64).max(1) as u32
}

/// Decode, shrink to at most 1000px wide, and derive the thumbnail and blurhash.
pub fn process_image(bytes: &[u8]) -> Result<ProcessedImage, String> {
    let source = image::load_from_memory(bytes).map_err(|e| format!("unreadable image: {}", e))?;
    let (width, height) = source.dimensions();

    let resized = if width > MAX_WIDTH {
        source.resize(MAX_WIDTH, scaled_height(width, height, MAX_WIDTH), FilterType::Lanczos3)
    } else {
        source.clone()
    };

    let thumbnail = if width > THUMBNAIL_SIZE || height > THUMBNAIL_SIZE {
        source.thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE)
    } else {
        source.clone()
    };

    let small = source
        .resize_exact(
            BLURHASH_WIDTH,
            scaled_height(width, height, BLURHASH_WIDTH),
            FilterType::Triangle,
        )
        .to_rgba8();
    let blur_hash = blurhash::encode(
        BLURHASH_COMPONENTS,
        BLURHASH_COMPONENTS,
        small.width(),
        small.height(),
        small.as_raw(),
    )
    .map_err(|e| format!("blurhash failed: {:?}", e))?;

    Ok(ProcessedImage {
        image: encode_webp(&resized).map_err(|e| e.to_string())?,
        thumbnail: encode_webp(&thumbnail).map_err(|e| e.to_string())?,
        blur_hash,
    })
}

/// Names the re-encoded copy and thumbnail of `upload` are stored under.
pub fn processed_names(upload: &str) -> (String, String) {
    let stem = upload.rsplit_once('.').map_or(upload, |(stem, _)| stem);
    (format!("{}_im.webp", stem), format!("{}_th.webp", stem))
}

fn file_field<'a>(data: &'a Document, field: &str) -> Option<&'a str> {
    data.get(field).and_then(file_name)
}

pub struct ProcessImage {
    files: Arc<LocalFilesAdapter>,
}

impl ProcessImage {
    pub fn new(files: Arc<LocalFilesAdapter>) -> Self {
        Self { files }
    }
}

impl Trigger for ProcessImage {
    fn name(&self) -> &'static str {
        "process_image"
    }

    fn class_name(&self) -> &'static str {
        CLASS
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

#[async_trait]
impl BeforeSaveTrigger for ProcessImage {
    async fn execute(&self, ctx: &mut TriggerContext) -> Result<(), TriggerError> {
        if !ctx.field_changed("image") {
            return Ok(());
        }
        let Some(upload) = file_field(&ctx.data, "image").map(str::to_string) else {
            return Ok(());
        };

        let bytes = self
            .files
            .get_file_data(&upload)
            .await
            .map_err(|e| TriggerError::Rejected(format!("Image file could not be read: {}", e)))?;

        let processed = tokio::task::spawn_blocking(move || process_image(&bytes))
            .await
            .map_err(|e| TriggerError::failed(self.name(), e))?
            .map_err(TriggerError::Rejected)?;

        let (image_name, thumbnail_name) = processed_names(&upload);
        self.files
            .create_file(&image_name, &processed.image)
            .await
            .map_err(|e| TriggerError::failed(self.name(), e))?;
        self.files
            .create_file(&thumbnail_name, &processed.thumbnail)
            .await
            .map_err(|e| TriggerError::failed(self.name(), e))?;

        // The raw upload is superseded by the re-encoded copy.
        if let Err(e) = self.files.delete_file(&upload).await {
            tracing::warn!("Could not remove raw upload {}: {}", upload, e);
        }

        ctx.data.insert("image".to_string(), file_value(&image_name));
        ctx.data.insert("imageThumbNail".to_string(), file_value(&thumbnail_name));
        ctx.data.insert("blurHash".to_string(), Value::String(processed.blur_hash));
        Ok(())
    }
}

async fn delete_files(files: &LocalFilesAdapter, data: &Document) -> Result<(), TriggerError> {
    for field in ["image", "imageThumbNail"] {
        if let Some(name) = file_field(data, field) {
            files
                .delete_file(name)
                .await
                .map_err(|e| TriggerError::failed("remove_image_files", e))?;
        }
    }
    Ok(())
}

/// Removes the previous files once an image has been replaced.
pub struct RemoveReplacedImage {
    files: Arc<LocalFilesAdapter>,
}

impl RemoveReplacedImage {
    pub fn new(files: Arc<LocalFilesAdapter>) -> Self {
        Self { files }
    }
}

impl Trigger for RemoveReplacedImage {
    fn name(&self) -> &'static str {
        "remove_replaced_image"
    }

    fn class_name(&self) -> &'static str {
        CLASS
    }
}

#[async_trait]
impl AfterSaveTrigger for RemoveReplacedImage {
    async fn execute(&self, ctx: &TriggerContext) -> Result<(), TriggerError> {
        let Some(original) = &ctx.original else {
            return Ok(());
        };
        let previous = file_field(&original.data, "image");
        if previous.is_none() || previous == file_field(&ctx.data, "image") {
            return Ok(());
        }
        delete_files(&self.files, &original.data).await
    }
}

pub struct RemoveImageFiles {
    files: Arc<LocalFilesAdapter>,
}

impl RemoveImageFiles {
    pub fn new(files: Arc<LocalFilesAdapter>) -> Self {
        Self { files }
    }
}

impl Trigger for RemoveImageFiles {
    fn name(&self) -> &'static str {
        "remove_image_files"
    }

    fn class_name(&self) -> &'static str {
        CLASS
    }
}

#[async_trait]
impl AfterDeleteTrigger for RemoveImageFiles {
    async fn execute(&self, ctx: &TriggerContext) -> Result<(), TriggerError> {
        delete_files(&self.files, &ctx.data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let buffer = ImageBuffer::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(buffer)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn adapter(dir: &std::path::Path) -> Arc<LocalFilesAdapter> {
        Arc::new(LocalFilesAdapter::new(dir, "ayn", "http://localhost:1337/api"))
    }

    #[test]
    fn shrinks_wide_images() {
        let processed = process_image(&png(1600, 400)).unwrap();
        let image = image::load_from_memory(&processed.image).unwrap();
        assert_eq!(image.dimensions(), (1000, 250));

        let thumb = image::load_from_memory(&processed.thumbnail).unwrap();
        assert!(thumb.width() <= THUMBNAIL_SIZE && thumb.height() <= THUMBNAIL_SIZE);
        assert!(!processed.blur_hash.is_empty());
    }

    #[test]
    fn never_enlarges() {
        let processed = process_image(&png(40, 20)).unwrap();
        let image = image::load_from_memory(&processed.image).unwrap();
        assert_eq!(image.dimensions(), (40, 20));
    }

    #[test]
    fn rejects_garbage() {
        assert!(process_image(b"not an image").is_err());
    }

    #[tokio::test]
    async fn before_save_replaces_the_upload() {
        let dir = tempfile::tempdir().unwrap();
        let files = adapter(dir.path());
        files.create_file("raw.png", &png(20, 20)).await.unwrap();

        let mut data = Document::new();
        data.insert("image".to_string(), file_value("raw.png"));
        let mut ctx = TriggerContext::new(CLASS, data);
        ProcessImage::new(files.clone()).execute(&mut ctx).await.unwrap();

        let image = file_field(&ctx.data, "image").unwrap().to_string();
        assert_eq!(image, "raw_im.webp");
        assert_eq!(file_field(&ctx.data, "imageThumbNail"), Some("raw_th.webp"));
        assert!(ctx.data["blurHash"].is_string());
        assert!(files.get_file_data(&image).await.is_ok());
        assert!(files.get_file_data("raw.png").await.is_err());

        RemoveImageFiles::new(files.clone()).execute(&ctx).await.unwrap();
        assert!(files.get_file_data(&image).await.is_err());
    }
}
