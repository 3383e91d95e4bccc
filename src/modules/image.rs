//! Image uploads as base64 payloads. The `IMG` triggers do the re-encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};

use crate::acl::Acl;
use crate::app::AppState;
use crate::error::ApiError;
use crate::files::LocalFilesAdapter;
use crate::functions::{FunctionConfig, FunctionRegistry, FunctionRequest, ParamRule};
use crate::modules::{doc, file_url};
use crate::store::file_value;
use crate::triggers::image::processed_names;

const DEFAULT_NAME: &str = "upload.png";

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(
        "uploadImage",
        FunctionConfig::post()
            .require_user()
            .param(ParamRule::string("base64").required())
            .param(ParamRule::string("filename")),
        upload_image,
    );
    registry.register(
        "deleteImage",
        FunctionConfig::post()
            .require_user()
            .param(ParamRule::string("image_id").required()),
        delete_image,
    );
}

/// Accepts bare base64 or a `data:<mime>;base64,` URL.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, ApiError> {
    let encoded = match payload.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    STANDARD
        .decode(encoded.trim())
        .map_err(|_| ApiError::field_error("base64", "base64 is not valid base64 data"))
}

async fn upload_image(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let bytes = decode_payload(&req.str_param("base64")?)?;
    if bytes.is_empty() {
        return Err(ApiError::field_error("base64", "base64 must not be empty"));
    }
    if bytes.len() > state.config.files.max_upload_bytes {
        return Err(ApiError::payload_too_large("Image is too large"));
    }

    let original = req.opt_str("filename").unwrap_or_else(|| DEFAULT_NAME.to_string());
    LocalFilesAdapter::validate_filename(&original)?;
    let stored = LocalFilesAdapter::stored_name(&original);
    state.files.create_file(&stored, &bytes).await?;

    let mut acl = Acl::new();
    acl.set_public_read(true);
    acl.set_read_access(&caller.user_id, true);
    acl.set_write_access(&caller.user_id, true);

    let created = state
        .data
        .create(
            "IMG",
            doc(json!({ "image": file_value(&stored) })),
            Some(acl),
            Some(&caller.user_id),
        )
        .await;
    let img = match created {
        Ok(img) => img,
        Err(e) => {
            discard_upload(&state.files, &stored).await;
            return Err(e);
        }
    };
    tracing::info!("Image {} uploaded by {}", img.id, caller.user_id);

    Ok(json!({
        "message": "Image uploaded successfully",
        "id": img.id,
        "image": file_url(&state, &img, "image"),
        "thumbnail": file_url(&state, &img, "imageThumbNail"),
        "blurHash": img.str_field("blurHash"),
    }))
}

/// Remove an upload whose `IMG` was never saved, along with any copies the
/// save trigger already wrote for it.
pub(crate) async fn discard_upload(files: &LocalFilesAdapter, upload: &str) {
    let (image, thumbnail) = processed_names(upload);
    for name in [upload, image.as_str(), thumbnail.as_str()] {
        if let Err(e) = files.delete_file(name).await {
            tracing::warn!("Could not remove upload file {}: {}", name, e);
        }
    }
}

async fn delete_image(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let img = state
        .data
        .fetch("IMG", &req.str_param("image_id")?, "Image not found")
        .await?;

    if let Some(acl) = &img.acl {
        let roles = state.data.user_roles(&caller.user_id).await?;
        if !acl.can_write(Some(&caller.user_id), &roles) {
            return Err(ApiError::forbidden("You cannot delete this image"));
        }
    }

    state.data.destroy(&img, Some(&caller.user_id)).await?;
    tracing::info!("Image {} deleted by {}", img.id, caller.user_id);
    Ok(json!({ "message": "Image deleted successfully", "id": img.id }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bare_and_data_url_payloads() {
        assert_eq!(decode_payload("aGVsbG8=").ok(), Some(b"hello".to_vec()));
        assert_eq!(
            decode_payload("data:image/png;base64,aGVsbG8=").ok(),
            Some(b"hello".to_vec())
        );
        assert!(decode_payload("not base64!").is_err());
    }

    #[tokio::test]
    async fn failed_uploads_leave_no_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let files = LocalFilesAdapter::new(dir.path(), "ayn", "http://localhost:1337/api");
        let upload = LocalFilesAdapter::stored_name("photo.png");
        let (image, thumbnail) = processed_names(&upload);
        // The trigger has already replaced the raw upload with its copies.
        files.create_file(&image, b"webp").await.unwrap();
        files.create_file(&thumbnail, b"webp").await.unwrap();

        discard_upload(&files, &upload).await;
        assert!(files.get_file_data(&image).await.is_err());
        assert!(files.get_file_data(&thumbnail).await.is_err());
        assert!(files.get_file_data(&upload).await.is_err());
    }
}
