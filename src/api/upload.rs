use std::collections::HashMap;
use std::path::Path;

use axum::extract::Multipart;
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt;

use super::error::ApiError;

pub const PHOTO_FIELD: &str = "photo";

/// An uploaded file spooled to disk. The temp file is removed when this value
/// is dropped, whichever way the handler exits.
pub struct SpooledUpload {
    pub filename: String,
    path: TempPath,
}

impl SpooledUpload {
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

/// Multipart body split into the photo (if any) and the text fields.
pub struct UploadForm {
    pub photo: Option<SpooledUpload>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    /// The photo, or the 400 the client should get for a missing one.
    pub fn require_photo(&mut self) -> Result<SpooledUpload, ApiError> {
        let photo = self
            .photo
            .take()
            .ok_or_else(|| ApiError::BadRequest("No photo was provided.".to_string()))?;
        if photo.filename.is_empty() {
            return Err(ApiError::BadRequest("Invalid file name.".to_string()));
        }
        Ok(photo)
    }
}

pub async fn read_form(mut multipart: Multipart, upload_dir: &Path) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm { photo: None, fields: HashMap::new() };
    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == PHOTO_FIELD {
            let filename = field.file_name().unwrap_or_default().to_string();
            let dir = upload_dir.to_path_buf();
            let (file, path) = tokio::task::spawn_blocking(move || NamedTempFile::new_in(dir))
                .await??
                .into_parts();
            // `path` removes the file on drop from here on, even if the body
            // breaks off mid-stream.
            let mut file = tokio::fs::File::from_std(file);
            while let Some(chunk) = field.chunk().await? {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            // A repeated photo field replaces the earlier one, whose temp file
            // is dropped here.
            form.photo = Some(SpooledUpload { filename, path });
        } else if !name.is_empty() {
            let value = field.text().await?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}
