use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::{NamedTempFile, TempPath};
use tracing::debug;

use crate::classify::Classification;
use crate::error::{Error, Result};
use crate::platform::{EntityInfo, NativeMessage, TelegramApi};

/// A downloaded attachment living in a temporary file.
///
/// The file is deleted when the handle is dropped or explicitly released,
/// whichever comes first.
#[derive(Debug)]
pub struct TransientMedia {
    path: TempPath,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
}

impl TransientMedia {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open(&self) -> io::Result<std::fs::File> {
        std::fs::File::open(&self.path)
    }

    pub fn release(self) -> io::Result<()> {
        self.path.close()
    }
}

/// Streams message media into transient local files.
pub struct MediaMaterializer {
    api: Arc<dyn TelegramApi>,
    dir: Option<PathBuf>,
}

impl MediaMaterializer {
    pub fn new(api: Arc<dyn TelegramApi>, dir: Option<PathBuf>) -> Self {
        Self { api, dir }
    }

    pub async fn materialize(
        &self,
        message: &NativeMessage,
        classification: &Classification,
    ) -> Result<TransientMedia> {
        let path = self.scratch_file("tg-media-", classification.suffix.as_deref())?;
        self.api
            .download_media(message, &path)
            .await
            .map_err(|e| Error::network("Failed to download media", e))?;

        let mime_type = classification.mime_type.clone().or_else(|| {
            mime_guess::from_path(&path)
                .first()
                .map(|mime| mime.essence_str().to_string())
        });
        debug!(
            chat_id = message.chat_id(),
            message_id = message.id,
            path = %path.display(),
            "Materialized media"
        );

        Ok(TransientMedia {
            path,
            filename: classification.filename.clone(),
            mime_type,
        })
    }

    /// Download an entity's profile photo. `None` when it has no photo.
    pub async fn profile_photo(&self, entity: &EntityInfo) -> Result<Option<ChatPicture>> {
        let path = self.scratch_file("tg-photo-", Some(".jpg"))?;
        let found = self
            .api
            .download_profile_photo(entity, &path)
            .await
            .map_err(|e| Error::network("Failed to download profile photo", e))?;
        if !found {
            return Ok(None);
        }
        let file = std::fs::File::open(&path)
            .map_err(|e| Error::io(format!("Failed to open {}", path.display()), e))?;
        Ok(Some(ChatPicture { file, path }))
    }

    fn scratch_file(&self, prefix: &str, suffix: Option<&str>) -> Result<TempPath> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        if let Some(suffix) = suffix {
            builder.suffix(suffix);
        }
        let file: NamedTempFile = match &self.dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| Error::io("Failed to create temporary media file", e))?;
        Ok(file.into_temp_path())
    }
}

/// Profile picture bytes, readable as a stream. Backed by a temporary file
/// that is removed on drop.
#[derive(Debug)]
pub struct ChatPicture {
    file: std::fs::File,
    path: TempPath,
}

impl ChatPicture {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Read for ChatPicture {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}
