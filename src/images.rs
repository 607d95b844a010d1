use crate::apis::fetch_bytes;
use crate::constants::{RENDITION_ORIGINAL, THUMBNAIL_RENDITIONS};
use crate::error::{Result, ScraperError};
use image::ImageFormat;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Copies a remote performer image into storage we control.
/// Returns rendition name → stored path.
#[async_trait::async_trait]
pub trait ImageMirror: Send + Sync {
    async fn mirror(&self, key: &str, url: &str) -> Result<BTreeMap<String, String>>;
}

/// Storage key for a performer's images: sha256 of the lowercased
/// (name, genre) identity. Falls back to a timestamp key without a name.
pub fn image_key(name: &str, genre: &str) -> String {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        return format!("anon-{}", nanos);
    }
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(genre.trim().to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

/// Writes `<root>/<key[0..2]>/<key>/<rendition>.<ext>`: the original bytes
/// plus PNG thumbnails. Stored paths are relative to `root`.
pub struct LocalImageMirror {
    root: PathBuf,
    client: reqwest::Client,
}

impl LocalImageMirror {
    pub fn new(root: impl Into<PathBuf>, client: reqwest::Client) -> Self {
        Self {
            root: root.into(),
            client,
        }
    }
}

fn store_renditions(root: &Path, key: &str, bytes: &[u8]) -> Result<BTreeMap<String, String>> {
    if key.len() < 2 || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ScraperError::InvalidEntity(format!("bad image key '{}'", key)));
    }

    let format = image::guess_format(bytes)?;
    let decoded = image::load_from_memory_with_format(bytes, format)?;
    let ext = format.extensions_str().first().copied().unwrap_or("img");

    let relative = PathBuf::from(&key[0..2]).join(key);
    let dir = root.join(&relative);
    fs::create_dir_all(&dir)?;

    let mut stored = BTreeMap::new();

    let original = format!("{}.{}", RENDITION_ORIGINAL, ext);
    fs::write(dir.join(&original), bytes)?;
    stored.insert(
        RENDITION_ORIGINAL.to_string(),
        relative.join(&original).to_string_lossy().into_owned(),
    );

    for (rendition, edge) in THUMBNAIL_RENDITIONS {
        let file = format!("{}.png", rendition);
        decoded
            .thumbnail(*edge, *edge)
            .save_with_format(dir.join(&file), ImageFormat::Png)?;
        stored.insert(
            rendition.to_string(),
            relative.join(&file).to_string_lossy().into_owned(),
        );
    }

    debug!(key, renditions = stored.len(), "Stored image renditions");
    Ok(stored)
}

#[async_trait::async_trait]
impl ImageMirror for LocalImageMirror {
    async fn mirror(&self, key: &str, url: &str) -> Result<BTreeMap<String, String>> {
        let bytes = fetch_bytes(&self.client, url).await?;
        let root = self.root.clone();
        let key_owned = key.to_string();
        let stored = tokio::task::spawn_blocking(move || store_renditions(&root, &key_owned, &bytes))
            .await
            .map_err(|e| ScraperError::Api {
                message: format!("image worker failed: {}", e),
            })??;
        info!(key, url, "Mirrored performer image");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GenericImageView, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_image_key_is_stable_and_case_insensitive() {
        assert_eq!(image_key("Die Katze", "Punk"), image_key("die katze ", "punk"));
        assert_eq!(image_key("Die Katze", "Punk").len(), 64);
        assert_ne!(image_key("Die Katze", "Punk"), image_key("Trio Fatal", "Punk"));
    }

    #[test]
    fn test_same_name_different_genre_gets_own_key() {
        assert_ne!(image_key("Die Katze", "Punk"), image_key("Die Katze", "Jazz"));
    }

    #[test]
    fn test_empty_name_falls_back_to_timestamp_key() {
        assert!(image_key("  ", "Punk").starts_with("anon-"));
    }

    #[test]
    fn test_store_writes_original_and_thumbnails() {
        let dir = tempfile::tempdir().unwrap();
        let key = image_key("Die Katze", "Punk");

        let stored = store_renditions(dir.path(), &key, &png(600, 300)).unwrap();
        assert_eq!(stored.len(), 1 + THUMBNAIL_RENDITIONS.len());

        let original = stored.get(RENDITION_ORIGINAL).unwrap();
        assert_eq!(*original, format!("{}/{}/original.png", &key[0..2], key));
        assert!(dir.path().join(original).exists());

        let thumb = image::open(dir.path().join(stored.get("thumb").unwrap())).unwrap();
        assert_eq!(thumb.dimensions(), (100, 50));
        let medium = image::open(dir.path().join(stored.get("medium").unwrap())).unwrap();
        assert_eq!(medium.dimensions(), (300, 150));
    }

    #[test]
    fn test_undecodable_bytes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = store_renditions(dir.path(), "abcdef", b"definitely not an image").unwrap_err();
        assert!(matches!(err, ScraperError::Image(_)));
    }

    #[test]
    fn test_path_like_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store_renditions(dir.path(), "../etc", &png(10, 10)).is_err());
    }
}
