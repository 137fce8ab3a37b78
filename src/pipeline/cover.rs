//! Cover art: image generation and payload preparation

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

use super::services::ImageGenerator;
use crate::config::CoverSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::utils::cover_art::compress_cover;

#[derive(Clone)]
pub struct CoverArt {
    images: Arc<dyn ImageGenerator>,
    settings: CoverSettings,
}

impl CoverArt {
    pub fn new(images: Arc<dyn ImageGenerator>, settings: CoverSettings) -> Self {
        Self { images, settings }
    }

    /// Location of a freshly generated cover, or `None` if the prompt was declined
    pub async fn generate(&self, prompt: &str, user_tag: &str) -> PipelineResult<Option<String>> {
        let url = self.images.generate(prompt, user_tag).await?;
        if url.is_none() {
            warn!("No cover image generated");
        }
        Ok(url)
    }

    pub async fn download(&self, url: &str) -> PipelineResult<Bytes> {
        self.images.download(url).await
    }

    /// Upload-ready JPEG, or `None` if it cannot be made small enough
    pub async fn prepare(&self, image: Bytes) -> PipelineResult<Option<Vec<u8>>> {
        let settings = self.settings.clone();
        let size = image.len();
        let jpeg = tokio::task::spawn_blocking(move || compress_cover(&image, &settings))
            .await
            .map_err(|e| PipelineError::Logic(format!("Cover compression task panicked: {e}")))?;

        match &jpeg {
            Some(data) => debug!("Compressed {} byte image to {} bytes", size, data.len()),
            None => warn!("Cover could not be compressed under the payload limit"),
        }
        Ok(jpeg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fakes::FakeImages;
    use crate::utils::cover_art::tests::{flat_png, noise_png};

    #[tokio::test]
    async fn test_prepare_fits_small_image() {
        let cover = CoverArt::new(Arc::new(FakeImages::default()), CoverSettings::default());
        let jpeg = cover.prepare(Bytes::from(flat_png(1024, 1024))).await.unwrap();
        assert!(jpeg.is_some());
    }

    #[tokio::test]
    async fn test_prepare_gives_up_under_tiny_ceiling() {
        let settings = CoverSettings {
            max_payload_bytes: 1024,
            ..CoverSettings::default()
        };
        let cover = CoverArt::new(Arc::new(FakeImages::default()), settings);
        assert_eq!(cover.prepare(Bytes::from(noise_png(640))).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_declined_prompt_is_none() {
        let cover = CoverArt::new(Arc::new(FakeImages::default()), CoverSettings::default());
        assert_eq!(cover.generate("a velodrome", "1").await.unwrap(), None);
    }
}
