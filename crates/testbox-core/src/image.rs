//! Base image selection.

use crate::error::{ProviderError, Result};
use std::collections::HashMap;
use testbox_common::types::Image;
use testbox_common::WorkerConfig;
use testbox_vm_manager::ContainerBackend;

/// The set of sandbox images available to a worker.
///
/// Built once from the backend's image list, keeping only images from the
/// configured repository. Resolution never mutates it.
#[derive(Debug, Clone)]
pub struct ImageCatalog {
    repository: String,
    default_tag: String,
    images: Vec<Image>,
    /// Normalized language alias -> normalized tag
    language_mappings: HashMap<String, String>,
}

impl ImageCatalog {
    /// Create a catalog from a list of images.
    pub fn new(
        repository: impl Into<String>,
        default_tag: impl Into<String>,
        images: impl IntoIterator<Item = Image>,
    ) -> Self {
        let repository = repository.into();
        let images = images
            .into_iter()
            .filter(|image| image.repository == repository)
            .collect();

        Self {
            repository,
            default_tag: default_tag.into(),
            images,
            language_mappings: HashMap::new(),
        }
    }

    /// Add language aliases consulted when a hint matches no tag directly.
    pub fn with_language_mappings<'a>(
        mut self,
        mappings: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Self {
        self.language_mappings = mappings
            .into_iter()
            .map(|(language, tag)| (normalize(language), normalize(tag)))
            .collect();
        self
    }

    /// Build the catalog from everything the backend currently has.
    pub async fn load(backend: &dyn ContainerBackend, config: &WorkerConfig) -> Result<Self> {
        let images = backend.list_images().await?;
        let catalog = Self::new(
            config.docker.image_repository.clone(),
            config.docker.default_image_tag.clone(),
            images,
        )
        .with_language_mappings(&config.language_mappings);

        tracing::debug!(
            repository = %catalog.repository,
            count = catalog.images.len(),
            "Loaded image catalog"
        );
        Ok(catalog)
    }

    /// Images in the catalog's repository.
    pub fn images(&self) -> &[Image] {
        &self.images
    }

    /// The image used when nothing better matches.
    ///
    /// # Errors
    /// Returns [`ProviderError::ImageNotFound`] if the default tag is missing.
    pub fn default_image(&self) -> Result<&Image> {
        self.images
            .iter()
            .find(|image| image.tag == self.default_tag)
            .ok_or_else(|| ProviderError::ImageNotFound {
                repository: self.repository.clone(),
                tag: self.default_tag.clone(),
            })
    }

    /// Select the image for a job.
    ///
    /// An override prefix wins over everything and is matched against image
    /// ids. Without a language the default image is used. Otherwise the tag
    /// must equal the language ignoring case, `-` and `_`. Anything that
    /// doesn't match falls back to the default image.
    pub fn resolve(&self, language: Option<&str>, image_override: Option<&str>) -> Result<&Image> {
        let selected = match (image_override, language) {
            (Some(prefix), _) => self.find_by_id_prefix(prefix),
            (None, None) => None,
            (None, Some(language)) => self.find_by_language(language),
        };

        match selected {
            Some(image) => Ok(image),
            None => self.default_image(),
        }
    }

    fn find_by_id_prefix(&self, prefix: &str) -> Option<&Image> {
        let prefix = prefix.strip_prefix("sha256:").unwrap_or(prefix);
        self.images.iter().find(|image| image.id.starts_with(prefix))
    }

    fn find_by_language(&self, language: &str) -> Option<&Image> {
        let wanted = normalize(language);
        self.find_by_tag(&wanted).or_else(|| {
            let mapped = self.language_mappings.get(&wanted)?;
            self.find_by_tag(mapped)
        })
    }

    fn find_by_tag(&self, normalized: &str) -> Option<&Image> {
        self.images
            .iter()
            .find(|image| normalize(&image.tag) == normalized)
    }
}

/// Lowercase and drop `-` and `_`, so `node_js`, `node-js` and `NodeJS` agree.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}
