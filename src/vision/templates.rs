//! Template asset stores
//!
//! Templates are addressed by logical name such as `"buttons/battle"`. The
//! directory store resolves that to `<root>/buttons/battle.png` and caches
//! the decoded image.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::RgbaImage;

use super::VisionError;

/// Resolves logical template names to reference images
pub trait TemplateStore: Send {
    /// Load (or fetch from cache) the named template
    fn load(&self, name: &str) -> Result<Arc<RgbaImage>, VisionError>;
}

/// Store reading PNG files from a directory tree
pub struct DirTemplateStore {
    root: PathBuf,
    cache: Mutex<HashMap<String, Arc<RgbaImage>>>,
}

impl DirTemplateStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Get the store root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a template name resolves to
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.png"))
    }
}

impl TemplateStore for DirTemplateStore {
    fn load(&self, name: &str) -> Result<Arc<RgbaImage>, VisionError> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(image) = cache.get(name) {
                return Ok(Arc::clone(image));
            }
        }

        let path = self.path_for(name);
        if !path.exists() {
            return Err(VisionError::TemplateMissing(name.to_string()));
        }
        let image = image::open(&path)
            .map_err(|source| VisionError::TemplateLoad {
                name: name.to_string(),
                source,
            })?
            .to_rgba8();
        let image = Arc::new(image);
        log::debug!("Loaded template {} from {}", name, path.display());

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(name.to_string(), Arc::clone(&image));
        }
        Ok(image)
    }
}

/// Store holding templates in memory
#[derive(Default, Clone)]
pub struct MemoryTemplateStore {
    templates: HashMap<String, Arc<RgbaImage>>,
}

impl MemoryTemplateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template under `name`
    pub fn insert(&mut self, name: impl Into<String>, image: RgbaImage) {
        self.templates.insert(name.into(), Arc::new(image));
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, image: RgbaImage) -> Self {
        self.insert(name, image);
        self
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn load(&self, name: &str) -> Result<Arc<RgbaImage>, VisionError> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| VisionError::TemplateMissing(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_dir_store_loads_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("buttons")).unwrap();
        let image = RgbaImage::from_pixel(6, 4, Rgba([200, 10, 10, 255]));
        image.save(dir.path().join("buttons/battle.png")).unwrap();

        let store = DirTemplateStore::new(dir.path());
        let first = store.load("buttons/battle").unwrap();
        assert_eq!(first.dimensions(), (6, 4));

        // Served from cache even once the file is gone
        std::fs::remove_file(dir.path().join("buttons/battle.png")).unwrap();
        let second = store.load("buttons/battle").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirTemplateStore::new(dir.path());
        assert!(matches!(
            store.load("buttons/nope"),
            Err(VisionError::TemplateMissing(_))
        ));
        assert!(MemoryTemplateStore::new().load("anything").is_err());
    }
}
