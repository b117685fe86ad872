use std::time::Duration;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// A named, versioned partition of cached responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNamespace {
    pub name: String,
    pub version: String,
    pub max_entries: usize,
    pub max_age: Duration,
}

impl CacheNamespace {
    pub fn new(name: &str, version: &str, max_entries: usize, max_age: Duration) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            max_entries,
            max_age,
        }
    }

    pub fn storage_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// The partitions of one build.
#[derive(Debug, Clone)]
pub struct CacheManifest {
    /// Precache, pages, scripts and styles.
    pub static_assets: CacheNamespace,
    pub images: CacheNamespace,
    /// API responses and miscellaneous same-origin GETs.
    pub dynamic: CacheNamespace,
}

impl CacheManifest {
    pub fn for_version(version: &str) -> Self {
        Self {
            static_assets: CacheNamespace::new("static", version, 100, DAY * 30),
            images: CacheNamespace::new("images", version, 100, DAY * 30),
            dynamic: CacheNamespace::new("dynamic", version, 50, DAY),
        }
    }

    pub fn storage_names(&self) -> Vec<String> {
        vec![
            self.static_assets.storage_name(),
            self.images.storage_name(),
            self.dynamic.storage_name(),
        ]
    }
}
