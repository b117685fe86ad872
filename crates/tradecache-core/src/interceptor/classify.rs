use super::request::{Destination, Request};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "avif"];
const CODE_EXTENSIONS: &[&str] = &["js", "mjs", "css"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    /// Anything under `/api/`.
    Api,
    Image,
    /// Scripts and stylesheets.
    Code,
    Navigation,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    NetworkFirst,
    /// Cache, then network, then a placeholder.
    CacheFirst,
    StaleWhileRevalidate,
    NetworkFirstWithRootFallback,
    /// Cache, then network; only basic successful responses are stored.
    CacheFirstWithNetworkFallback,
}

impl ResourceClass {
    pub fn strategy(self) -> Strategy {
        match self {
            ResourceClass::Api => Strategy::NetworkFirst,
            ResourceClass::Image => Strategy::CacheFirst,
            ResourceClass::Code => Strategy::StaleWhileRevalidate,
            ResourceClass::Navigation => Strategy::NetworkFirstWithRootFallback,
            ResourceClass::Other => Strategy::CacheFirstWithNetworkFallback,
        }
    }
}

pub fn classify(request: &Request) -> ResourceClass {
    let path = request.url.path();
    if path.starts_with("/api/") {
        return ResourceClass::Api;
    }
    match request.destination {
        Destination::Document => return ResourceClass::Navigation,
        Destination::Image => return ResourceClass::Image,
        Destination::Script | Destination::Style => return ResourceClass::Code,
        Destination::Font | Destination::Empty => {}
    }

    match extension(path) {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => ResourceClass::Image,
        Some(ext) if CODE_EXTENSIONS.contains(&ext.as_str()) => ResourceClass::Code,
        _ => ResourceClass::Other,
    }
}

fn extension(path: &str) -> Option<String> {
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}
