//! Addon origin mapping for `/.netlify/<addon>/<rest>` paths.

use std::collections::HashMap;

use url::Url;

const INTERNAL_PREFIX: &str = "/.netlify/";

/// Addon name to origin.
#[derive(Debug, Clone, Default)]
pub struct Addons {
    origins: HashMap<String, String>,
}

impl Addons {
    pub fn new(origins: HashMap<String, String>) -> Self {
        Self { origins }
    }

    /// External URL serving `path_and_query`, when it names a configured addon.
    pub fn resolve(&self, path_and_query: &str) -> Option<Url> {
        let (name, rest) = path_and_query.strip_prefix(INTERNAL_PREFIX)?.split_once('/')?;
        let origin = self.origins.get(name)?;
        Url::parse(&format!("{}/{}", origin.trim_end_matches('/'), rest)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addons() -> Addons {
        let mut origins = HashMap::new();
        origins.insert("cms".to_string(), "https://cms.example.com/".to_string());
        Addons::new(origins)
    }

    #[test]
    fn maps_configured_addons() {
        let url = addons().resolve("/.netlify/cms/api/posts?page=2").unwrap();
        assert_eq!(url.as_str(), "https://cms.example.com/api/posts?page=2");
    }

    #[test]
    fn ignores_unknown_or_bare_paths() {
        assert!(addons().resolve("/.netlify/other/x").is_none());
        assert!(addons().resolve("/.netlify/cms").is_none());
        assert!(addons().resolve("/cms/x").is_none());
    }
}
