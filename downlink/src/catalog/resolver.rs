//! Environment resolution for the catalog's download URL base.
//!
//! Catalog documents are produced by build tooling and may carry a URL base
//! that only makes sense in one environment: empty, pointing at a developer
//! `localhost` server, or carrying the `{cdn}` placeholder. The resolver
//! rewrites such bases to the active environment's CDN root; a real
//! absolute base is passed through untouched.

/// Placeholder in a document's URL base replaced by the environment root.
pub const CDN_PLACEHOLDER: &str = "{cdn}";

/// Rewrites a catalog document's URL base for the active environment.
#[derive(Debug, Clone, Default)]
pub struct UrlResolver {
    environment_root: Option<String>,
}

impl UrlResolver {
    /// Resolver that keeps the document's URL base as-is.
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Resolver that substitutes `root` for placeholder or local bases.
    pub fn for_environment(root: impl Into<String>) -> Self {
        Self {
            environment_root: Some(root.into()),
        }
    }

    /// Resolve the URL base found in a catalog document.
    ///
    /// With an environment root configured, a base that is empty, points at
    /// `localhost`, or contains [`CDN_PLACEHOLDER`] is rewritten; anything
    /// else passes through. The result always ends with `/` so ids can be
    /// appended directly.
    pub fn resolve(&self, document_base: &str) -> String {
        let base = match &self.environment_root {
            Some(root) if document_base.contains(CDN_PLACEHOLDER) => {
                document_base.replace(CDN_PLACEHOLDER, root.trim_end_matches('/'))
            }
            Some(root) if document_base.is_empty() || document_base.contains("localhost") => {
                root.clone()
            }
            _ => document_base.to_string(),
        };

        if base.is_empty() || base.ends_with('/') {
            base
        } else {
            format!("{}/", base)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_keeps_base() {
        let resolver = UrlResolver::passthrough();
        assert_eq!(
            resolver.resolve("http://cdn.example/content/"),
            "http://cdn.example/content/"
        );
    }

    #[test]
    fn test_trailing_slash_is_normalized() {
        let resolver = UrlResolver::passthrough();
        assert_eq!(
            resolver.resolve("http://cdn.example/content"),
            "http://cdn.example/content/"
        );
    }

    #[test]
    fn test_empty_base_takes_environment_root() {
        let resolver = UrlResolver::for_environment("http://assets.example/prod");
        assert_eq!(resolver.resolve(""), "http://assets.example/prod/");
    }

    #[test]
    fn test_localhost_base_takes_environment_root() {
        let resolver = UrlResolver::for_environment("http://assets.example/prod/");
        assert_eq!(
            resolver.resolve("http://localhost:7888/"),
            "http://assets.example/prod/"
        );
    }

    #[test]
    fn test_placeholder_is_substituted() {
        let resolver = UrlResolver::for_environment("http://assets.example/stage/");
        assert_eq!(
            resolver.resolve("{cdn}/bundles"),
            "http://assets.example/stage/bundles/"
        );
    }

    #[test]
    fn test_absolute_base_wins_over_environment() {
        let resolver = UrlResolver::for_environment("http://assets.example/prod");
        assert_eq!(
            resolver.resolve("http://other.example/"),
            "http://other.example/"
        );
    }

    #[test]
    fn test_empty_base_without_environment_stays_empty() {
        let resolver = UrlResolver::passthrough();
        assert_eq!(resolver.resolve(""), "");
    }
}
