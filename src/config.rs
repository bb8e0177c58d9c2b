//! Runtime configuration for the cache layer and chain executor.
//!
//! Every field carries a serde default so partial configuration files
//! deserialize cleanly; an empty document yields the same values as
//! [`FrameworkConfig::default`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    pub cache: CacheSettings,
    pub chain: ChainSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Serve and populate the whole-response route cache.
    pub enable_route_cache: bool,
    /// Serve and populate per-controller output fragments.
    pub enable_controller_cache: bool,
    /// Store compressed encodings of cached bodies alongside identity.
    pub compress_variants: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enable_route_cache: true,
            enable_controller_cache: true,
            compress_variants: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    /// Upper bound on controller hand-offs for a single request.
    pub max_chain_depth: usize,
    /// Content types the renderer can produce, heaviest first.
    pub supported_content_types: Vec<String>,
    /// Content type served when negotiation finds no acceptable match.
    pub fallback_content_type: String,
    /// URL parameters every controller cache directive implicitly allows.
    pub reserved_url_params: Vec<String>,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            max_chain_depth: 8,
            supported_content_types: vec!["text/html".into(), "application/json".into()],
            fallback_content_type: "text/plain".into(),
            reserved_url_params: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_survive_an_empty_document() {
        let parsed: FrameworkConfig = serde_json::from_str("{}").unwrap();
        let defaults = FrameworkConfig::default();
        assert_eq!(parsed.cache.enable_route_cache, defaults.cache.enable_route_cache);
        assert_eq!(
            parsed.cache.enable_controller_cache,
            defaults.cache.enable_controller_cache
        );
        assert_eq!(parsed.cache.compress_variants, defaults.cache.compress_variants);
        assert_eq!(parsed.chain.max_chain_depth, defaults.chain.max_chain_depth);
        assert_eq!(
            parsed.chain.supported_content_types,
            defaults.chain.supported_content_types
        );
        assert_eq!(
            parsed.chain.fallback_content_type,
            defaults.chain.fallback_content_type
        );
    }

    #[test]
    fn partial_sections_keep_sibling_defaults() {
        let parsed: FrameworkConfig =
            serde_json::from_str(r#"{"chain": {"max_chain_depth": 3}}"#).unwrap();
        assert_eq!(parsed.chain.max_chain_depth, 3);
        assert_eq!(parsed.chain.fallback_content_type, "text/plain");
        assert!(parsed.cache.enable_route_cache);
        assert!(!parsed.cache.compress_variants);
    }

    #[test]
    fn cache_toggles_deserialize_independently() {
        let parsed: FrameworkConfig =
            serde_json::from_str(r#"{"cache": {"enable_controller_cache": false}}"#).unwrap();
        assert!(parsed.cache.enable_route_cache);
        assert!(!parsed.cache.enable_controller_cache);
    }
}
