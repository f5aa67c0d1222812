use crate::domain::SetOptions;
use crate::keys::full_key;
use shared::TtlSecs;

/// Fixed caching parameters for one category of data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheStrategy {
    pub name: &'static str,
    pub ttl: TtlSecs,
    pub key_prefix: &'static str,
    pub tags: &'static [&'static str],
}

impl CacheStrategy {
    pub const USER: CacheStrategy = CacheStrategy {
        name: "user",
        ttl: TtlSecs(3600),
        key_prefix: "user",
        tags: &["user"],
    };

    pub const PRODUCT: CacheStrategy = CacheStrategy {
        name: "product",
        ttl: TtlSecs(7200),
        key_prefix: "product",
        tags: &["product", "catalog"],
    };

    pub const VENDOR: CacheStrategy = CacheStrategy {
        name: "vendor",
        ttl: TtlSecs(3600),
        key_prefix: "vendor",
        tags: &["vendor"],
    };

    pub const SEARCH: CacheStrategy = CacheStrategy {
        name: "search",
        ttl: TtlSecs(900),
        key_prefix: "search",
        tags: &["search"],
    };

    pub const SESSION: CacheStrategy = CacheStrategy {
        name: "session",
        ttl: TtlSecs(1800),
        key_prefix: "session",
        tags: &[],
    };

    pub const CONFIG: CacheStrategy = CacheStrategy {
        name: "config",
        ttl: TtlSecs(86400),
        key_prefix: "config",
        tags: &["config"],
    };

    #[inline]
    pub fn full_key(&self, key: &str) -> String {
        full_key(self.key_prefix, key)
    }

    /// L2 write parameters for this category.
    pub fn set_options(&self) -> SetOptions {
        SetOptions::new(self.ttl, self.key_prefix).with_tags(self.tags.iter().copied())
    }
}

/// Lookup over the built-in strategies. Holds no state.
pub struct StrategyRegistry;

impl StrategyRegistry {
    pub const ALL: &'static [CacheStrategy] = &[
        CacheStrategy::USER,
        CacheStrategy::PRODUCT,
        CacheStrategy::VENDOR,
        CacheStrategy::SEARCH,
        CacheStrategy::SESSION,
        CacheStrategy::CONFIG,
    ];

    pub fn lookup(name: &str) -> Option<&'static CacheStrategy> {
        Self::ALL.iter().find(|strategy| strategy.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        let product = StrategyRegistry::lookup("product").unwrap();
        assert_eq!(product.ttl, TtlSecs(7200));
        assert_eq!(product.tags, &["product", "catalog"]);
        assert_eq!(StrategyRegistry::lookup("search").unwrap().ttl, TtlSecs(900));
        assert!(StrategyRegistry::lookup("order").is_none());
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = StrategyRegistry::ALL.iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), StrategyRegistry::ALL.len());
    }

    #[test]
    fn test_set_options_follow_strategy() {
        let opts = CacheStrategy::PRODUCT.set_options();
        assert_eq!(opts.prefix, "product");
        assert_eq!(opts.ttl, TtlSecs(7200));
        assert_eq!(opts.tags, vec!["product".to_string(), "catalog".to_string()]);
        assert!(CacheStrategy::SESSION.set_options().tags.is_empty());
        assert_eq!(CacheStrategy::USER.full_key("42"), "user:42");
    }
}
