//! Origin storage to CDN URL rewriting.

use std::sync::LazyLock;

use regex::Regex;

use crate::domain::entities::CacheKey;

/// Default CDN prefix that rewritten URLs are spliced onto.
pub const DEFAULT_CDN_BASE: &str = "https://cdn.example.com";

/// Default origin patterns, tried in order. The `path` group is the part
/// carried over to the CDN URL.
pub const DEFAULT_ORIGIN_PATTERNS: &[&str] = &[
    r"^https?://[a-z0-9-]+\.supabase\.co/storage/v1/object/public/(?P<path>[^?#]*)",
    r"^https?://[a-z0-9-]+\.supabase\.co/storage/v1/render/image/public/(?P<path>[^?#]*)",
];

static DEFAULT_ORIGINS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    DEFAULT_ORIGIN_PATTERNS
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
});

/// Maps origin storage URLs to their CDN form.
///
/// Rewriting is pure and idempotent: URLs already under the CDN base, and URLs
/// matching no origin pattern, are returned unchanged.
#[derive(Debug, Clone)]
pub struct CdnRewriter {
    cdn_base: String,
    origins: Vec<Regex>,
}

impl CdnRewriter {
    /// Creates a rewriter from a CDN base and ordered origin patterns.
    ///
    /// # Errors
    /// Returns error if any pattern is not a valid regex.
    pub fn new<S: AsRef<str>>(
        cdn_base: impl Into<String>,
        patterns: &[S],
    ) -> Result<Self, regex::Error> {
        let origins = patterns
            .iter()
            .map(|pattern| Regex::new(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            cdn_base: cdn_base.into().trim_end_matches('/').to_string(),
            origins,
        })
    }

    /// Returns the CDN base without a trailing slash.
    #[must_use]
    pub fn cdn_base(&self) -> &str {
        &self.cdn_base
    }

    /// Checks if a URL already points at the CDN.
    #[must_use]
    pub fn is_cdn_url(&self, url: &str) -> bool {
        url.strip_prefix(self.cdn_base.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    /// Rewrites an origin URL to its CDN equivalent.
    #[must_use]
    pub fn rewrite(&self, url: &str) -> String {
        if self.is_cdn_url(url) {
            return url.to_string();
        }

        for origin in &self.origins {
            let Some(caps) = origin.captures(url) else {
                continue;
            };

            let path = caps.name("path").map_or_else(
                || caps.get(0).map_or("", |m| &url[m.end()..]),
                |m| m.as_str(),
            );
            let path = path.split(['?', '#']).next().unwrap_or_default();

            return format!("{}/{}", self.cdn_base, path.trim_start_matches('/'));
        }

        url.to_string()
    }

    /// Returns the cache key for an origin URL.
    #[must_use]
    pub fn key_for(&self, url: &str) -> CacheKey {
        CacheKey::new(self.rewrite(url))
    }
}

impl Default for CdnRewriter {
    fn default() -> Self {
        Self {
            cdn_base: DEFAULT_CDN_BASE.to_string(),
            origins: DEFAULT_ORIGINS.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn rewriter() -> CdnRewriter {
        CdnRewriter::default()
    }

    #[test_case(
        "https://abcd.supabase.co/storage/v1/object/public/routes/a.jpg",
        "https://cdn.example.com/routes/a.jpg" ; "object_path"
    )]
    #[test_case(
        "https://abcd.supabase.co/storage/v1/object/public/routes/a.jpg?token=xyz",
        "https://cdn.example.com/routes/a.jpg" ; "strips_query"
    )]
    #[test_case(
        "https://abcd.supabase.co/storage/v1/render/image/public/b/c.png#frag",
        "https://cdn.example.com/b/c.png" ; "render_path_strips_fragment"
    )]
    #[test_case(
        "https://cdn.example.com/routes/a.jpg?width=200",
        "https://cdn.example.com/routes/a.jpg?width=200" ; "already_cdn"
    )]
    #[test_case(
        "https://store.example/a.jpg",
        "https://store.example/a.jpg" ; "unrecognized"
    )]
    #[test_case("", "" ; "empty")]
    fn test_rewrite(input: &str, expected: &str) {
        assert_eq!(rewriter().rewrite(input), expected);
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let rewriter = rewriter();
        let urls = [
            "https://abcd.supabase.co/storage/v1/object/public/x/y.webp?v=2",
            "https://abcd.supabase.co/storage/v1/object/public/",
            "https://cdn.example.com/x/y.webp",
            "https://cdn.example.community/x.png",
            "https://store.example/a.jpg",
            "not a url",
        ];

        for url in urls {
            let once = rewriter.rewrite(url);
            assert_eq!(rewriter.rewrite(&once), once, "not idempotent for {url}");
        }
    }

    #[test]
    fn test_same_object_shares_key() {
        let rewriter = rewriter();
        let a = rewriter.key_for("https://abcd.supabase.co/storage/v1/object/public/p.jpg?t=1");
        let b = rewriter.key_for("https://abcd.supabase.co/storage/v1/object/public/p.jpg?t=2");
        assert_eq!(a, b);
    }

    #[test]
    fn test_first_matching_pattern_wins() {
        let rewriter = CdnRewriter::new(
            "https://img.test/",
            &[r"^https://a\.test/one/(?P<path>.*)", r"^https://a\.test/(?P<path>.*)"],
        )
        .unwrap();

        assert_eq!(rewriter.rewrite("https://a.test/one/x.png"), "https://img.test/x.png");
        assert_eq!(rewriter.rewrite("https://a.test/two/x.png"), "https://img.test/two/x.png");
    }

    #[test]
    fn test_pattern_without_path_group_uses_remainder() {
        let rewriter = CdnRewriter::new("https://img.test", &[r"^https://bucket\.test/"]).unwrap();
        assert_eq!(rewriter.rewrite("https://bucket.test/a/b.jpg?x=1"), "https://img.test/a/b.jpg");
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(CdnRewriter::new("https://img.test", &["(unclosed"]).is_err());
    }

    #[test]
    fn test_cdn_prefix_requires_boundary() {
        let rewriter = rewriter();
        assert!(rewriter.is_cdn_url("https://cdn.example.com/a.jpg"));
        assert!(!rewriter.is_cdn_url("https://cdn.example.community/a.jpg"));
    }
}
