use globset::{GlobBuilder, GlobMatcher};

/// Ant-style URL pattern.
///
/// `?` matches a single character within a path segment, `*` matches any run
/// of characters within a segment, `**` matches zero or more whole segments.
/// Used by access rules, route path predicates, host predicates and role
/// mapping sources.
#[derive(Clone, Debug)]
pub struct PathPattern {
    source: String,
    matcher: GlobMatcher,
    /// `/foo/**` also matches `/foo` itself.
    prefix: Option<String>,
}

impl PathPattern {
    /// Compile a pattern. Fails on malformed glob syntax.
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| PatternError {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
        let prefix = pattern
            .strip_suffix("/**")
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        Ok(PathPattern {
            source: pattern.to_string(),
            matcher: glob.compile_matcher(),
            prefix,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.matcher.is_match(path) {
            return true;
        }
        // `**` spans zero segments: `/admin/**` admits `/admin` and `/admin/`.
        match &self.prefix {
            Some(prefix) => {
                path == prefix.as_str() || path.strip_suffix('/') == Some(prefix.as_str())
            }
            None => false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Display for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// Pattern compilation error. Surfaces as invalid configuration at startup.
#[derive(Debug)]
pub struct PatternError {
    pub pattern: String,
    pub message: String,
}

impl std::fmt::Display for PatternError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid pattern '{}': {}", self.pattern, self.message)
    }
}

impl std::error::Error for PatternError {}
