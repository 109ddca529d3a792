//! Recognition of in-progress upload names.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use scrubgate_core::IntakeError;

/// Matches file names against the configured temporary-name patterns.
///
/// Matching is on the bare file name and ignores ASCII case, so `*.PART`
/// and `*.part` are the same pattern.
#[derive(Debug, Clone)]
pub struct TempNameMatcher {
    set: GlobSet,
    patterns: Vec<String>,
}

impl TempNameMatcher {
    /// Compile `patterns` into a matcher.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, IntakeError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .literal_separator(true)
                .build()
                .map_err(|e| IntakeError::InvalidConfig {
                    message: format!("invalid temporary-name pattern {pattern:?}: {e}"),
                })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| IntakeError::InvalidConfig {
            message: format!("cannot compile temporary-name patterns: {e}"),
        })?;
        Ok(Self {
            set,
            patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect(),
        })
    }

    /// Whether `name` looks like a file that is still being written.
    pub fn is_temporary(&self, name: &str) -> bool {
        self.set.is_match(name)
    }

    /// The source patterns.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for TempNameMatcher {
    fn default() -> Self {
        let patterns = scrubgate_core::default_temp_patterns();
        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            if let Ok(glob) = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .literal_separator(true)
                .build()
            {
                builder.add(glob);
            }
        }
        Self {
            set: builder.build().unwrap_or_else(|_| GlobSet::empty()),
            patterns,
        }
    }
}
