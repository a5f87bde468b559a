//! Request policies applied to the request direction.

use tracing::warn;

/// Policy consulted for every parsed request line.
///
/// Both rules are optional; an empty policy forwards everything untouched.
#[derive(Debug, Clone, Default)]
pub struct RequestPolicy {
    /// Substring matched against the request target; matches get a 403.
    pub block: Option<String>,
    /// Header line inserted after the request line, in `Name: Value` form.
    pub inject: Option<String>,
}

impl RequestPolicy {
    pub fn new(block: Option<String>, inject: Option<String>) -> Self {
        Self { block, inject }
    }

    /// True when `target` contains the configured block substring.
    pub fn blocks(&self, target: &str) -> bool {
        self.block
            .as_deref()
            .is_some_and(|needle| target.contains(needle))
    }

    /// The configured injection header split into name and value.
    ///
    /// A header without a colon or with an empty name is malformed
    /// configuration; it is skipped with a warning rather than rejected at
    /// startup.
    pub fn inject_parts(&self) -> Option<(&str, &str)> {
        let raw = self.inject.as_deref()?;
        match raw.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                Some((name.trim(), value.trim()))
            }
            _ => {
                warn!(
                    header = raw,
                    "Ignoring malformed inject header (expected 'Name: Value')"
                );
                None
            }
        }
    }
}
