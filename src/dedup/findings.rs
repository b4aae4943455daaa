use super::SeenMap;

/// Identity of a reported finding: the matched text and where it was seen.
///
/// The rule that matched is deliberately not part of the key, so two rules
/// matching the same text at the same locator produce one report.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FindingKey {
    pub matched_text: String,
    pub locator: String,
}

impl FindingKey {
    pub fn new(matched_text: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            matched_text: matched_text.into(),
            locator: locator.into(),
        }
    }
}

/// Global record of reported findings, keyed by [`FindingKey`].
pub struct FindingIndex {
    claimed: SeenMap<FindingKey, String>,
}

impl FindingIndex {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            claimed: SeenMap::with_capacity(capacity),
        }
    }

    /// Record `owner` as the rule that reported `key`.
    ///
    /// Returns `false` if the key was already claimed, by any rule.
    pub fn claim(&self, key: FindingKey, owner: &str) -> bool {
        self.claimed.claim(key, owner.to_string())
    }

    /// Name of the rule that first reported `key`.
    pub fn owner(&self, key: &FindingKey) -> Option<String> {
        self.claimed.get(key)
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

impl Default for FindingIndex {
    fn default() -> Self {
        Self::new(None)
    }
}
