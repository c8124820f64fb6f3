//! Literal trigger phrases searched for in cleaned output.

/// Phrases that mark a prompt waiting on the default choice.
pub const DEFAULT_TRIGGER_PHRASES: &[&str] = &[
    "Yes, and bypass permissions",
    "Yes, clear context",
    "needs your approval",
];

/// Ordered set of case-sensitive phrases; any one appearing counts as a hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSet {
    phrases: Vec<String>,
}

impl TriggerSet {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let phrases = phrases
            .into_iter()
            .map(Into::into)
            .filter(|phrase: &String| !phrase.is_empty())
            .collect();
        Self { phrases }
    }

    #[cfg(test)]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// Return the first phrase (in configured order) found in `clean`.
    pub fn first_match(&self, clean: &str) -> Option<&str> {
        self.phrases
            .iter()
            .find(|phrase| clean.contains(phrase.as_str()))
            .map(String::as_str)
    }

    #[cfg(test)]
    pub fn matches(&self, clean: &str) -> bool {
        self.first_match(clean).is_some()
    }
}

impl Default for TriggerSet {
    fn default() -> Self {
        Self::new(DEFAULT_TRIGGER_PHRASES.iter().copied())
    }
}
