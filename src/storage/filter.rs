//! Download masks
//!
//! Names matching a mask are never downloaded. Supported forms, compared
//! case-insensitively: `*.ext` (suffix), `prefix*` (prefix), or an exact name.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadMasks {
    masks: Vec<String>,
}

impl DownloadMasks {
    pub fn new<I, S>(masks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let masks = masks
            .into_iter()
            .map(|m| m.as_ref().trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        Self { masks }
    }

    /// Parse a `;`-separated mask list
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(';'))
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    /// Whether `name` is excluded by any mask
    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.masks.iter().any(|mask| {
            if let Some(ext) = mask.strip_prefix('*') {
                name.ends_with(ext)
            } else if let Some(prefix) = mask.strip_suffix('*') {
                name.starts_with(prefix)
            } else {
                *mask == name
            }
        })
    }
}
