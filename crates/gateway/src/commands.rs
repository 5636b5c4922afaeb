use std::collections::{BTreeMap, HashMap};

use switchboard_pipeline::Slug;

use crate::error::Result;

/// Maps a command word (the first word of a message) to a route slug.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    routes: HashMap<String, Slug>,
}

impl CommandTable {
    /// Build from configured `word → slug` pairs. Every slug must parse.
    pub fn from_config(commands: &BTreeMap<String, String>) -> Result<Self> {
        let routes = commands
            .iter()
            .map(|(word, slug)| Ok((word.clone(), Slug::parse(slug)?)))
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self { routes })
    }

    #[must_use]
    pub fn with(mut self, word: impl Into<String>, slug: Slug) -> Self {
        self.routes.insert(word.into(), slug);
        self
    }

    /// Route for the first whitespace-separated word of `text`.
    pub fn lookup(&self, text: &str) -> Option<&Slug> {
        let word = text.split_whitespace().next()?;
        self.routes.get(word)
    }

    /// Entries sorted by command word.
    pub fn entries(&self) -> Vec<(&str, &Slug)> {
        let mut entries: Vec<_> = self
            .routes
            .iter()
            .map(|(word, slug)| (word.as_str(), slug))
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
