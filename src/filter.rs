use std::collections::HashSet;
use std::io;
use std::path::Path;

/// Immutable blacklist of target hostnames.
///
/// Matching is exact string equality against the hostname only (the target
/// port plays no part). No wildcard, prefix, or suffix matching.
#[derive(Debug, Clone, Default)]
pub struct DomainBlacklist {
    domains: HashSet<String>,
}

impl DomainBlacklist {
    /// Build a blacklist from an iterator of hostnames
    pub fn new<I>(domains: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            domains: domains.into_iter().collect(),
        }
    }

    /// Parse newline-delimited hostnames; lines are trimmed and blank lines
    /// are skipped.
    pub fn parse(data: &str) -> Self {
        Self::new(
            data.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        )
    }

    /// Load a blacklist file once at startup
    pub fn load(path: &Path) -> io::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(Self::parse(&data))
    }

    /// Whether the host is forbidden from being proxied
    pub fn is_blocked(&self, host: &str) -> bool {
        self.domains.contains(host)
    }

    /// Number of blacklisted hostnames
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
