//! Listing filter
//!
//! Turns one remote directory listing into the files this cycle will process:
//! names matching the filename pattern, successfully claimed, at most
//! `max_fetch_size` of them. Files beyond the cap are left unclaimed so the
//! next cycle can pick them up.

use anyhow::{Context, Result};
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::claims::ClaimStore;
use crate::error::IngestError;

/// A remote file selected (and claimed) for processing in one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileRef {
    /// Full remote path, also the claim key
    pub path: String,
    /// Name as reported by the listing
    pub filename: String,
    pub poll_batch_id: Uuid,
}

/// Filename eligibility rule
///
/// A glob by default (`*` and `?` wildcards, matched against the whole name),
/// or a regular expression when written as `regex:<expr>`.
#[derive(Debug, Clone)]
pub struct FilenamePattern {
    source: String,
    regex: Regex,
}

impl FilenamePattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let expr = match pattern.strip_prefix("regex:") {
            Some(raw) => raw.to_string(),
            None => glob_to_regex(pattern),
        };
        let regex = Regex::new(&expr)
            .with_context(|| format!("Invalid filename pattern '{}'", pattern))?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, filename: &str) -> bool {
        self.regex.is_match(filename)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut expr = String::with_capacity(glob.len() + 8);
    expr.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    expr
}

/// Join a remote directory and a listed filename
pub fn join_remote_path(directory: &str, filename: &str) -> String {
    let directory = directory.trim_end_matches('/');
    if directory.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", directory, filename)
    }
}

/// Outcome of filtering one listing
#[derive(Debug)]
pub struct Selection {
    pub batch_id: Uuid,
    /// Entries in the raw listing
    pub listed: usize,
    /// Entries matching the pattern
    pub matched: usize,
    /// Files claimed by this cycle, in listing order
    pub claimed: Vec<RemoteFileRef>,
    /// Claims refused because another run or cycle already holds them
    pub denied: usize,
    /// Matching files left for a later cycle by the fetch cap
    pub deferred: usize,
    /// Set when the store failed part-way; claiming stopped there
    pub claim_error: Option<IngestError>,
}

pub struct ListingFilter {
    store: Arc<dyn ClaimStore>,
    pattern: FilenamePattern,
    remote_directory: String,
    max_fetch_size: usize,
}

impl ListingFilter {
    pub fn new(
        store: Arc<dyn ClaimStore>,
        pattern: FilenamePattern,
        remote_directory: impl Into<String>,
        max_fetch_size: usize,
    ) -> Self {
        Self {
            store,
            pattern,
            remote_directory: remote_directory.into(),
            max_fetch_size,
        }
    }

    /// Filter and claim. Never claims more than `max_fetch_size` files.
    pub async fn select(&self, listing: Vec<String>, batch_id: Uuid) -> Selection {
        let listed = listing.len();
        let candidates: Vec<String> = listing
            .into_iter()
            .filter(|name| is_plain_filename(name))
            .filter(|name| self.pattern.matches(name))
            .collect();

        let mut selection = Selection {
            batch_id,
            listed,
            matched: candidates.len(),
            claimed: Vec::new(),
            denied: 0,
            deferred: 0,
            claim_error: None,
        };

        let mut remaining = candidates.into_iter();
        for filename in remaining.by_ref() {
            let path = join_remote_path(&self.remote_directory, &filename);

            match self.store.try_claim(&path).await {
                Ok(true) => {
                    debug!(file = %filename, batch = %batch_id, "Claimed remote file");
                    selection.claimed.push(RemoteFileRef {
                        path,
                        filename,
                        poll_batch_id: batch_id,
                    });
                },
                Ok(false) => {
                    debug!(file = %filename, "Already claimed, skipping");
                    selection.denied += 1;
                },
                Err(e) => {
                    warn!(file = %filename, error = %e, "Claim store failed, stopping selection");
                    selection.claim_error = Some(e);
                    break;
                },
            }

            if selection.claimed.len() >= self.max_fetch_size {
                break;
            }
        }

        if selection.claim_error.is_none() {
            selection.deferred = remaining.count();
        }

        selection
    }
}

/// Listing entries are bare names; anything else is not a file in the
/// watched directory
fn is_plain_filename(name: &str) -> bool {
    !name.trim().is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && name != "."
        && name != ".."
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::claims::MemoryClaimStore;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_glob_pattern() {
        let pattern = FilenamePattern::parse("*.xml").unwrap();
        assert!(pattern.matches("invoices.xml"));
        assert!(pattern.matches(".xml"));
        assert!(!pattern.matches("invoices.xml.part"));
        assert!(!pattern.matches("invoicesxxml"));

        let single = FilenamePattern::parse("tx-?.xml").unwrap();
        assert!(single.matches("tx-1.xml"));
        assert!(!single.matches("tx-12.xml"));
    }

    #[test]
    fn test_regex_pattern() {
        let pattern = FilenamePattern::parse(r"regex:^(invoices|transactions)-\d+\.xml$").unwrap();
        assert!(pattern.matches("invoices-42.xml"));
        assert!(!pattern.matches("orders-42.xml"));
        assert!(FilenamePattern::parse("regex:(").is_err());
    }

    #[test]
    fn test_join_remote_path() {
        assert_eq!(join_remote_path("upload", "a.xml"), "upload/a.xml");
        assert_eq!(join_remote_path("upload/", "a.xml"), "upload/a.xml");
        assert_eq!(join_remote_path("", "a.xml"), "a.xml");
    }

    #[tokio::test]
    async fn test_select_filters_and_claims() {
        let store = Arc::new(MemoryClaimStore::new());
        store.try_claim("upload/old.xml").await.unwrap();

        let filter = ListingFilter::new(
            store.clone(),
            FilenamePattern::parse("*.xml").unwrap(),
            "upload",
            10,
        );

        let selection = filter
            .select(
                names(&["old.xml", "new.xml", "notes.txt", "..", "nested/x.xml"]),
                Uuid::new_v4(),
            )
            .await;

        assert_eq!(selection.listed, 5);
        assert_eq!(selection.matched, 2);
        assert_eq!(selection.denied, 1);
        assert_eq!(selection.claimed.len(), 1);
        assert_eq!(selection.claimed[0].filename, "new.xml");
        assert_eq!(selection.claimed[0].path, "upload/new.xml");
        assert!(store.claim_record("upload/new.xml").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cap_leaves_remainder_unclaimed() {
        let store = Arc::new(MemoryClaimStore::new());
        let filter = ListingFilter::new(
            store.clone(),
            FilenamePattern::parse("*.xml").unwrap(),
            "upload",
            2,
        );

        let listing = names(&["a.xml", "b.xml", "c.xml", "d.xml"]);
        let first = filter.select(listing.clone(), Uuid::new_v4()).await;
        assert_eq!(first.claimed.len(), 2);
        assert_eq!(first.deferred, 2);
        assert!(store.claim_record("upload/c.xml").await.unwrap().is_none());

        let second = filter.select(listing.clone(), Uuid::new_v4()).await;
        let picked: Vec<_> = second.claimed.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(picked, vec!["c.xml", "d.xml"]);
        assert_eq!(second.denied, 2);

        let third = filter.select(listing, Uuid::new_v4()).await;
        assert!(third.claimed.is_empty());
        assert_eq!(third.denied, 4);
    }
}
