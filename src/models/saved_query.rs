use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored tag predicate.
#[derive(Debug, Clone, Serialize)]
pub struct SavedQuery {
    pub id: i32,
    pub name: String,
    pub included_tags: Vec<String>,
    pub excluded_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SavedQuery {
    /// A task matches when it carries no excluded tag and, if the inclusion list is
    /// non-empty, at least one included tag.
    #[must_use]
    pub fn matches(&self, tags: &[String]) -> bool {
        tag_predicate(&self.included_tags, &self.excluded_tags, tags)
    }

    /// True when `tag` is one of this query's own filter tags.
    #[must_use]
    pub fn is_filter_tag(&self, tag: &str) -> bool {
        self.included_tags.iter().any(|t| t == tag) || self.excluded_tags.iter().any(|t| t == tag)
    }
}

#[must_use]
pub fn tag_predicate(included: &[String], excluded: &[String], tags: &[String]) -> bool {
    if !included.is_empty() && !tags.iter().any(|t| included.contains(t)) {
        return false;
    }
    !tags.iter().any(|t| excluded.contains(t))
}

#[derive(Debug, Clone, Deserialize)]
pub struct SavedQueryInput {
    pub name: String,
    #[serde(default)]
    pub included_tags: Vec<String>,
    #[serde(default)]
    pub excluded_tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn empty_inclusion_means_no_constraint() {
        assert!(tag_predicate(&[], &tags(&["archived"]), &tags(&["client1"])));
        assert!(tag_predicate(&[], &[], &[]));
    }

    #[test]
    fn exclusion_wins_over_inclusion() {
        let included = tags(&["client1"]);
        let excluded = tags(&["archived"]);
        assert!(!tag_predicate(&included, &excluded, &tags(&["client1", "archived"])));
        assert!(tag_predicate(&included, &excluded, &tags(&["client1", "bug"])));
    }

    #[test]
    fn inclusion_needs_one_shared_tag() {
        let included = tags(&["client1", "client2"]);
        assert!(tag_predicate(&included, &[], &tags(&["client2"])));
        assert!(!tag_predicate(&included, &[], &tags(&["client3"])));
        assert!(!tag_predicate(&included, &[], &[]));
    }
}
