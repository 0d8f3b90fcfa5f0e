use serde::{Deserialize, Serialize};
use url::Url;

use crate::detection::normalize_url;

/// Subset of a stored recipe the duplicate scan needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeSummary {
    pub name: String,
    pub slug: String,
    #[serde(default, rename = "orgURL", skip_serializing_if = "Option::is_none")]
    pub org_url: Option<String>,
}

/// Result of matching search candidates against the current page. A source
/// URL match outranks any number of name matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateMatches {
    None,
    Url(RecipeSummary),
    Name(Vec<RecipeSummary>),
}

impl DuplicateMatches {
    pub fn is_none(&self) -> bool {
        matches!(self, DuplicateMatches::None)
    }
}

/// Sorts candidates into the match hierarchy: the first recipe whose stored
/// source URL normalizes to the page URL wins outright; otherwise every
/// candidate counts as a name match.
pub fn classify(page_url: &Url, candidates: Vec<RecipeSummary>) -> DuplicateMatches {
    let page = normalize_url(page_url);

    for candidate in &candidates {
        let Some(org_url) = candidate.org_url.as_deref() else {
            continue;
        };
        let Ok(parsed) = Url::parse(org_url) else {
            continue;
        };
        if normalize_url(&parsed) == page {
            return DuplicateMatches::Url(candidate.clone());
        }
    }

    if candidates.is_empty() {
        DuplicateMatches::None
    } else {
        DuplicateMatches::Name(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(name: &str, slug: &str, org_url: Option<&str>) -> RecipeSummary {
        RecipeSummary {
            name: name.to_string(),
            slug: slug.to_string(),
            org_url: org_url.map(str::to_string),
        }
    }

    #[test]
    fn url_match_outranks_name_matches() {
        let page = Url::parse("https://example.com/recipes/pie").unwrap();
        let matches = classify(
            &page,
            vec![
                summary("Apple Pie", "apple-pie", None),
                summary(
                    "Grandma's Pie",
                    "grandmas-pie",
                    Some("https://example.com/recipes/pie/?utm=mail"),
                ),
            ],
        );
        assert_eq!(
            matches,
            DuplicateMatches::Url(summary(
                "Grandma's Pie",
                "grandmas-pie",
                Some("https://example.com/recipes/pie/?utm=mail"),
            ))
        );
    }

    #[test]
    fn candidates_without_url_match_become_name_matches() {
        let page = Url::parse("https://example.com/recipes/pie").unwrap();
        let candidates = vec![
            summary("Apple Pie", "apple-pie", Some("https://other.net/pie")),
            summary("Meat Pie", "meat-pie", None),
        ];
        let matches = classify(&page, candidates.clone());
        assert_eq!(matches, DuplicateMatches::Name(candidates));
    }

    #[test]
    fn empty_candidates_mean_no_duplicates() {
        let page = Url::parse("https://example.com/recipes/pie").unwrap();
        let matches = classify(&page, Vec::new());
        assert!(matches.is_none());
    }

    #[test]
    fn unparseable_org_url_is_skipped() {
        let page = Url::parse("https://example.com/recipes/pie").unwrap();
        let matches = classify(&page, vec![summary("Pie", "pie", Some("not a url"))]);
        assert!(matches!(matches, DuplicateMatches::Name(_)));
    }
}
