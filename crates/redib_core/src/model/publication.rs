//! Publications reported against completed access.

use crate::clock::parse_date;
use crate::model::application::ApplicationId;
use crate::model::directory::UserId;
use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PublicationId = Uuid;

static DOI_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^10\.\d+/\S+$").expect("valid DOI regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub id: PublicationId,
    pub application_id: ApplicationId,
    pub title: String,
    pub authors: String,
    /// Empty when not known yet.
    pub doi: String,
    pub journal: String,
    /// `YYYY-MM-DD`.
    pub publication_date: Option<String>,
    pub publication_year: Option<i32>,
    /// Whether the text acknowledges the network.
    pub acknowledged: bool,
    pub acknowledgment_text: String,
    pub reported_by: Option<UserId>,
    pub reported_at: i64,
    pub verified: bool,
}

impl Publication {
    pub fn new(application_id: ApplicationId, title: impl Into<String>, reported_at: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            application_id,
            title: title.into(),
            authors: String::new(),
            doi: String::new(),
            journal: String::new(),
            publication_date: None,
            publication_year: None,
            acknowledged: false,
            acknowledgment_text: String::new(),
            reported_by: None,
            reported_at,
            verified: false,
        }
    }

    /// Fills `publication_year` from `publication_date` when absent.
    pub fn derive_year(&mut self) {
        if self.publication_year.is_none() {
            self.publication_year = self.publication_date.as_deref().and_then(year_of);
        }
    }
}

/// Whether `doi` looks like `10.<registrant>/<suffix>`.
pub fn is_valid_doi(doi: &str) -> bool {
    DOI_PATTERN.is_match(doi.trim())
}

/// Year of a valid `YYYY-MM-DD` calendar date.
pub fn year_of(date: &str) -> Option<i32> {
    parse_date(date).map(|date| date.year())
}

#[cfg(test)]
mod tests {
    use super::{is_valid_doi, year_of, Publication};
    use uuid::Uuid;

    #[test]
    fn doi_format() {
        assert!(is_valid_doi("10.1038/s41586-020-2649-2"));
        assert!(is_valid_doi(" 10.1000/xyz123 "));
        assert!(!is_valid_doi("doi:10.1038/abc"));
        assert!(!is_valid_doi("10.abc/def"));
        assert!(!is_valid_doi("10.1038/"));
    }

    #[test]
    fn year_is_derived_only_when_missing() {
        let mut publication = Publication::new(Uuid::new_v4(), "PET tracer kinetics", 0);
        publication.publication_date = Some("2024-03-15".to_string());
        publication.derive_year();
        assert_eq!(publication.publication_year, Some(2024));

        publication.publication_year = Some(2023);
        publication.derive_year();
        assert_eq!(publication.publication_year, Some(2023));
    }

    #[test]
    fn malformed_date_has_no_year() {
        assert_eq!(year_of("15/03/2024"), None);
        assert_eq!(year_of("2024-13-45"), None);
    }
}
