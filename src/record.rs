//! Data model for one resolution run: the mutable [`Draft`], normalised
//! per-source [`Candidate`]s, and the reconciled [`Consensus`] record.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::text::{authors_to_list, normalize_month, normalize_text};

/// Scalar bibliographic fields. Author lists are handled separately because
/// they are voted and compared as whole tuples, never per element.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Title,
    JournalName,
    JournalAbbrev,
    ConferenceName,
    Volume,
    Issue,
    Pages,
    Year,
    Month,
    Doi,
    Publisher,
    Location,
    Edition,
    Isbn,
    Url,
    ArxivId,
}

impl Field {
    pub const ALL: &'static [Field] = &[
        Field::Title,
        Field::JournalName,
        Field::JournalAbbrev,
        Field::ConferenceName,
        Field::Volume,
        Field::Issue,
        Field::Pages,
        Field::Year,
        Field::Month,
        Field::Doi,
        Field::Publisher,
        Field::Location,
        Field::Edition,
        Field::Isbn,
        Field::Url,
        Field::ArxivId,
    ];

    /// Fields carried by candidates and eligible for consensus voting.
    pub const VOTABLE: &'static [Field] = &[
        Field::Title,
        Field::JournalName,
        Field::JournalAbbrev,
        Field::Volume,
        Field::Issue,
        Field::Pages,
        Field::Doi,
        Field::Year,
        Field::Month,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::JournalName => "journal_name",
            Field::JournalAbbrev => "journal_abbrev",
            Field::ConferenceName => "conference_name",
            Field::Volume => "volume",
            Field::Issue => "issue",
            Field::Pages => "pages",
            Field::Year => "year",
            Field::Month => "month",
            Field::Doi => "doi",
            Field::Publisher => "publisher",
            Field::Location => "location",
            Field::Edition => "edition",
            Field::Isbn => "isbn",
            Field::Url => "url",
            Field::ArxivId => "arxiv_id",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The mutable working record for the current invocation. Created by the
/// extractor, corrected in place each round, finalised by the formatter.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_abbrev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conference_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arxiv_id: Option<String>,
}

impl Draft {
    pub fn get(&self, f: Field) -> &str {
        let v = match f {
            Field::Title => &self.title,
            Field::JournalName => &self.journal_name,
            Field::JournalAbbrev => &self.journal_abbrev,
            Field::ConferenceName => &self.conference_name,
            Field::Volume => &self.volume,
            Field::Issue => &self.issue,
            Field::Pages => &self.pages,
            Field::Year => &self.year,
            Field::Month => &self.month,
            Field::Doi => &self.doi,
            Field::Publisher => &self.publisher,
            Field::Location => &self.location,
            Field::Edition => &self.edition,
            Field::Isbn => &self.isbn,
            Field::Url => &self.url,
            Field::ArxivId => &self.arxiv_id,
        };
        v.as_deref().unwrap_or("")
    }

    pub fn set(&mut self, f: Field, value: &str) {
        let value = normalize_text(value);
        let slot = match f {
            Field::Title => &mut self.title,
            Field::JournalName => &mut self.journal_name,
            Field::JournalAbbrev => &mut self.journal_abbrev,
            Field::ConferenceName => &mut self.conference_name,
            Field::Volume => &mut self.volume,
            Field::Issue => &mut self.issue,
            Field::Pages => &mut self.pages,
            Field::Year => &mut self.year,
            Field::Month => &mut self.month,
            Field::Doi => &mut self.doi,
            Field::Publisher => &mut self.publisher,
            Field::Location => &mut self.location,
            Field::Edition => &mut self.edition,
            Field::Isbn => &mut self.isbn,
            Field::Url => &mut self.url,
            Field::ArxivId => &mut self.arxiv_id,
        };
        *slot = if value.is_empty() { None } else { Some(value) };
    }

    /// Build a draft from loosely structured JSON, keeping only the fixed
    /// field schema. Authors may arrive as a string or a list; unknown keys
    /// and non-string values are dropped.
    pub fn from_json(v: &serde_json::Value) -> Draft {
        let mut d = Draft::default();
        let Some(obj) = v.as_object() else {
            return d;
        };
        for &f in Field::ALL {
            if let Some(s) = obj.get(f.name()).and_then(|x| x.as_str()) {
                d.set(f, s);
            } else if let Some(n) = obj.get(f.name()).and_then(|x| x.as_i64()) {
                d.set(f, &n.to_string());
            }
        }
        match obj.get("authors") {
            Some(serde_json::Value::String(s)) => d.authors = authors_to_list(s),
            Some(serde_json::Value::Array(arr)) => {
                d.authors = arr
                    .iter()
                    .filter_map(|a| a.as_str())
                    .map(normalize_text)
                    .filter(|a| !a.is_empty())
                    .collect();
            }
            _ => {}
        }
        if let Some(m) = &d.month {
            d.month = Some(normalize_month(m));
        }
        d
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Identity and authority of a bibliographic source. Ordering of the weight
/// table is the consensus authority order: DOI registry first, preprint
/// archive last.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    Crossref,
    IeeeXplore,
    OpenAlex,
    SemanticScholar,
    Pubmed,
    Arxiv,
}

impl SourceId {
    pub const IN_AUTHORITY_ORDER: &'static [SourceId] = &[
        SourceId::Crossref,
        SourceId::IeeeXplore,
        SourceId::OpenAlex,
        SourceId::SemanticScholar,
        SourceId::Pubmed,
        SourceId::Arxiv,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceId::Crossref => "crossref",
            SourceId::IeeeXplore => "ieeexplore",
            SourceId::OpenAlex => "openalex",
            SourceId::SemanticScholar => "semanticscholar",
            SourceId::Pubmed => "pubmed",
            SourceId::Arxiv => "arxiv",
        }
    }

    pub fn weight(self) -> f64 {
        match self {
            SourceId::Crossref => 1.0,
            SourceId::IeeeXplore => 0.9,
            SourceId::OpenAlex => 0.8,
            SourceId::SemanticScholar => 0.7,
            SourceId::Pubmed => 0.6,
            SourceId::Arxiv => 0.5,
        }
    }

    /// Allow-list for the trust gate and for single-source DOI confirmation.
    pub fn trusted(self) -> bool {
        matches!(
            self,
            SourceId::Crossref | SourceId::IeeeXplore | SourceId::OpenAlex
        )
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference type used by the formatter templates and the exports.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    JournalArticle,
    ConferencePaper,
    Book,
    BookChapter,
    Thesis,
    TechnicalReport,
    Dataset,
    Standard,
    Software,
    Preprint,
    Other,
}

impl RefType {
    pub fn from_label(s: &str) -> RefType {
        match normalize_text(s).to_lowercase().as_str() {
            "journal article" | "journal" | "journal-article" | "article" => RefType::JournalArticle,
            "conference paper" | "paper-conference" | "proceedings-article" | "conference" => {
                RefType::ConferencePaper
            }
            "book" => RefType::Book,
            "book chapter" | "book-chapter" | "chapter" => RefType::BookChapter,
            "thesis" => RefType::Thesis,
            "technical report" | "report" => RefType::TechnicalReport,
            "dataset" => RefType::Dataset,
            "standard" => RefType::Standard,
            "software" => RefType::Software,
            "preprint" => RefType::Preprint,
            _ => RefType::Other,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RefType::JournalArticle => "journal article",
            RefType::ConferencePaper => "conference paper",
            RefType::Book => "book",
            RefType::BookChapter => "book chapter",
            RefType::Thesis => "thesis",
            RefType::TechnicalReport => "technical report",
            RefType::Dataset => "dataset",
            RefType::Standard => "standard",
            RefType::Software => "software",
            RefType::Preprint => "preprint",
            RefType::Other => "other",
        }
    }

    pub fn csl_type(self) -> &'static str {
        match self {
            RefType::JournalArticle => "article-journal",
            RefType::ConferencePaper => "paper-conference",
            RefType::Book => "book",
            RefType::BookChapter => "chapter",
            RefType::Thesis => "thesis",
            RefType::TechnicalReport => "report",
            RefType::Dataset => "dataset",
            RefType::Standard => "standard",
            RefType::Software => "software",
            RefType::Preprint | RefType::Other => "article",
        }
    }

    pub fn bibtex_type(self) -> &'static str {
        match self {
            RefType::JournalArticle => "article",
            RefType::ConferencePaper => "inproceedings",
            RefType::Book => "book",
            RefType::BookChapter => "incollection",
            RefType::Thesis => "phdthesis",
            RefType::TechnicalReport => "techreport",
            RefType::Preprint | RefType::Other => "misc",
            RefType::Dataset | RefType::Standard | RefType::Software => "misc",
        }
    }
}

/// One normalised record from one source for one query. Immutable once the
/// fan-out step produces it; `raw` keeps the source payload for provenance.
#[derive(Clone, Debug, Serialize)]
pub struct Candidate {
    #[serde(skip)]
    pub source: SourceId,
    pub title: String,
    pub authors: Vec<String>,
    pub journal_name: String,
    pub journal_abbrev: String,
    pub volume: String,
    pub issue: String,
    pub pages: String,
    pub doi: String,
    pub year: String,
    pub month: String,
    /// Type evidence contributed by this source, if any.
    #[serde(skip)]
    pub type_votes: Vec<RefType>,
    #[serde(skip)]
    pub raw: serde_json::Value,
}

impl Candidate {
    pub fn new(source: SourceId) -> Candidate {
        Candidate {
            source,
            title: String::new(),
            authors: Vec::new(),
            journal_name: String::new(),
            journal_abbrev: String::new(),
            volume: String::new(),
            issue: String::new(),
            pages: String::new(),
            doi: String::new(),
            year: String::new(),
            month: String::new(),
            type_votes: Vec::new(),
            raw: serde_json::Value::Null,
        }
    }

    pub fn weight(&self) -> f64 {
        self.source.weight()
    }

    pub fn get(&self, f: Field) -> &str {
        match f {
            Field::Title => &self.title,
            Field::JournalName => &self.journal_name,
            Field::JournalAbbrev => &self.journal_abbrev,
            Field::Volume => &self.volume,
            Field::Issue => &self.issue,
            Field::Pages => &self.pages,
            Field::Doi => &self.doi,
            Field::Year => &self.year,
            Field::Month => &self.month,
            _ => "",
        }
    }

    /// Deduplication key for the fan-out result set.
    pub fn dedupe_key(&self) -> (SourceId, String) {
        let id = crate::text::normalize_doi(&self.doi);
        let key = if id.is_empty() {
            self.title.to_lowercase()
        } else {
            id
        };
        (self.source, key)
    }
}

/// The reconciled "best" record for the current round, with per-field
/// provenance. Rebuilt from scratch every round.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Consensus {
    pub title: String,
    pub authors: Vec<String>,
    pub journal_name: String,
    pub journal_abbrev: String,
    pub volume: String,
    pub issue: String,
    pub pages: String,
    pub doi: String,
    pub year: String,
    pub month: String,
    /// field name -> source identifier, "consensus" or "doi-agreement".
    /// Keyed by name rather than [`Field`] so the author-tuple vote can be
    /// recorded alongside the scalar fields.
    #[serde(skip)]
    pub provenance: BTreeMap<&'static str, String>,
}

impl Consensus {
    pub fn get(&self, f: Field) -> &str {
        match f {
            Field::Title => &self.title,
            Field::JournalName => &self.journal_name,
            Field::JournalAbbrev => &self.journal_abbrev,
            Field::Volume => &self.volume,
            Field::Issue => &self.issue,
            Field::Pages => &self.pages,
            Field::Doi => &self.doi,
            Field::Year => &self.year,
            Field::Month => &self.month,
            _ => "",
        }
    }

    pub fn set(&mut self, f: Field, value: String, provenance: String) {
        if value.is_empty() {
            return;
        }
        let slot = match f {
            Field::Title => &mut self.title,
            Field::JournalName => &mut self.journal_name,
            Field::JournalAbbrev => &mut self.journal_abbrev,
            Field::Volume => &mut self.volume,
            Field::Issue => &mut self.issue,
            Field::Pages => &mut self.pages,
            Field::Doi => &mut self.doi,
            Field::Year => &mut self.year,
            Field::Month => &mut self.month,
            _ => return,
        };
        *slot = value;
        self.provenance.insert(f.name(), provenance);
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.authors.is_empty()
            && self.doi.is_empty()
            && self.year.is_empty()
            && self.journal_name.is_empty()
            && self.pages.is_empty()
    }

    pub fn to_value(&self) -> serde_json::Value {
        if self.is_empty() {
            return serde_json::json!({});
        }
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_from_json_drops_unknown_and_coerces_authors() {
        let v = serde_json::json!({
            "title": "A title",
            "authors": "K. He, X. Zhang",
            "year": 2015,
            "month": "Aug",
            "bogus_key": "dropped",
        });
        let d = Draft::from_json(&v);
        assert_eq!(d.title.as_deref(), Some("A title"));
        assert_eq!(d.authors, vec!["K. He", "X. Zhang"]);
        assert_eq!(d.year.as_deref(), Some("2015"));
        assert_eq!(d.month.as_deref(), Some("8"));
        assert!(d.to_value().get("bogus_key").is_none());
    }

    #[test]
    fn draft_set_empty_clears() {
        let mut d = Draft::default();
        d.set(Field::Volume, "12");
        assert_eq!(d.get(Field::Volume), "12");
        d.set(Field::Volume, "  ");
        assert_eq!(d.get(Field::Volume), "");
        assert!(d.volume.is_none());
    }

    #[test]
    fn source_authority_order_is_strictly_decreasing() {
        let ws: Vec<f64> = SourceId::IN_AUTHORITY_ORDER
            .iter()
            .map(|s| s.weight())
            .collect();
        assert!(ws.windows(2).all(|w| w[0] > w[1]));
        assert!(SourceId::Crossref.trusted());
        assert!(!SourceId::Arxiv.trusted());
    }

    #[test]
    fn candidate_dedupe_prefers_doi() {
        let mut c = Candidate::new(SourceId::Crossref);
        c.title = "Some Title".into();
        c.doi = "DOI:10.1/X".into();
        assert_eq!(
            c.dedupe_key(),
            (SourceId::Crossref, "10.1/x".to_string())
        );
        c.doi.clear();
        assert_eq!(
            c.dedupe_key(),
            (SourceId::Crossref, "some title".to_string())
        );
    }

    #[test]
    fn empty_consensus_serialises_to_empty_object() {
        let c = Consensus::default();
        assert_eq!(c.to_value(), serde_json::json!({}));
    }

    #[test]
    fn ref_type_round_trips_labels() {
        for t in [
            RefType::JournalArticle,
            RefType::ConferencePaper,
            RefType::Book,
            RefType::BookChapter,
            RefType::Preprint,
        ] {
            assert_eq!(RefType::from_label(t.label()), t);
        }
        assert_eq!(RefType::from_label("proceedings-article"), RefType::ConferencePaper);
    }
}
