//! Verification agents: independent checkers that each own a slice of the
//! field space, compare the draft against the round's consensus, and emit
//! per-field verdicts plus concrete suggestions. Agents run on a bounded
//! worker pool and the round joins completely before corrections start.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::debug;

use crate::consensus::MatchingFields;
use crate::record::{Consensus, Draft, Field};
use crate::text::{
    heuristic_abbrev, normalize_author_list, normalize_doi, normalize_month, normalize_pages,
    token_similarity,
};

/// Similarity bar an agent applies to free-text fields.
const AGENT_THRESHOLD: f64 = 0.90;

/// Every key the verification map carries, in report order.
pub const VERIFIED_KEYS: &[&str] = &[
    "title",
    "authors",
    "journal_name",
    "journal_abbrev",
    "volume",
    "issue",
    "pages",
    "year",
    "month",
    "doi",
    "presence",
];

#[derive(Clone, Copy, Debug)]
enum Agent {
    Title,
    Authors,
    Journal,
    YearMonth,
    Vipd,
    Presence,
}

const AGENTS: &[Agent] = &[
    Agent::Title,
    Agent::Authors,
    Agent::Journal,
    Agent::YearMonth,
    Agent::Vipd,
    Agent::Presence,
];

struct AgentReport {
    verdicts: Vec<(&'static str, bool)>,
    suggestions: Vec<(&'static str, String)>,
}

#[derive(Debug, Default)]
pub struct VerifyOutcome {
    /// field name -> verified this round. Always carries all
    /// [`VERIFIED_KEYS`].
    pub verification: BTreeMap<&'static str, bool>,
    /// field name -> value the agents want the corrector to apply.
    pub suggestions: BTreeMap<&'static str, String>,
    /// Fraction of verified fields, in `[0, 1]`.
    pub score: f64,
}

/// Run all agents against the draft and consensus. `threads` bounds the
/// pool; verdicts for the same key are ANDed across agents, then any field
/// the consensus step already marked as matching is forced to verified.
pub fn run_agents(
    draft: &Draft,
    best: &Consensus,
    matching: &MatchingFields,
    threads: usize,
) -> VerifyOutcome {
    let reports: Mutex<Vec<AgentReport>> = Mutex::new(Vec::new());
    let chunk = AGENTS.len().div_ceil(threads.max(1));
    std::thread::scope(|scope| {
        for batch in AGENTS.chunks(chunk) {
            let reports = &reports;
            scope.spawn(move || {
                for agent in batch {
                    let report = run_one(*agent, draft, best);
                    if let Ok(mut all) = reports.lock() {
                        all.push(report);
                    }
                }
            });
        }
    });
    let reports = reports
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let mut verification: BTreeMap<&'static str, bool> =
        VERIFIED_KEYS.iter().map(|&k| (k, true)).collect();
    let mut suggestions: BTreeMap<&'static str, String> = BTreeMap::new();
    for report in reports {
        for (key, ok) in report.verdicts {
            verification.entry(key).and_modify(|v| *v &= ok);
        }
        // Last writer wins on suggestion collisions.
        for (key, value) in report.suggestions {
            if !value.is_empty() {
                suggestions.insert(key, value);
            }
        }
    }

    // Fields the consensus step found already matching are settled; drop
    // any suggestion for them except the author list, whose canonical
    // display form may still differ from the draft's. Matching fields
    // outside the map (conference name and friends) only lose suggestions.
    for &key in matching {
        if let Some(v) = verification.get_mut(key) {
            *v = true;
        }
        if key != "authors" {
            suggestions.remove(key);
        }
    }

    let passed = verification.values().filter(|v| **v).count();
    let score = passed as f64 / verification.len() as f64;
    debug!(score, passed, "verification round complete");
    VerifyOutcome {
        verification,
        suggestions,
        score,
    }
}

fn run_one(agent: Agent, draft: &Draft, best: &Consensus) -> AgentReport {
    match agent {
        Agent::Title => title_agent(draft, best),
        Agent::Authors => authors_agent(draft, best),
        Agent::Journal => journal_agent(draft, best),
        Agent::YearMonth => year_month_agent(draft, best),
        Agent::Vipd => vipd_agent(draft, best),
        Agent::Presence => presence_agent(draft, best),
    }
}

/// A field with no consensus value cannot be contradicted.
fn agree_or_vacuous(draft_value: &str, best_value: &str, same: impl Fn(&str, &str) -> bool) -> bool {
    best_value.is_empty() || same(draft_value, best_value)
}

fn title_agent(draft: &Draft, best: &Consensus) -> AgentReport {
    let ok = agree_or_vacuous(draft.get(Field::Title), &best.title, |d, b| {
        token_similarity(d, b) >= AGENT_THRESHOLD
    });
    AgentReport {
        verdicts: vec![("title", ok)],
        suggestions: if ok { vec![] } else { vec![("title", best.title.clone())] },
    }
}

fn authors_agent(draft: &Draft, best: &Consensus) -> AgentReport {
    let ok = best.authors.is_empty()
        || normalize_author_list(&draft.authors) == normalize_author_list(&best.authors);
    AgentReport {
        verdicts: vec![("authors", ok)],
        suggestions: if ok {
            vec![]
        } else {
            vec![("authors", best.authors.join("; "))]
        },
    }
}

fn journal_agent(draft: &Draft, best: &Consensus) -> AgentReport {
    let name_ok = agree_or_vacuous(draft.get(Field::JournalName), &best.journal_name, |d, b| {
        token_similarity(d, b) >= AGENT_THRESHOLD
    });

    // Prefer the consensus abbreviation; derive one from the consensus
    // journal name when no source supplied it.
    let wanted_abbrev = if best.journal_abbrev.is_empty() {
        heuristic_abbrev(&best.journal_name)
    } else {
        best.journal_abbrev.clone()
    };
    // A draft without an abbreviation is incomplete, not wrong.
    let draft_abbrev = draft.get(Field::JournalAbbrev);
    let abbrev_ok = draft_abbrev.is_empty()
        || agree_or_vacuous(draft_abbrev, &wanted_abbrev, |d, b| {
            token_similarity(d, b) >= AGENT_THRESHOLD
        });

    let mut suggestions = Vec::new();
    if !name_ok {
        suggestions.push(("journal_name", best.journal_name.clone()));
    }
    if !abbrev_ok || (draft_abbrev.is_empty() && !wanted_abbrev.is_empty()) {
        suggestions.push(("journal_abbrev", wanted_abbrev));
    }
    AgentReport {
        verdicts: vec![("journal_name", name_ok), ("journal_abbrev", abbrev_ok)],
        suggestions,
    }
}

fn year_month_agent(draft: &Draft, best: &Consensus) -> AgentReport {
    let year_ok = agree_or_vacuous(draft.get(Field::Year), &best.year, |d, b| d == b);
    let month_ok = agree_or_vacuous(draft.get(Field::Month), &best.month, |d, b| {
        normalize_month(d) == normalize_month(b)
    });
    let mut suggestions = Vec::new();
    if !year_ok {
        suggestions.push(("year", best.year.clone()));
    }
    if !month_ok {
        suggestions.push(("month", normalize_month(&best.month)));
    }
    AgentReport {
        verdicts: vec![("year", year_ok), ("month", month_ok)],
        suggestions,
    }
}

/// Volume, issue, pages and DOI in one agent. These are short identifiers
/// compared after normalisation, never fuzzily.
fn vipd_agent(draft: &Draft, best: &Consensus) -> AgentReport {
    let volume_ok = agree_or_vacuous(draft.get(Field::Volume), &best.volume, |d, b| {
        d.eq_ignore_ascii_case(b)
    });
    let issue_ok = agree_or_vacuous(draft.get(Field::Issue), &best.issue, |d, b| {
        d.eq_ignore_ascii_case(b)
    });
    let pages_ok = agree_or_vacuous(draft.get(Field::Pages), &best.pages, |d, b| {
        normalize_pages(d).0 == normalize_pages(b).0
    });
    let doi_ok = agree_or_vacuous(draft.get(Field::Doi), &best.doi, |d, b| {
        normalize_doi(d) == normalize_doi(b)
    });
    let mut suggestions = Vec::new();
    if !volume_ok {
        suggestions.push(("volume", best.volume.clone()));
    }
    if !issue_ok {
        suggestions.push(("issue", best.issue.clone()));
    }
    if !pages_ok {
        suggestions.push(("pages", normalize_pages(&best.pages).0));
    }
    if !doi_ok {
        suggestions.push(("doi", normalize_doi(&best.doi)));
    }
    AgentReport {
        verdicts: vec![
            ("volume", volume_ok),
            ("issue", issue_ok),
            ("pages", pages_ok),
            ("doi", doi_ok),
        ],
        suggestions,
    }
}

/// Completeness check: a reference is only a reference when it names a
/// work and someone who wrote it.
fn presence_agent(draft: &Draft, _best: &Consensus) -> AgentReport {
    let ok = !draft.get(Field::Title).is_empty() && !draft.authors.is_empty();
    AgentReport {
        verdicts: vec![("presence", ok)],
        suggestions: Vec::new(),
    }
}
