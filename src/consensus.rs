//! Consensus building: cluster the fan-out candidates, weight-vote every
//! field across the winning cluster, and decide through the trust gate
//! whether the result is reliable enough to correct the draft at all.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::record::{Candidate, Consensus, Draft, Field, SourceId};
use crate::text::{
    is_plausible_year, last_name, norm_for_compare, normalize_author_list, normalize_doi,
    normalize_month, normalize_pages, page_range, token_similarity,
};

/// Candidates whose representative title is at least this similar join the
/// same cluster.
const CLUSTER_THRESHOLD: f64 = 0.90;
/// Title similarity required for a field-level "already matching" call and
/// for the trust gate's similarity path.
const MATCH_THRESHOLD: f64 = 0.93;
/// Title similarity required for the highest-similarity trust path.
const NEAR_EXACT_THRESHOLD: f64 = 0.95;
const VENUE_THRESHOLD: f64 = 0.80;

/// Fields (by name) where the draft already agrees with the consensus.
/// Includes "authors", which is not a scalar [`Field`].
pub type MatchingFields = BTreeSet<&'static str>;

pub struct Reconciled {
    /// Empty when no candidate cleared the trust gate.
    pub best: Consensus,
    pub matching: MatchingFields,
}

/// Build the consensus record for this round. Rebuilt from scratch every
/// round; never partially updated.
pub fn reconcile(draft: &Draft, candidates: &[Candidate]) -> Reconciled {
    if candidates.is_empty() {
        return Reconciled {
            best: Consensus::default(),
            matching: MatchingFields::new(),
        };
    }

    let cluster = pick_cluster(candidates);
    let mut best = vote_fields(&cluster);
    upgrade_pages(&mut best, &cluster);

    if !trust_gate(draft, &best, candidates) {
        debug!("no candidate cleared the trust gate, discarding consensus");
        return Reconciled {
            best: Consensus::default(),
            matching: MatchingFields::new(),
        };
    }

    let matching = matching_fields(draft, &best);
    Reconciled { best, matching }
}

/// Greedy title clustering: each candidate joins the first cluster whose
/// representative (first member) title is close enough, else opens a new
/// cluster. Returns the highest-scoring cluster.
fn pick_cluster(candidates: &[Candidate]) -> Vec<&Candidate> {
    let mut clusters: Vec<Vec<&Candidate>> = Vec::new();
    for c in candidates {
        let joined = clusters.iter_mut().find(|cl| {
            token_similarity(&cl[0].title, &c.title) >= CLUSTER_THRESHOLD
        });
        match joined {
            Some(cl) => cl.push(c),
            None => clusters.push(vec![c]),
        }
    }
    clusters
        .into_iter()
        .max_by(|a, b| {
            cluster_score(a)
                .partial_cmp(&cluster_score(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or_default()
}

/// DOI agreement inside a cluster beats any weight sum: two independent
/// reports of the same DOI, or one from a trusted source.
fn cluster_score(cluster: &[&Candidate]) -> f64 {
    let weight_sum: f64 = cluster.iter().map(|c| c.weight()).sum();
    if doi_agreement(cluster).is_some() {
        return 1e9 + weight_sum;
    }
    weight_sum
}

/// The agreed DOI for a candidate set, if any: identical normalized DOI
/// from two distinct sources, or from one trusted source.
fn doi_agreement(cands: &[&Candidate]) -> Option<String> {
    let mut by_doi: HashMap<String, (BTreeSet<SourceId>, bool)> = HashMap::new();
    for c in cands {
        let d = normalize_doi(&c.doi);
        if d.is_empty() {
            continue;
        }
        let entry = by_doi.entry(d).or_default();
        entry.0.insert(c.source);
        entry.1 |= c.source.trusted();
    }
    by_doi
        .into_iter()
        .filter(|(_, (sources, trusted))| sources.len() >= 2 || *trusted)
        .max_by_key(|(_, (sources, _))| sources.len())
        .map(|(d, _)| d)
}

/// Comparison key used to group votes for one field.
fn vote_key(f: Field, value: &str) -> String {
    match f {
        Field::Doi => normalize_doi(value),
        Field::Month => normalize_month(value),
        Field::Pages => normalize_pages(value).0,
        _ => norm_for_compare(value),
    }
}

/// Weighted-plurality vote per field across the working cluster, with the
/// DOI-agreement override and tiered year selection.
fn vote_fields(cluster: &[&Candidate]) -> Consensus {
    let mut best = Consensus::default();
    if cluster.is_empty() {
        return best;
    }

    for &f in Field::VOTABLE {
        if matches!(f, Field::Doi | Field::Year) {
            continue;
        }
        if let Some((value, provenance)) = plurality(cluster, |c| c.get(f).to_string(), |v| vote_key(f, v)) {
            best.set(f, value, provenance);
        }
    }

    // DOI: agreement-based override first, plurality otherwise.
    if let Some(doi) = doi_agreement(cluster) {
        best.set(Field::Doi, doi, "doi-agreement".to_string());
    } else if let Some((value, provenance)) =
        plurality(cluster, |c| c.get(Field::Doi).to_string(), |v| vote_key(Field::Doi, v))
    {
        best.set(Field::Doi, normalize_doi(&value), provenance);
    }

    if let Some((year, provenance)) = select_year(cluster) {
        best.set(Field::Year, year, provenance);
    }

    // Author lists are voted as whole normalized tuples; the winning
    // group's heaviest member supplies the display form.
    if let Some((idx, provenance)) = plurality_idx(cluster, |c| {
        let key = normalize_author_list(&c.authors).join("|");
        (!key.is_empty()).then_some(key)
    }) {
        best.authors = cluster[idx].authors.clone();
        best.provenance.insert("authors", provenance);
    }

    best
}

/// Highest total weight wins; ties go to the first-seen highest-weight
/// source. Returns the representative display value and its provenance
/// label ("consensus" when more than one source agrees).
fn plurality<G, K>(cluster: &[&Candidate], get: G, key: K) -> Option<(String, String)>
where
    G: Fn(&Candidate) -> String,
    K: Fn(&str) -> String,
{
    struct Group {
        weight: f64,
        display: String,
        display_weight: f64,
        first_seen: usize,
        sources: BTreeSet<SourceId>,
    }
    let mut groups: HashMap<String, Group> = HashMap::new();
    for (i, c) in cluster.iter().enumerate() {
        let value = get(c);
        let k = key(&value);
        if k.is_empty() {
            continue;
        }
        let g = groups.entry(k).or_insert_with(|| Group {
            weight: 0.0,
            display: value.clone(),
            display_weight: c.weight(),
            first_seen: i,
            sources: BTreeSet::new(),
        });
        g.weight += c.weight();
        g.sources.insert(c.source);
        if c.weight() > g.display_weight {
            g.display = value;
            g.display_weight = c.weight();
        }
    }
    let winner = groups.into_values().max_by(|a, b| {
        a.weight
            .partial_cmp(&b.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            // Tie: earlier-seen group wins.
            .then(b.first_seen.cmp(&a.first_seen))
    })?;
    let provenance = if winner.sources.len() >= 2 {
        "consensus".to_string()
    } else {
        winner
            .sources
            .iter()
            .next()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default()
    };
    Some((winner.display, provenance))
}

/// Like [`plurality`] but over an optional per-candidate key, returning the
/// index of the winning group's heaviest member.
fn plurality_idx<G>(cluster: &[&Candidate], key: G) -> Option<(usize, String)>
where
    G: Fn(&Candidate) -> Option<String>,
{
    struct Group {
        weight: f64,
        rep: usize,
        rep_weight: f64,
        first_seen: usize,
        sources: BTreeSet<SourceId>,
    }
    let mut groups: HashMap<String, Group> = HashMap::new();
    for (i, c) in cluster.iter().enumerate() {
        let Some(k) = key(c) else { continue };
        let g = groups.entry(k).or_insert_with(|| Group {
            weight: 0.0,
            rep: i,
            rep_weight: c.weight(),
            first_seen: i,
            sources: BTreeSet::new(),
        });
        g.weight += c.weight();
        g.sources.insert(c.source);
        if c.weight() > g.rep_weight {
            g.rep = i;
            g.rep_weight = c.weight();
        }
    }
    let winner = groups.into_values().max_by(|a, b| {
        a.weight
            .partial_cmp(&b.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.first_seen.cmp(&a.first_seen))
    })?;
    let provenance = if winner.sources.len() >= 2 {
        "consensus".to_string()
    } else {
        winner
            .sources
            .iter()
            .next()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default()
    };
    Some((winner.rep, provenance))
}

/// Year selection walks the source-authority tiers and takes the most
/// common plausible year within the first tier that has one, falling back
/// to a global plurality of plausible years.
fn select_year(cluster: &[&Candidate]) -> Option<(String, String)> {
    for &tier in SourceId::IN_AUTHORITY_ORDER {
        let years: Vec<&str> = cluster
            .iter()
            .filter(|c| c.source == tier)
            .map(|c| c.year.as_str())
            .filter(|y| is_plausible_year(y))
            .collect();
        if let Some(y) = most_common(&years) {
            return Some((y, tier.as_str().to_string()));
        }
    }
    let years: Vec<&str> = cluster
        .iter()
        .map(|c| c.year.as_str())
        .filter(|y| is_plausible_year(y))
        .collect();
    most_common(&years).map(|y| (y, "consensus".to_string()))
}

fn most_common(values: &[&str]) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for v in values {
        match counts.iter_mut().find(|(k, _)| k == v) {
            Some((_, n)) => *n += 1,
            None => counts.push((v, 1)),
        }
    }
    counts
        .into_iter()
        .max_by_key(|&(_, n)| n)
        .map(|(v, _)| v.to_string())
}

/// Richness upgrade: a single-page vote is replaced by the longest true
/// range in the cluster that starts at the same page.
fn upgrade_pages(best: &mut Consensus, cluster: &[&Candidate]) {
    let (voted, _) = normalize_pages(&best.pages);
    let Ok(start) = voted.parse::<u64>() else {
        return;
    };
    let mut chosen: Option<(u64, String, SourceId)> = None;
    for c in cluster {
        if let Some((s, e)) = page_range(&c.pages)
            && s == start
        {
            let len = e - s;
            if chosen.as_ref().is_none_or(|(best_len, _, _)| len > *best_len) {
                chosen = Some((len, normalize_pages(&c.pages).0, c.source));
            }
        }
    }
    if let Some((_, pages, source)) = chosen {
        best.set(Field::Pages, pages, source.as_str().to_string());
    }
}

/// Fields where the draft already agrees with the consensus under the
/// field-specific similarity rules.
fn matching_fields(draft: &Draft, best: &Consensus) -> MatchingFields {
    let mut out = MatchingFields::new();
    if !best.title.is_empty()
        && token_similarity(draft.get(Field::Title), &best.title) >= MATCH_THRESHOLD
    {
        out.insert("title");
    }
    if !best.authors.is_empty()
        && !draft.authors.is_empty()
        && normalize_author_list(&draft.authors) == normalize_author_list(&best.authors)
    {
        out.insert("authors");
    }
    for &f in Field::VOTABLE {
        if f == Field::Title {
            continue;
        }
        let bv = best.get(f);
        let dv = draft.get(f);
        if !bv.is_empty() && !dv.is_empty() && vote_key(f, dv) == vote_key(f, bv) {
            out.insert(f.name());
        }
    }
    out
}

/// Similarity score between the draft and one candidate, used to choose the
/// trust-gate representative. Titles carry most of the signal.
pub fn score_candidate(draft: &Draft, cand: &Candidate) -> f64 {
    let mut score = 0.0;

    let ex_doi = normalize_doi(draft.get(Field::Doi));
    let ca_doi = normalize_doi(&cand.doi);
    if !ex_doi.is_empty() && ex_doi == ca_doi {
        score += 1.0;
    }

    score += 0.9 * token_similarity(draft.get(Field::Title), &cand.title);

    let ex_last: BTreeSet<String> = draft.authors.iter().filter_map(|a| last_name(a)).collect();
    let ca_last: BTreeSet<String> = cand.authors.iter().filter_map(|a| last_name(a)).collect();
    if !ex_last.is_empty() && !ca_last.is_empty() {
        let inter = ex_last.intersection(&ca_last).count() as f64;
        let union = ex_last.union(&ca_last).count() as f64;
        score += 0.25 * (inter / union.max(1.0));
    } else {
        score -= 0.05;
    }

    let ey = draft.get(Field::Year).chars().take(4).collect::<String>();
    let cy = cand.year.chars().take(4).collect::<String>();
    if let (Ok(e), Ok(c)) = (ey.parse::<i64>(), cy.parse::<i64>()) {
        match (e - c).abs() {
            0 => score += 0.12,
            1 => score -= 0.03,
            2 => score -= 0.06,
            _ => score -= 0.12,
        }
    }

    let ex_venue = venue_of_draft(draft);
    let ca_venue = if cand.journal_name.is_empty() {
        &cand.journal_abbrev
    } else {
        &cand.journal_name
    };
    if !ex_venue.is_empty() && !ca_venue.is_empty() {
        score += 0.08 * token_similarity(&ex_venue, ca_venue);
    }

    score + 0.16 * cand.weight()
}

fn venue_of_draft(draft: &Draft) -> String {
    let j = draft.get(Field::JournalName);
    if !j.is_empty() {
        return j.to_string();
    }
    draft.get(Field::ConferenceName).to_string()
}

/// Strict trustworthiness test for a single candidate: allow-listed source,
/// then either DOI equality or near-exact title with corroborating authors
/// or year, and a compatible venue when both sides name one.
pub fn is_trustworthy_match(draft: &Draft, cand: &Candidate) -> bool {
    if !cand.source.trusted() {
        return false;
    }
    let ex_doi = normalize_doi(draft.get(Field::Doi));
    let ca_doi = normalize_doi(&cand.doi);
    if !ex_doi.is_empty() && ex_doi == ca_doi {
        return true;
    }
    if token_similarity(draft.get(Field::Title), &cand.title) < MATCH_THRESHOLD {
        return false;
    }

    let ex_last: BTreeSet<String> = draft.authors.iter().filter_map(|a| last_name(a)).collect();
    let ca_last: BTreeSet<String> = cand.authors.iter().filter_map(|a| last_name(a)).collect();
    let author_ok =
        !ex_last.is_empty() && !ca_last.is_empty() && ex_last.intersection(&ca_last).count() > 0;

    let year_ok = match (
        draft.get(Field::Year).parse::<i64>(),
        cand.year.parse::<i64>(),
    ) {
        (Ok(e), Ok(c)) => (e - c).abs() <= 1,
        _ => false,
    };

    let ex_venue = venue_of_draft(draft);
    let ca_venue = if cand.journal_name.is_empty() {
        cand.journal_abbrev.clone()
    } else {
        cand.journal_name.clone()
    };
    let venue_ok = ex_venue.is_empty()
        || ca_venue.is_empty()
        || token_similarity(&ex_venue, &ca_venue) >= VENUE_THRESHOLD;

    (author_ok || year_ok) && venue_ok
}

/// The gate deciding whether this round's consensus may touch the draft:
/// (a) draft and consensus agree on DOI, or (b) the overall best-scoring
/// candidate is trustworthy, or (c) the candidate nearest the draft's title
/// (at or above the near-exact bar) is trustworthy.
fn trust_gate(draft: &Draft, best: &Consensus, candidates: &[Candidate]) -> bool {
    let ex_doi = normalize_doi(draft.get(Field::Doi));
    if !ex_doi.is_empty() && ex_doi == normalize_doi(&best.doi) {
        return true;
    }

    if let Some(top) = candidates.iter().max_by(|a, b| {
        score_candidate(draft, a)
            .partial_cmp(&score_candidate(draft, b))
            .unwrap_or(std::cmp::Ordering::Equal)
    }) && is_trustworthy_match(draft, top)
    {
        return true;
    }

    if let Some((sim, nearest)) = candidates
        .iter()
        .map(|c| (token_similarity(draft.get(Field::Title), &c.title), c))
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
        && sim >= NEAR_EXACT_THRESHOLD
        && is_trustworthy_match(draft, nearest)
    {
        return true;
    }
    false
}
