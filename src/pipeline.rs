//! The resolution controller: validate, type-detect, extract, then cycle
//! lookup -> consensus -> verify -> correct until every field verifies or
//! a termination guard fires, and finally format and export.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::consensus::{self, MatchingFields};
use crate::correct::{self, Change};
use crate::extract;
use crate::format;
use crate::llm::{DisabledLlm, Llm, LlmAdapter};
use crate::record::{Candidate, Consensus, Draft, RefType};
use crate::report;
use crate::runtime::RuntimeResources;
use crate::source::{SourceClient, default_sources};
use crate::text::fingerprint;
use crate::verify::{self, VerifyOutcome};
use crate::{export, lookup};

/// Everything one resolution run produces.
#[derive(Debug, Serialize)]
pub struct Resolution {
    pub reference: String,
    pub ref_type: &'static str,
    pub draft: Draft,
    pub formatted: String,
    pub verification: BTreeMap<&'static str, bool>,
    pub score: f64,
    pub verified: bool,
    pub rounds: u32,
    pub corrections: Vec<Change>,
    pub csl_json: Value,
    pub bibtex: String,
    pub report: String,
    /// Set when input validation short-circuited the run; the message also
    /// appears in the report.
    pub rejected: Option<String>,
}

impl Resolution {
    /// Degraded result for input that never entered the loop: empty draft
    /// and exports, all-false verification, the message in the report.
    fn rejection(reference: String, message: &str) -> Resolution {
        let verification: BTreeMap<&'static str, bool> =
            verify::VERIFIED_KEYS.iter().map(|&k| (k, false)).collect();
        let report = report::rejection(&reference, message);
        Resolution {
            reference,
            ref_type: RefType::Other.label(),
            draft: Draft::default(),
            formatted: String::new(),
            verification,
            score: 0.0,
            verified: false,
            rounds: 0,
            corrections: Vec::new(),
            csl_json: Value::Null,
            bibtex: String::new(),
            report,
            rejected: Some(message.to_string()),
        }
    }
}

/// Loop guards, updated once per verification round.
struct LoopState {
    hops: u32,
    rounds: u32,
    score: f64,
    stagnation: u32,
    seen: HashSet<String>,
    loop_detected: bool,
    changed_last_cycle: bool,
}

impl LoopState {
    fn new() -> LoopState {
        LoopState {
            hops: 0,
            rounds: 0,
            score: -1.0,
            stagnation: 0,
            seen: HashSet::new(),
            loop_detected: false,
            changed_last_cycle: true,
        }
    }

    /// Record one verification round. Stagnation counts rounds whose score
    /// failed to improve; a repeated state fingerprint means the loop is
    /// cycling and can never converge.
    fn observe(&mut self, fp: String, score: f64) {
        self.hops += 1;
        if !self.seen.insert(fp) {
            self.loop_detected = true;
        }
        if score > self.score {
            self.stagnation = 0;
        } else {
            self.stagnation += 1;
        }
        self.score = score;
    }

    fn should_exit(&self, cfg: &PipelineConfig, all_verified: bool) -> bool {
        all_verified
            || self.loop_detected
            || self.hops >= cfg.max_hops
            || self.rounds >= cfg.max_correction_rounds
            || self.stagnation >= cfg.stagnation_patience
            || (!self.changed_last_cycle && self.stagnation >= 1)
    }
}

pub struct Pipeline {
    cfg: PipelineConfig,
    llm: Box<dyn Llm>,
    sources: Vec<Box<dyn SourceClient>>,
}

impl Pipeline {
    pub fn new(
        cfg: PipelineConfig,
        llm: Box<dyn Llm>,
        sources: Vec<Box<dyn SourceClient>>,
    ) -> Pipeline {
        Pipeline { cfg, llm, sources }
    }

    /// Production wiring: env-derived config, auto-detected model provider
    /// and the full source set.
    pub fn from_env() -> Pipeline {
        let cfg = PipelineConfig::default();
        let rt = Arc::new(RuntimeResources::new(cfg.clone()));
        let sources = default_sources(&rt);
        let adapter = LlmAdapter::new(&cfg);
        let llm: Box<dyn Llm> = if adapter.available() {
            Box::new(adapter)
        } else {
            Box::new(DisabledLlm)
        };
        Pipeline::new(cfg, llm, sources)
    }

    /// Resolve one raw reference string end to end.
    pub fn resolve(&self, reference: &str) -> Result<Resolution> {
        let reference = crate::text::normalize_text(reference);
        if !looks_like_reference(self.llm.as_ref(), &reference) {
            return Ok(Resolution::rejection(
                reference,
                "input does not look like a bibliographic reference",
            ));
        }

        let mut ref_type = detect_type(self.llm.as_ref(), &reference);
        let mut draft = extract::extract(self.llm.as_ref(), &reference, ref_type.label());
        if draft == Draft::default() {
            return Ok(Resolution::rejection(
                reference,
                "no bibliographic fields could be extracted",
            ));
        }
        info!(r#type = ref_type.label(), "reference accepted");

        let mut state = LoopState::new();
        let mut corrections: Vec<Change> = Vec::new();

        let (last_best, last_outcome) = loop {
            state.rounds += 1;
            let candidates = lookup::lookup(&self.sources, &draft);
            ref_type = refine_type(ref_type, &candidates);

            let reconciled = consensus::reconcile(&draft, &candidates);
            let outcome = verify::run_agents(
                &draft,
                &reconciled.best,
                &reconciled.matching,
                self.cfg.agent_threads,
            );

            let fp = fingerprint(
                &draft.to_value(),
                &reconciled.best.to_value(),
                &serde_json::to_value(&outcome.suggestions).unwrap_or_default(),
            );
            state.observe(fp, outcome.score);
            debug!(
                round = state.rounds,
                hops = state.hops,
                score = outcome.score,
                stagnation = state.stagnation,
                "verification round"
            );

            let all_verified = outcome.verification.values().all(|v| *v);
            if state.should_exit(&self.cfg, all_verified) {
                break (reconciled.best, outcome);
            }

            let round_changes = self.correct_round(
                &mut draft,
                &reconciled.best,
                &reconciled.matching,
                &outcome,
                &candidates,
            );
            state.changed_last_cycle = !round_changes.is_empty();
            corrections.extend(round_changes);
        };

        correct::enrich_from_best(&mut draft, &last_best, &mut corrections);

        let formatted = format::render(self.llm.as_ref(), &draft, ref_type);
        let csl = export::csl_json(&draft, ref_type);
        let bib = export::bibtex(&draft, ref_type);
        let verified = last_outcome.verification.values().all(|v| *v);
        let report = report::render(
            &reference,
            ref_type,
            &formatted,
            &last_outcome.verification,
            &corrections,
            state.rounds,
        );

        Ok(Resolution {
            reference,
            ref_type: ref_type.label(),
            draft,
            formatted,
            verification: last_outcome.verification,
            score: last_outcome.score,
            verified,
            rounds: state.rounds,
            corrections,
            csl_json: csl,
            bibtex: bib,
            report,
            rejected: None,
        })
    }

    fn correct_round(
        &self,
        draft: &mut Draft,
        best: &Consensus,
        matching: &MatchingFields,
        outcome: &VerifyOutcome,
        candidates: &[Candidate],
    ) -> Vec<Change> {
        let mut changes =
            correct::apply_corrections(draft, best, matching, &outcome.suggestions);
        correct::enrich_pages(draft, candidates, &mut changes);
        correct::llm_correct(
            self.llm.as_ref(),
            draft,
            best,
            &outcome.verification,
            &mut changes,
        );
        changes
    }
}

/// Cheap input validation: the model gets a yes/no question; when it is
/// unavailable a structural heuristic decides.
fn looks_like_reference(llm: &dyn Llm, reference: &str) -> bool {
    if reference.len() < 20 {
        return false;
    }
    let answer = llm.text(&format!(
        "Answer exactly YES or NO: is the following a bibliographic reference \
         (a citation to a paper, book, report or similar)?\n{reference}"
    ));
    match answer.trim().to_uppercase().as_str() {
        s if s.starts_with("YES") => true,
        s if s.starts_with("NO") => false,
        _ => heuristic_is_reference(reference),
    }
}

fn heuristic_is_reference(reference: &str) -> bool {
    let d = extract::regex_extract(reference);
    let signals = [
        d.title.is_some(),
        d.doi.is_some(),
        d.year.is_some(),
        !d.authors.is_empty(),
    ];
    signals.iter().filter(|s| **s).count() >= 2
}

/// Initial type detection from the raw text, refined later by source
/// evidence.
fn detect_type(llm: &dyn Llm, reference: &str) -> RefType {
    let labels = [
        "journal article",
        "conference paper",
        "book",
        "book chapter",
        "thesis",
        "technical report",
        "dataset",
        "standard",
        "software",
        "preprint",
        "other",
    ];
    let answer = llm.text(&format!(
        "Classify this reference. Answer with exactly one of: {}.\n{reference}",
        labels.join(", ")
    ));
    let t = RefType::from_label(&answer);
    if t != RefType::Other {
        return t;
    }
    heuristic_type(reference)
}

fn heuristic_type(reference: &str) -> RefType {
    let lower = reference.to_lowercase();
    if lower.contains("arxiv") {
        RefType::Preprint
    } else if lower.contains("proc.") || lower.contains("proceedings") || lower.contains("conf.") {
        RefType::ConferencePaper
    } else if lower.contains("thesis") || lower.contains("dissertation") {
        RefType::Thesis
    } else if lower.contains("tech. rep") || lower.contains("technical report") {
        RefType::TechnicalReport
    } else {
        RefType::JournalArticle
    }
}

/// Source type votes outrank the text heuristic once at least two sources
/// agree.
fn refine_type(current: RefType, candidates: &[Candidate]) -> RefType {
    let mut counts: Vec<(RefType, usize)> = Vec::new();
    for c in candidates {
        for &vote in &c.type_votes {
            if vote == RefType::Other {
                continue;
            }
            match counts.iter_mut().find(|(t, _)| *t == vote) {
                Some((_, n)) => *n += 1,
                None => counts.push((vote, 1)),
            }
        }
    }
    match counts.into_iter().max_by_key(|&(_, n)| n) {
        Some((t, n)) if n >= 2 => t,
        _ => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SourceId;

    #[test]
    fn heuristic_accepts_real_reference_rejects_prose() {
        let r = "K. He, X. Zhang, S. Ren, and J. Sun, \"Deep Residual Learning for Image Recognition,\" in Proc. CVPR, 2016, pp. 770-778.";
        assert!(heuristic_is_reference(r));
        assert!(!heuristic_is_reference(
            "the quick brown fox jumps over the lazy dog without any citation markers"
        ));
    }

    #[test]
    fn type_heuristics() {
        assert_eq!(
            heuristic_type("X, \"Y,\" arXiv:1512.03385, 2015."),
            RefType::Preprint
        );
        assert_eq!(
            heuristic_type("X, \"Y,\" in Proc. CVPR, 2016."),
            RefType::ConferencePaper
        );
        assert_eq!(
            heuristic_type("X, \"Y,\" Ph.D. dissertation, MIT, 2001."),
            RefType::Thesis
        );
        assert_eq!(heuristic_type("X, \"Y,\" Nature, 2020."), RefType::JournalArticle);
    }

    #[test]
    fn two_source_votes_override_text_type() {
        let mut a = Candidate::new(SourceId::Crossref);
        a.type_votes.push(RefType::ConferencePaper);
        let mut b = Candidate::new(SourceId::OpenAlex);
        b.type_votes.push(RefType::ConferencePaper);
        assert_eq!(
            refine_type(RefType::JournalArticle, &[a.clone(), b]),
            RefType::ConferencePaper
        );
        // One vote is not enough.
        assert_eq!(refine_type(RefType::JournalArticle, &[a]), RefType::JournalArticle);
    }

    #[test]
    fn loop_state_exits_on_repeat_fingerprint() {
        let cfg = PipelineConfig::default();
        let mut s = LoopState::new();
        s.observe("abc".into(), 0.5);
        assert!(!s.should_exit(&cfg, false));
        s.changed_last_cycle = true;
        s.observe("abc".into(), 0.9);
        assert!(s.loop_detected);
        assert!(s.should_exit(&cfg, false));
    }

    #[test]
    fn loop_state_exits_on_stagnation() {
        let mut cfg = PipelineConfig::default();
        cfg.stagnation_patience = 2;
        cfg.max_correction_rounds = 99;
        cfg.max_hops = 99;
        let mut s = LoopState::new();
        s.observe("a".into(), 0.5);
        s.observe("b".into(), 0.5);
        s.observe("c".into(), 0.5);
        assert!(s.stagnation >= 2);
        assert!(s.should_exit(&cfg, false));
    }

    #[test]
    fn no_changes_and_flat_score_exits_early() {
        let mut cfg = PipelineConfig::default();
        cfg.stagnation_patience = 99;
        cfg.max_correction_rounds = 99;
        cfg.max_hops = 99;
        let mut s = LoopState::new();
        s.observe("a".into(), 0.5);
        s.changed_last_cycle = false;
        s.observe("b".into(), 0.5);
        assert!(s.should_exit(&cfg, false));
    }

    #[test]
    fn round_and_hop_caps_bind() {
        let mut cfg = PipelineConfig::default();
        cfg.max_correction_rounds = 1;
        let mut s = LoopState::new();
        s.rounds = 1;
        s.observe("a".into(), 0.5);
        assert!(s.should_exit(&cfg, false));
    }
}
