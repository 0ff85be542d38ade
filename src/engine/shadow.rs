// ── Shadow / contradiction probe ───────────────────────────────────────────
//
// A read-only composition over the query planner: rewrite the claim so the
// vector search gravitates toward refutations, keep only hits that read as
// contradictions, and weight each by the credibility of its source. The
// probe owns no storage.

use std::sync::Arc;
use std::sync::OnceLock;

use log::info;
use regex::Regex;

use crate::atoms::error::MemoryResult;
use crate::atoms::types::{Entry, EntrySource, QueryOptions, ShadowReport};
use crate::engine::{query, EngineInner};

/// Markers that flag a stored entry as contradicting a claim.
/// A pattern that fails to compile is treated as absent, not fatal.
fn negation_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(not|no|never|false|incorrect|wrong|refut\w*|contradict\w*|disprov\w*|untrue|myth)\b")
            .ok()
    })
    .as_ref()
}

/// How much weight a refutation from this source carries.
fn source_credibility(source: EntrySource) -> f64 {
    match source {
        EntrySource::UserInput => 0.9,
        EntrySource::ToolOutput => 0.8,
        EntrySource::System => 0.7,
        EntrySource::External => 0.5,
        EntrySource::AgentInference => 0.4,
    }
}

fn is_refutation(entry: &Entry) -> bool {
    negation_re().map_or(false, |re| re.is_match(&entry.content))
}

/// Rewrite the claim with negation markers so refuting entries rank high.
fn rewrite_claim(claim: &str) -> String {
    format!("not false incorrect refuted: {claim}")
}

pub(crate) async fn shadow_query(
    inner: &Arc<EngineInner>,
    claim: &str,
    opts: &QueryOptions,
) -> MemoryResult<ShadowReport> {
    let rewritten = rewrite_claim(claim);
    let mut probe_opts = opts.clone();
    // Fetch wide; the refutation filter below is the real cut.
    probe_opts.top_k = opts.top_k.max(10);
    probe_opts.min_score = Some(0.0);

    let hits = query::run_query(inner, &rewritten, &probe_opts).await?;

    let mut contradictions: Vec<_> = hits
        .into_iter()
        .filter(|h| is_refutation(&h.entry))
        .map(|mut h| {
            h.score = (h.score * source_credibility(h.entry.source)).clamp(0.0, 1.0);
            h
        })
        .collect();
    contradictions.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    contradictions.truncate(opts.top_k);

    let max_refutation = contradictions
        .first()
        .map(|h| h.score)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let credibility = 1.0 - max_refutation;

    info!(
        "[shadow] claim credibility {credibility:.2} ({} contradicting entr{})",
        contradictions.len(),
        if contradictions.len() == 1 { "y" } else { "ies" }
    );
    Ok(ShadowReport { credibility, contradictions })
}
