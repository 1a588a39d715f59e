//! Policy engine (spec §4.7): a pure, synchronous function from a
//! claim snapshot to eligibility flags and block reasons. No I/O, no
//! mutable state — the claim store calls this on every mutation and
//! trusts it to be idempotent.

use std::collections::HashSet;

use veritas_protocol::BlockReason;
use veritas_protocol::Claim;
use veritas_protocol::ClaimCategory;
use veritas_protocol::ClaimStatus;
use veritas_protocol::ClaimTypeTag;
use veritas_protocol::EvidenceStatus;
use veritas_protocol::FredState;
use veritas_protocol::GoogleState;
use veritas_protocol::OutputApprovalState;
use veritas_protocol::PolicyFields;

/// `policyThreshold` by tag (spec §4.7).
fn policy_threshold(tag: ClaimTypeTag) -> f64 {
    match tag {
        ClaimTypeTag::NumericFactual => 0.60,
        ClaimTypeTag::SimplePolicy => 0.75,
        ClaimTypeTag::Other => 0.80,
    }
}

/// Size of the set of non-empty, lowercased, trimmed `publisher || url`
/// keys over `claim.sources`.
fn independent_source_count(claim: &Claim) -> usize {
    let mut keys: HashSet<String> = HashSet::new();
    for source in &claim.sources {
        let key = format!(
            "{}||{}",
            source.publisher.as_deref().unwrap_or("").trim().to_lowercase(),
            source.url.as_deref().unwrap_or("").trim().to_lowercase(),
        );
        if key != "||" {
            keys.insert(key);
        }
    }
    keys.len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NormalizedRating {
    False,
    Misleading,
    Supported,
    Unverified,
}

fn normalize_rating(raw: &str) -> NormalizedRating {
    let lower = raw.trim().to_lowercase();
    const FALSE_WORDS: &[&str] = &["false", "incorrect", "pants on fire"];
    const MISLEADING_WORDS: &[&str] =
        &["misleading", "mixed", "partly false", "half true", "mostly false"];
    const SUPPORTED_WORDS: &[&str] = &["true", "correct", "mostly true"];

    if FALSE_WORDS.iter().any(|w| lower.contains(w)) {
        NormalizedRating::False
    } else if MISLEADING_WORDS.iter().any(|w| lower.contains(w)) {
        NormalizedRating::Misleading
    } else if SUPPORTED_WORDS.iter().any(|w| lower.contains(w)) {
        NormalizedRating::Supported
    } else {
        NormalizedRating::Unverified
    }
}

/// `true` if at least two distinct values in `{false, misleading,
/// supported}` appear across `claim.sources`' normalized textual
/// ratings (spec §4.7; `unverified` never counts toward conflict).
fn evidence_conflict(claim: &Claim) -> bool {
    let mut seen: HashSet<NormalizedRating> = HashSet::new();
    for source in &claim.sources {
        let Some(rating) = source.textual_rating.as_deref() else {
            continue;
        };
        match normalize_rating(rating) {
            NormalizedRating::Unverified => {}
            other => {
                seen.insert(other);
            }
        }
    }
    seen.len() >= 2
}

fn evidence_status(claim: &Claim, independent_source_count: usize, conflict: bool) -> EvidenceStatus {
    if matches!(claim.status, ClaimStatus::PendingResearch | ClaimStatus::Researching) {
        return EvidenceStatus::Researching;
    }
    if claim.google_evidence.state == GoogleState::Error {
        return EvidenceStatus::ProviderDegraded;
    }
    if claim.claim_category == ClaimCategory::Economic {
        if claim.fred_evidence.state == FredState::Error {
            return EvidenceStatus::ProviderDegraded;
        }
        if claim.fred_evidence.state != FredState::Matched && independent_source_count < 1 {
            return EvidenceStatus::Insufficient;
        }
    } else if independent_source_count < 1 {
        return EvidenceStatus::Insufficient;
    }
    if conflict {
        return EvidenceStatus::Conflicted;
    }
    EvidenceStatus::Sufficient
}

fn approval_block_reason(
    claim: &Claim,
    evidence_status: EvidenceStatus,
    threshold: f64,
) -> Option<BlockReason> {
    if claim.output_approval_state == OutputApprovalState::Rejected {
        return Some(BlockReason::RejectedLocked);
    }
    if claim.status != ClaimStatus::Researched {
        return Some(if matches!(claim.status, ClaimStatus::Researching | ClaimStatus::PendingResearch) {
            BlockReason::StillResearching
        } else {
            BlockReason::NotResearched
        });
    }
    let from_evidence = match evidence_status {
        EvidenceStatus::Researching => Some(BlockReason::StillResearching),
        EvidenceStatus::ProviderDegraded => Some(BlockReason::ProviderDegraded),
        EvidenceStatus::Insufficient => Some(BlockReason::InsufficientSources),
        EvidenceStatus::Conflicted => Some(BlockReason::ConflictedSources),
        EvidenceStatus::Sufficient => None,
    };
    if let Some(reason) = from_evidence {
        return Some(reason);
    }
    if claim.confidence < threshold {
        return Some(BlockReason::BelowThreshold);
    }
    None
}

fn export_block_reason(
    claim: &Claim,
    approval_block_reason: Option<BlockReason>,
) -> Option<BlockReason> {
    approval_block_reason.or_else(|| {
        if claim.output_approval_state != OutputApprovalState::Approved {
            Some(BlockReason::NotApproved)
        } else {
            None
        }
    })
}

/// Evaluate the full set of derived policy fields for `claim` (spec
/// §4.7). Pure and idempotent: the same snapshot always yields the
/// same output.
pub fn evaluate(claim: &Claim) -> PolicyFields {
    let threshold = policy_threshold(claim.claim_type_tag);
    let source_count = independent_source_count(claim);
    let conflict = evidence_conflict(claim);
    let status = evidence_status(claim, source_count, conflict);
    let approval_reason = approval_block_reason(claim, status, threshold);
    let export_reason = export_block_reason(claim, approval_reason);

    PolicyFields {
        policy_threshold: threshold,
        independent_source_count: source_count,
        evidence_conflict: conflict,
        evidence_status: status,
        approval_eligibility: approval_reason.is_none(),
        approval_block_reason: approval_reason,
        export_eligibility: export_reason.is_none(),
        export_block_reason: export_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use veritas_protocol::ReviewSource;
    use veritas_protocol::Verdict;

    fn base_claim() -> Claim {
        Claim::detected(
            Claim::make_id("run-1", 1),
            "run-1".to_string(),
            "Inflation fell to 3.1 percent.".to_string(),
            Vec::new(),
            15.0,
            "00:00:15".to_string(),
            ClaimCategory::Economic,
            ClaimTypeTag::NumericFactual,
            0.7,
        )
    }

    fn source(publisher: &str, url: &str, rating: &str) -> ReviewSource {
        ReviewSource {
            publisher: Some(publisher.to_string()),
            title: None,
            url: Some(url.to_string()),
            textual_rating: Some(rating.to_string()),
            review_date: None,
        }
    }

    #[test]
    fn idempotent_for_same_snapshot() {
        let claim = base_claim();
        assert_eq!(evaluate(&claim), evaluate(&claim));
    }

    #[test]
    fn still_researching_blocks_approval() {
        let mut claim = base_claim();
        claim.status = ClaimStatus::Researching;
        let policy = evaluate(&claim);
        assert_eq!(policy.approval_block_reason, Some(BlockReason::StillResearching));
        assert!(!policy.approval_eligibility);
    }

    #[test]
    fn economic_matched_fred_alone_is_sufficient() {
        let mut claim = base_claim();
        claim.status = ClaimStatus::Researched;
        claim.confidence = 0.9;
        claim.fred_evidence.state = FredState::Matched;
        let policy = evaluate(&claim);
        assert_eq!(policy.evidence_status, EvidenceStatus::Sufficient);
        assert!(policy.approval_eligibility);
    }

    #[test]
    fn below_threshold_blocks_approval_when_otherwise_sufficient() {
        let mut claim = base_claim();
        claim.status = ClaimStatus::Researched;
        claim.confidence = 0.55;
        claim.fred_evidence.state = FredState::Matched;
        let policy = evaluate(&claim);
        assert_eq!(policy.approval_block_reason, Some(BlockReason::BelowThreshold));
    }

    #[test]
    fn conflicting_ratings_block_as_conflicted_sources() {
        let mut claim = base_claim();
        claim.status = ClaimStatus::Researched;
        claim.confidence = 0.9;
        claim.verdict = Verdict::Unverified;
        claim.sources = vec![
            source("Site A", "https://a.example", "False"),
            source("Site B", "https://b.example", "Mostly true"),
        ];
        let policy = evaluate(&claim);
        assert!(policy.evidence_conflict);
        assert_eq!(policy.evidence_status, EvidenceStatus::Conflicted);
        assert_eq!(policy.approval_block_reason, Some(BlockReason::ConflictedSources));
    }

    #[test]
    fn rejected_claim_is_locked_regardless_of_evidence() {
        let mut claim = base_claim();
        claim.status = ClaimStatus::Researched;
        claim.confidence = 0.95;
        claim.fred_evidence.state = FredState::Matched;
        claim.output_approval_state = OutputApprovalState::Rejected;
        let policy = evaluate(&claim);
        assert_eq!(policy.approval_block_reason, Some(BlockReason::RejectedLocked));
    }

    #[test]
    fn export_requires_approved_state_even_when_approval_eligible() {
        let mut claim = base_claim();
        claim.status = ClaimStatus::Researched;
        claim.confidence = 0.95;
        claim.fred_evidence.state = FredState::Matched;
        let policy = evaluate(&claim);
        assert!(policy.approval_eligibility);
        assert_eq!(policy.export_block_reason, Some(BlockReason::NotApproved));
        assert!(!policy.export_eligibility);
    }

    #[test]
    fn export_inherits_approval_block_reason_when_present() {
        let mut claim = base_claim();
        claim.status = ClaimStatus::Researching;
        let policy = evaluate(&claim);
        assert_eq!(policy.export_block_reason, Some(BlockReason::StillResearching));
    }

    #[test]
    fn independent_source_count_dedupes_case_and_whitespace() {
        let mut claim = base_claim();
        claim.sources = vec![
            source("  Site A ", "https://a.example", "True"),
            source("site a", "HTTPS://A.EXAMPLE", "True"),
            source("Site B", "https://b.example", "True"),
        ];
        let policy = evaluate(&claim);
        assert_eq!(policy.independent_source_count, 2);
    }

    #[test]
    fn non_economic_insufficient_without_sources() {
        let mut claim = base_claim();
        claim.claim_category = ClaimCategory::Political;
        claim.status = ClaimStatus::Researched;
        let policy = evaluate(&claim);
        assert_eq!(policy.evidence_status, EvidenceStatus::Insufficient);
        assert_eq!(policy.approval_block_reason, Some(BlockReason::InsufficientSources));
    }
}
