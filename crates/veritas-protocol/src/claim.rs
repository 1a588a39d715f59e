use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// A candidate sentence promoted to a research work item (spec §3 "Claim"),
/// the central entity of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    // --- identity ---
    pub id: String,
    pub run_id: String,
    pub version: u64,

    // --- content ---
    pub text: String,
    pub detection_reasons: Vec<DetectionReason>,
    pub chunk_start_sec: f64,
    pub chunk_start_clock: String,

    // --- classification ---
    pub claim_category: ClaimCategory,
    pub claim_type_tag: ClaimTypeTag,
    pub claim_type_confidence: f64,

    // --- research status ---
    pub status: ClaimStatus,

    // --- provider state ---
    pub google_evidence: GoogleEvidence,
    pub fred_evidence: FredEvidence,
    pub congress_evidence: CongressEvidence,

    // --- verdict ---
    pub verdict: Verdict,
    pub confidence: f64,
    pub summary: Option<String>,
    pub sources: Vec<ReviewSource>,

    // --- approval ---
    pub output_approval_state: OutputApprovalState,
    pub approved_version: Option<u64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,

    // --- downstream ---
    pub output_package_status: OutputPackageStatus,
    pub output_package_id: Option<String>,
    pub output_package_error: Option<String>,
    pub render_status: RenderStatus,
    pub render_job_id: Option<String>,
    pub render_error: Option<String>,
    pub artifact_url: Option<String>,

    // --- manual overrides ---
    pub tag_override_reason: Option<String>,

    // --- derived policy fields, recomputed on every mutation (spec §4.7) ---
    pub policy: PolicyFields,
}

impl Claim {
    /// Build claim id `{run_id}-{index:06}` as spec §3 requires
    /// ("claim id = run id + zero-padded monotonic index").
    pub fn make_id(run_id: &str, index: u64) -> String {
        format!("{run_id}-{index:06}")
    }

    /// A freshly detected claim at version 1, defaults per the
    /// `claim.detected` merge rule in spec §4.8.
    #[allow(clippy::too_many_arguments)]
    pub fn detected(
        id: String,
        run_id: String,
        text: String,
        detection_reasons: Vec<DetectionReason>,
        chunk_start_sec: f64,
        chunk_start_clock: String,
        claim_category: ClaimCategory,
        claim_type_tag: ClaimTypeTag,
        claim_type_confidence: f64,
    ) -> Self {
        let fred_evidence_state = if claim_category == ClaimCategory::Economic {
            FredState::Ambiguous
        } else {
            FredState::NotApplicable
        };
        let congress_evidence_state = match claim_category {
            ClaimCategory::Political => CongressState::Ambiguous,
            _ => CongressState::NotApplicable,
        };
        Self {
            id,
            run_id,
            version: 1,
            text,
            detection_reasons,
            chunk_start_sec,
            chunk_start_clock,
            claim_category,
            claim_type_tag,
            claim_type_confidence,
            status: ClaimStatus::PendingResearch,
            google_evidence: GoogleEvidence::default(),
            fred_evidence: FredEvidence {
                state: fred_evidence_state,
                ..Default::default()
            },
            congress_evidence: CongressEvidence {
                state: congress_evidence_state,
                ..Default::default()
            },
            verdict: Verdict::Unverified,
            confidence: 0.0,
            summary: None,
            sources: Vec::new(),
            output_approval_state: OutputApprovalState::Pending,
            approved_version: None,
            approved_at: None,
            rejected_at: None,
            output_package_status: OutputPackageStatus::None,
            output_package_id: None,
            output_package_error: None,
            render_status: RenderStatus::None,
            render_job_id: None,
            render_error: None,
            artifact_url: None,
            tag_override_reason: None,
            policy: PolicyFields::default(),
        }
    }

    /// Reset everything downstream of approval; used both when a
    /// content-changing `claim.updated` arrives while approved, and as
    /// the terminal effect of `claim.output_rejected`'s sibling state.
    pub fn clear_downstream(&mut self) {
        self.output_package_status = OutputPackageStatus::None;
        self.output_package_id = None;
        self.output_package_error = None;
        self.render_status = RenderStatus::None;
        self.render_job_id = None;
        self.render_error = None;
        self.artifact_url = None;
        self.approved_at = None;
        self.approved_version = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionReason {
    ContainsNumber,
    ContainsComparative,
    ContainsClaimKeyword,
    SufficientLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimCategory {
    Economic,
    Political,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimTypeTag {
    NumericFactual,
    SimplePolicy,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    PendingResearch,
    Researching,
    Researched,
    NeedsManualResearch,
    NoMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    True,
    False,
    Misleading,
    Unverified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputApprovalState {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputPackageStatus {
    None,
    Queued,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStatus {
    None,
    Queued,
    Rendering,
    Ready,
    Failed,
}

/// A single evidence source, as returned by the fact-check client and
/// carried in `Claim::sources` for policy evaluation (spec §4.7
/// `independentSourceCount`/`evidenceConflict`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSource {
    pub publisher: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub textual_rating: Option<String>,
    pub review_date: Option<DateTime<Utc>>,
}

/// A lighter-weight reference used by the economic/legislative providers,
/// which don't carry a publisher/textual-rating shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub label: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoogleState {
    None,
    Matched,
    Error,
}

impl Default for GoogleState {
    fn default() -> Self {
        GoogleState::None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoogleEvidence {
    pub state: GoogleState,
    pub summary: Option<String>,
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FredState {
    NotApplicable,
    Ambiguous,
    Matched,
    Error,
}

impl Default for FredState {
    fn default() -> Self {
        FredState::NotApplicable
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FredEvidence {
    pub state: FredState,
    pub summary: Option<String>,
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CongressState {
    NotApplicable,
    Ambiguous,
    Matched,
    Error,
}

impl Default for CongressState {
    fn default() -> Self {
        CongressState::NotApplicable
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CongressEvidence {
    pub state: CongressState,
    pub summary: Option<String>,
    pub sources: Vec<SourceRef>,
}

/// Derived fields computed fresh on every mutation by the policy engine
/// (spec §4.7); never persisted independently of the claim they describe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyFields {
    pub policy_threshold: f64,
    pub independent_source_count: usize,
    pub evidence_conflict: bool,
    pub evidence_status: EvidenceStatus,
    pub approval_eligibility: bool,
    pub approval_block_reason: Option<BlockReason>,
    pub export_eligibility: bool,
    pub export_block_reason: Option<BlockReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStatus {
    Researching,
    ProviderDegraded,
    Insufficient,
    Conflicted,
    Sufficient,
}

impl Default for EvidenceStatus {
    fn default() -> Self {
        EvidenceStatus::Researching
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    RejectedLocked,
    StillResearching,
    NotResearched,
    ProviderDegraded,
    InsufficientSources,
    ConflictedSources,
    BelowThreshold,
    NotApproved,
}

/// A request to mutate a claim, as submitted to the claim store's single
/// serialized command channel (spec §4.8, Design Notes §9). The store is
/// the only component that applies these; every other component just
/// enqueues one and moves on.
#[derive(Debug, Clone)]
pub enum ClaimMutation {
    Detected {
        claim: Claim,
    },
    Researching {
        run_id: String,
        claim_id: String,
    },
    Updated {
        run_id: String,
        claim_id: String,
        fields: Box<ResearchUpdate>,
    },
    OutputApproved {
        run_id: String,
        claim_id: String,
    },
    OutputRejected {
        run_id: String,
        claim_id: String,
    },
    OutputPackageQueued {
        run_id: String,
        claim_id: String,
        claim_version: u64,
        package_id: String,
    },
    OutputPackageReady {
        run_id: String,
        claim_id: String,
        claim_version: u64,
        package_id: String,
    },
    OutputPackageFailed {
        run_id: String,
        claim_id: String,
        claim_version: u64,
        package_id: String,
        error: String,
    },
    RenderQueued {
        run_id: String,
        claim_id: String,
        claim_version: u64,
        render_job_id: String,
    },
    RenderReady {
        run_id: String,
        claim_id: String,
        claim_version: u64,
        render_job_id: String,
        artifact_url: String,
    },
    RenderFailed {
        run_id: String,
        claim_id: String,
        claim_version: u64,
        render_job_id: String,
        error: String,
    },
}

/// The set of fields a research cycle may overwrite via `claim.updated`
/// (spec §4.6 step 7). `None` means "leave unchanged".
#[derive(Debug, Clone, Default)]
pub struct ResearchUpdate {
    pub status: Option<ClaimStatus>,
    pub google_evidence: Option<GoogleEvidence>,
    pub fred_evidence: Option<FredEvidence>,
    pub congress_evidence: Option<CongressEvidence>,
    pub verdict: Option<Verdict>,
    pub confidence: Option<f64>,
    pub summary: Option<String>,
    pub sources: Option<Vec<ReviewSource>>,
    pub claim_type_tag: Option<ClaimTypeTag>,
    pub tag_override_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Claim {
        Claim::detected(
            Claim::make_id("run-1", 0),
            "run-1".to_string(),
            "Inflation fell to 3.1 percent.".to_string(),
            vec![DetectionReason::ContainsNumber],
            15.0,
            "00:00:15".to_string(),
            ClaimCategory::Economic,
            ClaimTypeTag::NumericFactual,
            0.8,
        )
    }

    #[test]
    fn detected_claim_starts_at_version_one() {
        let claim = sample();
        assert_eq!(claim.version, 1);
        assert_eq!(claim.id, "run-1-000000");
        assert_eq!(claim.output_approval_state, OutputApprovalState::Pending);
        assert_eq!(claim.status, ClaimStatus::PendingResearch);
    }

    #[test]
    fn economic_category_defaults_fred_to_ambiguous() {
        let claim = sample();
        assert_eq!(claim.fred_evidence.state, FredState::Ambiguous);
        assert_eq!(claim.congress_evidence.state, CongressState::NotApplicable);
    }

    #[test]
    fn clear_downstream_resets_approval_artifacts() {
        let mut claim = sample();
        claim.output_approval_state = OutputApprovalState::Approved;
        claim.approved_version = Some(3);
        claim.approved_at = Some(Utc::now());
        claim.output_package_status = OutputPackageStatus::Ready;
        claim.render_status = RenderStatus::Ready;
        claim.artifact_url = Some("https://example.com/a.png".to_string());

        claim.clear_downstream();

        assert_eq!(claim.output_package_status, OutputPackageStatus::None);
        assert_eq!(claim.render_status, RenderStatus::None);
        assert!(claim.artifact_url.is_none());
        assert!(claim.approved_version.is_none());
        assert!(claim.approved_at.is_none());
    }

    #[test]
    fn make_id_zero_pads_index() {
        assert_eq!(Claim::make_id("abc", 42), "abc-000042");
    }
}
