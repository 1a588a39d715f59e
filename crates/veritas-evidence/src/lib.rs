//! External evidence providers (spec §4.4): the fact-check search
//! client, the economic-indicator client, and the legislative-evidence
//! client. All three share the `{state, summary, sources[]}` result
//! shape already modeled as `GoogleEvidence`/`FredEvidence`/
//! `CongressEvidence` in `veritas-protocol`.

mod economic;
mod factcheck;
mod legislative;
mod token;

pub use economic::EconomicClient;
pub use economic::IndicatorSeries;
pub use economic::INDICATOR_CATALOGUE;
pub use factcheck::FactCheckClient;
pub use factcheck::FactCheckOutcome;
pub use factcheck::FactCheckStatus;
pub use legislative::BillEntry;
pub use legislative::LegislativeClient;
pub use legislative::BILL_CATALOGUE;
pub use token::jaccard_similarity;
pub use token::tokenize;
