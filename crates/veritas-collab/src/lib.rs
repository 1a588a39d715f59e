//! Collaborator clients (spec §6): the external services the spec
//! names but whose internals it explicitly does not redesign —
//! transcription, output package, render, and the activity sink. Each
//! degrades to a typed error/placeholder rather than ever panicking or
//! failing the pipeline (spec §9 "Graceful degradation").

pub mod activity;
pub mod package;
pub mod render;
pub mod transcription;

pub use activity::ActivitySink;
pub use package::PackageClient;
pub use package::PackageOutcome;
pub use render::RenderClient;
pub use render::RenderOutcome;
pub use render::idempotency_key;
pub use transcription::TranscriptionClient;
pub use transcription::TranscriptionOutcome;
