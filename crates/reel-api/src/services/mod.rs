//! Business logic services.

pub mod engagement;
pub mod ingest;

pub use engagement::EngagementService;
pub use ingest::{AcceptedUpload, IngestError, IngestGate, IngestResult, StagedUpload};
