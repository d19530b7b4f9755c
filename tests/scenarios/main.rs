//! Scenario tests for the self-repairing pipeline


mod concurrency;
mod correction_failure;
mod exhaustion;
mod ordering;
mod recovery;
mod revision_properties;
