//! BAS Assistant
//!
//! Turns invoices into a GST estimate for an Australian Business Activity
//! Statement:
//! - Validates ABNs with the modulus-89 checksum
//! - Canonicalizes loosely keyed extracted fields
//! - Classifies each invoice as a purchase or a sale
//! - Aggregates GST collected, GST paid and net liability in exact decimals
//! - Answers follow-up questions from the last report
//!
//! Language models only ever supply field extraction and prose. Every figure
//! is computed here.
//!
//! PIPELINE:
//! NORMALIZING → VALIDATING → AGGREGATING → EXPLAINING → DONE

pub mod api;
pub mod batch;
pub mod calculator;
pub mod classifier;
pub mod collaborators;
pub mod config;
pub mod conversational;
pub mod error;
pub mod gemini;
pub mod memory;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod report;
pub mod validation;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use batch::BatchAggregator;
pub use calculator::{BasCalculator, ClassifierPolicy};
pub use classifier::{ChatIntent, TurnClassification, TurnClassifier};
pub use conversational::ConversationController;
pub use pipeline::{InvoicePipeline, PipelineOutcome, PipelineStage};
pub use validation::validate_abn;
