//! Docsink writes the records of a sync into per-stream collections of a document store.
//!
//! Records go through two worker pools. The marshal stage turns every record into a document
//! using the configured normalization mode, the sink stage batches the documents per stream and
//! bulk inserts a batch once it is full, plus a final flush of whatever is left when the input
//! ends. See [destination::Destination] for the entry point.

mod error;
pub use crate::error::{Error, Result};

/// Destination and catalog configuration.
pub mod config;

pub mod message;

pub mod normalizer;

pub mod store;

pub mod queue;

/// Worker tracking shared by the two stages.
mod lifecycle;

mod marshaler;

mod sinker;

pub mod destination;

pub use crate::destination::{Destination, check_store};
