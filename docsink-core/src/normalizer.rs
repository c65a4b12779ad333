//! Normalization turns a [Record] into the [Document] stored at the destination. There are two
//! strategies and the one in use is fixed for a run:
//!
//! ```text
//! Raw:       {id, emittedAt, data: "<serialized record>"}
//! Projected: {<field 1>, <field 2>, ...}   (schema order, null when missing)
//! ```

use std::collections::HashMap;

use crate::Result;
use crate::config::NormalizationMode;
use crate::message::{Document, Record};

/// Wraps the whole record as an opaque payload.
mod raw;

/// Copies the declared fields of the stream.
mod projected;

pub use projected::ProjectedNormalizer;
pub use raw::{DATA_FIELD, EMITTED_AT_FIELD, ID_FIELD, RawNormalizer};

/// Set of items to be implemented by a normalization strategy.
pub(crate) trait Normalize {
    /// Builds the document for the given record. The record is consumed.
    fn marshal(&self, record: Record) -> Result<Document>;
}

#[derive(Debug, Clone)]
pub enum Normalizer {
    Raw(RawNormalizer),
    Projected(ProjectedNormalizer),
}

impl Normalizer {
    /// Picks the strategy for the run. The per-stream field lists are only consulted in projected
    /// mode.
    pub fn new(mode: NormalizationMode, fields_per_stream: &HashMap<String, Vec<String>>) -> Self {
        match mode {
            NormalizationMode::Raw => Normalizer::Raw(RawNormalizer),
            NormalizationMode::Projected => {
                Normalizer::Projected(ProjectedNormalizer::new(fields_per_stream.clone()))
            }
        }
    }

    pub fn mode(&self) -> NormalizationMode {
        match self {
            Normalizer::Raw(_) => NormalizationMode::Raw,
            Normalizer::Projected(_) => NormalizationMode::Projected,
        }
    }

    pub fn marshal(&self, record: Record) -> Result<Document> {
        match self {
            Normalizer::Raw(n) => n.marshal(record),
            Normalizer::Projected(n) => n.marshal(record),
        }
    }
}

impl Normalize for Normalizer {
    fn marshal(&self, record: Record) -> Result<Document> {
        Normalizer::marshal(self, record)
    }
}
