//! Store-assigned document ids.
//!
//! Ids are random 20-character alphanumeric strings. They carry no meaning
//! and are never parsed.

use rand::distr::{Alphanumeric, SampleString};

/// Length of a generated document id.
pub const DOCUMENT_ID_LEN: usize = 20;

/// Generates a new random document id.
pub fn generate_document_id() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), DOCUMENT_ID_LEN)
}
