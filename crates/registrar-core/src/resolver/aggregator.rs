//! Join of a fixed number of fetches into one record

use tracing::warn;

use crate::error::RegistrarError;
use crate::record::Record;
use crate::types::FetchOutcome;

/// Collects `expected` fetch outcomes and merges the records found.
///
/// The merged record is delivered unless every branch failed; a single
/// failing branch does not hide what the others found.
pub struct Aggregator {
    expected: usize,
    obtained: usize,
    errors: usize,
    last_error: Option<RegistrarError>,
    record: Record,
}

impl Aggregator {
    pub fn new(expected: usize, target: Record) -> Self {
        Self {
            expected,
            obtained: 0,
            errors: 0,
            last_error: None,
            record: target,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.obtained >= self.expected
    }

    /// Account one branch. Returns the final outcome once all expected
    /// branches have answered, `None` before.
    pub fn on_outcome(&mut self, outcome: FetchOutcome) -> Option<FetchOutcome> {
        if self.is_complete() {
            warn!("Aggregator for {} got an unexpected extra outcome", self.record.key());
            return None;
        }
        self.obtained += 1;

        match outcome {
            FetchOutcome::Found(found) => {
                for contact in found.contacts() {
                    self.record.merge_contact(contact.clone());
                }
            }
            FetchOutcome::Error(err) => {
                self.errors += 1;
                self.last_error = Some(err);
            }
            FetchOutcome::NotFound | FetchOutcome::Invalid(_) => {}
        }

        self.is_complete().then(|| self.finish())
    }

    fn finish(&mut self) -> FetchOutcome {
        let record = std::mem::replace(&mut self.record, Record::new("", false));
        if self.errors >= self.expected && record.is_empty() {
            let err = self
                .last_error
                .take()
                .unwrap_or_else(|| RegistrarError::Backend("all fetches failed".to_string()));
            return FetchOutcome::Error(err);
        }
        FetchOutcome::from_record(Some(record))
    }
}
