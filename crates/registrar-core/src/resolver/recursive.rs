//! Alias resolution
//!
//! An alias binding says "also look up this other AOR". Resolution follows
//! alias chains and merges every binding found into one record, so that a
//! call can fork to every device reachable through aliases. Each alias hop
//! costs one step of a budget; fan-out stops when the budget is spent, which
//! is what bounds alias cycles.
//!
//! Branches run concurrently and are drained from a `FuturesUnordered`:
//! the resolution completes exactly when the set of pending branches is
//! empty, whatever each branch answered.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use crate::backend::RegistrarBackend;
use crate::error::RegistrarError;
use crate::record::Record;
use crate::types::FetchOutcome;
use crate::uri::SipUri;

/// Answer of one fetch of the fan-out
struct Branch {
    uri: SipUri,
    steps: u32,
    outcome: FetchOutcome,
}

pub struct RecursiveResolver<'a> {
    backend: &'a dyn RegistrarBackend,
    use_global_domain: bool,
    max_steps: u32,
    now: DateTime<Utc>,
}

impl<'a> RecursiveResolver<'a> {
    pub fn new(
        backend: &'a dyn RegistrarBackend,
        use_global_domain: bool,
        max_steps: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            backend,
            use_global_domain,
            max_steps,
            now,
        }
    }

    /// Fetch `uri` and every AOR reachable from it through aliases.
    ///
    /// Returns the merged bindings if any branch produced one. Errors of
    /// individual branches only surface when nothing was found.
    pub async fn resolve(&self, uri: &SipUri) -> FetchOutcome {
        let mut merged = Record::for_uri(uri, self.use_global_domain);

        // Highest budget each AOR was fetched with; a lower or equal one
        // cannot discover anything new
        let mut visited: HashMap<String, u32> = HashMap::new();
        visited.insert(merged.key().to_string(), self.max_steps);

        let mut pending = FuturesUnordered::new();
        pending.push(self.fetch_branch(uri.clone(), self.max_steps));

        let mut branches = 0usize;
        let mut last_error: Option<RegistrarError> = None;
        let mut last_invalid: Option<String> = None;

        while let Some(branch) = pending.next().await {
            branches += 1;
            let record = match branch.outcome {
                FetchOutcome::Found(record) => record,
                FetchOutcome::NotFound => continue,
                FetchOutcome::Error(err) => {
                    warn!("Alias branch {} failed: {}", branch.uri, err);
                    last_error = Some(err);
                    continue;
                }
                FetchOutcome::Invalid(reason) => {
                    debug!("Alias branch {} invalid: {}", branch.uri, reason);
                    last_invalid = Some(reason);
                    continue;
                }
            };

            for contact in record.contacts() {
                if contact.used_as_route && !contact.alias {
                    merged.merge_contact(contact.routed_to(&branch.uri));
                } else {
                    merged.merge_contact(contact.clone());
                }
            }

            if branch.steps == 0 {
                continue;
            }

            for alias in record.contacts().iter().filter(|c| c.alias) {
                let target = match alias.uri() {
                    Ok(target) => target,
                    Err(e) => {
                        warn!("Ignoring alias {} of {}: {}", alias.sip_uri, record.key(), e);
                        continue;
                    }
                };

                let steps = branch.steps - 1;
                let key = Record::define_key(&target, self.use_global_domain);
                if visited.get(&key).is_some_and(|seen| *seen >= steps) {
                    debug!("Alias {} already resolved, skipping", key);
                    continue;
                }
                visited.insert(key, steps);
                pending.push(self.fetch_branch(target, steps));
            }
        }

        debug!(
            "Resolved {} through {} fetches: {} bindings",
            uri,
            branches,
            merged.len()
        );

        if !merged.is_empty() {
            FetchOutcome::Found(merged)
        } else if let Some(err) = last_error {
            FetchOutcome::Error(err)
        } else if let Some(reason) = last_invalid {
            FetchOutcome::Invalid(reason)
        } else {
            FetchOutcome::NotFound
        }
    }

    fn fetch_branch(&self, uri: SipUri, steps: u32) -> BoxFuture<'a, Branch> {
        let backend = self.backend;
        let key = Record::define_key(&uri, self.use_global_domain);
        let now = self.now;

        async move {
            let outcome = backend.do_fetch(&key, now).await;
            Branch { uri, steps, outcome }
        }
        .boxed()
    }
}
