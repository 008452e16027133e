//! One polling pass: listing → detail → normalize → compose → deliver.
//!
//! Lots are processed strictly one after another. The seen set lives in
//! memory for the pass and is written once at the end (and optionally after
//! every lot). Overlapping invocations against the same state file must be
//! prevented by whoever schedules this binary.
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{error, info, instrument, warn};

use crate::api::LotSource;
use crate::compose::Composer;
use crate::config::{Config, FirstRun};
use crate::delivery::DeliveryEngine;
use crate::error::StoreError;
use crate::model::{Lot, NotificationResult};
use crate::normalize::{probe, Field, Normalizer};
use crate::seen::{SeenBackend, SeenSet};

/// Case-insensitive substring match on the organizing unit's name.
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

impl KeywordFilter {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, organizer: &str) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let organizer = organizer.to_lowercase();
        self.keywords.iter().any(|k| organizer.contains(k.as_str()))
    }

    fn accepts(&self, lot: &Lot) -> bool {
        let organizer = probe(Field::OrganizerName, &[&lot.raw]).unwrap_or_default();
        self.matches(&organizer)
    }
}

/// How the pipeline treats the seen set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeenPolicy {
    /// Record lots whose delivery ended in `Failed`.
    pub mark_failed_seen: bool,
    /// Persist after every recorded lot as well as at the end.
    pub save_every_lot: bool,
    pub first_run: FirstRun,
    /// Write the store at all; false for dry runs.
    pub persist: bool,
}

impl Default for SeenPolicy {
    fn default() -> Self {
        Self {
            mark_failed_seen: true,
            save_every_lot: false,
            first_run: FirstRun::Notify,
            persist: true,
        }
    }
}

impl SeenPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            mark_failed_seen: cfg.state.mark_failed_seen,
            save_every_lot: cfg.state.save_every_lot,
            first_run: cfg.state.first_run,
            persist: true,
        }
    }

    fn should_record(&self, outcome: NotificationResult) -> bool {
        outcome.delivered() || self.mark_failed_seen
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub listing_failed: bool,
    pub listed: usize,
    pub already_seen: usize,
    pub filtered_out: usize,
    /// Lots recorded without notifying on a first run.
    pub baselined: usize,
    pub outcomes: Vec<(String, NotificationResult)>,
}

impl RunReport {
    pub fn count(&self, result: NotificationResult) -> usize {
        self.outcomes.iter().filter(|(_, r)| *r == result).count()
    }

    pub fn log_summary(&self) {
        if self.listing_failed {
            warn!("listing unavailable, cycle skipped");
            return;
        }
        info!(
            listed = self.listed,
            already_seen = self.already_seen,
            filtered_out = self.filtered_out,
            baselined = self.baselined,
            with_photo = self.count(NotificationResult::SentWithPhoto),
            text_only = self.count(NotificationResult::SentTextOnly),
            failed = self.count(NotificationResult::Failed),
            "run finished"
        );
    }
}

pub struct Pipeline<'a> {
    source: &'a dyn LotSource,
    normalizer: &'a Normalizer,
    composer: &'a Composer,
    delivery: DeliveryEngine<'a>,
    filter: KeywordFilter,
    policy: SeenPolicy,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        source: &'a dyn LotSource,
        normalizer: &'a Normalizer,
        composer: &'a Composer,
        delivery: DeliveryEngine<'a>,
    ) -> Self {
        Self {
            source,
            normalizer,
            composer,
            delivery,
            filter: KeywordFilter::default(),
            policy: SeenPolicy::default(),
        }
    }

    pub fn with_filter(mut self, filter: KeywordFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_policy(mut self, policy: SeenPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Full pass against a store: load, fetch, process, persist once.
    /// Only a store failure is an error; a failed listing is reported.
    #[instrument(skip_all)]
    pub async fn run(&self, store: &dyn SeenBackend) -> Result<RunReport, StoreError> {
        let first_run = !store.exists().await?;
        let mut seen = store.load().await?;

        let lots = match self.source.fetch_listing().await {
            Ok(lots) => lots,
            Err(err) => {
                error!(%err, "failed to fetch listing");
                return Ok(RunReport {
                    listing_failed: true,
                    ..Default::default()
                });
            }
        };

        if first_run && self.policy.first_run == FirstRun::Baseline {
            let report = self.baseline(&lots, &mut seen);
            self.persist(store, &seen).await?;
            return Ok(report);
        }

        let report = self.process(&lots, &mut seen, Some(store)).await;
        self.persist(store, &seen).await?;
        Ok(report)
    }

    /// Record every matching lot as seen without notifying. Only used when
    /// `first_run: baseline` is configured.
    pub fn baseline(&self, lots: &[Lot], seen: &mut SeenSet) -> RunReport {
        let mut report = RunReport {
            listed: lots.len(),
            ..Default::default()
        };
        for lot in lots {
            if !self.filter.accepts(lot) {
                report.filtered_out += 1;
            } else if seen.insert(&lot.id) {
                report.baselined += 1;
            }
        }
        info!(count = report.baselined, "first run: recorded current lots without notifying");
        report
    }

    /// Notify every unseen, matching lot. A panic while handling one lot is
    /// contained and counted as `Failed`.
    pub async fn process(
        &self,
        lots: &[Lot],
        seen: &mut SeenSet,
        store: Option<&dyn SeenBackend>,
    ) -> RunReport {
        let mut report = RunReport {
            listed: lots.len(),
            ..Default::default()
        };

        for lot in lots {
            if seen.contains(&lot.id) {
                report.already_seen += 1;
                continue;
            }
            if !self.filter.accepts(lot) {
                report.filtered_out += 1;
                continue;
            }

            info!(lot_id = %lot.id, title = lot.title(), "new lot");
            let outcome = match AssertUnwindSafe(self.process_lot(lot)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(lot_id = %lot.id, "lot processing panicked");
                    NotificationResult::Failed
                }
            };
            info!(lot_id = %lot.id, outcome = outcome.as_str(), "lot processed");

            if self.policy.should_record(outcome) {
                seen.insert(&lot.id);
                if self.policy.save_every_lot {
                    if let Some(store) = store {
                        if let Err(err) = self.persist(store, seen).await {
                            warn!(lot_id = %lot.id, %err, "intermediate seen save failed");
                        }
                    }
                }
            } else {
                warn!(lot_id = %lot.id, "delivery failed, lot left unseen for retry");
            }
            report.outcomes.push((lot.id.clone(), outcome));
        }

        report
    }

    async fn process_lot(&self, lot: &Lot) -> NotificationResult {
        let detail = self.source.fetch_detail(&lot.id).await;
        let fields = self.normalizer.normalize(lot, detail.as_ref());
        let message = self.composer.compose(&fields);
        self.delivery.deliver(&lot.id, &message).await
    }

    async fn persist(&self, store: &dyn SeenBackend, seen: &SeenSet) -> Result<(), StoreError> {
        if !self.policy.persist {
            return Ok(());
        }
        store.save(seen).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_filter_is_case_insensitive() {
        let filter = KeywordFilter::new(&["KPKNL Surakarta", " "]);
        assert!(filter.matches("Kantor kpknl surakarta"));
        assert!(!filter.matches("KPKNL Semarang"));
        assert!(KeywordFilter::new::<&str>(&[]).matches("anything"));
    }

    #[test]
    fn failed_lots_follow_policy() {
        let mut policy = SeenPolicy::default();
        assert_eq!(policy.first_run, FirstRun::Notify);
        assert!(policy.should_record(NotificationResult::Failed));
        policy.mark_failed_seen = false;
        assert!(!policy.should_record(NotificationResult::Failed));
        assert!(policy.should_record(NotificationResult::SentTextOnly));
    }
}
