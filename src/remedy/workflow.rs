//! Remedy workflow.
//!
//! Per (agreement, term) state machine entered on breach:
//! violated, remedy published, violation opened, recovery polled, then back
//! to fulfilled with the violation removed. A term has at most one remedy
//! task at a time.

use crate::agreement::{AgreementStore, MetricBinding, TermState};
use crate::aggregator::Aggregator;
use crate::core::{now, AgreementId, DeviceId, Error, Result, TermKey};
use crate::evaluator::{evaluate_term, TermOutcome};
use crate::remedy::event::RemedyEvent;
use crate::remedy::sink::RemedySink;
use crate::violation::{Violation, ViolationId, ViolationStore};
use dashmap::DashSet;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A term found violated on a device.
#[derive(Clone, Debug)]
pub struct Breach {
    /// Agreement and term
    pub key: TermKey,
    /// Device the breach was observed on
    pub device: DeviceId,
    /// Bindings of the term, used to poll for recovery
    pub bindings: Vec<MetricBinding>,
    /// Breaching readings
    pub violated_metrics: BTreeMap<String, Value>,
    /// Remedy descriptor
    pub remedy: Value,
}

/// Exclusive claim on a term, released on drop.
struct Ownership {
    owners: Arc<DashSet<TermKey>>,
    key: TermKey,
}

impl Ownership {
    fn acquire(owners: &Arc<DashSet<TermKey>>, key: &TermKey) -> Option<Self> {
        if owners.insert(key.clone()) {
            Some(Self {
                owners: Arc::clone(owners),
                key: key.clone(),
            })
        } else {
            None
        }
    }
}

impl Drop for Ownership {
    fn drop(&mut self) {
        self.owners.remove(&self.key);
    }
}

/// Drives breached terms through remedy and recovery.
#[derive(Clone)]
pub struct RemedyWorkflow {
    agreements: Arc<dyn AgreementStore>,
    violations: Arc<dyn ViolationStore>,
    sink: Arc<dyn RemedySink>,
    aggregator: Arc<Aggregator>,
    owners: Arc<DashSet<TermKey>>,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl RemedyWorkflow {
    /// Create a new workflow.
    ///
    /// Recovery waits stop early once `shutdown` turns true.
    pub fn new(
        agreements: Arc<dyn AgreementStore>,
        violations: Arc<dyn ViolationStore>,
        sink: Arc<dyn RemedySink>,
        aggregator: Arc<Aggregator>,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            agreements,
            violations,
            sink,
            aggregator,
            owners: Arc::new(DashSet::new()),
            poll_interval,
            shutdown,
        }
    }

    /// Take ownership of the breached term and spawn its remedy task.
    ///
    /// Fails with [`Error::ConcurrencyConflict`] if the term is already
    /// under remedy.
    pub fn enforce(&self, breach: Breach) -> Result<JoinHandle<()>> {
        let ownership = Ownership::acquire(&self.owners, &breach.key)
            .ok_or_else(|| Error::ConcurrencyConflict(breach.key.to_string()))?;

        let workflow = self.clone();
        Ok(tokio::spawn(async move {
            workflow.remediate(breach, ownership).await;
        }))
    }

    /// Whether any term of an agreement is under remedy.
    pub fn is_under_remedy(&self, agreement_id: &AgreementId) -> bool {
        self.owners.iter().any(|k| k.agreement_id == *agreement_id)
    }

    /// Whether a term is under remedy.
    pub fn is_term_under_remedy(&self, key: &TermKey) -> bool {
        self.owners.contains(key)
    }

    /// Number of terms under remedy.
    pub fn active_remedies(&self) -> usize {
        self.owners.len()
    }

    async fn remediate(self, breach: Breach, _ownership: Ownership) {
        let key = &breach.key;
        warn!(
            "Term {} violated on device {}: {:?}",
            key, breach.device, breach.violated_metrics
        );

        self.set_term_state(key, TermState::Violated).await;

        let event = RemedyEvent::new(
            key,
            &breach.device,
            breach.violated_metrics.clone(),
            breach.remedy.clone(),
        );
        if let Err(e) = self.sink.publish(&event).await {
            warn!("Publishing remedy of {} to {} failed: {}", key, self.sink.name(), e);
        }

        let violation_id = self.open_violation(&breach).await;

        if !self.wait_for_recovery(&breach).await {
            info!("Remedy of {} interrupted by shutdown", key);
            return;
        }

        self.set_term_state(key, TermState::Fulfilled).await;
        if let Some(id) = violation_id {
            self.close_violation(key, &id).await;
        }
        info!("Term {} recovered on device {}", key, breach.device);
    }

    /// Record the breach, reusing a violation a previous run left open.
    async fn open_violation(&self, breach: &Breach) -> Option<ViolationId> {
        let existing = match self.violations.open_for(&breach.key).await {
            Ok(open) => open.into_iter().next().map(|v| v.id),
            Err(e) => {
                warn!("Looking up open violations of {} failed: {}", breach.key, e);
                None
            }
        };

        let id = match existing {
            Some(id) => {
                info!("Violation {} of {} is still open, reusing it", id, breach.key);
                id
            }
            None => {
                let violation = Violation::open(
                    &breach.key,
                    &breach.device,
                    breach.violated_metrics.clone(),
                    breach.remedy.clone(),
                );
                match self.violations.create(violation).await {
                    Ok(id) => id,
                    Err(e) => {
                        error!("Recording violation of {} failed: {}", breach.key, e);
                        return None;
                    }
                }
            }
        };

        if let Err(e) = self
            .agreements
            .link_violation(&breach.key.agreement_id, id.as_str())
            .await
        {
            warn!("Linking violation {} to {} failed: {}", id, breach.key.agreement_id, e);
        }
        debug!("Violation {} opened for {}", id, breach.key);
        Some(id)
    }

    async fn close_violation(&self, key: &TermKey, id: &ViolationId) {
        if let Err(e) = self.violations.close(id, now()).await {
            warn!("Closing violation {} failed: {}", id, e);
        }
        if let Err(e) = self.violations.delete(id).await {
            warn!("Deleting violation {} failed: {}", id, e);
        }
        if let Err(e) = self
            .agreements
            .unlink_violation(&key.agreement_id, id.as_str())
            .await
        {
            warn!("Unlinking violation {} from {} failed: {}", id, key.agreement_id, e);
        }
    }

    /// Poll the term until it is fulfilled. Returns false on shutdown.
    async fn wait_for_recovery(&self, breach: &Breach) -> bool {
        let key = &breach.key;
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                return false;
            }

            let readings = self
                .aggregator
                .pull_term(&key.term, &key.agreement_id, &breach.bindings, &breach.device)
                .await;
            match evaluate_term(self.aggregator.catalog(), &breach.bindings, &readings) {
                Ok(evaluation) if evaluation.outcome == TermOutcome::Fulfilled => return true,
                Ok(evaluation) => debug!("{} still {:?}", key, evaluation.outcome),
                Err(e) => warn!("Evaluating {} failed: {}", key, e),
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn set_term_state(&self, key: &TermKey, state: TermState) {
        if let Err(e) = self
            .agreements
            .set_term_state(&key.agreement_id, &key.term, state)
            .await
        {
            warn!("Setting {} to {} failed: {}", key, state, e);
        }
    }
}
