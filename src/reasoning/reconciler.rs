//! Reconciler.
//!
//! One tick brings the stored policies and live subscriptions in line with
//! the set of valid agreements:
//! 1. New valid agreements get a policy and their terms are subscribed.
//! 2. Known agreements have their device set diffed and patched.
//! 3. Policies of agreements that are no longer tracked are torn down,
//!    unless one of their terms is under remedy. An agreement is tracked
//!    while it is valid and every agreement it links to is valid too.

use crate::agreement::{Agreement, AgreementStore, TermState};
use crate::aggregator::Aggregator;
use crate::core::{AgreementId, DeviceId, Result, Timestamp};
use crate::policy::{Policy, PolicyStore};
use crate::reasoning::federation::resolve_devices;
use crate::remedy::RemedyWorkflow;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// What a tick changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Agreements that got a policy
    pub added: Vec<AgreementId>,
    /// Agreements whose device set changed
    pub updated: Vec<AgreementId>,
    /// Agreements whose policy was torn down
    pub removed: Vec<AgreementId>,
    /// Untracked agreements kept because a term is under remedy
    pub deferred: Vec<AgreementId>,
}

impl TickReport {
    /// Whether the tick changed nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.deferred.is_empty()
    }
}

/// Keeps policies and subscriptions consistent with valid agreements.
pub struct Reconciler {
    agreements: Arc<dyn AgreementStore>,
    policies: Arc<dyn PolicyStore>,
    aggregator: Arc<Aggregator>,
    remedy: RemedyWorkflow,
    tick_lock: Mutex<()>,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        agreements: Arc<dyn AgreementStore>,
        policies: Arc<dyn PolicyStore>,
        aggregator: Arc<Aggregator>,
        remedy: RemedyWorkflow,
    ) -> Self {
        Self {
            agreements,
            policies,
            aggregator,
            remedy,
            tick_lock: Mutex::new(()),
        }
    }

    /// Run one reconciliation pass.
    ///
    /// Failures on a single agreement are logged and do not stop the pass.
    /// Only a failure to list agreements or policies is returned.
    pub async fn tick(&self, now: Timestamp) -> Result<TickReport> {
        let _tick = self.tick_lock.lock().await;
        let mut report = TickReport::default();

        let valid = self.agreements.get_valid_agreements(now).await?;
        let valid_ids: HashSet<AgreementId> = valid.iter().map(|a| a.id.clone()).collect();
        debug!("{} valid agreements", valid.len());

        let mut tracked = HashSet::with_capacity(valid_ids.len());
        for agreement in &valid {
            match self.reconcile(agreement, &valid_ids, &mut report).await {
                Ok(false) => {}
                Ok(true) => {
                    tracked.insert(agreement.id.clone());
                }
                Err(e) => {
                    // Keep what is already enforced until the next tick
                    error!("Reconciling agreement {} failed: {}", agreement.id, e);
                    tracked.insert(agreement.id.clone());
                }
            }
        }

        for policy in self.policies.list().await? {
            if tracked.contains(&policy.agreement_id) {
                continue;
            }
            if self.remedy.is_under_remedy(&policy.agreement_id) {
                info!(
                    "Agreement {} is no longer tracked but under remedy, keeping its policy",
                    policy.agreement_id
                );
                report.deferred.push(policy.agreement_id.clone());
                continue;
            }
            match self.teardown(&policy).await {
                Ok(()) => report.removed.push(policy.agreement_id.clone()),
                Err(e) => error!("Tearing down policy of {} failed: {}", policy.agreement_id, e),
            }
        }

        Ok(report)
    }

    /// Bring one valid agreement up to date. Returns whether it stays tracked.
    async fn reconcile(
        &self,
        agreement: &Agreement,
        valid: &HashSet<AgreementId>,
        report: &mut TickReport,
    ) -> Result<bool> {
        let Some(resolved) = resolve_devices(self.agreements.as_ref(), agreement, valid).await? else {
            warn!(
                "Agreement {} links to an agreement that is not valid, not enforcing it",
                agreement.id
            );
            return Ok(false);
        };

        match self.policies.get(&agreement.id).await? {
            None => {
                if resolved.devices.is_empty() {
                    debug!("Agreement {} has no linked device", agreement.id);
                    return Ok(false);
                }

                let policy = Policy::from_agreement(
                    agreement,
                    self.aggregator.catalog(),
                    resolved.devices,
                    resolved.linked_agreements,
                )?;
                self.start(agreement, &policy).await?;
                self.policies.put(policy).await?;
                report.added.push(agreement.id.clone());
            }
            Some(mut policy) => {
                let removed: Vec<DeviceId> = policy
                    .devices
                    .iter()
                    .filter(|d| !resolved.devices.contains(d))
                    .cloned()
                    .collect();
                let added: Vec<DeviceId> = resolved
                    .devices
                    .iter()
                    .filter(|d| !policy.has_device(d))
                    .cloned()
                    .collect();
                if removed.is_empty()
                    && added.is_empty()
                    && policy.linked_agreements == resolved.linked_agreements
                {
                    return Ok(true);
                }

                for (name, term) in &policy.terms {
                    let bindings = term.bindings();
                    if !removed.is_empty() {
                        self.aggregator
                            .unsubscribe_term(name, &agreement.id, &bindings, &removed)
                            .await?;
                    }
                    if !added.is_empty() {
                        self.aggregator
                            .subscribe_term(name, &agreement.id, &bindings, &added)
                            .await?;
                    }
                }
                info!(
                    "Agreement {}: {} devices added, {} removed",
                    agreement.id,
                    added.len(),
                    removed.len()
                );

                policy.devices = resolved.devices;
                policy.linked_agreements = resolved.linked_agreements;
                self.policies.put(policy).await?;
                report.updated.push(agreement.id.clone());
            }
        }
        Ok(true)
    }

    async fn start(&self, agreement: &Agreement, policy: &Policy) -> Result<()> {
        info!(
            "Enforcing agreement {} on {} devices",
            agreement.id,
            policy.devices.len()
        );

        for term in agreement.slo_terms() {
            self.set_term_state(&agreement.id, &term.name, TermState::Fulfilled)
                .await;
        }
        for (name, term) in &policy.terms {
            self.aggregator
                .subscribe_term(name, &agreement.id, &term.bindings(), &policy.devices)
                .await?;
        }
        Ok(())
    }

    async fn teardown(&self, policy: &Policy) -> Result<()> {
        info!("Agreement {} is no longer valid, removing its policy", policy.agreement_id);

        for (name, term) in &policy.terms {
            self.set_term_state(&policy.agreement_id, name, TermState::Undefined)
                .await;
            self.aggregator
                .unsubscribe_term(name, &policy.agreement_id, &term.bindings(), &policy.devices)
                .await?;
        }
        self.policies.delete(&policy.agreement_id).await?;
        Ok(())
    }

    async fn set_term_state(&self, id: &AgreementId, term: &str, state: TermState) {
        if let Err(e) = self.agreements.set_term_state(id, term, state).await {
            warn!("Setting {}/{} to {} failed: {}", id, term, state, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::{AgreementState, InMemoryAgreementStore, MetricBinding, Term};
    use crate::collector::{CollectorRegistry, MonitoringSystem};
    use crate::core::{now, TermKey};
    use crate::evaluator::{LimiterKind, MetricCatalog};
    use crate::policy::InMemoryPolicyStore;
    use crate::remedy::{Breach, LogRemedySink};
    use crate::testing::RecordingCollector;
    use crate::violation::InMemoryViolationStore;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio::sync::watch;

    struct Fixture {
        reconciler: Reconciler,
        agreements: Arc<InMemoryAgreementStore>,
        policies: Arc<InMemoryPolicyStore>,
        aggregator: Arc<Aggregator>,
        remedy: RemedyWorkflow,
        collector: Arc<RecordingCollector>,
        _shutdown: watch::Sender<bool>,
    }

    fn fixture(agreements: Vec<Agreement>) -> Fixture {
        let collector = Arc::new(RecordingCollector::new("recording"));
        let mut registry = CollectorRegistry::new();
        registry.register(collector.clone()).unwrap();
        registry.add_system(
            MonitoringSystem::new("zabbix", "recording")
                .with_metric("uptime")
                .with_metric("latency"),
        );
        for device in ["vm-1", "vm-2", "vm-3", "vm-9"] {
            registry.bind_device(device, &["zabbix"]);
        }

        let agreements = Arc::new(InMemoryAgreementStore::with_agreements(agreements));
        let policies = Arc::new(InMemoryPolicyStore::new());
        let aggregator = Arc::new(Aggregator::new(
            Arc::new(registry),
            Arc::new(MetricCatalog::builtin()),
            policies.clone(),
        ));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let remedy = RemedyWorkflow::new(
            agreements.clone(),
            Arc::new(InMemoryViolationStore::new()),
            Arc::new(LogRemedySink::new()),
            aggregator.clone(),
            Duration::from_secs(15),
            shutdown_rx,
        );
        let reconciler = Reconciler::new(
            agreements.clone(),
            policies.clone(),
            aggregator.clone(),
            remedy.clone(),
        );

        Fixture {
            reconciler,
            agreements,
            policies,
            aggregator,
            remedy,
            collector,
            _shutdown: shutdown,
        }
    }

    fn agreement(id: &str) -> Agreement {
        let t = now();
        Agreement::new(id, "provider", "customer", t - ChronoDuration::hours(1), t + ChronoDuration::hours(1))
            .with_state(AgreementState::Accepted)
            .with_term(
                Term::slo("availability", json!("credit"))
                    .with_metric(MetricBinding::margin("uptime", json!(98), 2.0))
                    .with_metric(MetricBinding::new("latency", json!(100), LimiterKind::Max)),
            )
            .with_term(Term::service("description"))
    }

    async fn term_state(agreements: &InMemoryAgreementStore, id: &str) -> TermState {
        agreements
            .get_agreement(&AgreementId::new(id))
            .await
            .unwrap()
            .terms["availability"]
            .state
    }

    #[tokio::test]
    async fn test_new_agreement_is_enforced() {
        let f = fixture(vec![agreement("A").with_device("vm-1").with_device("vm-2")]);

        let report = f.reconciler.tick(now()).await.unwrap();
        assert_eq!(report.added, vec![AgreementId::new("A")]);

        let policy = f.policies.get(&AgreementId::new("A")).await.unwrap().unwrap();
        assert_eq!(policy.devices.len(), 2);
        assert!(policy.terms.contains_key("availability"));
        assert!(!policy.terms.contains_key("description"));

        assert_eq!(term_state(&f.agreements, "A").await, TermState::Fulfilled);
        assert_eq!(f.aggregator.subscription_count(), 4);
        assert_eq!(f.collector.subscribe_count(), 4);
    }

    #[tokio::test]
    async fn test_ticks_converge() {
        let f = fixture(vec![
            agreement("A").with_device("vm-1"),
            agreement("B").with_device("vm-1").with_device("vm-2"),
        ]);

        let first = f.reconciler.tick(now()).await.unwrap();
        assert_eq!(first.added.len(), 2);
        let calls = f.collector.calls();

        for _ in 0..3 {
            let report = f.reconciler.tick(now()).await.unwrap();
            assert!(report.is_empty());
        }
        assert_eq!(f.collector.calls(), calls);
    }

    #[tokio::test]
    async fn test_pending_agreement_never_enforced() {
        let f = fixture(vec![agreement("P")
            .with_state(AgreementState::Pending)
            .with_device("vm-1")]);

        let report = f.reconciler.tick(now()).await.unwrap();
        assert!(report.is_empty());
        assert!(f.policies.is_empty());
        assert_eq!(f.collector.subscribe_count(), 0);
    }

    #[tokio::test]
    async fn test_device_removal_tears_down_only_that_device() {
        let f = fixture(vec![
            agreement("A").with_device("vm-1").with_device("vm-2"),
            agreement("B").with_device("vm-2"),
        ]);
        f.reconciler.tick(now()).await.unwrap();
        assert_eq!(f.aggregator.subscription_count(), 4);

        f.agreements
            .update(&AgreementId::new("A"), |a| {
                a.links.retain(|l| *l != crate::agreement::LinkTarget::Device(DeviceId::new("vm-2")))
            })
            .await
            .unwrap();

        let report = f.reconciler.tick(now()).await.unwrap();
        assert_eq!(report.updated, vec![AgreementId::new("A")]);

        // vm-2 stays subscribed for B
        assert_eq!(f.collector.unsubscribe_count(), 0);
        let vm2 = DeviceId::new("vm-2");
        assert_eq!(
            f.aggregator.holders(&vm2, "uptime"),
            vec![TermKey::new(&AgreementId::new("B"), "availability")]
        );
        assert_eq!(f.aggregator.holders(&DeviceId::new("vm-1"), "uptime").len(), 1);

        let policy = f.policies.get(&AgreementId::new("A")).await.unwrap().unwrap();
        assert_eq!(policy.devices, vec![DeviceId::new("vm-1")]);
    }

    #[tokio::test]
    async fn test_device_removal_unsubscribes_collector() {
        let f = fixture(vec![agreement("A").with_device("vm-1").with_device("vm-2")]);
        f.reconciler.tick(now()).await.unwrap();

        f.agreements
            .update(&AgreementId::new("A"), |a| {
                a.links.retain(|l| *l != crate::agreement::LinkTarget::Device(DeviceId::new("vm-2")))
            })
            .await
            .unwrap();
        f.reconciler.tick(now()).await.unwrap();

        assert_eq!(f.collector.unsubscribe_count(), 2);
        assert!(!f.aggregator.is_subscribed(&DeviceId::new("vm-2"), "uptime"));
        assert!(f.aggregator.is_subscribed(&DeviceId::new("vm-1"), "uptime"));
    }

    #[tokio::test]
    async fn test_device_added() {
        let f = fixture(vec![agreement("A").with_device("vm-1")]);
        f.reconciler.tick(now()).await.unwrap();
        assert_eq!(f.collector.subscribe_count(), 2);

        f.agreements
            .update(&AgreementId::new("A"), |a| {
                a.links
                    .push(crate::agreement::LinkTarget::Device(DeviceId::new("vm-3")))
            })
            .await
            .unwrap();

        let report = f.reconciler.tick(now()).await.unwrap();
        assert_eq!(report.updated, vec![AgreementId::new("A")]);
        assert_eq!(f.collector.subscribe_count(), 4);
        assert!(f.aggregator.is_subscribed(&DeviceId::new("vm-3"), "latency"));
    }

    #[tokio::test]
    async fn test_expired_agreement_torn_down() {
        let f = fixture(vec![agreement("A").with_device("vm-1")]);
        f.reconciler.tick(now()).await.unwrap();

        let later = now() + ChronoDuration::hours(2);
        let report = f.reconciler.tick(later).await.unwrap();
        assert_eq!(report.removed, vec![AgreementId::new("A")]);

        assert!(f.policies.is_empty());
        assert_eq!(f.aggregator.subscription_count(), 0);
        assert_eq!(f.collector.unsubscribe_count(), 2);
        assert_eq!(term_state(&f.agreements, "A").await, TermState::Undefined);
    }

    #[tokio::test]
    async fn test_suspended_agreement_torn_down() {
        let f = fixture(vec![agreement("A").with_device("vm-1")]);
        f.reconciler.tick(now()).await.unwrap();

        f.agreements
            .update(&AgreementId::new("A"), |a| a.state = AgreementState::Suspended)
            .await
            .unwrap();

        let report = f.reconciler.tick(now()).await.unwrap();
        assert_eq!(report.removed, vec![AgreementId::new("A")]);
        assert!(f.policies.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_under_remedy_is_kept() {
        let f = fixture(vec![agreement("A").with_device("vm-1")]);
        f.reconciler.tick(now()).await.unwrap();

        let mut violated_metrics = BTreeMap::new();
        violated_metrics.insert("uptime".to_string(), json!(95));
        let breach = Breach {
            key: TermKey::new(&AgreementId::new("A"), "availability"),
            device: DeviceId::new("vm-1"),
            bindings: vec![MetricBinding::margin("uptime", json!(98), 2.0)],
            violated_metrics,
            remedy: json!("credit"),
        };
        f.collector.set("vm-1", "uptime", json!(95));
        let handle = f.remedy.enforce(breach).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let later = now() + ChronoDuration::hours(2);
        let report = f.reconciler.tick(later).await.unwrap();
        assert_eq!(report.deferred, vec![AgreementId::new("A")]);
        assert_eq!(f.policies.len(), 1);
        assert_eq!(f.aggregator.subscription_count(), 2);

        // Once recovered, the next tick cleans up
        f.collector.set("vm-1", "uptime", json!(98));
        handle.await.unwrap();
        let report = f.reconciler.tick(later).await.unwrap();
        assert_eq!(report.removed, vec![AgreementId::new("A")]);
        assert!(f.policies.is_empty());
    }

    #[tokio::test]
    async fn test_federation_with_invalid_link() {
        let f = fixture(vec![
            agreement("A").with_device("vm-1").with_linked_agreement("B"),
            agreement("B")
                .with_state(AgreementState::Pending)
                .with_device("vm-9"),
        ]);

        f.reconciler.tick(now()).await.unwrap();
        assert!(f.policies.is_empty());
        assert!(!f.aggregator.is_subscribed(&DeviceId::new("vm-9"), "uptime"));
        assert!(!f.aggregator.is_subscribed(&DeviceId::new("vm-1"), "uptime"));
    }

    #[tokio::test]
    async fn test_federation_with_valid_link() {
        let f = fixture(vec![
            agreement("A").with_device("vm-1").with_linked_agreement("B"),
            agreement("B").with_device("vm-9"),
        ]);

        f.reconciler.tick(now()).await.unwrap();
        let policy = f.policies.get(&AgreementId::new("A")).await.unwrap().unwrap();
        assert_eq!(policy.devices, vec![DeviceId::new("vm-1"), DeviceId::new("vm-9")]);
        assert_eq!(policy.linked_agreements, vec![AgreementId::new("B")]);
        assert_eq!(f.aggregator.holders(&DeviceId::new("vm-9"), "uptime").len(), 2);
    }

    #[tokio::test]
    async fn test_federated_agreement_torn_down_when_link_invalidated() {
        let f = fixture(vec![
            agreement("A").with_device("vm-1").with_linked_agreement("B"),
            agreement("B").with_device("vm-9"),
        ]);
        f.reconciler.tick(now()).await.unwrap();
        assert_eq!(f.aggregator.holders(&DeviceId::new("vm-9"), "uptime").len(), 2);

        f.agreements
            .update(&AgreementId::new("B"), |b| b.state = AgreementState::Suspended)
            .await
            .unwrap();

        let report = f.reconciler.tick(now()).await.unwrap();
        assert!(report.removed.contains(&AgreementId::new("A")));
        assert!(report.removed.contains(&AgreementId::new("B")));
        assert!(f.policies.get(&AgreementId::new("A")).await.unwrap().is_none());
        assert!(f.aggregator.holders(&DeviceId::new("vm-9"), "uptime").is_empty());
        assert!(!f.aggregator.is_subscribed(&DeviceId::new("vm-1"), "uptime"));
        assert_eq!(term_state(&f.agreements, "A").await, TermState::Undefined);

        // Re-enforced once the link is valid again
        f.agreements
            .update(&AgreementId::new("B"), |b| b.state = AgreementState::Accepted)
            .await
            .unwrap();
        let report = f.reconciler.tick(now()).await.unwrap();
        assert!(report.added.contains(&AgreementId::new("A")));
        assert_eq!(f.aggregator.holders(&DeviceId::new("vm-9"), "uptime").len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_binding_skips_only_that_agreement() {
        let bad = agreement("BAD").with_device("vm-1").with_term(
            Term::slo("power", json!("credit"))
                .with_metric(MetricBinding::new("dummy_metric", json!(1), LimiterKind::Max)),
        );
        let f = fixture(vec![bad, agreement("GOOD").with_device("vm-2")]);

        let report = f.reconciler.tick(now()).await.unwrap();
        assert_eq!(report.added, vec![AgreementId::new("GOOD")]);
        assert!(f.policies.get(&AgreementId::new("BAD")).await.unwrap().is_none());
        assert!(!f.aggregator.is_subscribed(&DeviceId::new("vm-1"), "uptime"));
    }

    #[tokio::test]
    async fn test_malformed_threshold_is_not_enforced() {
        let t = now();
        let malformed = Agreement::new("X", "provider", "customer", t - ChronoDuration::hours(1), t + ChronoDuration::hours(1))
            .with_state(AgreementState::Accepted)
            .with_device("vm-1")
            .with_term(
                Term::slo("availability", json!("credit"))
                    .with_metric(MetricBinding::new("uptime", json!("not-a-number"), LimiterKind::Max)),
            );
        let f = fixture(vec![malformed]);

        let report = f.reconciler.tick(now()).await.unwrap();
        assert!(report.added.is_empty());
        assert!(f.policies.get(&AgreementId::new("X")).await.unwrap().is_none());
        assert_eq!(f.collector.subscribe_count(), 0);
    }

    #[tokio::test]
    async fn test_agreement_without_devices_is_skipped() {
        let f = fixture(vec![agreement("A")]);
        let report = f.reconciler.tick(now()).await.unwrap();
        assert!(report.is_empty());
        assert!(f.policies.is_empty());
    }
}
