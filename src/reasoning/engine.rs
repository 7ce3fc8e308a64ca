//! Reasoning engine.
//!
//! Owns the aggregator, reconciler and remedy workflow for the lifetime of
//! the process, runs the tick loop and dispatches pushed readings.

use crate::agreement::AgreementStore;
use crate::aggregator::{Aggregator, ReasoningRequest};
use crate::collector::{CollectorRegistry, MetricNotification};
use crate::core::{now, Error, Result, TermKey};
use crate::evaluator::{evaluate_term, MetricCatalog, TermEvaluation, TermOutcome};
use crate::policy::PolicyStore;
use crate::reasoning::config::EngineConfig;
use crate::reasoning::reconciler::{Reconciler, TickReport};
use crate::remedy::{Breach, RemedySink, RemedyWorkflow};
use crate::violation::ViolationStore;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The SLA enforcement engine.
pub struct ReasoningEngine {
    config: EngineConfig,
    policies: Arc<dyn PolicyStore>,
    aggregator: Arc<Aggregator>,
    remedy: RemedyWorkflow,
    reconciler: Reconciler,
    notifications: Mutex<Option<mpsc::UnboundedReceiver<MetricNotification>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    halt: watch::Sender<bool>,
}

impl ReasoningEngine {
    /// Create a new engine.
    ///
    /// `notifications` is the receiving end of the notifier handed to the
    /// collectors in `registry`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        catalog: Arc<MetricCatalog>,
        agreements: Arc<dyn AgreementStore>,
        policies: Arc<dyn PolicyStore>,
        violations: Arc<dyn ViolationStore>,
        registry: Arc<CollectorRegistry>,
        sink: Arc<dyn RemedySink>,
        notifications: mpsc::UnboundedReceiver<MetricNotification>,
    ) -> Self {
        let (halt, halt_rx) = watch::channel(false);
        let aggregator = Arc::new(Aggregator::new(registry, catalog, Arc::clone(&policies)));
        let remedy = RemedyWorkflow::new(
            Arc::clone(&agreements),
            violations,
            sink,
            Arc::clone(&aggregator),
            config.remedy_poll_interval(),
            halt_rx,
        );
        let reconciler = Reconciler::new(
            agreements,
            Arc::clone(&policies),
            Arc::clone(&aggregator),
            remedy.clone(),
        );

        Self {
            config,
            policies,
            aggregator,
            remedy,
            reconciler,
            notifications: Mutex::new(Some(notifications)),
            dispatcher: Mutex::new(None),
            halt,
        }
    }

    /// Configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Aggregator.
    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Remedy workflow.
    pub fn remedy(&self) -> &RemedyWorkflow {
        &self.remedy
    }

    /// Run until `shutdown` turns true.
    ///
    /// With a refresh interval of zero a single tick is run and the call
    /// returns, leaving the dispatcher and any remedy tasks running.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.start_dispatcher().await?;
        info!("Reasoning engine started");

        loop {
            match self.tick().await {
                Ok(report) if !report.is_empty() => info!("Reconciliation: {:?}", report),
                Ok(_) => debug!("Reconciliation: no changes"),
                Err(e) => error!("Reconciliation tick failed: {}", e),
            }

            let Some(interval) = self.config.refresh_interval() else {
                return Ok(());
            };
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Run one reconciliation tick, then evaluate tracked terms if enabled.
    pub async fn tick(&self) -> Result<TickReport> {
        let report = self.reconciler.tick(now()).await?;
        if self.config.evaluate_on_tick {
            self.evaluate_tracked().await?;
        }
        Ok(report)
    }

    /// Evaluate a term and start its remedy on breach.
    pub fn reason(&self, request: ReasoningRequest) -> Result<TermEvaluation> {
        reason(&self.aggregator, &self.remedy, request)
    }

    /// Stop the dispatcher, remedy waits and every collector watch.
    pub async fn shutdown(&self) {
        self.halt.send_replace(true);
        if let Some(handle) = self.dispatcher.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Notification dispatcher ended abnormally: {}", e);
            }
        }
        self.aggregator.shutdown().await;
        info!("Reasoning engine stopped");
    }

    async fn start_dispatcher(&self) -> Result<()> {
        let mut rx = self
            .notifications
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Internal("reasoning engine is already running".to_string()))?;

        let aggregator = Arc::clone(&self.aggregator);
        let remedy = self.remedy.clone();
        let mut halt = self.halt.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => {
                        let Some(notification) = received else { break };
                        debug!(
                            "Reading {} of {}#{}",
                            notification.value, notification.device, notification.metric
                        );
                        for request in aggregator.notify(notification).await {
                            if let Err(e) = reason(&aggregator, &remedy, request) {
                                warn!("{}", e);
                            }
                        }
                    }
                    changed = halt.changed() => {
                        if changed.is_err() || *halt.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Notification dispatcher stopped");
        });

        *self.dispatcher.lock().await = Some(handle);
        Ok(())
    }

    /// Pull and evaluate every tracked term on every device.
    async fn evaluate_tracked(&self) -> Result<()> {
        for policy in self.policies.list().await? {
            for (name, term) in &policy.terms {
                let key = TermKey::new(&policy.agreement_id, name);
                if self.remedy.is_term_under_remedy(&key) {
                    debug!("{} is under remedy, not evaluated", key);
                    continue;
                }

                let bindings = term.bindings();
                for device in &policy.devices {
                    let readings = self
                        .aggregator
                        .pull_term(name, &policy.agreement_id, &bindings, device)
                        .await;
                    let request = ReasoningRequest {
                        key: key.clone(),
                        device: device.clone(),
                        bindings: bindings.clone(),
                        readings,
                        remedy: term.remedy.clone(),
                    };
                    if let Err(e) = self.reason(request) {
                        warn!("{}", e);
                    }
                }
            }
        }
        Ok(())
    }
}

fn reason(
    aggregator: &Aggregator,
    remedy: &RemedyWorkflow,
    request: ReasoningRequest,
) -> Result<TermEvaluation> {
    let evaluation = evaluate_term(aggregator.catalog(), &request.bindings, &request.readings)?;
    for (metric, reason) in &evaluation.excluded {
        debug!("{}: {} left out on {}: {}", request.key, metric, request.device, reason);
    }

    match evaluation.outcome {
        TermOutcome::Violated => {
            let breach = Breach {
                key: request.key,
                device: request.device,
                bindings: request.bindings,
                violated_metrics: evaluation.violated_metrics.clone(),
                remedy: request.remedy,
            };
            match remedy.enforce(breach) {
                Ok(_) => {}
                Err(Error::ConcurrencyConflict(key)) => {
                    warn!("Term {} is already under remedy, dropping breach", key)
                }
                Err(e) => return Err(e),
            }
        }
        TermOutcome::Fulfilled => debug!("{} fulfilled on {}", request.key, request.device),
        TermOutcome::Indeterminate => {
            debug!("{} indeterminate on {}", request.key, request.device)
        }
    }
    Ok(evaluation)
}
