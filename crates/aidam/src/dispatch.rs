//! Job dispatch: claim `cognitive_inbox` jobs and route them to agent
//! workers by message type.
//!
//! The LLM agents themselves live outside this crate; a worker here is the
//! seam they plug into. The dispatcher owns the claim protocol, the budget
//! gate, and the periodic retrieval-TTL sweep.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::inbox::{InboxBus, InboxJob, MessageType};
use crate::orchestrator::OrchestratorRegistry;
use crate::{AidamError, Result};

const IDLE_SLEEP: Duration = Duration::from_millis(500);
/// Expired retrieval rows are swept roughly once a minute.
const CLEANUP_EVERY: u32 = 120;

/// One background agent's seam into the dispatch loop.
#[async_trait]
pub trait AgentWorker: Send + Sync {
    /// Name used for budget accounting (`retriever`, `learner`, ...).
    fn name(&self) -> &str;

    /// Job kinds this worker consumes.
    fn subscribes(&self) -> &[MessageType];

    /// Process one claimed job, returning the cost in USD.
    async fn process(&self, job: &InboxJob) -> anyhow::Result<f64>;
}

/// Claim-and-route loop over the cognitive inbox.
pub struct Dispatcher {
    inbox: InboxBus,
    registry: OrchestratorRegistry,
    session_id: String,
    workers: Vec<Arc<dyn AgentWorker>>,
}

impl Dispatcher {
    pub fn new(inbox: InboxBus, registry: OrchestratorRegistry, session_id: String) -> Self {
        Self {
            inbox,
            registry,
            session_id,
            workers: Vec::new(),
        }
    }

    pub fn register_worker(&mut self, worker: Arc<dyn AgentWorker>) {
        self.workers.push(worker);
    }

    /// The worker subscribed to a job kind, if any.
    fn worker_for(&self, kind: MessageType) -> Option<&Arc<dyn AgentWorker>> {
        self.workers
            .iter()
            .find(|worker| worker.subscribes().contains(&kind))
    }

    /// Job kinds with a non-quiesced worker behind them.
    async fn claimable_kinds(&self) -> Result<Vec<MessageType>> {
        let mut kinds = Vec::new();
        for worker in &self.workers {
            if self
                .registry
                .is_quiesced(&self.session_id, worker.name())
                .await?
            {
                debug!("agent '{}' is quiesced, skipping its kinds", worker.name());
                continue;
            }
            for kind in worker.subscribes() {
                if !kinds.contains(kind) {
                    kinds.push(*kind);
                }
            }
        }
        Ok(kinds)
    }

    /// Claim and process at most one job. Returns whether one was handled.
    pub async fn run_once(&self) -> Result<bool> {
        let kinds = self.claimable_kinds().await?;
        if kinds.is_empty() {
            return Ok(false);
        }

        let Some(job) = self.inbox.claim_next(&kinds).await? else {
            return Ok(false);
        };

        let kind = job.kind()?;
        let Some(worker) = self.worker_for(kind) else {
            // Claimed a kind nothing handles anymore; put it to rest.
            self.inbox.fail_job(job.id).await?;
            return Ok(true);
        };

        match worker.process(&job).await {
            Ok(cost) => {
                self.inbox.complete_job(job.id).await?;
                match self
                    .registry
                    .record_invocation(&self.session_id, worker.name(), cost)
                    .await
                {
                    Ok(_) => {}
                    Err(AidamError::BudgetExhausted { agent, spent, budget }) => {
                        info!(
                            "agent '{}' quiesced: ${:.4} spent of ${:.2}",
                            agent, spent, budget
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => {
                error!("worker '{}' failed job {}: {}", worker.name(), job.id, e);
                self.inbox.fail_job(job.id).await?;
            }
        }

        Ok(true)
    }

    /// Run forever: drain jobs, sleep when idle, sweep expired retrieval
    /// rows periodically. Loop errors are logged, never fatal.
    pub async fn run(&self) {
        let mut ticks: u32 = 0;
        loop {
            match self.run_once().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(IDLE_SLEEP).await,
                Err(e) => {
                    error!("dispatch iteration failed: {}", e);
                    tokio::time::sleep(IDLE_SLEEP).await;
                }
            }

            ticks = ticks.wrapping_add(1);
            if ticks % CLEANUP_EVERY == 0 {
                if let Err(e) = self.inbox.cleanup_expired_retrieval().await {
                    error!("retrieval cleanup failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubWorker {
        name: &'static str,
        kinds: Vec<MessageType>,
    }

    #[async_trait]
    impl AgentWorker for StubWorker {
        fn name(&self) -> &str {
            self.name
        }

        fn subscribes(&self) -> &[MessageType] {
            &self.kinds
        }

        async fn process(&self, _job: &InboxJob) -> anyhow::Result<f64> {
            Ok(0.01)
        }
    }

    fn dispatcher_with_workers() -> Dispatcher {
        // worker_for / routing are pure over the worker list; no DB needed.
        let mut dispatcher = Dispatcher {
            inbox: unreachable_inbox(),
            registry: unreachable_registry(),
            session_id: "sess".into(),
            workers: Vec::new(),
        };
        dispatcher.register_worker(Arc::new(StubWorker {
            name: "retriever",
            kinds: vec![MessageType::PromptContext],
        }));
        dispatcher.register_worker(Arc::new(StubWorker {
            name: "learner",
            kinds: vec![MessageType::ToolUse, MessageType::LearnTrigger],
        }));
        dispatcher
    }

    fn unreachable_inbox() -> InboxBus {
        InboxBus::new(crate::store::Store::from_pool(
            sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://localhost/x").unwrap(),
        ))
    }

    fn unreachable_registry() -> OrchestratorRegistry {
        OrchestratorRegistry::new(crate::store::Store::from_pool(
            sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://localhost/x").unwrap(),
        ))
    }

    #[test]
    fn test_worker_routing_by_kind() {
        let dispatcher = dispatcher_with_workers();
        assert_eq!(
            dispatcher
                .worker_for(MessageType::PromptContext)
                .map(|w| w.name()),
            Some("retriever")
        );
        assert_eq!(
            dispatcher
                .worker_for(MessageType::LearnTrigger)
                .map(|w| w.name()),
            Some("learner")
        );
        assert!(dispatcher.worker_for(MessageType::CompactorTrigger).is_none());
    }
}
