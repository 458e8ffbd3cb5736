//! Incentive calculation pipeline: validate, persist, then project every
//! seller of a roster, all or nothing.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::error::BatchError;
use crate::model::{BatchRunState, Goals, IncentiveAggregate, Metrics, SaveState, Seller};
use crate::projection::{IncentiveProjector, ProjectionSeller};
use crate::roster::Roster;
use crate::store::MetricsStore;
use crate::validate::validate;

const EVENT_CAPACITY: usize = 64;

/// Progress notification emitted on every state transition.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    BatchStarted {
        sellers: usize,
        at: DateTime<Utc>,
    },
    SavingStarted {
        seller_id: String,
        at: DateTime<Utc>,
    },
    Saved {
        seller_id: String,
        at: DateTime<Utc>,
    },
    SaveFailed {
        seller_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
    BatchSucceeded {
        incentives: usize,
        at: DateTime<Utc>,
    },
    BatchFailed {
        reason: String,
        at: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineEvent::BatchStarted { .. } => "batch_started",
            PipelineEvent::SavingStarted { .. } => "saving_started",
            PipelineEvent::Saved { .. } => "saved",
            PipelineEvent::SaveFailed { .. } => "save_failed",
            PipelineEvent::BatchSucceeded { .. } => "batch_succeeded",
            PipelineEvent::BatchFailed { .. } => "batch_failed",
        }
    }

    pub fn seller_id(&self) -> Option<&str> {
        match self {
            PipelineEvent::SavingStarted { seller_id, .. }
            | PipelineEvent::Saved { seller_id, .. }
            | PipelineEvent::SaveFailed { seller_id, .. } => Some(seller_id),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct RunState {
    batch: BatchRunState,
    sellers: HashMap<String, SaveState>,
    saves_in_flight: usize,
}

/// Orchestrates batch runs for one roster. At most one batch runs at a time.
pub struct Pipeline {
    store: Arc<dyn MetricsStore>,
    projector: Arc<dyn IncentiveProjector>,
    state: Mutex<RunState>,
    events: broadcast::Sender<PipelineEvent>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn MetricsStore>, projector: Arc<dyn IncentiveProjector>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            projector,
            state: Mutex::new(RunState::default()),
            events,
        }
    }

    /// Receive progress notifications. Slow receivers may observe `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn batch_state(&self) -> BatchRunState {
        self.lock().batch.clone()
    }

    /// Save states of the sellers touched by the run in progress.
    pub fn save_states(&self) -> HashMap<String, SaveState> {
        self.lock().sellers.clone()
    }

    /// Validate and persist every seller in roster order, then project each
    /// one against `goals`. Any failure aborts the run and no incentive is
    /// returned; sellers saved before the failure stay saved in the backend.
    #[instrument(skip_all, fields(store_id = store_id, sellers = roster.len()))]
    pub async fn run_batch(
        &self,
        roster: &Roster,
        store_id: &str,
        goals: &Goals,
    ) -> Result<IncentiveAggregate, BatchError> {
        let run = self.begin_batch(roster.len())?;
        info!("batch run started");

        let outcome = self.execute_batch(roster, store_id, goals).await;
        match &outcome {
            Ok(aggregate) => {
                info!(incentives = aggregate.len(), "batch run succeeded");
                run.succeed(aggregate.len());
            }
            Err(err) => {
                warn!(
                    error = %err,
                    seller_id = err.seller_id(),
                    step = err.step().map(|s| s.as_str()),
                    "batch run failed"
                );
                run.fail(err.to_string());
            }
        }
        outcome
    }

    /// Validate and persist a single seller without projecting. Rejected
    /// while a batch run owns the roster; a batch cannot start while a
    /// standalone save is in flight.
    #[instrument(skip_all, fields(store_id = store_id, seller_id = seller_id))]
    pub async fn save_one(
        &self,
        roster: &Roster,
        store_id: &str,
        seller_id: &str,
    ) -> Result<(), BatchError> {
        let seller = roster
            .get(seller_id)
            .ok_or_else(|| BatchError::UnknownSeller(seller_id.to_string()))?;
        let _save = self.begin_save(seller_id)?;

        self.save_seller(store_id, seller).await.map(|_| ())
    }

    async fn execute_batch(
        &self,
        roster: &Roster,
        store_id: &str,
        goals: &Goals,
    ) -> Result<IncentiveAggregate, BatchError> {
        let mut saved: Vec<(&Seller, Metrics)> = Vec::with_capacity(roster.len());
        for seller in roster {
            let metrics = self.save_seller(store_id, seller).await?;
            saved.push((seller, metrics));
        }

        // Projection reads the same metrics that were just persisted.
        let mut aggregate = IncentiveAggregate::new();
        for (seller, metrics) in saved {
            let view = ProjectionSeller::new(seller, metrics);
            let incentive = self
                .projector
                .project(&view, goals)
                .await
                .map_err(|source| BatchError::Project {
                    seller_id: seller.id.clone(),
                    source,
                })?;
            debug!(seller_id = %seller.id, "incentive projected");
            aggregate.insert(seller.id.clone(), incentive);
        }
        Ok(aggregate)
    }

    async fn save_seller(&self, store_id: &str, seller: &Seller) -> Result<Metrics, BatchError> {
        self.set_save_state(&seller.id, SaveState::Idle);

        let metrics = match validate(seller) {
            Ok(metrics) => metrics,
            Err(errors) => {
                self.mark_failed(&seller.id, errors.to_string());
                return Err(BatchError::Validation {
                    seller_id: seller.id.clone(),
                    errors,
                });
            }
        };

        self.set_save_state(&seller.id, SaveState::Saving);
        self.emit(PipelineEvent::SavingStarted {
            seller_id: seller.id.clone(),
            at: Utc::now(),
        });

        match self.store.save(store_id, &seller.id, &metrics).await {
            Ok(()) => {
                self.set_save_state(&seller.id, SaveState::Saved);
                self.emit(PipelineEvent::Saved {
                    seller_id: seller.id.clone(),
                    at: Utc::now(),
                });
                debug!(seller_id = %seller.id, "seller saved");
                Ok(metrics)
            }
            Err(source) => {
                self.mark_failed(&seller.id, source.message.clone());
                Err(BatchError::Persist {
                    seller_id: seller.id.clone(),
                    source,
                })
            }
        }
    }

    fn begin_batch(&self, sellers: usize) -> Result<BatchRun<'_>, BatchError> {
        {
            let mut state = self.lock();
            if state.batch.is_running() || state.saves_in_flight > 0 {
                return Err(BatchError::Reentrant);
            }
            state.batch = BatchRunState::Running;
            state.sellers.clear();
        }
        self.emit(PipelineEvent::BatchStarted {
            sellers,
            at: Utc::now(),
        });
        Ok(BatchRun {
            pipeline: self,
            finished: false,
        })
    }

    fn begin_save<'a>(&'a self, seller_id: &'a str) -> Result<SaveRun<'a>, BatchError> {
        let mut state = self.lock();
        if state.batch.is_running() {
            return Err(BatchError::Reentrant);
        }
        state.saves_in_flight += 1;
        Ok(SaveRun {
            pipeline: self,
            seller_id,
        })
    }

    fn set_save_state(&self, seller_id: &str, save_state: SaveState) {
        self.lock().sellers.insert(seller_id.to_string(), save_state);
    }

    fn mark_failed(&self, seller_id: &str, reason: String) {
        self.set_save_state(seller_id, SaveState::Failed(reason.clone()));
        self.emit(PipelineEvent::SaveFailed {
            seller_id: seller_id.to_string(),
            reason,
            at: Utc::now(),
        });
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks a batch run as in flight. Dropping it unfinished (the run future
/// was cancelled) returns the pipeline to idle.
struct BatchRun<'a> {
    pipeline: &'a Pipeline,
    finished: bool,
}

impl BatchRun<'_> {
    fn succeed(mut self, incentives: usize) {
        self.finish(BatchRunState::Succeeded);
        self.pipeline.emit(PipelineEvent::BatchSucceeded {
            incentives,
            at: Utc::now(),
        });
    }

    fn fail(mut self, reason: String) {
        self.finish(BatchRunState::Failed(reason.clone()));
        self.pipeline.emit(PipelineEvent::BatchFailed {
            reason,
            at: Utc::now(),
        });
    }

    fn finish(&mut self, outcome: BatchRunState) {
        let mut state = self.pipeline.lock();
        state.batch = outcome;
        state.sellers.clear();
        self.finished = true;
    }
}

impl Drop for BatchRun<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("batch run abandoned before completion");
        let mut state = self.pipeline.lock();
        state.batch = BatchRunState::Idle;
        state.sellers.clear();
    }
}

/// Marks a standalone save as in flight; a batch run cannot start until
/// it is dropped. Dropping it also discards the seller's save state.
struct SaveRun<'a> {
    pipeline: &'a Pipeline,
    seller_id: &'a str,
}

impl Drop for SaveRun<'_> {
    fn drop(&mut self) {
        let mut state = self.pipeline.lock();
        state.saves_in_flight = state.saves_in_flight.saturating_sub(1);
        state.sellers.remove(self.seller_id);
    }
}
