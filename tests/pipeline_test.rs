use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use goal_getter::projection::{IncentiveProjector, ProjectionSeller};
use goal_getter::store::MetricsStore;
use goal_getter::{
    BatchError, BatchRunState, Goals, Incentive, MetricField, MetricInput, Metrics,
    MetricsInput, PersistError, Pipeline, ProjectError, Roster, SaveState, Seller, Step,
};
use serde_json::json;
use tokio::sync::{Mutex, Notify};

/// Lets a test hold a save call open until it decides to release it.
#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

#[derive(Clone, Default)]
struct RecordingStore {
    responses: Arc<Mutex<VecDeque<Result<(), PersistError>>>>,
    calls: Arc<Mutex<Vec<(String, String, Metrics)>>>,
    stored: Arc<Mutex<HashMap<(String, String), Metrics>>>,
    gate: Option<Arc<Gate>>,
}

impl RecordingStore {
    fn with_responses(responses: Vec<Result<(), PersistError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    fn gated(gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    async fn saved_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|(_, seller_id, _)| seller_id.clone())
            .collect()
    }
}

#[async_trait]
impl MetricsStore for RecordingStore {
    async fn save(
        &self,
        store_id: &str,
        seller_id: &str,
        metrics: &Metrics,
    ) -> Result<(), PersistError> {
        self.calls
            .lock()
            .await
            .push((store_id.to_string(), seller_id.to_string(), *metrics));
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let response = self.responses.lock().await.pop_front().unwrap_or(Ok(()));
        if response.is_ok() {
            self.stored
                .lock()
                .await
                .insert((store_id.to_string(), seller_id.to_string()), *metrics);
        }
        response
    }

    async fn load(
        &self,
        store_id: &str,
        seller_id: &str,
    ) -> Result<Option<Metrics>, PersistError> {
        Ok(self
            .stored
            .lock()
            .await
            .get(&(store_id.to_string(), seller_id.to_string()))
            .copied())
    }
}

#[derive(Clone, Default)]
struct ScriptedProjector {
    responses: Arc<Mutex<VecDeque<Result<Incentive, ProjectError>>>>,
    calls: Arc<Mutex<Vec<(String, Metrics, Goals)>>>,
}

impl ScriptedProjector {
    fn with_responses(responses: Vec<Result<Incentive, ProjectError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn projected_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|(id, _, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl IncentiveProjector for ScriptedProjector {
    async fn project(
        &self,
        seller: &ProjectionSeller<'_>,
        goals: &Goals,
    ) -> Result<Incentive, ProjectError> {
        self.calls
            .lock()
            .await
            .push((seller.id.to_string(), seller.metrics, goals.clone()));
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(Incentive(json!({ "bonus": 0 }))))
    }
}

fn num(v: f64) -> Option<MetricInput> {
    Some(MetricInput::Number(v))
}

fn text(v: &str) -> Option<MetricInput> {
    Some(MetricInput::Text(v.to_string()))
}

fn seller(
    id: &str,
    name: &str,
    vendas: Option<MetricInput>,
    pa: Option<MetricInput>,
    ticket_medio: Option<MetricInput>,
    corridinha_diaria: Option<MetricInput>,
) -> Seller {
    Seller {
        id: id.into(),
        name: name.into(),
        avatar_id: String::new(),
        metrics: MetricsInput {
            vendas,
            pa,
            ticket_medio,
            corridinha_diaria,
        },
        password: name.to_lowercase(),
    }
}

fn valid_seller(id: &str, name: &str) -> Seller {
    seller(id, name, num(100.0), num(1.0), num(10.0), num(0.0))
}

fn goals() -> Goals {
    Goals(json!({ "metaVendas": 10000, "premio": 200 }))
}

fn pipeline(store: &RecordingStore, projector: &ScriptedProjector) -> Pipeline {
    Pipeline::new(Arc::new(store.clone()), Arc::new(projector.clone()))
}

#[tokio::test]
async fn empty_roster_returns_empty_aggregate_without_calls() {
    let store = RecordingStore::default();
    let projector = ScriptedProjector::default();
    let pipeline = pipeline(&store, &projector);

    let aggregate = pipeline
        .run_batch(&Roster::new(), "loja-1", &goals())
        .await
        .unwrap();

    assert!(aggregate.is_empty());
    assert!(store.saved_ids().await.is_empty());
    assert!(projector.projected_ids().await.is_empty());
    assert_eq!(pipeline.batch_state(), BatchRunState::Succeeded);
}

#[tokio::test]
async fn empty_metric_aborts_at_that_seller() {
    let store = RecordingStore::default();
    let projector = ScriptedProjector::default();
    let pipeline = pipeline(&store, &projector);
    let roster = Roster::from_sellers(vec![
        seller("s1", "Ana", num(1000.0), num(2.0), num(50.0), num(10.0)),
        seller("s2", "Bea", text(""), num(1.0), num(40.0), num(0.0)),
    ])
    .unwrap();

    let err = pipeline
        .run_batch(&roster, "loja-1", &goals())
        .await
        .unwrap_err();

    match &err {
        BatchError::Validation { seller_id, errors } => {
            assert_eq!(seller_id, "s2");
            assert!(errors.contains(MetricField::Vendas));
            assert_eq!(errors.len(), 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.step(), Some(Step::Validate));
    assert_eq!(store.saved_ids().await, vec!["s1".to_string()]);
    assert!(projector.projected_ids().await.is_empty());
    assert!(matches!(pipeline.batch_state(), BatchRunState::Failed(_)));
    assert!(pipeline.save_states().is_empty());
}

#[tokio::test]
async fn invalid_first_seller_prevents_every_save() {
    let store = RecordingStore::default();
    let projector = ScriptedProjector::default();
    let pipeline = pipeline(&store, &projector);
    let roster = Roster::from_sellers(vec![
        seller("s1", "Ana", num(1000.0), text("dois"), num(50.0), None),
        valid_seller("s2", "Bea"),
    ])
    .unwrap();

    let err = pipeline
        .run_batch(&roster, "loja-1", &goals())
        .await
        .unwrap_err();

    let BatchError::Validation { seller_id, errors } = err else {
        panic!("expected validation error");
    };
    assert_eq!(seller_id, "s1");
    assert!(errors.contains(MetricField::Pa));
    assert!(errors.contains(MetricField::CorridinhaDiaria));
    assert!(store.saved_ids().await.is_empty());
}

#[tokio::test]
async fn persist_failure_stops_remaining_sellers() {
    let store = RecordingStore::with_responses(vec![
        Ok(()),
        Err(PersistError::new("Loja não encontrada")),
    ]);
    let projector = ScriptedProjector::default();
    let pipeline = pipeline(&store, &projector);
    let roster = Roster::from_sellers(vec![
        valid_seller("s1", "Ana"),
        valid_seller("s2", "Bea"),
        valid_seller("s3", "Cris"),
    ])
    .unwrap();

    let err = pipeline
        .run_batch(&roster, "loja-1", &goals())
        .await
        .unwrap_err();

    assert_eq!(err.seller_id(), Some("s2"));
    assert_eq!(err.step(), Some(Step::Persist));
    match err {
        BatchError::Persist { source, .. } => assert_eq!(source.message, "Loja não encontrada"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(store.saved_ids().await, vec!["s1", "s2"]);
    assert!(projector.projected_ids().await.is_empty());
    assert!(store.load("loja-1", "s1").await.unwrap().is_some());
    assert!(store.load("loja-1", "s2").await.unwrap().is_none());
}

#[tokio::test]
async fn projection_failure_discards_computed_incentives() {
    let store = RecordingStore::default();
    let projector = ScriptedProjector::with_responses(vec![
        Ok(Incentive(json!({ "bonus": 10 }))),
        Err(ProjectError::new("model overloaded")),
    ]);
    let pipeline = pipeline(&store, &projector);
    let roster = Roster::from_sellers(vec![
        valid_seller("s1", "Ana"),
        valid_seller("s2", "Bea"),
        valid_seller("s3", "Cris"),
    ])
    .unwrap();

    let err = pipeline
        .run_batch(&roster, "loja-1", &goals())
        .await
        .unwrap_err();

    match &err {
        BatchError::Project { seller_id, source } => {
            assert_eq!(seller_id, "s2");
            assert_eq!(source.message, "model overloaded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Every seller was saved before the first projection.
    assert_eq!(store.saved_ids().await, vec!["s1", "s2", "s3"]);
    assert_eq!(projector.projected_ids().await, vec!["s1", "s2"]);
    assert_eq!(
        pipeline.batch_state(),
        BatchRunState::Failed(err.to_string())
    );
}

#[tokio::test]
async fn full_success_has_one_entry_per_seller() {
    let store = RecordingStore::default();
    let projector = ScriptedProjector::with_responses(vec![
        Ok(Incentive(json!({ "bonus": 1 }))),
        Ok(Incentive(json!({ "bonus": 2 }))),
        Ok(Incentive(json!({ "bonus": 3 }))),
    ]);
    let pipeline = pipeline(&store, &projector);
    let roster = Roster::from_sellers(vec![
        valid_seller("s1", "Ana"),
        seller("s2", "Bea", text("250.5"), text(" 3 "), num(40.0), num(0.0)),
        valid_seller("s3", "Cris"),
    ])
    .unwrap();

    let aggregate = pipeline
        .run_batch(&roster, "loja-1", &goals())
        .await
        .unwrap();

    let keys: Vec<&str> = aggregate.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["s1", "s2", "s3"]);
    assert_eq!(aggregate["s2"], Incentive(json!({ "bonus": 2 })));

    // Projection sees the same typed metrics that were persisted.
    let calls = projector.calls.lock().await.clone();
    let persisted = store.load("loja-1", "s2").await.unwrap().unwrap();
    assert_eq!(calls[1].1, persisted);
    assert_eq!(persisted.vendas, 250.5);
    assert_eq!(persisted.pa, 3.0);
    assert!(calls.iter().all(|(_, _, g)| *g == goals()));
    assert_eq!(pipeline.batch_state(), BatchRunState::Succeeded);
}

#[tokio::test]
async fn single_seller_bonus_is_returned() {
    let store = RecordingStore::default();
    let projector =
        ScriptedProjector::with_responses(vec![Ok(Incentive(json!({ "bonus": 120 })))]);
    let pipeline = pipeline(&store, &projector);
    let roster = Roster::from_sellers(vec![seller(
        "s1",
        "Ana",
        num(500.0),
        num(1.5),
        num(30.0),
        num(5.0),
    )])
    .unwrap();

    let aggregate = pipeline
        .run_batch(&roster, "loja-1", &goals())
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_value(&aggregate).unwrap(),
        json!({ "s1": { "bonus": 120 } })
    );
    let (store_id, seller_id, metrics) = store.calls.lock().await[0].clone();
    assert_eq!((store_id.as_str(), seller_id.as_str()), ("loja-1", "s1"));
    assert_eq!(
        metrics,
        Metrics {
            vendas: 500.0,
            pa: 1.5,
            ticket_medio: 30.0,
            corridinha_diaria: 5.0,
        }
    );
}

#[tokio::test]
async fn second_run_while_running_is_rejected() {
    let gate = Arc::new(Gate::default());
    let store = RecordingStore::gated(gate.clone());
    let projector = ScriptedProjector::default();
    let pipeline = Arc::new(pipeline(&store, &projector));
    let roster = Roster::from_sellers(vec![valid_seller("s1", "Ana")]).unwrap();

    let first = {
        let pipeline = pipeline.clone();
        let roster = roster.clone();
        tokio::spawn(async move { pipeline.run_batch(&roster, "loja-1", &goals()).await })
    };
    gate.entered.notified().await;

    assert_eq!(pipeline.batch_state(), BatchRunState::Running);
    assert_eq!(pipeline.save_states().get("s1"), Some(&SaveState::Saving));

    let err = pipeline
        .run_batch(&roster, "loja-1", &goals())
        .await
        .unwrap_err();
    assert_eq!(err, BatchError::Reentrant);
    let err = pipeline.save_one(&roster, "loja-1", "s1").await.unwrap_err();
    assert_eq!(err, BatchError::Reentrant);
    assert_eq!(store.saved_ids().await.len(), 1);

    gate.release.notify_one();
    let aggregate = first.await.unwrap().unwrap();
    assert_eq!(aggregate.len(), 1);
    assert_eq!(store.saved_ids().await.len(), 1);
    assert_eq!(projector.projected_ids().await.len(), 1);
    assert!(pipeline.save_states().is_empty());
}

#[tokio::test]
async fn batch_cannot_start_while_single_save_is_in_flight() {
    let gate = Arc::new(Gate::default());
    let store = RecordingStore::gated(gate.clone());
    let projector = ScriptedProjector::default();
    let pipeline = Arc::new(pipeline(&store, &projector));
    let roster =
        Roster::from_sellers(vec![valid_seller("s1", "Ana"), valid_seller("s2", "Bea")]).unwrap();

    let single = {
        let pipeline = pipeline.clone();
        let roster = roster.clone();
        tokio::spawn(async move { pipeline.save_one(&roster, "loja-1", "s1").await })
    };
    gate.entered.notified().await;

    let err = pipeline
        .run_batch(&roster, "loja-1", &goals())
        .await
        .unwrap_err();
    assert_eq!(err, BatchError::Reentrant);
    assert_eq!(pipeline.batch_state(), BatchRunState::Idle);
    assert_eq!(store.saved_ids().await, vec!["s1"]);

    gate.release.notify_one();
    single.await.unwrap().unwrap();
    assert!(pipeline.save_states().is_empty());

    // Once the save is done a batch runs normally.
    let (pipeline_task, roster_task) = (pipeline.clone(), roster.clone());
    let batch = tokio::spawn(async move {
        pipeline_task
            .run_batch(&roster_task, "loja-1", &goals())
            .await
    });
    for _ in 0..2 {
        gate.entered.notified().await;
        gate.release.notify_one();
    }
    let aggregate = batch.await.unwrap().unwrap();
    assert_eq!(aggregate.len(), 2);
    assert_eq!(store.saved_ids().await, vec!["s1", "s1", "s2"]);
}

#[tokio::test]
async fn cancelled_single_save_does_not_block_batches() {
    let gate = Arc::new(Gate::default());
    let store = RecordingStore::gated(gate.clone());
    let projector = ScriptedProjector::default();
    let pipeline = pipeline(&store, &projector);
    let roster = Roster::from_sellers(vec![valid_seller("s1", "Ana")]).unwrap();

    let timed_out = tokio::time::timeout(
        Duration::from_millis(50),
        pipeline.save_one(&roster, "loja-1", "s1"),
    )
    .await;
    assert!(timed_out.is_err());
    assert!(pipeline.save_states().is_empty());

    // Pre-release the gate for the batch's single save.
    gate.release.notify_one();
    let aggregate = pipeline
        .run_batch(&roster, "loja-1", &goals())
        .await
        .unwrap();
    assert_eq!(aggregate.len(), 1);
}

#[tokio::test]
async fn abandoned_run_returns_to_idle() {
    let gate = Arc::new(Gate::default());
    let store = RecordingStore::gated(gate);
    let projector = ScriptedProjector::default();
    let pipeline = pipeline(&store, &projector);
    let roster = Roster::from_sellers(vec![valid_seller("s1", "Ana")]).unwrap();

    let goals = goals();
    let timed_out = tokio::time::timeout(
        Duration::from_millis(50),
        pipeline.run_batch(&roster, "loja-1", &goals),
    )
    .await;
    assert!(timed_out.is_err());

    assert_eq!(pipeline.batch_state(), BatchRunState::Idle);
    assert!(pipeline.save_states().is_empty());
    assert!(projector.projected_ids().await.is_empty());
}

#[tokio::test]
async fn notifications_follow_state_transitions() {
    let store = RecordingStore::default();
    let projector = ScriptedProjector::default();
    let pipeline = pipeline(&store, &projector);
    let mut events = pipeline.subscribe();
    let roster =
        Roster::from_sellers(vec![valid_seller("s1", "Ana"), valid_seller("s2", "Bea")]).unwrap();

    pipeline
        .run_batch(&roster, "loja-1", &goals())
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push((event.as_str(), event.seller_id().map(str::to_string)));
    }
    assert_eq!(
        seen,
        vec![
            ("batch_started", None),
            ("saving_started", Some("s1".to_string())),
            ("saved", Some("s1".to_string())),
            ("saving_started", Some("s2".to_string())),
            ("saved", Some("s2".to_string())),
            ("batch_succeeded", None),
        ]
    );
}

#[tokio::test]
async fn failure_notifications_name_the_seller() {
    let store = RecordingStore::with_responses(vec![Err(PersistError::new("timeout"))]);
    let projector = ScriptedProjector::default();
    let pipeline = pipeline(&store, &projector);
    let mut events = pipeline.subscribe();
    let roster = Roster::from_sellers(vec![valid_seller("s1", "Ana")]).unwrap();

    pipeline
        .run_batch(&roster, "loja-1", &goals())
        .await
        .unwrap_err();

    let names: Vec<&str> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.as_str())
        .collect();
    assert_eq!(
        names,
        vec!["batch_started", "saving_started", "save_failed", "batch_failed"]
    );
}

#[tokio::test]
async fn save_one_persists_without_touching_batch_state() {
    let store = RecordingStore::default();
    let projector = ScriptedProjector::default();
    let pipeline = pipeline(&store, &projector);
    let roster =
        Roster::from_sellers(vec![valid_seller("s1", "Ana"), valid_seller("s2", "Bea")]).unwrap();

    pipeline.save_one(&roster, "loja-1", "s2").await.unwrap();

    assert_eq!(store.saved_ids().await, vec!["s2"]);
    assert!(projector.projected_ids().await.is_empty());
    assert_eq!(pipeline.batch_state(), BatchRunState::Idle);
    assert!(pipeline.save_states().is_empty());
}

#[tokio::test]
async fn save_one_twice_is_last_write_wins() {
    let store = RecordingStore::default();
    let projector = ScriptedProjector::default();
    let pipeline = pipeline(&store, &projector);
    let roster = Roster::from_sellers(vec![valid_seller("s1", "Ana")]).unwrap();

    pipeline.save_one(&roster, "loja-1", "s1").await.unwrap();
    let once = store.stored.lock().await.clone();
    pipeline.save_one(&roster, "loja-1", "s1").await.unwrap();
    let twice = store.stored.lock().await.clone();

    assert_eq!(once, twice);
    assert_eq!(twice.len(), 1);
}

#[tokio::test]
async fn save_one_reports_unknown_and_invalid_sellers() {
    let store = RecordingStore::default();
    let projector = ScriptedProjector::default();
    let pipeline = pipeline(&store, &projector);
    let roster = Roster::from_sellers(vec![seller(
        "s1",
        "Ana",
        text("muito"),
        num(1.0),
        num(1.0),
        num(1.0),
    )])
    .unwrap();

    let err = pipeline
        .save_one(&roster, "loja-1", "ghost")
        .await
        .unwrap_err();
    assert_eq!(err, BatchError::UnknownSeller("ghost".into()));

    let err = pipeline.save_one(&roster, "loja-1", "s1").await.unwrap_err();
    assert_eq!(err.step(), Some(Step::Validate));
    assert!(store.saved_ids().await.is_empty());
    assert!(pipeline.save_states().is_empty());
}

#[tokio::test]
async fn failed_batch_can_be_retried_in_full() {
    let store = RecordingStore::default();
    let projector =
        ScriptedProjector::with_responses(vec![Err(ProjectError::new("temporarily down"))]);
    let pipeline = pipeline(&store, &projector);
    let roster = Roster::from_sellers(vec![valid_seller("s1", "Ana")]).unwrap();

    assert!(pipeline.run_batch(&roster, "loja-1", &goals()).await.is_err());
    let aggregate = pipeline
        .run_batch(&roster, "loja-1", &goals())
        .await
        .unwrap();

    assert_eq!(aggregate.len(), 1);
    assert_eq!(store.saved_ids().await, vec!["s1", "s1"]);
    assert_eq!(pipeline.batch_state(), BatchRunState::Succeeded);
}
