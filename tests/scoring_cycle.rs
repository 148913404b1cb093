use std::collections::HashMap;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use ndarray::{arr2, Array1};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use predict_sidecar::{
    models::{DataPoint, Metric, DURATION_LABEL, NAME_LABEL},
    recorder::Recorder,
    registry::{runtime::ModelRuntime, Model, ModelMetadata, Tensor},
    scoring::{ModelOutcome, ScaleError, Scorer, Stage},
    store::SeriesStore,
    Result, SidecarError,
};

/// Returns a fixed normalized value and remembers the inputs it saw.
struct FixedRuntime {
    value: f32,
    seen: Mutex<Vec<HashMap<String, Tensor>>>,
}

impl FixedRuntime {
    fn new(value: f32) -> Arc<Self> {
        Arc::new(Self {
            value,
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl ModelRuntime for FixedRuntime {
    fn run(&self, inputs: HashMap<String, Tensor>, outputs: &[String]) -> Result<Vec<Tensor>> {
        self.seen.lock().push(inputs);
        Ok(outputs
            .iter()
            .map(|_| arr2(&[[self.value]]).into_dyn())
            .collect())
    }
}

struct FailingRuntime;

impl ModelRuntime for FailingRuntime {
    fn run(&self, _inputs: HashMap<String, Tensor>, _outputs: &[String]) -> Result<Vec<Tensor>> {
        Err(SidecarError::InferenceFailed("session closed".into()))
    }
}

struct SlowRuntime;

impl ModelRuntime for SlowRuntime {
    fn run(&self, _inputs: HashMap<String, Tensor>, _outputs: &[String]) -> Result<Vec<Tensor>> {
        thread::sleep(Duration::from_millis(300));
        Ok(vec![arr2(&[[0.5f32]]).into_dyn()])
    }
}

/// Blocks every call until the sender side is dropped.
struct GatedRuntime {
    gate: Mutex<mpsc::Receiver<()>>,
    calls: Mutex<usize>,
}

impl GatedRuntime {
    fn new() -> (Arc<Self>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let runtime = Arc::new(Self {
            gate: Mutex::new(rx),
            calls: Mutex::new(0),
        });
        (runtime, tx)
    }
}

impl ModelRuntime for GatedRuntime {
    fn run(&self, _inputs: HashMap<String, Tensor>, _outputs: &[String]) -> Result<Vec<Tensor>> {
        *self.calls.lock() += 1;
        let _ = self.gate.lock().recv_timeout(Duration::from_secs(10));
        Ok(vec![arr2(&[[0.5f32]]).into_dyn()])
    }
}

/// Appends to the store it scores from while inference runs.
struct AppendingRuntime {
    store: SeriesStore,
}

impl ModelRuntime for AppendingRuntime {
    fn run(&self, _inputs: HashMap<String, Tensor>, _outputs: &[String]) -> Result<Vec<Tensor>> {
        self.store.append("cpu", &[DataPoint::new(1000.0, 1_800_000_000)]);
        Ok(vec![arr2(&[[1.0f32]]).into_dyn()])
    }
}

struct FlatOutputRuntime;

impl ModelRuntime for FlatOutputRuntime {
    fn run(&self, _inputs: HashMap<String, Tensor>, _outputs: &[String]) -> Result<Vec<Tensor>> {
        Ok(vec![Array1::from(vec![0.5f32]).into_dyn()])
    }
}

#[derive(Default)]
struct MemoryRecorder {
    metrics: Mutex<Vec<Metric>>,
}

impl Recorder for MemoryRecorder {
    fn record(&self, metric: Metric) {
        self.metrics.lock().push(metric);
    }
}

fn metadata(key: &str, target: &str, columns: &[&str], input_steps: usize) -> ModelMetadata {
    ModelMetadata {
        model_key: key.into(),
        input_steps,
        input_operation: "lstm_input".into(),
        output_steps: 1,
        output_operation: "dense/BiasAdd".into(),
        predict_future_duration: 300,
        target: target.into(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
    }
}

fn model(runtime: Arc<dyn ModelRuntime>, meta: ModelMetadata) -> Model {
    Model::new(runtime, meta).unwrap()
}

fn points(values: &[f64]) -> Vec<DataPoint> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| DataPoint::new(*v, 1_700_000_000 + i as i64 * 60))
        .collect()
}

fn scorer(store: &SeriesStore, models: Vec<Model>, recorder: Arc<MemoryRecorder>) -> Scorer {
    Scorer::new(store.clone(), models, recorder, Duration::from_millis(100))
}

fn failure(outcome: Option<&ModelOutcome>) -> (Stage, &SidecarError) {
    match outcome {
        Some(ModelOutcome::Failed { stage, error }) => (*stage, error),
        other => panic!("expected a failure, got {:?}", other),
    }
}

#[test_log::test(tokio::test)]
async fn test_publishes_denormalized_prediction() {
    let store = SeriesStore::new(10);
    store.append("btc_usd", &points(&[1.0, 10.0, 20.0, 30.0]));

    let recorder = Arc::new(MemoryRecorder::default());
    let runtime = FixedRuntime::new(0.5);
    let scorer = scorer(
        &store,
        vec![model(runtime.clone(), metadata("m1", "btc_usd", &["btc_usd"], 3))],
        recorder.clone(),
    );

    let report = scorer.score_models().await;
    let published: Vec<_> = report.published().cloned().collect();
    assert_eq!(published.len(), 1);

    let metric = &published[0];
    assert_eq!(metric.labels[NAME_LABEL], "predict_sidecar:btc_usd");
    assert_eq!(metric.labels[DURATION_LABEL], "300");
    assert!((metric.data_point.value - 20.0).abs() < 1e-6);
    assert!(metric.data_point.timestamp > 1_700_000_000);

    assert_eq!(recorder.metrics.lock().clone(), published);

    let seen = runtime.seen.lock();
    let input = &seen[0]["lstm_input"];
    assert_eq!(input.shape(), &[1, 3, 1]);
    assert_eq!(input.iter().copied().collect::<Vec<_>>(), vec![0.0, 0.5, 1.0]);
}

#[tokio::test]
async fn test_readiness_requires_more_than_input_steps() {
    let store = SeriesStore::new(10);
    store.append("cpu", &points(&[1.0, 2.0, 3.0]));

    let recorder = Arc::new(MemoryRecorder::default());
    let scorer = scorer(
        &store,
        vec![model(FixedRuntime::new(0.5), metadata("m1", "cpu", &["cpu"], 3))],
        recorder.clone(),
    );

    let report = scorer.score_models().await;
    assert!(matches!(report.outcome("m1"), Some(ModelOutcome::NotReady)));
    assert!(recorder.metrics.lock().is_empty());

    store.append("cpu", &points(&[4.0]));
    let report = scorer.score_models().await;
    assert!(matches!(report.outcome("m1"), Some(ModelOutcome::Published(_))));
    assert_eq!(recorder.metrics.lock().len(), 1);
}

#[tokio::test]
async fn test_unknown_target_is_not_ready() {
    let store = SeriesStore::new(10);
    store.append("other", &points(&[1.0, 2.0, 3.0, 4.0]));

    let scorer = scorer(
        &store,
        vec![model(FixedRuntime::new(0.5), metadata("m1", "cpu", &["other"], 3))],
        Arc::new(MemoryRecorder::default()),
    );
    let report = scorer.score_models().await;
    assert!(matches!(report.outcome("m1"), Some(ModelOutcome::NotReady)));
}

#[tokio::test]
async fn test_target_scale_applies_when_target_is_not_a_column() {
    let store = SeriesStore::new(10);
    store.append("load", &points(&[0.0, 1.0, 2.0, 3.0, 4.0]));
    store.append("price", &points(&[999.0, 100.0, 200.0, 300.0]));

    let runtime = FixedRuntime::new(1.0);
    let scorer = scorer(
        &store,
        vec![model(runtime.clone(), metadata("m1", "price", &["load"], 3))],
        Arc::new(MemoryRecorder::default()),
    );

    let report = scorer.score_models().await;
    let value = report.published().next().unwrap().data_point.value;
    assert!((value - 300.0).abs() < 1e-6);

    let seen = runtime.seen.lock();
    assert_eq!(
        seen[0]["lstm_input"].iter().copied().collect::<Vec<_>>(),
        vec![0.0, 0.5, 1.0]
    );
}

#[tokio::test]
async fn test_two_column_layout_is_step_by_column() {
    let store = SeriesStore::new(10);
    store.append("a", &points(&[0.0, 5.0, 10.0, 20.0]));
    store.append("b", &points(&[8.0, 4.0, 0.0]));

    let runtime = FixedRuntime::new(0.0);
    let scorer = scorer(
        &store,
        vec![model(runtime.clone(), metadata("m1", "a", &["a", "b"], 3))],
        Arc::new(MemoryRecorder::default()),
    );
    scorer.score_models().await;

    let seen = runtime.seen.lock();
    let input = &seen[0]["lstm_input"];
    assert_eq!(input.shape(), &[1, 3, 2]);
    // a: [5, 10, 20] -> [0, 1/3, 1]; b: [8, 4, 0] -> [1, 0.5, 0]
    assert_eq!(input[[0, 0, 0]], 0.0);
    assert_eq!(input[[0, 0, 1]], 1.0);
    assert_eq!(input[[0, 1, 1]], 0.5);
    assert_eq!(input[[0, 2, 0]], 1.0);
    assert_eq!(input[[0, 2, 1]], 0.0);
}

#[tokio::test]
async fn test_short_column_fails_assembly() {
    let store = SeriesStore::new(10);
    store.append("a", &points(&[1.0, 2.0, 3.0, 4.0]));
    store.append("b", &points(&[1.0, 2.0]));

    let runtime = FixedRuntime::new(0.5);
    let scorer = scorer(
        &store,
        vec![model(runtime.clone(), metadata("m1", "a", &["a", "b"], 3))],
        Arc::new(MemoryRecorder::default()),
    );

    let report = scorer.score_models().await;
    let (stage, error) = failure(report.outcome("m1"));
    assert_eq!(stage, Stage::Assembling);
    assert!(matches!(
        error,
        SidecarError::InsufficientHistory { required: 3, available: 2, .. }
    ));
    assert!(runtime.seen.lock().is_empty());
}

#[tokio::test]
async fn test_missing_column_fails_assembly() {
    let store = SeriesStore::new(10);
    store.append("a", &points(&[1.0, 2.0, 3.0, 4.0]));

    let scorer = scorer(
        &store,
        vec![model(FixedRuntime::new(0.5), metadata("m1", "a", &["a", "gone"], 3))],
        Arc::new(MemoryRecorder::default()),
    );
    let report = scorer.score_models().await;
    let (stage, error) = failure(report.outcome("m1"));
    assert_eq!(stage, Stage::Assembling);
    assert!(matches!(error, SidecarError::MissingSeries(name) if name == "gone"));
}

#[tokio::test]
async fn test_constant_target_window_is_not_published() {
    let store = SeriesStore::new(10);
    store.append("x", &points(&[1.0, 2.0, 3.0, 4.0]));
    store.append("y", &points(&[7.0, 5.0, 5.0, 5.0]));

    let recorder = Arc::new(MemoryRecorder::default());
    let scorer = scorer(
        &store,
        vec![model(FixedRuntime::new(0.5), metadata("m1", "y", &["x"], 3))],
        recorder.clone(),
    );

    let report = scorer.score_models().await;
    let (stage, error) = failure(report.outcome("m1"));
    assert_eq!(stage, Stage::Denormalizing);
    assert!(matches!(
        error,
        SidecarError::Scale { source: ScaleError::Degenerate { .. }, .. }
    ));
    assert!(recorder.metrics.lock().is_empty());
}

#[tokio::test]
async fn test_inference_error_skips_only_that_model() {
    let store = SeriesStore::new(10);
    store.append("cpu", &points(&[1.0, 2.0, 3.0, 4.0]));

    let recorder = Arc::new(MemoryRecorder::default());
    let scorer = scorer(
        &store,
        vec![
            model(Arc::new(FailingRuntime), metadata("broken", "cpu", &["cpu"], 3)),
            model(FixedRuntime::new(0.0), metadata("healthy", "cpu", &["cpu"], 3)),
        ],
        recorder.clone(),
    );

    let report = scorer.score_models().await;
    assert_eq!(report.models.len(), 2);

    let (stage, error) = failure(report.outcome("broken"));
    assert_eq!(stage, Stage::Inferring);
    assert!(matches!(error, SidecarError::InferenceFailed(_)));

    assert!(matches!(report.outcome("healthy"), Some(ModelOutcome::Published(_))));
    let recorded = recorder.metrics.lock();
    assert_eq!(recorded.len(), 1);
    assert!((recorded[0].data_point.value - 2.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_slow_inference_times_out() {
    let store = SeriesStore::new(10);
    store.append("cpu", &points(&[1.0, 2.0, 3.0, 4.0]));

    let scorer = scorer(
        &store,
        vec![model(Arc::new(SlowRuntime), metadata("slow", "cpu", &["cpu"], 3))],
        Arc::new(MemoryRecorder::default()),
    );
    let report = scorer.score_models().await;
    let (stage, error) = failure(report.outcome("slow"));
    assert_eq!(stage, Stage::Inferring);
    assert!(matches!(error, SidecarError::InferenceTimeout(_)));
}

#[tokio::test]
async fn test_unexpected_output_shape() {
    let store = SeriesStore::new(10);
    store.append("cpu", &points(&[1.0, 2.0, 3.0, 4.0]));

    let scorer = scorer(
        &store,
        vec![model(Arc::new(FlatOutputRuntime), metadata("flat", "cpu", &["cpu"], 3))],
        Arc::new(MemoryRecorder::default()),
    );
    let report = scorer.score_models().await;
    let (stage, error) = failure(report.outcome("flat"));
    assert_eq!(stage, Stage::Inferring);
    assert!(matches!(error, SidecarError::UnexpectedOutput(_)));
}

#[tokio::test]
async fn test_non_finite_output_is_rejected() {
    let store = SeriesStore::new(10);
    store.append("cpu", &points(&[1.0, 2.0, 3.0, 4.0]));

    let recorder = Arc::new(MemoryRecorder::default());
    let scorer = scorer(
        &store,
        vec![model(FixedRuntime::new(f32::NAN), metadata("nan", "cpu", &["cpu"], 3))],
        recorder.clone(),
    );
    let report = scorer.score_models().await;
    let (stage, error) = failure(report.outcome("nan"));
    assert_eq!(stage, Stage::Denormalizing);
    assert!(matches!(error, SidecarError::NonFinitePrediction { .. }));
    assert!(recorder.metrics.lock().is_empty());
}

#[test]
fn test_hung_model_does_not_starve_others() {
    // Two blocking threads: one can stay stuck without starving the healthy model
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .max_blocking_threads(2)
        .enable_all()
        .build()
        .unwrap();

    rt.block_on(async {
        let store = SeriesStore::new(10);
        store.append("cpu", &points(&[1.0, 2.0, 3.0, 4.0]));

        let (hung, release) = GatedRuntime::new();
        let scorer = scorer(
            &store,
            vec![
                model(hung.clone(), metadata("hung", "cpu", &["cpu"], 3)),
                model(FixedRuntime::new(1.0), metadata("healthy", "cpu", &["cpu"], 3)),
            ],
            Arc::new(MemoryRecorder::default()),
        );

        let report = scorer.score_models().await;
        let (stage, error) = failure(report.outcome("hung"));
        assert_eq!(stage, Stage::Inferring);
        assert!(matches!(error, SidecarError::InferenceTimeout(_)));
        assert!(matches!(report.outcome("healthy"), Some(ModelOutcome::Published(_))));

        for _ in 0..4 {
            let report = scorer.score_models().await;
            let (stage, error) = failure(report.outcome("hung"));
            assert_eq!(stage, Stage::Inferring);
            assert!(matches!(error, SidecarError::InferenceBusy(name) if name == "hung"));
            assert!(matches!(report.outcome("healthy"), Some(ModelOutcome::Published(_))));
        }
        assert_eq!(*hung.calls.lock(), 1);

        drop(release);
        let hung_model = &scorer.models()[0];
        for _ in 0..100 {
            if !hung_model.is_inferring() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!hung_model.is_inferring());

        let report = scorer.score_models().await;
        assert_eq!(report.published().count(), 2);
        assert_eq!(*hung.calls.lock(), 2);
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_store_is_not_locked_during_inference() {
    let store = SeriesStore::new(10);
    store.append("cpu", &points(&[1.0, 10.0, 20.0, 30.0]));

    let recorder = Arc::new(MemoryRecorder::default());
    let runtime = Arc::new(AppendingRuntime {
        store: store.clone(),
    });
    let scorer = scorer(
        &store,
        vec![model(runtime, metadata("m1", "cpu", &["cpu"], 3))],
        recorder.clone(),
    );

    let report = scorer.score_models().await;
    // Scaled with the window read before inference: [10, 20, 30], not [20, 30, 1000]
    let value = report.published().next().unwrap().data_point.value;
    assert!((value - 30.0).abs() < 1e-6);
    assert_eq!(store.read("cpu").unwrap().last(), Some(&DataPoint::new(1000.0, 1_800_000_000)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_stay_bounded_while_scoring() {
    const MAX_POINTS: usize = 8;
    let store = SeriesStore::new(MAX_POINTS);
    store.append("cpu", &points(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]));

    let scorer = Arc::new(scorer(
        &store,
        vec![model(FixedRuntime::new(0.5), metadata("m1", "cpu", &["cpu"], 3))],
        Arc::new(MemoryRecorder::default()),
    ));

    let writers: Vec<_> = (0..4)
        .map(|writer| {
            let store = store.clone();
            tokio::spawn(async move {
                for round in 0..50usize {
                    // Batches of 1..=10 points, every value distinct
                    let batch: Vec<_> = (0..round % 10 + 1)
                        .map(|i| DataPoint::new((writer * 10_000 + round * 20 + i) as f64, round as i64))
                        .collect();
                    store.append("cpu", &batch);
                    assert!(store.len("cpu").unwrap() <= MAX_POINTS);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let cycles = {
        let scorer = scorer.clone();
        let store = store.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                let report = scorer.score_models().await;
                assert!(matches!(report.outcome("m1"), Some(ModelOutcome::Published(_))));
                assert!(store.len("cpu").unwrap() <= MAX_POINTS);
                tokio::task::yield_now().await;
            }
        })
    };

    for writer in writers {
        writer.await.unwrap();
    }
    cycles.await.unwrap();
    assert!(store.len("cpu").unwrap() <= MAX_POINTS);
}
