use chrono::Utc;
use faultmedic::analysis::features::{extract_features, FEATURE_ORDER};
use faultmedic::analysis::model::{MlPredictor, NeuralNetwork};
use faultmedic::analysis::runner::PredictiveFaultDetector;
use faultmedic::analysis::{ModelKind, PredictionStatus, SeriesMap, TimeSeriesData};
use faultmedic::config::Config;
use faultmedic::driver::load_series;
use faultmedic::fault::FaultType;
use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

fn series(entries: Vec<(&str, Vec<f64>)>) -> SeriesMap {
    let now = Utc::now();
    entries
        .into_iter()
        .map(|(name, values)| {
            (
                name.to_string(),
                TimeSeriesData::from_values(name, values, now, Duration::from_secs(60)),
            )
        })
        .collect()
}

fn zero_network(bias2: Vec<f64>) -> NeuralNetwork {
    NeuralNetwork {
        input_size: FEATURE_ORDER.len(),
        hidden_size: 3,
        output_size: 4,
        weights1: vec![vec![0.0; 3]; FEATURE_ORDER.len()],
        weights2: vec![vec![0.0; 4]; 3],
        bias1: vec![0.0; 3],
        bias2,
    }
}

#[test]
fn test_all_zero_network_predicts_nothing() {
    let net = zero_network(vec![0.0; 4]);
    let output = net.forward(&[0.0; 10]).unwrap();
    assert_eq!(output, vec![0.5; 4]);

    let predictor = MlPredictor::with_network(net);
    let current = BTreeMap::from([("cpu_usage".to_string(), 0.99)]);
    let features = extract_features(&current, &series(vec![("cpu_usage", vec![0.9, 0.99])]));
    assert!(predictor.predict(&features).is_empty());
}

#[test]
fn test_confident_ml_signal_reaches_the_store() {
    let mut config = Config::default();
    config.prediction.enable_time_series = false;
    config.prediction.enable_trend = false;
    config.prediction.enable_correlation = false;

    // channel 3 (service unavailable) at sigmoid(4) ~ 0.982
    let detector = PredictiveFaultDetector::new(&config)
        .with_ml(MlPredictor::with_network(zero_network(vec![0.0, 0.0, 0.0, 4.0])));
    let stored = detector.predict(&series(vec![("error_rate", vec![0.01, 0.02, 0.4])]));

    assert_eq!(stored.len(), 1);
    let p = &stored[0];
    assert_eq!(p.predicted_type, FaultType::ServiceUnavailable);
    assert_eq!(p.target, "system");
    assert_eq!(p.contributors, vec![ModelKind::MachineLearning]);
    assert!(p.confidence() > 0.98);
    assert!(p.time_to_failure() < Duration::from_secs(15));
    assert!(p.features.contains_key("error_rate_volatility"));

    let stats = detector.statistics();
    assert_eq!(stats.total_predictions, 1);
    assert_eq!(stats.active_predictions, 1);
    assert_eq!(stats.predictions_by_status[&PredictionStatus::Pending], 1);
}

#[test]
fn test_agreeing_models_merge_into_one_prediction() {
    let mut config = Config::default();
    config.prediction.enable_correlation = false;
    config.prediction.enable_ml = false;
    config.prediction.horizon_secs = 3600;
    let detector = PredictiveFaultDetector::new(&config);

    // steady climb, then a sudden collapse on the last sample
    let mut values: Vec<f64> = (0..80).map(|i| 10.0 + 0.5 * i as f64).collect();
    values.push(0.0);
    let stored = detector.predict(&series(vec![("response_time", values)]));

    for p in &stored {
        assert_eq!(p.model_used, "ensemble");
        assert!(p.confidence() >= 0.7);
        assert!(p.time_to_failure() <= Duration::from_secs(3600));
    }
    // one merged prediction per (target, fault type)
    let keys: std::collections::BTreeSet<(String, FaultType)> =
        stored.iter().map(|p| (p.target.clone(), p.predicted_type)).collect();
    assert_eq!(keys.len(), stored.len());
}

#[test]
fn test_series_file_through_the_pipeline() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let cpu: Vec<String> = (0..60).map(|i| format!("{:.3}", 0.2 + 0.02 * i as f64)).collect();
    write!(
        file,
        r#"{{ "interval_secs": 30, "series": {{ "cpu_usage": [{}] }} }}"#,
        cpu.join(",")
    )
    .unwrap();

    let series = load_series(file.path()).unwrap();
    assert_eq!(series["cpu_usage"].len(), 60);

    let mut config = Config::default();
    config.prediction.enable_time_series = false;
    config.prediction.enable_correlation = false;
    config.prediction.enable_ml = false;
    config.prediction.horizon_secs = 3600;
    let detector = PredictiveFaultDetector::new(&config);

    let stored = detector.predict(&series);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].predicted_type, FaultType::ResourceExhaustion);
    assert_eq!(stored[0].target, "cpu_usage");

    let trend = detector.trend().unwrap();
    assert!(trend.change_points("cpu_usage").len() <= 100);

    let expired = detector.expire_stale(Utc::now() + chrono::Duration::hours(3));
    assert_eq!(expired.len(), 1);
    let stats = detector.statistics();
    assert_eq!(stats.accuracy_rate, 0.0);
    assert_eq!(detector.learning().metrics().predictions_made, 1);
    assert!(detector.active_predictions().is_empty());
}
