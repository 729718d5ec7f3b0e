use chrono::{Datelike, NaiveDate};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use portfolio_advisor_core::estimation::{CovarianceMatrix, ReturnVector};
use portfolio_advisor_core::market_data::{
    InMemoryPriceProvider, LookbackPeriod, PriceSeriesProvider, PriceTable, ProviderError,
};
use portfolio_advisor_core::optimization::FrontierSolver;
use portfolio_advisor_core::{InstrumentId, OptimizerConfig, PortfolioError, PortfolioOptimizer};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn ids(names: &[&str]) -> Vec<InstrumentId> {
    names.iter().map(|s| s.to_string()).collect()
}

fn business_days(count: usize) -> Vec<NaiveDate> {
    let mut date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        if date.weekday().number_from_monday() <= 5 {
            out.push(date);
        }
        date = date.succ_opt().unwrap();
    }
    out
}

fn path(start: f64, pattern: &[f64], count: usize) -> Vec<Option<f64>> {
    let mut price = start;
    let mut out = vec![Some(price)];
    for i in 1..count {
        price *= 1.0 + pattern[i % pattern.len()];
        out.push(Some(price));
    }
    out
}

const ROWS: usize = 120;

fn market() -> PriceTable {
    let mut gappy = path(30.0, &[0.002, 0.003, -0.001, 0.004, -0.002], ROWS);
    for i in (10..ROWS).step_by(9) {
        gappy[i] = None;
    }
    PriceTable::new(
        business_days(ROWS),
        vec![
            ("AAPL".into(), path(180.0, &[0.010, -0.004, 0.006, -0.002], ROWS)),
            ("MSFT".into(), path(400.0, &[-0.003, 0.008, 0.001, 0.002], ROWS)),
            ("XOM".into(), path(110.0, &[0.004, 0.002, -0.006, 0.005], ROWS)),
            ("GAPPY".into(), gappy),
            ("DELISTED".into(), vec![None; ROWS]),
            ("TWIN".into(), path(180.0, &[0.010, -0.004, 0.006, -0.002], ROWS)),
            ("FLAT1".into(), vec![Some(10.0); ROWS]),
            ("FLAT2".into(), vec![Some(20.0); ROWS]),
        ],
    )
    .unwrap()
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn optimizer() -> PortfolioOptimizer<InMemoryPriceProvider> {
    init_logging();
    PortfolioOptimizer::new(InMemoryPriceProvider::new(market()), OptimizerConfig::default()).unwrap()
}

struct FailingProvider(ProviderError);

impl PriceSeriesProvider for FailingProvider {
    fn fetch(
        &self,
        _instruments: &[InstrumentId],
        _period: &LookbackPeriod,
        _timeout: Duration,
    ) -> Result<PriceTable, ProviderError> {
        Err(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// Behaviour
// ---------------------------------------------------------------------------

#[test]
fn test_two_asset_textbook_allocation() {
    init_logging();
    let names = ids(&["LOW", "HIGH"]);
    let mu = ReturnVector::new(names.clone(), vec![0.08, 0.12]).unwrap();
    let sigma = CovarianceMatrix::new(names, vec![vec![0.04, 0.01], vec![0.01, 0.09]]).unwrap();
    let solution = FrontierSolver::new(0.0).max_sharpe(&mu, &sigma).unwrap();

    let w = solution.weights.weights();
    assert!((w[0] - 0.6).abs() < 1e-9);
    assert!((w[1] - 0.4).abs() < 1e-9);
    // Diversified Sharpe beats each asset alone (0.4 for both)
    assert!(solution.performance.sharpe_ratio > 0.52);
}

#[test]
fn test_recommendation_keys_and_sum() {
    let request = ids(&["AAPL", "MSFT", "XOM"]);
    let rec = optimizer().optimize(&request, "1y").unwrap();
    assert!(!rec.is_empty());
    for (id, w) in rec.iter() {
        assert!(request.contains(id));
        assert!(w > rust_decimal::Decimal::ZERO);
    }
    let total: f64 = rec.to_map().values().sum();
    assert!((total - 1.0).abs() <= 1e-3, "total {}", total);
}

#[test]
fn test_repeated_requests_are_identical() {
    let request = ids(&["AAPL", "MSFT", "XOM"]);
    let opt = optimizer();
    let first = opt.optimize(&request, "6mo").unwrap();
    let second = opt.optimize(&request, "6mo").unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_single_observation_is_insufficient() {
    let table = PriceTable::new(business_days(1), vec![("ONLY".into(), vec![Some(10.0)])]).unwrap();
    let opt = PortfolioOptimizer::new(InMemoryPriceProvider::new(table), OptimizerConfig::default())
        .unwrap();
    let err = opt.optimize(&ids(&["ONLY"]), "1y").unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_DATA");
}

#[test]
fn test_identical_series_fail_to_optimize() {
    let err = optimizer()
        .optimize(&ids(&["AAPL", "TWIN"]), "1y")
        .unwrap_err();
    assert_eq!(err.code(), "OPTIMIZATION_FAILED");
    match err {
        PortfolioError::Optimization { instruments, .. } => {
            assert_eq!(instruments, ids(&["AAPL", "TWIN"]));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_returns_at_risk_free_rate() {
    let err = optimizer()
        .optimize(&ids(&["FLAT1", "FLAT2"]), "1y")
        .unwrap_err();
    assert_eq!(err.code(), "NO_POSITIVE_EXPECTED_RETURN");

    let config = OptimizerConfig {
        risk_free_rate: 5.0,
        ..OptimizerConfig::default()
    };
    let opt = PortfolioOptimizer::new(InMemoryPriceProvider::new(market()), config).unwrap();
    let err = opt.optimize(&ids(&["AAPL", "MSFT"]), "1y").unwrap_err();
    assert_eq!(err.code(), "NO_POSITIVE_EXPECTED_RETURN");
}

#[test]
fn test_missing_data_is_dropped_or_tolerated() {
    let out = optimizer()
        .optimize_detailed(&ids(&["AAPL", "MSFT", "GAPPY", "DELISTED"]), "1y")
        .unwrap();
    let report = out.result;
    assert_eq!(report.dropped_instruments, ids(&["DELISTED"]));
    assert_eq!(report.retained_instruments, ids(&["AAPL", "MSFT", "GAPPY"]));
    assert!(report.recommendation.get("DELISTED").is_none());
    assert!((report.raw_weights.sum() - 1.0).abs() < 1e-6);
    assert!(out.warnings.iter().any(|w| w.contains("DELISTED")));
}

#[test]
fn test_provider_failures_become_data_unavailable() {
    let failures = [
        ProviderError::Unavailable("upstream returned 503".into()),
        ProviderError::Timeout(Duration::from_secs(30)),
        ProviderError::UnknownInstrument("NOPE".into()),
    ];
    for failure in failures {
        let opt = PortfolioOptimizer::new(FailingProvider(failure.clone()), OptimizerConfig::default())
            .unwrap();
        let err = opt.optimize(&ids(&["AAPL", "MSFT"]), "1y").unwrap_err();
        assert_eq!(err.code(), "DATA_UNAVAILABLE");
        assert!(err.is_retryable());
        match err {
            PortfolioError::DataUnavailable {
                instruments,
                period,
                reason,
            } => {
                assert_eq!(instruments, ids(&["AAPL", "MSFT"]));
                assert_eq!(period, "1y");
                assert_eq!(reason, failure.to_string());
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

#[test]
fn test_unknown_instrument_from_in_memory_provider() {
    let err = optimizer().optimize(&ids(&["AAPL", "NOPE"]), "1y").unwrap_err();
    assert_eq!(err.code(), "DATA_UNAVAILABLE");
}

#[test]
fn test_weight_cap_from_config() {
    let config = OptimizerConfig {
        max_weight: Some(0.4),
        ..OptimizerConfig::default()
    };
    let opt = PortfolioOptimizer::new(InMemoryPriceProvider::new(market()), config).unwrap();
    let out = opt
        .optimize_detailed(&ids(&["AAPL", "MSFT", "XOM"]), "1y")
        .unwrap();
    for w in out.result.raw_weights.weights() {
        assert!(*w <= 0.4 + 1e-6);
    }
}

#[test]
fn test_optimizer_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<PortfolioOptimizer<InMemoryPriceProvider>>();

    let opt = Arc::new(optimizer());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let opt = Arc::clone(&opt);
            std::thread::spawn(move || opt.optimize(&ids(&["AAPL", "MSFT", "XOM"]), "1y").unwrap())
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
}
