//! End-to-end runs of the two-round protocol over in-process sites.
//!
//! Tests cover:
//! - Pooled count, mean and variance of HADS scores across sites
//! - Suppression of small sites and strata
//! - Absent versus suppressed cells
//! - Incomplete rounds (failing and crashing sites)
//! - Stratum boundaries and idempotence

use std::sync::Arc;

use fedscore::adapters::{HadsScorer, InProcessDispatcher, LaplaceMechanism};
use fedscore::application::PrivacyGuard;
use fedscore::domain::{CellValue, Round, Row, SiteRequest, SiteResponse, StratumLabel};
use fedscore::ports::SiteHandler;
use fedscore::{
    FedScoreError, FederatedScoringService, GlobalAggregateRecord, PrivacyConfig, SiteId,
    SiteNode, SitePartition, TaskInput,
};

const ODD_ITEMS: [usize; 7] = [1, 3, 5, 7, 9, 11, 13];

fn task(stratify: Option<&str>) -> TaskInput {
    let variable_info: Vec<String> = (1..=14)
        .map(|i| format!(r#""question_{i}": "Q{i}""#))
        .collect();
    let stratify = stratify
        .map(|s| format!(r#", "variables_to_stratify": {s}"#))
        .unwrap_or_default();
    TaskInput::from_json(&format!(
        r#"{{"items_to_score": {{"scale_to_score": ["anxiety", "depression"],
            "variable_info": {{{}}}}}{stratify}}}"#,
        variable_info.join(", ")
    ))
    .expect("Valid task")
}

/// Deterministic responses: item `q` of respondent `i` at site `seed`.
fn response(seed: usize, i: usize, q: usize) -> f64 {
    ((seed * 7 + i * 3 + q * q) % 4) as f64
}

fn respondents(seed: usize, n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| {
            let mut row: Row = (1..=14)
                .map(|q| (format!("Q{q}"), CellValue::Number(response(seed, i, q))))
                .collect();
            row.insert("Age".to_string(), CellValue::Number(if i % 2 == 0 { 39.0 } else { 40.0 }));
            row
        })
        .collect()
}

fn anxiety_scores(seed: usize, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| ODD_ITEMS.iter().map(|q| response(seed, i, *q)).sum())
        .collect()
}

fn site_node(name: &str, rows: Vec<Row>, config: PrivacyConfig) -> Arc<dyn SiteHandler> {
    let guard = PrivacyGuard::new(config, Arc::new(LaplaceMechanism::new())).expect("Valid config");
    Arc::new(SiteNode::new(
        SiteId::from(name),
        SitePartition::new(rows),
        guard,
        Arc::new(HadsScorer::new()),
    ))
}

fn service(
    sites: Vec<Arc<dyn SiteHandler>>,
) -> FederatedScoringService<InProcessDispatcher, HadsScorer> {
    let dispatcher = sites
        .into_iter()
        .fold(InProcessDispatcher::new(), InProcessDispatcher::with_site);
    FederatedScoringService::new(Arc::new(dispatcher), Arc::new(HadsScorer::new()))
}

fn no_noise() -> PrivacyConfig {
    PrivacyConfig::without_noise(10)
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn sample_variance(xs: &[f64]) -> f64 {
    let m = mean(xs);
    xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64
}

fn all() -> StratumLabel {
    StratumLabel::all()
}

#[cfg(test)]
mod pooling {
    use super::*;

    #[test]
    fn test_two_sites_twenty_respondents() {
        let service = service(vec![
            site_node("north", respondents(1, 20), no_noise()),
            site_node("south", respondents(2, 20), no_noise()),
        ]);
        let record = service.run(&task(None), None).expect("Should complete");

        let mut scores = anxiety_scores(1, 20);
        scores.extend(anxiety_scores(2, 20));

        let cell = record.numeric_cell("anxiety", &all()).expect("Anxiety cell");
        assert_eq!(cell.count, Some(40));
        assert!((cell.mean.expect("Mean") - mean(&scores)).abs() < 1e-9);
        assert!((cell.variance.expect("Variance") - sample_variance(&scores)).abs() < 1e-9);
        let sd = cell.standard_deviation.expect("Sd");
        assert!((sd - sample_variance(&scores).sqrt()).abs() < 1e-9);
        assert!(!cell.incomplete);
        assert!(!cell.suppressed);

        assert!(record.numeric_cell("depression", &all()).is_some());
        let bands = record.categorical_cell("anxiety_severity", &all()).expect("Band cell");
        assert_eq!(bands.count, Some(40));
        assert_eq!(bands.categories.values().sum::<u64>(), 40);
    }

    #[test]
    fn test_small_site_is_suppressed_and_flagged() {
        let service = service(vec![
            site_node("north", respondents(1, 20), no_noise()),
            site_node("south", respondents(2, 20), no_noise()),
            site_node("tiny", respondents(3, 8), no_noise()),
        ]);
        let record = service.run(&task(None), None).expect("Should complete");

        let mut scores = anxiety_scores(1, 20);
        scores.extend(anxiety_scores(2, 20));

        let cell = record.numeric_cell("anxiety", &all()).expect("Anxiety cell");
        assert_eq!(cell.count, Some(40));
        assert!((cell.mean.expect("Mean") - mean(&scores)).abs() < 1e-9);
        assert!((cell.variance.expect("Variance") - sample_variance(&scores)).abs() < 1e-9);
        assert!(cell.incomplete);
        assert_eq!(cell.suppressed_sites, vec![SiteId::from("tiny")]);
    }

    #[test]
    fn test_everything_suppressed_stays_in_output() {
        let service = service(vec![
            site_node("a", respondents(1, 5), no_noise()),
            site_node("b", respondents(2, 6), no_noise()),
        ]);
        let record = service.run(&task(None), None).expect("Should complete");

        let cell = record.numeric_cell("anxiety", &all()).expect("Cell kept");
        assert!(cell.suppressed);
        assert_eq!(cell.count, None);
        assert_eq!(cell.mean, None);
        assert_eq!(cell.variance, None);
    }

    #[test]
    fn test_organisation_subset() {
        let service = service(vec![
            site_node("north", respondents(1, 20), no_noise()),
            site_node("south", respondents(2, 20), no_noise()),
        ]);
        let record = service
            .run(&task(None), Some(&[SiteId::from("south")][..]))
            .expect("Should complete");

        assert_eq!(record.sites, vec![SiteId::from("south")]);
        let cell = record.numeric_cell("anxiety", &all()).expect("Anxiety cell");
        assert_eq!(cell.count, Some(20));
    }

    #[test]
    fn test_runs_are_idempotent_without_noise() {
        let service = service(vec![
            site_node("north", respondents(1, 20), no_noise()),
            site_node("south", respondents(2, 15), no_noise()),
        ]);
        let task = task(Some(r#"{"Age": {"end": 39, "datatype": "int"}}"#));
        let first = service.run(&task, None).expect("Should complete");
        let second = service.run(&task, None).expect("Should complete");
        assert_eq!(first, second);
    }

    #[test]
    fn test_noisy_run_releases_no_small_cells() {
        let config = PrivacyConfig::default();
        let service = service(vec![
            site_node("north", respondents(1, 30), config),
            site_node("tiny", respondents(2, 4), config),
        ]);
        let record = service.run(&task(None), None).expect("Should complete");

        let cell = record.numeric_cell("anxiety", &all()).expect("Anxiety cell");
        assert_eq!(cell.suppressed_sites, vec![SiteId::from("tiny")]);
        assert!(cell.count.is_some());
        assert!(cell.variance.map_or(true, |v| v >= 0.0));

        let json = serde_json::to_string(&record).expect("Should serialize");
        let parsed: GlobalAggregateRecord = serde_json::from_str(&json).expect("Should parse");
        assert_eq!(parsed.sites, record.sites);
    }
}

#[cfg(test)]
mod strata {
    use super::*;

    #[test]
    fn test_age_upper_bound_includes_39_excludes_40() {
        let config = PrivacyConfig::without_noise(1);
        let service = service(vec![site_node("a", respondents(1, 20), config)]);
        let record = service
            .run(&task(Some(r#"{"Age": {"end": 39, "datatype": "int"}}"#)), None)
            .expect("Should complete");

        // even respondents are 39, odd respondents are 40
        let young = record
            .numeric_cell("anxiety", &StratumLabel::new("Age <= 39"))
            .expect("Stratum cell");
        assert_eq!(young.count, Some(10));

        let expected: Vec<f64> = anxiety_scores(1, 20).into_iter().step_by(2).collect();
        assert!((young.mean.expect("Mean") - mean(&expected)).abs() < 1e-9);
    }

    #[test]
    fn test_absent_stratifier_is_not_suppression() {
        let mut with_sex = respondents(1, 20);
        for (i, row) in with_sex.iter_mut().enumerate() {
            row.insert("Sex".to_string(), CellValue::from(if i < 12 { "F" } else { "M" }));
        }
        let config = PrivacyConfig::without_noise(10);
        let service = service(vec![
            site_node("with-sex", with_sex, config),
            site_node("without-sex", respondents(2, 20), config),
        ]);
        let record = service
            .run(&task(Some(r#"{"Sex": {"values": ["F"], "datatype": "str"}}"#)), None)
            .expect("Should complete");

        let cell = record
            .numeric_cell("anxiety", &StratumLabel::new("Sex in [F]"))
            .expect("Stratum cell");
        assert_eq!(cell.count, Some(12));
        assert!(!cell.incomplete);
        assert!(!cell.suppressed);
        assert_eq!(cell.absent_sites, vec![SiteId::from("without-sex")]);
        assert!(cell.suppressed_sites.is_empty());
    }

    #[test]
    fn test_small_stratum_suppressed_while_all_released() {
        let service = service(vec![site_node("a", respondents(1, 20), no_noise())]);
        let record = service
            .run(&task(Some(r#"{"Age": {"start": 41, "datatype": "int"}}"#)), None)
            .expect("Should complete");

        assert_eq!(record.numeric_cell("anxiety", &all()).and_then(|c| c.count), Some(20));
        let older = record
            .numeric_cell("anxiety", &StratumLabel::new("Age >= 41"))
            .expect("Stratum cell");
        assert!(older.suppressed);
    }
}

#[cfg(test)]
mod incomplete_rounds {
    use super::*;

    /// A site that crashes while answering.
    struct CrashingSite(SiteId);

    impl SiteHandler for CrashingSite {
        fn site(&self) -> &SiteId {
            &self.0
        }

        fn handle(&self, _request: &SiteRequest) -> fedscore::Result<SiteResponse> {
            panic!("site process died");
        }
    }

    /// A site whose local computation fails.
    struct FailingSite(SiteId);

    impl SiteHandler for FailingSite {
        fn site(&self) -> &SiteId {
            &self.0
        }

        fn handle(&self, _request: &SiteRequest) -> fedscore::Result<SiteResponse> {
            Err(FedScoreError::UserInput("partition has no usable rows".to_string()))
        }
    }

    #[test]
    fn test_silent_site_fails_the_round() {
        let service = service(vec![
            site_node("a", respondents(1, 20), no_noise()),
            site_node("b", respondents(2, 20), no_noise()),
            Arc::new(CrashingSite(SiteId::from("c"))),
        ]);

        let err = service.run(&task(None), None).expect_err("Round one incomplete");
        match err {
            FedScoreError::IncompleteRound {
                round,
                missing,
                failed,
            } => {
                assert_eq!(round, Round::GeneralStatistics);
                assert_eq!(missing, vec![SiteId::from("c")]);
                assert!(failed.is_empty());
            }
            other => panic!("expected an incomplete round, got {other}"),
        }
    }

    #[test]
    fn test_site_error_fails_the_round() {
        let service = service(vec![
            site_node("a", respondents(1, 20), no_noise()),
            Arc::new(FailingSite(SiteId::from("b"))),
        ]);

        let err = service.run(&task(None), None).expect_err("Site b reports an error");
        let FedScoreError::IncompleteRound { round, missing, failed } = err else {
            panic!("expected an incomplete round");
        };
        assert_eq!(round, Round::GeneralStatistics);
        assert!(missing.is_empty());
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, SiteId::from("b"));
    }

    #[test]
    fn test_stratifier_clashing_with_scored_variable_rejected() {
        let service = service(vec![
            site_node("a", respondents(1, 20), no_noise()),
            site_node("b", respondents(2, 20), no_noise()),
        ]);

        for stratify in [
            r#"{"anxiety": {"start": 8, "datatype": "int"}}"#,
            r#"{"anxiety_severity": {"values": ["normal"], "datatype": "str"}}"#,
        ] {
            let err = service
                .run(&task(Some(stratify)), None)
                .expect_err("Rejected before dispatch");
            assert!(matches!(err, FedScoreError::UserInput(_)), "got {err}");
        }
    }

    #[test]
    fn test_invalid_task_rejected_before_dispatch() {
        let service = service(vec![site_node("a", respondents(1, 20), no_noise())]);
        let err = service
            .run_json(r#"{"items_to_score": {"scale_to_score": [], "variable_info": {}}}"#, None)
            .expect_err("Invalid task");
        assert!(matches!(err, FedScoreError::UserInput(_)));
    }
}
