//! Federated scoring service: the coordinator side of the two-round protocol.
//!
//! Round one collects guarded counts and means and pools them. Round two
//! broadcasts the pooled means and collects squared deviations around them,
//! which gives the pooled variance without any site revealing its rows.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::{
    AdjustedDeviationRecord, GlobalAggregateRecord, LocalStatisticsRecord, Round, SiteId,
    SiteRequest, SiteResponse, SiteResult, TaskInput,
};
use crate::ports::{InstrumentScorer, TaskDispatcher};
use crate::{FedScoreError, Result};

use super::aggregator::{aggregate_adjusted_deviation, aggregate_statistics};

/// Coordinator running the protocol over a dispatcher.
pub struct FederatedScoringService<T, S>
where
    T: TaskDispatcher,
    S: InstrumentScorer,
{
    dispatcher: Arc<T>,
    scorer: Arc<S>,
}

impl<T, S> FederatedScoringService<T, S>
where
    T: TaskDispatcher,
    S: InstrumentScorer,
{
    pub fn new(dispatcher: Arc<T>, scorer: Arc<S>) -> Self {
        Self { dispatcher, scorer }
    }

    /// Parse JSON task input and run the protocol.
    ///
    /// # Errors
    /// See [`Self::run`].
    pub fn run_json(
        &self,
        json: &str,
        organisation_ids: Option<&[SiteId]>,
    ) -> Result<GlobalAggregateRecord> {
        let input = TaskInput::from_json(json)?;
        self.run(&input, organisation_ids)
    }

    /// Run both rounds and return the final aggregate.
    ///
    /// Without `organisation_ids` every site known to the dispatcher takes part.
    ///
    /// # Errors
    /// Returns `UserInput` for invalid input or an empty organisation list
    /// (before anything is dispatched), `IncompleteRound` if any site fails to
    /// answer a round, and `Dispatch` for transport failures.
    pub fn run(
        &self,
        input: &TaskInput,
        organisation_ids: Option<&[SiteId]>,
    ) -> Result<GlobalAggregateRecord> {
        input.items_to_score.validate()?;
        self.scorer.check_input_structure(&input.items_to_score)?;
        input.variable_descriptors(self.scorer.scored_variables(&input.items_to_score))?;
        let sites = self.organisations(organisation_ids)?;

        tracing::info!("Running federated scoring over {} site(s)", sites.len());

        let local: Vec<LocalStatisticsRecord> = self.run_round(
            SiteRequest::GeneralStatistics { task: input.clone() },
            &sites,
            |response| match response {
                SiteResponse::GeneralStatistics(record) => Some(record),
                SiteResponse::AdjustedDeviation(_) => None,
            },
        )?;
        let general = aggregate_statistics(&local);

        let global_means = general.global_means();
        if global_means.is_empty() {
            tracing::warn!("No cell has a global mean; round two will release no deviations");
        }

        let deviations: Vec<AdjustedDeviationRecord> = self.run_round(
            SiteRequest::AdjustedDeviation {
                task: input.clone(),
                global_means,
            },
            &sites,
            |response| match response {
                SiteResponse::AdjustedDeviation(record) => Some(record),
                SiteResponse::GeneralStatistics(_) => None,
            },
        )?;
        let result = aggregate_adjusted_deviation(&deviations, &general);

        tracing::info!(
            "Federated scoring complete: {} numeric and {} categorical variable(s)",
            result.numeric.len(),
            result.categorical.len()
        );
        Ok(result)
    }

    fn organisations(&self, requested: Option<&[SiteId]>) -> Result<Vec<SiteId>> {
        let sites = match requested {
            Some(ids) => {
                let mut sites: Vec<SiteId> = Vec::with_capacity(ids.len());
                for id in ids {
                    if sites.contains(id) {
                        return Err(FedScoreError::UserInput(format!(
                            "organisation '{id}' listed twice"
                        )));
                    }
                    sites.push(id.clone());
                }
                sites
            }
            None => self.dispatcher.organisations(),
        };

        if sites.is_empty() {
            return Err(FedScoreError::UserInput(
                "no organisations to run the task on".to_string(),
            ));
        }
        Ok(sites)
    }

    fn run_round<R>(
        &self,
        request: SiteRequest,
        sites: &[SiteId],
        extract: impl Fn(SiteResponse) -> Option<R>,
    ) -> Result<Vec<R>> {
        let round = request.round();
        let handle = self.dispatcher.create_task(request, sites)?;
        tracing::info!(
            "Round '{round}' dispatched as task {} to {} site(s)",
            handle.id,
            sites.len()
        );

        let results = self.dispatcher.wait_for_results(&handle)?;
        let records = collect_round(round, sites, results, extract)?;

        tracing::info!("Round '{round}' complete: {} site(s) reported", records.len());
        Ok(records)
    }
}

/// Check that every expected site answered the round exactly once, and
/// return the answers in `expected` order.
///
/// # Errors
/// Returns `IncompleteRound` listing missing and failed sites. An error
/// report, a duplicate or unexpected answer, or an answer of the wrong kind
/// all count as failed.
pub fn collect_round<R>(
    round: Round,
    expected: &[SiteId],
    results: Vec<SiteResult>,
    extract: impl Fn(SiteResponse) -> Option<R>,
) -> Result<Vec<R>> {
    let mut answers: BTreeMap<SiteId, R> = BTreeMap::new();
    let mut failed: Vec<(SiteId, String)> = Vec::new();

    for SiteResult { site, outcome } in results {
        if !expected.contains(&site) {
            failed.push((site, "answer from a site outside this task".to_string()));
            continue;
        }
        if answers.contains_key(&site) || failed.iter().any(|(s, _)| *s == site) {
            failed.push((site, "more than one answer".to_string()));
            continue;
        }

        match outcome {
            Err(message) => failed.push((site, message)),
            Ok(response) if response.site() != &site => {
                let reason = format!("answer claims to come from '{}'", response.site());
                failed.push((site, reason));
            }
            Ok(response) => match extract(response) {
                Some(record) => {
                    answers.insert(site, record);
                }
                None => failed.push((site, format!("answer is not a {round} record"))),
            },
        }
    }

    let missing: Vec<SiteId> = expected
        .iter()
        .filter(|s| !answers.contains_key(*s) && !failed.iter().any(|(f, _)| f == *s))
        .cloned()
        .collect();

    if !missing.is_empty() || !failed.is_empty() {
        for (site, reason) in &failed {
            tracing::warn!("Round '{round}': site {site} failed: {reason}");
        }
        for site in &missing {
            tracing::warn!("Round '{round}': site {site} never reported");
        }
        return Err(FedScoreError::IncompleteRound {
            round,
            missing,
            failed,
        });
    }

    Ok(expected.iter().filter_map(|s| answers.remove(s)).collect())
}
