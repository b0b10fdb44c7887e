//! HADS adapter: Implementation of InstrumentScorer.
//!
//! Hospital Anxiety and Depression Scale: 14 items answered 0–3. Odd items
//! make up the anxiety scale, even items the depression scale, each summing
//! to 0–21. Each scale also gets a severity band as a categorical variable.

use crate::domain::{CellValue, Datatype, ItemsToScore, Row, SitePartition, VariableDescriptor};
use crate::ports::InstrumentScorer;
use crate::{FedScoreError, Result};

pub const ANXIETY: &str = "anxiety";
pub const DEPRESSION: &str = "depression";

const ANXIETY_ITEMS: [&str; 7] = [
    "question_1",
    "question_3",
    "question_5",
    "question_7",
    "question_9",
    "question_11",
    "question_13",
];

const DEPRESSION_ITEMS: [&str; 7] = [
    "question_2",
    "question_4",
    "question_6",
    "question_8",
    "question_10",
    "question_12",
    "question_14",
];

const MAX_RESPONSE: f64 = 3.0;

/// Severity band of a scale score.
#[must_use]
pub fn severity_band(score: f64) -> &'static str {
    if score <= 7.0 {
        "normal"
    } else if score <= 10.0 {
        "borderline"
    } else {
        "abnormal"
    }
}

/// Name of the categorical severity variable derived from `scale`.
#[must_use]
pub fn severity_variable(scale: &str) -> String {
    format!("{scale}_severity")
}

fn scale_items(scale: &str) -> Option<&'static [&'static str; 7]> {
    match scale {
        ANXIETY => Some(&ANXIETY_ITEMS),
        DEPRESSION => Some(&DEPRESSION_ITEMS),
        _ => None,
    }
}

/// A valid response is an integer in 0..=3.
fn response(value: Option<&CellValue>) -> Option<f64> {
    value
        .and_then(CellValue::as_number)
        .filter(|x| x.fract() == 0.0 && (0.0..=MAX_RESPONSE).contains(x))
}

/// Scorer for the 14-item HADS questionnaire.
#[derive(Debug, Clone, Copy, Default)]
pub struct HadsScorer;

impl HadsScorer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn score_row(row: &Row, columns: &[&str]) -> Option<f64> {
        columns
            .iter()
            .map(|column| response(row.get(*column)))
            .sum::<Option<f64>>()
    }
}

impl InstrumentScorer for HadsScorer {
    fn check_input_structure(&self, items: &ItemsToScore) -> Result<()> {
        items.validate()?;

        for scale in &items.scale_to_score {
            let questions = scale_items(scale).ok_or_else(|| {
                FedScoreError::UserInput(format!(
                    "unknown HADS scale '{scale}', expected '{ANXIETY}' or '{DEPRESSION}'"
                ))
            })?;
            let unmapped: Vec<&str> = questions
                .iter()
                .copied()
                .filter(|q| !items.variable_info.contains_key(*q))
                .collect();
            if !unmapped.is_empty() {
                return Err(FedScoreError::UserInput(format!(
                    "scale '{scale}' needs 'variable_info' entries for: {}",
                    unmapped.join(", ")
                )));
            }
        }

        Ok(())
    }

    fn scored_variables(&self, items: &ItemsToScore) -> Vec<VariableDescriptor> {
        items
            .scale_to_score
            .iter()
            .flat_map(|scale| {
                [
                    VariableDescriptor::measured(scale.clone(), Datatype::Numeric),
                    VariableDescriptor::measured(severity_variable(scale), Datatype::Categorical),
                ]
            })
            .collect()
    }

    fn score(&self, items: &ItemsToScore, partition: &SitePartition) -> Result<SitePartition> {
        self.check_input_structure(items)?;
        let mut scored = partition.clone();

        for scale in &items.scale_to_score {
            let Some(questions) = scale_items(scale) else {
                continue;
            };
            // check_input_structure guarantees every question is mapped
            let columns: Vec<&str> = questions
                .iter()
                .filter_map(|q| items.variable_info.get(*q).map(String::as_str))
                .collect();

            if !columns.iter().all(|c| partition.has_column(c)) {
                tracing::debug!(
                    "Items for scale '{scale}' not present at this site; scale not scored"
                );
                continue;
            }

            let scores: Vec<Option<f64>> = partition
                .rows()
                .iter()
                .map(|row| Self::score_row(row, &columns))
                .collect();

            let valid = scores.iter().filter(|s| s.is_some()).count();
            tracing::debug!("Scored '{scale}': {valid} of {} rows complete", scores.len());

            scored.set_column(
                scale,
                scores.iter().map(|s| s.map_or(CellValue::Missing, CellValue::Number)),
            );
            scored.set_column(
                &severity_variable(scale),
                scores
                    .iter()
                    .map(|s| s.map_or(CellValue::Missing, |x| CellValue::from(severity_band(x)))),
            );
        }

        Ok(scored)
    }
}
