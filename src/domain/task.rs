//! Task input: which scales to score and how to stratify.
//!
//! Input is validated once, when it enters the coordinator, and travels to the
//! sites in its validated form.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{StratificationSpec, StratifierInput, VariableDescriptor};
use crate::{FedScoreError, Result};

/// Scales to score and where their item responses live.
///
/// Example:
/// ```json
/// {"scale_to_score": ["anxiety", "depression"],
///  "variable_info": {"question_1": "Q1", "question_2": "Q2"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsToScore {
    pub scale_to_score: Vec<String>,
    /// Question identifier → column name in the site's data
    pub variable_info: BTreeMap<String, String>,
}

impl ItemsToScore {
    /// Structural checks that do not depend on the instrument.
    ///
    /// # Errors
    /// Returns `UserInput` for an empty or duplicated scale list, and for
    /// empty question identifiers or column names.
    pub fn validate(&self) -> Result<()> {
        if self.scale_to_score.is_empty() {
            return Err(FedScoreError::UserInput(
                "'scale_to_score' must name at least one scale".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for scale in &self.scale_to_score {
            if scale.trim().is_empty() {
                return Err(FedScoreError::UserInput("scale names must not be empty".to_string()));
            }
            if !seen.insert(scale.as_str()) {
                return Err(FedScoreError::UserInput(format!("scale '{scale}' requested twice")));
            }
        }

        for (question, column) in &self.variable_info {
            if question.trim().is_empty() || column.trim().is_empty() {
                return Err(FedScoreError::UserInput(format!(
                    "'variable_info' entry '{question}' -> '{column}' is incomplete"
                )));
            }
        }

        Ok(())
    }

    /// Column names holding item responses.
    #[must_use]
    pub fn item_columns(&self) -> BTreeSet<String> {
        self.variable_info.values().cloned().collect()
    }
}

/// Task input as submitted by a researcher.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskInputRaw {
    pub items_to_score: ItemsToScore,
    #[serde(default)]
    pub variables_to_stratify: Option<BTreeMap<String, StratifierInput>>,
}

/// Validated task input shared with every site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    pub items_to_score: ItemsToScore,
    #[serde(default)]
    pub stratification: StratificationSpec,
}

impl TaskInput {
    /// Validate raw input.
    ///
    /// # Errors
    /// Returns `UserInput` when the scoring or stratification part is malformed.
    pub fn from_raw(raw: TaskInputRaw) -> Result<Self> {
        raw.items_to_score.validate()?;
        let stratification = match raw.variables_to_stratify {
            Some(vars) => StratificationSpec::from_input(vars)?,
            None => StratificationSpec::default(),
        };

        Ok(Self {
            items_to_score: raw.items_to_score,
            stratification,
        })
    }

    /// Parse and validate JSON task input.
    ///
    /// # Errors
    /// Returns `UserInput` for malformed JSON as well as invalid content.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: TaskInputRaw = serde_json::from_str(json)
            .map_err(|e| FedScoreError::UserInput(format!("task input is not valid: {e}")))?;
        Self::from_raw(raw)
    }

    /// Columns a site needs to keep for this task.
    #[must_use]
    pub fn required_columns(&self) -> BTreeSet<String> {
        let mut columns = self.items_to_score.item_columns();
        columns.extend(self.stratification.iter().map(|(name, _)| name.to_string()));
        columns
    }

    /// Scored variables followed by stratifiers, each name resolving to
    /// exactly one descriptor.
    ///
    /// # Errors
    /// Returns `UserInput` when a stratifier shares its name with a scored variable.
    pub fn variable_descriptors(
        &self,
        scored: Vec<VariableDescriptor>,
    ) -> Result<Vec<VariableDescriptor>> {
        let mut descriptors = scored;
        descriptors.extend(self.stratification.descriptors());

        let mut seen = BTreeSet::new();
        for descriptor in &descriptors {
            if !seen.insert(descriptor.name.as_str()) {
                return Err(FedScoreError::UserInput(format!(
                    "variable '{}' is both scored and used as a stratifier",
                    descriptor.name
                )));
            }
        }
        Ok(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Datatype;

    const INPUT: &str = r#"{
        "items_to_score": {
            "scale_to_score": ["anxiety"],
            "variable_info": {"question_1": "Q1", "question_3": "Q3"}
        },
        "variables_to_stratify": {"Age": {"end": 39, "datatype": "int"}}
    }"#;

    #[test]
    fn test_parse_valid_input() {
        let input = TaskInput::from_json(INPUT).expect("Should parse");
        assert_eq!(input.items_to_score.scale_to_score, vec!["anxiety"]);
        assert!(!input.stratification.is_empty());

        let columns = input.required_columns();
        assert!(columns.contains("Q1") && columns.contains("Q3") && columns.contains("Age"));
    }

    #[test]
    fn test_stratification_is_optional() {
        let input = TaskInput::from_json(
            r#"{"items_to_score": {"scale_to_score": ["depression"], "variable_info": {}}}"#,
        )
        .expect("Should parse");
        assert!(input.stratification.is_empty());
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(
            TaskInput::from_json(r#"{"items_to_score": {"scale_to_score": []}}"#),
            Err(FedScoreError::UserInput(_))
        ));
        assert!(matches!(
            TaskInput::from_json(
                r#"{"items_to_score": {"scale_to_score": [], "variable_info": {}}}"#
            ),
            Err(FedScoreError::UserInput(_))
        ));
        assert!(matches!(
            TaskInput::from_json(
                r#"{"items_to_score": {"scale_to_score": ["a", "a"], "variable_info": {}}}"#
            ),
            Err(FedScoreError::UserInput(_))
        ));
        assert!(matches!(
            TaskInput::from_json(
                r#"{"items_to_score": {"scale_to_score": ["a"], "variable_info": {"question_1": ""}}}"#
            ),
            Err(FedScoreError::UserInput(_))
        ));
    }

    #[test]
    fn test_stratifier_named_like_scored_variable() {
        let input = TaskInput::from_json(
            r#"{"items_to_score": {"scale_to_score": ["anxiety"], "variable_info": {}},
                "variables_to_stratify":
                    {"anxiety_severity": {"values": ["normal"], "datatype": "str"}}}"#,
        )
        .expect("Should parse");
        let scored = vec![
            VariableDescriptor::measured("anxiety", Datatype::Numeric),
            VariableDescriptor::measured("anxiety_severity", Datatype::Categorical),
        ];
        assert!(matches!(
            input.variable_descriptors(scored),
            Err(FedScoreError::UserInput(_))
        ));

        let descriptors = TaskInput::from_json(INPUT)
            .expect("Should parse")
            .variable_descriptors(vec![VariableDescriptor::measured("anxiety", Datatype::Numeric)])
            .expect("Distinct names");
        let names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["anxiety", "Age"]);
    }

    #[test]
    fn test_validated_input_round_trips_for_transport() {
        let input = TaskInput::from_json(INPUT).expect("Should parse");
        let wire = serde_json::to_string(&input).expect("Should serialize");
        let back: TaskInput = serde_json::from_str(&wire).expect("Should deserialize");
        assert_eq!(back, input);
    }
}
