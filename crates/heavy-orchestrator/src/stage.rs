//! Stage identifiers and stage-level errors.

use heavy_core::Error;
use thiserror::Error as ThisError;

/// A named phase of an orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    QuestionGeneration,
    ParallelResearch,
    FirstSynthesis,
    Validation,
    FinalSynthesis,
    Decomposition,
    ParallelExecution,
    Aggregation,
}

impl Stage {
    /// The five stages of the research pipeline, in execution order.
    pub const MEGAMIND: [Stage; 5] = [
        Stage::QuestionGeneration,
        Stage::ParallelResearch,
        Stage::FirstSynthesis,
        Stage::Validation,
        Stage::FinalSynthesis,
    ];

    /// The three stages of the decomposition pattern.
    pub const DECOMPOSITION: [Stage; 3] = [
        Stage::Decomposition,
        Stage::ParallelExecution,
        Stage::Aggregation,
    ];

    /// Key used in the progress tracker and in events.
    pub fn key(self) -> &'static str {
        match self {
            Stage::QuestionGeneration => "question_generation",
            Stage::ParallelResearch => "parallel_research",
            Stage::FirstSynthesis => "first_synthesis",
            Stage::Validation => "validation",
            Stage::FinalSynthesis => "final_synthesis",
            Stage::Decomposition => "decomposition",
            Stage::ParallelExecution => "parallel_execution",
            Stage::Aggregation => "aggregation",
        }
    }

    /// Human-readable label passed to stage-change callbacks.
    pub fn label(self) -> &'static str {
        match self {
            Stage::QuestionGeneration => "Generating specialized questions",
            Stage::ParallelResearch => "Running parallel research agents",
            Stage::FirstSynthesis => "Synthesizing first draft",
            Stage::Validation => "Running validation agents",
            Stage::FinalSynthesis => "Creating final answer",
            Stage::Decomposition => "Decomposing task into subtasks",
            Stage::ParallelExecution => "Running parallel agents",
            Stage::Aggregation => "Aggregating results",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// A stage that failed with no recovery path.
#[derive(Debug, ThisError)]
#[error("stage {stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl StageError {
    pub fn new(stage: Stage, source: Error) -> Self {
        Self { stage, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_unique() {
        let mut keys: Vec<_> = Stage::MEGAMIND
            .into_iter()
            .chain(Stage::DECOMPOSITION)
            .map(|stage| stage.key())
            .collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), 8);
    }

    #[test]
    fn test_stage_error_names_stage() {
        let err = StageError::new(Stage::FirstSynthesis, Error::completion("boom"));
        assert_eq!(
            err.to_string(),
            "stage first_synthesis failed: completion failed: boom"
        );
    }
}
