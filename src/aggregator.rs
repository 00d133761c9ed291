//! Ordered collection of test outcomes and final report assembly.

use log::debug;

use crate::errors::InternalStateViolation;
use crate::measurement::TestOutcome;
use crate::scheduler::AbortReason;

/// Collects per-test outcomes strictly in execution order and produces
/// the immutable outcome list for the report.
///
/// `finalize` may be called more than once with identical inputs (it
/// returns the same list); calling it again with different inputs is an
/// [`InternalStateViolation`].
#[derive(Default)]
pub struct ResultAggregator {
    outcomes: Vec<TestOutcome>,
    finalized: Option<Option<AbortReason>>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Append the next outcome. Its index must equal the current length:
    /// no gaps, no reordering.
    pub fn append(
        &mut self,
        outcome: TestOutcome,
    ) -> Result<(), InternalStateViolation> {
        if self.finalized.is_some() {
            return Err(InternalStateViolation::AppendAfterFinalize);
        }
        if outcome.index != self.outcomes.len() {
            return Err(InternalStateViolation::OutOfOrderAppend {
                expected: self.outcomes.len(),
                got: outcome.index,
            });
        }
        debug!(
            "outcome {}: {} ({})",
            outcome.index,
            outcome.description,
            if outcome.succeeded { "ok" } else { "failed" }
        );
        self.outcomes.push(outcome);
        Ok(())
    }

    /// Seal the outcome list, tagging the last entry when the run was cut
    /// short by backgrounding or a network change. A user interruption
    /// leaves the partial outcomes as they are.
    pub fn finalize(
        &mut self,
        abort: Option<AbortReason>,
    ) -> Result<Vec<TestOutcome>, InternalStateViolation> {
        if let Some(previous) = self.finalized {
            if previous != abort {
                return Err(InternalStateViolation::ConflictingFinalize);
            }
            return Ok(self.outcomes.clone());
        }

        match abort {
            Some(AbortReason::Backgrounded)
            | Some(AbortReason::NetworkChanged) => {
                if let Some(last) = self.outcomes.last_mut() {
                    last.aborted = abort;
                }
            }
            Some(AbortReason::UserInterrupted) | None => {}
        }

        self.finalized = Some(abort);
        Ok(self.outcomes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::TestKind;

    fn outcome(index: usize) -> TestOutcome {
        TestOutcome {
            index,
            kind: TestKind::BulkDownload,
            description: format!("test {index}"),
            succeeded: true,
            short_summary: None,
            aborted: None,
        }
    }

    #[test]
    fn test_append_in_order() {
        let mut aggregator = ResultAggregator::new();
        aggregator.append(outcome(0)).unwrap();
        aggregator.append(outcome(1)).unwrap();
        assert_eq!(aggregator.len(), 2);
    }

    #[test]
    fn test_append_out_of_order_is_a_violation() {
        let mut aggregator = ResultAggregator::new();
        aggregator.append(outcome(0)).unwrap();

        assert_eq!(
            aggregator.append(outcome(2)),
            Err(InternalStateViolation::OutOfOrderAppend {
                expected: 1,
                got: 2
            })
        );
    }

    #[test]
    fn test_append_after_finalize_is_a_violation() {
        let mut aggregator = ResultAggregator::new();
        aggregator.append(outcome(0)).unwrap();
        aggregator.finalize(None).unwrap();

        assert_eq!(
            aggregator.append(outcome(1)),
            Err(InternalStateViolation::AppendAfterFinalize)
        );
    }

    #[test]
    fn test_finalize_tags_last_outcome_on_backgrounding() {
        let mut aggregator = ResultAggregator::new();
        aggregator.append(outcome(0)).unwrap();
        aggregator.append(outcome(1)).unwrap();

        let outcomes =
            aggregator.finalize(Some(AbortReason::Backgrounded)).unwrap();

        assert_eq!(outcomes[0].aborted, None);
        assert_eq!(outcomes[1].aborted, Some(AbortReason::Backgrounded));
    }

    #[test]
    fn test_finalize_tags_last_outcome_on_network_change() {
        let mut aggregator = ResultAggregator::new();
        aggregator.append(outcome(0)).unwrap();

        let outcomes =
            aggregator.finalize(Some(AbortReason::NetworkChanged)).unwrap();

        assert_eq!(outcomes[0].aborted, Some(AbortReason::NetworkChanged));
    }

    #[test]
    fn test_user_interruption_leaves_outcomes_unmarked() {
        let mut aggregator = ResultAggregator::new();
        aggregator.append(outcome(0)).unwrap();

        let outcomes =
            aggregator.finalize(Some(AbortReason::UserInterrupted)).unwrap();

        assert_eq!(outcomes[0].aborted, None);
    }

    #[test]
    fn test_finalize_is_idempotent_for_identical_inputs() {
        let mut aggregator = ResultAggregator::new();
        aggregator.append(outcome(0)).unwrap();

        let first =
            aggregator.finalize(Some(AbortReason::Backgrounded)).unwrap();
        let second =
            aggregator.finalize(Some(AbortReason::Backgrounded)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_finalize_with_different_inputs_is_a_violation() {
        let mut aggregator = ResultAggregator::new();
        aggregator.append(outcome(0)).unwrap();
        aggregator.finalize(None).unwrap();

        assert_eq!(
            aggregator.finalize(Some(AbortReason::UserInterrupted)),
            Err(InternalStateViolation::ConflictingFinalize)
        );
    }

    #[test]
    fn test_finalize_empty_run() {
        let mut aggregator = ResultAggregator::new();
        let outcomes =
            aggregator.finalize(Some(AbortReason::NetworkChanged)).unwrap();
        assert!(outcomes.is_empty());
    }
}
