//! Chained `Where` state
//!
//! A session runs chained queries in one of two modes. Accumulating chains
//! collect conditions and run a single combined query when the chain closes.
//! Narrowing chains query on their first link and filter the previous results
//! in memory on every later link. The two modes never mix within one chain.

use std::mem;

use crate::error::Error;
use crate::predicate::Condition;

/// Phase of the chained query state machine
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChainPhase {
    /// No chain in progress
    #[default]
    Idle,
    /// Conditions are being collected for one combined query
    Accumulating,
    /// Each link filters the results of the previous one
    Narrowing,
}

/// What an accumulating link must do next
#[derive(Debug, PartialEq)]
pub enum AccumulateStep {
    /// The chain stays open, nothing is executed yet
    Defer,
    /// The chain closed; run one query combining these conditions
    Flush(Vec<Condition>),
}

/// What a narrowing link must do next
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NarrowStep {
    /// Query the store with this link's condition
    Query,
    /// Filter the caller's results in memory
    FilterInMemory,
    /// An earlier link matched nothing; results stay empty without a query
    StillEmpty,
}

/// Chained query state owned by one session
#[derive(Debug, Default)]
pub struct ChainState {
    phase: ChainPhase,
    pending: Vec<Condition>,
}

impl ChainState {
    /// Current phase
    pub fn phase(&self) -> ChainPhase {
        self.phase
    }

    /// Whether a chain is in progress
    pub fn is_open(&self) -> bool {
        self.phase != ChainPhase::Idle
    }

    /// Conditions collected by the open accumulating chain
    pub fn pending(&self) -> &[Condition] {
        &self.pending
    }

    /// Drop any chain in progress
    pub fn reset(&mut self) {
        self.phase = ChainPhase::Idle;
        self.pending.clear();
    }

    /// Add an accumulating link
    ///
    /// Starting a chain discards conditions left over from an earlier one. A
    /// link that does not continue the chain hands every collected condition
    /// back and returns the state to idle.
    pub fn accumulate(&mut self, condition: Condition, continues: bool) -> Result<AccumulateStep, Error> {
        match self.phase {
            ChainPhase::Narrowing => {
                self.reset();
                return Err(mixed_modes());
            }
            ChainPhase::Idle => self.pending.clear(),
            ChainPhase::Accumulating => {}
        }

        self.pending.push(condition);
        if continues {
            self.phase = ChainPhase::Accumulating;
            Ok(AccumulateStep::Defer)
        } else {
            self.phase = ChainPhase::Idle;
            Ok(AccumulateStep::Flush(mem::take(&mut self.pending)))
        }
    }

    /// Add a narrowing link
    ///
    /// `has_results` tells whether the caller's result vector is non-empty;
    /// non-empty results are always filtered in memory.
    pub fn narrow(&mut self, continues: bool, has_results: bool) -> Result<NarrowStep, Error> {
        let step = match self.phase {
            ChainPhase::Accumulating => {
                self.reset();
                return Err(mixed_modes());
            }
            _ if has_results => NarrowStep::FilterInMemory,
            ChainPhase::Narrowing => NarrowStep::StillEmpty,
            ChainPhase::Idle => NarrowStep::Query,
        };

        self.phase = if continues {
            ChainPhase::Narrowing
        } else {
            ChainPhase::Idle
        };
        Ok(step)
    }
}

fn mixed_modes() -> Error {
    Error::usage(
        "Where",
        "cannot mix accumulating and narrowing links in one chain",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(field: &str, value: &str) -> Condition {
        Condition::new("Where", field, value).unwrap()
    }

    #[test]
    fn test_accumulate_defers_then_flushes_in_order() {
        let mut chain = ChainState::default();
        assert_eq!(chain.phase(), ChainPhase::Idle);

        let step = chain.accumulate(condition("Environment", "prod"), true).unwrap();
        assert_eq!(step, AccumulateStep::Defer);
        assert!(chain.is_open());
        assert_eq!(chain.pending().len(), 1);

        let step = chain.accumulate(condition("Breed", "Poodle"), false).unwrap();
        match step {
            AccumulateStep::Flush(conditions) => {
                let fields: Vec<&str> = conditions.iter().map(Condition::field).collect();
                assert_eq!(fields, vec!["Environment", "Breed"]);
            }
            AccumulateStep::Defer => panic!("expected flush"),
        }
        assert_eq!(chain.phase(), ChainPhase::Idle);
        assert!(chain.pending().is_empty());
    }

    #[test]
    fn test_single_link_flushes_immediately() {
        let mut chain = ChainState::default();
        let step = chain.accumulate(condition("Breed", "Husky"), false).unwrap();
        assert!(matches!(step, AccumulateStep::Flush(ref c) if c.len() == 1));
        assert!(!chain.is_open());
    }

    #[test]
    fn test_reset_discards_pending() {
        let mut chain = ChainState::default();
        let _ = chain.accumulate(condition("Breed", "Husky"), true).unwrap();
        chain.reset();
        assert_eq!(chain.phase(), ChainPhase::Idle);

        let step = chain.accumulate(condition("Name", "Rex"), false).unwrap();
        assert!(matches!(step, AccumulateStep::Flush(ref c) if c.len() == 1 && c[0].field() == "Name"));
    }

    #[test]
    fn test_narrow_steps() {
        let mut chain = ChainState::default();
        assert_eq!(chain.narrow(true, false).unwrap(), NarrowStep::Query);
        assert_eq!(chain.phase(), ChainPhase::Narrowing);

        assert_eq!(chain.narrow(true, true).unwrap(), NarrowStep::FilterInMemory);
        assert_eq!(chain.narrow(true, false).unwrap(), NarrowStep::StillEmpty);
        assert_eq!(chain.narrow(false, false).unwrap(), NarrowStep::StillEmpty);
        assert_eq!(chain.phase(), ChainPhase::Idle);

        assert_eq!(chain.narrow(false, true).unwrap(), NarrowStep::FilterInMemory);
        assert_eq!(chain.narrow(false, false).unwrap(), NarrowStep::Query);
    }

    #[test]
    fn test_mixing_modes_is_rejected_and_resets() {
        let mut chain = ChainState::default();
        let _ = chain.accumulate(condition("Breed", "Husky"), true).unwrap();
        let err = chain.narrow(false, false).unwrap_err();
        assert!(matches!(err, Error::Usage { operation: "Where", .. }));
        assert_eq!(chain.phase(), ChainPhase::Idle);
        assert!(chain.pending().is_empty());

        let _ = chain.narrow(true, false).unwrap();
        assert!(chain.accumulate(condition("Breed", "Husky"), false).is_err());
        assert_eq!(chain.phase(), ChainPhase::Idle);
    }
}
