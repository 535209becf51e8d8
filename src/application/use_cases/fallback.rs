//! Ordered "first success wins" strategy chains.
//!
//! Template tiers, filename repairs and workbook fidelity tiers are all
//! ladders of the same shape: try each strategy in order, keep the first
//! value produced, remember why the others failed.

use crate::domain::error::AppError;
use async_trait::async_trait;
use tracing::debug;

pub trait Strategy<I: ?Sized, O> {
    fn name(&self) -> &str;
    fn attempt(&self, input: &I) -> Result<O, AppError>;
}

#[async_trait]
pub trait AsyncStrategy<I: ?Sized + Sync, O>: Send + Sync {
    fn name(&self) -> &str;
    async fn attempt(&self, input: &I) -> Result<O, AppError>;
}

/// Strategy built from a name and a closure.
pub struct FnStrategy<F> {
    name: &'static str,
    run: F,
}

impl<F> FnStrategy<F> {
    pub fn new(name: &'static str, run: F) -> Self {
        Self { name, run }
    }
}

impl<I: ?Sized, O, F> Strategy<I, O> for FnStrategy<F>
where
    F: Fn(&I) -> Result<O, AppError>,
{
    fn name(&self) -> &str {
        self.name
    }

    fn attempt(&self, input: &I) -> Result<O, AppError> {
        (self.run)(input)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyFailure {
    pub strategy: String,
    pub error: AppError,
}

/// Value of the winning strategy plus the failures that preceded it.
#[derive(Debug)]
pub struct ChainSuccess<O> {
    pub strategy: String,
    pub value: O,
    pub failures: Vec<StrategyFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainExhausted {
    pub failures: Vec<StrategyFailure>,
}

impl ChainExhausted {
    pub fn summary(&self) -> String {
        if self.failures.is_empty() {
            return "no strategies configured".to_string();
        }
        self.failures
            .iter()
            .map(|failure| format!("{}: {}", failure.strategy, failure.error))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn into_error(self, context: &str) -> AppError {
        AppError::ResolutionExhausted(format!("{} ({})", context, self.summary()))
    }
}

pub fn first_success<I: ?Sized, O>(
    strategies: &[&dyn Strategy<I, O>],
    input: &I,
) -> Result<ChainSuccess<O>, ChainExhausted> {
    let mut failures = Vec::new();
    for strategy in strategies {
        match strategy.attempt(input) {
            Ok(value) => {
                return Ok(ChainSuccess {
                    strategy: strategy.name().to_string(),
                    value,
                    failures,
                })
            }
            Err(error) => {
                debug!(strategy = strategy.name(), error = %error, "Strategy failed");
                failures.push(StrategyFailure {
                    strategy: strategy.name().to_string(),
                    error,
                });
            }
        }
    }
    Err(ChainExhausted { failures })
}

pub async fn first_success_async<I: ?Sized + Sync, O>(
    strategies: &[&dyn AsyncStrategy<I, O>],
    input: &I,
) -> Result<ChainSuccess<O>, ChainExhausted> {
    let mut failures = Vec::new();
    for strategy in strategies {
        match strategy.attempt(input).await {
            Ok(value) => {
                return Ok(ChainSuccess {
                    strategy: strategy.name().to_string(),
                    value,
                    failures,
                })
            }
            Err(error) => {
                debug!(strategy = strategy.name(), error = %error, "Strategy failed");
                failures.push(StrategyFailure {
                    strategy: strategy.name().to_string(),
                    error,
                });
            }
        }
    }
    Err(ChainExhausted { failures })
}
