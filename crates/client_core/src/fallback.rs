use std::future::Future;

use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::error::{ClientError, ClientResult};

type StrategyFn<'a, T> = Box<dyn FnOnce() -> BoxFuture<'a, ClientResult<T>> + Send + 'a>;

struct Strategy<'a, T> {
    label: String,
    run: StrategyFn<'a, T>,
}

#[derive(Debug)]
pub struct AttemptFailure {
    pub strategy: String,
    pub error: ClientError,
}

#[derive(Debug)]
pub struct FallbackSuccess<T> {
    pub value: T,
    pub strategy: String,
    /// Failures of the strategies tried before the winning one, in order.
    pub failures: Vec<AttemptFailure>,
}

pub struct FallbackChain<'a, T> {
    action: String,
    strategies: Vec<Strategy<'a, T>>,
}

impl<'a, T: Send + 'a> FallbackChain<'a, T> {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            strategies: Vec::new(),
        }
    }

    pub fn then<F, Fut>(mut self, label: impl Into<String>, strategy: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = ClientResult<T>> + Send + 'a,
    {
        self.strategies.push(Strategy {
            label: label.into(),
            run: Box::new(move || Box::pin(strategy())),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub async fn execute(self) -> ClientResult<FallbackSuccess<T>> {
        let action = self.action;
        let attempts = self.strategies.len();
        let mut failures: Vec<AttemptFailure> = Vec::new();

        for (index, strategy) in self.strategies.into_iter().enumerate() {
            match (strategy.run)().await {
                Ok(value) => {
                    if !failures.is_empty() {
                        info!(
                            action = %action,
                            strategy = %strategy.label,
                            attempt = index + 1,
                            "fallback: recovered via alternate strategy"
                        );
                    }
                    return Ok(FallbackSuccess {
                        value,
                        strategy: strategy.label,
                        failures,
                    });
                }
                Err(error) => {
                    warn!(
                        action = %action,
                        strategy = %strategy.label,
                        attempt = index + 1,
                        max_attempts = attempts,
                        error = %error,
                        "fallback: strategy failed"
                    );
                    failures.push(AttemptFailure {
                        strategy: strategy.label,
                        error,
                    });
                }
            }
        }

        let Some(last) = failures.pop() else {
            return Err(ClientError::validation(format!(
                "no strategies configured for '{action}'"
            )));
        };
        warn!(action = %action, attempts, "fallback: all strategies exhausted");
        Err(ClientError::AllFallbacksExhausted {
            action,
            attempts,
            last: Box::new(last.error),
        })
    }
}

#[cfg(test)]
#[path = "tests/fallback_tests.rs"]
mod tests;
