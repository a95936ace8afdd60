use std::future::Future;
use std::pin::Pin;

use tracing::{error, info};

use crate::error::IngestError;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type Operation<'a> = Box<dyn FnOnce() -> BoxFuture<'a, Result<(), IngestError>> + Send + 'a>;
type Rollback<'a> = Box<dyn FnOnce() -> BoxFuture<'a, ()> + Send + 'a>;

/// An ordered sequence of operations with compensating rollbacks, matching
/// `error_recovery.py::TransactionManager`. Used by the coordinator to pair
/// "extract channel info" + "save person" so a failed save undoes the
/// extraction side effects (§4.D).
pub struct Transaction<'a> {
    steps: Vec<(String, Operation<'a>, Rollback<'a>)>,
}

impl<'a> Transaction<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn add_operation<Op, OpFut, Rb, RbFut>(&mut self, name: impl Into<String>, operation: Op, rollback: Rb)
    where
        Op: FnOnce() -> OpFut + Send + 'a,
        OpFut: Future<Output = Result<(), IngestError>> + Send + 'a,
        Rb: FnOnce() -> RbFut + Send + 'a,
        RbFut: Future<Output = ()> + Send + 'a,
    {
        self.steps.push((
            name.into(),
            Box::new(move || Box::pin(operation())),
            Box::new(move || Box::pin(rollback())),
        ));
    }

    /// Executes steps in order. On failure, rolls back completed steps in
    /// reverse order, logging (never raising) rollback errors, then returns
    /// the original error.
    pub async fn execute(self) -> Result<(), IngestError> {
        let mut completed: Vec<(String, Rollback<'a>)> = Vec::new();
        for (name, operation, rollback) in self.steps {
            match operation().await {
                Ok(()) => {
                    completed.push((name, rollback));
                }
                Err(err) => {
                    error!(step = %name, error = %err, "transaction step failed, rolling back");
                    for (rolled_back_name, rollback) in completed.into_iter().rev() {
                        info!(step = %rolled_back_name, "rolling back transaction step");
                        rollback().await;
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

impl<'a> Default for Transaction<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn all_steps_succeed_leaves_nothing_to_roll_back() {
        let log: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());
        let mut tx = Transaction::new();
        tx.add_operation(
            "step-1",
            || async {
                Ok(())
            },
            || async {},
        );
        let _ = &log;
        assert!(tx.execute().await.is_ok());
    }

    #[tokio::test]
    async fn failure_rolls_back_completed_steps_in_reverse_order() {
        let log: std::sync::Arc<Mutex<Vec<&'static str>>> =
            std::sync::Arc::new(Mutex::new(Vec::new()));

        let mut tx = Transaction::new();

        let log_a = log.clone();
        tx.add_operation(
            "a",
            || async { Ok(()) },
            move || {
                let log_a = log_a.clone();
                async move {
                    log_a.lock().await.push("rollback-a");
                }
            },
        );

        let log_b = log.clone();
        tx.add_operation(
            "b",
            || async { Ok(()) },
            move || {
                let log_b = log_b.clone();
                async move {
                    log_b.lock().await.push("rollback-b");
                }
            },
        );

        tx.add_operation(
            "c",
            || async { Err(IngestError::Transport("boom".into())) },
            || async {},
        );

        let result = tx.execute().await;
        assert!(result.is_err());
        let recorded = log.lock().await;
        assert_eq!(*recorded, vec!["rollback-b", "rollback-a"]);
    }
}
