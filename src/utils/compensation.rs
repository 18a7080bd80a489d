//! Reverse-ordered compensation.
//!
//! A unit of work registers one step per side effect as it applies them.
//! On failure the steps run last-first. Each step is independently fallible:
//! a failing step is logged and the remaining steps still run.

use futures::future::BoxFuture;
use tracing::{error, info};

type StepFn<'a> = Box<dyn FnOnce() -> BoxFuture<'a, Result<(), String>> + Send + 'a>;

struct Step<'a> {
    name: &'static str,
    run: StepFn<'a>,
}

/// Outcome of running a compensation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompensationReport {
    /// Steps that succeeded, in execution order.
    pub completed: Vec<&'static str>,
    /// Steps that failed, with their error.
    pub failed: Vec<(&'static str, String)>,
}

impl CompensationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ordered list of undo actions.
#[derive(Default)]
pub struct Compensation<'a> {
    steps: Vec<Step<'a>>,
}

impl<'a> Compensation<'a> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Register the undo for an effect that has just been applied.
    pub fn push<F>(&mut self, name: &'static str, run: F)
    where
        F: FnOnce() -> BoxFuture<'a, Result<(), String>> + Send + 'a,
    {
        self.steps.push(Step {
            name,
            run: Box::new(run),
        });
    }

    /// Run every step, last registered first.
    pub async fn run(self, context: &str) -> CompensationReport {
        let mut report = CompensationReport::default();
        for step in self.steps.into_iter().rev() {
            match (step.run)().await {
                Ok(()) => {
                    info!(context = %context, step = step.name, "Compensation step applied");
                    report.completed.push(step.name);
                }
                Err(e) => {
                    error!(
                        context = %context,
                        step = step.name,
                        error = %e,
                        "Compensation step failed"
                    );
                    report.failed.push((step.name, e));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_steps_run_in_reverse() {
        let order = Mutex::new(Vec::new());
        let mut compensation = Compensation::new();
        for name in ["first", "second", "third"] {
            let order = &order;
            compensation.push(name, move || {
                async move {
                    order.lock().unwrap().push(name);
                    Ok(())
                }
                .boxed()
            });
        }

        let report = compensation.run("test").await;
        assert!(report.is_clean());
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
        assert_eq!(report.completed, vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_failing_step_does_not_stop_the_rest() {
        let mut compensation = Compensation::new();
        compensation.push("delete_key", || async { Ok(()) }.boxed());
        compensation.push("decrement_usage", || async { Err("store down".to_string()) }.boxed());

        let report = compensation.run("test").await;
        assert_eq!(report.completed, vec!["delete_key"]);
        assert_eq!(
            report.failed,
            vec![("decrement_usage", "store down".to_string())]
        );
        assert!(!report.is_clean());
    }
}
