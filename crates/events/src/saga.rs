//! Compensating saga mechanics (framework only, no business rules).
//!
//! Some lifecycle writes span more than one stream or collaborator and cannot be
//! committed atomically: reserving a document number and then appending the
//! order, or issuing a settlement invoice and then posting the payable. A
//! [`Saga`] runs such writes as an explicit step list:
//!
//! - steps run in declaration order against a shared context `C`
//! - the first failing step stops the run
//! - every *completed* step that declared a compensation is compensated, in
//!   reverse order
//! - the failure reports the failed step, its error and any compensation errors
//!
//! What a compensation does is up to the caller: release a reservation, or
//! flag a financial record for manual reconciliation instead of deleting it.

type StepFn<'a, C, E> = Box<dyn FnMut(&mut C) -> Result<(), E> + 'a>;

struct SagaStep<'a, C, E> {
    name: &'static str,
    action: StepFn<'a, C, E>,
    compensation: Option<StepFn<'a, C, E>>,
}

/// Ordered list of steps with optional compensations.
pub struct Saga<'a, C, E> {
    name: &'static str,
    steps: Vec<SagaStep<'a, C, E>>,
}

/// Outcome of a failed saga run.
#[derive(Debug)]
pub struct SagaFailure<E> {
    pub saga: &'static str,
    pub failed_step: &'static str,
    pub error: E,
    /// Steps whose compensation ran successfully (reverse execution order).
    pub compensated: Vec<&'static str>,
    /// Compensations that failed; these need manual follow-up.
    pub compensation_errors: Vec<(&'static str, E)>,
}

impl<E> SagaFailure<E> {
    pub fn is_fully_compensated(&self) -> bool {
        self.compensation_errors.is_empty()
    }
}

impl<'a, C, E> Saga<'a, C, E>
where
    E: core::fmt::Debug,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    /// Add a step that has nothing to undo.
    pub fn step(
        mut self,
        name: &'static str,
        action: impl FnMut(&mut C) -> Result<(), E> + 'a,
    ) -> Self {
        self.steps.push(SagaStep {
            name,
            action: Box::new(action),
            compensation: None,
        });
        self
    }

    /// Add a step whose effect must be compensated if a later step fails.
    pub fn compensated_step(
        mut self,
        name: &'static str,
        action: impl FnMut(&mut C) -> Result<(), E> + 'a,
        compensation: impl FnMut(&mut C) -> Result<(), E> + 'a,
    ) -> Self {
        self.steps.push(SagaStep {
            name,
            action: Box::new(action),
            compensation: Some(Box::new(compensation)),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run all steps; compensate completed steps on the first failure.
    pub fn run(self, ctx: &mut C) -> Result<(), SagaFailure<E>> {
        let saga = self.name;
        let mut completed: Vec<SagaStep<'a, C, E>> = Vec::with_capacity(self.steps.len());

        for mut step in self.steps {
            match (step.action)(ctx) {
                Ok(()) => completed.push(step),
                Err(error) => {
                    tracing::warn!(
                        saga,
                        step = step.name,
                        error = ?error,
                        "saga step failed; compensating"
                    );

                    let mut compensated = Vec::new();
                    let mut compensation_errors = Vec::new();

                    for done in completed.iter_mut().rev() {
                        let Some(compensation) = done.compensation.as_mut() else {
                            continue;
                        };
                        match compensation(ctx) {
                            Ok(()) => compensated.push(done.name),
                            Err(e) => {
                                tracing::error!(
                                    saga,
                                    step = done.name,
                                    error = ?e,
                                    "compensation failed"
                                );
                                compensation_errors.push((done.name, e));
                            }
                        }
                    }

                    return Err(SagaFailure {
                        saga,
                        failed_step: step.name,
                        error,
                        compensated,
                        compensation_errors,
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_steps_run_in_order_on_success() {
        let mut log: Vec<&str> = Vec::new();
        let result = Saga::<_, String>::new("test")
            .compensated_step("a", |l: &mut Vec<&str>| Ok(l.push("a")), |l| Ok(l.push("undo a")))
            .step("b", |l| Ok(l.push("b")))
            .run(&mut log);

        assert!(result.is_ok());
        assert_eq!(log, vec!["a", "b"]);
    }

    #[test]
    fn completed_steps_are_compensated_in_reverse_order() {
        let mut log: Vec<&str> = Vec::new();
        let failure = Saga::new("test")
            .compensated_step("a", |l: &mut Vec<&str>| Ok(l.push("a")), |l| Ok(l.push("undo a")))
            .compensated_step("b", |l| Ok(l.push("b")), |l| Ok(l.push("undo b")))
            .compensated_step(
                "c",
                |_| Err("boom".to_string()),
                |l| Ok(l.push("undo c")),
            )
            .run(&mut log)
            .unwrap_err();

        assert_eq!(failure.failed_step, "c");
        assert_eq!(failure.error, "boom");
        assert_eq!(failure.compensated, vec!["b", "a"]);
        assert!(failure.is_fully_compensated());
        assert_eq!(log, vec!["a", "b", "undo b", "undo a"]);
    }

    #[test]
    fn compensation_errors_are_reported_and_do_not_stop_unwinding() {
        let mut log: Vec<&str> = Vec::new();
        let failure = Saga::new("test")
            .compensated_step("a", |l: &mut Vec<&str>| Ok(l.push("a")), |l| Ok(l.push("undo a")))
            .compensated_step("b", |l| Ok(l.push("b")), |_| Err("stuck".to_string()))
            .step("c", |_| Err("boom".to_string()))
            .run(&mut log)
            .unwrap_err();

        assert!(!failure.is_fully_compensated());
        assert_eq!(failure.compensation_errors, vec![("b", "stuck".to_string())]);
        assert_eq!(failure.compensated, vec!["a"]);
    }
}
