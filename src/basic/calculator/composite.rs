//! Calculators built from other calculators.

use nalgebra::DVector;
use num_complex::Complex64;
use tracing::{debug, warn};

use crate::basic::error::SolveError;

use super::{NodeVoltageCalculator, PowerFlowProblem, ProgressMonitor};

/// Runs one calculator to seed another.
///
/// The second stage is warm-started with the first stage's voltages; if the
/// first stage collapses, its best iterate is still used as the starting
/// point, since a partially converged estimate usually beats a flat start.
pub struct TwoStepMethod {
    first: Box<dyn NodeVoltageCalculator>,
    second: Box<dyn NodeVoltageCalculator>,
    monitor: ProgressMonitor,
}

impl TwoStepMethod {
    pub fn new(
        mut first: Box<dyn NodeVoltageCalculator>,
        mut second: Box<dyn NodeVoltageCalculator>,
    ) -> Self {
        let monitor = ProgressMonitor::default();
        first.attach_progress(monitor.section(0.0, 0.5));
        second.attach_progress(monitor.section(0.5, 0.5));
        Self {
            first,
            second,
            monitor,
        }
    }
}

impl NodeVoltageCalculator for TwoStepMethod {
    fn calculate_unknown_voltages(
        &mut self,
        problem: &PowerFlowProblem,
    ) -> Result<DVector<Complex64>, SolveError> {
        self.monitor.reset();
        let seed = match self.first.calculate_unknown_voltages(problem) {
            Ok(v) => v,
            Err(SolveError::Collapse(collapse)) => {
                debug!(
                    iterations = collapse.iterations,
                    "first stage collapsed, seeding second stage with its best iterate"
                );
                collapse.best_iterate
            }
            Err(fatal) => return Err(fatal),
        };
        let mut seeded = problem.clone();
        seeded.initial_voltages = seed;
        self.second.calculate_unknown_voltages(&seeded)
    }

    fn progress_handle(&self) -> &ProgressMonitor {
        &self.monitor
    }

    fn attach_progress(&mut self, monitor: ProgressMonitor) {
        self.first.attach_progress(monitor.section(0.0, 0.5));
        self.second.attach_progress(monitor.section(0.5, 0.5));
        self.monitor = monitor;
    }
}

/// Tries a sequence of calculators until one converges.
///
/// Every stage starts from the problem's own initial voltages, not from the
/// failed stage's iterate; a diverged estimate from one method is a poor
/// seed for a structurally different one. The last collapse is reported
/// when every stage fails; a fatal external-solver fault ends the cascade
/// immediately, since retrying a dead backend cannot succeed.
pub struct CombinedFallback {
    stages: Vec<Box<dyn NodeVoltageCalculator>>,
    monitor: ProgressMonitor,
}

impl CombinedFallback {
    pub fn new(mut stages: Vec<Box<dyn NodeVoltageCalculator>>) -> Self {
        assert!(!stages.is_empty(), "fallback cascade needs a stage");
        let monitor = ProgressMonitor::default();
        attach_sections(&mut stages, &monitor);
        Self { stages, monitor }
    }
}

fn attach_sections(stages: &mut [Box<dyn NodeVoltageCalculator>], monitor: &ProgressMonitor) {
    let share = 1.0 / stages.len() as f64;
    for (slot, stage) in stages.iter_mut().enumerate() {
        stage.attach_progress(monitor.section(slot as f64 * share, share));
    }
}

impl NodeVoltageCalculator for CombinedFallback {
    fn calculate_unknown_voltages(
        &mut self,
        problem: &PowerFlowProblem,
    ) -> Result<DVector<Complex64>, SolveError> {
        self.monitor.reset();
        let count = self.stages.len();
        let mut last_collapse = None;
        for (slot, stage) in self.stages.iter_mut().enumerate() {
            match stage.calculate_unknown_voltages(problem) {
                Ok(v) => {
                    self.monitor
                        .report(1.0, problem.relative_power_error(&v));
                    return Ok(v);
                }
                Err(SolveError::Collapse(collapse)) => {
                    if slot + 1 < count {
                        warn!(
                            stage = slot,
                            iterations = collapse.iterations,
                            relative_power_error = collapse.relative_power_error,
                            "stage did not converge, escalating to the next method"
                        );
                    }
                    last_collapse = Some(collapse);
                }
                Err(fatal) => return Err(fatal),
            }
        }
        Err(last_collapse.expect("at least one stage ran").into())
    }

    fn progress_handle(&self) -> &ProgressMonitor {
        &self.monitor
    }

    fn attach_progress(&mut self, monitor: ProgressMonitor) {
        attach_sections(&mut self.stages, &monitor);
        self.monitor = monitor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::admittance::AdmittanceMatrix;
    use crate::basic::calculator::{
        CalculatorConfig, CurrentIteration, NewtonRaphson, NodePotentialMethod, PqBus,
    };
    use approx::assert_relative_eq;
    use nalgebra::dvector;

    fn load_problem(power: Complex64) -> PowerFlowProblem {
        let mut engine = AdmittanceMatrix::new(3);
        engine.add_connection(0, 1, Complex64::new(100.0, 0.0)).unwrap();
        engine.add_connection(0, 2, Complex64::new(1e6, 0.0)).unwrap();
        let (reduced, extra) = engine
            .create_reduced_admittance_matrix(&[0, 1], &[2], &dvector![Complex64::new(1.0, 0.0)])
            .unwrap();
        PowerFlowProblem {
            admittances: reduced,
            row_sums: engine.row_sums().rows(0, 2).into_owned(),
            nominal_voltage: 1.0,
            initial_voltages: DVector::from_element(2, Complex64::new(1.0, 0.0)),
            constant_currents: extra,
            pq_buses: vec![PqBus { index: 1, power }],
            pv_buses: vec![],
        }
    }

    fn cascade(config: &CalculatorConfig) -> CombinedFallback {
        CombinedFallback::new(vec![
            Box::new(CurrentIteration::new(config)),
            Box::new(NewtonRaphson::new(config)),
        ])
    }

    #[test]
    fn two_step_seeds_second_stage() {
        let config = CalculatorConfig {
            target_precision: 1e-8,
            ..Default::default()
        };
        let mut two_step = TwoStepMethod::new(
            Box::new(NodePotentialMethod::new(&config)),
            Box::new(NewtonRaphson::new(&config)),
        );
        let problem = load_problem(Complex64::new(-1.0, 0.0));
        let v = two_step.calculate_unknown_voltages(&problem).unwrap();
        assert_relative_eq!(v[1].re, 0.98990, epsilon = 1e-4);
        assert_relative_eq!(two_step.progress(), 1.0);
    }

    #[test]
    fn fallback_returns_first_success() {
        let config = CalculatorConfig::default();
        let mut fallback = cascade(&config);
        let problem = load_problem(Complex64::new(-1.0, 0.0));
        let v = fallback.calculate_unknown_voltages(&problem).unwrap();
        assert_relative_eq!(v[1].re, 0.98990, epsilon = 1e-4);
    }

    #[test]
    fn fallback_escalates_past_a_starved_first_stage() {
        // One iteration is not enough for the fixed point method, so the
        // cascade must hand the problem to Newton-Raphson.
        let config = CalculatorConfig {
            maximum_iterations: 1,
            ..Default::default()
        };
        let newton_config = CalculatorConfig {
            maximum_iterations: 50,
            target_precision: 1e-8,
            ..Default::default()
        };
        let mut fallback = CombinedFallback::new(vec![
            Box::new(CurrentIteration::new(&config)),
            Box::new(NewtonRaphson::new(&newton_config)),
        ]);
        let problem = load_problem(Complex64::new(-1.0, 0.0));
        let v = fallback.calculate_unknown_voltages(&problem).unwrap();
        assert_relative_eq!(v[1].re, 0.98990, epsilon = 1e-4);
    }

    #[test]
    fn fallback_reports_last_collapse() {
        let config = CalculatorConfig {
            maximum_iterations: 5,
            ..Default::default()
        };
        let mut fallback = cascade(&config);
        let problem = load_problem(Complex64::new(-1e4, 0.0));
        let err = fallback
            .calculate_unknown_voltages(&problem)
            .unwrap_err()
            .collapse()
            .unwrap();
        assert_eq!(err.best_iterate.len(), 2);
    }

    /// Stands in for a backend whose native handle could not be allocated.
    struct DeadBackend(ProgressMonitor);

    impl NodeVoltageCalculator for DeadBackend {
        fn calculate_unknown_voltages(
            &mut self,
            _problem: &PowerFlowProblem,
        ) -> Result<DVector<Complex64>, SolveError> {
            Err(SolveError::External(
                "native solver allocation failed with handle -1".into(),
            ))
        }

        fn progress_handle(&self) -> &ProgressMonitor {
            &self.0
        }

        fn attach_progress(&mut self, monitor: ProgressMonitor) {
            self.0 = monitor;
        }
    }

    #[test]
    fn fatal_external_fault_ends_the_cascade() {
        let config = CalculatorConfig::default();
        let mut fallback = CombinedFallback::new(vec![
            Box::new(DeadBackend(ProgressMonitor::default())),
            Box::new(NewtonRaphson::new(&config)),
        ]);
        // The problem is trivially solvable; a later stage must not get it.
        let problem = load_problem(Complex64::new(-1.0, 0.0));
        let err = fallback.calculate_unknown_voltages(&problem).unwrap_err();
        assert!(matches!(err, SolveError::External(_)));
    }

    #[test]
    fn two_step_propagates_a_fatal_first_stage() {
        let config = CalculatorConfig::default();
        let mut two_step = TwoStepMethod::new(
            Box::new(DeadBackend(ProgressMonitor::default())),
            Box::new(NewtonRaphson::new(&config)),
        );
        let problem = load_problem(Complex64::new(-1.0, 0.0));
        let err = two_step.calculate_unknown_voltages(&problem).unwrap_err();
        assert!(matches!(err, SolveError::External(_)));
    }
}
