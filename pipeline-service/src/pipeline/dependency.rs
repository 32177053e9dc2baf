use crate::pipeline::models::{StageDefinition, StageRun, StageStatus};

/// Outcome of the dependency gate for one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Run,
    Skip { reason: String },
}

/// Decide whether a stage may run given the stages already processed in this run.
///
/// `processed` holds only the stage runs the orchestrator has already visited in
/// its single left-to-right pass. A dependency that is absent from it (declared
/// later, or never reached) counts as unsatisfied, as does any status other than
/// `success`.
pub fn evaluate(stage: &StageDefinition, processed: &[StageRun]) -> GateDecision {
    for dep in &stage.depends_on {
        match processed.iter().find(|run| &run.name == dep) {
            None => {
                return GateDecision::Skip {
                    reason: format!("Dependency '{}' has not run before this stage", dep),
                }
            }
            Some(run) if run.status != StageStatus::Success => {
                return GateDecision::Skip {
                    reason: format!(
                        "Dependency '{}' finished with status {:?}",
                        dep, run.status
                    ),
                }
            }
            Some(_) => {}
        }
    }

    GateDecision::Run
}
