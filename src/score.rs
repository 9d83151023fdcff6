//! Composite progress score computation.

use crate::error::EngineError;

/// Combine a primary metric with completion progress into a single score.
///
/// The product makes both dimensions necessary: a perfect metric with zero
/// completed tasks scores zero, and a fully completed task list with a
/// near-zero metric scores near zero. The result lies in
/// `[0, primary_metric]` because the progress fraction lies in `[0, 1]`.
pub fn composite_score(
    primary_metric: f64,
    tasks_completed: u32,
    total_tasks: u32,
) -> Result<f64, EngineError> {
    if total_tasks == 0 {
        return Err(EngineError::InvalidConfiguration(
            "total task count must not be zero".into(),
        ));
    }

    if tasks_completed > total_tasks {
        return Err(EngineError::InvalidArgument(format!(
            "tasks completed ({tasks_completed}) exceeds total tasks ({total_tasks})"
        )));
    }

    if !(0.0..=1.0).contains(&primary_metric) {
        return Err(EngineError::InvalidArgument(format!(
            "primary metric {primary_metric} outside [0, 1]"
        )));
    }

    Ok(primary_metric * (f64::from(tasks_completed) / f64::from(total_tasks)))
}
