//! Per request type, the ordered sequence of units that must approve before
//! the generic climb to the tree root takes over.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::request::RequestType;
use crate::domain::unit::UnitId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub request_type: RequestType,
    pub step_number: u32,
    pub unit_id: UnitId,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("step {step_number} belongs to `{found}`, not to plan `{expected}`")]
    MismatchedType { expected: RequestType, found: RequestType, step_number: u32 },
    #[error("plan `{request_type}` must number steps 1..=N without gaps: expected {expected}, found {found}")]
    NonContiguous { request_type: RequestType, expected: u32, found: u32 },
}

/// Where a freshly submitted request lands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartingPoint {
    pub step_number: u32,
    pub unit_id: UnitId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPlan {
    request_type: RequestType,
    steps: Vec<ApprovalStep>,
    entry_unit_id: Option<UnitId>,
}

impl StepPlan {
    pub fn empty(request_type: RequestType) -> Self {
        Self { request_type, steps: Vec::new(), entry_unit_id: None }
    }

    /// Builds a plan from stored rows, rejecting anything that is not a
    /// contiguous 1..=N sequence for a single type.
    pub fn new(request_type: RequestType, mut steps: Vec<ApprovalStep>) -> Result<Self, PlanError> {
        steps.sort_by_key(|step| step.step_number);

        for (index, step) in steps.iter().enumerate() {
            if step.request_type != request_type {
                return Err(PlanError::MismatchedType {
                    expected: request_type,
                    found: step.request_type,
                    step_number: step.step_number,
                });
            }
            let expected = index as u32 + 1;
            if step.step_number != expected {
                return Err(PlanError::NonContiguous {
                    request_type,
                    expected,
                    found: step.step_number,
                });
            }
        }

        Ok(Self { request_type, steps, entry_unit_id: None })
    }

    pub fn from_units<I>(request_type: RequestType, units: I) -> Self
    where
        I: IntoIterator<Item = UnitId>,
    {
        let steps = units
            .into_iter()
            .enumerate()
            .map(|(index, unit_id)| ApprovalStep {
                request_type,
                step_number: index as u32 + 1,
                unit_id,
            })
            .collect();

        Self { request_type, steps, entry_unit_id: None }
    }

    pub fn with_entry_unit(mut self, entry_unit_id: Option<UnitId>) -> Self {
        self.entry_unit_id = entry_unit_id;
        self
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    pub fn steps(&self) -> &[ApprovalStep] {
        &self.steps
    }

    pub fn entry_unit_id(&self) -> Option<&UnitId> {
        self.entry_unit_id.as_ref()
    }

    pub fn len(&self) -> u32 {
        self.steps.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get_step(&self, step_number: u32) -> Option<&ApprovalStep> {
        if step_number == 0 {
            return None;
        }
        self.steps.get(step_number as usize - 1)
    }

    /// Step 1 when the plan has steps, otherwise the configured entry unit at
    /// step 0. `None` means the type cannot be submitted.
    pub fn starting_point(&self) -> Option<StartingPoint> {
        if let Some(first) = self.steps.first() {
            return Some(StartingPoint { step_number: 1, unit_id: first.unit_id.clone() });
        }

        self.entry_unit_id
            .as_ref()
            .map(|unit_id| StartingPoint { step_number: 0, unit_id: unit_id.clone() })
    }

    pub fn unit_ids(&self) -> impl Iterator<Item = &UnitId> {
        self.steps.iter().map(|step| &step.unit_id)
    }
}

#[cfg(test)]
mod tests {
    use super::{ApprovalStep, PlanError, StartingPoint, StepPlan};
    use crate::domain::request::RequestType;
    use crate::domain::unit::UnitId;

    fn unit(id: &str) -> UnitId {
        UnitId(id.to_string())
    }

    fn step(request_type: RequestType, step_number: u32, unit_id: &str) -> ApprovalStep {
        ApprovalStep { request_type, step_number, unit_id: unit(unit_id) }
    }

    #[test]
    fn from_units_numbers_steps_contiguously() {
        let plan = StepPlan::from_units(
            RequestType::Ferpa,
            [unit("unit-records"), unit("unit-root")],
        );

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.get_step(1).map(|s| &s.unit_id), Some(&unit("unit-records")));
        assert_eq!(plan.get_step(2).map(|s| s.step_number), Some(2));
        assert!(plan.get_step(0).is_none());
        assert!(plan.get_step(3).is_none());
    }

    #[test]
    fn stored_rows_are_sorted_then_validated() {
        let plan = StepPlan::new(
            RequestType::StudentDrop,
            vec![
                step(RequestType::StudentDrop, 2, "unit-root"),
                step(RequestType::StudentDrop, 1, "unit-advising"),
            ],
        )
        .expect("contiguous plan");

        assert_eq!(plan.get_step(1).map(|s| &s.unit_id), Some(&unit("unit-advising")));
    }

    #[test]
    fn gaps_and_duplicates_are_rejected() {
        let gap = StepPlan::new(
            RequestType::StudentDrop,
            vec![
                step(RequestType::StudentDrop, 1, "unit-advising"),
                step(RequestType::StudentDrop, 3, "unit-root"),
            ],
        )
        .expect_err("gap must be rejected");
        assert!(matches!(gap, PlanError::NonContiguous { expected: 2, found: 3, .. }));

        let duplicate = StepPlan::new(
            RequestType::StudentDrop,
            vec![
                step(RequestType::StudentDrop, 1, "unit-advising"),
                step(RequestType::StudentDrop, 1, "unit-root"),
            ],
        )
        .expect_err("duplicate must be rejected");
        assert!(matches!(duplicate, PlanError::NonContiguous { expected: 2, found: 1, .. }));
    }

    #[test]
    fn foreign_steps_are_rejected() {
        let error = StepPlan::new(
            RequestType::Ferpa,
            vec![step(RequestType::MedicalWithdrawal, 1, "unit-health")],
        )
        .expect_err("mixed types must be rejected");

        assert!(matches!(error, PlanError::MismatchedType { .. }));
    }

    #[test]
    fn starting_point_prefers_first_step_then_entry_unit() {
        let with_steps = StepPlan::from_units(RequestType::StudentDrop, [unit("unit-advising")])
            .with_entry_unit(Some(unit("unit-root")));
        assert_eq!(
            with_steps.starting_point(),
            Some(StartingPoint { step_number: 1, unit_id: unit("unit-advising") })
        );

        let zero_steps =
            StepPlan::empty(RequestType::Ferpa).with_entry_unit(Some(unit("unit-records")));
        assert_eq!(
            zero_steps.starting_point(),
            Some(StartingPoint { step_number: 0, unit_id: unit("unit-records") })
        );

        assert_eq!(StepPlan::empty(RequestType::Ferpa).starting_point(), None);
    }
}
