use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::fmt;

use crate::api::v1beta1::{Condition, ConditionStatus, Severity};
use crate::util::errors::Error;
use crate::util::status::{find_status_condition, set_status_condition};

// Constants for condition types
pub const READY_CONDITION: &str = "Ready";
pub const INPUT_READY_CONDITION: &str = "InputReady";
pub const SERVICE_CONFIG_READY_CONDITION: &str = "ServiceConfigReady";
pub const DEPLOYMENT_READY_CONDITION: &str = "DeploymentReady";
pub const EXPOSE_SERVICE_READY_CONDITION: &str = "ExposeServiceReady";
pub const KEYSTONE_ENDPOINT_READY_CONDITION: &str = "KeystoneEndpointReady";

/// Conditions that feed the aggregate `Ready`, in pipeline order.
pub const TRACKED_CONDITIONS: [&str; 5] = [
    INPUT_READY_CONDITION,
    SERVICE_CONFIG_READY_CONDITION,
    DEPLOYMENT_READY_CONDITION,
    EXPOSE_SERVICE_READY_CONDITION,
    KEYSTONE_ENDPOINT_READY_CONDITION,
];

// Status reasons for conditions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusReason {
    Init,
    Ready,
    InputMissing,
    RenderError,
    ApplyConflict,
    WorkloadNotReady,
    EndpointNotReady,
    Fatal,
    Error,
}

impl fmt::Display for StatusReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StatusReason::Init => write!(f, "Init"),
            StatusReason::Ready => write!(f, "Ready"),
            StatusReason::InputMissing => write!(f, "InputMissing"),
            StatusReason::RenderError => write!(f, "RenderError"),
            StatusReason::ApplyConflict => write!(f, "ApplyConflict"),
            StatusReason::WorkloadNotReady => write!(f, "WorkloadNotReady"),
            StatusReason::EndpointNotReady => write!(f, "EndpointNotReady"),
            StatusReason::Fatal => write!(f, "Fatal"),
            StatusReason::Error => write!(f, "Error"),
        }
    }
}

/// Per-pass view of the conditions of one GlanceAPI.
///
/// A ledger starts from the baseline (`Ready=False`, everything else
/// `Unknown`) and is turned back into a condition list with
/// [`ConditionLedger::into_conditions`], which recomputes `Ready` and keeps the
/// previous `lastTransitionTime` of every condition whose status did not move.
pub struct ConditionLedger {
    previous: Vec<Condition>,
    conditions: Vec<Condition>,
}

impl ConditionLedger {
    pub fn init(previous: &[Condition]) -> Self {
        let mut conditions = vec![new_condition(
            READY_CONDITION,
            ConditionStatus::False,
            Some(Severity::Info),
            StatusReason::Init,
            "Setup started",
        )];
        conditions.extend(TRACKED_CONDITIONS.iter().map(|type_| {
            new_condition(
                type_,
                ConditionStatus::Unknown,
                None,
                StatusReason::Init,
                "Setup started",
            )
        }));

        Self {
            previous: previous.to_vec(),
            conditions,
        }
    }

    pub fn get(&self, condition_type: &str) -> Option<&Condition> {
        find_status_condition(&self.conditions, condition_type)
    }

    pub fn is_true(&self, condition_type: &str) -> bool {
        self.get(condition_type).map(Condition::is_true).unwrap_or(false)
    }

    pub fn mark_true(&mut self, condition_type: &str, message: &str) {
        self.set(new_condition(
            condition_type,
            ConditionStatus::True,
            None,
            StatusReason::Ready,
            message,
        ));
    }

    pub fn mark_false(
        &mut self,
        condition_type: &str,
        reason: StatusReason,
        severity: Severity,
        message: &str,
    ) {
        self.set(new_condition(
            condition_type,
            ConditionStatus::False,
            Some(severity),
            reason,
            message,
        ));
    }

    /// Records a failed step, taking reason and severity from the error.
    pub fn mark_error(&mut self, condition_type: &str, error: &Error) {
        let mut condition = new_condition(
            condition_type,
            ConditionStatus::False,
            Some(error.severity()),
            StatusReason::Error,
            &error.to_string(),
        );
        condition.reason = error.reason().to_string();
        self.set(condition);
    }

    /// Marks the aggregate `Ready` as a terminal failure of the resource itself.
    pub fn mark_fatal(&mut self, message: &str) {
        self.mark_false(READY_CONDITION, StatusReason::Fatal, Severity::Error, message);
    }

    pub fn all_true(&self) -> bool {
        TRACKED_CONDITIONS.iter().all(|c| self.is_true(c))
    }

    /// Recomputes `Ready` from the tracked conditions.
    fn mirror_ready(&mut self) {
        if matches!(self.get(READY_CONDITION), Some(c) if c.reason == StatusReason::Fatal.to_string()) {
            return;
        }

        if self.all_true() {
            self.mark_true(READY_CONDITION, "Setup complete");
            return;
        }

        let worst = TRACKED_CONDITIONS
            .iter()
            .filter_map(|c| self.get(c))
            .fold(None::<&Condition>, |worst, c| match worst {
                Some(w) if rank(w) >= rank(c) => Some(w),
                _ => Some(c),
            })
            .cloned();

        if let Some(worst) = worst {
            let mut ready = new_condition(
                READY_CONDITION,
                ConditionStatus::False,
                Some(worst.severity.unwrap_or(Severity::Info)),
                StatusReason::Init,
                &worst.message,
            );
            ready.reason = worst.reason;
            self.set(ready);
        }
    }

    pub fn into_conditions(mut self) -> Vec<Condition> {
        self.mirror_ready();

        let mut persisted: Vec<Condition> = self
            .previous
            .into_iter()
            .filter(|c| order(&c.type_).is_some())
            .collect();
        for condition in self.conditions {
            let (next, _changed) = set_status_condition(&persisted, condition);
            persisted = next;
        }
        persisted.sort_by_key(|c| order(&c.type_));
        persisted
    }

    fn set(&mut self, condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }
}

fn new_condition(
    condition_type: &str,
    status: ConditionStatus,
    severity: Option<Severity>,
    reason: StatusReason,
    message: &str,
) -> Condition {
    Condition {
        type_: condition_type.to_string(),
        status,
        severity,
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: Time(Utc::now()),
    }
}

/// Badness of a condition when picking what `Ready` reports.
fn rank(condition: &Condition) -> u8 {
    match (condition.status, condition.severity) {
        (ConditionStatus::True, _) => 0,
        (ConditionStatus::Unknown, _) => 1,
        (ConditionStatus::False, Some(Severity::Error)) => 4,
        (ConditionStatus::False, Some(Severity::Warning)) => 3,
        (ConditionStatus::False, _) => 2,
    }
}

fn order(condition_type: &str) -> Option<usize> {
    std::iter::once(READY_CONDITION)
        .chain(TRACKED_CONDITIONS)
        .position(|c| c == condition_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::errors::StdError;
    use crate::util::status::is_status_condition_false;
    use chrono::TimeZone;

    #[test]
    fn baseline_is_not_ready() {
        let conditions = ConditionLedger::init(&[]).into_conditions();

        assert_eq!(conditions.len(), 6);
        assert_eq!(conditions[0].type_, READY_CONDITION);
        assert!(is_status_condition_false(&conditions, READY_CONDITION));
        assert!(conditions[1..]
            .iter()
            .all(|c| c.status == ConditionStatus::Unknown));
    }

    #[test]
    fn ready_is_true_only_when_every_input_is() {
        let mut ledger = ConditionLedger::init(&[]);
        for c in &TRACKED_CONDITIONS[..4] {
            ledger.mark_true(c, "done");
        }
        assert!(!ledger.all_true());

        ledger.mark_true(KEYSTONE_ENDPOINT_READY_CONDITION, "done");
        let conditions = ledger.into_conditions();
        let ready = find_status_condition(&conditions, READY_CONDITION).unwrap();
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(ready.severity, None);
    }

    #[test]
    fn ready_reflects_the_worst_input() {
        let mut ledger = ConditionLedger::init(&[]);
        ledger.mark_true(INPUT_READY_CONDITION, "ok");
        ledger.mark_false(
            SERVICE_CONFIG_READY_CONDITION,
            StatusReason::RenderError,
            Severity::Warning,
            "template failed",
        );
        ledger.mark_false(
            DEPLOYMENT_READY_CONDITION,
            StatusReason::WorkloadNotReady,
            Severity::Info,
            "waiting",
        );

        let conditions = ledger.into_conditions();
        let ready = find_status_condition(&conditions, READY_CONDITION).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "RenderError");
        assert_eq!(ready.severity, Some(Severity::Warning));
        assert_eq!(ready.message, "template failed");
    }

    #[test]
    fn errors_set_reason_from_taxonomy() {
        let mut ledger = ConditionLedger::init(&[]);
        let err = Error::StdError(StdError::InputMissing("secret/osp-secret".into()));
        ledger.mark_error(INPUT_READY_CONDITION, &err);

        let input = ledger.get(INPUT_READY_CONDITION).unwrap();
        assert_eq!(input.reason, "InputMissing");
        assert_eq!(input.severity, Some(Severity::Warning));
    }

    #[test]
    fn fatal_ready_is_not_overwritten() {
        let mut ledger = ConditionLedger::init(&[]);
        ledger.mark_fatal("replicas must be >= 0");
        let conditions = ledger.into_conditions();
        let ready = find_status_condition(&conditions, READY_CONDITION).unwrap();
        assert_eq!(ready.reason, "Fatal");
        assert_eq!(ready.severity, Some(Severity::Error));
    }

    #[test]
    fn transition_time_survives_an_identical_pass() {
        let first = ConditionLedger::init(&[]).into_conditions();
        let mut aged = first.clone();
        let old = Time(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        for c in aged.iter_mut() {
            c.last_transition_time = old.clone();
        }

        let second = ConditionLedger::init(&aged).into_conditions();
        assert_eq!(second, aged);
    }

    #[test]
    fn stale_condition_types_are_dropped() {
        let mut previous = ConditionLedger::init(&[]).into_conditions();
        previous.push(Condition {
            type_: "Legacy".into(),
            status: ConditionStatus::True,
            severity: None,
            reason: "Ready".into(),
            message: String::new(),
            last_transition_time: Time(Utc::now()),
        });

        let conditions = ConditionLedger::init(&previous).into_conditions();
        assert!(find_status_condition(&conditions, "Legacy").is_none());
    }
}
