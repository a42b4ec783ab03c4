use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use crate::api::v1beta1::{Condition, ConditionStatus};

/// Merges `new_condition` into `conditions` by type and reports whether anything moved.
///
/// `lastTransitionTime` is stamped when the type is new or its status flips, otherwise
/// the existing timestamp is kept.
pub fn set_status_condition(
    conditions: &[Condition],
    mut new_condition: Condition,
) -> (Vec<Condition>, bool) {
    let mut merged = conditions.to_vec();

    match merged.iter().position(|c| c.type_ == new_condition.type_) {
        Some(index) => {
            let existing = &mut merged[index];
            new_condition.last_transition_time = if existing.status == new_condition.status {
                existing.last_transition_time.clone()
            } else {
                Time(Utc::now())
            };
            let changed = *existing != new_condition;
            *existing = new_condition;
            (merged, changed)
        }
        None => {
            new_condition.last_transition_time = Time(Utc::now());
            merged.push(new_condition);
            (merged, true)
        }
    }
}

/// Finds the condition_type in conditions.
pub fn find_status_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|condition| condition.type_ == condition_type)
}

/// Returns true when the condition_type is present and set to `True`
pub fn is_status_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    is_status_condition_present_and_equal(conditions, condition_type, ConditionStatus::True)
}

/// Returns true when the condition_type is present and set to `False`
pub fn is_status_condition_false(conditions: &[Condition], condition_type: &str) -> bool {
    is_status_condition_present_and_equal(conditions, condition_type, ConditionStatus::False)
}

/// Returns true when condition_type is present and equal to status.
pub fn is_status_condition_present_and_equal(
    conditions: &[Condition],
    condition_type: &str,
    status: ConditionStatus,
) -> bool {
    conditions
        .iter()
        .any(|condition| condition.type_ == condition_type && condition.status == status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1beta1::Severity;
    use chrono::TimeZone;

    fn condition(status: ConditionStatus, reason: &str) -> Condition {
        Condition {
            type_: "InputReady".to_string(),
            status,
            severity: None,
            reason: reason.to_string(),
            message: "Test message".to_string(),
            last_transition_time: Time(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    #[test]
    fn test_set_status_condition() {
        let conditions = Vec::new();

        let (conditions, changed) =
            set_status_condition(&conditions, condition(ConditionStatus::Unknown, "Init"));
        assert!(changed);
        assert_eq!(conditions.len(), 1);

        let mut updated = condition(ConditionStatus::False, "InputMissing");
        updated.severity = Some(Severity::Warning);
        let (conditions, changed) = set_status_condition(&conditions, updated);
        assert!(changed);
        assert_eq!(conditions.len(), 1);
        assert!(is_status_condition_false(&conditions, "InputReady"));
        assert_eq!(conditions[0].severity, Some(Severity::Warning));
    }

    #[test]
    fn unchanged_status_keeps_transition_time() {
        let original = vec![condition(ConditionStatus::True, "Ready")];
        let mut same = condition(ConditionStatus::True, "Ready");
        same.last_transition_time = Time(Utc::now());

        let (conditions, changed) = set_status_condition(&original, same);
        assert!(!changed);
        assert_eq!(conditions[0].last_transition_time, original[0].last_transition_time);
        assert!(is_status_condition_true(&conditions, "InputReady"));
        assert!(find_status_condition(&conditions, "Ready").is_none());
    }
}
