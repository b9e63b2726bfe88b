//! Short-circuit and finalize policies for field-aware permission scans.
//!
//! A scan walks the entity-level expression and then each field-level
//! expression, asking the strategy after every step whether the verdict
//! is already settled. `AnyField` answers "may the requester touch the
//! resource at all" (one readable field suffices); `SpecificField`
//! answers "may the requester touch exactly this field".

/// How multiple branches combine inside one expression: `Any` grants on a
/// single passing branch, `All` demands every branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    Any,
    All,
}

/// Aggregate state accumulated over one field-aware scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOutcome {
    pub has_passing_check: bool,
    pub has_deferred_check: bool,
    pub has_field_checks: bool,
    pub entity_failed: bool,
}

/// Evaluation policy for a field-aware scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    AnyField,
    SpecificField,
}

impl Strategy {
    /// Whether the scan keeps going after the entity-level expression
    /// passed.
    pub fn continue_on_entity_success(self, mode: CheckMode) -> bool {
        match self {
            // under ANY semantics an entity-level pass already suffices
            Strategy::AnyField => mode != CheckMode::Any,
            Strategy::SpecificField => true,
        }
    }

    /// Whether the scan keeps going after a field-level expression failed.
    pub fn continue_on_field_failure(self, mode: CheckMode, has_deferred: bool) -> bool {
        match self {
            Strategy::AnyField => true,
            // keep going only while a deferred check could still rescue
            // the field
            Strategy::SpecificField => mode != CheckMode::All && has_deferred,
        }
    }

    /// Final verdict once the scan completes; `false` means deny.
    pub fn finalize(self, outcome: &ScanOutcome) -> bool {
        match self {
            Strategy::AnyField => outcome.has_passing_check || outcome.has_deferred_check,
            Strategy::SpecificField => {
                if !outcome.has_field_checks && outcome.entity_failed {
                    return false;
                }
                outcome.has_passing_check || outcome.has_deferred_check
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_field_stops_on_entity_pass_only_in_any_mode() {
        assert!(!Strategy::AnyField.continue_on_entity_success(CheckMode::Any));
        assert!(Strategy::AnyField.continue_on_entity_success(CheckMode::All));
        assert!(Strategy::SpecificField.continue_on_entity_success(CheckMode::Any));
        assert!(Strategy::SpecificField.continue_on_entity_success(CheckMode::All));
    }

    #[test]
    fn test_any_field_always_scans_past_field_failures() {
        assert!(Strategy::AnyField.continue_on_field_failure(CheckMode::Any, false));
        assert!(Strategy::AnyField.continue_on_field_failure(CheckMode::All, true));
    }

    #[test]
    fn test_specific_field_aborts_unless_a_deferred_check_could_rescue() {
        assert!(Strategy::SpecificField.continue_on_field_failure(CheckMode::Any, true));
        assert!(!Strategy::SpecificField.continue_on_field_failure(CheckMode::Any, false));
        assert!(!Strategy::SpecificField.continue_on_field_failure(CheckMode::All, true));
        assert!(!Strategy::SpecificField.continue_on_field_failure(CheckMode::All, false));
    }

    // An inline failure with a pending deferred check must not deny early:
    // the commit phase may still grant.
    #[test]
    fn test_any_field_deferred_rescues_a_failed_scan() {
        let outcome = ScanOutcome {
            has_passing_check: false,
            has_deferred_check: true,
            has_field_checks: true,
            entity_failed: false,
        };
        assert!(Strategy::AnyField.finalize(&outcome));
    }

    #[test]
    fn test_any_field_denies_when_nothing_passed_or_deferred() {
        let outcome = ScanOutcome {
            has_passing_check: false,
            has_deferred_check: false,
            has_field_checks: true,
            entity_failed: true,
        };
        assert!(!Strategy::AnyField.finalize(&outcome));
    }

    // An entity-level failure with no field-level override denies even
    // when a deferred check exists.
    #[test]
    fn test_specific_field_entity_failure_without_field_checks_denies() {
        let outcome = ScanOutcome {
            has_passing_check: false,
            has_deferred_check: true,
            has_field_checks: false,
            entity_failed: true,
        };
        assert!(!Strategy::SpecificField.finalize(&outcome));
    }

    #[test]
    fn test_specific_field_field_checks_shadow_entity_failure() {
        let outcome = ScanOutcome {
            has_passing_check: true,
            has_deferred_check: false,
            has_field_checks: true,
            entity_failed: true,
        };
        assert!(Strategy::SpecificField.finalize(&outcome));
    }

    #[test]
    fn test_specific_field_denies_when_nothing_passed_or_deferred() {
        let outcome = ScanOutcome {
            has_passing_check: false,
            has_deferred_check: false,
            has_field_checks: true,
            entity_failed: false,
        };
        assert!(!Strategy::SpecificField.finalize(&outcome));
    }
}
