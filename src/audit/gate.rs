//! Completion gate: which phase a session is in, derived only from collected data.

use super::state::{AuditState, Phase};

/// Decide the next phase from the data the session has collected.
///
/// Pure and idempotent. Checks run from the most advanced phase down, so a
/// session that somehow holds qualification data without earlier phases
/// still reports `Finish`.
pub fn next_phase(state: &AuditState) -> Phase {
    if state
        .qualification_data
        .as_ref()
        .is_some_and(|d| d.is_complete())
    {
        return Phase::Finish;
    }
    if state
        .pain_points_data
        .as_ref()
        .is_some_and(|d| d.is_complete())
    {
        return Phase::Qualification;
    }
    if state
        .discovery_data
        .as_ref()
        .is_some_and(|d| d.is_complete())
    {
        return Phase::PainPoints;
    }
    Phase::Discovery
}

/// The phase a turn should run in.
///
/// The stored `current_phase` is advisory. When it disagrees with the
/// collected data the gate wins.
pub fn resolve_phase(state: &AuditState) -> Phase {
    let gated = next_phase(state);
    if gated != state.current_phase {
        if state.current_phase > gated {
            tracing::warn!(
                claimed = %state.current_phase,
                resolved = %gated,
                "Stored phase is ahead of collected data, resyncing"
            );
        } else {
            tracing::debug!(
                claimed = %state.current_phase,
                resolved = %gated,
                "Advancing stored phase to match collected data"
            );
        }
    }
    gated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::state::{DiscoveryData, PainPointsData, QualificationData};

    fn discovery() -> DiscoveryData {
        DiscoveryData {
            industry: "Technology".into(),
            company_size: "11-50".into(),
        }
    }

    fn pain_points() -> PainPointsData {
        PainPointsData {
            manual_tasks: "Manual data entry".into(),
            bottlenecks: "Slow approvals".into(),
            data_silos: "CRM and billing disconnected".into(),
        }
    }

    fn qualification() -> QualificationData {
        QualificationData {
            budget: "$50,000".into(),
            timeline: "3 months".into(),
        }
    }

    #[test]
    fn empty_state_is_discovery() {
        assert_eq!(next_phase(&AuditState::new()), Phase::Discovery);
    }

    #[test]
    fn each_completed_phase_advances_one_step() {
        let mut state = AuditState::new();
        state.discovery_data = Some(discovery());
        assert_eq!(next_phase(&state), Phase::PainPoints);

        state.pain_points_data = Some(pain_points());
        assert_eq!(next_phase(&state), Phase::Qualification);

        state.qualification_data = Some(qualification());
        assert_eq!(next_phase(&state), Phase::Finish);
    }

    #[test]
    fn qualification_alone_finishes() {
        let mut state = AuditState::new();
        state.qualification_data = Some(qualification());
        assert_eq!(next_phase(&state), Phase::Finish);
    }

    #[test]
    fn blank_fields_do_not_count() {
        let mut state = AuditState::new();
        state.discovery_data = Some(DiscoveryData {
            industry: "Retail".into(),
            company_size: String::new(),
        });
        assert_eq!(next_phase(&state), Phase::Discovery);
    }

    #[test]
    fn gate_is_idempotent() {
        let mut state = AuditState::new();
        state.discovery_data = Some(discovery());
        state.pain_points_data = Some(pain_points());
        let first = next_phase(&state);
        let second = next_phase(&state);
        assert_eq!(first, second);
        assert_eq!(first, Phase::Qualification);
    }

    #[test]
    fn resolve_pulls_claimed_phase_back_to_data() {
        let mut state = AuditState::new();
        state.current_phase = Phase::Qualification;
        state.discovery_data = Some(discovery());
        assert_eq!(resolve_phase(&state), Phase::PainPoints);
    }

    #[test]
    fn resolve_advances_stale_phase() {
        let mut state = AuditState::new();
        state.current_phase = Phase::Discovery;
        state.discovery_data = Some(discovery());
        state.pain_points_data = Some(pain_points());
        assert_eq!(resolve_phase(&state), Phase::Qualification);
    }
}
