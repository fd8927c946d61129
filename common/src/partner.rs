use crate::error::StudyError;
use crate::matching::PartnerKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentState {
    /// Only one side asked to end the partnership.
    Pending,
    /// Both sides asked; the partnership can be removed.
    Complete,
}

/// Checks that `user_id` is one of the two partners.
pub fn check_member(key: &PartnerKey, user_id: &str) -> Result<(), StudyError> {
    if key.other(user_id).is_none() {
        return Err(StudyError::NotAllowed(
            "not a member of this partnership".into(),
        ));
    }
    Ok(())
}

/// Decides whether the recorded delete requests add up to mutual consent.
///
/// `requested_by` is every user that has asked to end the partnership so
/// far. Entries from anyone outside the pair are ignored.
pub fn consent_state(key: &PartnerKey, requested_by: &[String]) -> ConsentState {
    let both = [key.user_a.as_str(), key.user_b.as_str()]
        .iter()
        .all(|member| requested_by.iter().any(|u| u == member));
    if both {
        ConsentState::Complete
    } else {
        ConsentState::Pending
    }
}
