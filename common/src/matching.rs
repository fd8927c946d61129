use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StudyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Accepted,
    Rejected,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = StudyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(StudyError::InvalidValue(format!(
                "unknown match status: {other}"
            ))),
        }
    }
}

/// Unordered pair of users studying one course together.
///
/// The two ids are stored sorted so that `(a, b)` and `(b, a)` produce the
/// same key. Storage uses the same ordering for its uniqueness constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartnerKey {
    pub user_a: String,
    pub user_b: String,
    pub course: String,
}

impl PartnerKey {
    pub fn new(first: &str, second: &str, course: &str) -> Result<Self, StudyError> {
        if first == second {
            return Err(StudyError::NotAllowed(
                "cannot partner with yourself".into(),
            ));
        }
        let (user_a, user_b) = ordered_pair(first, second);
        Ok(Self {
            user_a: user_a.to_string(),
            user_b: user_b.to_string(),
            course: course.to_string(),
        })
    }

    pub fn other(&self, user_id: &str) -> Option<&str> {
        if self.user_a == user_id {
            Some(&self.user_b)
        } else if self.user_b == user_id {
            Some(&self.user_a)
        } else {
            None
        }
    }
}

/// Sorts two user ids so every unordered pair has a single representation.
pub fn ordered_pair<'a>(first: &'a str, second: &'a str) -> (&'a str, &'a str) {
    if first <= second {
        (first, second)
    } else {
        (second, first)
    }
}

/// Borrowed view over a stored match request.
#[derive(Debug, Clone, Copy)]
pub struct RequestView<'a> {
    pub id: &'a str,
    pub sender_id: &'a str,
    pub receiver_id: Option<&'a str>,
    pub course: &'a str,
    pub status: MatchStatus,
    pub is_direct: bool,
}

impl RequestView<'_> {
    /// Pending and not yet claimed by anyone.
    pub fn is_open(&self) -> bool {
        self.status == MatchStatus::Pending && self.receiver_id.is_none()
    }
}

/// Keeps the open requests a viewer may apply to.
///
/// Drops the viewer's own requests, requests from `hidden_users` (blocked in
/// either direction) and requests for a course the viewer already partners
/// on with that sender. `course = None` accepts every course.
pub fn filter_open_requests<'a>(
    requests: impl IntoIterator<Item = RequestView<'a>>,
    viewer: &str,
    course: Option<&str>,
    hidden_users: &HashSet<String>,
    partnered: &HashSet<PartnerKey>,
) -> Vec<RequestView<'a>> {
    requests
        .into_iter()
        .filter(|r| r.is_open())
        .filter(|r| r.sender_id != viewer)
        .filter(|r| course.is_none_or(|c| r.course == c))
        .filter(|r| !hidden_users.contains(r.sender_id))
        .filter(|r| match PartnerKey::new(viewer, r.sender_id, r.course) {
            Ok(key) => !partnered.contains(&key),
            Err(_) => false,
        })
        .collect()
}

/// Checks that `applicant` may claim the request.
pub fn check_apply(request: &RequestView<'_>, applicant: &str) -> Result<(), StudyError> {
    if request.sender_id == applicant {
        return Err(StudyError::NotAllowed(
            "cannot apply to your own match request".into(),
        ));
    }
    if !request.is_open() {
        return Err(StudyError::InvalidState(
            "match request is no longer open".into(),
        ));
    }
    Ok(())
}

/// Returns the user expected to accept or reject the request.
///
/// Direct requests are answered by their receiver. Open requests are
/// answered by the sender once somebody has applied. An open request nobody
/// applied to yet has no responder.
pub fn responder_for<'a>(request: &RequestView<'a>) -> Option<&'a str> {
    let receiver = request.receiver_id?;
    if request.is_direct {
        Some(receiver)
    } else {
        Some(request.sender_id)
    }
}

/// Checks that `user_id` may accept or reject the request.
pub fn check_respond(request: &RequestView<'_>, user_id: &str) -> Result<(), StudyError> {
    if request.status != MatchStatus::Pending {
        return Err(StudyError::InvalidState(format!(
            "match request is already {}",
            request.status
        )));
    }
    match responder_for(request) {
        Some(responder) if responder == user_id => Ok(()),
        Some(_) => Err(StudyError::NotAllowed(
            "only the other party can respond to this match request".into(),
        )),
        None => Err(StudyError::InvalidState(
            "nobody has applied to this match request yet".into(),
        )),
    }
}
