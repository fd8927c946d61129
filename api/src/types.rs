use serde::{Deserialize, Serialize};

macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new_v4() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

newtype_id!(UserId);
newtype_id!(MatchRequestId);
newtype_id!(PartnerId);
newtype_id!(ChatId);
newtype_id!(MessageId);
newtype_id!(NoteId);
newtype_id!(ReportId);
newtype_id!(SubscriptionId);

/// Validated, lowercased email address with its local part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    address: String,
    at: usize,
}

impl Email {
    /// Validates `input` and, when `allowed_domain` is set, requires the
    /// address to belong to it (e.g. `virginia.edu`).
    pub fn parse(input: &str, allowed_domain: Option<&str>) -> Result<Self, String> {
        let address = input.trim().to_ascii_lowercase();
        let at = address
            .find('@')
            .ok_or_else(|| "email must contain '@'".to_string())?;
        let (local, domain) = (&address[..at], &address[at + 1..]);
        if local.is_empty() || domain.is_empty() {
            return Err("email must have a local part and a domain".into());
        }
        if domain.contains('@') || !domain.contains('.') {
            return Err("email domain is invalid".into());
        }
        if !local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-'))
        {
            return Err("email contains invalid characters".into());
        }
        if let Some(allowed) = allowed_domain
            && !domain.eq_ignore_ascii_case(allowed)
        {
            return Err(format!("email must be a {allowed} address"));
        }
        Ok(Self { address, at })
    }

    pub fn as_str(&self) -> &str {
        &self.address
    }

    /// Part before `@`, used as the computing ID.
    pub fn local_part(&self) -> &str {
        &self.address[..self.at]
    }
}
