use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Numeric user id, assigned by the users table on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(UserId)
    }
}

/// Who a call runs as, once the gate has resolved its session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
}

impl Identity {
    pub fn new(user_id: UserId) -> Self { Self { user_id } }

    /// Display name derived from the id; no profile data is stored.
    pub fn display_name(&self) -> String {
        format!("User_{}", self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_text_form() {
        assert_eq!(UserId(17).to_string(), "17");
        assert_eq!("17".parse::<UserId>().unwrap(), UserId(17));
        assert!("x".parse::<UserId>().is_err());
        assert_eq!(Identity::new(UserId(1)).display_name(), "User_1");
    }
}
