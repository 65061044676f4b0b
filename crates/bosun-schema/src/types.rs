//! String identifiers that must not be mixed up with each other.
//!
//! Both serialize as plain strings so the state document stays hand-editable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

identifier!(
    /// Assigned on the first `up` and never changed. Every cloud resource of
    /// the environment is named after it.
    EnvId
);

identifier!(
    /// Name of a legacy CloudFormation stack.
    StackName
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_id_is_a_plain_json_string() {
        let id = EnvId::new("bosun-env-erie-2026");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"bosun-env-erie-2026\"");
        let back: EnvId = serde_json::from_str("\"bosun-env-erie-2026\"").unwrap();
        assert_eq!(back, id);
        assert_eq!(id.to_string(), "bosun-env-erie-2026");
    }

    #[test]
    fn empty_until_assigned() {
        assert!(EnvId::default().is_empty());
        assert!(!StackName::from("stack-abc").is_empty());
        assert!(StackName::from("stack-abc").starts_with("stack-"));
    }
}
