use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::from_raw(s)
            }
        }
    };
}

branded_id!(HouseholdId, "hh");
branded_id!(ListId, "list");
branded_id!(ItemId, "item");
branded_id!(UserId, "user");
branded_id!(ClientId, "client");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix() {
        assert!(HouseholdId::new().as_str().starts_with("hh_"));
        assert!(ListId::new().as_str().starts_with("list_"));
        assert!(ItemId::new().as_str().starts_with("item_"));
        assert!(UserId::new().as_str().starts_with("user_"));
        assert!(ClientId::new().as_str().starts_with("client_"));
    }

    #[test]
    fn ids_are_unique() {
        let a = HouseholdId::new();
        let b = HouseholdId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = HouseholdId::from_raw("H1");
        assert_eq!(id.as_str(), "H1");
        assert_eq!(id.to_string(), "H1");
        assert_eq!(HouseholdId::from("H1"), id);
    }

    #[test]
    fn serializes_as_bare_string() {
        let id = ListId::from_raw("L1");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""L1""#);
        let parsed: ListId = serde_json::from_str(r#""L1""#).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn monotonic_ordering() {
        let ids: Vec<ItemId> = (0..50).map(|_| ItemId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0] < w[1], "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
