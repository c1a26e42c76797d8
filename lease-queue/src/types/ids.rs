use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_string {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Fresh random (v4) value
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
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

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

uuid_string! {
    /// Producer-assigned message identifier; the broker rejects duplicates
    /// while the first copy is still queued
    MessageId
}

uuid_string! {
    /// Proof of holding the current lease. A new token is minted for every
    /// delivery, so a token from an earlier lease never settles a redelivery.
    LeaseToken
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_lease_gets_a_fresh_token() {
        let tokens: std::collections::HashSet<_> = (0..64).map(|_| LeaseToken::new()).collect();
        assert_eq!(tokens.len(), 64);
    }

    #[test]
    fn ids_round_trip_through_strings() {
        let id = MessageId::from("order-17");
        assert_eq!(id.to_string(), "order-17");
        assert_eq!(MessageId::from(id.to_string()), id);
        assert_eq!(format!("{:>10}", id.as_str()), "  order-17");
    }
}
