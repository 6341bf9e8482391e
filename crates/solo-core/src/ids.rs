use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
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
    };
}

branded_id!(LogicalName);
branded_id!(InstanceId);
branded_id!(ConnectionId);

impl LogicalName {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_raw(name)
    }
}

impl InstanceId {
    /// Derive the identity addressed by a logical name.
    ///
    /// Pure: the same name always yields the same identity.
    pub fn from_name(name: &LogicalName) -> Self {
        let digest = Sha256::digest(name.as_str().as_bytes());
        let mut hex = String::with_capacity(5 + digest.len() * 2);
        hex.push_str("inst_");
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }
}

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_is_deterministic() {
        let a = InstanceId::from_name(&LogicalName::new("foo"));
        let b = InstanceId::from_name(&LogicalName::new("foo"));
        assert_eq!(a, b);
    }

    #[test]
    fn instance_id_differs_per_name() {
        let a = InstanceId::from_name(&LogicalName::new("foo"));
        let b = InstanceId::from_name(&LogicalName::new("bar"));
        assert_ne!(a, b);
    }

    #[test]
    fn instance_id_has_prefix_and_hex_digest() {
        let id = InstanceId::from_name(&LogicalName::new("foo"));
        let hex = id.as_str().strip_prefix("inst_").expect("prefix");
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn instance_id_known_vector() {
        // sha256("foo")
        let id = InstanceId::from_name(&LogicalName::new("foo"));
        assert_eq!(
            id.as_str(),
            "inst_2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae"
        );
    }

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn logical_name_serializes_transparently() {
        let name = LogicalName::new("foo");
        assert_eq!(serde_json::to_string(&name).unwrap(), "\"foo\"");
    }
}
