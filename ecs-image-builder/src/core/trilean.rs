//! Three-valued boolean for settings where "unset" differs from "false".

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A boolean that may be left unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Trilean {
    /// Not configured; the provider default applies.
    #[default]
    Unset,
    /// Explicitly true.
    True,
    /// Explicitly false.
    False,
}

impl Trilean {
    /// Returns true only for an explicit `True`.
    #[must_use]
    pub fn is_true(self) -> bool {
        matches!(self, Self::True)
    }

    /// Returns true only for an explicit `False`.
    #[must_use]
    pub fn is_false(self) -> bool {
        matches!(self, Self::False)
    }

    /// Returns true if a value was configured.
    #[must_use]
    pub fn is_set(self) -> bool {
        !matches!(self, Self::Unset)
    }

    /// Converts to an optional boolean.
    #[must_use]
    pub fn to_option(self) -> Option<bool> {
        match self {
            Self::Unset => None,
            Self::True => Some(true),
            Self::False => Some(false),
        }
    }
}

impl From<bool> for Trilean {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

impl From<Option<bool>> for Trilean {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Self::Unset, Self::from)
    }
}

impl Serialize for Trilean {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_option().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Trilean {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Templates commonly quote booleans, so accept "true"/"false" too.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Text(String),
        }

        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(Self::Unset),
            Some(Raw::Bool(b)) => Ok(b.into()),
            Some(Raw::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "" => Ok(Self::Unset),
                "true" => Ok(Self::True),
                "false" => Ok(Self::False),
                other => Err(serde::de::Error::custom(format!(
                    "expected a boolean, got '{other}'"
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trilean_default_is_unset() {
        assert_eq!(Trilean::default(), Trilean::Unset);
        assert!(!Trilean::Unset.is_set());
        assert!(!Trilean::Unset.is_true());
        assert!(!Trilean::Unset.is_false());
    }

    #[test]
    fn test_trilean_from_option() {
        assert_eq!(Trilean::from(Some(true)), Trilean::True);
        assert_eq!(Trilean::from(Some(false)), Trilean::False);
        assert_eq!(Trilean::from(None), Trilean::Unset);
    }

    #[test]
    fn test_trilean_deserialize() {
        let t: Trilean = serde_json::from_str("true").unwrap();
        assert_eq!(t, Trilean::True);
        let f: Trilean = serde_json::from_str(r#""false""#).unwrap();
        assert_eq!(f, Trilean::False);
        let u: Trilean = serde_json::from_str("null").unwrap();
        assert_eq!(u, Trilean::Unset);
        assert!(serde_json::from_str::<Trilean>(r#""maybe""#).is_err());
    }

    #[test]
    fn test_trilean_serialize() {
        assert_eq!(serde_json::to_string(&Trilean::True).unwrap(), "true");
        assert_eq!(serde_json::to_string(&Trilean::Unset).unwrap(), "null");
    }
}
