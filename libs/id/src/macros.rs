//! Macros for defining typed ID types.

/// Macro to define a typed, runtime-assigned ID.
///
/// This generates a newtype wrapper around `String` with:
/// - A `KIND` constant used in error messages
/// - `parse()` with strict validation
/// - `as_str()` and `into_inner()` accessors
/// - `Display` and `FromStr` implementations
/// - `Serialize` and `Deserialize` implementations (as plain strings)
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_id!(ImageId, "image");
///
/// let id: ImageId = "sha256:4bcff639".parse()?;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $kind:literal) => {
        /// A typed runtime identifier.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Human-readable kind of this identifier.
            pub const KIND: &'static str = $kind;

            /// Parses an ID from a string.
            ///
            /// The string must be non-empty and contain no whitespace or
            /// control characters. A `<algorithm>:` prefix must be followed
            /// by a digest.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty { kind: Self::KIND });
                }

                if let Some(ch) = s.chars().find(|c| c.is_whitespace() || c.is_control()) {
                    return Err($crate::IdError::InvalidCharacter {
                        kind: Self::KIND,
                        ch,
                    });
                }

                if s.ends_with(':') {
                    return Err($crate::IdError::EmptyDigest {
                        kind: Self::KIND,
                        value: s.to_string(),
                    });
                }

                Ok(Self(s.to_string()))
            }

            /// Returns the ID as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the ID, returning the underlying string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }

            /// Returns the digest portion, without any `<algorithm>:` prefix.
            #[must_use]
            pub fn digest(&self) -> &str {
                self.0
                    .split_once(':')
                    .map(|(_, digest)| digest)
                    .unwrap_or(&self.0)
            }

            /// Returns the abbreviated form used by the runtime CLI (12 chars).
            #[must_use]
            pub fn short(&self) -> &str {
                let digest = self.digest();
                digest.get(..12).unwrap_or(digest)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::IdError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(&s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}
