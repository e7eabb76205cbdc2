// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed record identifiers.
//!
//! Every durable record carries a prefixed, fixed-size ID: a 4-character
//! type tag followed by an 18-character nanoid, 22 ASCII bytes total.
//! IDs are `Copy` and inline (no heap), so they can be used freely as
//! map keys and in log fields.

/// Byte capacity of an inline ID.
pub const ID_CAPACITY: usize = 22;

/// Inline, copyable ID storage. Always valid ASCII, at most 22 bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RawId {
    len: u8,
    bytes: [u8; ID_CAPACITY],
}

impl PartialOrd for RawId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RawId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl RawId {
    pub fn parse(s: &str) -> Self {
        debug_assert!(
            s.len() <= ID_CAPACITY,
            "id longer than {ID_CAPACITY} bytes: {s:?}"
        );
        let len = s.len().min(ID_CAPACITY);
        let mut bytes = [0u8; ID_CAPACITY];
        bytes[..len].copy_from_slice(&s.as_bytes()[..len]);
        Self { len: len as u8, bytes }
    }

    pub fn as_str(&self) -> &str {
        // Only ever constructed from &str, so the bytes are valid UTF-8.
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl std::hash::Hash for RawId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Must match str::hash so Borrow<str> map lookups work.
        self.as_str().hash(state);
    }
}

impl std::fmt::Debug for RawId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl serde::Serialize for RawId {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for RawId {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let s = String::deserialize(de)?;
        if s.len() > ID_CAPACITY {
            return Err(serde::de::Error::custom(format!(
                "id longer than {ID_CAPACITY} bytes: {s:?}"
            )));
        }
        Ok(RawId::parse(&s))
    }
}

/// Define a prefixed newtype ID over [`RawId`].
///
/// `new()` generates `{prefix}{nanoid(18)}`; `from_string()` wraps an
/// existing value (snapshot load, wire input).
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($prefix:literal);
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($crate::id::RawId);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generate a fresh random ID.
            pub fn new() -> Self {
                Self($crate::id::RawId::parse(&format!(
                    "{}{}",
                    Self::PREFIX,
                    nanoid::nanoid!(18)
                )))
            }

            /// Wrap an existing ID string.
            pub fn from_string(s: impl AsRef<str>) -> Self {
                Self($crate::id::RawId::parse(s.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.0.as_str())
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::from_string(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::from_string(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.0.as_str()
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.0.as_str()
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0.as_str() == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0.as_str() == *other
            }
        }
    };
}

define_id! {
    /// Identifier of a managed application record.
    pub struct AppId("app-");
}

define_id! {
    /// Identifier of a configured Proxmox host (cluster entry point).
    pub struct HostId("hst-");
}

define_id! {
    /// Identifier of a backup row.
    pub struct BackupId("bak-");
}

define_id! {
    /// Identifier of a background job.
    pub struct JobId("job-");
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
