// SPDX-License-Identifier: MIT

//! Lock name validation.
//!
//! Backends address their named primitive through a backend-visible string.
//! Each backend publishes [`NameRules`]; validation prepends the backend's
//! reserved namespace prefix so the object is addressable within the whole
//! lock scope rather than session-local.

use std::fmt;

use crate::error::LockError;

/// Naming constraints a backend imposes on its lock names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameRules {
    /// Maximum length of the backend-visible name, prefix included.
    pub backend_limit: usize,
    /// Namespace marker prepended to every validated name.
    pub reserved_prefix: &'static str,
    /// Path/namespace separator the raw name must not contain.
    pub separator: char,
}

impl NameRules {
    /// Longest raw name these rules accept, in bytes.
    ///
    /// All lengths are byte lengths; backend limits bound the encoded name
    /// the backend actually sees.
    pub const fn max_name_len(&self) -> usize {
        self.backend_limit - self.reserved_prefix.len()
    }
}

/// A validated, backend-visible lock name.
///
/// Constructed once at lock-object creation and immutable thereafter. The
/// stored form already carries the backend's reserved prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockName(String);

impl LockName {
    /// Validate `raw` against `rules` and prefix it with the backend's
    /// namespace marker.
    ///
    /// Pure; touches no resources. Fails with [`LockError::EmptyName`] for an
    /// empty name, [`LockError::NameTooLong`] past `rules.max_name_len()`,
    /// and [`LockError::ReservedSeparator`] if the raw name contains the
    /// backend's separator.
    pub fn validate(raw: &str, rules: &NameRules) -> Result<Self, LockError> {
        if raw.is_empty() {
            return Err(LockError::EmptyName);
        }
        let max = rules.max_name_len();
        if raw.len() > max {
            return Err(LockError::NameTooLong { max });
        }
        if raw.contains(rules.separator) {
            return Err(LockError::ReservedSeparator {
                separator: rules.separator,
            });
        }
        Ok(Self(format!("{}{}", rules.reserved_prefix, raw)))
    }

    /// The backend-visible form, prefix included.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
