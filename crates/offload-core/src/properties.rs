//! Reduction properties and their execution plan
//!
//! Properties are a closed set of flags attached to a reduction at
//! construction. [`resolve`] turns them into an [`ExecutionPlan`], the only
//! thing the dispatcher consults afterwards.
//!
//! | Property                 | Effect on the plan                    |
//! |--------------------------|---------------------------------------|
//! | `deterministic`          | `use_fixed_order_combine`             |
//! | `initialize_to_identity` | `initialize_accumulator_to_identity`  |

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A recognized reduction property
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropertyKey {
    /// Results must be bitwise reproducible across runs
    Deterministic,
    /// Accumulators start from the operation's identity, ignoring the output's prior value
    InitializeToIdentity,
}

impl PropertyKey {
    /// Every recognized property
    pub const ALL: [PropertyKey; 2] = [PropertyKey::Deterministic, PropertyKey::InitializeToIdentity];

    /// Declarative name of the property
    pub const fn name(self) -> &'static str {
        match self {
            PropertyKey::Deterministic => "deterministic",
            PropertyKey::InitializeToIdentity => "initialize_to_identity",
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PropertyKey {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        PropertyKey::ALL
            .into_iter()
            .find(|key| key.name() == name)
            .ok_or_else(|| Error::UnknownProperty(name.to_owned()))
    }
}

/// Set of properties attached to one reduction
///
/// Serializes as a list of property names.
///
/// # Example
///
/// ```rust
/// use offload_core::properties::{PropertyKey, PropertySet};
///
/// let set = PropertySet::from_names(["deterministic"]).unwrap();
/// assert!(set.contains(PropertyKey::Deterministic));
///
/// assert!(PropertySet::from_names(["fast_math"]).is_err());
/// assert!(PropertySet::from_names(["deterministic", "deterministic"]).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct PropertySet {
    keys: BTreeSet<PropertyKey>,
}

impl PropertySet {
    /// The empty set: non-deterministic, accumulate onto the output
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `key`; adding a key twice has no further effect
    pub fn with(mut self, key: PropertyKey) -> Self {
        self.keys.insert(key);
        self
    }

    /// Shorthand for `{deterministic}`
    pub fn deterministic() -> Self {
        Self::new().with(PropertyKey::Deterministic)
    }

    /// Parse declarative property names
    ///
    /// Unknown names and names given twice are rejected.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys = BTreeSet::new();
        for name in names {
            let key: PropertyKey = name.as_ref().parse()?;
            if !keys.insert(key) {
                return Err(Error::DuplicateProperty(key.name().to_owned()));
            }
        }
        Ok(Self { keys })
    }

    pub fn contains(&self, key: PropertyKey) -> bool {
        self.keys.contains(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = PropertyKey> + '_ {
        self.keys.iter().copied()
    }
}

impl FromIterator<PropertyKey> for PropertySet {
    fn from_iter<I: IntoIterator<Item = PropertyKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

impl TryFrom<Vec<String>> for PropertySet {
    type Error = Error;

    fn try_from(names: Vec<String>) -> Result<Self> {
        Self::from_names(names)
    }
}

impl From<PropertySet> for Vec<String> {
    fn from(set: PropertySet) -> Self {
        set.iter().map(|key| key.name().to_owned()).collect()
    }
}

/// How the dispatcher executes a reduction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Merge partial results in a fixed order independent of scheduling
    pub use_fixed_order_combine: bool,
    /// Start accumulators from the identity instead of the output's prior value
    pub initialize_accumulator_to_identity: bool,
}

/// Derive the execution plan of a property set
pub fn resolve(properties: &PropertySet) -> ExecutionPlan {
    ExecutionPlan {
        use_fixed_order_combine: properties.contains(PropertyKey::Deterministic),
        initialize_accumulator_to_identity: properties.contains(PropertyKey::InitializeToIdentity),
    }
}
