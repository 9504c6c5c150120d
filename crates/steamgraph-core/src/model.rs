//! Identifiers and the canonical app pair.
//!
//! Steam app ids and reviewer steam ids are both plain integers in the
//! storefront APIs. They are wrapped in newtypes so a reviewer can never be
//! passed where an app is expected.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A Steam application id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub i64);

/// A reviewer's Steam id. This is the aggregation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewerId(pub i64);

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ReviewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An unordered pair of distinct apps, stored as `(min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AppPair {
    low: AppId,
    high: AppId,
}

impl AppPair {
    /// Canonicalize two apps into a pair. Returns `None` for a self-pair.
    #[must_use]
    pub fn new(a: AppId, b: AppId) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { low: a, high: b }),
            std::cmp::Ordering::Greater => Some(Self { low: b, high: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    #[must_use]
    pub const fn low(self) -> AppId {
        self.low
    }

    #[must_use]
    pub const fn high(self) -> AppId {
        self.high
    }
}

impl fmt::Display for AppPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.low, self.high)
    }
}

/// Every canonical pair drawn from a set of apps, in ascending order.
///
/// A set of `n` apps yields `n * (n - 1) / 2` pairs; zero or one app yields
/// none.
pub fn pairs_of(apps: &BTreeSet<AppId>) -> impl Iterator<Item = AppPair> + '_ {
    apps.iter().enumerate().flat_map(move |(i, &low)| {
        apps.iter()
            .skip(i + 1)
            .map(move |&high| AppPair { low, high })
    })
}
