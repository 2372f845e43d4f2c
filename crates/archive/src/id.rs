use std::fmt::{Display, Formatter, Result as FmtResult};
use std::num::ParseIntError;
use std::str::FromStr;

/// Digits in the zero-padded rendering of a [`DocId`].
pub const DOC_ID_WIDTH: usize = 9;

/// Sequential archive document id.
///
/// Rendered zero-padded to a fixed width (`000000042`), which is also how
/// containers are named after their first id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocId(u64);

impl DocId {
    pub const FIRST: DocId = DocId(1);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }

    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for DocId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{:0width$}", self.0, width = DOC_ID_WIDTH)
    }
}

impl FromStr for DocId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<u64> for DocId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<DocId> for u64 {
    fn from(id: DocId) -> Self {
        id.0
    }
}
