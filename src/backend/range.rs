//! Narrows a change-number search to the range of change numbers its base DN
//! and filter can possibly match.

use crate::core::filter::parse_integer;
use crate::core::{Csn, Dn, SearchFilter};

use super::error::SearchError;

pub const CHANGE_NUMBER_ATTR: &str = "changeNumber";
pub const REPLICATION_CSN_ATTR: &str = "replicationCSN";

/// Inclusive change-number bounds; `-1` means unbounded on that side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeNumberRange {
    pub lower_bound: i64,
    pub upper_bound: i64,
}

impl ChangeNumberRange {
    pub const UNBOUNDED: i64 = -1;

    pub const fn new(lower_bound: i64, upper_bound: i64) -> Self {
        Self {
            lower_bound,
            upper_bound,
        }
    }

    pub const fn unbounded() -> Self {
        Self::new(Self::UNBOUNDED, Self::UNBOUNDED)
    }

    pub fn has_upper_bound(&self) -> bool {
        self.upper_bound != Self::UNBOUNDED
    }

    /// Whether `change_number` lies past the upper bound.
    pub fn is_beyond_upper_bound(&self, change_number: i64) -> bool {
        self.has_upper_bound() && change_number > self.upper_bound
    }

    /// Tightest range satisfying both sides of a conjunction.
    fn intersect(self, other: ChangeNumberRange) -> ChangeNumberRange {
        let lower_bound = self.lower_bound.max(other.lower_bound);
        let upper_bound = match (self.has_upper_bound(), other.has_upper_bound()) {
            (true, true) => self.upper_bound.min(other.upper_bound),
            (true, false) => self.upper_bound,
            (false, _) => other.upper_bound,
        };
        ChangeNumberRange::new(lower_bound, upper_bound)
    }
}

impl Default for ChangeNumberRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Computes the change-number range for a search below `root`.
///
/// A base of `changeNumber=N,<root>` pins the range to `N`; a base of
/// `replicationCSN=C,<domain>,<root>` only validates `C`. Otherwise the range
/// comes from the filter.
pub fn optimize_search(
    root: &Dn,
    base_dn: &Dn,
    filter: &SearchFilter,
) -> Result<ChangeNumberRange, SearchError> {
    let depth = base_dn.size().saturating_sub(root.size());
    let pinned = match (depth, base_dn.rdn()) {
        (0, _) | (_, None) => None,
        (1, Some(rdn)) if rdn.is_type(CHANGE_NUMBER_ATTR) => {
            Some(SearchFilter::equality(CHANGE_NUMBER_ATTR, rdn.value()))
        }
        (1, Some(_)) => None,
        (_, Some(rdn)) if rdn.is_type(REPLICATION_CSN_ATTR) => {
            Some(SearchFilter::equality(REPLICATION_CSN_ATTR, rdn.value()))
        }
        (_, Some(_)) => None,
    };
    optimize_filter(pinned.as_ref().unwrap_or(filter))
}

/// Range implied by `filter` alone.
///
/// Every operand of an AND is folded, not only the first two.
pub fn optimize_filter(filter: &SearchFilter) -> Result<ChangeNumberRange, SearchError> {
    match filter {
        SearchFilter::GreaterOrEqual { attr, value } if is_attr(attr, CHANGE_NUMBER_ATTR) => Ok(
            ChangeNumberRange::new(decode_change_number(value)?, ChangeNumberRange::UNBOUNDED),
        ),
        SearchFilter::LessOrEqual { attr, value } if is_attr(attr, CHANGE_NUMBER_ATTR) => Ok(
            ChangeNumberRange::new(ChangeNumberRange::UNBOUNDED, decode_change_number(value)?),
        ),
        SearchFilter::Equality { attr, value } if is_attr(attr, CHANGE_NUMBER_ATTR) => {
            let change_number = decode_change_number(value)?;
            Ok(ChangeNumberRange::new(change_number, change_number))
        }
        SearchFilter::Equality { attr, value } if is_attr(attr, REPLICATION_CSN_ATTR) => {
            Csn::parse(value).map_err(|_| SearchError::InvalidCsn {
                value: value.clone(),
            })?;
            Ok(ChangeNumberRange::unbounded())
        }
        SearchFilter::And(components) => {
            let mut ranges = components.iter().map(optimize_filter);
            let Some(first) = ranges.next() else {
                return Ok(ChangeNumberRange::unbounded());
            };
            ranges.try_fold(first?, |acc, range| Ok(acc.intersect(range?)))
        }
        _ => Ok(ChangeNumberRange::unbounded()),
    }
}

/// Parses a change-number literal the way filters compare integers.
pub fn decode_change_number(raw: &str) -> Result<i64, SearchError> {
    parse_integer(raw).ok_or_else(|| SearchError::InvalidChangeNumber {
        value: raw.to_string(),
    })
}

fn is_attr(attr: &str, expected: &str) -> bool {
    attr.eq_ignore_ascii_case(expected)
}
