//! # Component Filters
//!
//! Filters select archetypes, not entities: a filter is evaluated once per
//! archetype against its component set, and every entity in a matching
//! archetype matches. The variants compile down to bitmask tests over
//! [`ComponentSet`], so there is no per-row dispatch.

use super::component::ComponentSet;

/// Boolean filter over archetype component sets.
#[derive(Clone, Debug)]
pub enum Filter {
    /// Matches archetypes whose set is a superset of the given components.
    Contains(ComponentSet),
    /// Matches archetypes whose set equals the given components exactly
    /// (order-independent).
    Exact(ComponentSet),
    /// Negation.
    Not(Box<Filter>),
    /// Conjunction. Empty `And` matches all archetypes.
    And(Vec<Filter>),
    /// Disjunction. Empty `Or` matches none.
    Or(Vec<Filter>),
}

impl Filter {
    /// Superset filter.
    #[must_use]
    pub fn contains(set: ComponentSet) -> Self {
        Self::Contains(set)
    }

    /// Exact-set filter.
    #[must_use]
    pub fn exact(set: ComponentSet) -> Self {
        Self::Exact(set)
    }

    /// Negates a filter.
    #[must_use]
    pub fn not(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Conjunction of filters.
    #[must_use]
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    /// Disjunction of filters.
    #[must_use]
    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    /// Evaluates the filter against an archetype's component set.
    #[must_use]
    pub fn matches(&self, set: &ComponentSet) -> bool {
        match self {
            Self::Contains(want) => set.contains_all(want),
            Self::Exact(want) => set == want,
            Self::Not(inner) => !inner.matches(set),
            Self::And(filters) => filters.iter().all(|f| f.matches(set)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(set)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[u32]) -> ComponentSet {
        ComponentSet::from_ids(ids.iter().copied())
    }

    #[test]
    fn test_contains_is_superset_match() {
        let f = Filter::contains(set(&[1, 2]));
        assert!(f.matches(&set(&[1, 2])));
        assert!(f.matches(&set(&[1, 2, 3])));
        assert!(!f.matches(&set(&[1])));
        assert!(!f.matches(&set(&[1, 3])));
    }

    #[test]
    fn test_exact_ignores_order_but_not_extras() {
        let f = Filter::exact(set(&[2, 1]));
        assert!(f.matches(&set(&[1, 2])));
        assert!(!f.matches(&set(&[1, 2, 3])));
        assert!(!f.matches(&set(&[1])));
    }

    #[test]
    fn test_not_and_or() {
        let f = Filter::not(Filter::contains(set(&[3])));
        assert!(f.matches(&set(&[1, 2])));
        assert!(!f.matches(&set(&[3])));

        let f = Filter::or([
            Filter::contains(set(&[1])),
            Filter::contains(set(&[9])),
        ]);
        assert!(f.matches(&set(&[9, 4])));
        assert!(!f.matches(&set(&[4])));

        let f = Filter::and([
            Filter::contains(set(&[1])),
            Filter::not(Filter::contains(set(&[2]))),
        ]);
        assert!(f.matches(&set(&[1, 3])));
        assert!(!f.matches(&set(&[1, 2])));
    }

    #[test]
    fn test_empty_and_matches_all_empty_or_matches_none() {
        let everything = Filter::and([]);
        let nothing = Filter::or([]);
        assert!(everything.matches(&set(&[])));
        assert!(everything.matches(&set(&[1, 2])));
        assert!(!nothing.matches(&set(&[])));
        assert!(!nothing.matches(&set(&[1, 2])));
    }
}
