// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Wildcard-aware ordering over component and relation ids.
//!
//! Concrete ids order by their raw value. A pair with a wildcard on one side
//! compares equal to every pair sharing its fixed side, and `(*, *)` compares
//! equal to every pair. This is what lets one query term match relation pairs
//! stored in many archetypes.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use crate::entity::EntityId;

/// Every pair hashes here; wildcard pairs must collide with the pairs they equal.
const PAIR_BUCKET: u64 = 0x9E37_79B9_7F4A_7C15;

/// Compare `a` against `b`. Either side may carry wildcards.
pub fn compare_terms(a: EntityId, b: EntityId) -> Ordering {
    if a.is_pair() && b.is_pair() {
        let matched = if b.has_wildcard() {
            pattern_matches(b, a)
        } else {
            a.has_wildcard() && pattern_matches(a, b)
        };
        if matched {
            return Ordering::Equal;
        }
    }
    a.to_raw().cmp(&b.to_raw())
}

fn pattern_matches(pattern: EntityId, pair: EntityId) -> bool {
    let (rel, tgt) = (pattern.first(), pattern.second());
    match (rel.is_wildcard(), tgt.is_wildcard()) {
        (true, true) => true,
        (true, false) => pair.second() == tgt,
        (false, true) => pair.first() == rel,
        (false, false) => false,
    }
}

#[inline]
pub fn terms_equal(a: EntityId, b: EntityId) -> bool {
    compare_terms(a, b) == Ordering::Equal
}

/// Hash consistent with [`terms_equal`].
pub fn term_hash(id: EntityId) -> u64 {
    if id.is_pair() {
        PAIR_BUCKET
    } else {
        id.to_raw()
    }
}

/// Id wrapper whose `Eq`/`Ord`/`Hash` follow the term rules.
///
/// Equality is not transitive once wildcards are involved; keep wildcard
/// terms out of ordered containers and use them as probes only.
#[derive(Debug, Clone, Copy)]
pub struct Term(pub EntityId);

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        terms_equal(self.0, other.0)
    }
}

impl Eq for Term {}

impl PartialOrd for Term {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Term {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_terms(self.0, other.0)
    }
}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        term_hash(self.0).hash(state);
    }
}

/// How a query term constrains a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermOp {
    With,
    Without,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTerm {
    pub id: EntityId,
    pub op: TermOp,
}

impl QueryTerm {
    pub fn with(id: EntityId) -> Self {
        Self { id, op: TermOp::With }
    }

    pub fn without(id: EntityId) -> Self {
        Self {
            id,
            op: TermOp::Without,
        }
    }

    pub fn optional(id: EntityId) -> Self {
        Self {
            id,
            op: TermOp::Optional,
        }
    }
}

/// Outcome of matching one archetype signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// Not a match; keep scanning other archetypes.
    Continue,
    Found,
    /// An excluded id is present.
    Stop,
}

/// Match a signature against a set of terms.
pub fn match_signature<I>(signature: I, terms: &[QueryTerm]) -> MatchResult
where
    I: IntoIterator<Item = EntityId> + Clone,
{
    let contains = |term: EntityId| signature.clone().into_iter().any(|id| terms_equal(id, term));

    let mut found = true;
    for term in terms {
        match term.op {
            TermOp::Without if contains(term.id) => return MatchResult::Stop,
            TermOp::With if !contains(term.id) => found = false,
            _ => {}
        }
    }

    if found {
        MatchResult::Found
    } else {
        MatchResult::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ANY_PAIR, WILDCARD};
    use std::collections::HashSet;

    fn id(raw: u64) -> EntityId {
        EntityId::from_raw(raw)
    }

    #[test]
    fn test_target_wildcard_matches_same_relation() {
        let (a, b) = (id(300), id(301));
        let left = EntityId::pair(a, b);
        let right = EntityId::pair(a, WILDCARD);
        assert_eq!(compare_terms(left, right), Ordering::Equal);
        assert_ne!(
            compare_terms(EntityId::pair(id(302), b), right),
            Ordering::Equal
        );
    }

    #[test]
    fn test_relation_wildcard_matches_same_target() {
        let target = id(400);
        let probe = EntityId::pair(WILDCARD, target);
        assert!(terms_equal(EntityId::pair(id(10), target), probe));
        assert!(terms_equal(EntityId::pair(id(11), target), probe));
        assert!(!terms_equal(EntityId::pair(id(10), id(401)), probe));
    }

    #[test]
    fn test_relation_wildcard_ignores_target_in_relation_slot() {
        // (400, 7) shares no target with (*, 400) even though 400 appears.
        let probe = EntityId::pair(WILDCARD, id(400));
        assert!(!terms_equal(EntityId::pair(id(400), id(7)), probe));
    }

    #[test]
    fn test_any_pair_matches_every_pair() {
        for (r, t) in [(2u64, 3u64), (900, 12), (5, 5)] {
            assert!(terms_equal(EntityId::pair(id(r), id(t)), ANY_PAIR));
        }
        assert!(!terms_equal(id(9), ANY_PAIR));
    }

    #[test]
    fn test_concrete_pairs_order_by_raw_value() {
        let lo = EntityId::pair(id(3), id(4));
        let hi = EntityId::pair(id(3), id(5));
        assert_eq!(compare_terms(lo, hi), Ordering::Less);
        assert_eq!(compare_terms(hi, lo), Ordering::Greater);
        assert_eq!(
            compare_terms(lo, hi),
            lo.to_raw().cmp(&hi.to_raw())
        );
        assert_eq!(compare_terms(id(8), id(9)), Ordering::Less);
    }

    #[test]
    fn test_hash_consistent_with_equality() {
        let concrete = Term(EntityId::pair(id(20), id(21)));
        let probe = Term(EntityId::pair(id(20), WILDCARD));
        assert_eq!(concrete, probe);
        assert_eq!(term_hash(concrete.0), term_hash(probe.0));

        let mut set = HashSet::new();
        set.insert(concrete);
        assert!(set.contains(&probe));
        assert!(set.contains(&Term(ANY_PAIR)));
        assert!(!set.contains(&Term(id(20))));
    }

    #[test]
    fn test_match_signature_three_way() {
        let (pos, vel, frozen) = (id(2), id(3), id(4));
        let likes = EntityId::pair(id(10), id(500));
        let sig = [pos, vel, likes];

        let terms = [QueryTerm::with(pos), QueryTerm::with(vel)];
        assert_eq!(match_signature(sig, &terms), MatchResult::Found);

        let terms = [QueryTerm::with(pos), QueryTerm::with(frozen)];
        assert_eq!(match_signature(sig, &terms), MatchResult::Continue);

        let terms = [QueryTerm::with(pos), QueryTerm::without(vel)];
        assert_eq!(match_signature(sig, &terms), MatchResult::Stop);

        let terms = [QueryTerm::optional(frozen), QueryTerm::with(ANY_PAIR)];
        assert_eq!(match_signature(sig, &terms), MatchResult::Found);

        let terms = [QueryTerm::with(EntityId::pair(WILDCARD, id(500)))];
        assert_eq!(match_signature(sig, &terms), MatchResult::Found);
    }
}
