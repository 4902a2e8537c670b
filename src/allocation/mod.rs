//! Weighted, capacity-proportional placement of discrete units (jobs,
//! deed-restricted units) onto locations within a zone.
//!
//! Draws are with replacement: a location can receive more units than its
//! capacity suggests. Oversubscription is corrected downstream, never here.

use itertools::Itertools;
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use std::collections::BTreeMap;

use crate::error::ValidationError;

pub mod geography;

pub use geography::{ZoneIndex, reindex_i64, reindex_str};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: i64,
    pub weight: f64,
}

/// Which capacity measure produced a zone's candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacitySource {
    Primary,
    Fallback,
}

fn check_weights(zone: i64, candidates: &[Candidate]) -> Result<(), ValidationError> {
    for c in candidates {
        if !c.weight.is_finite() || c.weight < 0.0 {
            return Err(ValidationError::InvalidWeight {
                zone,
                location: c.id,
                weight: c.weight,
            });
        }
    }
    Ok(())
}

/// Keep only candidates with positive weight.
pub fn positive(candidates: impl IntoIterator<Item = Candidate>) -> Vec<Candidate> {
    candidates.into_iter().filter(|c| c.weight > 0.0).collect()
}

/// Draw `count` location ids with replacement, probability proportional to
/// weight. Zero-weight candidates are never chosen. A positive request with no
/// positive-weight candidate is an error; a zero request is always a no-op.
pub fn sample_with_replacement<R: Rng + ?Sized>(
    what: &'static str,
    zone: i64,
    count: usize,
    candidates: &[Candidate],
    rng: &mut R,
) -> Result<Vec<i64>, ValidationError> {
    check_weights(zone, candidates)?;
    if count == 0 {
        return Ok(Vec::new());
    }
    let live = positive(candidates.iter().copied());
    if live.is_empty() {
        return Err(ValidationError::EmptyCandidates {
            what,
            zone,
            requested: count,
        });
    }
    let dist = WeightedIndex::new(live.iter().map(|c| c.weight)).map_err(|_| {
        ValidationError::EmptyCandidates {
            what,
            zone,
            requested: count,
        }
    })?;
    Ok((0..count).map(|_| live[dist.sample(rng)].id).collect())
}

/// Candidate set with a fallback: use the primary capacities when any of them
/// is positive, otherwise the fallback capacities for the same locations.
pub fn with_fallback(
    primary: Vec<Candidate>,
    fallback: Vec<Candidate>,
) -> (Vec<Candidate>, CapacitySource) {
    let primary = positive(primary);
    if !primary.is_empty() {
        return (primary, CapacitySource::Primary);
    }
    (positive(fallback), CapacitySource::Fallback)
}

/// Multiset of draws as location -> number of units.
pub fn tally(draws: &[i64]) -> BTreeMap<i64, u64> {
    draws
        .iter()
        .copied()
        .counts()
        .into_iter()
        .map(|(id, n)| (id, n as u64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn cands(pairs: &[(i64, f64)]) -> Vec<Candidate> {
        pairs
            .iter()
            .map(|&(id, weight)| Candidate { id, weight })
            .collect()
    }

    #[test]
    fn split_follows_capacity_share() {
        let c = cands(&[(1, 300.0), (2, 700.0)]);
        let trials = 200;
        let mut share_two = 0.0;
        for seed in 0..trials {
            let mut rng = StdRng::seed_from_u64(seed);
            let draws = sample_with_replacement("jobs", 5, 100, &c, &mut rng).unwrap();
            assert_eq!(draws.len(), 100);
            let t = tally(&draws);
            assert_eq!(t.values().sum::<u64>(), 100);
            share_two += *t.get(&2).unwrap_or(&0) as f64 / 100.0;
        }
        let mean = share_two / trials as f64;
        assert!((mean - 0.7).abs() < 0.02, "mean share {mean}");
    }

    #[test]
    fn zero_weight_never_drawn() {
        let c = cands(&[(1, 0.0), (2, 5.0)]);
        let mut rng = StdRng::seed_from_u64(3);
        let draws = sample_with_replacement("units", 1, 50, &c, &mut rng).unwrap();
        assert!(draws.iter().all(|&id| id == 2));
    }

    #[test]
    fn zero_request_is_noop_even_without_candidates() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(sample_with_replacement("units", 9, 0, &[], &mut rng)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn empty_or_all_zero_candidates_fail() {
        let mut rng = StdRng::seed_from_u64(1);
        let err = sample_with_replacement("units", 9, 3, &[], &mut rng).unwrap_err();
        assert_eq!(
            err,
            ValidationError::EmptyCandidates {
                what: "units",
                zone: 9,
                requested: 3
            }
        );
        let zeros = cands(&[(1, 0.0), (2, 0.0)]);
        assert!(sample_with_replacement("units", 9, 3, &zeros, &mut rng).is_err());
    }

    #[test]
    fn bad_weights_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let c = cands(&[(1, f64::NAN), (2, 1.0)]);
        assert!(matches!(
            sample_with_replacement("jobs", 2, 1, &c, &mut rng),
            Err(ValidationError::InvalidWeight { location: 1, .. })
        ));
        let c = cands(&[(1, -4.0)]);
        assert!(sample_with_replacement("jobs", 2, 1, &c, &mut rng).is_err());
    }

    #[test]
    fn seeded_draws_are_reproducible() {
        let c = cands(&[(1, 1.0), (2, 2.0), (3, 3.0)]);
        let a = sample_with_replacement("jobs", 1, 20, &c, &mut StdRng::seed_from_u64(11)).unwrap();
        let b = sample_with_replacement("jobs", 1, 20, &c, &mut StdRng::seed_from_u64(11)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fallback_only_when_primary_empty() {
        let (c, src) = with_fallback(cands(&[(1, 0.0), (2, 10.0)]), cands(&[(1, 5.0)]));
        assert_eq!(src, CapacitySource::Primary);
        assert_eq!(c, cands(&[(2, 10.0)]));

        let (c, src) = with_fallback(cands(&[(1, 0.0)]), cands(&[(1, 5.0), (2, 0.0)]));
        assert_eq!(src, CapacitySource::Fallback);
        assert_eq!(c, cands(&[(1, 5.0)]));
    }
}
