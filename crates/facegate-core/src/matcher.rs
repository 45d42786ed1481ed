//! Descriptor similarity and candidate search.

use crate::types::{Candidate, Descriptor, MatchResult, DESCRIPTOR_LEN};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("descriptor length mismatch: {left} vs {right}")]
    DescriptorLengthMismatch { left: usize, right: usize },
    #[error("descriptors come from different models: {left} vs {right}")]
    ModelVersionMismatch { left: String, right: String },
}

/// Similarity in [0, 1]: `max(0, 1 - ‖a - b‖)`.
///
/// Descriptors of different lengths, or tagged with different model
/// versions, are not comparable.
pub fn similarity(a: &Descriptor, b: &Descriptor) -> Result<f32, MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::DescriptorLengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    if let (Some(va), Some(vb)) = (&a.model_version, &b.model_version) {
        if va != vb {
            return Err(MatchError::ModelVersionMismatch {
                left: va.clone(),
                right: vb.clone(),
            });
        }
    }

    let distance = a
        .values
        .iter()
        .zip(&b.values)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt();
    Ok((1.0 - distance).max(0.0))
}

/// Queries must have the standard descriptor length; candidates are then
/// checked against the query by [`similarity`].
fn check_query(query: &Descriptor) -> Result<(), MatchError> {
    if query.len() != DESCRIPTOR_LEN {
        return Err(MatchError::DescriptorLengthMismatch {
            left: query.len(),
            right: DESCRIPTOR_LEN,
        });
    }
    Ok(())
}

/// Strategy for searching a candidate set.
pub trait Matcher {
    fn compare(
        &self,
        query: &Descriptor,
        candidates: &[Candidate],
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Returns the first candidate, in the given order, whose similarity exceeds
/// the threshold. A later candidate with higher similarity is not considered.
pub struct FirstMatchMatcher;

impl Matcher for FirstMatchMatcher {
    fn compare(
        &self,
        query: &Descriptor,
        candidates: &[Candidate],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        check_query(query)?;
        let mut best = 0.0f32;
        for candidate in candidates {
            let sim = similarity(query, &candidate.descriptor)?;
            if sim > threshold {
                return Ok(MatchResult {
                    is_match: true,
                    matched_candidate_id: Some(candidate.id.clone()),
                    similarity: sim,
                });
            }
            best = best.max(sim);
        }
        Ok(MatchResult::no_match(best))
    }
}

/// Scans every candidate and returns the most similar one above the threshold.
pub struct BestMatchMatcher;

impl Matcher for BestMatchMatcher {
    fn compare(
        &self,
        query: &Descriptor,
        candidates: &[Candidate],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        check_query(query)?;
        let mut best: Option<(f32, &Candidate)> = None;
        for candidate in candidates {
            let sim = similarity(query, &candidate.descriptor)?;
            if best.map_or(true, |(b, _)| sim > b) {
                best = Some((sim, candidate));
            }
        }

        Ok(match best {
            Some((sim, c)) if sim > threshold => MatchResult {
                is_match: true,
                matched_candidate_id: Some(c.id.clone()),
                similarity: sim,
            },
            Some((sim, _)) => MatchResult::no_match(sim),
            None => MatchResult::no_match(0.0),
        })
    }
}

/// First-match-wins search over `candidates`.
pub fn match_against_candidates(
    descriptor: &Descriptor,
    candidates: &[Candidate],
    threshold: f32,
) -> Result<MatchResult, MatchError> {
    FirstMatchMatcher.compare(descriptor, candidates, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(fill: f32) -> Descriptor {
        Descriptor::new(vec![fill; DESCRIPTOR_LEN])
    }

    /// Descriptor at a known Euclidean distance from `desc(0.0)`.
    fn at_distance(d: f32) -> Descriptor {
        let mut v = vec![0.0; DESCRIPTOR_LEN];
        v[0] = d;
        Descriptor::new(v)
    }

    fn candidate(id: &str, descriptor: Descriptor) -> Candidate {
        Candidate {
            id: id.into(),
            descriptor,
        }
    }

    #[test]
    fn test_similarity_self_is_exactly_one() {
        let d = Descriptor::new((0..DESCRIPTOR_LEN).map(|i| (i as f32 * 0.37).sin()).collect());
        assert_eq!(similarity(&d, &d).unwrap(), 1.0);
    }

    #[test]
    fn test_similarity_symmetric() {
        let a = Descriptor::new((0..DESCRIPTOR_LEN).map(|i| (i as f32).cos() * 0.05).collect());
        let b = Descriptor::new((0..DESCRIPTOR_LEN).map(|i| (i as f32).sin() * 0.05).collect());
        assert_eq!(similarity(&a, &b).unwrap(), similarity(&b, &a).unwrap());
    }

    #[test]
    fn test_similarity_known_distance_and_floor() {
        let s = similarity(&desc(0.0), &at_distance(0.25)).unwrap();
        assert!((s - 0.75).abs() < 1e-6);
        assert_eq!(similarity(&desc(0.0), &at_distance(3.0)).unwrap(), 0.0);
    }

    #[test]
    fn test_similarity_length_mismatch_rejected() {
        let short = Descriptor::new(vec![0.0; 64]);
        assert_eq!(
            similarity(&desc(0.0), &short),
            Err(MatchError::DescriptorLengthMismatch { left: 128, right: 64 })
        );
    }

    #[test]
    fn test_similarity_model_version_mismatch_rejected() {
        let mut a = desc(0.0);
        let mut b = desc(0.0);
        a.model_version = Some("v1".into());
        b.model_version = Some("v2".into());
        assert!(matches!(similarity(&a, &b), Err(MatchError::ModelVersionMismatch { .. })));
        b.model_version = None;
        assert_eq!(similarity(&a, &b).unwrap(), 1.0);
    }

    #[test]
    fn test_empty_candidates_no_match() {
        let result = match_against_candidates(&desc(0.0), &[], 0.4).unwrap();
        assert!(!result.is_match);
        assert_eq!(result.matched_candidate_id, None);
    }

    #[test]
    fn test_first_match_wins_over_better_later_candidate() {
        let candidates = vec![
            candidate("far", at_distance(0.9)),
            candidate("first", at_distance(0.4)),
            candidate("best", at_distance(0.0)),
        ];
        let result = match_against_candidates(&desc(0.0), &candidates, 0.5).unwrap();
        assert!(result.is_match);
        assert_eq!(result.matched_candidate_id.as_deref(), Some("first"));
        assert!((result.similarity - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_best_match_matcher_picks_highest() {
        let candidates = vec![
            candidate("first", at_distance(0.4)),
            candidate("best", at_distance(0.1)),
        ];
        let result = BestMatchMatcher.compare(&desc(0.0), &candidates, 0.5).unwrap();
        assert_eq!(result.matched_candidate_id.as_deref(), Some("best"));
    }

    #[test]
    fn test_threshold_is_strict() {
        let candidates = vec![candidate("edge", at_distance(0.5))];
        let result = match_against_candidates(&desc(0.0), &candidates, 0.5).unwrap();
        assert!(!result.is_match);
        assert!((result.similarity - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_candidate_fails_loudly() {
        let candidates = vec![candidate("bad", Descriptor::new(vec![0.0; 3]))];
        assert!(match_against_candidates(&desc(0.0), &candidates, 0.5).is_err());
    }

    #[test]
    fn test_short_descriptor_rejected_even_against_equal_candidates() {
        let short = Descriptor::new(vec![0.0; 64]);
        let candidates = vec![candidate("also-short", Descriptor::new(vec![0.0; 64]))];
        assert_eq!(
            match_against_candidates(&short, &candidates, 0.4),
            Err(MatchError::DescriptorLengthMismatch { left: 64, right: 128 })
        );
        assert!(BestMatchMatcher.compare(&short, &[], 0.4).is_err());
    }
}
