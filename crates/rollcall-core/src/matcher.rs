use crate::types::{Descriptor, EnrolledFace, StudentKey, ValidationError};

/// Maximum Euclidean distance (exclusive) accepted as the same face.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// A gallery entry accepted as the probe's identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub student_id: StudentKey,
    pub name: String,
    pub course: String,
    pub distance: f32,
    /// `(1 − distance) × 100`, clamped to [0, 100].
    pub confidence: f32,
}

/// Result of comparing a probe descriptor against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(Match),
    /// Nothing within the threshold. `best_distance` is `None` for an empty gallery.
    NoMatch { best_distance: Option<f32> },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

/// Strategy for comparing a probe descriptor against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Descriptor,
        gallery: &[EnrolledFace],
        threshold: f32,
    ) -> Result<MatchOutcome, ValidationError>;
}

/// Nearest-neighbor matcher over Euclidean distance.
///
/// Scans the whole gallery and keeps the first entry with the smallest
/// distance, so ties resolve to gallery order (student creation order).
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Descriptor,
        gallery: &[EnrolledFace],
        threshold: f32,
    ) -> Result<MatchOutcome, ValidationError> {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, face) in gallery.iter().enumerate() {
            let dist = probe.euclidean_distance(&face.descriptor)?;
            if best_idx.is_none() || dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        let outcome = match best_idx {
            Some(idx) if best_dist < threshold => {
                let face = &gallery[idx];
                MatchOutcome::Matched(Match {
                    student_id: face.student_id.clone(),
                    name: face.name.clone(),
                    course: face.course.clone(),
                    distance: best_dist,
                    confidence: confidence_from_distance(best_dist),
                })
            }
            Some(_) => MatchOutcome::NoMatch {
                best_distance: Some(best_dist),
            },
            None => MatchOutcome::NoMatch { best_distance: None },
        };

        tracing::debug!(
            gallery = gallery.len(),
            best_distance = best_idx.map(|_| best_dist),
            matched = outcome.is_match(),
            "compared probe"
        );
        Ok(outcome)
    }
}

/// Map a distance to the 0–100 confidence score reported to callers.
pub fn confidence_from_distance(distance: f32) -> f32 {
    ((1.0 - distance) * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(id: &str, values: Vec<f32>) -> EnrolledFace {
        EnrolledFace {
            student_id: StudentKey::parse(id).unwrap(),
            name: format!("name-{id}"),
            course: "CS".into(),
            descriptor: Descriptor::new(values),
        }
    }

    #[test]
    fn test_identical_probe_full_confidence() {
        let probe = Descriptor::new(vec![0.1, 0.2, 0.3]);
        let gallery = vec![face("a", vec![0.9, 0.9, 0.9]), face("b", vec![0.1, 0.2, 0.3])];

        let MatchOutcome::Matched(m) = EuclideanMatcher.compare(&probe, &gallery, 0.6).unwrap()
        else {
            panic!("expected match");
        };
        assert_eq!(m.student_id.as_str(), "B");
        assert_eq!(m.distance, 0.0);
        assert_eq!(m.confidence, 100.0);
    }

    #[test]
    fn test_scans_whole_gallery_for_minimum() {
        // Both within threshold; the closer one is last.
        let probe = Descriptor::new(vec![0.0, 0.0]);
        let gallery = vec![face("far", vec![0.5, 0.0]), face("near", vec![0.1, 0.0])];

        let MatchOutcome::Matched(m) = EuclideanMatcher.compare(&probe, &gallery, 0.6).unwrap()
        else {
            panic!("expected match");
        };
        assert_eq!(m.student_id.as_str(), "NEAR");
        assert!((m.confidence - 90.0).abs() < 1e-4);
    }

    #[test]
    fn test_tie_resolves_to_first_entry() {
        let probe = Descriptor::new(vec![0.0, 0.0]);
        let gallery = vec![face("first", vec![0.2, 0.0]), face("second", vec![0.0, 0.2])];

        let MatchOutcome::Matched(m) = EuclideanMatcher.compare(&probe, &gallery, 0.6).unwrap()
        else {
            panic!("expected match");
        };
        assert_eq!(m.student_id.as_str(), "FIRST");
    }

    #[test]
    fn test_threshold_is_strict() {
        let probe = Descriptor::new(vec![0.0, 0.0]);
        let gallery = vec![face("edge", vec![0.5, 0.0])];

        let outcome = EuclideanMatcher.compare(&probe, &gallery, 0.5).unwrap();
        assert_eq!(outcome, MatchOutcome::NoMatch { best_distance: Some(0.5) });
    }

    #[test]
    fn test_no_match_beyond_threshold() {
        let probe = Descriptor::new(vec![0.0, 0.0]);
        let gallery = vec![face("x", vec![1.0, 0.0]), face("y", vec![0.0, -0.7])];

        let outcome = EuclideanMatcher.compare(&probe, &gallery, DEFAULT_MATCH_THRESHOLD).unwrap();
        assert!(!outcome.is_match());
    }

    #[test]
    fn test_empty_gallery() {
        let probe = Descriptor::new(vec![0.0, 0.0]);
        let outcome = EuclideanMatcher.compare(&probe, &[], 0.6).unwrap();
        assert_eq!(outcome, MatchOutcome::NoMatch { best_distance: None });
    }

    #[test]
    fn test_probe_length_mismatch_is_error() {
        let probe = Descriptor::new(vec![0.0, 0.0, 0.0]);
        let gallery = vec![face("x", vec![0.0, 0.0])];
        assert!(matches!(
            EuclideanMatcher.compare(&probe, &gallery, 0.6),
            Err(ValidationError::DescriptorLength { .. })
        ));
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(confidence_from_distance(0.0), 100.0);
        assert_eq!(confidence_from_distance(1.7), 0.0);
    }
}
