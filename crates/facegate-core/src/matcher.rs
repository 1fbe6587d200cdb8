//! Nearest-neighbour matching of a probe descriptor against stored candidates.

use crate::types::{Candidate, Descriptor};

/// Default maximum Euclidean distance for an accepted match.
///
/// Same-person distances for the reference embedding model sit well below this.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// An accepted match.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub identifier: String,
    pub display_name: String,
    /// Euclidean distance between probe and matched descriptor.
    pub distance: f32,
    /// `1 - distance` clamped to [0, 1]. A closeness proxy, not a probability.
    pub confidence: f32,
}

/// Result of a gallery scan.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Match(Match),
    /// Nothing within tolerance. `best_distance` is `None` when no candidate
    /// survived filtering.
    NoMatch {
        best_distance: Option<f32>,
        scanned: usize,
        skipped: usize,
    },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Match(_))
    }
}

/// Strategy for comparing a probe descriptor against a gallery.
pub trait Matcher {
    fn best_match(&self, probe: &Descriptor, gallery: &[Candidate]) -> MatchOutcome;
}

/// Exhaustive L2 matcher.
///
/// Scans every candidate, keeps the first one at the minimum distance, and
/// accepts it only if that distance is strictly below `tolerance`.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub tolerance: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self { tolerance: DEFAULT_TOLERANCE }
    }
}

impl EuclideanMatcher {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }
}

/// Map a distance to the caller-facing confidence score.
pub fn confidence_from_distance(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

impl Matcher for EuclideanMatcher {
    fn best_match(&self, probe: &Descriptor, gallery: &[Candidate]) -> MatchOutcome {
        let dim = probe.len();
        if dim == 0 || probe.first_non_finite().is_some() {
            tracing::warn!(dim, "probe descriptor unusable; skipping scan");
            return MatchOutcome::NoMatch {
                best_distance: None,
                scanned: 0,
                skipped: gallery.len(),
            };
        }

        let mut best: Option<(usize, f32)> = None;
        let mut scanned = 0usize;
        let mut skipped = 0usize;

        for (i, candidate) in gallery.iter().enumerate() {
            let descriptor = match &candidate.descriptor {
                Ok(d) if d.len() == dim => d,
                Ok(d) => {
                    tracing::warn!(
                        kind = "data_integrity",
                        identifier = %candidate.identifier,
                        expected = dim,
                        actual = d.len(),
                        "stored descriptor has wrong length; excluded from match"
                    );
                    skipped += 1;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(
                        kind = "data_integrity",
                        identifier = %candidate.identifier,
                        error = %err,
                        "stored descriptor is malformed; excluded from match"
                    );
                    skipped += 1;
                    continue;
                }
            };

            let distance = probe.euclidean_distance(descriptor);
            if !distance.is_finite() {
                tracing::warn!(
                    kind = "data_integrity",
                    identifier = %candidate.identifier,
                    "distance is not finite; excluded from match"
                );
                skipped += 1;
                continue;
            }
            scanned += 1;

            // Strict comparison keeps the earliest candidate on ties.
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        match best {
            Some((idx, distance)) if distance < self.tolerance => {
                let winner = &gallery[idx];
                tracing::debug!(
                    identifier = %winner.identifier,
                    distance,
                    scanned,
                    skipped,
                    "match accepted"
                );
                MatchOutcome::Match(Match {
                    identifier: winner.identifier.clone(),
                    display_name: winner.display_name.clone(),
                    distance,
                    confidence: confidence_from_distance(distance),
                })
            }
            _ => {
                let best_distance = best.map(|(_, d)| d);
                tracing::debug!(?best_distance, tolerance = self.tolerance, scanned, skipped, "no match");
                MatchOutcome::NoMatch {
                    best_distance,
                    scanned,
                    skipped,
                }
            }
        }
    }
}
