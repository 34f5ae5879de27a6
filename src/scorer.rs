use crate::error::Incompatibility;
use crate::summary::Summary;

/// Dissimilarity between a batch summary and the reference.
///
/// Always a finite, non-negative number; anything else is reported as an
/// incompatibility so a broken summary implementation cannot poison the
/// threshold statistics.
pub fn change_score<S: Summary>(summary: &S, reference: &S) -> Result<f64, Incompatibility> {
    let score = summary.distance(reference)?;
    if !score.is_finite() || score < 0.0 {
        return Err(Incompatibility::InvalidScore(score));
    }
    Ok(score)
}
