/// Decimal places kept when a vector is reduced to its fingerprint.
pub const FINGERPRINT_PRECISION: usize = 4;

/// Similarities this close to 1.0 are reported as exactly 1.0.
pub const UNIT_SNAP: f64 = 1e-6;

/// Cosine similarity of two embeddings. HIGHER is closer.
///
/// Accumulates in f64 over 8-wide chunks.
/// Returns 0.0 when either norm is zero or the dimensions disagree. Identical
/// directions come out as exactly 1.0 despite rounding in the sums.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    let chunks = a.chunks_exact(8);
    let b_chunks = b.chunks_exact(8);
    let remainder_start = a.len() - a.len() % 8;

    for (ac, bc) in chunks.zip(b_chunks) {
        for i in 0..8 {
            let x = ac[i] as f64;
            let y = bc[i] as f64;
            dot += x * y;
            norm_a += x * x;
            norm_b += y * y;
        }
    }

    for i in remainder_start..a.len() {
        let x = a[i] as f64;
        let y = b[i] as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let sim = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    if 1.0 - sim < UNIT_SNAP {
        1.0
    } else {
        sim
    }
}

/// Comma-joined rendering with every element rounded to four decimals.
/// Vectors that render identically share a fingerprint bucket.
pub fn rounded_rendering(v: &[f32]) -> String {
    v.iter()
        .map(|x| format!("{:.*}", FINGERPRINT_PRECISION, *x as f64))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        let v: Vec<f32> = (0..19).map(|i| (i as f32 * 0.37).sin()).collect();
        assert_eq!(cosine_similarity(&v, &v), 1.0);
        let scaled: Vec<f32> = v.iter().map(|x| x * 3.0).collect();
        assert_eq!(cosine_similarity(&v, &scaled), 1.0);
    }

    #[test]
    fn orthogonal_and_opposite() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_norm_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0; 4], &[1.0, 2.0, 3.0, 4.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn dimension_mismatch_scores_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn rendering_rounds_to_four_places() {
        assert_eq!(rounded_rendering(&[0.1, -0.25, 0.333_33]), "0.1000,-0.2500,0.3333");
        assert_eq!(rounded_rendering(&[0.123_41]), rounded_rendering(&[0.123_44]));
        assert_ne!(rounded_rendering(&[0.1234]), rounded_rendering(&[0.1236]));
    }
}
