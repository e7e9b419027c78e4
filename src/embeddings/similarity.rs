//! Dense vector similarity.

use rayon::prelude::*;

/// Calculate cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched dimensions or zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Score every row of `matrix` against `query` and keep the best `k`.
///
/// # Returns
///
/// `(row index, score)` pairs ordered by descending score
pub fn top_k(query: &[f32], matrix: &[Vec<f32>], k: usize) -> Vec<(usize, f32)> {
    if k == 0 || query.iter().all(|x| *x == 0.0) {
        return Vec::new();
    }

    let mut scored: Vec<(usize, f32)> = matrix
        .par_iter()
        .enumerate()
        .map(|(idx, row)| (idx, cosine_similarity(query, row)))
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
}
