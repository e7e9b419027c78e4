//! Reciprocal-rank fusion of vector and keyword results.

use crate::store::service::SearchHit;
use std::collections::HashMap;

/// Standard RRF damping constant.
pub const RRF_K: f32 = 60.0;

/// Fuse ranked lists: `score(d) = sum over lists of 1 / (k + rank(d))`, rank 1-based.
///
/// Documents are identified by id; the first occurrence supplies the payload.
pub fn reciprocal_rank_fusion(lists: &[Vec<SearchHit>], k: f32, limit: usize) -> Vec<SearchHit> {
    let mut fused: HashMap<i64, (SearchHit, f32)> = HashMap::new();

    for list in lists {
        for (rank, hit) in list.iter().enumerate() {
            let contribution = 1.0 / (k + rank as f32 + 1.0);
            fused
                .entry(hit.document.id)
                .and_modify(|(_, score)| *score += contribution)
                .or_insert_with(|| (hit.clone(), contribution));
        }
    }

    let mut hits: Vec<SearchHit> = fused
        .into_values()
        .map(|(mut hit, score)| {
            hit.score = score;
            hit
        })
        .collect();

    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.document.id.cmp(&b.document.id)));
    hits.truncate(limit);
    hits
}
