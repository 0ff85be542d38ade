// ── Vector math utilities ──────────────────────────────────────────────

use log::warn;

/// Convert a byte slice (from a SQLite BLOB) to a Vec<f32>.
pub(crate) fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Convert a Vec<f32> to bytes for SQLite BLOB storage.
pub(crate) fn f32_vec_to_bytes(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// L2 norm.
pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Tolerance band around unit norm; vectors inside it are left untouched.
pub(crate) const NORM_EPSILON: f32 = 0.01;

/// Renormalize `v` to unit length in place. Returns the original norm.
/// A norm far outside the expected band hints at a broken upstream
/// embedder, so that case is logged loudly.
///
/// Returns `None` for an effectively-zero vector, which cannot be
/// normalized and is rejected by the index.
pub(crate) fn renormalize(v: &mut [f32]) -> Option<f32> {
    let norm = l2_norm(v);
    if norm < 1e-8 {
        return None;
    }
    if (norm - 1.0).abs() > NORM_EPSILON {
        if !(0.5..=1.5).contains(&norm) {
            warn!("[vector] renormalizing vector with norm {norm:.4} (outside [0.5, 1.5]) — upstream embedder may be broken");
        }
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    Some(norm)
}

/// Dot product. For unit-norm inputs this equals cosine similarity.
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine distance between unit-norm vectors: 1 − dot.
pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - dot(a, b)
}
