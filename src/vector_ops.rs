use crate::config::{Number, EPSILON};
use wide::f64x4;

/// Running sums needed for a cosine score: dot product and both squared norms.
fn accumulate(a: &[Number], b: &[Number]) -> (Number, Number, Number) {
    let mut dot_product = f64x4::splat(0.0);
    let mut mag_a = f64x4::splat(0.0);
    let mut mag_b = f64x4::splat(0.0);

    let len = a.len().min(b.len());
    let simd_len = len - (len % 4);

    // SIMD loop
    for i in (0..simd_len).step_by(4) {
        let va = f64x4::new([a[i], a[i + 1], a[i + 2], a[i + 3]]);
        let vb = f64x4::new([b[i], b[i + 1], b[i + 2], b[i + 3]]);
        dot_product += va * vb;
        mag_a += va * va;
        mag_b += vb * vb;
    }

    let mut scalar_dot_product = dot_product.reduce_add();
    let mut scalar_mag_a = mag_a.reduce_add();
    let mut scalar_mag_b = mag_b.reduce_add();

    // Handle remaining elements
    for i in simd_len..len {
        scalar_dot_product += a[i] * b[i];
        scalar_mag_a += a[i] * a[i];
        scalar_mag_b += b[i] * b[i];
    }

    (scalar_dot_product, scalar_mag_a, scalar_mag_b)
}

/// Largest absolute value, NaN if any value is NaN.
fn max_abs(vector: &[Number]) -> Number {
    vector.iter().fold(0.0, |acc: Number, &x| {
        if x.is_nan() || acc.is_nan() {
            Number::NAN
        } else {
            acc.max(x.abs())
        }
    })
}

/// Copy of `vector` divided by its largest magnitude, so every square lies in
/// `[0, 1]`. `None` for all-zero or non-finite input.
fn rescaled(vector: &[Number]) -> Option<Vec<Number>> {
    let scale = max_abs(vector);
    if !scale.is_finite() || scale == 0.0 {
        return None;
    }
    Some(vector.iter().map(|&x| x / scale).collect())
}

/// Cosine similarity in `[-1, 1]`, or `None` when the lengths differ.
///
/// Inputs need not be normalized: the division by both norms is always
/// performed, and a zero-norm operand scores 0. Operands whose squared norm
/// overflows or underflows are rescaled by their largest element first.
pub fn compute_cosine_similarity_simd(a: &[Number], b: &[Number]) -> Option<Number> {
    if a.len() != b.len() {
        return None;
    }

    let (mut dot, mut mag_a, mut mag_b) = accumulate(a, b);
    if !(mag_a.is_normal() && mag_b.is_normal()) {
        let (Some(a), Some(b)) = (rescaled(a), rescaled(b)) else {
            return Some(0.0);
        };
        (dot, mag_a, mag_b) = accumulate(&a, &b);
    }
    let similarity = dot / (mag_a.sqrt() * mag_b.sqrt());
    if similarity.is_nan() {
        Some(0.0)
    } else {
        Some(similarity.clamp(-1.0, 1.0))
    }
}

/// Euclidean norm without intermediate overflow or underflow.
pub fn l2_norm(vector: &[Number]) -> Number {
    let sum_sq = vector.iter().map(|&x| x * x).sum::<Number>();
    if sum_sq.is_normal() {
        return sum_sq.sqrt();
    }
    let scale = max_abs(vector);
    if !scale.is_finite() || scale == 0.0 {
        return scale;
    }
    scale
        * vector
            .iter()
            .map(|&x| (x / scale) * (x / scale))
            .sum::<Number>()
            .sqrt()
}

/// Scales `vector` to unit length in place. Returns `false`, leaving the
/// values untouched, when the vector is all zeros or holds a non-finite value.
pub fn normalize_vector(vector: &mut [Number]) -> bool {
    let scale = max_abs(vector);
    if !scale.is_finite() || scale == 0.0 {
        return false;
    }
    // Squares of the pre-scaled values lie in [0, 1].
    let magnitude = vector
        .iter()
        .map(|&x| (x / scale) * (x / scale))
        .sum::<Number>()
        .sqrt();
    for x in vector.iter_mut() {
        *x = (*x / scale) / magnitude;
    }
    true
}

pub fn is_unit(vector: &[Number]) -> bool {
    (l2_norm(vector) - 1.0).abs() <= EPSILON
}
