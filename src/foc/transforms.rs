// Coordinate transformations between phase quantities and the αβ frame

/// 1 / sqrt(3)
pub const ONE_BY_SQRT3: f32 = 0.577_350_26;

/// sqrt(3) / 2
const SQRT3_BY_2: f32 = 0.866_025_4;

/// Clarke transformation (abc → αβ)
///
/// Amplitude-invariant form assuming `a + b + c == 0`, so only two phases
/// contribute.
///
/// # Returns
/// Tuple of (alpha, beta)
pub fn clarke(a: f32, b: f32, c: f32) -> (f32, f32) {
    let alpha = a;
    let beta = ONE_BY_SQRT3 * (b - c);
    (alpha, beta)
}

/// Inverse Clarke transformation (αβ → abc)
///
/// # Returns
/// Tuple of (a, b, c) phase quantities
pub fn inverse_clarke(alpha: f32, beta: f32) -> (f32, f32, f32) {
    let a = alpha;
    let b = -0.5 * alpha + SQRT3_BY_2 * beta;
    let c = -0.5 * alpha - SQRT3_BY_2 * beta;
    (a, b, c)
}
