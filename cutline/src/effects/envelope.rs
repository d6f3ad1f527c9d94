/// Linear fade envelope shared by clip opacity and audio gain.
///
/// Ramps 0 to 1 over `fade_in_sec` at the clip start and 1 to 0 over
/// `fade_out_sec` at the clip end; the two windows multiply when they overlap.
/// Outside `[0, duration_sec]` the factor clamps to 0.
pub fn fade_factor(
    elapsed_sec: f64,
    duration_sec: f64,
    fade_in_sec: f64,
    fade_out_sec: f64,
) -> f64 {
    if duration_sec <= 0.0 || elapsed_sec < 0.0 || elapsed_sec > duration_sec {
        return 0.0;
    }

    let mut gain = 1.0;
    if fade_in_sec > 0.0 {
        gain *= (elapsed_sec / fade_in_sec).clamp(0.0, 1.0);
    }
    if fade_out_sec > 0.0 {
        let remaining = duration_sec - elapsed_sec;
        gain *= (remaining / fade_out_sec).clamp(0.0, 1.0);
    }
    gain.clamp(0.0, 1.0)
}
