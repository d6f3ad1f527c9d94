use crate::effects::params::ChromaKey;
use crate::foundation::error::{CutlineError, CutlineResult};
use crate::foundation::math::{mul_div255_u8, smoothstep};

/// Apply chroma-key transparency to a premultiplied RGBA8 buffer in place.
///
/// Pixel alpha is scaled by a keep factor derived from the normalized RGB
/// distance to the key color: fully transparent at or below `tolerance`,
/// fully opaque at or above `tolerance + softness`, smoothstep in between.
/// Color channels scale with the alpha so the buffer stays premultiplied.
pub fn apply_chroma_key(data: &mut [u8], key: &ChromaKey) -> CutlineResult<()> {
    if !data.len().is_multiple_of(4) {
        return Err(CutlineError::validation(
            "apply_chroma_key expects an rgba8 buffer",
        ));
    }

    let lo = key.tolerance as f32;
    let hi = (key.tolerance + key.softness) as f32;
    let [kr, kg, kb] = key.color.map(f32::from);
    // sqrt(3 * 255^2), the largest possible RGB distance.
    const MAX_DIST: f32 = 441.673;

    for px in data.chunks_exact_mut(4) {
        let a = px[3];
        if a == 0 {
            continue;
        }

        // Un-premultiply for the distance test so partially transparent
        // pixels compare in straight color space.
        let unpremul = |c: u8| -> f32 { f32::from(c) * 255.0 / f32::from(a) };
        let dr = unpremul(px[0]) - kr;
        let dg = unpremul(px[1]) - kg;
        let db = unpremul(px[2]) - kb;
        let dist = (dr * dr + dg * dg + db * db).sqrt() / MAX_DIST;

        let keep = if key.softness <= 0.0 {
            if dist <= lo { 0.0 } else { 1.0 }
        } else {
            smoothstep(lo, hi, dist)
        };

        if keep >= 1.0 {
            continue;
        }
        let keep_u16 = ((keep * 255.0).round() as i32).clamp(0, 255) as u16;
        for c in px.iter_mut() {
            *c = mul_div255_u8(u16::from(*c), keep_u16);
        }
    }

    Ok(())
}
