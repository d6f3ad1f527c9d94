use crate::foundation::error::{CutlineError, CutlineResult};

/// Desaturate a premultiplied RGBA8 buffer to Rec. 601 luma in place.
///
/// Operating on premultiplied channels keeps the result premultiplied: the
/// luma of premultiplied RGB is the premultiplied luma.
pub fn grayscale_in_place(data: &mut [u8]) -> CutlineResult<()> {
    if !data.len().is_multiple_of(4) {
        return Err(CutlineError::validation(
            "grayscale_in_place expects an rgba8 buffer",
        ));
    }

    for px in data.chunks_exact_mut(4) {
        let y = (77 * u32::from(px[0]) + 150 * u32::from(px[1]) + 29 * u32::from(px[2]) + 128) >> 8;
        let y = y.min(255) as u8;
        px[0] = y;
        px[1] = y;
        px[2] = y;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_pixels_are_unchanged() {
        let mut data = vec![100u8, 100, 100, 255];
        grayscale_in_place(&mut data).unwrap();
        assert_eq!(data, vec![100, 100, 100, 255]);
    }

    #[test]
    fn channels_collapse_to_luma() {
        let mut data = vec![255u8, 0, 0, 255];
        grayscale_in_place(&mut data).unwrap();
        assert_eq!(data[0], data[1]);
        assert_eq!(data[1], data[2]);
        assert_eq!(data[3], 255);
        // Red luma is noticeably darker than white.
        assert!(data[0] > 50 && data[0] < 100);
    }
}
