use crate::foundation::core::{Canvas, FrameRgba};
use crate::foundation::error::CutlineResult;
use kurbo::Affine;

/// Place a source frame onto an output-canvas-sized layer.
///
/// The source is centered on the canvas (plus `offset_px`), scaled uniformly,
/// then rotated about its own center. Sampling is inverse-mapped
/// nearest-neighbor so the result is bit-exact for a given input; no
/// interpolation is performed.
pub fn place_frame(
    canvas: Canvas,
    src: &FrameRgba,
    scale: f64,
    rotation_deg: f64,
    offset_px: [f64; 2],
) -> CutlineResult<FrameRgba> {
    src.check_len()?;

    // Identity placement of a canvas-sized frame is a plain copy.
    if scale == 1.0
        && rotation_deg == 0.0
        && offset_px == [0.0, 0.0]
        && src.width == canvas.width
        && src.height == canvas.height
    {
        return Ok(src.clone());
    }

    let dst_cx = f64::from(canvas.width) / 2.0 + offset_px[0];
    let dst_cy = f64::from(canvas.height) / 2.0 + offset_px[1];
    let src_cx = f64::from(src.width) / 2.0;
    let src_cy = f64::from(src.height) / 2.0;

    let forward = Affine::translate((dst_cx, dst_cy))
        * Affine::rotate(rotation_deg.to_radians())
        * Affine::scale(scale)
        * Affine::translate((-src_cx, -src_cy));
    let inverse = forward.inverse();

    let mut out = FrameRgba::transparent(canvas);
    let src_w = src.width as i64;
    let src_h = src.height as i64;

    for y in 0..canvas.height {
        let row = (y as usize) * canvas.width as usize * 4;
        for x in 0..canvas.width {
            let p = inverse * kurbo::Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5);
            let sx = p.x.floor() as i64;
            let sy = p.y.floor() as i64;
            if sx < 0 || sy < 0 || sx >= src_w || sy >= src_h {
                continue;
            }
            let src_idx = ((sy * src_w + sx) as usize) * 4;
            let dst_idx = row + (x as usize) * 4;
            out.data[dst_idx..dst_idx + 4].copy_from_slice(&src.data[src_idx..src_idx + 4]);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, px: [u8; 4]) -> FrameRgba {
        FrameRgba {
            width: w,
            height: h,
            data: px.repeat((w * h) as usize),
            premultiplied: true,
        }
    }

    #[test]
    fn identity_placement_is_a_copy() {
        let canvas = Canvas {
            width: 4,
            height: 4,
        };
        let src = solid(4, 4, [10, 20, 30, 255]);
        let out = place_frame(canvas, &src, 1.0, 0.0, [0.0, 0.0]).unwrap();
        assert_eq!(out.data, src.data);
    }

    #[test]
    fn smaller_source_is_centered() {
        let canvas = Canvas {
            width: 6,
            height: 6,
        };
        let src = solid(2, 2, [255, 0, 0, 255]);
        let out = place_frame(canvas, &src, 1.0, 0.0, [0.0, 0.0]).unwrap();

        // Center 2x2 block is red, the border stays transparent.
        let px = |x: usize, y: usize| -> [u8; 4] {
            let i = (y * 6 + x) * 4;
            [out.data[i], out.data[i + 1], out.data[i + 2], out.data[i + 3]]
        };
        assert_eq!(px(2, 2), [255, 0, 0, 255]);
        assert_eq!(px(3, 3), [255, 0, 0, 255]);
        assert_eq!(px(0, 0), [0, 0, 0, 0]);
        assert_eq!(px(5, 5), [0, 0, 0, 0]);
    }

    #[test]
    fn scale_2_fills_the_canvas() {
        let canvas = Canvas {
            width: 4,
            height: 4,
        };
        let src = solid(2, 2, [0, 255, 0, 255]);
        let out = place_frame(canvas, &src, 2.0, 0.0, [0.0, 0.0]).unwrap();
        assert!(out.data.chunks_exact(4).all(|px| px == [0, 255, 0, 255]));
    }

    #[test]
    fn rotation_90_of_square_covers_the_same_pixels() {
        let canvas = Canvas {
            width: 4,
            height: 4,
        };
        let src = solid(4, 4, [1, 2, 3, 255]);
        let out = place_frame(canvas, &src, 1.0, 90.0, [0.0, 0.0]).unwrap();
        assert!(out.data.chunks_exact(4).all(|px| px == [1, 2, 3, 255]));
    }

    #[test]
    fn offset_moves_the_source() {
        let canvas = Canvas {
            width: 6,
            height: 6,
        };
        let src = solid(2, 2, [255, 0, 0, 255]);
        let out = place_frame(canvas, &src, 1.0, 0.0, [2.0, 0.0]).unwrap();
        let i = (2 * 6 + 4) * 4;
        assert_eq!(&out.data[i..i + 4], &[255, 0, 0, 255]);
        let j = (2 * 6 + 2) * 4;
        assert_eq!(&out.data[j..j + 4], &[0, 0, 0, 0]);
    }

    #[test]
    fn placement_is_deterministic() {
        let canvas = Canvas {
            width: 8,
            height: 8,
        };
        let src = solid(5, 3, [9, 8, 7, 255]);
        let a = place_frame(canvas, &src, 1.3, 33.0, [1.5, -0.5]).unwrap();
        let b = place_frame(canvas, &src, 1.3, 33.0, [1.5, -0.5]).unwrap();
        assert_eq!(a.data, b.data);
    }
}
