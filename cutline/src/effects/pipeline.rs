use crate::compose::blend::over_in_place;
use crate::effects::blur::blur_rgba8_premul;
use crate::effects::chroma::apply_chroma_key;
use crate::effects::color::grayscale_in_place;
use crate::effects::envelope::fade_factor;
use crate::effects::params::EffectParams;
use crate::effects::place::place_frame;
use crate::effects::text::{OverlayTiming, TextRasterizer};
use crate::foundation::core::{Canvas, FrameRgba};
use crate::foundation::error::CutlineResult;

/// One composited visual layer: canvas-sized premultiplied pixels plus the
/// opacity to use when blending it onto the accumulator.
pub struct RenderedLayer {
    pub frame: FrameRgba,
    pub opacity: f32,
}

/// Run the per-clip effect pipeline over one decoded frame.
///
/// Application order is fixed and load-bearing for determinism:
/// chroma key, grayscale, blur, scale, rotation (as one placement), the
/// opacity factor from base opacity times the fade envelope, then the text
/// overlay composited on top. The returned opacity is applied by the caller
/// when blending the layer.
pub fn render_layer(
    canvas: Canvas,
    decoded: FrameRgba,
    fx: &EffectParams,
    elapsed_sec: f64,
    duration_sec: f64,
    text: &mut TextRasterizer,
) -> CutlineResult<RenderedLayer> {
    let mut src = decoded;

    if !fx.is_pixel_neutral() {
        if let Some(key) = &fx.chroma_key {
            apply_chroma_key(&mut src.data, key)?;
        }
        if fx.grayscale {
            grayscale_in_place(&mut src.data)?;
        }
        if let Some(blur) = &fx.blur {
            src.data = blur_rgba8_premul(
                &src.data,
                src.width,
                src.height,
                blur.radius_px,
                blur.effective_sigma(),
            )?;
        }
    }

    let mut layer = place_frame(canvas, &src, fx.scale, fx.rotation_deg, fx.offset_px)?;

    if let Some(overlay) = &fx.text {
        let rendered = text.render(
            canvas,
            overlay,
            OverlayTiming {
                elapsed_sec,
                duration_sec,
                fade_in_sec: fx.fade_in_sec,
                fade_out_sec: fx.fade_out_sec,
            },
        )?;
        over_in_place(&mut layer.data, &rendered.data, 1.0)?;
    }

    let opacity =
        fx.opacity * fade_factor(elapsed_sec, duration_sec, fx.fade_in_sec, fx.fade_out_sec);

    Ok(RenderedLayer {
        frame: layer,
        opacity: opacity as f32,
    })
}
