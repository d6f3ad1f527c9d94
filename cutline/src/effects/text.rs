use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;

use crate::effects::envelope::fade_factor;
use crate::effects::params::{TextAnchor, TextAnimation, TextOverlay};
use crate::foundation::core::{Canvas, FrameRgba};
use crate::foundation::error::{CutlineError, CutlineResult};

/// Canvas margin kept clear around anchored text.
const ANCHOR_MARGIN_PX: f64 = 10.0;
/// Travel distance for the slide-in animation.
const SLIDE_DISTANCE_PX: f64 = 80.0;

/// RGBA8 brush color carried through Parley text layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct TextBrushRgba8 {
    pub(crate) r: u8,
    pub(crate) g: u8,
    pub(crate) b: u8,
    pub(crate) a: u8,
}

/// Clip-local timing handed to the rasterizer for overlay animations.
#[derive(Clone, Copy, Debug)]
pub struct OverlayTiming {
    /// Seconds since the clip start.
    pub elapsed_sec: f64,
    /// Clip timeline duration in seconds.
    pub duration_sec: f64,
    /// Clip fade-in window, reused as the animation window.
    pub fade_in_sec: f64,
    /// Clip fade-out window.
    pub fade_out_sec: f64,
}

/// Stateful text rasterizer: shapes text with Parley and renders glyph runs
/// into a premultiplied RGBA8 layer with `vello_cpu`.
///
/// Font files are read once and cached for the rasterizer's lifetime.
pub struct TextRasterizer {
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<TextBrushRgba8>,
    font_cache: HashMap<PathBuf, Arc<Vec<u8>>>,
}

impl Default for TextRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextRasterizer {
    pub fn new() -> Self {
        Self {
            font_ctx: parley::FontContext::default(),
            layout_ctx: parley::LayoutContext::new(),
            font_cache: HashMap::new(),
        }
    }

    /// Render an overlay into a canvas-sized transparent layer.
    pub fn render(
        &mut self,
        canvas: Canvas,
        overlay: &TextOverlay,
        timing: OverlayTiming,
    ) -> CutlineResult<FrameRgba> {
        let font_bytes = self.font_bytes(&overlay.font_source)?;
        let max_width = (f64::from(canvas.width) - 2.0 * ANCHOR_MARGIN_PX).max(1.0) as f32;
        let layout = self.layout_plain(
            &overlay.text,
            &font_bytes,
            overlay.size_px as f32,
            Some(max_width),
        )?;

        let (x, y) = anchor_origin(canvas, overlay.anchor, &layout);
        let (dx, dy, alpha_mul) = animate(overlay, timing);

        let width_u16: u16 = canvas
            .width
            .try_into()
            .map_err(|_| CutlineError::validation("canvas width exceeds u16"))?;
        let height_u16: u16 = canvas
            .height
            .try_into()
            .map_err(|_| CutlineError::validation("canvas height exceeds u16"))?;

        let font = vello_cpu::peniko::FontData::new(
            vello_cpu::peniko::Blob::from(font_bytes.as_ref().clone()),
            0,
        );
        let mut ctx = vello_cpu::RenderContext::new(width_u16, height_u16);

        if let Some(shadow) = &overlay.shadow {
            let mut color = shadow.color;
            color[3] = scale_alpha(color[3], alpha_mul);
            draw_layout_pass(
                &mut ctx,
                &layout,
                &font,
                x + dx + shadow.offset_px,
                y + dy + shadow.offset_px,
                color,
            );
        }

        if let Some(outline) = &overlay.outline {
            let mut color = outline.color;
            color[3] = scale_alpha(color[3], alpha_mul);
            let w = f64::from(outline.width_px);
            for oy in [-w, 0.0, w] {
                for ox in [-w, 0.0, w] {
                    if ox == 0.0 && oy == 0.0 {
                        continue;
                    }
                    draw_layout_pass(&mut ctx, &layout, &font, x + dx + ox, y + dy + oy, color);
                }
            }
        }

        let mut fill = overlay.color;
        fill[3] = scale_alpha(fill[3], alpha_mul);
        draw_layout_pass(&mut ctx, &layout, &font, x + dx, y + dy, fill);

        ctx.flush();
        let mut pixmap = vello_cpu::Pixmap::new(width_u16, height_u16);
        ctx.render_to_pixmap(&mut pixmap);

        Ok(FrameRgba {
            width: canvas.width,
            height: canvas.height,
            data: pixmap.data_as_u8_slice().to_vec(),
            premultiplied: true,
        })
    }

    fn font_bytes(&mut self, source: &str) -> CutlineResult<Arc<Vec<u8>>> {
        let path = PathBuf::from(source);
        if let Some(bytes) = self.font_cache.get(&path) {
            return Ok(bytes.clone());
        }
        let bytes = std::fs::read(&path)
            .with_context(|| format!("read font file '{}'", path.display()))?;
        let bytes = Arc::new(bytes);
        self.font_cache.insert(path, bytes.clone());
        Ok(bytes)
    }

    /// Shape and lay out plain text using the provided font bytes.
    fn layout_plain(
        &mut self,
        text: &str,
        font_bytes: &[u8],
        size_px: f32,
        max_width_px: Option<f32>,
    ) -> CutlineResult<parley::Layout<TextBrushRgba8>> {
        let families = self
            .font_ctx
            .collection
            .register_fonts(parley::fontique::Blob::from(font_bytes.to_vec()), None);
        let family_id = families.first().map(|(id, _)| *id).ok_or_else(|| {
            CutlineError::validation("no font families registered from font bytes")
        })?;

        let family_name = self
            .font_ctx
            .collection
            .family_name(family_id)
            .ok_or_else(|| CutlineError::validation("registered font family has no name"))?
            .to_string();

        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(std::borrow::Cow::Owned(family_name)),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(size_px));
        builder.push_default(parley::style::StyleProperty::Brush(TextBrushRgba8::default()));

        let mut layout: parley::Layout<TextBrushRgba8> = builder.build(text);
        if let Some(w) = max_width_px {
            layout.break_all_lines(Some(w));
            layout.align(
                Some(w),
                parley::Alignment::Start,
                parley::AlignmentOptions::default(),
            );
        } else {
            layout.break_all_lines(None);
        }

        Ok(layout)
    }
}

fn draw_layout_pass(
    ctx: &mut vello_cpu::RenderContext,
    layout: &parley::Layout<TextBrushRgba8>,
    font: &vello_cpu::peniko::FontData,
    x: f64,
    y: f64,
    color: [u8; 4],
) {
    ctx.set_transform(vello_cpu::kurbo::Affine::translate((x, y)));
    ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
        color[0], color[1], color[2], color[3],
    ));

    for line in layout.lines() {
        for item in line.items() {
            let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                continue;
            };
            let glyphs = run.glyphs().map(|g| vello_cpu::Glyph {
                id: g.id,
                x: g.x,
                y: g.y,
            });
            ctx.glyph_run(font)
                .font_size(run.run().font_size())
                .fill_glyphs(glyphs);
        }
    }
}

fn anchor_origin(
    canvas: Canvas,
    anchor: TextAnchor,
    layout: &parley::Layout<TextBrushRgba8>,
) -> (f64, f64) {
    let text_w = f64::from(layout.width());
    let text_h = f64::from(layout.height());
    let cw = f64::from(canvas.width);
    let ch = f64::from(canvas.height);
    let m = ANCHOR_MARGIN_PX;

    let x = match anchor {
        TextAnchor::TopLeft | TextAnchor::CenterLeft | TextAnchor::BottomLeft => m,
        TextAnchor::TopCenter | TextAnchor::Center | TextAnchor::BottomCenter => {
            (cw - text_w) / 2.0
        }
        TextAnchor::TopRight | TextAnchor::CenterRight | TextAnchor::BottomRight => {
            cw - text_w - m
        }
    };
    let y = match anchor {
        TextAnchor::TopLeft | TextAnchor::TopCenter | TextAnchor::TopRight => m,
        TextAnchor::CenterLeft | TextAnchor::Center | TextAnchor::CenterRight => {
            (ch - text_h) / 2.0
        }
        TextAnchor::BottomLeft | TextAnchor::BottomCenter | TextAnchor::BottomRight => {
            ch - text_h - m
        }
    };
    (x, y)
}

/// Resolve animation displacement and alpha multiplier at the given timing.
fn animate(overlay: &TextOverlay, timing: OverlayTiming) -> (f64, f64, f64) {
    match overlay.animation {
        TextAnimation::None => (0.0, 0.0, 1.0),
        TextAnimation::Fade => {
            let a = fade_factor(
                timing.elapsed_sec,
                timing.duration_sec,
                timing.fade_in_sec,
                timing.fade_out_sec,
            );
            (0.0, 0.0, a)
        }
        TextAnimation::SlideIn => {
            let progress = if timing.fade_in_sec > 0.0 {
                (timing.elapsed_sec / timing.fade_in_sec).clamp(0.0, 1.0)
            } else {
                1.0
            };
            let travel = (1.0 - progress) * SLIDE_DISTANCE_PX;
            let dy = match overlay.anchor {
                TextAnchor::TopLeft | TextAnchor::TopCenter | TextAnchor::TopRight => -travel,
                _ => travel,
            };
            (0.0, dy, 1.0)
        }
    }
}

fn scale_alpha(alpha: u8, mul: f64) -> u8 {
    ((f64::from(alpha) * mul.clamp(0.0, 1.0)).round() as i64).clamp(0, 255) as u8
}
