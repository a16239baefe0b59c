//! Glyph sheets rasterized with fontdue.
//!
//! A font is first baked into a sheet texture of its own. Once the atlas is
//! captured it is rebaked so its glyph rects point into the atlas instead.

use std::{collections::HashMap, rc::Rc};

use glam::Vec2;

use crate::{
    backend::{FontBaker, RenderBackend},
    pack::Rect,
    registry::FontSource,
    Error,
};

/// Widest a glyph sheet row gets before wrapping.
pub const SHEET_WIDTH: u32 = 512;

/// Printable ASCII.
pub const CHARSET: std::ops::RangeInclusive<char> = ' '..='~';

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    /// Where the glyph bitmap sits in the texture the font currently reads from.
    pub rect: Rect,
    /// From the pen position on the baseline to the bitmap's top-left corner.
    pub offset: Vec2,
    pub advance: f32,
}

pub struct BakedFont<T> {
    texture: Rc<T>,
    glyphs: HashMap<char, Glyph>,
    size: u32,
    ascent: f32,
    descent: f32,
    line_gap: f32,
    footprint: Vec2,
}

impl<T> BakedFont<T> {
    pub fn texture(&self) -> &Rc<T> {
        &self.texture
    }

    pub fn glyph(&self, c: char) -> Option<&Glyph> {
        self.glyphs.get(&c)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Distance from the top of a line to its baseline.
    pub fn baseline(&self) -> f32 {
        self.ascent
    }

    pub fn line_gap(&self) -> f32 {
        self.line_gap
    }

    pub fn line_height(&self) -> f32 {
        self.ascent - self.descent + self.line_gap
    }

    pub fn footprint(&self) -> Vec2 {
        self.footprint
    }

    /// Advance width of the longest line of `text`.
    pub fn width(&self, text: &str) -> f32 {
        text.lines()
            .map(|line| {
                line.chars()
                    .filter_map(|c| self.glyph(c))
                    .map(|g| g.advance)
                    .sum::<f32>()
            })
            .fold(0.0, f32::max)
    }

    /// Draws `text` with the top-left corner of its first line at `position`.
    pub fn draw_text<B>(&self, backend: &mut B, text: &str, position: Vec2)
    where
        B: RenderBackend<Texture = T>,
    {
        let mut pen = glam::vec2(position.x, position.y + self.baseline());
        for c in text.chars() {
            if c == '\n' {
                pen.x = position.x;
                pen.y += self.line_height();
                continue;
            }
            let glyph = match self.glyph(c) {
                Some(glyph) => glyph,
                None => continue,
            };
            if glyph.rect.width > 0.0 && glyph.rect.height > 0.0 {
                let dst = Rect::from_position_size(pen + glyph.offset, glyph.rect.size());
                backend.draw_sub_image(&self.texture, glyph.rect, dst);
            }
            pen.x += glyph.advance;
        }
    }
}

/// Places `sizes` left to right in rows no wider than `width`, one pixel
/// apart. Returns each position and the size of the area used.
pub fn layout_sheet(sizes: &[(u32, u32)], width: u32) -> (Vec<(u32, u32)>, (u32, u32)) {
    let mut positions = Vec::with_capacity(sizes.len());
    let (mut x, mut y, mut row) = (0, 0, 0);
    let mut used_width = 0;
    for &(w, h) in sizes {
        if x > 0 && x + w > width {
            y += row + 1;
            x = 0;
            row = 0;
        }
        positions.push((x, y));
        used_width = used_width.max(x + w);
        x += w + 1;
        row = row.max(h);
    }
    (positions, (used_width, y + row))
}

/// Premultiplied white at `coverage`.
pub(crate) fn glyph_pixel(coverage: u8) -> [u8; 4] {
    [coverage; 4]
}

/// Bakes printable ASCII into RGBA glyph sheets of premultiplied white, with
/// glyph coverage as alpha.
#[derive(Debug, Clone)]
pub struct GlyphSheetBaker {
    sheet_width: u32,
}

impl Default for GlyphSheetBaker {
    fn default() -> Self {
        Self::new(SHEET_WIDTH)
    }
}

impl GlyphSheetBaker {
    pub fn new(sheet_width: u32) -> Self {
        Self {
            sheet_width: sheet_width.max(1),
        }
    }

    fn load(source: &FontSource) -> Result<fontdue::Font, Error> {
        let path = source.path.display().to_string();
        let data = std::fs::read(&source.path).map_err(|e| Error::Font {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let settings = fontdue::FontSettings {
            collection_index: source.face_index,
            scale: source.size as f32,
            ..Default::default()
        };
        fontdue::Font::from_bytes(data, settings).map_err(|reason| Error::Font {
            path,
            reason: reason.to_string(),
        })
    }
}

impl<B: RenderBackend> FontBaker<B> for GlyphSheetBaker {
    type Font = BakedFont<B::Texture>;

    fn bake(&mut self, backend: &mut B, source: &FontSource) -> Result<Self::Font, Error> {
        let font = Self::load(source)?;
        let px = source.size as f32;

        let rasterized = CHARSET
            .map(|c| {
                let (metrics, coverage) = font.rasterize(c, px);
                (c, metrics, coverage)
            })
            .collect::<Vec<_>>();
        let sizes = rasterized
            .iter()
            .map(|(_, m, _)| (m.width as u32, m.height as u32))
            .collect::<Vec<_>>();
        let (positions, (used_width, used_height)) = layout_sheet(&sizes, self.sheet_width);

        let width = used_width.max(1);
        let height = used_height.max(1);
        let mut pixels = vec![0u8; (width * height * 4) as usize];
        let mut glyphs = HashMap::with_capacity(rasterized.len());
        for ((c, metrics, coverage), &(x, y)) in rasterized.iter().zip(&positions) {
            for row in 0..metrics.height {
                for col in 0..metrics.width {
                    let alpha = coverage[row * metrics.width + col];
                    let i = (((y as usize + row) * width as usize) + x as usize + col) * 4;
                    pixels[i..i + 4].copy_from_slice(&glyph_pixel(alpha));
                }
            }
            glyphs.insert(
                *c,
                Glyph {
                    rect: Rect::new(x as f32, y as f32, metrics.width as f32, metrics.height as f32),
                    offset: glam::vec2(
                        metrics.xmin as f32,
                        -(metrics.height as f32 + metrics.ymin as f32),
                    ),
                    advance: metrics.advance_width,
                },
            );
        }

        let (ascent, descent, line_gap) = match font.horizontal_line_metrics(px) {
            Some(m) => (m.ascent, m.descent, m.line_gap),
            None => (px, 0.0, 0.0),
        };
        let texture = backend.create_texture(&pixels, width, height, 1)?;
        Ok(BakedFont {
            texture: Rc::new(texture),
            glyphs,
            size: source.size,
            ascent,
            descent,
            line_gap,
            footprint: glam::vec2(used_width as f32, used_height as f32),
        })
    }

    fn footprint(&self, font: &Self::Font) -> Vec2 {
        font.footprint
    }

    fn blit(&mut self, backend: &mut B, font: &Self::Font, dst: Rect) {
        let src = Rect::from_position_size(Vec2::ZERO, font.footprint);
        backend.draw_sub_image(&font.texture, src, dst);
    }

    fn rebake(&mut self, font: &Self::Font, atlas: &Rc<B::Texture>, origin: Vec2) -> Self::Font {
        let glyphs = font
            .glyphs
            .iter()
            .map(|(&c, glyph)| {
                let mut glyph = *glyph;
                glyph.rect.x += origin.x;
                glyph.rect.y += origin.y;
                (c, glyph)
            })
            .collect();
        BakedFont {
            texture: atlas.clone(),
            glyphs,
            size: font.size,
            ascent: font.ascent,
            descent: font.descent,
            line_gap: font.line_gap,
            footprint: font.footprint,
        }
    }
}
