//! CPU backend for exercising the build without a GPU.

use std::{path::Path, rc::Rc};

use glam::Vec2;

use crate::{
    backend::{FontBaker, RenderBackend},
    build::flip_rows,
    pack::Rect,
    registry::FontSource,
    Error,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SoftTexture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub mip_levels: u32,
}

impl SoftTexture {
    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self {
            width,
            height,
            pixels: color.repeat((width * height) as usize),
            mip_levels: 1,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }
}

pub struct SoftTarget {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl SoftTarget {
    fn fill(&mut self, dst: Rect, mut color: impl FnMut(u32, u32) -> [u8; 4]) {
        let x0 = dst.x.max(0.0) as u32;
        let y0 = dst.y.max(0.0) as u32;
        let x1 = ((dst.x + dst.width).max(0.0) as u32).min(self.width);
        let y1 = ((dst.y + dst.height).max(0.0) as u32).min(self.height);
        for y in y0..y1 {
            for x in x0..x1 {
                let i = ((y * self.width + x) * 4) as usize;
                self.pixels[i..i + 4].copy_from_slice(&color(x - x0, y - y0));
            }
        }
    }
}

/// Records what it is asked to do and rasterizes fills and blits into the
/// bound target.
#[derive(Default)]
pub struct SoftBackend {
    /// Hands rows back bottom-up like a GL render target.
    pub inverted_y: bool,
    pub targets: Vec<(u32, u32)>,
    /// Clear flag of every pass, in order.
    pub passes: Vec<bool>,
    pub draws: Vec<(Rect, Rect)>,
    /// Makes `read_pixels` fail after consuming the target.
    pub fail_read_back: bool,
    bound: Option<SoftTarget>,
}

impl SoftBackend {
    pub fn with_inverted_y(inverted_y: bool) -> Self {
        Self {
            inverted_y,
            ..Default::default()
        }
    }

    pub fn fill(&mut self, dst: Rect, color: [u8; 4]) {
        if let Some(target) = &mut self.bound {
            target.fill(dst, |_, _| color);
        }
    }
}

impl RenderBackend for SoftBackend {
    type Target = SoftTarget;
    type Texture = SoftTexture;

    fn create_target(&mut self, width: u32, height: u32) -> Result<SoftTarget, Error> {
        self.targets.push((width, height));
        Ok(SoftTarget {
            width,
            height,
            pixels: vec![0xff; (width * height * 4) as usize],
        })
    }

    fn begin_pass(&mut self, target: &mut SoftTarget, clear: bool) -> Result<(), Error> {
        let mut pixels = std::mem::take(&mut target.pixels);
        if clear {
            pixels.fill(0);
        }
        self.passes.push(clear);
        self.bound = Some(SoftTarget {
            width: target.width,
            height: target.height,
            pixels,
        });
        Ok(())
    }

    fn end_pass(&mut self, target: &mut SoftTarget) -> Result<(), Error> {
        if let Some(bound) = self.bound.take() {
            target.pixels = bound.pixels;
        }
        Ok(())
    }

    fn read_pixels(&mut self, target: SoftTarget) -> Result<Vec<u8>, Error> {
        if self.fail_read_back {
            return Err(Error::Readback("device lost".into()));
        }
        let mut pixels = target.pixels;
        if self.inverted_y {
            flip_rows(&mut pixels, target.width, target.height);
        }
        Ok(pixels)
    }

    fn inverted_y(&self) -> bool {
        self.inverted_y
    }

    fn create_texture(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        mip_levels: u32,
    ) -> Result<SoftTexture, Error> {
        Ok(SoftTexture {
            width,
            height,
            pixels: pixels.to_vec(),
            mip_levels,
        })
    }

    fn draw_sub_image(&mut self, texture: &SoftTexture, src: Rect, dst: Rect) {
        self.draws.push((src, dst));
        if let Some(target) = &mut self.bound {
            target.fill(dst, |dx, dy| {
                let x = (src.x as u32 + dx).min(texture.width - 1);
                let y = (src.y as u32 + dy).min(texture.height - 1);
                texture.pixel(x, y)
            });
        }
    }
}

pub struct SoftFont {
    pub texture: Rc<SoftTexture>,
    pub origin: Vec2,
    pub size: Vec2,
    pub on_atlas: bool,
}

/// Bakes every font into a solid sheet four glyphs wide and one glyph tall.
pub struct SoftFonts;

impl SoftFonts {
    pub const COLOR: [u8; 4] = [0, 255, 0, 255];
    pub const MISSING: &'static str = "missing.ttf";
    /// Bakes fine but reports a NaN footprint.
    pub const BROKEN: &'static str = "broken.ttf";
}

impl FontBaker<SoftBackend> for SoftFonts {
    type Font = SoftFont;

    fn bake(&mut self, _: &mut SoftBackend, source: &FontSource) -> Result<SoftFont, Error> {
        if source.path == Path::new(Self::MISSING) {
            return Err(Error::Font {
                path: source.path.display().to_string(),
                reason: "no such file".into(),
            });
        }
        let size = source.size;
        Ok(SoftFont {
            texture: Rc::new(SoftTexture::solid(size * 4, size * 2, Self::COLOR)),
            origin: Vec2::ZERO,
            size: if source.path == Path::new(Self::BROKEN) {
                Vec2::NAN
            } else {
                glam::vec2((size * 4) as f32, size as f32)
            },
            on_atlas: false,
        })
    }

    fn footprint(&self, font: &SoftFont) -> Vec2 {
        font.size
    }

    fn blit(&mut self, backend: &mut SoftBackend, font: &SoftFont, dst: Rect) {
        let src = Rect::from_position_size(font.origin, font.size);
        backend.draw_sub_image(&font.texture, src, dst);
    }

    fn rebake(&mut self, font: &SoftFont, atlas: &Rc<SoftTexture>, origin: Vec2) -> SoftFont {
        SoftFont {
            texture: atlas.clone(),
            origin,
            size: font.size,
            on_atlas: true,
        }
    }
}
