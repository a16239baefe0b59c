//! Services the atlas build consumes but does not implement itself.

use std::{convert::Infallible, rc::Rc};

use glam::Vec2;

use crate::{pack::Rect, registry::FontSource, Error};

/// Off-screen rendering, read-back and texture upload.
///
/// All coordinates are pixels with the origin at the top-left corner of
/// whatever is being drawn into.
pub trait RenderBackend {
    type Target;
    type Texture;

    /// Creates an RGBA target of `width` x `height` pixels.
    fn create_target(&mut self, width: u32, height: u32) -> Result<Self::Target, Error>;

    /// Routes subsequent draws into `target`, clearing it to transparent first
    /// when `clear` is set.
    fn begin_pass(&mut self, target: &mut Self::Target, clear: bool) -> Result<(), Error>;

    fn end_pass(&mut self, target: &mut Self::Target) -> Result<(), Error>;

    /// Consumes the target and returns its contents as tightly packed RGBA8 rows.
    fn read_pixels(&mut self, target: Self::Target) -> Result<Vec<u8>, Error>;

    /// Whether `read_pixels` returns rows bottom-up.
    fn inverted_y(&self) -> bool;

    /// `pixels` are tightly packed RGBA8 rows with premultiplied alpha.
    fn create_texture(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        mip_levels: u32,
    ) -> Result<Self::Texture, Error>;

    fn draw_sub_image(&mut self, texture: &Self::Texture, src: Rect, dst: Rect);
}

/// Rasterizes fonts into a glyph sheet and moves them onto the atlas.
pub trait FontBaker<B: RenderBackend> {
    type Font;

    /// Rasterizes `source` into a provisional sheet of its own.
    fn bake(&mut self, backend: &mut B, source: &FontSource) -> Result<Self::Font, Error>;

    /// Pixel size of the part of the sheet that holds glyphs.
    fn footprint(&self, font: &Self::Font) -> Vec2;

    /// Draws the used part of the provisional sheet at `dst`.
    fn blit(&mut self, backend: &mut B, font: &Self::Font, dst: Rect);

    /// Returns a copy of `font` whose glyphs are read from `atlas`, with the
    /// sheet's top-left corner at `origin`.
    fn rebake(&mut self, font: &Self::Font, atlas: &Rc<B::Texture>, origin: Vec2) -> Self::Font;
}

/// Stand-in baker for builders that only hold images.
pub enum NoFonts {}

impl<B: RenderBackend> FontBaker<B> for NoFonts {
    type Font = Infallible;

    fn bake(&mut self, _: &mut B, _: &FontSource) -> Result<Self::Font, Error> {
        match *self {}
    }

    fn footprint(&self, font: &Self::Font) -> Vec2 {
        match *font {}
    }

    fn blit(&mut self, _: &mut B, font: &Self::Font, _: Rect) {
        match *font {}
    }

    fn rebake(&mut self, font: &Self::Font, _: &Rc<B::Texture>, _: Vec2) -> Self::Font {
        match *font {}
    }
}
