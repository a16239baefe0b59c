//! Tick-driven atlas construction.
//!
//! An [`AtlasBuilder`] moves through its phases one bounded [`tick`] at a
//! time, so the caller can keep presenting frames while the atlas renders:
//!
//! 1. reserve images and fonts,
//! 2. [`finalize`] to bake fonts and pack every rect,
//! 3. [`tick`] until it returns `false`,
//! 4. draw assets out of the finished atlas.
//!
//! [`tick`]: AtlasBuilder::tick
//! [`finalize`]: AtlasBuilder::finalize

use std::{path::PathBuf, rc::Rc};

use glam::Vec2;

use crate::{
    backend::{FontBaker, NoFonts, RenderBackend},
    options::BuildOptions,
    pack::{Canvas, Rect},
    registry::{Asset, AssetId, AssetRegistry, FontSource},
    Error,
};

/// Renders an image asset at the given top-left corner of the bound target.
pub type DrawFn<B> = Box<dyn FnMut(&mut B, AssetId, Vec2)>;

pub struct Atlas<T> {
    texture: Rc<T>,
    width: u32,
    height: u32,
}

impl<T> Atlas<T> {
    pub fn texture(&self) -> &Rc<T> {
        &self.texture
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Vec2 {
        glam::vec2(self.width as _, self.height as _)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Reserving,
    Rendering,
    Capturing,
    MappingFonts,
    Done,
}

pub struct AtlasBuilder<B: RenderBackend, F: FontBaker<B> = NoFonts> {
    canvas: Canvas,
    registry: AssetRegistry<DrawFn<B>, F::Font>,
    fonts: Option<F>,
    /// `None` while reserving, then the index of the next asset to render.
    /// `len` is the capture step and `len + 1` the font remap.
    cursor: Option<usize>,
    step: usize,
    mipmap_levels: u32,
    dump_path: Option<PathBuf>,
    target: Option<B::Target>,
    atlas: Option<Atlas<B::Texture>>,
}

impl<B: RenderBackend> AtlasBuilder<B, NoFonts> {
    pub fn new(options: BuildOptions) -> Self {
        Self::with_parts(options, None)
    }
}

impl<B: RenderBackend, F: FontBaker<B>> AtlasBuilder<B, F> {
    pub fn with_font_baker(options: BuildOptions, baker: F) -> Self {
        Self::with_parts(options, Some(baker))
    }

    fn with_parts(options: BuildOptions, fonts: Option<F>) -> Self {
        Self {
            canvas: Canvas::with_capacity(options.reserve),
            registry: AssetRegistry::with_capacity(options.reserve),
            fonts,
            cursor: None,
            step: options.step.max(1),
            mipmap_levels: options.mipmap_levels.max(1),
            dump_path: options.dump_path,
            target: None,
            atlas: None,
        }
    }

    /// Reserves room for an image that `draw` renders into the atlas.
    ///
    /// Anything `draw` needs besides the backend, id and position should be
    /// captured by the closure.
    pub fn reserve_image(
        &mut self,
        size: Vec2,
        draw: impl FnMut(&mut B, AssetId, Vec2) + 'static,
    ) -> Result<AssetId, Error> {
        if self.cursor.is_some() {
            log::error!("Cannot reserve on finalized context");
            return Err(Error::Finalized);
        }
        if let Err(e) = check_size(size) {
            log::error!("Cannot reserve image: {}", e);
            return Err(e);
        }
        let pack_id = self.canvas.add_rect(size.x, size.y);
        Ok(self.registry.push_image(pack_id, size, Box::new(draw)))
    }

    /// Reserves room for a font baked at `size` pixels.
    ///
    /// Its rect is only known once the font is baked during [`finalize`].
    ///
    /// [`finalize`]: AtlasBuilder::finalize
    pub fn reserve_font(
        &mut self,
        path: impl Into<PathBuf>,
        size: u32,
        face_index: u32,
    ) -> Result<AssetId, Error> {
        if self.cursor.is_some() {
            log::error!("Cannot reserve on finalized context");
            return Err(Error::Finalized);
        }
        if self.fonts.is_none() {
            log::error!("Cannot reserve a font without a font baker");
            return Err(Error::FontsUnsupported);
        }
        Ok(self.registry.push_font(FontSource {
            path: path.into(),
            size,
            face_index,
        }))
    }

    /// Bakes every reserved font and packs all assets. Nothing is rendered yet.
    ///
    /// If a font fails to bake the builder stays in the reserving phase.
    pub fn finalize(&mut self, backend: &mut B) -> Result<(), Error> {
        if self.cursor.is_some() {
            log::error!("Context is already finalized");
            return Err(Error::Finalized);
        }

        let font_ids = self.registry.font_ids();
        if !font_ids.is_empty() {
            let baker = self.fonts.as_mut().ok_or(Error::FontsUnsupported)?;
            let mut baked = Vec::with_capacity(font_ids.len());
            for id in font_ids {
                let source = self.registry.font(id)?.source().clone();
                let font = baker.bake(backend, &source)?;
                let footprint = baker.footprint(&font);
                if let Err(e) = check_size(footprint) {
                    log::error!("font {} baked to {}", source.path.display(), e);
                    return Err(e);
                }
                log::debug!(
                    "baked {} at {}px into {}x{}",
                    source.path.display(),
                    source.size,
                    footprint.x,
                    footprint.y
                );
                baked.push((id, footprint, font));
            }
            for (id, footprint, font) in baked {
                let pack_id = self.canvas.add_rect(footprint.x, footprint.y);
                self.registry.font_mut(id)?.set_baked(pack_id, font);
            }
        }

        self.canvas.compute();
        log::info!(
            "packed {} assets into {}x{}",
            self.registry.len(),
            self.canvas.width(),
            self.canvas.height()
        );
        self.cursor = Some(0);
        Ok(())
    }

    /// Does one bounded piece of work. Returns `Ok(false)` once the atlas is
    /// complete, and keeps returning it afterwards.
    ///
    /// Ticking before [`finalize`] does nothing and returns `Ok(true)`.
    ///
    /// An `Err` from the backend is terminal: the target may already be
    /// consumed or half drawn, so drop the builder and start over.
    ///
    /// [`finalize`]: AtlasBuilder::finalize
    pub fn tick(&mut self, backend: &mut B) -> Result<bool, Error> {
        let cursor = match self.cursor {
            Some(cursor) => cursor,
            None => {
                log::error!("Called tick on non finalized context");
                return Ok(true);
            }
        };
        let len = self.registry.len();
        if cursor > len + 1 {
            return Ok(false);
        }
        if len == 0 {
            log::info!("nothing reserved, atlas is empty");
            self.cursor = Some(len + 2);
            return Ok(false);
        }

        if cursor < len {
            let end = (cursor + self.step).min(len);
            self.render(backend, cursor..end)?;
            self.cursor = Some(end);
            Ok(true)
        } else if cursor == len {
            self.capture(backend)?;
            self.cursor = Some(len + 1);
            Ok(true)
        } else {
            self.map_fonts();
            self.cursor = Some(len + 2);
            log::info!("atlas complete");
            Ok(false)
        }
    }

    /// Linear progress in `0.0..=1.0`, reaching 1.0 on the tick that completes
    /// the atlas.
    pub fn progress(&self) -> f32 {
        match self.cursor {
            Some(cursor) => (cursor as f32 / (self.registry.len() + 2) as f32).min(1.0),
            None => {
                log::error!("Called progress on non finalized context");
                0.0
            }
        }
    }

    pub fn phase(&self) -> Phase {
        let len = self.registry.len();
        match self.cursor {
            None => Phase::Reserving,
            Some(c) if c > len + 1 => Phase::Done,
            Some(c) if c < len => Phase::Rendering,
            Some(c) if c == len => Phase::Capturing,
            Some(_) => Phase::MappingFonts,
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase() == Phase::Done
    }

    fn render(&mut self, backend: &mut B, ids: std::ops::Range<usize>) -> Result<(), Error> {
        let clear = self.target.is_none();
        let mut target = match self.target.take() {
            Some(target) => target,
            None => {
                let (width, height) = (self.canvas.width() as u32, self.canvas.height() as u32);
                log::info!("rendering {} assets into {}x{}", self.registry.len(), width, height);
                backend.create_target(width, height)?
            }
        };
        let result = self.render_into(backend, &mut target, clear, ids);
        self.target = Some(target);
        result
    }

    fn render_into(
        &mut self,
        backend: &mut B,
        target: &mut B::Target,
        clear: bool,
        ids: std::ops::Range<usize>,
    ) -> Result<(), Error> {
        backend.begin_pass(target, clear)?;
        for index in ids {
            let id = AssetId(index);
            match self.registry.get_mut(id)? {
                Asset::Image(image) => {
                    let rect = self
                        .canvas
                        .rect(image.pack_id())
                        .ok_or(Error::UnknownAsset(index))?;
                    (image.draw)(backend, id, rect.position());
                }
                Asset::Font(font) => {
                    let (pack_id, baked) = match (font.pack_id(), font.font()) {
                        (Some(pack_id), Some(baked)) => (pack_id, baked),
                        _ => {
                            log::warn!("font {} was never baked, skipping", index);
                            continue;
                        }
                    };
                    let rect = self.canvas.rect(pack_id).ok_or(Error::UnknownAsset(index))?;
                    if let Some(baker) = self.fonts.as_mut() {
                        baker.blit(backend, baked, rect);
                    }
                }
            }
        }
        backend.end_pass(target)
    }

    fn capture(&mut self, backend: &mut B) -> Result<(), Error> {
        let width = self.canvas.width() as u32;
        let height = self.canvas.height() as u32;
        let target = self.target.take().ok_or(Error::NotReady)?;
        let mut pixels = backend.read_pixels(target)?;
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(Error::Readback(format!(
                "expected {} bytes, got {}",
                expected,
                pixels.len()
            )));
        }
        if backend.inverted_y() {
            flip_rows(&mut pixels, width, height);
        }
        if let Some(path) = &self.dump_path {
            if let Err(e) =
                image::save_buffer(path, &pixels, width, height, image::ColorType::Rgba8)
            {
                log::warn!("failed to dump atlas to {}: {}", path.display(), e);
            }
        }

        let texture = backend.create_texture(&pixels, width, height, self.mipmap_levels)?;
        self.atlas = Some(Atlas {
            texture: Rc::new(texture),
            width,
            height,
        });
        Ok(())
    }

    fn map_fonts(&mut self) {
        let (atlas, baker) = match (&self.atlas, self.fonts.as_mut()) {
            (Some(atlas), Some(baker)) => (atlas.texture.clone(), baker),
            _ => return,
        };
        for id in self.registry.font_ids() {
            let font = match self.registry.font_mut(id) {
                Ok(font) => font,
                Err(_) => continue,
            };
            let (pack_id, baked) = match (font.pack_id(), font.font()) {
                (Some(pack_id), Some(baked)) => (pack_id, baked),
                _ => continue,
            };
            let origin = match self.canvas.rect(pack_id) {
                Some(rect) => rect.position(),
                None => continue,
            };
            let rebaked = baker.rebake(baked, &atlas, origin);
            font.replace_font(rebaked);
        }
    }

    /// The atlas texture and the source rect of an image asset inside it.
    pub fn get_asset(&self, id: AssetId) -> Result<(&Rc<B::Texture>, Rect), Error> {
        self.lookup(id).map_err(|e| {
            log::error!("get_asset({}): {}", id.0, e);
            e
        })
    }

    fn lookup(&self, id: AssetId) -> Result<(&Rc<B::Texture>, Rect), Error> {
        if self.cursor.is_none() {
            return Err(Error::NotFinalized);
        }
        let image = self.registry.image(id)?;
        let atlas = self.atlas.as_ref().ok_or(Error::NotReady)?;
        let rect = self
            .canvas
            .rect(image.pack_id())
            .ok_or(Error::UnknownAsset(id.0))?;
        Ok((&atlas.texture, rect))
    }

    /// Draws an image asset at its original size with its top-left corner at
    /// `position`.
    pub fn draw(&self, backend: &mut B, id: AssetId, position: Vec2) -> Result<(), Error> {
        let (texture, src) = self.get_asset(id)?;
        backend.draw_sub_image(texture, src, Rect::from_position_size(position, src.size()));
        Ok(())
    }

    pub fn draw_scaled(&self, backend: &mut B, id: AssetId, dst: Rect) -> Result<(), Error> {
        let (texture, src) = self.get_asset(id)?;
        backend.draw_sub_image(texture, src, dst);
        Ok(())
    }

    /// The baked font for `id`. Until the atlas is complete this reads from
    /// the font's own glyph sheet.
    pub fn get_font(&self, id: AssetId) -> Result<&F::Font, Error> {
        self.registry
            .font(id)
            .and_then(|font| font.font().ok_or(Error::NotFinalized))
            .map_err(|e| {
                log::error!("get_font({}): {}", id.0, e);
                e
            })
    }

    pub fn atlas(&self) -> Option<&Atlas<B::Texture>> {
        self.atlas.as_ref()
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn mipmap_levels(&self) -> u32 {
        self.mipmap_levels
    }
}

/// Sizes must be finite and non-negative to be packed.
fn check_size(size: Vec2) -> Result<(), Error> {
    if size.is_finite() && size.x >= 0.0 && size.y >= 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidSize {
            width: size.x,
            height: size.y,
        })
    }
}

/// Reverses the row order of a tightly packed RGBA8 image.
pub fn flip_rows(pixels: &mut [u8], width: u32, height: u32) {
    let stride = width as usize * 4;
    let height = height as usize;
    for y in 0..height / 2 {
        let (top, bottom) = pixels.split_at_mut((height - 1 - y) * stride);
        top[y * stride..(y + 1) * stride].swap_with_slice(&mut bottom[..stride]);
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::testing::{SoftBackend, SoftFonts};

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn fill(color: [u8; 4]) -> impl FnMut(&mut SoftBackend, AssetId, Vec2) {
        move |backend: &mut SoftBackend, _, position: Vec2| {
            backend.fill(Rect::from_position_size(position, glam::vec2(4.0, 4.0)), color)
        }
    }

    fn run(
        builder: &mut AtlasBuilder<SoftBackend, impl FontBaker<SoftBackend>>,
        backend: &mut SoftBackend,
    ) -> usize {
        let mut ticks = 0;
        while builder.tick(backend).unwrap() {
            ticks += 1;
            assert!(ticks < 1000);
        }
        ticks + 1
    }

    fn overlaps(a: Rect, b: Rect) -> bool {
        a.x < b.x + b.width + 1.0
            && b.x < a.x + a.width + 1.0
            && a.y < b.y + b.height + 1.0
            && b.y < a.y + a.height + 1.0
    }

    #[test]
    fn three_assets_take_five_ticks() {
        init_logger();
        let mut backend = SoftBackend::default();
        let mut builder = AtlasBuilder::new(BuildOptions::default());
        let ids = [
            builder.reserve_image(glam::vec2(32.0, 32.0), fill(RED)).unwrap(),
            builder.reserve_image(glam::vec2(64.0, 32.0), fill(RED)).unwrap(),
            builder.reserve_image(glam::vec2(32.0, 64.0), fill(RED)).unwrap(),
        ];
        builder.finalize(&mut backend).unwrap();
        assert!(builder.canvas().width() <= 128.0 && builder.canvas().height() <= 128.0);

        let mut last = builder.progress();
        assert_eq!(last, 0.0);
        let mut ticks = 0;
        loop {
            ticks += 1;
            let more = builder.tick(&mut backend).unwrap();
            let progress = builder.progress();
            assert!(progress >= last);
            last = progress;
            if !more {
                assert_eq!(progress, 1.0);
                break;
            }
            assert!(progress < 1.0);
        }
        assert_eq!(ticks, 5);
        assert!(builder.is_done());

        let rects = ids.map(|id| builder.get_asset(id).unwrap().1);
        for (i, a) in rects.iter().enumerate() {
            for b in &rects[i + 1..] {
                assert!(!overlaps(*a, *b));
            }
        }
    }

    #[test]
    fn empty_build_completes_on_first_tick() {
        let mut backend = SoftBackend::default();
        let mut builder = AtlasBuilder::new(BuildOptions::default());
        builder.finalize(&mut backend).unwrap();
        assert!(!builder.tick(&mut backend).unwrap());
        assert!(!builder.tick(&mut backend).unwrap());
        assert_eq!(builder.progress(), 1.0);
        assert!(builder.atlas().is_none());
        assert!(backend.targets.is_empty());
        assert_eq!(builder.canvas().size(), glam::vec2(1.0, 1.0));
    }

    #[test]
    fn reserving_after_finalize_changes_nothing() {
        let mut backend = SoftBackend::default();
        let mut builder = AtlasBuilder::new(BuildOptions::default());
        builder.reserve_image(glam::vec2(8.0, 8.0), fill(RED)).unwrap();
        builder.finalize(&mut backend).unwrap();

        assert!(matches!(
            builder.reserve_image(glam::vec2(8.0, 8.0), fill(RED)),
            Err(Error::Finalized)
        ));
        assert_eq!(builder.len(), 1);
        assert_eq!(builder.canvas().len(), 1);
        assert!(matches!(builder.finalize(&mut backend), Err(Error::Finalized)));
    }

    #[test]
    fn font_reservation_after_finalize_changes_nothing() {
        let mut backend = SoftBackend::default();
        let mut builder = AtlasBuilder::with_font_baker(BuildOptions::default(), SoftFonts);
        builder.reserve_font("mono.ttf", 8, 0).unwrap();
        builder.finalize(&mut backend).unwrap();

        assert!(matches!(
            builder.reserve_font("other.ttf", 8, 0),
            Err(Error::Finalized)
        ));
        assert_eq!(builder.len(), 1);
        assert_eq!(builder.canvas().len(), 1);
    }

    #[test]
    fn rejects_sizes_that_cannot_be_packed() {
        let mut backend = SoftBackend::default();
        let mut builder = AtlasBuilder::new(BuildOptions::default());
        for size in [
            glam::vec2(f32::NAN, 8.0),
            glam::vec2(8.0, f32::INFINITY),
            glam::vec2(-10.0, -10.0),
            glam::vec2(4.0, -1.0),
        ] {
            assert!(matches!(
                builder.reserve_image(size, fill(RED)),
                Err(Error::InvalidSize { .. })
            ));
        }
        assert!(builder.is_empty());
        assert!(builder.canvas().is_empty());

        let id = builder.reserve_image(glam::vec2(8.0, 8.0), fill(RED)).unwrap();
        builder.finalize(&mut backend).unwrap();
        assert_eq!(run(&mut builder, &mut backend), 3);
        assert_eq!(builder.get_asset(id).unwrap().1.size(), glam::vec2(8.0, 8.0));
    }

    #[test]
    fn failed_capture_is_terminal() {
        let mut backend = SoftBackend::default();
        let mut builder = AtlasBuilder::new(BuildOptions::default());
        builder.reserve_image(glam::vec2(8.0, 8.0), fill(RED)).unwrap();
        builder.finalize(&mut backend).unwrap();
        assert!(builder.tick(&mut backend).unwrap());

        backend.fail_read_back = true;
        assert!(matches!(builder.tick(&mut backend), Err(Error::Readback(_))));
        backend.fail_read_back = false;
        assert!(matches!(builder.tick(&mut backend), Err(Error::NotReady)));
        assert_eq!(builder.phase(), Phase::Capturing);
        assert!(builder.atlas().is_none());
    }

    #[test]
    fn rejects_fonts_with_unpackable_footprints() {
        let mut backend = SoftBackend::default();
        let mut builder = AtlasBuilder::with_font_baker(BuildOptions::default(), SoftFonts);
        builder.reserve_font("mono.ttf", 8, 0).unwrap();
        builder.reserve_font(SoftFonts::BROKEN, 8, 0).unwrap();

        assert!(matches!(
            builder.finalize(&mut backend),
            Err(Error::InvalidSize { .. })
        ));
        assert_eq!(builder.phase(), Phase::Reserving);
        assert_eq!(builder.canvas().len(), 0);
    }

    #[test]
    fn tick_before_finalize_is_not_progress() {
        let mut backend = SoftBackend::default();
        let mut builder = AtlasBuilder::new(BuildOptions::default());
        builder.reserve_image(glam::vec2(8.0, 8.0), fill(RED)).unwrap();
        assert!(builder.tick(&mut backend).unwrap());
        assert_eq!(builder.progress(), 0.0);
        assert_eq!(builder.phase(), Phase::Reserving);
        assert!(backend.targets.is_empty());
        assert!(matches!(
            builder.get_asset(AssetId(0)),
            Err(Error::NotFinalized)
        ));
    }

    #[test]
    fn renders_step_assets_per_tick() {
        let mut backend = SoftBackend::default();
        let mut builder = AtlasBuilder::new(BuildOptions {
            step: 2,
            ..Default::default()
        });
        for _ in 0..5 {
            builder.reserve_image(glam::vec2(4.0, 4.0), fill(RED)).unwrap();
        }
        builder.finalize(&mut backend).unwrap();

        assert!(builder.tick(&mut backend).unwrap());
        assert_eq!(builder.phase(), Phase::Rendering);
        assert!(builder.tick(&mut backend).unwrap());
        assert!(builder.tick(&mut backend).unwrap());
        assert_eq!(builder.phase(), Phase::Capturing);
        assert!(builder.tick(&mut backend).unwrap());
        assert_eq!(builder.phase(), Phase::MappingFonts);
        assert!(!builder.tick(&mut backend).unwrap());

        assert_eq!(backend.targets.len(), 1);
        assert_eq!(backend.passes, [true, false, false]);
    }

    #[test]
    fn step_and_mip_levels_are_at_least_one() {
        let builder = AtlasBuilder::<SoftBackend>::new(BuildOptions {
            step: 0,
            mipmap_levels: 0,
            ..Default::default()
        });
        assert_eq!(builder.step(), 1);
        assert_eq!(builder.mipmap_levels(), 1);
    }

    #[test]
    fn draw_callbacks_get_their_placed_position() {
        let mut backend = SoftBackend::default();
        let mut builder = AtlasBuilder::new(BuildOptions {
            step: 4,
            ..Default::default()
        });
        let seen = Rc::new(RefCell::new(Vec::new()));
        for size in [glam::vec2(10.0, 20.0), glam::vec2(30.0, 5.0)] {
            let seen = seen.clone();
            builder
                .reserve_image(size, move |_: &mut SoftBackend, id, position| {
                    seen.borrow_mut().push((id, position))
                })
                .unwrap();
        }
        builder.finalize(&mut backend).unwrap();
        run(&mut builder, &mut backend);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        for &(id, position) in seen.iter() {
            assert_eq!(builder.get_asset(id).unwrap().1.position(), position);
        }
    }

    fn captured_colors(inverted_y: bool) {
        let mut backend = SoftBackend::with_inverted_y(inverted_y);
        let mut builder = AtlasBuilder::new(BuildOptions {
            mipmap_levels: 3,
            ..Default::default()
        });
        let tall = builder.reserve_image(glam::vec2(4.0, 20.0), fill(RED)).unwrap();
        let short = builder.reserve_image(glam::vec2(4.0, 4.0), fill(BLUE)).unwrap();
        builder.finalize(&mut backend).unwrap();
        run(&mut builder, &mut backend);

        let atlas = builder.atlas().unwrap();
        assert_eq!(atlas.texture().mip_levels, 3);
        let (texture, rect) = builder.get_asset(tall).unwrap();
        assert_eq!(texture.pixel(rect.x as u32, rect.y as u32), RED);
        let (texture, rect) = builder.get_asset(short).unwrap();
        assert_eq!(texture.pixel(rect.x as u32, rect.y as u32), BLUE);
    }

    #[test]
    fn capture_keeps_rows_top_down() {
        captured_colors(false);
    }

    #[test]
    fn capture_flips_inverted_targets() {
        captured_colors(true);
    }

    #[test]
    fn reserved_size_round_trips() {
        let mut backend = SoftBackend::default();
        let mut builder = AtlasBuilder::new(BuildOptions::default());
        let sizes = [
            glam::vec2(17.5, 3.0),
            glam::vec2(1.0, 90.0),
            glam::vec2(64.0, 64.0),
            glam::vec2(0.0, 0.0),
        ];
        let ids = sizes.map(|size| {
            builder
                .reserve_image(size, |_: &mut SoftBackend, _, _| {})
                .unwrap()
        });
        builder.finalize(&mut backend).unwrap();
        run(&mut builder, &mut backend);

        let atlas = builder.atlas().unwrap().size();
        for (id, size) in ids.into_iter().zip(sizes) {
            let (_, rect) = builder.get_asset(id).unwrap();
            assert!(rect.width >= size.x && rect.height >= size.y);
            assert!(rect.x >= 0.0 && rect.x < atlas.x);
            assert!(rect.y >= 0.0 && rect.y < atlas.y);
        }
    }

    #[test]
    fn draws_from_the_finished_atlas() {
        let mut backend = SoftBackend::default();
        let mut builder = AtlasBuilder::new(BuildOptions::default());
        let id = builder.reserve_image(glam::vec2(6.0, 6.0), fill(RED)).unwrap();
        builder.finalize(&mut backend).unwrap();
        assert!(matches!(
            builder.draw(&mut backend, id, Vec2::ZERO),
            Err(Error::NotReady)
        ));
        run(&mut builder, &mut backend);

        backend.draws.clear();
        builder.draw(&mut backend, id, glam::vec2(100.0, 50.0)).unwrap();
        builder
            .draw_scaled(&mut backend, id, Rect::new(0.0, 0.0, 12.0, 3.0))
            .unwrap();
        let src = builder.get_asset(id).unwrap().1;
        assert_eq!(
            backend.draws,
            [
                (src, Rect::new(100.0, 50.0, 6.0, 6.0)),
                (src, Rect::new(0.0, 0.0, 12.0, 3.0)),
            ]
        );
    }

    #[test]
    fn dumps_the_captured_atlas() {
        let path = std::env::temp_dir().join("tick-atlas-dump-test.png");
        let _ = std::fs::remove_file(&path);
        let mut backend = SoftBackend::default();
        let mut builder = AtlasBuilder::new(BuildOptions {
            dump_path: Some(path.clone()),
            ..Default::default()
        });
        builder.reserve_image(glam::vec2(20.0, 20.0), fill(BLUE)).unwrap();
        builder.finalize(&mut backend).unwrap();
        run(&mut builder, &mut backend);

        let dumped = image::open(&path).unwrap();
        let atlas = builder.atlas().unwrap();
        assert_eq!(dumped.width(), atlas.width());
        assert_eq!(dumped.height(), atlas.height());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn fonts_need_a_baker() {
        let mut builder = AtlasBuilder::<SoftBackend>::new(BuildOptions::default());
        assert!(matches!(
            builder.reserve_font("mono.ttf", 16, 0),
            Err(Error::FontsUnsupported)
        ));
        assert!(builder.is_empty());
    }

    #[test]
    fn fonts_are_baked_packed_and_remapped() {
        init_logger();
        let mut backend = SoftBackend::default();
        let mut builder = AtlasBuilder::with_font_baker(BuildOptions::default(), SoftFonts);
        let image = builder.reserve_image(glam::vec2(8.0, 8.0), fill(RED)).unwrap();
        let font = builder.reserve_font("mono.ttf", 8, 0).unwrap();
        assert_eq!(builder.canvas().len(), 1);

        builder.finalize(&mut backend).unwrap();
        assert_eq!(builder.canvas().len(), 2);
        let provisional = builder.get_font(font).unwrap();
        assert!(!provisional.on_atlas);
        assert_eq!(provisional.texture.width, 32);

        assert_eq!(run(&mut builder, &mut backend), 4);

        let baked = builder.get_font(font).unwrap();
        assert!(baked.on_atlas);
        let atlas = builder.atlas().unwrap();
        assert!(Rc::ptr_eq(&baked.texture, atlas.texture()));
        let rect = builder.canvas().rects()[1];
        assert_eq!(baked.origin, rect.position());
        assert_eq!(rect.size(), glam::vec2(32.0, 8.0));
        assert_eq!(
            atlas.texture().pixel(rect.x as u32, rect.y as u32),
            SoftFonts::COLOR
        );

        assert!(matches!(
            builder.get_asset(font),
            Err(Error::WrongKind { .. })
        ));
        assert!(matches!(
            builder.get_font(image),
            Err(Error::WrongKind { .. })
        ));
    }

    #[test]
    fn failed_font_bake_keeps_reserving() {
        let mut backend = SoftBackend::default();
        let mut builder = AtlasBuilder::with_font_baker(BuildOptions::default(), SoftFonts);
        builder.reserve_font("mono.ttf", 8, 0).unwrap();
        builder.reserve_font(SoftFonts::MISSING, 8, 0).unwrap();

        assert!(matches!(builder.finalize(&mut backend), Err(Error::Font { .. })));
        assert_eq!(builder.phase(), Phase::Reserving);
        assert_eq!(builder.canvas().len(), 0);
        builder.reserve_font("other.ttf", 8, 0).unwrap();
    }

    #[test]
    fn flip_rows_reverses_rows() {
        let mut pixels = (0..3u8).flat_map(|row| [row; 8]).collect::<Vec<_>>();
        flip_rows(&mut pixels, 2, 3);
        let rows = pixels.chunks(8).map(|r| r[0]).collect::<Vec<_>>();
        assert_eq!(rows, [2, 1, 0]);
    }
}
