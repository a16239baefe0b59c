//! Free-area rectangle packing.
//!
//! Every placed rect reserves one extra unit to its right and below it, so
//! neighbouring assets never bleed into each other when sampled.

use glam::Vec2;

/// Free space thinner than this next to a placed rect is dropped instead of
/// being kept as its own free area.
pub const SLACK: f32 = 5.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_position_size(position: Vec2, size: Vec2) -> Self {
        Self::new(position.x, position.y, size.x, size.y)
    }

    pub fn position(&self) -> Vec2 {
        glam::vec2(self.x, self.y)
    }

    pub fn size(&self) -> Vec2 {
        glam::vec2(self.width, self.height)
    }
}

/// Index of a rect request inside a [`Canvas`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackId(pub(crate) usize);

impl PackId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Unoccupied regions of a canvas during a single packing attempt.
#[derive(Debug, Clone)]
pub struct FreeAreas {
    rects: Vec<Rect>,
}

impl FreeAreas {
    pub fn new(width: f32, height: f32, reserve: usize) -> Self {
        let mut rects = Vec::with_capacity(reserve.max(1));
        rects.push(Rect::new(0.0, 0.0, width, height));
        Self { rects }
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Places a `width` x `height` rect into the first free area that can hold
    /// it plus its padding, returning the top-left corner it was given.
    ///
    /// `None` means the canvas is too small for this rect at its current size.
    pub fn place(&mut self, width: f32, height: f32) -> Option<Vec2> {
        let w = width.ceil();
        let h = height.ceil();
        let index = self
            .rects
            .iter()
            .position(|r| r.width >= w + 1.0 && r.height >= h + 1.0)?;

        let free = &mut self.rects[index];
        let position = free.position();
        let fills_width = w + SLACK >= free.width;
        let fills_height = h + SLACK >= free.height;

        match (fills_width, fills_height) {
            (true, true) => {
                self.rects.remove(index);
            }
            (true, false) => {
                free.y += h + 1.0;
                free.height -= h + 1.0;
            }
            (false, true) => {
                free.x += w + 1.0;
                free.width -= w + 1.0;
            }
            (false, false) => {
                let right = Rect::new(free.x + w + 1.0, free.y, free.width - w - 1.0, h + 1.0);
                free.y += h + 1.0;
                free.height -= h + 1.0;
                self.rects.push(right);
            }
        }
        Some(position)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packing {
    pub width: f32,
    pub height: f32,
    /// Top-left corner of every input rect, in input order.
    pub positions: Vec<Vec2>,
}

fn grow(width: &mut f32, height: &mut f32) {
    if *height > *width {
        *width *= 2.0;
    } else {
        *height *= 2.0;
    }
}

/// Packs `sizes` into the smallest power-of-two canvas this placement policy
/// finds, placing the tallest rects first.
///
/// Sizes must be finite and non-negative.
pub fn pack(sizes: &[Vec2]) -> Packing {
    debug_assert!(sizes
        .iter()
        .all(|s| s.is_finite() && s.x >= 0.0 && s.y >= 0.0));

    let mut order = (0..sizes.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| sizes[b].y.total_cmp(&sizes[a].y));

    let area: f32 = sizes.iter().map(|s| s.x * s.y).sum();
    let mut width = 1.0;
    let mut height = 1.0;
    while width * height < area {
        grow(&mut width, &mut height);
    }

    let mut positions = vec![Vec2::ZERO; sizes.len()];
    'attempt: loop {
        log::debug!("packing area {} into {}x{}", area, width, height);
        let mut free = FreeAreas::new(width, height, sizes.len());
        for &id in &order {
            let size = sizes[id];
            log::trace!("{} - {}x{}", id, size.x, size.y);
            match free.place(size.x, size.y) {
                Some(position) => positions[id] = position,
                None => {
                    grow(&mut width, &mut height);
                    continue 'attempt;
                }
            }
        }
        return Packing {
            width,
            height,
            positions,
        };
    }
}

/// Rect requests addressed by [`PackId`], and their placement once computed.
#[derive(Debug, Clone, Default)]
pub struct Canvas {
    width: f32,
    height: f32,
    rects: Vec<Rect>,
}

impl Canvas {
    pub fn with_capacity(reserve: usize) -> Self {
        Self {
            width: 0.0,
            height: 0.0,
            rects: Vec::with_capacity(reserve),
        }
    }

    pub fn add_rect(&mut self, width: f32, height: f32) -> PackId {
        self.rects.push(Rect::new(0.0, 0.0, width, height));
        PackId(self.rects.len() - 1)
    }

    /// Finds a canvas size and a position for every requested rect.
    pub fn compute(&mut self) {
        let sizes = self.rects.iter().map(Rect::size).collect::<Vec<_>>();
        let packing = pack(&sizes);
        self.width = packing.width;
        self.height = packing.height;
        for (rect, position) in self.rects.iter_mut().zip(packing.positions) {
            rect.x = position.x;
            rect.y = position.y;
        }
    }

    pub fn rect(&self, id: PackId) -> Option<Rect> {
        self.rects.get(id.0).copied()
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn size(&self) -> Vec2 {
        glam::vec2(self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }
}
