use std::path::PathBuf;

use glam::Vec2;

use crate::{pack::PackId, Error};

/// Position of an asset in the order it was reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(pub(crate) usize);

impl AssetId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FontSource {
    pub path: PathBuf,
    /// Pixel height the font is baked at.
    pub size: u32,
    /// Face inside a font collection, 0 for plain font files.
    pub face_index: u32,
}

pub struct ImageAsset<D> {
    pack_id: PackId,
    size: Vec2,
    pub(crate) draw: D,
}

impl<D> ImageAsset<D> {
    pub fn pack_id(&self) -> PackId {
        self.pack_id
    }

    pub fn size(&self) -> Vec2 {
        self.size
    }
}

pub struct FontAsset<T> {
    pack_id: Option<PackId>,
    source: FontSource,
    font: Option<T>,
}

impl<T> FontAsset<T> {
    /// `None` until the font has been baked and its footprint registered.
    pub fn pack_id(&self) -> Option<PackId> {
        self.pack_id
    }

    pub fn source(&self) -> &FontSource {
        &self.source
    }

    pub fn font(&self) -> Option<&T> {
        self.font.as_ref()
    }

    pub(crate) fn set_baked(&mut self, pack_id: PackId, font: T) {
        self.pack_id = Some(pack_id);
        self.font = Some(font);
    }

    pub(crate) fn replace_font(&mut self, font: T) -> Option<T> {
        self.font.replace(font)
    }
}

pub enum Asset<D, T> {
    Image(ImageAsset<D>),
    Font(FontAsset<T>),
}

impl<D, T> Asset<D, T> {
    pub fn pack_id(&self) -> Option<PackId> {
        match self {
            Asset::Image(image) => Some(image.pack_id),
            Asset::Font(font) => font.pack_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Asset::Image(_) => "an image",
            Asset::Font(_) => "a font",
        }
    }
}

/// Append-only list of reserved assets.
pub struct AssetRegistry<D, T> {
    assets: Vec<Asset<D, T>>,
    font_count: usize,
}

impl<D, T> AssetRegistry<D, T> {
    pub fn with_capacity(reserve: usize) -> Self {
        Self {
            assets: Vec::with_capacity(reserve),
            font_count: 0,
        }
    }

    fn push(&mut self, asset: Asset<D, T>) -> AssetId {
        if self.assets.len() == self.assets.capacity() {
            self.assets.reserve_exact(1);
        }
        self.assets.push(asset);
        AssetId(self.assets.len() - 1)
    }

    pub fn push_image(&mut self, pack_id: PackId, size: Vec2, draw: D) -> AssetId {
        self.push(Asset::Image(ImageAsset {
            pack_id,
            size,
            draw,
        }))
    }

    pub fn push_font(&mut self, source: FontSource) -> AssetId {
        self.font_count += 1;
        self.push(Asset::Font(FontAsset {
            pack_id: None,
            source,
            font: None,
        }))
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn font_count(&self) -> usize {
        self.font_count
    }

    pub fn iter(&self) -> impl Iterator<Item = (AssetId, &Asset<D, T>)> {
        self.assets.iter().enumerate().map(|(i, a)| (AssetId(i), a))
    }

    pub fn get(&self, id: AssetId) -> Result<&Asset<D, T>, Error> {
        self.assets.get(id.0).ok_or(Error::UnknownAsset(id.0))
    }

    pub fn get_mut(&mut self, id: AssetId) -> Result<&mut Asset<D, T>, Error> {
        self.assets.get_mut(id.0).ok_or(Error::UnknownAsset(id.0))
    }

    pub fn image(&self, id: AssetId) -> Result<&ImageAsset<D>, Error> {
        match self.get(id)? {
            Asset::Image(image) => Ok(image),
            Asset::Font(_) => Err(Error::WrongKind {
                id: id.0,
                expected: "an image",
            }),
        }
    }

    pub fn font(&self, id: AssetId) -> Result<&FontAsset<T>, Error> {
        match self.get(id)? {
            Asset::Font(font) => Ok(font),
            Asset::Image(_) => Err(Error::WrongKind {
                id: id.0,
                expected: "a font",
            }),
        }
    }

    pub fn font_mut(&mut self, id: AssetId) -> Result<&mut FontAsset<T>, Error> {
        match self.get_mut(id)? {
            Asset::Font(font) => Ok(font),
            Asset::Image(_) => Err(Error::WrongKind {
                id: id.0,
                expected: "a font",
            }),
        }
    }

    /// Ids of every font asset, in reservation order.
    ///
    /// Stops early with a warning if fewer fonts are found than were counted.
    pub fn font_ids(&self) -> Vec<AssetId> {
        let mut ids = Vec::with_capacity(self.font_count);
        let mut cursor = 0;
        while ids.len() < self.font_count {
            match self.assets.get(cursor) {
                Some(Asset::Font(_)) => ids.push(AssetId(cursor)),
                Some(Asset::Image(_)) => {}
                None => {
                    log::warn!(
                        "font count appears wrong: expected {}, found {}",
                        self.font_count,
                        ids.len()
                    );
                    break;
                }
            }
            cursor += 1;
        }
        ids
    }
}
