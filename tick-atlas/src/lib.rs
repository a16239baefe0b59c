mod pack;
pub use pack::*;
pub mod backend;
pub mod build;
pub mod font;
pub mod options;
pub mod registry;
pub mod render;

#[cfg(test)]
mod testing;

pub use backend::{FontBaker, NoFonts, RenderBackend};
pub use build::{Atlas, AtlasBuilder, DrawFn, Phase};
pub use options::BuildOptions;
pub use registry::{AssetId, FontSource};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot reserve on a finalized context")]
    Finalized,
    #[error("context has not been finalized")]
    NotFinalized,
    #[error("atlas is not built yet")]
    NotReady,
    #[error("no asset with id {0}")]
    UnknownAsset(usize),
    #[error("asset {id} is not {expected}")]
    WrongKind { id: usize, expected: &'static str },
    #[error("invalid size {width}x{height}")]
    InvalidSize { width: f32, height: f32 },
    #[error("no font baker was configured")]
    FontsUnsupported,
    #[error("failed to bake font {path}: {reason}")]
    Font { path: String, reason: String },
    #[error("failed to read back render target: {0}")]
    Readback(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
