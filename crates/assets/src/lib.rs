//! Source images and frame descriptors: the frame table the tiling surfaces read from.
//!
//! A texture key names one source image. Each image carries any number of
//! named frames (atlas cells); every key also has a base frame covering the
//! whole image. Frames are handed out as `Arc<Frame>` so callers can compare
//! texture references by identity.
//!
//! # Layout
//! Atlases use the TexturePacker JSON format (hash or array flavour) next to
//! a PNG page.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tiny_skia::{IntRect, Pixmap};

/// Errors from asset operations.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("PNG decode error: {0}")]
    Png(String),
    #[error("texture not found: {0}")]
    NotFound(String),
    #[error("frame {frame:?} not found in texture {key:?}")]
    FrameNotFound { key: String, frame: String },
    #[error("malformed frame {frame:?}: {reason}")]
    MalformedFrame { frame: String, reason: String },
    #[error("image {0:?} has already finished loading")]
    AlreadyLoaded(String),
}

/// Integer rectangle in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl PixelRect {
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    fn to_int_rect(self) -> Option<IntRect> {
        IntRect::from_xywh(i32::try_from(self.x).ok()?, i32::try_from(self.y).ok()?, self.w, self.h)
    }
}

/// Integer size in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelSize {
    pub w: u32,
    pub h: u32,
}

/// A source image whose pixels may arrive after it was registered.
///
/// The pixel slot is filled at most once; until then `has_loaded` is false
/// and nothing can be synthesized from the image.
#[derive(Debug)]
pub struct SourceImage {
    key: String,
    width: u32,
    height: u32,
    /// Texture slot the image occupies in a multi-texture batch.
    index: u32,
    pixels: OnceLock<Pixmap>,
}

impl SourceImage {
    /// Register an image whose pixels are still in flight.
    pub fn pending(key: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            key: key.into(),
            width,
            height,
            index: 0,
            pixels: OnceLock::new(),
        }
    }

    /// Wrap already decoded pixels.
    pub fn loaded(key: impl Into<String>, pixmap: Pixmap) -> Self {
        let image = Self::pending(key, pixmap.width(), pixmap.height());
        let _ = image.pixels.set(pixmap);
        image
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    /// Supply the pixels of a pending image.
    pub fn complete(&self, pixmap: Pixmap) -> Result<(), AssetError> {
        self.pixels
            .set(pixmap)
            .map_err(|_| AssetError::AlreadyLoaded(self.key.clone()))?;
        tracing::debug!(key = %self.key, "source image loaded");
        Ok(())
    }

    pub fn has_loaded(&self) -> bool {
        self.pixels.get().is_some()
    }

    pub fn pixels(&self) -> Option<&Pixmap> {
        self.pixels.get()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

/// One frame of a source image: the crop that holds its pixels plus the
/// untrimmed cell it was packed from.
#[derive(Debug, Clone)]
pub struct Frame {
    pub key: String,
    pub name: String,
    pub image: Arc<SourceImage>,
    /// Crop inside the image that stores the visible pixels.
    pub source_rect: PixelRect,
    /// Size of the original, untrimmed cell.
    pub source_size: PixelSize,
    pub trimmed: bool,
    /// Position of the crop inside the untrimmed cell.
    pub trim_offset: (u32, u32),
}

impl Frame {
    /// Frame covering the whole image, untrimmed.
    pub fn whole(key: impl Into<String>, image: Arc<SourceImage>) -> Self {
        let (w, h) = (image.width(), image.height());
        Self {
            key: key.into(),
            name: String::new(),
            image,
            source_rect: PixelRect::new(0, 0, w, h),
            source_size: PixelSize { w, h },
            trimmed: false,
            trim_offset: (0, 0),
        }
    }

    pub fn has_loaded(&self) -> bool {
        self.image.has_loaded()
    }

    /// Copy of the crop pixels, or `None` while the image is still loading.
    pub fn crop(&self) -> Option<Pixmap> {
        let pixels = self.image.pixels()?;
        pixels.clone_rect(self.source_rect.to_int_rect()?)
    }

    fn validate(&self) -> Result<(), AssetError> {
        let malformed = |reason: &str| AssetError::MalformedFrame {
            frame: self.name.clone(),
            reason: reason.into(),
        };
        let r = self.source_rect;
        if r.w == 0 || r.h == 0 {
            return Err(malformed("empty crop"));
        }
        let limit = i32::MAX as u32;
        if [r.x, r.y, r.w, r.h].iter().any(|v| *v > limit) {
            return Err(malformed("coordinates out of range"));
        }
        let right = r.x.checked_add(r.w);
        let bottom = r.y.checked_add(r.h);
        if !right.zip(bottom).is_some_and(|(x1, y1)| {
            x1 <= self.image.width() && y1 <= self.image.height()
        }) {
            return Err(malformed("crop exceeds image bounds"));
        }
        let trim_right = self.trim_offset.0.checked_add(r.w);
        let trim_bottom = self.trim_offset.1.checked_add(r.h);
        if !trim_right.zip(trim_bottom).is_some_and(|(x1, y1)| {
            x1 <= self.source_size.w && y1 <= self.source_size.h
        }) {
            return Err(malformed("trimmed crop exceeds source size"));
        }
        Ok(())
    }
}

/// Resolves a texture key and optional frame name into a frame descriptor.
pub trait FrameResolver {
    fn resolve(&self, key: &str, frame: Option<&str>) -> Option<Arc<Frame>>;
}

#[derive(Debug)]
struct TextureEntry {
    base: Arc<Frame>,
    frames: BTreeMap<String, Arc<Frame>>,
}

/// Keyed registry of source images and their frames.
#[derive(Debug, Default)]
pub struct FrameTable {
    textures: BTreeMap<String, TextureEntry>,
}

impl FrameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image under `key` and return its base frame.
    /// Re-registering a key replaces the image and drops its frames.
    pub fn add_image(&mut self, key: impl Into<String>, image: SourceImage) -> Arc<Frame> {
        let key = key.into();
        let base = Arc::new(Frame::whole(key.clone(), Arc::new(image)));
        self.textures.insert(
            key,
            TextureEntry {
                base: Arc::clone(&base),
                frames: BTreeMap::new(),
            },
        );
        base
    }

    /// Register a named frame on an existing image.
    pub fn add_frame(
        &mut self,
        key: &str,
        name: impl Into<String>,
        source_rect: PixelRect,
        source_size: PixelSize,
        trim_offset: Option<(u32, u32)>,
    ) -> Result<Arc<Frame>, AssetError> {
        let frame = Arc::new(self.build_frame(key, name.into(), source_rect, source_size, trim_offset)?);
        self.insert_frames(key, [Arc::clone(&frame)]);
        Ok(frame)
    }

    fn build_frame(
        &self,
        key: &str,
        name: String,
        source_rect: PixelRect,
        source_size: PixelSize,
        trim_offset: Option<(u32, u32)>,
    ) -> Result<Frame, AssetError> {
        let entry = self
            .textures
            .get(key)
            .ok_or_else(|| AssetError::NotFound(key.to_string()))?;
        let frame = Frame {
            key: key.to_string(),
            name,
            image: Arc::clone(&entry.base.image),
            source_rect,
            source_size,
            trimmed: trim_offset.is_some(),
            trim_offset: trim_offset.unwrap_or((0, 0)),
        };
        frame.validate()?;
        Ok(frame)
    }

    fn insert_frames(&mut self, key: &str, frames: impl IntoIterator<Item = Arc<Frame>>) {
        if let Some(entry) = self.textures.get_mut(key) {
            for frame in frames {
                entry.frames.insert(frame.name.clone(), frame);
            }
        }
    }

    /// Decode a PNG from disk and register it under `key`.
    pub fn load_png(
        &mut self,
        key: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Arc<Frame>, AssetError> {
        let bytes = std::fs::read(path.as_ref())?;
        let pixmap = Pixmap::decode_png(&bytes).map_err(|e| AssetError::Png(e.to_string()))?;
        let key = key.into();
        tracing::debug!(%key, width = pixmap.width(), height = pixmap.height(), "decoded png");
        Ok(self.add_image(key.clone(), SourceImage::loaded(key, pixmap)))
    }

    /// Register the frames described by a TexturePacker JSON document on the image `key`.
    pub fn import_atlas_json(&mut self, key: &str, json: &str) -> Result<Vec<Arc<Frame>>, AssetError> {
        let atlas: AtlasDocument = serde_json::from_str(json)?;
        let entries: Vec<(String, AtlasFrame)> = match atlas.frames {
            AtlasFrames::Hash(map) => map.into_iter().collect(),
            AtlasFrames::Array(list) => list.into_iter().map(|f| (f.filename.clone(), f.frame)).collect(),
        };

        let mut frames = Vec::with_capacity(entries.len());
        for (name, entry) in entries {
            if entry.rotated {
                return Err(AssetError::MalformedFrame {
                    frame: name,
                    reason: "rotated frames are not supported".into(),
                });
            }
            let trim = entry
                .trimmed
                .then(|| (entry.sprite_source_size.x, entry.sprite_source_size.y));
            frames.push(Arc::new(self.build_frame(key, name, entry.frame, entry.source_size, trim)?));
        }
        // Nothing is registered unless every frame validated.
        self.insert_frames(key, frames.iter().cloned());
        tracing::debug!(%key, count = frames.len(), "imported atlas frames");
        Ok(frames)
    }

    /// Load an atlas page and its JSON description.
    pub fn load_atlas(
        &mut self,
        key: &str,
        png_path: impl AsRef<Path>,
        json_path: impl AsRef<Path>,
    ) -> Result<Vec<Arc<Frame>>, AssetError> {
        self.load_png(key, png_path)?;
        let json = std::fs::read_to_string(json_path)?;
        self.import_atlas_json(key, &json)
    }

    pub fn image(&self, key: &str) -> Option<&Arc<SourceImage>> {
        self.textures.get(key).map(|e| &e.base.image)
    }

    /// Look up a frame, reporting which part of the lookup failed.
    pub fn frame(&self, key: &str, frame: Option<&str>) -> Result<Arc<Frame>, AssetError> {
        let entry = self
            .textures
            .get(key)
            .ok_or_else(|| AssetError::NotFound(key.to_string()))?;
        match frame {
            None => Ok(Arc::clone(&entry.base)),
            Some(name) => entry.frames.get(name).cloned().ok_or_else(|| AssetError::FrameNotFound {
                key: key.to_string(),
                frame: name.to_string(),
            }),
        }
    }

    /// Number of registered images.
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

impl FrameResolver for FrameTable {
    fn resolve(&self, key: &str, frame: Option<&str>) -> Option<Arc<Frame>> {
        self.frame(key, frame).ok()
    }
}

#[derive(Deserialize)]
struct AtlasDocument {
    frames: AtlasFrames,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AtlasFrames {
    Hash(BTreeMap<String, AtlasFrame>),
    Array(Vec<NamedAtlasFrame>),
}

#[derive(Deserialize)]
struct NamedAtlasFrame {
    filename: String,
    #[serde(flatten)]
    frame: AtlasFrame,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtlasFrame {
    frame: PixelRect,
    #[serde(default)]
    rotated: bool,
    #[serde(default)]
    trimmed: bool,
    #[serde(default)]
    sprite_source_size: PixelRect,
    source_size: PixelSize,
}

pub fn crate_info() -> &'static str {
    "tilesurface-assets v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiny_skia::Color;

    fn solid(w: u32, h: u32) -> Pixmap {
        let mut p = Pixmap::new(w, h).unwrap();
        p.fill(Color::from_rgba8(255, 0, 0, 255));
        p
    }

    const ATLAS_HASH: &str = r#"{
        "frames": {
            "grass": {
                "frame": {"x": 0, "y": 0, "w": 16, "h": 16},
                "rotated": false,
                "trimmed": false,
                "spriteSourceSize": {"x": 0, "y": 0, "w": 16, "h": 16},
                "sourceSize": {"w": 16, "h": 16}
            },
            "leaf": {
                "frame": {"x": 16, "y": 0, "w": 10, "h": 12},
                "rotated": false,
                "trimmed": true,
                "spriteSourceSize": {"x": 3, "y": 2, "w": 10, "h": 12},
                "sourceSize": {"w": 16, "h": 16}
            }
        },
        "meta": {"image": "atlas.png"}
    }"#;

    #[test]
    fn add_image_returns_whole_frame() {
        let mut table = FrameTable::new();
        let frame = table.add_image("sky", SourceImage::loaded("sky", solid(30, 20)));
        assert_eq!(frame.source_rect, PixelRect::new(0, 0, 30, 20));
        assert_eq!(frame.source_size, PixelSize { w: 30, h: 20 });
        assert!(!frame.trimmed);
        assert!(frame.has_loaded());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn resolve_returns_same_reference() {
        let mut table = FrameTable::new();
        table.add_image("sky", SourceImage::loaded("sky", solid(8, 8)));
        let a = table.resolve("sky", None).unwrap();
        let b = table.resolve("sky", None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(table.resolve("missing", None).is_none());
    }

    #[test]
    fn pending_image_completes_once() {
        let image = SourceImage::pending("late", 4, 4);
        assert!(!image.has_loaded());
        image.complete(solid(4, 4)).unwrap();
        assert!(image.has_loaded());
        assert!(matches!(
            image.complete(solid(4, 4)),
            Err(AssetError::AlreadyLoaded(_))
        ));
    }

    #[test]
    fn crop_requires_loaded_pixels() {
        let mut table = FrameTable::new();
        let frame = table.add_image("late", SourceImage::pending("late", 4, 4));
        assert!(frame.crop().is_none());
        frame.image.complete(solid(4, 4)).unwrap();
        let crop = frame.crop().unwrap();
        assert_eq!((crop.width(), crop.height()), (4, 4));
    }

    #[test]
    fn add_frame_rejects_out_of_bounds_crop() {
        let mut table = FrameTable::new();
        table.add_image("sheet", SourceImage::loaded("sheet", solid(32, 32)));
        let err = table
            .add_frame(
                "sheet",
                "bad",
                PixelRect::new(24, 0, 16, 16),
                PixelSize { w: 16, h: 16 },
                None,
            )
            .unwrap_err();
        assert!(matches!(err, AssetError::MalformedFrame { .. }));
    }

    #[test]
    fn import_hash_atlas() {
        let mut table = FrameTable::new();
        table.add_image("atlas", SourceImage::loaded("atlas", solid(32, 16)));
        let frames = table.import_atlas_json("atlas", ATLAS_HASH).unwrap();
        assert_eq!(frames.len(), 2);

        let leaf = table.frame("atlas", Some("leaf")).unwrap();
        assert!(leaf.trimmed);
        assert_eq!(leaf.trim_offset, (3, 2));
        assert_eq!(leaf.source_rect, PixelRect::new(16, 0, 10, 12));
        assert_eq!(leaf.source_size, PixelSize { w: 16, h: 16 });

        let grass = table.frame("atlas", Some("grass")).unwrap();
        assert!(!grass.trimmed);
    }

    #[test]
    fn import_array_atlas() {
        let json = r#"{"frames": [{
            "filename": "tile",
            "frame": {"x": 0, "y": 0, "w": 8, "h": 8},
            "spriteSourceSize": {"x": 0, "y": 0, "w": 8, "h": 8},
            "sourceSize": {"w": 8, "h": 8}
        }]}"#;
        let mut table = FrameTable::new();
        table.add_image("atlas", SourceImage::loaded("atlas", solid(8, 8)));
        let frames = table.import_atlas_json("atlas", json).unwrap();
        assert_eq!(frames[0].name, "tile");
    }

    #[test]
    fn missing_frame_is_reported() {
        let mut table = FrameTable::new();
        table.add_image("atlas", SourceImage::loaded("atlas", solid(8, 8)));
        assert!(matches!(
            table.frame("atlas", Some("nope")),
            Err(AssetError::FrameNotFound { .. })
        ));
        assert!(matches!(table.frame("nope", None), Err(AssetError::NotFound(_))));
    }

    #[test]
    fn load_atlas_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let png_path = dir.path().join("atlas.png");
        let json_path = dir.path().join("atlas.json");
        solid(32, 16).save_png(&png_path).unwrap();
        std::fs::write(&json_path, ATLAS_HASH).unwrap();

        let mut table = FrameTable::new();
        let frames = table.load_atlas("atlas", &png_path, &json_path).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(table.image("atlas").unwrap().has_loaded());
    }

    #[test]
    fn overflowing_atlas_coordinates_are_malformed() {
        let json = r#"{"frames": [{
            "filename": "huge",
            "frame": {"x": 4294967295, "y": 0, "w": 2, "h": 2},
            "spriteSourceSize": {"x": 0, "y": 0, "w": 2, "h": 2},
            "sourceSize": {"w": 2, "h": 2}
        }]}"#;
        let mut table = FrameTable::new();
        table.add_image("atlas", SourceImage::loaded("atlas", solid(8, 8)));
        assert!(matches!(
            table.import_atlas_json("atlas", json),
            Err(AssetError::MalformedFrame { .. })
        ));

        let err = table
            .add_frame(
                "atlas",
                "trim",
                PixelRect::new(0, 0, 2, 2),
                PixelSize { w: 2, h: 2 },
                Some((u32::MAX, 0)),
            )
            .unwrap_err();
        assert!(matches!(err, AssetError::MalformedFrame { .. }));
    }

    #[test]
    fn failed_import_registers_nothing() {
        let json = r#"{"frames": [
            {
                "filename": "first",
                "frame": {"x": 0, "y": 0, "w": 4, "h": 4},
                "spriteSourceSize": {"x": 0, "y": 0, "w": 4, "h": 4},
                "sourceSize": {"w": 4, "h": 4}
            },
            {
                "filename": "second",
                "frame": {"x": 4, "y": 0, "w": 4, "h": 4},
                "rotated": true,
                "spriteSourceSize": {"x": 0, "y": 0, "w": 4, "h": 4},
                "sourceSize": {"w": 4, "h": 4}
            }
        ]}"#;
        let mut table = FrameTable::new();
        table.add_image("atlas", SourceImage::loaded("atlas", solid(8, 8)));
        assert!(table.import_atlas_json("atlas", json).is_err());
        assert!(matches!(
            table.frame("atlas", Some("first")),
            Err(AssetError::FrameNotFound { .. })
        ));
    }
}
