//! Rendered and natural pixel spaces, and the mapping between them.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum GeometryError {
    #[error("render surface has no area: {width}x{height}")]
    EmptyRenderSurface { width: f64, height: f64 },
    #[error("source image has no area: {width}x{height}")]
    EmptyImage { width: u32, height: u32 },
    #[error("crop resolves to a zero-area rectangle")]
    ZeroAreaCrop,
    #[error("crop edges ({left}, {top})-({right}, {bottom}) fall outside the {bounds:?} image")]
    CropOutOfBounds {
        left: i64,
        top: i64,
        right: i64,
        bottom: i64,
        bounds: ImageBounds,
    },
    #[error("pixel density must be a finite number in (0, 8], got {0}")]
    InvalidDensity(f64),
    #[error("crop output of {width}x{height} exceeds the pixel limit")]
    OutputTooLarge { width: u64, height: u64 },
}

pub type GeometryResult<T> = std::result::Result<T, GeometryError>;

/// Dimensions of an image in natural (source) pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBounds {
    pub width: u32,
    pub height: u32,
}

impl ImageBounds {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn contains_rect(&self, rect: &NaturalRect) -> bool {
        rect.x as u64 + rect.width as u64 <= self.width as u64
            && rect.y as u64 + rect.height as u64 <= self.height as u64
    }
}

/// Dimensions of the on-screen image element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedSize {
    pub width: f64,
    pub height: f64,
}

impl RenderedSize {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn has_area(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// Pointer position relative to the top-left corner of the rendered element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedPoint {
    pub x: f64,
    pub y: f64,
}

impl RenderedPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NaturalPoint {
    pub x: i32,
    pub y: i32,
}

impl NaturalPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NaturalRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl NaturalRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn has_area(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Per-axis scale between a rendered element and the natural image behind it.
///
/// Both axes are scaled independently, so a stretched element still maps
/// every pointer position onto the right source pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    natural: ImageBounds,
    rendered: RenderedSize,
    scale_x: f64,
    scale_y: f64,
}

impl CoordinateMapper {
    pub fn new(natural: ImageBounds, rendered: RenderedSize) -> GeometryResult<Self> {
        if !rendered.has_area() {
            return Err(GeometryError::EmptyRenderSurface {
                width: rendered.width,
                height: rendered.height,
            });
        }
        if natural.width == 0 || natural.height == 0 {
            return Err(GeometryError::EmptyImage {
                width: natural.width,
                height: natural.height,
            });
        }

        Ok(Self {
            natural,
            rendered,
            scale_x: f64::from(natural.width) / rendered.width,
            scale_y: f64::from(natural.height) / rendered.height,
        })
    }

    pub const fn natural(&self) -> ImageBounds {
        self.natural
    }

    pub const fn rendered(&self) -> RenderedSize {
        self.rendered
    }

    pub const fn scale(&self) -> (f64, f64) {
        (self.scale_x, self.scale_y)
    }

    /// Maps a rendered point to natural pixels. The result is not clamped.
    pub fn to_natural(&self, point: RenderedPoint) -> NaturalPoint {
        NaturalPoint::new(
            round_to_i32(point.x * self.scale_x),
            round_to_i32(point.y * self.scale_y),
        )
    }

    pub fn to_rendered(&self, point: NaturalPoint) -> RenderedPoint {
        RenderedPoint::new(
            f64::from(point.x) / self.scale_x,
            f64::from(point.y) / self.scale_y,
        )
    }

    /// Clamps a natural point into the valid pixel index range.
    pub fn clamp_natural(&self, mut point: NaturalPoint) -> NaturalPoint {
        let max_x = i32::try_from(self.natural.width.saturating_sub(1)).unwrap_or(i32::MAX);
        let max_y = i32::try_from(self.natural.height.saturating_sub(1)).unwrap_or(i32::MAX);
        point.x = point.x.clamp(0, max_x);
        point.y = point.y.clamp(0, max_y);
        point
    }

    pub(crate) fn natural_edge_x(&self, rendered_x: f64) -> i64 {
        (rendered_x * self.scale_x).round() as i64
    }

    pub(crate) fn natural_edge_y(&self, rendered_y: f64) -> i64 {
        (rendered_y * self.scale_y).round() as i64
    }
}

fn round_to_i32(value: f64) -> i32 {
    // `as` saturates on overflow and maps NaN to 0.
    value.round() as i32
}
