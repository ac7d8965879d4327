//! Crop presets, rendered crop regions and pixel-exact extraction.

use std::io::Cursor;

use image::imageops::FilterType;
use image::ImageFormat;
use serde::Deserialize;
use thiserror::Error;

use crate::geometry::{
    CoordinateMapper, GeometryError, GeometryResult, ImageBounds, NaturalRect, RenderedSize,
};

/// Slack, in rendered pixels, when checking a region against its aspect lock.
pub const ASPECT_TOLERANCE: f64 = 0.5;

/// Largest output density a crop may be rendered at.
pub const MAX_PIXEL_DENSITY: f64 = 8.0;

/// Upper bound on the pixel count of one crop output.
pub const MAX_OUTPUT_PIXELS: u64 = 1 << 26;

#[derive(Debug, Error)]
pub enum CropError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("failed to decode or encode crop image: {0}")]
    Image(#[from] image::ImageError),
}

pub type CropResult<T> = std::result::Result<T, CropError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum CropPreset {
    #[default]
    #[serde(rename = "free")]
    Free,
    #[serde(rename = "1:1")]
    Ratio1x1,
    #[serde(rename = "16:9")]
    Ratio16x9,
    #[serde(rename = "9:16")]
    Ratio9x16,
    #[serde(rename = "4:3")]
    Ratio4x3,
    #[serde(rename = "original")]
    Original,
}

impl CropPreset {
    pub const ALL: [CropPreset; 6] = [
        Self::Free,
        Self::Ratio1x1,
        Self::Ratio16x9,
        Self::Ratio9x16,
        Self::Ratio4x3,
        Self::Original,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::Ratio1x1 => "1:1",
            Self::Ratio16x9 => "16:9",
            Self::Ratio9x16 => "9:16",
            Self::Ratio4x3 => "4:3",
            Self::Original => "Original",
        }
    }

    const fn ratio(self) -> Option<AspectRatio> {
        match self {
            Self::Free | Self::Original => None,
            Self::Ratio1x1 => Some(AspectRatio::new(1, 1)),
            Self::Ratio16x9 => Some(AspectRatio::new(16, 9)),
            Self::Ratio9x16 => Some(AspectRatio::new(9, 16)),
            Self::Ratio4x3 => Some(AspectRatio::new(4, 3)),
        }
    }

    /// Returns the aspect lock for this preset; `Original` locks to the image itself.
    pub fn resolve_ratio(self, image: ImageBounds) -> Option<AspectRatio> {
        self.ratio().or_else(|| {
            (self == Self::Original)
                .then(|| AspectRatio::new(image.width.max(1), image.height.max(1)))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn value(self) -> f64 {
        f64::from(self.width.max(1)) / f64::from(self.height.max(1))
    }
}

/// Crop rectangle in rendered coordinates, optionally locked to an aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub aspect: Option<AspectRatio>,
}

impl CropRegion {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            aspect: None,
        }
    }

    pub const fn with_aspect(mut self, aspect: Option<AspectRatio>) -> Self {
        self.aspect = aspect;
        self
    }

    pub fn has_area(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    /// True when the region is unlocked or its sides match the locked ratio.
    pub fn matches_aspect(&self) -> bool {
        match self.aspect {
            None => true,
            Some(aspect) => (self.width - self.height * aspect.value()).abs() <= ASPECT_TOLERANCE,
        }
    }

    /// Shrinks the longer side so the region satisfies its aspect lock.
    /// The origin stays put.
    pub fn enforce_aspect(mut self) -> Self {
        let Some(aspect) = self.aspect else {
            return self;
        };
        let ratio = aspect.value();
        if self.width > self.height * ratio {
            self.width = self.height * ratio;
        } else {
            self.height = self.width / ratio;
        }
        self
    }

    /// Carries the region from one rendered size to another so it keeps
    /// covering the same part of the image. `None` when either size is empty.
    pub fn rescale(self, from: RenderedSize, to: RenderedSize) -> Option<Self> {
        if !from.has_area() || !to.has_area() {
            return None;
        }
        let scale_x = to.width / from.width;
        let scale_y = to.height / from.height;
        Some(Self {
            x: self.x * scale_x,
            y: self.y * scale_y,
            width: self.width * scale_x,
            height: self.height * scale_y,
            aspect: self.aspect,
        })
    }

    /// Clamps the region into the rendered element.
    ///
    /// A locked region is shrunk uniformly so its proportions survive; a free
    /// region is cut per axis.
    pub fn clamp_to(mut self, rendered: RenderedSize) -> Self {
        self.x = self.x.clamp(0.0, rendered.width.max(0.0));
        self.y = self.y.clamp(0.0, rendered.height.max(0.0));
        let max_width = (rendered.width - self.x).max(0.0);
        let max_height = (rendered.height - self.y).max(0.0);

        if self.aspect.is_some() && self.has_area() {
            let factor = (max_width / self.width)
                .min(max_height / self.height)
                .min(1.0);
            self.width *= factor;
            self.height *= factor;
        } else {
            self.width = self.width.min(max_width).max(0.0);
            self.height = self.height.min(max_height).max(0.0);
        }
        self
    }
}

/// Maps a rendered crop region onto natural pixels.
///
/// Each edge is scaled and rounded on its own so a region inside the rendered
/// element never spills past the natural image. Regions that do are rejected.
pub fn resolve_crop(mapper: &CoordinateMapper, region: &CropRegion) -> GeometryResult<NaturalRect> {
    if !region.has_area() {
        return Err(GeometryError::ZeroAreaCrop);
    }

    let left = mapper.natural_edge_x(region.x);
    let top = mapper.natural_edge_y(region.y);
    let right = mapper.natural_edge_x(region.x + region.width);
    let bottom = mapper.natural_edge_y(region.y + region.height);
    let bounds = mapper.natural();

    if left < 0 || top < 0 || right > i64::from(bounds.width) || bottom > i64::from(bounds.height)
    {
        return Err(GeometryError::CropOutOfBounds {
            left,
            top,
            right,
            bottom,
            bounds,
        });
    }
    if right <= left || bottom <= top {
        return Err(GeometryError::ZeroAreaCrop);
    }

    // Bounds were checked above, every edge fits in u32.
    Ok(NaturalRect::new(
        left as u32,
        top as u32,
        (right - left) as u32,
        (bottom - top) as u32,
    ))
}

/// Output size for a natural rectangle rendered at `density`.
pub fn output_dimensions(rect: NaturalRect, density: f64) -> GeometryResult<(u32, u32)> {
    if !density.is_finite() || density <= 0.0 || density > MAX_PIXEL_DENSITY {
        return Err(GeometryError::InvalidDensity(density));
    }
    if !rect.has_area() {
        return Err(GeometryError::ZeroAreaCrop);
    }
    // Density is capped, so each side stays far below u32::MAX.
    let scale = |side: u32| (f64::from(side) * density).round().max(1.0) as u64;
    let (width, height) = (scale(rect.width), scale(rect.height));
    if width * height > MAX_OUTPUT_PIXELS {
        return Err(GeometryError::OutputTooLarge { width, height });
    }
    Ok((width as u32, height as u32))
}

/// Extracts `rect` from an encoded image into a new PNG payload.
///
/// The natural rectangle is always what gets sampled; `density` only changes
/// the output dimensions.
pub fn extract_crop(payload: &[u8], rect: NaturalRect, density: f64) -> CropResult<Vec<u8>> {
    let (out_width, out_height) = output_dimensions(rect, density)?;
    let source = image::load_from_memory(payload)?;
    let bounds = ImageBounds::new(source.width(), source.height());
    if !bounds.contains_rect(&rect) {
        return Err(GeometryError::CropOutOfBounds {
            left: i64::from(rect.x),
            top: i64::from(rect.y),
            right: i64::from(rect.x) + i64::from(rect.width),
            bottom: i64::from(rect.y) + i64::from(rect.height),
            bounds,
        }
        .into());
    }

    let cropped = source.crop_imm(rect.x, rect.y, rect.width, rect.height);
    let output = if (out_width, out_height) == (rect.width, rect.height) {
        cropped
    } else {
        cropped.resize_exact(out_width, out_height, FilterType::Lanczos3)
    };

    let mut bytes = Vec::new();
    output.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    tracing::debug!(
        ?rect,
        out_width,
        out_height,
        bytes = bytes.len(),
        "extracted crop"
    );
    Ok(bytes)
}
