//! Isolates the plotted curve of an EDS spectrum image and reduces it to a
//! per-column intensity profile.
//!
//! Stages: luminance grayscale, blur, binarize (darker than near-white is
//! foreground), crop to the curve's bounding box, then collapse each column of
//! the cropped mask to its mean or max.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::config::Number;
use crate::raster::RasterImage;

/// One value per cropped column, all non-negative.
pub type RawSignature = Vec<Number>;

const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

#[derive(Error, Debug, PartialEq)]
pub enum ExtractError {
    #[error("Blur kernel size must be odd and at least 1, got {0}")]
    InvalidKernelSize(usize),
    #[error("Binarization threshold must lie in (0, 1), got {0}")]
    InvalidThreshold(f32),
    #[error("Row bounds {0}..{1} are empty")]
    EmptyRowBounds(usize, usize),
    #[error("Row bounds {start}..{end} do not fit an image of height {height}")]
    RowBoundsOutOfRange {
        start: usize,
        end: usize,
        height: usize,
    },
    #[error("Unknown {kind} '{value}'")]
    UnknownMethod { kind: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlurMethod {
    Gaussian,
    Box,
}

impl FromStr for BlurMethod {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gaussian" => Ok(BlurMethod::Gaussian),
            "box" => Ok(BlurMethod::Box),
            _ => Err(ExtractError::UnknownMethod {
                kind: "blur method",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for BlurMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlurMethod::Gaussian => write!(f, "gaussian"),
            BlurMethod::Box => write!(f, "box"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMethod {
    Mean,
    Max,
}

impl FromStr for SignatureMethod {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(SignatureMethod::Mean),
            "max" => Ok(SignatureMethod::Max),
            _ => Err(ExtractError::UnknownMethod {
                kind: "signature method",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SignatureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureMethod::Mean => write!(f, "mean"),
            SignatureMethod::Max => write!(f, "max"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorConfig {
    /// Side of the square blur kernel; 1 disables blurring.
    pub blur_kernel_size: usize,
    pub blur_method: BlurMethod,
    /// Grayscale values strictly below this are foreground.
    pub binarization_threshold: f32,
    /// Half-open row band to keep. The default band is tuned for 512×400
    /// captures and is rejected, not clamped, on shorter images.
    pub row_bounds: Option<(usize, usize)>,
    pub signature_method: SignatureMethod,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            blur_kernel_size: 5,
            blur_method: BlurMethod::Gaussian,
            binarization_threshold: 0.99,
            row_bounds: Some((150, 250)),
            signature_method: SignatureMethod::Mean,
        }
    }
}

impl ExtractorConfig {
    pub fn validate(&self) -> Result<(), ExtractError> {
        if self.blur_kernel_size == 0 || self.blur_kernel_size % 2 == 0 {
            return Err(ExtractError::InvalidKernelSize(self.blur_kernel_size));
        }
        let t = self.binarization_threshold;
        if !(t > 0.0 && t < 1.0) {
            return Err(ExtractError::InvalidThreshold(t));
        }
        if let Some((start, end)) = self.row_bounds {
            if start >= end {
                return Err(ExtractError::EmptyRowBounds(start, end));
            }
        }
        Ok(())
    }
}

/// Single-channel intensity plane.
#[derive(Debug, Clone)]
pub struct GrayPlane {
    pub width: usize,
    pub height: usize,
    pub values: Vec<f32>,
}

impl GrayPlane {
    fn at(&self, x: usize, y: usize) -> f32 {
        self.values[y * self.width + x]
    }
}

/// Binary foreground grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub width: usize,
    pub height: usize,
    cells: Vec<bool>,
}

impl Mask {
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.cells[y * self.width + x]
    }

    pub fn foreground_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropRegion {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

pub struct SpectrumExtractor {
    config: ExtractorConfig,
}

impl SpectrumExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self, ExtractError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn extract(&self, image: &RasterImage) -> Result<RawSignature, ExtractError> {
        self.extract_with_region(image).map(|(signature, _)| signature)
    }

    /// Like [`extract`](Self::extract), also reporting which part of the image
    /// the signature was read from.
    pub fn extract_with_region(
        &self,
        image: &RasterImage,
    ) -> Result<(RawSignature, CropRegion), ExtractError> {
        let gray = to_grayscale(image);
        let blurred = blur(&gray, self.config.blur_kernel_size, self.config.blur_method);
        let mask = binarize(&blurred, self.config.binarization_threshold);

        let cols = column_bounds(&mask);
        let rows = match self.config.row_bounds {
            Some((start, end)) => {
                if end > mask.height {
                    return Err(ExtractError::RowBoundsOutOfRange {
                        start,
                        end,
                        height: mask.height,
                    });
                }
                start..end
            }
            None => row_bounds(&mask, &cols),
        };
        let region = CropRegion { rows, cols };

        let signature = column_signature(&mask, &region, self.config.signature_method);
        debug!(
            "Extracted signature: {} foreground pixels, rows {:?}, cols {:?}",
            mask.foreground_count(),
            region.rows,
            region.cols
        );
        Ok((signature, region))
    }
}

pub fn to_grayscale(image: &RasterImage) -> GrayPlane {
    let (width, height) = (image.width(), image.height());
    let mut values = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let px = image.pixel(x, y);
            let v = if px.len() == 3 {
                px.iter().zip(LUMA_WEIGHTS.iter()).map(|(c, w)| c * w).sum::<f32>()
            } else {
                px[0]
            };
            values.push(v);
        }
    }
    GrayPlane {
        width,
        height,
        values,
    }
}

fn blur_kernel(size: usize, method: BlurMethod) -> Vec<f32> {
    match method {
        BlurMethod::Box => vec![1.0 / size as f32; size],
        BlurMethod::Gaussian => {
            let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
            let center = (size / 2) as f32;
            let raw: Vec<f32> = (0..size)
                .map(|i| {
                    let d = i as f32 - center;
                    (-(d * d) / (2.0 * sigma * sigma)).exp()
                })
                .collect();
            let total: f32 = raw.iter().sum();
            raw.into_iter().map(|w| w / total).collect()
        }
    }
}

/// Mirror an out-of-range index back into `0..n` without repeating the edge.
fn reflect_101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let period = 2 * (n - 1);
    let mut i = i.rem_euclid(period);
    if i >= n {
        i = period - i;
    }
    i as usize
}

/// Separable 2-D blur with reflect-101 borders.
pub fn blur(plane: &GrayPlane, kernel_size: usize, method: BlurMethod) -> GrayPlane {
    if kernel_size <= 1 {
        return plane.clone();
    }
    let kernel = blur_kernel(kernel_size, method);
    let half = (kernel_size / 2) as isize;
    let (width, height) = (plane.width, plane.height);

    let mut horizontal = vec![0.0f32; width * height];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, w) in kernel.iter().enumerate() {
                let sx = reflect_101(x as isize + k as isize - half, width);
                acc += w * plane.at(sx, y);
            }
            horizontal[y * width + x] = acc;
        }
    }

    let mut values = vec![0.0f32; width * height];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, w) in kernel.iter().enumerate() {
                let sy = reflect_101(y as isize + k as isize - half, height);
                acc += w * horizontal[sy * width + x];
            }
            values[y * width + x] = acc;
        }
    }

    GrayPlane {
        width,
        height,
        values,
    }
}

pub fn binarize(plane: &GrayPlane, threshold: f32) -> Mask {
    Mask {
        width: plane.width,
        height: plane.height,
        cells: plane.values.iter().map(|&v| v < threshold).collect(),
    }
}

/// Columns spanned by foreground, or every column when there is none.
fn column_bounds(mask: &Mask) -> Range<usize> {
    let occupied = |x: usize| (0..mask.height).any(|y| mask.get(x, y));
    match (0..mask.width).find(|&x| occupied(x)) {
        Some(first) => {
            let last = (first..mask.width).rev().find(|&x| occupied(x)).unwrap_or(first);
            first..last + 1
        }
        None => 0..mask.width,
    }
}

/// Rows spanned by foreground within `cols`, or every row when there is none.
fn row_bounds(mask: &Mask, cols: &Range<usize>) -> Range<usize> {
    let occupied = |y: usize| cols.clone().any(|x| mask.get(x, y));
    match (0..mask.height).find(|&y| occupied(y)) {
        Some(first) => {
            let last = (first..mask.height).rev().find(|&y| occupied(y)).unwrap_or(first);
            first..last + 1
        }
        None => 0..mask.height,
    }
}

fn column_signature(mask: &Mask, region: &CropRegion, method: SignatureMethod) -> RawSignature {
    let rows = region.rows.len();
    region
        .cols
        .clone()
        .map(|x| {
            let hits = region.rows.clone().filter(|&y| mask.get(x, y)).count();
            match method {
                SignatureMethod::Mean if rows > 0 => hits as Number / rows as Number,
                SignatureMethod::Mean => 0.0,
                SignatureMethod::Max => {
                    if hits > 0 {
                        1.0
                    } else {
                        0.0
                    }
                }
            }
        })
        .collect()
}
