use std::fmt;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{UqError, UqResult};

/// Whether dropout units sample a mask on a forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMode {
    /// Dropout stays active: every call samples a fresh mask.
    Stochastic,
    /// Dropout disabled: the usual best-estimate prediction.
    Deterministic,
}

/// Height and width of a single image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    /// Number of pixels in one flattened image
    pub fn pixels(&self) -> usize {
        self.height * self.width
    }
}

impl fmt::Display for ImageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

/// An ordered batch of images with values normalized to [0, 1].
///
/// Each image is stored as one row of `pixels`, flattened row-major, so a
/// batch of N images of shape HxW is an N x (H*W) matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    shape: ImageShape,
    pixels: DMatrix<f64>,
}

impl ImageBatch {
    /// Wrap an N x (H*W) matrix, checking width and pixel range.
    pub fn new(shape: ImageShape, pixels: DMatrix<f64>) -> UqResult<Self> {
        if pixels.ncols() != shape.pixels() {
            return Err(UqError::shape_mismatch(
                format!("{} pixels per image ({})", shape.pixels(), shape),
                format!("{} pixels per image", pixels.ncols()),
            ));
        }

        for (image, row) in pixels.row_iter().enumerate() {
            if let Some(&value) = row
                .iter()
                .find(|v| !v.is_finite() || **v < 0.0 || **v > 1.0)
            {
                return Err(UqError::InvalidPixel { image, value });
            }
        }

        Ok(Self { shape, pixels })
    }

    /// Build a batch from flattened images.
    pub fn from_images(shape: ImageShape, images: &[Vec<f64>]) -> UqResult<Self> {
        let width = shape.pixels();
        let mut data = Vec::with_capacity(images.len() * width);

        for (index, image) in images.iter().enumerate() {
            if image.len() != width {
                return Err(UqError::shape_mismatch(
                    format!("{} pixels per image ({})", width, shape),
                    format!("{} pixels in image {}", image.len(), index),
                ));
            }
            data.extend_from_slice(image);
        }

        Self::new(shape, DMatrix::from_row_slice(images.len(), width, &data))
    }

    /// A batch with no images.
    pub fn empty(shape: ImageShape) -> Self {
        Self {
            shape,
            pixels: DMatrix::zeros(0, shape.pixels()),
        }
    }

    pub fn len(&self) -> usize {
        self.pixels.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn pixels(&self) -> &DMatrix<f64> {
        &self.pixels
    }

    /// Copy of one flattened image
    pub fn image(&self, index: usize) -> Vec<f64> {
        self.pixels.row(index).iter().copied().collect()
    }

    /// New batch holding the listed images, in the listed order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            shape: self.shape,
            pixels: self.pixels.select_rows(indices.iter()),
        }
    }

    /// Keep at most the first `count` images.
    pub fn truncate(self, count: usize) -> Self {
        if count >= self.len() {
            return self;
        }
        let indices: Vec<usize> = (0..count).collect();
        self.select(&indices)
    }

    /// Ensure this batch matches the per-image shape a model expects.
    pub fn check_shape(&self, expected: ImageShape) -> UqResult<()> {
        if self.shape != expected {
            return Err(UqError::shape_mismatch(expected, self.shape));
        }
        Ok(())
    }
}
