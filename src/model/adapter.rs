use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::RgbImage;

use crate::error::ExplainError;

/// Descriptor for one named layer of a classifier: its name and the shape of
/// its output for a batch of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub output_shape: Vec<usize>,
}

impl LayerInfo {
    pub fn new(name: impl Into<String>, output_shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            output_shape,
        }
    }

    /// Whether this layer produces spatial activations (a 4D output tensor).
    pub fn is_spatial(&self) -> bool {
        self.output_shape.len() == 4
    }
}

/// Capability interface over an opaque image classifier.
///
/// The classifier maps a `[1, 3, H, W]` float input (raw 0..255 pixel values;
/// any rescaling lives inside the model) to a `[1, num_classes]` probability
/// vector, and exposes its internal layers so that one forward pass can be
/// split at a named spatial layer: `head(layer, features(layer, input))` must
/// equal `forward(input)`. The split is what lets the saliency engine re-enter
/// the autodiff graph at the target layer.
pub trait SpatialClassifier<B: Backend> {
    /// Layer descriptors in definition order.
    fn layers(&self) -> Vec<LayerInfo>;

    /// Native spatial input size `(width, height)`.
    fn input_size(&self) -> (u32, u32);

    fn num_classes(&self) -> usize;

    /// Full forward pass to per-class probabilities.
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Activations of the named spatial layer for the given input.
    fn features(&self, layer: &str, input: Tensor<B, 4>) -> Result<Tensor<B, 4>, ExplainError>;

    /// Remainder of the network, from the named layer's output to the
    /// probability vector.
    fn head(&self, layer: &str, features: Tensor<B, 4>) -> Result<Tensor<B, 2>, ExplainError>;

    /// Classify an image, returning the per-class probabilities.
    fn predict(&self, image: &RgbImage, device: &B::Device) -> Result<Vec<f32>, ExplainError> {
        let input = to_input_tensor::<B>(image, self.input_size(), device)?;
        Ok(self.forward(input).into_data().iter::<f32>().collect())
    }

    /// Activations of the named spatial layer for an image.
    fn activations(
        &self,
        layer: &str,
        image: &RgbImage,
        device: &B::Device,
    ) -> Result<Tensor<B, 4>, ExplainError> {
        let input = to_input_tensor::<B>(image, self.input_size(), device)?;
        self.features(layer, input)
    }
}

/// Convert an image into the batch-of-one input tensor expected by a
/// classifier, validating its size first.
///
/// Pixel values are cast to float but kept in the 0..255 range.
pub fn to_input_tensor<B: Backend>(
    image: &RgbImage,
    expected: (u32, u32),
    device: &B::Device,
) -> Result<Tensor<B, 4>, ExplainError> {
    let got = image.dimensions();
    if got != expected {
        return Err(ExplainError::InvalidImageShape { expected, got });
    }

    let (width, height) = (got.0 as usize, got.1 as usize);
    let data: Vec<f32> = image.as_raw().iter().map(|&p| p as f32).collect();
    let tensor = Tensor::<B, 3>::from_data(
        TensorData::new(data, [height, width, 3]).convert::<B::FloatElem>(),
        device,
    );

    // [H, W, C] -> [C, H, W]
    Ok(tensor.permute([2, 0, 1]).unsqueeze::<4>())
}
