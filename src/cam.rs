use burn::tensor::{backend::AutodiffBackend, ElementConversion, Tensor};
use image::{ImageBuffer, Luma, RgbImage, RgbaImage};

use crate::error::ExplainError;
use crate::model::{to_input_tensor, SpatialClassifier};
use crate::render::{render_heatmap, Colormap};

/// Raw class-activation map: one importance value per spatial location of the
/// target layer's output. Same spatial size as that output, typically much
/// smaller than the input image.
pub type ActivationMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Grad-CAM saliency engine.
///
/// Computes a class-activation map for one image by weighting the target
/// layer's activations with the spatial mean of its guided gradients, i.e.
/// gradients masked to locations where both the activation and the gradient
/// are positive.
///
/// The target layer is resolved once at construction and reused: the last
/// layer in definition order whose output tensor has 4 dimensions. A
/// classifier without any such layer cannot be explained
/// ([`ExplainError::NoSpatialLayer`]).
pub struct GradCam<B: AutodiffBackend, M: SpatialClassifier<B>> {
    model: M,
    device: B::Device,
    target: String,
    class_index: Option<usize>,
}

impl<B: AutodiffBackend, M: SpatialClassifier<B>> GradCam<B, M> {
    /// Wrap a classifier, resolving the target layer automatically.
    pub fn new(model: M, device: &B::Device) -> Result<Self, ExplainError> {
        let target = find_target_layer(&model)?;
        Ok(Self {
            model,
            device: device.clone(),
            target,
            class_index: None,
        })
    }

    /// Explain the given layer instead of the automatically resolved one.
    /// The layer must exist and have a 4D output.
    pub fn with_layer(mut self, layer: &str) -> Result<Self, ExplainError> {
        let known = self
            .model
            .layers()
            .into_iter()
            .any(|l| l.name == layer && l.is_spatial());
        if !known {
            return Err(ExplainError::UnknownLayer(layer.to_string()));
        }
        self.target = layer.to_string();
        Ok(self)
    }

    /// Explain the given class instead of the highest-probability one.
    pub fn with_class(mut self, index: usize) -> Result<Self, ExplainError> {
        let num_classes = self.model.num_classes();
        if index >= num_classes {
            return Err(ExplainError::InvalidClass { index, num_classes });
        }
        self.class_index = Some(index);
        Ok(self)
    }

    /// Name of the layer whose activations are explained.
    pub fn target_layer(&self) -> &str {
        &self.target
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Compute the raw class-activation map for one image.
    pub fn activation_map(&self, image: &RgbImage) -> Result<ActivationMap, ExplainError> {
        let input = to_input_tensor::<B>(image, self.model.input_size(), &self.device)?;

        // Split the forward pass at the target layer and re-enter the autodiff
        // graph there, so the backward pass yields d(loss)/d(features).
        let features = self
            .model
            .features(&self.target, input)?
            .detach()
            .require_grad();
        let probs = self.model.head(&self.target, features.clone())?;

        // Loss: probability of the explained class.
        let class = match self.class_index {
            Some(index) => index,
            None => argmax(probs.clone()),
        };
        let loss = probs.slice([0..1, class..class + 1]).sum();

        let grads = loss.backward();
        let grad = features
            .grad(&grads)
            .expect("target layer features are tracked for gradients");
        let activations = features.inner();

        // Guided gradients: only positive activations paired with positive
        // gradients contribute.
        let [_, channels, height, width] = activations.dims();
        let activations = activations.reshape([channels, height, width]);
        let grad = grad.reshape([channels, height, width]);
        let guided =
            activations.clone().greater_elem(0.0).float() * grad.clone().greater_elem(0.0).float() * grad;

        // Per-channel weights: spatial mean of the guided gradients.
        let weights = guided.mean_dim(1).mean_dim(2);

        // Weighted sum of the activations over channels.
        let cam = (activations * weights).sum_dim(0).reshape([height, width]);

        let data: Vec<f32> = cam.into_data().iter::<f32>().collect();
        Ok(ActivationMap::from_raw(width as u32, height as u32, data)
            .expect("activation map matches its tensor dimensions"))
    }

    /// Compute a display-ready RGBA heatmap for one image: the raw activation
    /// map, resized, normalized, colorized, with opacity derived from color.
    pub fn compute_heatmap(&self, image: &RgbImage) -> Result<RgbaImage, ExplainError> {
        let cam = self.activation_map(image)?;
        Ok(render_heatmap(&cam, self.model.input_size(), &Colormap::default()))
    }
}

/// Last layer in definition order with a 4D output, scanning from the end.
fn find_target_layer<B: AutodiffBackend, M: SpatialClassifier<B>>(
    model: &M,
) -> Result<String, ExplainError> {
    model
        .layers()
        .into_iter()
        .rev()
        .find(|layer| layer.is_spatial())
        .map(|layer| layer.name)
        .ok_or(ExplainError::NoSpatialLayer)
}

fn argmax<B: AutodiffBackend>(probs: Tensor<B, 2>) -> usize {
    probs.argmax(1).into_scalar().elem::<i64>() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LayerInfo;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::TensorData;

    type B = Autodiff<NdArray<f32>>;

    /// Test double with a fixed feature map and a hand-specified head:
    /// class 0 scores the sum of all features, class 1 its negation.
    struct StaticNet {
        feature_map: Vec<f32>,
        shape: [usize; 4],
    }

    impl StaticNet {
        fn new(feature_map: Vec<f32>, shape: [usize; 4]) -> Self {
            Self { feature_map, shape }
        }
    }

    impl SpatialClassifier<B> for StaticNet {
        fn layers(&self) -> Vec<LayerInfo> {
            vec![
                LayerInfo::new("stem", vec![1, 1, 4, 4]),
                LayerInfo::new("conv", self.shape.to_vec()),
                LayerInfo::new("output", vec![1, 2]),
            ]
        }

        fn input_size(&self) -> (u32, u32) {
            (4, 4)
        }

        fn num_classes(&self) -> usize {
            2
        }

        fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
            let features = self.features("conv", input).unwrap();
            self.head("conv", features).unwrap()
        }

        fn features(&self, layer: &str, input: Tensor<B, 4>) -> Result<Tensor<B, 4>, ExplainError> {
            if layer != "conv" {
                return Err(ExplainError::UnknownLayer(layer.to_string()));
            }
            Ok(Tensor::from_data(
                TensorData::new(self.feature_map.clone(), self.shape),
                &input.device(),
            ))
        }

        fn head(&self, layer: &str, features: Tensor<B, 4>) -> Result<Tensor<B, 2>, ExplainError> {
            if layer != "conv" {
                return Err(ExplainError::UnknownLayer(layer.to_string()));
            }
            let score = features.sum();
            let both = Tensor::cat(vec![score.clone(), score.neg()], 0);
            Ok(both.reshape([1, 2]))
        }
    }

    fn input_image() -> RgbImage {
        RgbImage::from_pixel(4, 4, image::Rgb([128, 128, 128]))
    }

    #[test]
    fn resolves_last_spatial_layer() {
        let device = Default::default();
        let net = StaticNet::new(vec![1.0; 4], [1, 1, 2, 2]);
        let cam = GradCam::new(net, &device).unwrap();
        assert_eq!(cam.target_layer(), "conv");
    }

    #[test]
    fn no_spatial_layer_is_fatal() {
        struct FlatNet;
        impl SpatialClassifier<B> for FlatNet {
            fn layers(&self) -> Vec<LayerInfo> {
                vec![
                    LayerInfo::new("fc1", vec![1, 16]),
                    LayerInfo::new("output", vec![1, 2]),
                ]
            }
            fn input_size(&self) -> (u32, u32) {
                (4, 4)
            }
            fn num_classes(&self) -> usize {
                2
            }
            fn forward(&self, _input: Tensor<B, 4>) -> Tensor<B, 2> {
                unreachable!()
            }
            fn features(
                &self,
                layer: &str,
                _input: Tensor<B, 4>,
            ) -> Result<Tensor<B, 4>, ExplainError> {
                Err(ExplainError::UnknownLayer(layer.to_string()))
            }
            fn head(
                &self,
                layer: &str,
                _features: Tensor<B, 4>,
            ) -> Result<Tensor<B, 2>, ExplainError> {
                Err(ExplainError::UnknownLayer(layer.to_string()))
            }
        }

        let device = Default::default();
        let err = GradCam::new(FlatNet, &device).unwrap_err();
        assert_eq!(err, ExplainError::NoSpatialLayer);
    }

    #[test]
    fn explicit_layer_must_be_spatial() {
        let device = Default::default();
        let net = StaticNet::new(vec![1.0; 4], [1, 1, 2, 2]);
        let err = GradCam::new(net, &device)
            .unwrap()
            .with_layer("output")
            .unwrap_err();
        assert_eq!(err, ExplainError::UnknownLayer("output".to_string()));
    }

    #[test]
    fn explicit_class_is_validated() {
        let device = Default::default();
        let net = StaticNet::new(vec![1.0; 4], [1, 1, 2, 2]);
        let err = GradCam::new(net, &device).unwrap().with_class(7).unwrap_err();
        assert_eq!(
            err,
            ExplainError::InvalidClass {
                index: 7,
                num_classes: 2
            }
        );
    }

    #[test]
    fn cam_weights_activations_by_mean_guided_gradient() {
        // Features [[1, -2], [3, 4]]; the class-0 loss is their sum, so the
        // gradient is 1 everywhere. Guided gradients keep only the positive
        // activations: mean weight 3/4, and the map is 0.75 * max(features
        // contribution) per location.
        let device = Default::default();
        let net = StaticNet::new(vec![1.0, -2.0, 3.0, 4.0], [1, 1, 2, 2]);
        let cam = GradCam::new(net, &device).unwrap();

        let map = cam.activation_map(&input_image()).unwrap();
        let values: Vec<f32> = map.pixels().map(|p| p.0[0]).collect();

        let expected = [0.75, -1.5, 2.25, 3.0];
        for (v, e) in values.iter().zip(expected) {
            assert!((v - e).abs() < 1e-6, "{v} != {e}");
        }
    }

    #[test]
    fn explained_class_changes_the_map() {
        // Class 1's score is the negated sum: all gradients are negative, the
        // guided-gradient mask zeroes everything, and the map is flat zero.
        let device = Default::default();
        let net = StaticNet::new(vec![1.0, -2.0, 3.0, 4.0], [1, 1, 2, 2]);
        let cam = GradCam::new(net, &device).unwrap().with_class(1).unwrap();

        let map = cam.activation_map(&input_image()).unwrap();
        assert!(map.pixels().all(|p| p.0[0] == 0.0));
    }

    #[test]
    fn rejects_non_native_image_size() {
        let device = Default::default();
        let net = StaticNet::new(vec![1.0; 4], [1, 1, 2, 2]);
        let cam = GradCam::new(net, &device).unwrap();

        let err = cam.activation_map(&RgbImage::new(8, 8)).unwrap_err();
        assert_eq!(
            err,
            ExplainError::InvalidImageShape {
                expected: (4, 4),
                got: (8, 8)
            }
        );
    }
}
