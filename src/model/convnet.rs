use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};

use super::{LayerInfo, SpatialClassifier};
use crate::error::ExplainError;

/// Channels produced by each convolutional block.
const CHANNELS: [usize; 3] = [16, 32, 64];
/// Width of the hidden fully-connected layer.
const HIDDEN: usize = 128;
/// Overall spatial reduction after the three 2x2 max-pools.
const POOLING: usize = 8;

/// Names of the spatial layers, in definition order. `features`/`head` can
/// split the forward pass after any of these.
const CONV_LAYERS: [&str; 3] = ["conv1", "conv2", "conv3"];

/// Small convolutional grade classifier: three conv/pool blocks followed by
/// two linear layers, softmax output.
#[derive(Module, Debug)]
pub struct ConvNet<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    pool: MaxPool2d,
    relu: Relu,
    fc1: Linear<B>,
    output: Linear<B>,
}

impl<B: Backend> ConvNet<B> {
    /// Run conv/pool blocks `from..to` (0-based block indices).
    fn forward_blocks(&self, input: Tensor<B, 4>, from: usize, to: usize) -> Tensor<B, 4> {
        let mut x = input;
        for block in from..to {
            let conv = match block {
                0 => &self.conv1,
                1 => &self.conv2,
                _ => &self.conv3,
            };
            x = self.pool.forward(self.relu.forward(conv.forward(x)));
        }
        x
    }

    fn forward_classifier(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        // Reshape [B, C, H, W] -> [B, C * H * W]
        let x: Tensor<B, 2> = features.flatten(1, 3);
        let x = self.relu.forward(self.fc1.forward(x));
        softmax(self.output.forward(x), 1)
    }

    /// Index one past the named conv block, or `None` for non-spatial names.
    fn conv_depth(layer: &str) -> Option<usize> {
        CONV_LAYERS.iter().position(|&name| name == layer).map(|i| i + 1)
    }
}

impl<B: Backend> SpatialClassifier<B> for ConvNet<B> {
    fn layers(&self) -> Vec<LayerInfo> {
        let (width, height) = self.input_size();
        let (width, height) = (width as usize, height as usize);
        vec![
            LayerInfo::new("conv1", vec![1, CHANNELS[0], height / 2, width / 2]),
            LayerInfo::new("conv2", vec![1, CHANNELS[1], height / 4, width / 4]),
            LayerInfo::new("conv3", vec![1, CHANNELS[2], height / 8, width / 8]),
            LayerInfo::new("fc1", vec![1, HIDDEN]),
            LayerInfo::new("output", vec![1, self.num_classes()]),
        ]
    }

    fn input_size(&self) -> (u32, u32) {
        // fc1 consumes the flattened conv3 output: CHANNELS[2] * (side / 8)^2
        let [d_input, _d_output] = self.fc1.weight.dims();
        let cells = d_input / CHANNELS[2];
        let side = (cells as f64).sqrt() as u32 * POOLING as u32;
        (side, side)
    }

    fn num_classes(&self) -> usize {
        let [_d_input, d_output] = self.output.weight.dims();
        d_output
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.forward_blocks(input, 0, CONV_LAYERS.len());
        self.forward_classifier(x)
    }

    fn features(&self, layer: &str, input: Tensor<B, 4>) -> Result<Tensor<B, 4>, ExplainError> {
        let depth = Self::conv_depth(layer)
            .ok_or_else(|| ExplainError::UnknownLayer(layer.to_string()))?;
        Ok(self.forward_blocks(input, 0, depth))
    }

    fn head(&self, layer: &str, features: Tensor<B, 4>) -> Result<Tensor<B, 2>, ExplainError> {
        let depth = Self::conv_depth(layer)
            .ok_or_else(|| ExplainError::UnknownLayer(layer.to_string()))?;
        let x = self.forward_blocks(features, depth, CONV_LAYERS.len());
        Ok(self.forward_classifier(x))
    }
}

/// [ConvNet](ConvNet) configuration.
#[derive(Debug, Config)]
pub struct ConvNetConfig {
    /// Number of output classes (grades).
    #[config(default = "5")]
    num_classes: usize,

    /// Native (square) spatial input size. Must be a multiple of 8.
    #[config(default = "224")]
    input_size: usize,
}

impl ConvNetConfig {
    /// Initialize a new [ConvNet](ConvNet) module.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvNet<B> {
        assert!(
            self.input_size % POOLING == 0,
            "ConvNet input size must be a multiple of {POOLING}"
        );

        let conv = |c_in, c_out| {
            Conv2dConfig::new([c_in, c_out], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };

        let pooled = self.input_size / POOLING;

        ConvNet {
            conv1: conv(3, CHANNELS[0]),
            conv2: conv(CHANNELS[0], CHANNELS[1]),
            conv3: conv(CHANNELS[1], CHANNELS[2]),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            relu: Relu::new(),
            fc1: LinearConfig::new(CHANNELS[2] * pooled * pooled, HIDDEN).init(device),
            output: LinearConfig::new(HIDDEN, self.num_classes).init(device),
        }
    }
}
