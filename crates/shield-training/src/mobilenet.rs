//! MobileNet-V2 in burn, plus its conversion into an exportable graph.
//!
//! Layout follows the reference network: a stride-2 stem, seventeen
//! inverted residual blocks, a 1x1 head convolution, global average pooling
//! and a dropout + linear classifier. Channel counts scale with the width
//! multiplier and are rounded to multiples of eight.

use crate::error::{TrainingError, TrainingResult};
use crate::tflite::writer::{ClassifierGraph, ConvBlock, ConvKind, ConvLayer};
use burn::{
    config::Config,
    module::Module,
    nn::{
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
    },
    tensor::{Tensor, backend::Backend},
};

/// Expansion factor, output channels, repeats and first stride per stage.
const INVERTED_RESIDUAL_SETTINGS: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

const STEM_CHANNELS: f64 = 32.0;
const HEAD_CHANNELS: f64 = 1280.0;

/// Rounds a scaled channel count to a multiple of eight, never dropping
/// more than 10% below the unrounded value.
fn make_divisible(value: f64) -> usize {
    let divisor = 8.0;
    let rounded = (((value + divisor / 2.0) / divisor).floor() * divisor).max(divisor);
    if rounded < 0.9 * value { (rounded + divisor) as usize } else { rounded as usize }
}

#[derive(Config, Debug)]
pub struct MobileNetV2Config {
    pub num_classes: usize,
    #[config(default = 1.0)]
    pub width_multiplier: f64,
    #[config(default = 0.2)]
    pub dropout: f64,
}

impl MobileNetV2Config {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MobileNetV2<B> {
        let width = self.width_multiplier;
        let mut channels = make_divisible(STEM_CHANNELS * width);
        let last = make_divisible(HEAD_CHANNELS * width.max(1.0));

        let stem = ConvBn::new(3, channels, 3, 2, 1, device);
        let mut blocks = Vec::new();
        for (expansion, c, repeats, first_stride) in INVERTED_RESIDUAL_SETTINGS {
            let output = make_divisible(c as f64 * width);
            for i in 0..repeats {
                let stride = if i == 0 { first_stride } else { 1 };
                blocks.push(InvertedResidual::new(channels, output, stride, expansion, device));
                channels = output;
            }
        }

        MobileNetV2 {
            stem,
            blocks,
            head: ConvBn::new(channels, last, 1, 1, 1, device),
            dropout: DropoutConfig::new(self.dropout).init(),
            classifier: LinearConfig::new(last, self.num_classes).init(device),
        }
    }
}

/// Convolution without bias followed by batch norm.
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> ConvBn<B> {
    fn new(input: usize, output: usize, kernel: usize, stride: usize, groups: usize, device: &B::Device) -> Self {
        let pad = kernel / 2;
        let conv = Conv2dConfig::new([input, output], [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(pad, pad))
            .with_groups(groups)
            .with_bias(false)
            .init(device);
        Self { conv, bn: BatchNormConfig::new(output).init(device) }
    }

    fn forward(&self, x: Tensor<B, 4>, relu6: bool) -> Tensor<B, 4> {
        let x = self.bn.forward(self.conv.forward(x));
        if relu6 { x.clamp(0.0, 6.0) } else { x }
    }

    fn in_channels(&self) -> usize {
        self.conv.weight.val().dims()[1] * self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.val().dims()[0]
    }

    /// Folds the batch norm running statistics into the convolution.
    fn fold(&self, relu6: bool) -> TrainingResult<ConvLayer> {
        let [out_channels, _, kernel, _] = self.conv.weight.val().dims();
        let mut weights = host_values(self.conv.weight.val())?;
        let gamma = host_values(self.bn.gamma.val())?;
        let beta = host_values(self.bn.beta.val())?;
        let mean = host_values(self.bn.running_mean.value())?;
        let var = host_values(self.bn.running_var.value())?;
        let epsilon = self.bn.epsilon as f32;

        let per_filter = weights.len() / out_channels;
        let mut bias = Vec::with_capacity(out_channels);
        for (o, filter) in weights.chunks_mut(per_filter).enumerate() {
            let scale = gamma[o] / (var[o] + epsilon).sqrt();
            filter.iter_mut().for_each(|w| *w *= scale);
            bias.push(beta[o] - mean[o] * scale);
        }

        Ok(ConvLayer {
            kind: if self.conv.groups > 1 { ConvKind::Depthwise } else { ConvKind::Standard },
            in_channels: self.in_channels(),
            out_channels,
            kernel,
            stride: self.conv.stride[0],
            padding: kernel / 2,
            weights,
            bias,
            relu6,
        })
    }
}

#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvBn<B>>,
    depthwise: ConvBn<B>,
    project: ConvBn<B>,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(input: usize, output: usize, stride: usize, expansion: usize, device: &B::Device) -> Self {
        let hidden = input * expansion;
        Self {
            expand: (expansion != 1).then(|| ConvBn::new(input, hidden, 1, 1, 1, device)),
            depthwise: ConvBn::new(hidden, hidden, 3, stride, hidden, device),
            project: ConvBn::new(hidden, output, 1, 1, 1, device),
        }
    }

    fn has_residual(&self) -> bool {
        let input = self.expand.as_ref().map_or_else(|| self.depthwise.in_channels(), ConvBn::in_channels);
        self.depthwise.conv.stride == [1, 1] && input == self.project.out_channels()
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input.clone();
        if let Some(expand) = &self.expand {
            x = expand.forward(x, true);
        }
        let x = self.project.forward(self.depthwise.forward(x, true), false);
        if self.has_residual() { x + input } else { x }
    }
}

#[derive(Module, Debug)]
pub struct MobileNetV2<B: Backend> {
    stem: ConvBn<B>,
    blocks: Vec<InvertedResidual<B>>,
    head: ConvBn<B>,
    dropout: Dropout,
    classifier: Linear<B>,
}

impl<B: Backend> MobileNetV2<B> {
    /// `[batch, 3, h, w]` images in [0, 1] to `[batch, classes]` logits.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.stem.forward(images, true);
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.head.forward(x, true);
        let [batch, channels, _, _] = x.dims();
        let pooled = x.mean_dim(3).mean_dim(2).reshape([batch, channels]);
        self.classifier.forward(self.dropout.forward(pooled))
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Inference graph with batch norm folded into each convolution.
    pub fn to_graph(&self, input_size: usize, labels: Vec<String>, description: String) -> TrainingResult<ClassifierGraph> {
        let mut blocks = Vec::with_capacity(self.blocks.len() + 2);
        blocks.push(ConvBlock { layers: vec![self.stem.fold(true)?], residual: false });
        for block in &self.blocks {
            let mut layers = Vec::with_capacity(3);
            if let Some(expand) = &block.expand {
                layers.push(expand.fold(true)?);
            }
            layers.push(block.depthwise.fold(true)?);
            layers.push(block.project.fold(false)?);
            blocks.push(ConvBlock { layers, residual: block.has_residual() });
        }
        blocks.push(ConvBlock { layers: vec![self.head.fold(true)?], residual: false });

        // Linear weights are stored [in, out]; the dense op reads [out, in].
        let [features, classes] = self.classifier.weight.val().dims();
        let weight = host_values(self.classifier.weight.val())?;
        let mut dense_weights = vec![0.0; weight.len()];
        for (i, row) in weight.chunks(classes).enumerate() {
            for (o, w) in row.iter().enumerate() {
                dense_weights[o * features + i] = *w;
            }
        }
        let dense_bias = match &self.classifier.bias {
            Some(bias) => host_values(bias.val())?,
            None => vec![0.0; classes],
        };

        Ok(ClassifierGraph { input_size, labels, description, blocks, dense_weights, dense_bias })
    }
}

fn host_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> TrainingResult<Vec<f32>> {
    tensor.into_data().to_vec::<f32>().map_err(|e| TrainingError::Export(format!("reading weights: {e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tflite::reader::parse_model;
    use crate::tflite::writer::write_classifier;
    use burn::backend::NdArray;
    use burn::backend::ndarray::NdArrayDevice;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_channel_rounding() {
        assert_eq!(make_divisible(32.0), 32);
        assert_eq!(make_divisible(32.0 * 0.35), 16);
        assert_eq!(make_divisible(24.0 * 0.35), 8);
        assert_eq!(make_divisible(160.0 * 0.35), 56);
        assert_eq!(make_divisible(3.0), 8);
    }

    #[test]
    fn test_forward_produces_one_row_per_image() {
        let device = NdArrayDevice::default();
        let model = MobileNetV2Config::new(3).with_width_multiplier(0.35).init::<TestBackend>(&device);
        assert_eq!(model.num_blocks(), 17);

        let images = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device);
        assert_eq!(model.forward(images).dims(), [2, 3]);
    }

    #[test]
    fn test_residual_blocks_match_reference_layout() {
        let device = NdArrayDevice::default();
        let model = MobileNetV2Config::new(2).init::<TestBackend>(&device);
        let residual = model.blocks.iter().filter(|b| b.has_residual()).count();
        assert_eq!(residual, 10);
        assert!(model.blocks[0].expand.is_none());
    }

    #[test]
    fn test_fresh_batch_norm_folds_to_scaled_weights() {
        let device = NdArrayDevice::default();
        let conv = ConvBn::<TestBackend>::new(4, 4, 3, 1, 4, &device);
        let original = host_values(conv.conv.weight.val()).unwrap();

        let layer = conv.fold(true).unwrap();
        assert_eq!(layer.kind, ConvKind::Depthwise);
        assert_eq!(layer.in_channels, 4);
        assert_eq!(layer.padding, 1);
        assert!(layer.bias.iter().all(|b| b.abs() < 1e-6));
        let scale = 1.0 / (1.0 + conv.bn.epsilon as f32).sqrt();
        for (folded, w) in layer.weights.iter().zip(&original) {
            assert!((folded - w * scale).abs() < 1e-6);
        }
    }

    #[test]
    fn test_default_network_exports_full_resolution_graph() {
        let device = NdArrayDevice::default();
        let model = MobileNetV2Config::new(2).init::<TestBackend>(&device);
        let labels = vec!["HALAL".to_string(), "HARAM".to_string()];

        let graph = model.to_graph(224, labels, "mobilenet".to_string()).unwrap();
        let info = parse_model(&write_classifier(&graph).unwrap()).unwrap();
        info.check_allocatable().unwrap();
        assert_eq!(info.input().unwrap().shape, vec![1, 224, 224, 3]);
        assert_eq!(info.output().unwrap().shape, vec![1, 2]);

        let pool = info.subgraphs[0].tensors.iter().find(|t| t.name == "pool").unwrap();
        assert_eq!(pool.shape, vec![1, 1280]);
    }
}
