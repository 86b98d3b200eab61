//! Serializes a convolutional classifier into a TFLite flatbuffer.
//!
//! Convolution weights arrive in `[out, in / groups, k, k]` order with batch
//! norm already folded into weights and bias. They are transposed here to
//! the layouts TFLite kernels read: `[out, k, k, in]` for `CONV_2D` and
//! `[1, k, k, out]` for `DEPTHWISE_CONV_2D`. Padding that `SAME` cannot
//! express is emitted as an explicit `PAD`. The head is
//! `MEAN -> FULLY_CONNECTED -> SOFTMAX`, float32 throughout, batch size 1.

use super::{
    ACTIVATION_NONE, ACTIVATION_RELU6, FILE_IDENTIFIER, PADDING_SAME, PADDING_VALID, SCHEMA_VERSION,
    TensorType, builtin_op, builtin_options,
};
use crate::error::{TrainingError, TrainingResult};
use flatbuffers::{FlatBufferBuilder, TableFinishedWIPOffset, WIPOffset};

/// Metadata entry holding the newline-separated class labels.
pub const LABELS_METADATA: &str = "shield_labels";

/// Vtable slot for the schema field with the given id.
const fn slot(field: u16) -> u16 {
    4 + 2 * field
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvKind {
    Standard,
    /// One filter per input channel (`groups == in_channels`).
    Depthwise,
}

/// A convolution with batch norm folded in.
#[derive(Debug, Clone)]
pub struct ConvLayer {
    pub kind: ConvKind,
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub stride: usize,
    /// Symmetric zero padding on each spatial edge.
    pub padding: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
    pub relu6: bool,
}

impl ConvLayer {
    fn weights_per_filter(&self) -> usize {
        let inputs = match self.kind {
            ConvKind::Standard => self.in_channels,
            ConvKind::Depthwise => 1,
        };
        inputs * self.kernel * self.kernel
    }

    fn validate(&self, channels: usize, name: &str) -> TrainingResult<()> {
        if self.in_channels != channels {
            return Err(TrainingError::Export(format!(
                "{name} expects {} input channels but receives {channels}",
                self.in_channels
            )));
        }
        if self.kernel == 0 || self.stride == 0 || self.out_channels == 0 {
            return Err(TrainingError::Export(format!("{name} has a zero-sized kernel, stride or output")));
        }
        if self.kind == ConvKind::Depthwise && self.out_channels % self.in_channels != 0 {
            return Err(TrainingError::Export(format!(
                "{name}: depthwise output channels {} are not a multiple of {}",
                self.out_channels, self.in_channels
            )));
        }
        let expected = self.out_channels * self.weights_per_filter();
        if self.weights.len() != expected {
            return Err(TrainingError::Export(format!(
                "{name}: expected {expected} weights, got {}",
                self.weights.len()
            )));
        }
        if self.bias.len() != self.out_channels {
            return Err(TrainingError::Export(format!(
                "{name}: expected {} bias values, got {}",
                self.out_channels,
                self.bias.len()
            )));
        }
        if self.weights.iter().chain(&self.bias).any(|v| !v.is_finite()) {
            return Err(TrainingError::Export(format!("{name} contains NaN or infinity")));
        }
        Ok(())
    }

    /// Reorders `[out, in/groups, k, k]` weights into the TFLite filter layout.
    #[must_use]
    pub fn tflite_weights(&self) -> Vec<f32> {
        let k = self.kernel;
        let mut out = vec![0.0; self.weights.len()];
        match self.kind {
            ConvKind::Standard => {
                let inputs = self.in_channels;
                for o in 0..self.out_channels {
                    for i in 0..inputs {
                        for y in 0..k {
                            for x in 0..k {
                                out[((o * k + y) * k + x) * inputs + i] = self.weights[((o * inputs + i) * k + y) * k + x];
                            }
                        }
                    }
                }
            }
            ConvKind::Depthwise => {
                let outputs = self.out_channels;
                for o in 0..outputs {
                    for y in 0..k {
                        for x in 0..k {
                            out[(y * k + x) * outputs + o] = self.weights[(o * k + y) * k + x];
                        }
                    }
                }
            }
        }
        out
    }

    fn filter_shape(&self) -> [usize; 4] {
        match self.kind {
            ConvKind::Standard => [self.out_channels, self.kernel, self.kernel, self.in_channels],
            ConvKind::Depthwise => [1, self.kernel, self.kernel, self.out_channels],
        }
    }
}

/// A run of convolutions, optionally wrapped in a skip connection.
#[derive(Debug, Clone)]
pub struct ConvBlock {
    pub layers: Vec<ConvLayer>,
    /// Adds the block input to its output.
    pub residual: bool,
}

/// Everything needed to write an exported classifier.
#[derive(Debug, Clone)]
pub struct ClassifierGraph {
    /// Square input resolution (RGB, NHWC).
    pub input_size: usize,
    pub labels: Vec<String>,
    pub description: String,
    pub blocks: Vec<ConvBlock>,
    /// Row-major `[labels, features]` dense weights.
    pub dense_weights: Vec<f32>,
    pub dense_bias: Vec<f32>,
}

#[derive(Debug, Clone, Copy)]
enum Options {
    Conv2d { padding: i8, stride: i32, activation: i8 },
    Depthwise { padding: i8, stride: i32, multiplier: i32, activation: i8 },
    Pad,
    Add,
    Mean,
    FullyConnected,
    Softmax,
}

impl Options {
    const fn opcode(self) -> i32 {
        match self {
            Self::Conv2d { .. } => builtin_op::CONV_2D,
            Self::Depthwise { .. } => builtin_op::DEPTHWISE_CONV_2D,
            Self::Pad => builtin_op::PAD,
            Self::Add => builtin_op::ADD,
            Self::Mean => builtin_op::MEAN,
            Self::FullyConnected => builtin_op::FULLY_CONNECTED,
            Self::Softmax => builtin_op::SOFTMAX,
        }
    }

    const fn union_type(self) -> u8 {
        match self {
            Self::Conv2d { .. } => builtin_options::CONV_2D,
            Self::Depthwise { .. } => builtin_options::DEPTHWISE_CONV_2D,
            Self::Pad => builtin_options::PAD,
            Self::Add => builtin_options::ADD,
            Self::Mean => builtin_options::REDUCER,
            Self::FullyConnected => builtin_options::FULLY_CONNECTED,
            Self::Softmax => builtin_options::SOFTMAX,
        }
    }

    fn write(self, fbb: &mut FlatBufferBuilder<'_>) -> WIPOffset<TableFinishedWIPOffset> {
        let start = fbb.start_table();
        match self {
            Self::Conv2d { padding, stride, activation } => {
                fbb.push_slot(slot(0), padding, 0);
                fbb.push_slot(slot(1), stride, 0);
                fbb.push_slot(slot(2), stride, 0);
                fbb.push_slot(slot(3), activation, 0);
                fbb.push_slot_always(slot(4), 1i32);
                fbb.push_slot_always(slot(5), 1i32);
            }
            Self::Depthwise { padding, stride, multiplier, activation } => {
                fbb.push_slot(slot(0), padding, 0);
                fbb.push_slot(slot(1), stride, 0);
                fbb.push_slot(slot(2), stride, 0);
                fbb.push_slot(slot(3), multiplier, 0);
                fbb.push_slot(slot(4), activation, 0);
                fbb.push_slot_always(slot(5), 1i32);
                fbb.push_slot_always(slot(6), 1i32);
            }
            Self::Mean => fbb.push_slot_always(slot(0), false),
            Self::Softmax => fbb.push_slot(slot(0), 1.0f32, 0.0),
            Self::Pad | Self::Add | Self::FullyConnected => {}
        }
        fbb.end_table(start)
    }
}

struct TensorDef {
    name: String,
    shape: Vec<i32>,
    dtype: TensorType,
    data: Vec<u8>,
}

struct OperatorDef {
    options: Options,
    inputs: Vec<i32>,
    outputs: Vec<i32>,
}

/// Spatial height, width and channel count of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Hwc(usize, usize, usize);

fn to_i32(value: usize, what: &str) -> TrainingResult<i32> {
    i32::try_from(value).map_err(|_| TrainingError::Export(format!("{what} {value} does not fit in a tensor dimension")))
}

fn dims(shape: &[usize]) -> TrainingResult<Vec<i32>> {
    shape.iter().map(|d| to_i32(*d, "dimension")).collect()
}

#[derive(Default)]
struct GraphBuilder {
    tensors: Vec<TensorDef>,
    operators: Vec<OperatorDef>,
}

impl GraphBuilder {
    fn push(&mut self, name: String, shape: &[usize], dtype: TensorType, data: Vec<u8>) -> TrainingResult<i32> {
        let index = to_i32(self.tensors.len(), "tensor index")?;
        self.tensors.push(TensorDef { name, shape: dims(shape)?, dtype, data });
        Ok(index)
    }

    fn activation(&mut self, name: String, shape: &[usize]) -> TrainingResult<i32> {
        self.push(name, shape, TensorType::Float32, Vec::new())
    }

    fn floats(&mut self, name: String, shape: &[usize], values: &[f32]) -> TrainingResult<i32> {
        self.push(name, shape, TensorType::Float32, values.iter().flat_map(|v| v.to_le_bytes()).collect())
    }

    fn ints(&mut self, name: String, shape: &[usize], values: &[i32]) -> TrainingResult<i32> {
        self.push(name, shape, TensorType::Int32, values.iter().flat_map(|v| v.to_le_bytes()).collect())
    }

    fn op(&mut self, options: Options, inputs: Vec<i32>, outputs: Vec<i32>) {
        self.operators.push(OperatorDef { options, inputs, outputs });
    }

    fn conv(&mut self, name: &str, input: i32, shape: Hwc, layer: &ConvLayer) -> TrainingResult<(i32, Hwc)> {
        let Hwc(mut height, mut width, channels) = shape;
        layer.validate(channels, name)?;

        let mut x = input;
        let padding = if layer.padding == 0 {
            PADDING_VALID
        } else if layer.stride == 1 && 2 * layer.padding + 1 == layer.kernel {
            PADDING_SAME
        } else {
            let p = to_i32(layer.padding, "padding")?;
            let paddings = self.ints(format!("{name}/pad/paddings"), &[4, 2], &[0, 0, p, p, p, p, 0, 0])?;
            height += 2 * layer.padding;
            width += 2 * layer.padding;
            let padded = self.activation(format!("{name}/pad"), &[1, height, width, channels])?;
            self.op(Options::Pad, vec![x, paddings], vec![padded]);
            x = padded;
            PADDING_VALID
        };

        let (out_h, out_w) = if padding == PADDING_SAME {
            (height, width)
        } else {
            if height < layer.kernel || width < layer.kernel {
                return Err(TrainingError::Export(format!(
                    "{name}: {height}x{width} input is smaller than its {k}x{k} kernel",
                    k = layer.kernel
                )));
            }
            ((height - layer.kernel) / layer.stride + 1, (width - layer.kernel) / layer.stride + 1)
        };

        let filter = self.floats(format!("{name}/weights"), &layer.filter_shape(), &layer.tflite_weights())?;
        let bias = self.floats(format!("{name}/bias"), &[layer.out_channels], &layer.bias)?;
        let output = self.activation(name.to_string(), &[1, out_h, out_w, layer.out_channels])?;

        let stride = to_i32(layer.stride, "stride")?;
        let activation = if layer.relu6 { ACTIVATION_RELU6 } else { ACTIVATION_NONE };
        let options = match layer.kind {
            ConvKind::Standard => Options::Conv2d { padding, stride, activation },
            ConvKind::Depthwise => Options::Depthwise {
                padding,
                stride,
                multiplier: to_i32(layer.out_channels / layer.in_channels, "depth multiplier")?,
                activation,
            },
        };
        self.op(options, vec![x, filter, bias], vec![output]);
        Ok((output, Hwc(out_h, out_w, layer.out_channels)))
    }
}

fn validate(graph: &ClassifierGraph) -> TrainingResult<()> {
    if graph.input_size == 0 {
        return Err(TrainingError::Export("input size must be positive".to_string()));
    }
    if graph.labels.is_empty() {
        return Err(TrainingError::Export("classifier has no labels".to_string()));
    }
    if graph.dense_bias.len() != graph.labels.len() {
        return Err(TrainingError::Export(format!(
            "expected {} dense bias values, got {}",
            graph.labels.len(),
            graph.dense_bias.len()
        )));
    }
    if graph.dense_weights.iter().chain(&graph.dense_bias).any(|v| !v.is_finite()) {
        return Err(TrainingError::Export("classifier parameters contain NaN or infinity".to_string()));
    }
    Ok(())
}

/// Lays out tensors and operators in execution order.
fn build(graph: &ClassifierGraph) -> TrainingResult<(GraphBuilder, i32, i32)> {
    validate(graph)?;
    let mut builder = GraphBuilder::default();
    let size = graph.input_size;
    let input = builder.activation("input".to_string(), &[1, size, size, 3])?;

    let mut x = input;
    let mut shape = Hwc(size, size, 3);
    for (b, block) in graph.blocks.iter().enumerate() {
        let (block_input, block_shape) = (x, shape);
        for (l, layer) in block.layers.iter().enumerate() {
            (x, shape) = builder.conv(&format!("block_{b}/conv_{l}"), x, shape, layer)?;
        }
        if block.residual {
            if shape != block_shape {
                return Err(TrainingError::Export(format!(
                    "block {b} changes shape from {block_shape:?} to {shape:?} and cannot be residual"
                )));
            }
            let sum = builder.activation(format!("block_{b}/add"), &[1, shape.0, shape.1, shape.2])?;
            builder.op(Options::Add, vec![block_input, x], vec![sum]);
            x = sum;
        }
    }

    let features = shape.2;
    let classes = graph.labels.len();
    if graph.dense_weights.len() != classes * features {
        return Err(TrainingError::Export(format!(
            "expected {} dense weights for {features} features, got {}",
            classes * features,
            graph.dense_weights.len()
        )));
    }

    let axes = builder.ints("pool/axes".to_string(), &[2], &[1, 2])?;
    let pooled = builder.activation("pool".to_string(), &[1, features])?;
    builder.op(Options::Mean, vec![x, axes], vec![pooled]);

    let weights = builder.floats("dense/weights".to_string(), &[classes, features], &graph.dense_weights)?;
    let bias = builder.floats("dense/bias".to_string(), &[classes], &graph.dense_bias)?;
    let logits = builder.activation("logits".to_string(), &[1, classes])?;
    builder.op(Options::FullyConnected, vec![pooled, weights, bias], vec![logits]);

    let probabilities = builder.activation("probabilities".to_string(), &[1, classes])?;
    builder.op(Options::Softmax, vec![logits], vec![probabilities]);

    Ok((builder, input, probabilities))
}

pub fn write_classifier(graph: &ClassifierGraph) -> TrainingResult<Vec<u8>> {
    let (builder, input, output) = build(graph)?;

    let payload_bytes: usize = builder.tensors.iter().map(|t| t.data.len()).sum();
    let mut fbb = FlatBufferBuilder::with_capacity(4096 + payload_bytes + 256 * builder.tensors.len());

    // Buffer 0 is the conventional empty sentinel; tensor i owns buffer i + 1.
    let labels_blob = graph.labels.join("\n").into_bytes();
    let payloads: Vec<&[u8]> = std::iter::once(&[][..])
        .chain(builder.tensors.iter().map(|t| t.data.as_slice()))
        .chain(std::iter::once(labels_blob.as_slice()))
        .collect();
    let labels_buffer = u32::try_from(payloads.len() - 1)
        .map_err(|_| TrainingError::Export("too many buffers".to_string()))?;

    let mut buffers = Vec::with_capacity(payloads.len());
    for payload in payloads {
        let data = (!payload.is_empty()).then(|| fbb.create_vector(payload));
        let start = fbb.start_table();
        if let Some(data) = data {
            fbb.push_slot_always(slot(0), data);
        }
        buffers.push(fbb.end_table(start));
    }

    let mut tensor_tables = Vec::with_capacity(builder.tensors.len());
    for (index, tensor) in (1u32..).zip(&builder.tensors) {
        let shape = fbb.create_vector(tensor.shape.as_slice());
        let name = fbb.create_string(&tensor.name);
        let start = fbb.start_table();
        fbb.push_slot_always(slot(0), shape);
        fbb.push_slot(slot(1), tensor.dtype.code(), 0);
        fbb.push_slot_always(slot(2), index);
        fbb.push_slot_always(slot(3), name);
        tensor_tables.push(fbb.end_table(start));
    }

    // Operator codes in order of first use.
    let mut codes: Vec<i32> = Vec::new();
    for op in &builder.operators {
        let code = op.options.opcode();
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    let mut operator_codes = Vec::with_capacity(codes.len());
    for &code in &codes {
        let start = fbb.start_table();
        fbb.push_slot(slot(0), code as i8, 0);
        fbb.push_slot(slot(2), 1i32, 1);
        fbb.push_slot(slot(3), code, 0);
        operator_codes.push(fbb.end_table(start));
    }

    let mut operators = Vec::with_capacity(builder.operators.len());
    for op in &builder.operators {
        let opcode_index = codes.iter().position(|c| *c == op.options.opcode()).unwrap_or_default() as u32;
        let options = op.options.write(&mut fbb);
        let inputs = fbb.create_vector(op.inputs.as_slice());
        let outputs = fbb.create_vector(op.outputs.as_slice());
        let start = fbb.start_table();
        fbb.push_slot(slot(0), opcode_index, 0);
        fbb.push_slot_always(slot(1), inputs);
        fbb.push_slot_always(slot(2), outputs);
        fbb.push_slot(slot(3), op.options.union_type(), 0);
        fbb.push_slot_always(slot(4), options);
        operators.push(fbb.end_table(start));
    }

    let tensors_vec = fbb.create_vector(tensor_tables.as_slice());
    let inputs = fbb.create_vector(&[input]);
    let outputs = fbb.create_vector(&[output]);
    let operators_vec = fbb.create_vector(operators.as_slice());
    let subgraph_name = fbb.create_string("main");
    let start = fbb.start_table();
    fbb.push_slot_always(slot(0), tensors_vec);
    fbb.push_slot_always(slot(1), inputs);
    fbb.push_slot_always(slot(2), outputs);
    fbb.push_slot_always(slot(3), operators_vec);
    fbb.push_slot_always(slot(4), subgraph_name);
    let subgraph = fbb.end_table(start);

    let metadata_name = fbb.create_string(LABELS_METADATA);
    let start = fbb.start_table();
    fbb.push_slot_always(slot(0), metadata_name);
    fbb.push_slot_always(slot(1), labels_buffer);
    let labels_metadata = fbb.end_table(start);

    let operator_codes_vec = fbb.create_vector(operator_codes.as_slice());
    let subgraphs = fbb.create_vector(&[subgraph]);
    let description = fbb.create_string(&graph.description);
    let buffers_vec = fbb.create_vector(buffers.as_slice());
    let metadata = fbb.create_vector(&[labels_metadata]);

    let start = fbb.start_table();
    fbb.push_slot_always(slot(0), SCHEMA_VERSION);
    fbb.push_slot_always(slot(1), operator_codes_vec);
    fbb.push_slot_always(slot(2), subgraphs);
    fbb.push_slot_always(slot(3), description);
    fbb.push_slot_always(slot(4), buffers_vec);
    fbb.push_slot_always(slot(6), metadata);
    let model = fbb.end_table(start);

    fbb.finish(model, Some(FILE_IDENTIFIER));
    Ok(fbb.finished_data().to_vec())
}
