//! Bounds-checked TFLite flatbuffer reader.
//!
//! Every offset is validated before it is followed, so truncated or hostile
//! files come back as `ModelFormatError` instead of a panic.

use super::{FILE_IDENTIFIER, TensorType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelFormatError {
    #[error("file is too small to be a TFLite model ({0} bytes)")]
    TooSmall(usize),

    #[error("missing TFL3 file identifier")]
    BadIdentifier,

    #[error("offset {offset} out of bounds while reading {what}")]
    OutOfBounds { what: &'static str, offset: usize },

    #[error("{0}")]
    Invalid(String),
}

type ReadResult<T> = std::result::Result<T, ModelFormatError>;

#[derive(Debug, Clone, Copy)]
struct Bytes<'a> {
    data: &'a [u8],
}

impl<'a> Bytes<'a> {
    fn slice(self, at: usize, len: usize, what: &'static str) -> ReadResult<&'a [u8]> {
        at.checked_add(len)
            .and_then(|end| self.data.get(at..end))
            .ok_or(ModelFormatError::OutOfBounds { what, offset: at })
    }

    fn array<const N: usize>(self, at: usize, what: &'static str) -> ReadResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(at, N, what)?);
        Ok(out)
    }

    fn u16(self, at: usize, what: &'static str) -> ReadResult<u16> {
        Ok(u16::from_le_bytes(self.array(at, what)?))
    }

    fn u32(self, at: usize, what: &'static str) -> ReadResult<u32> {
        Ok(u32::from_le_bytes(self.array(at, what)?))
    }

    fn i32(self, at: usize, what: &'static str) -> ReadResult<i32> {
        Ok(i32::from_le_bytes(self.array(at, what)?))
    }

    fn u64(self, at: usize, what: &'static str) -> ReadResult<u64> {
        Ok(u64::from_le_bytes(self.array(at, what)?))
    }

    /// Follow the unsigned offset stored at `at`.
    fn follow(self, at: usize, what: &'static str) -> ReadResult<usize> {
        let rel = self.u32(at, what)? as usize;
        at.checked_add(rel).ok_or(ModelFormatError::OutOfBounds { what, offset: at })
    }
}

#[derive(Debug, Clone, Copy)]
struct Table<'a> {
    buf: Bytes<'a>,
    pos: usize,
    vtable: usize,
    vtable_len: usize,
}

impl<'a> Table<'a> {
    fn at(buf: Bytes<'a>, pos: usize, what: &'static str) -> ReadResult<Self> {
        let soffset = i64::from(buf.i32(pos, what)?);
        let vtable = usize::try_from(pos as i64 - soffset)
            .map_err(|_| ModelFormatError::OutOfBounds { what, offset: pos })?;
        let vtable_len = usize::from(buf.u16(vtable, what)?);
        if vtable_len < 4 || vtable_len % 2 != 0 {
            return Err(ModelFormatError::Invalid(format!("malformed vtable for {what}")));
        }
        buf.slice(vtable, vtable_len, what)?;
        Ok(Self { buf, pos, vtable, vtable_len })
    }

    fn field(&self, index: usize) -> ReadResult<Option<usize>> {
        let entry = 4 + 2 * index;
        if entry + 2 > self.vtable_len {
            return Ok(None);
        }
        let off = usize::from(self.buf.u16(self.vtable + entry, "vtable entry")?);
        Ok((off != 0).then_some(self.pos + off))
    }

    fn u8_or(&self, index: usize, default: u8) -> ReadResult<u8> {
        match self.field(index)? {
            Some(at) => Ok(self.buf.slice(at, 1, "u8 field")?[0]),
            None => Ok(default),
        }
    }

    fn i8_or(&self, index: usize, default: i8) -> ReadResult<i8> {
        Ok(self.u8_or(index, default as u8)? as i8)
    }

    fn u32_or(&self, index: usize, default: u32) -> ReadResult<u32> {
        self.field(index)?.map_or(Ok(default), |at| self.buf.u32(at, "u32 field"))
    }

    fn i32_or(&self, index: usize, default: i32) -> ReadResult<i32> {
        self.field(index)?.map_or(Ok(default), |at| self.buf.i32(at, "i32 field"))
    }

    fn u64_or(&self, index: usize, default: u64) -> ReadResult<u64> {
        self.field(index)?.map_or(Ok(default), |at| self.buf.u64(at, "u64 field"))
    }

    fn vector(&self, index: usize, what: &'static str) -> ReadResult<Option<Vector<'a>>> {
        match self.field(index)? {
            Some(at) => Ok(Some(Vector::at(self.buf, self.buf.follow(at, what)?, what)?)),
            None => Ok(None),
        }
    }

    fn string(&self, index: usize, what: &'static str) -> ReadResult<Option<String>> {
        match self.vector(index, what)? {
            Some(v) => Ok(Some(String::from_utf8_lossy(v.bytes(1)?).into_owned())),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Vector<'a> {
    buf: Bytes<'a>,
    start: usize,
    len: usize,
    what: &'static str,
}

impl<'a> Vector<'a> {
    fn at(buf: Bytes<'a>, pos: usize, what: &'static str) -> ReadResult<Self> {
        let len = buf.u32(pos, what)? as usize;
        Ok(Self { buf, start: pos + 4, len, what })
    }

    fn bytes(&self, element_size: usize) -> ReadResult<&'a [u8]> {
        let total = self
            .len
            .checked_mul(element_size)
            .ok_or(ModelFormatError::OutOfBounds { what: self.what, offset: self.start })?;
        self.buf.slice(self.start, total, self.what)
    }

    fn i32s(&self) -> ReadResult<Vec<i32>> {
        Ok(self
            .bytes(4)?
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn tables(&self) -> ReadResult<Vec<Table<'a>>> {
        self.bytes(4)?;
        (0..self.len)
            .map(|i| {
                let slot = self.start + 4 * i;
                Table::at(self.buf, self.buf.follow(slot, self.what)?, self.what)
            })
            .collect()
    }
}

/// Shape and element type of one tensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Vec<i32>,
    pub dtype: TensorType,
    pub buffer: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorInfo {
    pub opcode_index: u32,
    pub inputs: Vec<i32>,
    pub outputs: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgraphInfo {
    pub name: Option<String>,
    pub tensors: Vec<TensorInfo>,
    pub inputs: Vec<i32>,
    pub outputs: Vec<i32>,
    pub operators: Vec<OperatorInfo>,
}

/// Decoded view of a TFLite model, sufficient to check it can be allocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub version: u32,
    pub description: Option<String>,
    /// Builtin operator code per opcode index.
    pub operator_codes: Vec<i32>,
    pub subgraphs: Vec<SubgraphInfo>,
    /// Byte length of each buffer's payload.
    pub buffer_sizes: Vec<usize>,
    /// Metadata entries as (name, buffer index).
    pub metadata: Vec<(String, u32)>,
    #[serde(skip)]
    buffer_data: Vec<Vec<u8>>,
}

impl ModelInfo {
    fn main_subgraph(&self) -> ReadResult<&SubgraphInfo> {
        self.subgraphs
            .first()
            .ok_or_else(|| ModelFormatError::Invalid("model has no subgraphs".to_string()))
    }

    fn tensor(&self, index: i32) -> ReadResult<&TensorInfo> {
        let subgraph = self.main_subgraph()?;
        usize::try_from(index)
            .ok()
            .and_then(|i| subgraph.tensors.get(i))
            .ok_or_else(|| ModelFormatError::Invalid(format!("tensor index {index} out of range")))
    }

    /// First input tensor of the main subgraph.
    pub fn input(&self) -> ReadResult<&TensorInfo> {
        let subgraph = self.main_subgraph()?;
        let index = *subgraph
            .inputs
            .first()
            .ok_or_else(|| ModelFormatError::Invalid("model has no input tensors".to_string()))?;
        self.tensor(index)
    }

    /// First output tensor of the main subgraph.
    pub fn output(&self) -> ReadResult<&TensorInfo> {
        let subgraph = self.main_subgraph()?;
        let index = *subgraph
            .outputs
            .first()
            .ok_or_else(|| ModelFormatError::Invalid("model has no output tensors".to_string()))?;
        self.tensor(index)
    }

    /// Payload of the metadata entry called `name`, if any.
    #[must_use]
    pub fn metadata_bytes(&self, name: &str) -> Option<&[u8]> {
        let (_, buffer) = self.metadata.iter().find(|(n, _)| n == name)?;
        self.buffer_data.get(*buffer as usize).map(Vec::as_slice)
    }

    /// Run the consistency checks an interpreter performs before allocating
    /// tensors.
    pub fn check_allocatable(&self) -> ReadResult<()> {
        let subgraph = self.main_subgraph()?;
        if subgraph.inputs.is_empty() {
            return Err(ModelFormatError::Invalid("model has no input tensors".to_string()));
        }
        if subgraph.outputs.is_empty() {
            return Err(ModelFormatError::Invalid("model has no output tensors".to_string()));
        }

        for (sg_index, sg) in self.subgraphs.iter().enumerate() {
            let tensor_count = sg.tensors.len();
            let valid = |i: i32| usize::try_from(i).is_ok_and(|i| i < tensor_count);

            for index in sg.inputs.iter().chain(&sg.outputs) {
                if !valid(*index) {
                    return Err(ModelFormatError::Invalid(format!(
                        "subgraph {sg_index} references missing tensor {index}"
                    )));
                }
            }

            for (t_index, tensor) in sg.tensors.iter().enumerate() {
                let size = self.buffer_sizes.get(tensor.buffer as usize).ok_or_else(|| {
                    ModelFormatError::Invalid(format!(
                        "tensor {t_index} ({}) references missing buffer {}",
                        tensor.name, tensor.buffer
                    ))
                })?;
                if tensor.shape.iter().any(|d| *d < 0) {
                    return Err(ModelFormatError::Invalid(format!(
                        "tensor {t_index} ({}) has a negative dimension",
                        tensor.name
                    )));
                }
                if *size > 0 {
                    if let Some(element) = tensor.dtype.element_size() {
                        let expected = tensor
                            .shape
                            .iter()
                            .try_fold(element, |acc, d| acc.checked_mul(*d as usize));
                        if expected != Some(*size) {
                            return Err(ModelFormatError::Invalid(format!(
                                "tensor {t_index} ({}) expects {} bytes but its buffer holds {size}",
                                tensor.name,
                                expected.map_or_else(|| "overflowing".to_string(), |e| e.to_string())
                            )));
                        }
                    }
                }
            }

            for (o_index, op) in sg.operators.iter().enumerate() {
                if op.opcode_index as usize >= self.operator_codes.len() {
                    return Err(ModelFormatError::Invalid(format!(
                        "operator {o_index} uses missing opcode {}",
                        op.opcode_index
                    )));
                }
                // -1 marks an omitted optional input.
                if let Some(bad) = op.inputs.iter().chain(&op.outputs).find(|i| **i != -1 && !valid(**i)) {
                    return Err(ModelFormatError::Invalid(format!(
                        "operator {o_index} references missing tensor {bad}"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn read_tensor(table: &Table<'_>) -> ReadResult<TensorInfo> {
    let shape = ints_at(table, 0, "tensor shape")?;
    let code = table.i8_or(1, 0)?;
    let dtype = TensorType::from_code(code)
        .ok_or_else(|| ModelFormatError::Invalid(format!("unknown tensor type {code}")))?;
    Ok(TensorInfo {
        name: table.string(3, "tensor name")?.unwrap_or_default(),
        shape,
        dtype,
        buffer: table.u32_or(2, 0)?,
    })
}

fn ints_at(table: &Table<'_>, index: usize, what: &'static str) -> ReadResult<Vec<i32>> {
    Ok(table.vector(index, what)?.map(|v| v.i32s()).transpose()?.unwrap_or_default())
}

fn tables_at<'a>(table: &Table<'a>, index: usize, what: &'static str) -> ReadResult<Vec<Table<'a>>> {
    Ok(table.vector(index, what)?.map(|v| v.tables()).transpose()?.unwrap_or_default())
}

fn read_operator(table: &Table<'_>) -> ReadResult<OperatorInfo> {
    Ok(OperatorInfo {
        opcode_index: table.u32_or(0, 0)?,
        inputs: ints_at(table, 1, "operator inputs")?,
        outputs: ints_at(table, 2, "operator outputs")?,
    })
}

fn read_subgraph(table: &Table<'_>) -> ReadResult<SubgraphInfo> {
    Ok(SubgraphInfo {
        tensors: tables_at(table, 0, "tensors")?.iter().map(read_tensor).collect::<ReadResult<_>>()?,
        inputs: ints_at(table, 1, "subgraph inputs")?,
        outputs: ints_at(table, 2, "subgraph outputs")?,
        operators: tables_at(table, 3, "operators")?.iter().map(read_operator).collect::<ReadResult<_>>()?,
        name: table.string(4, "subgraph name")?,
    })
}

fn read_buffer(buf: Bytes<'_>, table: &Table<'_>) -> ReadResult<Vec<u8>> {
    // Large models keep payloads outside the flatbuffer; offset 0/1 means inline.
    let offset = table.u64_or(1, 0)?;
    if offset > 1 {
        let size = table.u64_or(2, 0)?;
        let at = usize::try_from(offset)
            .map_err(|_| ModelFormatError::OutOfBounds { what: "external buffer", offset: usize::MAX })?;
        let len = usize::try_from(size)
            .map_err(|_| ModelFormatError::OutOfBounds { what: "external buffer", offset: at })?;
        return Ok(buf.slice(at, len, "external buffer")?.to_vec());
    }
    match table.vector(0, "buffer data")? {
        Some(v) => Ok(v.bytes(1)?.to_vec()),
        None => Ok(Vec::new()),
    }
}

/// Decode the model structure from raw file bytes.
pub fn parse_model(data: &[u8]) -> ReadResult<ModelInfo> {
    if data.len() < 8 {
        return Err(ModelFormatError::TooSmall(data.len()));
    }
    if &data[4..8] != FILE_IDENTIFIER.as_bytes() {
        return Err(ModelFormatError::BadIdentifier);
    }

    let buf = Bytes { data };
    let root = Table::at(buf, buf.follow(0, "model root")?, "model")?;

    let operator_codes = tables_at(&root, 1, "operator codes")?
        .iter()
        .map(|code| {
            let deprecated = i32::from(code.i8_or(0, 0)?);
            let builtin = code.i32_or(3, 0)?;
            Ok(deprecated.max(builtin))
        })
        .collect::<ReadResult<Vec<_>>>()?;

    let subgraphs = tables_at(&root, 2, "subgraphs")?
        .iter()
        .map(read_subgraph)
        .collect::<ReadResult<Vec<_>>>()?;

    let buffer_data = tables_at(&root, 4, "buffers")?
        .iter()
        .map(|t| read_buffer(buf, t))
        .collect::<ReadResult<Vec<_>>>()?;

    let metadata = tables_at(&root, 6, "metadata")?
        .iter()
        .map(|t| Ok((t.string(0, "metadata name")?.unwrap_or_default(), t.u32_or(1, 0)?)))
        .collect::<ReadResult<Vec<_>>>()?;

    Ok(ModelInfo {
        version: root.u32_or(0, 0)?,
        description: root.string(3, "description")?,
        operator_codes,
        subgraphs,
        buffer_sizes: buffer_data.iter().map(Vec::len).collect(),
        metadata,
        buffer_data,
    })
}
