/// Data structures for serialsql
///
/// This module defines the values that cross the connection boundary:
/// parameters going in, engine results and materialized rows coming out,
/// batch commands and hook events.
use bytes::{BufMut, Bytes, BytesMut};
use std::ops::Index;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Element type of a [`TypedView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl ElementKind {
    /// Size of one element in bytes.
    pub fn width(self) -> usize {
        match self {
            ElementKind::U8 | ElementKind::I8 => 1,
            ElementKind::U16 | ElementKind::I16 => 2,
            ElementKind::U32 | ElementKind::I32 | ElementKind::F32 => 4,
            ElementKind::U64 | ElementKind::I64 | ElementKind::F64 => 8,
        }
    }
}

/// A typed window over a shared byte buffer.
///
/// Several views may share one buffer. The engine never receives a view
/// directly; the sanitizer swaps it for the bytes it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedView {
    buffer: Bytes,
    byte_offset: usize,
    len: usize,
    kind: ElementKind,
}

impl TypedView {
    /// View `len` elements of `kind` starting at `byte_offset` in `buffer`.
    ///
    /// Returns an error if the window does not fit inside the buffer.
    pub fn new(buffer: Bytes, byte_offset: usize, len: usize, kind: ElementKind) -> Result<Self> {
        let end = len
            .checked_mul(kind.width())
            .and_then(|n| n.checked_add(byte_offset));
        match end {
            Some(end) if end <= buffer.len() => Ok(Self {
                buffer,
                byte_offset,
                len,
                kind,
            }),
            _ => Err(Error::InvalidArgument(format!(
                "view of {len} {kind:?} elements at offset {byte_offset} exceeds buffer of {} bytes",
                buffer.len()
            ))),
        }
    }

    /// Byte view over a whole buffer.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let buffer = data.into();
        let len = buffer.len();
        Self {
            buffer,
            byte_offset: 0,
            len,
            kind: ElementKind::U8,
        }
    }

    /// Little-endian `i32` view.
    pub fn from_i32s(values: &[i32]) -> Self {
        let mut buf = BytesMut::with_capacity(values.len() * 4);
        for v in values {
            buf.put_i32_le(*v);
        }
        Self {
            buffer: buf.freeze(),
            byte_offset: 0,
            len: values.len(),
            kind: ElementKind::I32,
        }
    }

    /// Little-endian `f64` view.
    pub fn from_f64s(values: &[f64]) -> Self {
        let mut buf = BytesMut::with_capacity(values.len() * 8);
        for v in values {
            buf.put_f64_le(*v);
        }
        Self {
            buffer: buf.freeze(),
            byte_offset: 0,
            len: values.len(),
            kind: ElementKind::F64,
        }
    }

    /// Narrow this view to `len` elements starting at element `start`.
    ///
    /// The result must lie inside this view.
    pub fn subview(&self, start: usize, len: usize) -> Result<Self> {
        let byte_offset = start
            .checked_add(len)
            .filter(|end| *end <= self.len)
            .and_then(|_| start.checked_mul(self.kind.width()))
            .and_then(|skip| skip.checked_add(self.byte_offset))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "subview of {len} elements at {start} exceeds view of {} elements",
                    self.len
                ))
            })?;
        Self::new(self.buffer.clone(), byte_offset, len, self.kind)
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Number of elements in the view.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    pub fn byte_len(&self) -> usize {
        self.len * self.kind.width()
    }

    /// The whole shared buffer, including bytes outside the view.
    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    /// The bytes covered by the view. Shares memory with the buffer.
    pub fn to_bytes(&self) -> Bytes {
        self.buffer
            .slice(self.byte_offset..self.byte_offset + self.byte_len())
    }
}

/// A single query parameter or result value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Scalar {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    /// Canonical binary form.
    Blob(Bytes),
    /// Typed binary view; replaced by `Blob` before reaching the engine.
    View(TypedView),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Integer(v) => Some(*v),
            Scalar::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Real(v) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            Scalar::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Scalar::Blob(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Integer(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Integer(i64::from(v))
    }
}

impl From<u32> for Scalar {
    fn from(v: u32) -> Self {
        Scalar::Integer(i64::from(v))
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Real(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

impl From<Vec<u8>> for Scalar {
    fn from(v: Vec<u8>) -> Self {
        Scalar::Blob(Bytes::from(v))
    }
}

impl From<Bytes> for Scalar {
    fn from(v: Bytes) -> Self {
        Scalar::Blob(v)
    }
}

impl From<TypedView> for Scalar {
    fn from(v: TypedView) -> Self {
        Scalar::View(v)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(v: Option<T>) -> Self {
        v.map_or(Scalar::Null, Into::into)
    }
}

/// Conversion into an optional positional parameter list.
///
/// `()` means "no parameters" and yields `None`; an empty `Vec` means "zero
/// parameters" and yields `Some(vec![])`. The engine may treat the two
/// differently.
pub trait IntoParams {
    fn into_params(self) -> Option<Vec<Scalar>>;
}

impl IntoParams for () {
    fn into_params(self) -> Option<Vec<Scalar>> {
        None
    }
}

impl<T: Into<Scalar>> IntoParams for Vec<T> {
    fn into_params(self) -> Option<Vec<Scalar>> {
        Some(self.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Scalar>, const N: usize> IntoParams for [T; N] {
    fn into_params(self) -> Option<Vec<Scalar>> {
        Some(self.into_iter().map(Into::into).collect())
    }
}

impl IntoParams for Option<Vec<Scalar>> {
    fn into_params(self) -> Option<Vec<Scalar>> {
        self
    }
}

/// Per-column description of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    /// Name used for the column in this result set.
    pub name: String,
    /// Declared type, or `UNKNOWN` for computed values.
    pub column_type: String,
    pub index: usize,
}

/// Result as produced by an engine, before materialization.
///
/// `raw_rows` is positional and parallel to `column_names`. It is consumed by
/// the materializer and never handed to callers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineResult {
    pub rows_affected: u64,
    pub insert_id: Option<i64>,
    pub column_names: Vec<String>,
    pub raw_rows: Option<Vec<Vec<Scalar>>>,
    pub metadata: Option<Vec<ColumnMetadata>>,
}

/// A materialized row: column name to value, in result-set column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    fields: Vec<(Arc<str>, Scalar)>,
}

static NULL: Scalar = Scalar::Null;

impl Row {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.fields
            .iter()
            .find(|(name, _)| name.as_ref() == column)
            .map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, column: &str) -> Option<&mut Scalar> {
        self.fields
            .iter_mut()
            .find(|(name, _)| name.as_ref() == column)
            .map(|(_, value)| value)
    }

    /// Set `column` to `value`.
    ///
    /// An existing column keeps its position and the previous value is
    /// returned; a new column is appended.
    pub fn insert(&mut self, column: impl Into<Arc<str>>, value: Scalar) -> Option<Scalar> {
        let column = column.into();
        match self.get_mut(&column) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((column, value));
                None
            }
        }
    }

    pub fn remove(&mut self, column: &str) -> Option<Scalar> {
        let idx = self.fields.iter().position(|(name, _)| name.as_ref() == column)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_ref())
    }

    pub fn values(&self) -> impl Iterator<Item = &Scalar> {
        self.fields.iter().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.fields.iter().map(|(name, value)| (name.as_ref(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Index<&str> for Row {
    type Output = Scalar;

    /// Missing columns read as `Null`.
    fn index(&self, column: &str) -> &Scalar {
        self.get(column).unwrap_or(&NULL)
    }
}

/// Caller-facing query result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub insert_id: Option<i64>,
    pub rows_affected: u64,
    pub rows: Vec<Row>,
    pub column_names: Vec<String>,
    pub metadata: Option<Vec<ColumnMetadata>>,
}

/// Result of the raw-row mode: positional values plus column names.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRows {
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Scalar>>,
}

/// Parameters for one batch command.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchParams {
    /// Execute once with these parameters.
    Single(Vec<Scalar>),
    /// Execute once per inner list. An empty outer list executes nothing.
    Many(Vec<Vec<Scalar>>),
}

/// One `(sql, params?)` entry of `execute_batch`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchCommand {
    pub sql: String,
    pub params: Option<BatchParams>,
}

impl BatchCommand {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: None,
        }
    }

    pub fn with_params(sql: impl Into<String>, params: impl IntoParams) -> Self {
        Self {
            sql: sql.into(),
            params: params.into_params().map(BatchParams::Single),
        }
    }

    pub fn with_rows(sql: impl Into<String>, rows: Vec<Vec<Scalar>>) -> Self {
        Self {
            sql: sql.into(),
            params: Some(BatchParams::Many(rows)),
        }
    }

    /// Flatten into one engine call per parameter row.
    pub fn into_arguments(self) -> Vec<BatchArguments> {
        match self.params {
            None => vec![BatchArguments {
                sql: self.sql,
                params: None,
            }],
            Some(BatchParams::Single(params)) => vec![BatchArguments {
                sql: self.sql,
                params: Some(params),
            }],
            Some(BatchParams::Many(rows)) => rows
                .into_iter()
                .map(|params| BatchArguments {
                    sql: self.sql.clone(),
                    params: Some(params),
                })
                .collect(),
        }
    }
}

/// A single statement execution inside an engine batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchArguments {
    pub sql: String,
    pub params: Option<Vec<Scalar>>,
}

/// Outcome of `execute_batch` and `load_file`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchResult {
    pub rows_affected: u64,
    /// Number of statement executions performed.
    pub commands: usize,
}

/// Kind of row change reported by the update hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperation {
    Insert,
    Update,
    Delete,
}

impl UpdateOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateOperation::Insert => "INSERT",
            UpdateOperation::Update => "UPDATE",
            UpdateOperation::Delete => "DELETE",
        }
    }
}

/// A row change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    pub table: String,
    pub operation: UpdateOperation,
    /// Affected row id, when the engine knows it.
    pub row_id: Option<i64>,
}

/// Arguments of `Connection::attach`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachOptions {
    pub secondary_db_file_name: String,
    pub alias: String,
    /// Directory of the secondary database; defaults to the connection's location.
    pub location: Option<String>,
}

/// Engine-side identifier of a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(pub Uuid);

impl StatementId {
    pub fn new() -> Self {
        StatementId(Uuid::new_v4())
    }
}

impl Default for StatementId {
    fn default() -> Self {
        Self::new()
    }
}
