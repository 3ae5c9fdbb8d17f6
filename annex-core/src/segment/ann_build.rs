//! Index-build backends and per-field strategy selection.
//!
//! A backend consumes a field's vectors and returns the opaque index block
//! that the segment writer places between the flat file header and the raw
//! vectors. Backends are synchronous from the writer's point of view.

use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::config::{BuildMode, FieldVectorConfig};
use super::vector_values::VectorValuesSupplier;
use crate::quantization::QuantizationState;
use crate::{Error, Result};

/// Everything a backend needs to build one field's index
pub struct BuildRequest<'a> {
    pub field: &'a FieldVectorConfig,
    /// Each backend attempt takes a fresh pass from here
    pub vectors: &'a dyn VectorValuesSupplier,
    pub live_docs: usize,
    pub quantization: Option<&'a QuantizationState>,
}

/// A native index builder
pub trait NativeIndexBuilder: Send + Sync {
    fn name(&self) -> &str;

    /// Build the index block. Returns only on completion or failure.
    fn build(&self, request: &BuildRequest<'_>) -> Result<Vec<u8>>;
}

/// Backend chosen for one field when the writer is constructed
#[derive(Clone)]
pub enum BuildStrategy {
    Local(Arc<dyn NativeIndexBuilder>),
    Remote {
        remote: Arc<dyn NativeIndexBuilder>,
        fallback: Arc<dyn NativeIndexBuilder>,
    },
}

impl std::fmt::Debug for BuildStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStrategy::Local(b) => f.debug_tuple("Local").field(&b.name()).finish(),
            BuildStrategy::Remote { remote, fallback } => f
                .debug_struct("Remote")
                .field("remote", &remote.name())
                .field("fallback", &fallback.name())
                .finish(),
        }
    }
}

impl BuildStrategy {
    /// Run the build; a failed remote build is retried locally.
    pub fn build(&self, request: &BuildRequest<'_>) -> Result<Vec<u8>> {
        match self {
            BuildStrategy::Local(builder) => builder.build(request),
            BuildStrategy::Remote { remote, fallback } => match remote.build(request) {
                Ok(block) => Ok(block),
                Err(e) => {
                    log::warn!(
                        "remote build '{}' failed for field '{}', falling back to '{}': {}",
                        remote.name(),
                        request.field.name,
                        fallback.name(),
                        e
                    );
                    fallback.build(request)
                }
            },
        }
    }
}

/// Builders available to a segment writer
#[derive(Clone)]
pub struct BuildBackends {
    local: Arc<dyn NativeIndexBuilder>,
    remote: Option<Arc<dyn NativeIndexBuilder>>,
}

impl Default for BuildBackends {
    fn default() -> Self {
        Self {
            local: Arc::new(FlatCodeIndexBuilder),
            remote: None,
        }
    }
}

impl BuildBackends {
    pub fn new(local: Arc<dyn NativeIndexBuilder>) -> Self {
        Self {
            local,
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn NativeIndexBuilder>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn strategy_for(&self, field: &FieldVectorConfig) -> BuildStrategy {
        match (field.build_mode, &self.remote) {
            (BuildMode::Local, _) => BuildStrategy::Local(Arc::clone(&self.local)),
            (BuildMode::Remote, Some(remote)) => BuildStrategy::Remote {
                remote: Arc::clone(remote),
                fallback: Arc::clone(&self.local),
            },
            (BuildMode::Remote, None) => {
                log::warn!(
                    "field '{}' requests a remote build but no remote builder is configured, building locally",
                    field.name
                );
                BuildStrategy::Local(Arc::clone(&self.local))
            }
        }
    }
}

/// Identifies a flat-code index block
pub const FLAT_CODE_MAGIC: u32 = u32::from_le_bytes(*b"AxFC");

/// Block kinds
pub const FLAT_CODE_KIND_IDMAP: u8 = 0;
pub const FLAT_CODE_KIND_SCALAR: u8 = 1;

/// In-process backend: one packed scalar code per vector, in ordinal order.
///
/// ```text
/// [magic: u32][kind: u8][count: u64][dim: u32][bits: u8][code_len: u32]
/// [codes: count * code_len bytes]     // kind 1 only
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatCodeIndexBuilder;

impl NativeIndexBuilder for FlatCodeIndexBuilder {
    fn name(&self) -> &str {
        "flat-code"
    }

    fn build(&self, request: &BuildRequest<'_>) -> Result<Vec<u8>> {
        let fail = |reason: String| Error::IndexBuildFailure {
            field: request.field.name.clone(),
            reason,
        };
        if request.live_docs == 0 {
            return Err(fail("cannot build an index over zero vectors".into()));
        }
        let dim = request.vectors.dimension();
        let (kind, bits, code_len) = match request.quantization {
            Some(state) => {
                if state.dimension() != dim {
                    return Err(fail(format!(
                        "quantization state has dimension {}, field has {}",
                        state.dimension(),
                        dim
                    )));
                }
                (
                    FLAT_CODE_KIND_SCALAR,
                    state.params().sq_type.bits() as u8,
                    state.code_len(),
                )
            }
            None => (FLAT_CODE_KIND_IDMAP, 0, 0),
        };

        let mut out = Vec::with_capacity(22 + request.live_docs * code_len);
        out.write_u32::<LittleEndian>(FLAT_CODE_MAGIC)?;
        out.write_u8(kind)?;
        out.write_u64::<LittleEndian>(request.live_docs as u64)?;
        out.write_u32::<LittleEndian>(dim as u32)?;
        out.write_u8(bits)?;
        out.write_u32::<LittleEndian>(code_len as u32)?;

        let mut values = request.vectors.values();
        let mut count = 0usize;
        let mut code = vec![0u8; code_len];
        while let Some((_, vector)) = values.next_vector()? {
            if let Some(state) = request.quantization {
                state.quantize_into(vector, &mut code);
                out.write_all(&code)?;
            }
            count += 1;
        }
        if count != request.live_docs {
            return Err(fail(format!(
                "expected {} vectors, supplier yielded {}",
                request.live_docs, count
            )));
        }
        Ok(out)
    }
}

/// Parsed flat-code index block
#[derive(Debug, Clone, PartialEq)]
pub struct FlatCodeBlock {
    pub kind: u8,
    pub count: u64,
    pub dimension: u32,
    pub bits: u8,
    pub code_len: u32,
    pub codes: Vec<u8>,
}

impl FlatCodeBlock {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != FLAT_CODE_MAGIC {
            return Err(Error::corrupt(format!(
                "not a flat-code index block (magic {:#010x})",
                magic
            )));
        }
        let kind = cursor.read_u8()?;
        let count = cursor.read_u64::<LittleEndian>()?;
        let dimension = cursor.read_u32::<LittleEndian>()?;
        let bits = cursor.read_u8()?;
        let code_len = cursor.read_u32::<LittleEndian>()?;

        let mut codes = Vec::new();
        cursor.read_to_end(&mut codes)?;
        let expected = match kind {
            FLAT_CODE_KIND_IDMAP => 0,
            FLAT_CODE_KIND_SCALAR => count
                .checked_mul(code_len as u64)
                .ok_or_else(|| Error::corrupt("flat-code block size overflows"))?,
            other => return Err(Error::corrupt(format!("unknown flat-code kind {}", other))),
        };
        if codes.len() as u64 != expected {
            return Err(Error::corrupt(format!(
                "flat-code block holds {} code bytes, expected {}",
                codes.len(),
                expected
            )));
        }
        Ok(Self {
            kind,
            count,
            dimension,
            bits,
            code_len,
            codes,
        })
    }

    /// Packed code of the vector at `ord`
    pub fn code(&self, ord: usize) -> Option<&[u8]> {
        let len = self.code_len as usize;
        self.codes.get(ord * len..(ord + 1) * len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::{QuantizationParams, QuantizationService, ScalarQuantizationType};
    use crate::segment::FieldVectorBuffer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Failing(AtomicUsize);

    impl NativeIndexBuilder for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn build(&self, request: &BuildRequest<'_>) -> Result<Vec<u8>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(Error::IndexBuildFailure {
                field: request.field.name.clone(),
                reason: "unreachable".into(),
            })
        }
    }

    fn buffer(n: u32) -> FieldVectorBuffer {
        let mut b = FieldVectorBuffer::new(4);
        for i in 0..n {
            b.push(i, &[i as f32, 1.0, -(i as f32), 0.5]).unwrap();
        }
        b
    }

    #[test]
    fn test_scalar_block() {
        let field = FieldVectorConfig::new(1, "emb", 4);
        let b = buffer(10);
        let params = QuantizationParams::new(ScalarQuantizationType::FourBit);
        let state = QuantizationService::default().train(params, &b).unwrap();
        let request = BuildRequest {
            field: &field,
            vectors: &b,
            live_docs: 10,
            quantization: Some(&state),
        };
        let block = FlatCodeBlock::parse(&FlatCodeIndexBuilder.build(&request).unwrap()).unwrap();
        assert_eq!(block.kind, FLAT_CODE_KIND_SCALAR);
        assert_eq!((block.count, block.dimension, block.bits, block.code_len), (10, 4, 4, 2));
        assert_eq!(block.code(3).unwrap(), state.quantize(b.vector(3)).as_slice());
        assert!(block.code(10).is_none());
    }

    #[test]
    fn test_idmap_block_and_count_checks() {
        let field = FieldVectorConfig::new(1, "emb", 4);
        let b = buffer(3);
        let mut request = BuildRequest {
            field: &field,
            vectors: &b,
            live_docs: 3,
            quantization: None,
        };
        let block = FlatCodeBlock::parse(&FlatCodeIndexBuilder.build(&request).unwrap()).unwrap();
        assert_eq!(block.kind, FLAT_CODE_KIND_IDMAP);
        assert!(block.codes.is_empty());

        request.live_docs = 4;
        assert!(matches!(
            FlatCodeIndexBuilder.build(&request),
            Err(Error::IndexBuildFailure { .. })
        ));
        request.live_docs = 0;
        assert!(FlatCodeIndexBuilder.build(&request).is_err());
    }

    #[test]
    fn test_remote_falls_back_to_local() {
        let remote = Arc::new(Failing(AtomicUsize::new(0)));
        let backends = BuildBackends::default().with_remote(remote.clone());
        let field = FieldVectorConfig::new(1, "emb", 4).with_build_mode(BuildMode::Remote);
        let strategy = backends.strategy_for(&field);
        assert!(matches!(strategy, BuildStrategy::Remote { .. }));

        let b = buffer(5);
        let request = BuildRequest {
            field: &field,
            vectors: &b,
            live_docs: 5,
            quantization: None,
        };
        assert!(strategy.build(&request).is_ok());
        assert_eq!(remote.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remote_without_backend_builds_locally() {
        let field = FieldVectorConfig::new(1, "emb", 4).with_build_mode(BuildMode::Remote);
        let strategy = BuildBackends::default().strategy_for(&field);
        assert!(matches!(strategy, BuildStrategy::Local(_)));
    }
}
