//! Per-segment quantization state file: one blob per quantized field,
//! keyed by field id.

use rustc_hash::FxHashMap;

use super::types::SegmentInfo;
use crate::codec::IndexHeader;
use crate::directories::{Directory, DirectoryWriter, LazyFileHandle, OwnedBytes};
use crate::quantization::{QuantizationParams, QuantizationState};
use crate::structures::{BlobStoreReader, BlobStoreWriter};
use crate::{Error, Result};

pub const QUANTIZATION_STATE_CODEC: &str = "AnnexQuantizationState";
pub const QUANTIZATION_STATE_VERSION: i32 = 0;

fn state_header(segment: &SegmentInfo) -> IndexHeader {
    IndexHeader::new(
        QUANTIZATION_STATE_CODEC,
        QUANTIZATION_STATE_VERSION,
        segment.id.to_bytes(),
        segment.suffix.clone(),
    )
}

/// Writes a segment's quantization file.
///
/// The file is created on the first [`QuantizationStateWriter::write_state`];
/// a segment with no quantized field never gets one.
pub struct QuantizationStateWriter {
    segment: SegmentInfo,
    store: Option<BlobStoreWriter>,
    finished: bool,
}

impl QuantizationStateWriter {
    pub fn new(segment: SegmentInfo) -> Self {
        Self {
            segment,
            store: None,
            finished: false,
        }
    }

    /// Whether the file has been created
    pub fn is_open(&self) -> bool {
        self.store.is_some()
    }

    /// Append one field's state; returns the blob offset.
    pub async fn write_state<D: DirectoryWriter + ?Sized>(
        &mut self,
        dir: &D,
        field_id: u32,
        state: &QuantizationState,
    ) -> Result<u64> {
        if self.finished {
            return Err(Error::ProtocolViolation(
                "quantization state written after finish".into(),
            ));
        }
        let key = i32::try_from(field_id)
            .map_err(|_| Error::Internal(format!("field id {} exceeds i32", field_id)))?;
        let payload = state.to_bytes()?;
        if self.store.is_none() {
            let path = self.segment.files().quantization_state();
            log::debug!("creating quantization state file {:?}", path);
            let header = state_header(&self.segment);
            self.store = Some(BlobStoreWriter::create(dir, &path, &header).await?);
        }
        match self.store.as_mut() {
            Some(store) => store.append_record(key, &payload),
            None => Err(Error::Internal("quantization state file not open".into())),
        }
    }

    /// Write the index and footer if the file was created.
    ///
    /// Returns the file length, or `None` when nothing was written.
    pub fn finish(&mut self) -> Result<Option<u64>> {
        if self.finished {
            return Err(Error::ProtocolViolation(
                "quantization state writer finished twice".into(),
            ));
        }
        self.finished = true;
        match &mut self.store {
            Some(store) => Ok(Some(store.finish()?)),
            None => Ok(None),
        }
    }
}

/// Read side of a segment's quantization file
#[derive(Debug, Clone)]
pub struct QuantizationStateReader {
    store: BlobStoreReader,
}

impl QuantizationStateReader {
    /// Open the segment's quantization file; `None` if it does not exist.
    pub async fn open<D: Directory + ?Sized>(
        dir: &D,
        segment: &SegmentInfo,
    ) -> Result<Option<Self>> {
        let path = segment.files().quantization_state();
        if !dir.exists(&path).await? {
            log::debug!("no quantization state file {:?}", path);
            return Ok(None);
        }
        let handle = dir.open_lazy(&path).await?;
        Ok(Some(Self::from_handle(handle, segment).await?))
    }

    /// Open over an already located file
    pub async fn from_handle(handle: LazyFileHandle, segment: &SegmentInfo) -> Result<Self> {
        let store =
            BlobStoreReader::open(handle, &state_header(segment), QUANTIZATION_STATE_VERSION)
                .await?;
        Ok(Self { store })
    }

    /// Every field's raw state payload
    pub async fn read_all(&self) -> Result<FxHashMap<u32, OwnedBytes>> {
        let mut states = FxHashMap::default();
        for (key, payload) in self.store.read_all().await? {
            let field_id = u32::try_from(key)
                .map_err(|_| Error::corrupt(format!("negative field id {}", key)))?;
            states.entry(field_id).or_insert(payload);
        }
        Ok(states)
    }

    /// Read every state, degrading to an empty map when the file is
    /// missing or unreadable.
    pub async fn read_all_or_empty<D: Directory + ?Sized>(
        dir: &D,
        segment: &SegmentInfo,
    ) -> FxHashMap<u32, OwnedBytes> {
        Self::read_all_degraded(Self::open(dir, segment).await, segment).await
    }

    /// Every state of an opened (or failed to open) file; any error reads
    /// as no states.
    pub(crate) async fn read_all_degraded(
        opened: Result<Option<Self>>,
        segment: &SegmentInfo,
    ) -> FxHashMap<u32, OwnedBytes> {
        let result = match opened {
            Ok(Some(reader)) => reader.read_all().await,
            Ok(None) => Ok(FxHashMap::default()),
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            log::warn!(
                "ignoring unreadable quantization state of {}: {}",
                segment.base_name(),
                e
            );
            FxHashMap::default()
        })
    }

    /// Decode one field's state with the caller's params
    pub async fn read_one(
        &self,
        field_id: u32,
        params: &QuantizationParams,
    ) -> Result<QuantizationState> {
        let key = i32::try_from(field_id)
            .map_err(|_| Error::FieldNotFound(format!("field id {}", field_id)))?;
        match self.store.read_one(key).await? {
            Some(payload) => QuantizationState::from_bytes(params, &payload),
            None => Err(Error::FieldNotFound(format!(
                "no quantization state for field {}",
                field_id
            ))),
        }
    }

    /// Recompute the file checksum
    pub async fn verify(&self) -> Result<()> {
        self.store.verify().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directories::RamDirectory;
    use crate::quantization::{
        MultiBitScalarQuantizationState, OneBitScalarQuantizationState, ScalarQuantizationType,
    };
    use crate::segment::SegmentId;

    fn segment() -> SegmentInfo {
        SegmentInfo::new(SegmentId::from_u128(7)).with_suffix("v1")
    }

    fn one_bit(dim: usize) -> QuantizationState {
        QuantizationState::OneBit(OneBitScalarQuantizationState {
            params: QuantizationParams::new(ScalarQuantizationType::OneBit),
            mean_thresholds: vec![0.5; dim],
            below_threshold_means: vec![0.0; dim],
            above_threshold_means: vec![1.0; dim],
        })
    }

    fn four_bit(dim: usize) -> QuantizationState {
        QuantizationState::MultiBit(MultiBitScalarQuantizationState {
            params: QuantizationParams::new(ScalarQuantizationType::FourBit),
            thresholds: vec![vec![0.25; dim]; 4],
        })
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = RamDirectory::new();
        let seg = segment();
        let mut writer = QuantizationStateWriter::new(seg.clone());
        assert!(!writer.is_open());
        writer.write_state(&dir, 3, &four_bit(4)).await.unwrap();
        writer.write_state(&dir, 1, &one_bit(8)).await.unwrap();
        assert!(writer.is_open());
        assert!(writer.finish().unwrap().is_some());
        assert!(matches!(writer.finish(), Err(Error::ProtocolViolation(_))));
        assert!(matches!(
            writer.write_state(&dir, 5, &one_bit(8)).await,
            Err(Error::ProtocolViolation(_))
        ));

        let reader = QuantizationStateReader::open(&dir, &seg).await.unwrap().unwrap();
        let all = reader.read_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&3].as_slice(), four_bit(4).to_bytes().unwrap().as_slice());

        let four = QuantizationParams::new(ScalarQuantizationType::FourBit);
        let one = QuantizationParams::new(ScalarQuantizationType::OneBit);
        assert_eq!(reader.read_one(3, &four).await.unwrap(), four_bit(4));
        assert_eq!(reader.read_one(1, &one).await.unwrap(), one_bit(8));
        reader.verify().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_one_errors() {
        let dir = RamDirectory::new();
        let seg = segment();
        let mut writer = QuantizationStateWriter::new(seg.clone());
        writer.write_state(&dir, 1, &one_bit(4)).await.unwrap();
        writer.finish().unwrap();

        let reader = QuantizationStateReader::open(&dir, &seg).await.unwrap().unwrap();
        let one = QuantizationParams::new(ScalarQuantizationType::OneBit);
        assert!(matches!(
            reader.read_one(2, &one).await,
            Err(Error::FieldNotFound(_))
        ));
        let eight = QuantizationParams::new(ScalarQuantizationType::EightBit);
        assert!(matches!(
            reader.read_one(1, &eight).await,
            Err(Error::UnsupportedQuantizationType(8))
        ));
    }

    #[tokio::test]
    async fn test_unwritten_writer_creates_no_file() {
        let dir = RamDirectory::new();
        let seg = segment();
        let mut writer = QuantizationStateWriter::new(seg.clone());
        assert_eq!(writer.finish().unwrap(), None);
        assert!(
            !dir.exists(&seg.files().quantization_state())
                .await
                .unwrap()
        );
        assert!(QuantizationStateReader::open(&dir, &seg).await.unwrap().is_none());
        assert!(
            QuantizationStateReader::read_all_or_empty(&dir, &seg)
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_truncated_file_reads_as_empty() {
        let dir = RamDirectory::new();
        let seg = segment();
        let mut writer = QuantizationStateWriter::new(seg.clone());
        writer.write_state(&dir, 1, &one_bit(4)).await.unwrap();
        writer.write_state(&dir, 2, &four_bit(4)).await.unwrap();
        writer.finish().unwrap();

        let path = seg.files().quantization_state();
        let data = dir.open_read(&path).await.unwrap().bytes().to_vec();
        for cut in 0..data.len() {
            dir.write(&path, &data[..cut]).await.unwrap();
            let all = QuantizationStateReader::read_all_or_empty(&dir, &seg).await;
            assert!(all.is_empty(), "cut at {} produced {} states", cut, all.len());
        }
        dir.write(&path, &data).await.unwrap();
        assert_eq!(QuantizationStateReader::read_all_or_empty(&dir, &seg).await.len(), 2);
    }

    #[tokio::test]
    async fn test_degraded_read_swallows_open_errors() {
        let seg = segment();
        let failed: Result<Option<QuantizationStateReader>> =
            Err(Error::corrupt("bad footer"));
        assert!(
            QuantizationStateReader::read_all_degraded(failed, &seg)
                .await
                .is_empty()
        );
        assert!(
            QuantizationStateReader::read_all_degraded(Ok(None), &seg)
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_other_segment_header_rejected() {
        let dir = RamDirectory::new();
        let seg = segment();
        let mut writer = QuantizationStateWriter::new(seg.clone());
        writer.write_state(&dir, 1, &one_bit(4)).await.unwrap();
        writer.finish().unwrap();

        // Same file, different expected suffix
        let path = seg.files().quantization_state();
        let other = SegmentInfo::new(SegmentId::from_u128(7)).with_suffix("v2");
        let data = dir.open_read(&path).await.unwrap().bytes().to_vec();
        dir.write(&other.files().quantization_state(), &data).await.unwrap();
        assert!(QuantizationStateReader::open(&dir, &other).await.is_err());
    }
}
