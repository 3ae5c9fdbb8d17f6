//! Segment identity and file naming

use std::path::PathBuf;

use crate::codec::SEGMENT_ID_LEN;

/// Unique segment identifier (UUID7-like: 48-bit timestamp + 80-bit random)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub u128);

impl SegmentId {
    pub fn new() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};

        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        let random_bits: u128 =
            ((rand::random::<u64>() as u128) << 16) | (rand::random::<u16>() as u128);

        Self((timestamp_ms << 80) | random_bits)
    }

    pub fn from_u128(id: u128) -> Self {
        Self(id)
    }

    /// Create from hex string (32 chars)
    pub fn from_hex(s: &str) -> Option<Self> {
        u128::from_str_radix(s, 16).ok().map(Self)
    }

    /// Convert to hex string (32 chars, zero-padded)
    pub fn to_hex(&self) -> String {
        format!("{:032x}", self.0)
    }

    /// Raw id as stored in codec headers
    pub fn to_bytes(&self) -> [u8; SEGMENT_ID_LEN] {
        self.0.to_be_bytes()
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        Self::new()
    }
}

/// A segment plus the suffix that scopes one format's files within it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentInfo {
    pub id: SegmentId,
    pub suffix: String,
}

impl SegmentInfo {
    pub fn new(id: SegmentId) -> Self {
        Self {
            id,
            suffix: String::new(),
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// `seg_{hex}`, the name every file of the segment starts with
    pub fn base_name(&self) -> String {
        format!("seg_{}", self.id.to_hex())
    }

    fn prefix(&self) -> String {
        if self.suffix.is_empty() {
            self.base_name()
        } else {
            format!("{}_{}", self.base_name(), self.suffix)
        }
    }

    pub fn files(&self) -> SegmentFiles {
        SegmentFiles {
            prefix: self.prefix(),
        }
    }
}

/// Paths for a segment's vector files
#[derive(Debug, Clone)]
pub struct SegmentFiles {
    prefix: String,
}

impl SegmentFiles {
    /// Quantization state file (one per segment)
    pub fn quantization_state(&self) -> PathBuf {
        PathBuf::from(format!("{}.qstate", self.prefix))
    }

    /// Native vector file for one field
    pub fn field_vectors(&self, field_id: u32) -> PathBuf {
        PathBuf::from(format!("{}_{}.nvi", self.prefix, field_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_file_names() {
        let seg = SegmentInfo::new(SegmentId::from_u128(0xab));
        let files = seg.files();
        assert_eq!(
            files.quantization_state(),
            PathBuf::from("seg_000000000000000000000000000000ab.qstate")
        );
        assert_eq!(
            files.field_vectors(3),
            PathBuf::from("seg_000000000000000000000000000000ab_3.nvi")
        );

        let seg = seg.with_suffix("knn0");
        assert_eq!(seg.base_name(), "seg_000000000000000000000000000000ab");
        assert_eq!(
            seg.files().quantization_state(),
            PathBuf::from("seg_000000000000000000000000000000ab_knn0.qstate")
        );
    }

    #[test]
    fn test_segment_id_hex() {
        let id = SegmentId::new();
        assert_eq!(SegmentId::from_hex(&id.to_hex()), Some(id));
        assert_eq!(id.to_bytes().len(), SEGMENT_ID_LEN);
    }
}
