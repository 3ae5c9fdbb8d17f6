//! Per-dimension statistics of the vectors written to a segment

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::types::SegmentInfo;
use super::vector_values::VectorValuesSupplier;
use crate::codec::{read_vlong, write_vlong};
use crate::{Error, Result};

/// Running statistics of one dimension
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionStats {
    pub count: u64,
    pub mean: f64,
    /// Sum of squared deviations from the mean
    m2: f64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
}

impl Default for DimensionStats {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }
}

impl DimensionStats {
    fn add(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
    }

    /// Population variance
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Statistics of one field's vectors in one segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentProfilerState {
    vectors: u64,
    dimensions: Vec<DimensionStats>,
}

impl SegmentProfilerState {
    pub fn new(dimension: usize) -> Self {
        Self {
            vectors: 0,
            dimensions: vec![DimensionStats::default(); dimension],
        }
    }

    /// Profile every vector of a fresh pass
    pub fn from_supplier(supplier: &dyn VectorValuesSupplier) -> Result<Self> {
        let mut state = Self::new(supplier.dimension());
        let mut values = supplier.values();
        while let Some((_, vector)) = values.next_vector()? {
            state.add(vector);
        }
        Ok(state)
    }

    pub fn add(&mut self, vector: &[f32]) {
        self.vectors += 1;
        for (stats, &v) in self.dimensions.iter_mut().zip(vector) {
            stats.add(v as f64);
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimensions.len()
    }

    pub fn vector_count(&self) -> u64 {
        self.vectors
    }

    pub fn dimensions(&self) -> &[DimensionStats] {
        &self.dimensions
    }

    /// `[dim: vlong][vectors: vlong]` then per dimension
    /// `[mean: f64][variance: f64][count: vlong][min: f64][max: f64][sum: f64]`
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(16 + self.dimensions.len() * 48);
        write_vlong(&mut out, self.dimensions.len() as u64)?;
        write_vlong(&mut out, self.vectors)?;
        for stats in &self.dimensions {
            out.write_f64::<LittleEndian>(stats.mean)?;
            out.write_f64::<LittleEndian>(stats.variance())?;
            write_vlong(&mut out, stats.count)?;
            out.write_f64::<LittleEndian>(stats.min)?;
            out.write_f64::<LittleEndian>(stats.max)?;
            out.write_f64::<LittleEndian>(stats.sum)?;
        }
        Ok(out)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let dim = read_vlong(&mut cursor)? as usize;
        // 40 fixed bytes plus at least one vlong byte per dimension
        if dim > data.len() / 41 {
            return Err(Error::Serialization(format!(
                "profile claims {} dimensions in {} bytes",
                dim,
                data.len()
            )));
        }
        let vectors = read_vlong(&mut cursor)?;
        let mut dimensions = Vec::with_capacity(dim);
        for _ in 0..dim {
            let mean = cursor.read_f64::<LittleEndian>()?;
            let variance = cursor.read_f64::<LittleEndian>()?;
            let count = read_vlong(&mut cursor)?;
            dimensions.push(DimensionStats {
                count,
                mean,
                m2: variance * count as f64,
                min: cursor.read_f64::<LittleEndian>()?,
                max: cursor.read_f64::<LittleEndian>()?,
                sum: cursor.read_f64::<LittleEndian>()?,
            });
        }
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest)?;
        if !rest.is_empty() {
            return Err(Error::Serialization(format!(
                "{} trailing bytes after profile",
                rest.len()
            )));
        }
        Ok(Self {
            vectors,
            dimensions,
        })
    }
}

type SegmentKey = (String, String);

fn segment_key(segment: &SegmentInfo) -> SegmentKey {
    (segment.base_name(), segment.suffix.clone())
}

/// Profiles of recently written segments, keyed by segment base name and
/// suffix. Owned by the caller and shared with the writers it creates.
#[derive(Debug, Default)]
pub struct ProfilerRegistry {
    segments: RwLock<FxHashMap<SegmentKey, FxHashMap<u32, SegmentProfilerState>>>,
}

impl ProfilerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh, empty entry for `segment`, dropping any previous one
    pub fn create(&self, segment: &SegmentInfo) {
        self.segments
            .write()
            .insert(segment_key(segment), FxHashMap::default());
    }

    pub fn record(&self, segment: &SegmentInfo, field_id: u32, state: SegmentProfilerState) {
        self.segments
            .write()
            .entry(segment_key(segment))
            .or_default()
            .insert(field_id, state);
    }

    pub fn get(&self, segment: &SegmentInfo, field_id: u32) -> Option<SegmentProfilerState> {
        self.segments
            .read()
            .get(&segment_key(segment))
            .and_then(|fields| fields.get(&field_id).cloned())
    }

    /// Field ids profiled for `segment`, ascending
    pub fn fields(&self, segment: &SegmentInfo) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .segments
            .read()
            .get(&segment_key(segment))
            .map(|fields| fields.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Drop everything recorded for `segment`; true if it was present
    pub fn clear(&self, segment: &SegmentInfo) -> bool {
        self.segments.write().remove(&segment_key(segment)).is_some()
    }

    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }
}
