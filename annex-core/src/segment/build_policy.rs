//! Per-field train/build decision taken at flush and merge time

/// What to do with one field's vectors in this flush or merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildDecision {
    pub train_quantizer: bool,
    pub build_index: bool,
}

impl BuildDecision {
    /// Quantized fields always build. Otherwise a negative threshold never
    /// builds and a non-negative one builds once `live_docs` reaches it.
    pub fn decide(quantized: bool, threshold: i64, live_docs: usize) -> Self {
        let build_index = if quantized {
            true
        } else if threshold < 0 {
            false
        } else {
            live_docs as u64 >= threshold as u64
        };
        Self {
            train_quantizer: quantized,
            build_index,
        }
    }
}
