use crate::source::ImageGeometry;

pub const DEFAULT_WORKING_SET_MULTIPLIER: f64 = 3.0;

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Predicts the working set of one transform: source buffer, intermediate
/// and output held at the same time.
#[derive(Debug, Clone, Copy)]
pub struct MemoryEstimator {
    working_set_multiplier: f64,
}

impl Default for MemoryEstimator {
    fn default() -> Self {
        Self {
            working_set_multiplier: DEFAULT_WORKING_SET_MULTIPLIER,
        }
    }
}

impl MemoryEstimator {
    pub fn new(working_set_multiplier: f64) -> Self {
        Self {
            working_set_multiplier,
        }
    }

    pub fn multiplier(&self) -> f64 {
        self.working_set_multiplier
    }

    pub fn estimate_mb(
        &self,
        width: u32,
        height: u32,
        channel_count: u8,
        bytes_per_channel: u8,
    ) -> f64 {
        width as f64
            * height as f64
            * channel_count as f64
            * bytes_per_channel as f64
            * self.working_set_multiplier
            / BYTES_PER_MB
    }

    pub fn estimate_geometry_mb(&self, geometry: &ImageGeometry) -> f64 {
        self.estimate_mb(
            geometry.width,
            geometry.height,
            geometry.channel_count,
            geometry.bytes_per_channel,
        )
    }
}
