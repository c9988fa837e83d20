use crate::{
    config::Config,
    error::TaskError,
    memory::{BYTES_PER_MB, MemoryEstimator},
    source::ImageGeometry,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub chunk_height: u32,
    pub chunk_count: u32,
    pub total_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRange {
    pub index: u32,
    pub start_row: u32, // 0-based inclusive
    pub rows: u32,
}

impl RowRange {
    pub fn end_row(&self) -> u32 {
        self.start_row + self.rows
    }
}

impl ChunkPlan {
    /// Rows per chunk come from the pixel budget, clamped to
    /// `[min_chunk_height, total_height]`. The last chunk takes the remainder.
    pub fn from_geometry(
        chunk_size_pixels: u64,
        min_chunk_height: u32,
        width: u32,
        total_height: u32,
    ) -> Result<Self, TaskError> {
        if width == 0 || total_height == 0 {
            return Err(TaskError::InvalidGeometry {
                width,
                height: total_height,
            });
        }

        let by_budget = (chunk_size_pixels / width as u64).min(u32::MAX as u64) as u32;
        let chunk_height = by_budget
            .max(min_chunk_height.max(1))
            .min(total_height);
        let chunk_count = total_height.div_ceil(chunk_height);

        Ok(Self {
            chunk_height,
            chunk_count,
            total_height,
        })
    }

    /// Whole image as one chunk.
    pub fn single(total_height: u32) -> Self {
        Self {
            chunk_height: total_height,
            chunk_count: 1,
            total_height,
        }
    }

    pub fn last_chunk_height(&self) -> u32 {
        self.total_height - self.chunk_height * (self.chunk_count - 1)
    }

    pub fn chunk(&self, index: u32) -> RowRange {
        let start_row = index * self.chunk_height;
        let rows = if index + 1 == self.chunk_count {
            self.last_chunk_height()
        } else {
            self.chunk_height
        };
        RowRange {
            index,
            start_row,
            rows,
        }
    }

    pub fn chunks(&self) -> impl Iterator<Item = RowRange> + '_ {
        (0..self.chunk_count).map(|i| self.chunk(i))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkReason {
    MemoryLimit,
    PixelBudget,
    Forced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkAssessment {
    pub estimate_mb: f64,
    pub reason: Option<ChunkReason>,
    pub plan: Option<ChunkPlan>,
}

#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    estimator: MemoryEstimator,
    memory_limit_mb: u64,
    chunk_size_pixels: u64,
    min_chunk_height: u32,
    force_chunking: bool,
}

impl ChunkPlanner {
    pub fn new(
        estimator: MemoryEstimator,
        memory_limit_mb: u64,
        chunk_size_pixels: u64,
        min_chunk_height: u32,
        force_chunking: bool,
    ) -> Self {
        Self {
            estimator,
            memory_limit_mb,
            chunk_size_pixels,
            min_chunk_height,
            force_chunking,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            MemoryEstimator::new(cfg.memory.working_set_multiplier),
            cfg.memory.memory_limit_mb,
            cfg.memory.chunk_size_pixels,
            cfg.memory.min_chunk_height,
            cfg.memory.force_chunking,
        )
    }

    pub fn assess(&self, geometry: &ImageGeometry) -> Result<ChunkAssessment, TaskError> {
        if geometry.width == 0
            || geometry.height == 0
            || geometry.channel_count == 0
            || geometry.bytes_per_channel == 0
        {
            return Err(TaskError::InvalidGeometry {
                width: geometry.width,
                height: geometry.height,
            });
        }

        let estimate_mb = self.estimator.estimate_geometry_mb(geometry);
        let reason = if self.force_chunking {
            Some(ChunkReason::Forced)
        } else if estimate_mb > self.memory_limit_mb as f64 {
            Some(ChunkReason::MemoryLimit)
        } else if self.chunk_size_pixels < geometry.pixel_count() {
            Some(ChunkReason::PixelBudget)
        } else {
            None
        };

        let pixels_per_chunk = if estimate_mb > self.memory_limit_mb as f64 {
            self.chunk_size_pixels.min(self.memory_limit_pixels(geometry))
        } else {
            self.chunk_size_pixels
        };

        let plan = match reason {
            Some(_) => Some(ChunkPlan::from_geometry(
                pixels_per_chunk,
                self.min_chunk_height,
                geometry.width,
                geometry.height,
            )?),
            None => None,
        };

        Ok(ChunkAssessment {
            estimate_mb,
            reason,
            plan,
        })
    }

    /// Pixels whose working set fits in `memory_limit_mb`.
    fn memory_limit_pixels(&self, geometry: &ImageGeometry) -> u64 {
        let per_pixel = geometry.bytes_per_pixel() as f64 * self.estimator.multiplier();
        (self.memory_limit_mb as f64 * BYTES_PER_MB / per_pixel) as u64
    }

    /// `None` means a single whole-buffer pass.
    pub fn plan(&self, geometry: &ImageGeometry) -> Result<Option<ChunkPlan>, TaskError> {
        Ok(self.assess(geometry)?.plan)
    }
}
