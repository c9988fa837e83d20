use crate::{
    chunk_plan::{ChunkPlan, RowRange},
    codec::EncodedStrip,
    error::TaskError,
    source::{ImageGeometry, InputSource, PixelRegion},
};
use anyhow::{Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Receives transform output chunk by chunk, in row order.
pub trait ChunkSink<T> {
    fn accept(&mut self, range: &RowRange, item: T) -> Result<()>;

    /// Called when the pass is aborted; everything accepted so far is dropped.
    fn discard(&mut self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub chunks: u32,
    /// Largest source region held at once.
    pub peak_chunk_bytes: usize,
}

/// Applies a transform to an image either in one whole-buffer pass or as a
/// sequence of row bands. Bands of one image are never processed
/// concurrently and each band is released before the next one is read.
pub struct StreamingTransformPipeline;

impl StreamingTransformPipeline {
    pub fn process<T, F, S>(
        source: &dyn InputSource,
        plan: Option<&ChunkPlan>,
        mut transform: F,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<StreamStats, TaskError>
    where
        F: FnMut(&PixelRegion, &RowRange) -> Result<T>,
        S: ChunkSink<T> + ?Sized,
    {
        let geometry = source.geometry();
        if geometry.width == 0 || geometry.height == 0 {
            return Err(TaskError::InvalidGeometry {
                width: geometry.width,
                height: geometry.height,
            });
        }

        match plan {
            None => Self::whole(source, geometry, &mut transform, sink, cancel),
            Some(plan) => Self::chunked(source, geometry, plan, &mut transform, sink, cancel),
        }
    }

    fn whole<T, F, S>(
        source: &dyn InputSource,
        geometry: ImageGeometry,
        transform: &mut F,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<StreamStats, TaskError>
    where
        F: FnMut(&PixelRegion, &RowRange) -> Result<T>,
        S: ChunkSink<T> + ?Sized,
    {
        if cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        let range = RowRange {
            index: 0,
            start_row: 0,
            rows: geometry.height,
        };
        let region = source
            .read_rows(0, geometry.height)
            .map_err(TaskError::Source)?;
        let peak_chunk_bytes = region.byte_len();
        let item = transform(&region, &range).map_err(TaskError::Encode)?;
        drop(region);

        if let Err(err) = sink.accept(&range, item) {
            sink.discard();
            return Err(TaskError::Output(err));
        }
        Ok(StreamStats {
            chunks: 1,
            peak_chunk_bytes,
        })
    }

    fn chunked<T, F, S>(
        source: &dyn InputSource,
        geometry: ImageGeometry,
        plan: &ChunkPlan,
        transform: &mut F,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<StreamStats, TaskError>
    where
        F: FnMut(&PixelRegion, &RowRange) -> Result<T>,
        S: ChunkSink<T> + ?Sized,
    {
        if plan.total_height != geometry.height || plan.chunk_height == 0 {
            return Err(TaskError::InvalidGeometry {
                width: geometry.width,
                height: plan.total_height,
            });
        }

        let mut stats = StreamStats::default();
        for range in plan.chunks() {
            if cancel.is_cancelled() {
                debug!(chunk = range.index, "cancelled before chunk");
                sink.discard();
                return Err(TaskError::Cancelled);
            }

            let step = source
                .read_rows(range.start_row, range.rows)
                .and_then(|region| {
                    stats.peak_chunk_bytes = stats.peak_chunk_bytes.max(region.byte_len());
                    transform(&region, &range)
                })
                .and_then(|item| sink.accept(&range, item));

            if let Err(err) = step {
                warn!(
                    chunk = range.index,
                    start_row = range.start_row,
                    rows = range.rows,
                    "chunk failed; discarding partial output"
                );
                sink.discard();
                return Err(TaskError::ChunkProcessing {
                    index: range.index,
                    source: err,
                });
            }

            stats.chunks += 1;
            debug!(
                chunk = range.index,
                of = plan.chunk_count,
                rows = range.rows,
                "chunk done"
            );
        }
        Ok(stats)
    }
}

/// Reassembles raw pixel chunks into one buffer.
#[derive(Debug)]
pub struct RasterSink {
    geometry: ImageGeometry,
    next_row: u32,
    data: Vec<u8>,
}

impl RasterSink {
    pub fn new(geometry: ImageGeometry) -> Self {
        Self {
            geometry,
            next_row: 0,
            data: Vec::new(),
        }
    }

    pub fn rows_written(&self) -> u32 {
        self.next_row
    }

    pub fn into_region(self) -> Result<PixelRegion> {
        PixelRegion::new(
            self.geometry.width,
            self.next_row,
            self.geometry.channel_count,
            self.geometry.bytes_per_channel,
            self.data,
        )
    }
}

impl ChunkSink<PixelRegion> for RasterSink {
    fn accept(&mut self, range: &RowRange, item: PixelRegion) -> Result<()> {
        if range.start_row != self.next_row {
            bail!(
                "chunk {} starts at row {}, expected {}",
                range.index,
                range.start_row,
                self.next_row
            );
        }
        if item.width != self.geometry.width || item.rows != range.rows {
            bail!(
                "chunk {} is {}x{}, expected {}x{}",
                range.index,
                item.width,
                item.rows,
                self.geometry.width,
                range.rows
            );
        }
        self.data.extend_from_slice(&item.data);
        self.next_row = range.end_row();
        Ok(())
    }

    fn discard(&mut self) {
        self.data = Vec::new();
        self.next_row = 0;
    }
}

/// Collects encoded bytes, one strip per chunk.
#[derive(Debug, Default)]
pub struct StripSink {
    strips: Vec<EncodedStrip>,
}

impl StripSink {
    pub fn into_strips(self) -> Vec<EncodedStrip> {
        self.strips
    }

    pub fn encoded_bytes(&self) -> usize {
        self.strips.iter().map(|s| s.bytes.len()).sum()
    }
}

impl ChunkSink<Vec<u8>> for StripSink {
    fn accept(&mut self, range: &RowRange, item: Vec<u8>) -> Result<()> {
        if item.is_empty() {
            bail!("encoder produced no bytes for chunk {}", range.index);
        }
        self.strips.push(EncodedStrip {
            start_row: range.start_row,
            rows: range.rows,
            bytes: item,
        });
        Ok(())
    }

    fn discard(&mut self) {
        self.strips.clear();
    }
}
