mod common;

use anyhow::bail;
use tokio_util::sync::CancellationToken;
use tranche::{
    chunk_plan::ChunkPlan,
    error::TaskError,
    pipeline::{ChunkSink, RasterSink, StreamingTransformPipeline, StripSink},
    source::{InputSource, PixelRegion},
};

fn reassemble(source: &dyn InputSource, plan: Option<&ChunkPlan>) -> PixelRegion {
    let mut sink = RasterSink::new(source.geometry());
    StreamingTransformPipeline::process(
        source,
        plan,
        |region, _| Ok(region.clone()),
        &mut sink,
        &CancellationToken::new(),
    )
    .unwrap();
    sink.into_region().unwrap()
}

#[test]
fn chunked_output_matches_whole_buffer() {
    let source = common::gradient(100, 1000);
    let plan = ChunkPlan::from_geometry(10_000, 1, 100, 1000).unwrap();
    assert_eq!(plan.chunk_height, 100);
    assert_eq!(plan.chunk_count, 10);

    let whole = reassemble(&source, None);
    let chunked = reassemble(&source, Some(&plan));
    assert_eq!(whole, chunked);
    assert_eq!(chunked.data, source.data());
}

#[test]
fn uneven_plans_match_whole_buffer() {
    let source = common::gradient(37, 101);
    let whole = reassemble(&source, None);
    for pixels in [37u64, 100, 1_000, 3_700, 1_000_000] {
        let plan = ChunkPlan::from_geometry(pixels, 1, 37, 101).unwrap();
        assert_eq!(reassemble(&source, Some(&plan)), whole, "budget {pixels}");
    }
}

#[test]
fn peak_memory_is_one_chunk() {
    let source = common::gradient(100, 1000);
    let plan = ChunkPlan::from_geometry(10_000, 1, 100, 1000).unwrap();
    let mut sink = StripSink::default();
    let stats = StreamingTransformPipeline::process(
        &source,
        Some(&plan),
        |region, _| Ok(region.data.clone()),
        &mut sink,
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(stats.chunks, 10);
    assert_eq!(stats.peak_chunk_bytes, 100 * 100);

    let strips = sink.into_strips();
    assert_eq!(strips.len(), 10);
    assert!(strips.windows(2).all(|w| w[0].start_row + w[0].rows == w[1].start_row));
}

#[derive(Default)]
struct CountingSink {
    accepted: Vec<u32>,
    discarded: bool,
}

impl ChunkSink<usize> for CountingSink {
    fn accept(&mut self, range: &tranche::chunk_plan::RowRange, _item: usize) -> anyhow::Result<()> {
        self.accepted.push(range.index);
        Ok(())
    }

    fn discard(&mut self) {
        self.accepted.clear();
        self.discarded = true;
    }
}

#[test]
fn failing_chunk_aborts_and_discards() {
    let source = common::gradient(10, 100);
    let plan = ChunkPlan::from_geometry(100, 1, 10, 100).unwrap();
    let mut sink = CountingSink::default();
    let err = StreamingTransformPipeline::process(
        &source,
        Some(&plan),
        |region, range| {
            if range.index == 4 {
                bail!("bad chunk");
            }
            Ok(region.byte_len())
        },
        &mut sink,
        &CancellationToken::new(),
    )
    .unwrap_err();

    assert!(matches!(err, TaskError::ChunkProcessing { index: 4, .. }));
    assert!(sink.discarded);
    assert!(sink.accepted.is_empty());
}

#[test]
fn cancellation_stops_before_next_chunk() {
    let source = common::gradient(10, 100);
    let plan = ChunkPlan::from_geometry(100, 1, 10, 100).unwrap();
    let cancel = CancellationToken::new();
    let mut sink = CountingSink::default();
    let err = StreamingTransformPipeline::process(
        &source,
        Some(&plan),
        |region, range| {
            if range.index == 2 {
                cancel.cancel();
            }
            Ok(region.byte_len())
        },
        &mut sink,
        &cancel,
    )
    .unwrap_err();

    assert!(matches!(err, TaskError::Cancelled));
    assert!(sink.discarded);
}

#[test]
fn mismatched_plan_is_rejected() {
    let source = common::gradient(10, 100);
    let plan = ChunkPlan::from_geometry(100, 1, 10, 50).unwrap();
    let mut sink = CountingSink::default();
    let err = StreamingTransformPipeline::process(
        &source,
        Some(&plan),
        |region, _| Ok(region.byte_len()),
        &mut sink,
        &CancellationToken::new(),
    )
    .unwrap_err();
    assert!(matches!(err, TaskError::InvalidGeometry { .. }));
}
