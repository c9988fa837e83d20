#![allow(dead_code)]

use anyhow::{Result, bail};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tranche::{
    codec::{Analysis, Analyzer, EncodeParams, EncodedImage, Encoder, QualityMetrics, Strategy},
    config::Config,
    sampler::{Measurement, ResourceProbe},
    source::{ImageGeometry, InputSource, PixelRegion, RasterSource},
    task::{Task, TaskParams, TaskSource},
};

/// Gray image whose sample at (x, y) is `(x * 7 + y * 13) % 251`.
pub fn gradient(width: u32, height: u32) -> RasterSource {
    let data = (0..height)
        .flat_map(|y| (0..width).map(move |x| ((x * 7 + y * 13) % 251) as u8))
        .collect();
    RasterSource::new(ImageGeometry::new(width, height, 1, 1), data).unwrap()
}

/// Emits raw samples; optionally fails on the n-th call (1-based).
#[derive(Default)]
pub struct RawEncoder {
    pub fail_on_call: Option<usize>,
    pub calls: AtomicUsize,
    pub seen_rows: Mutex<Vec<u32>>,
}

impl RawEncoder {
    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Encoder for RawEncoder {
    fn name(&self) -> &str {
        "raw"
    }

    fn extension(&self, strategy: &Strategy) -> &'static str {
        if strategy.is_lossless() { "rawl" } else { "raw" }
    }

    fn encode(&self, region: &PixelRegion, _params: &EncodeParams) -> Result<Vec<u8>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen_rows.lock().push(region.rows);
        if self.fail_on_call == Some(n) {
            bail!("encoder rejected call {n}");
        }
        Ok(region.data.clone())
    }
}

/// Returns queued analyses in order and records which strategy each was for.
#[derive(Default)]
pub struct ScriptedAnalyzer {
    pub script: Mutex<VecDeque<Result<Analysis, String>>>,
    pub seen: Mutex<Vec<Strategy>>,
}

impl ScriptedAnalyzer {
    pub fn new(script: Vec<Result<Analysis, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }
}

impl Analyzer for ScriptedAnalyzer {
    fn name(&self) -> &str {
        "scripted"
    }

    fn analyze(&self, _original: &dyn InputSource, produced: &EncodedImage) -> Result<Analysis> {
        self.seen.lock().push(produced.strategy);
        match self.script.lock().pop_front() {
            Some(Ok(a)) => Ok(a),
            Some(Err(msg)) => bail!(msg),
            None => bail!("no scripted analysis left"),
        }
    }
}

pub fn analysis(psnr: f64, ssim: f64, ratio: f64) -> Analysis {
    Analysis {
        metrics: QualityMetrics {
            psnr,
            ssim,
            mse: 0.0,
        },
        achieved_ratio: ratio,
    }
}

pub struct FixedProbe(pub Measurement);

impl ResourceProbe for FixedProbe {
    fn measure(&mut self) -> Result<Measurement> {
        Ok(self.0)
    }
}

/// Succeeds `ok_calls` times, then fails forever.
pub struct FlakyProbe {
    pub ok_calls: usize,
    pub reading: Measurement,
}

impl ResourceProbe for FlakyProbe {
    fn measure(&mut self) -> Result<Measurement> {
        if self.ok_calls == 0 {
            bail!("probe unavailable");
        }
        self.ok_calls -= 1;
        Ok(self.reading)
    }
}

pub fn idle() -> Measurement {
    Measurement {
        cpu_fraction: 0.1,
        memory_fraction: 0.2,
    }
}

pub fn task(id: u64) -> Task {
    Task {
        id,
        source: TaskSource {
            path: PathBuf::from(format!("input-{id}.png")),
            page: None,
        },
        params: TaskParams::from_config(&Config::default()),
        out_dir: std::env::temp_dir(),
        output_stem: format!("input-{id}"),
        timeout: None,
    }
}
