use crate::{
    codec::Collaborators,
    config::{CompressionMode, Config, DocumentType, ExecutionMode, Logging},
    orchestrator::Orchestrator,
    probe::probe_image,
    report::BatchReport,
    sampler::{ResourceSampler, SamplerSettings, SysinfoProbe},
    task::enumerate_tasks,
    util::ensure_dir,
};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "tranche.toml";
const FALLBACK_CONFIG: &str = "tranche.example.toml";

#[derive(Parser, Debug)]
#[command(name = "tranche", version)]
#[command(about = "Batch image transcoder with adaptive workers, chunked encoding and a quality gate")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Config TOML. Defaults to ./tranche.toml, then ./tranche.example.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level or filter directive; RUST_LOG wins when set.
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Backends, worker bounds and one resource sample.
    Doctor,
    /// Resolved configuration after defaults and overrides.
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Geometry, memory estimate and chunk plan per input, without encoding.
    Plan {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Transcode every input and write the batch report.
    Run {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Command-line values that take precedence over the config file.
#[derive(ClapArgs, Debug, Default, Clone)]
pub struct Overrides {
    #[arg(long, value_enum)]
    pub mode: Option<ExecutionMode>,
    #[arg(long, value_enum)]
    pub compression: Option<CompressionMode>,
    #[arg(long, value_enum)]
    pub document_type: Option<DocumentType>,
    /// Upper bound on concurrent workers.
    #[arg(long)]
    pub max_workers: Option<usize>,
    /// Re-encode inputs whose outputs already exist.
    #[arg(long)]
    pub overwrite: bool,
}

impl Overrides {
    pub fn apply(&self, cfg: &mut Config) -> Result<()> {
        if let Some(mode) = self.mode {
            cfg.global.mode = mode;
        }
        if let Some(mode) = self.compression {
            cfg.compression.mode = mode;
        }
        if let Some(doc) = self.document_type {
            cfg.compression.document_type = doc;
        }
        if let Some(n) = self.max_workers {
            cfg.workers.max_workers = n;
            cfg.workers.min_workers = cfg.workers.min_workers.min(n.max(1));
        }
        if self.overwrite {
            cfg.output.overwrite_existing = true;
        }
        cfg.validate().with_context(|| "command-line overrides")
    }
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let mut cfg = Config::load(&cfg_path)?;
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| cfg.logging.level.clone());

    match args.cmd {
        Command::Doctor => {
            let _guard = init_logging(&level, &cfg.logging, None)?;
            doctor(&cfg)
        }
        Command::Config { overrides } => {
            overrides.apply(&mut cfg)?;
            println!("{}", toml::to_string_pretty(&cfg)?);
            Ok(())
        }
        Command::Plan { input, overrides } => {
            overrides.apply(&mut cfg)?;
            let _guard = init_logging(&level, &cfg.logging, None)?;
            plan(&cfg, &input)
        }
        Command::Run {
            input,
            out_dir,
            overrides,
        } => {
            overrides.apply(&mut cfg)?;
            let job_dir = out_dir
                .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir))
                .join(&cfg.global.job_name);
            let _guard = init_logging(&level, &cfg.logging, log_file(&cfg.logging, &job_dir))?;
            info!(config = %cfg_path.display(), "configuration loaded");
            run(&cfg, &input, &job_dir)
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> PathBuf {
    match user {
        Some(p) => p.to_path_buf(),
        None if Path::new(DEFAULT_CONFIG).exists() => PathBuf::from(DEFAULT_CONFIG),
        None => PathBuf::from(FALLBACK_CONFIG),
    }
}

/// Only batch runs log to a file; `logging.file_path` overrides the
/// per-job default.
fn log_file(logging: &Logging, job_dir: &Path) -> Option<PathBuf> {
    match (logging.write_to_file, logging.file_path.as_str()) {
        (false, _) => None,
        (true, "") => Some(job_dir.join("logs").join("tranche.log")),
        (true, explicit) => Some(PathBuf::from(explicit)),
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn init_logging(
    level: &str,
    logging: &Logging,
    file: Option<PathBuf>,
) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log filter: {level}"))?;

    let mut layers: Vec<BoxedLayer> = Vec::with_capacity(2);
    layers.push(if logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
    });

    let mut guard = None;
    if let Some(path) = file {
        ensure_dir(path.parent().unwrap_or_else(|| Path::new(".")))?;
        let sink = std::fs::File::create(&path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (writer, g) = tracing_appender::non_blocking(sink);
        guard = Some(g);
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow!("logging already initialised: {e}"))?;
    Ok(guard)
}

fn doctor(cfg: &Config) -> Result<()> {
    let collaborators = Collaborators::reference(cfg.output.write_metadata);
    let sampler = ResourceSampler::new(
        Box::new(SysinfoProbe::new()),
        SamplerSettings {
            memory_threshold: cfg.workers.memory_threshold,
            ..SamplerSettings::default()
        },
    );
    let report = json!({
        "capabilities": collaborators.capabilities(),
        "logical_cpus": num_cpus::get(),
        "mode": cfg.global.mode,
        "compression": cfg.compression.mode,
        "workers": {
            "min": cfg.workers.min_workers,
            "max": cfg.effective_max_workers(),
        },
        "resources": sampler.sample(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn plan(cfg: &Config, input: &Path) -> Result<()> {
    let opener = Collaborators::reference(false).opener;
    let tasks = enumerate_tasks(cfg, input, Path::new(&cfg.paths.out_dir))?;
    let entries: Vec<_> = tasks
        .iter()
        .map(
            |task| match probe_image(cfg, opener.as_ref(), &task.source.path, task.source.page) {
                Ok(probe) => json!({ "task": task.id, "probe": probe }),
                Err(err) => {
                    warn!(path = %task.source.path.display(), "probe failed: {err:#}");
                    json!({ "task": task.id, "path": task.source.path, "error": format!("{err:#}") })
                }
            },
        )
        .collect();
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

fn run(cfg: &Config, input: &Path, job_dir: &Path) -> Result<()> {
    if !input.exists() {
        bail!("input does not exist: {}", input.display());
    }
    ensure_dir(job_dir)?;

    let tasks = enumerate_tasks(cfg, input, job_dir)?;
    info!(
        job = %cfg.global.job_name,
        input = %input.display(),
        out = %job_dir.display(),
        tasks = tasks.len(),
        "batch enumerated"
    );
    if tasks.is_empty() {
        warn!(pattern = %cfg.input.include_pattern, "no inputs matched");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .with_context(|| "building tokio runtime")?;

    let report = runtime.block_on(async {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling batch");
                on_signal.cancel();
            }
        });

        Orchestrator::new(
            cfg.clone(),
            Collaborators::reference(cfg.output.write_metadata),
            Box::new(SysinfoProbe::new()),
            cancel,
        )
        .run(tasks)
        .await
    });

    if cfg.output.write_report_json {
        let path = job_dir.join(&cfg.output.report_filename);
        write_report(&path, &report)?;
        info!(path = %path.display(), "report written");
    }

    if cfg.global.print_summary {
        let summary = json!({
            "job": cfg.global.job_name,
            "job_dir": job_dir,
            "counts": report.counts,
            "pool": report.pool,
            "cancelled": report.cancelled,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    if report.cancelled {
        bail!(
            "batch cancelled after {} of {} tasks",
            report.counts.total() - report.counts.cancelled,
            report.results.len()
        );
    }
    Ok(())
}

fn write_report(path: &Path, report: &BatchReport) -> Result<()> {
    let raw = serde_json::to_vec_pretty(report)?;
    std::fs::write(path, raw).with_context(|| format!("writing report: {}", path.display()))
}
