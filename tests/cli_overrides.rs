use clap::Parser;
use tranche::cli::{Args, Command};
use tranche::config::{CompressionMode, Config, DocumentType, ExecutionMode};

#[test]
fn run_flags_override_config() {
    let args = Args::try_parse_from([
        "tranche",
        "run",
        "--input",
        "scans",
        "--mode",
        "sequential",
        "--compression",
        "ratio",
        "--document-type",
        "heritage_document",
        "--max-workers",
        "3",
        "--overwrite",
    ])
    .unwrap();
    let Command::Run { input, overrides, .. } = args.cmd else {
        panic!("expected run");
    };
    assert_eq!(input.to_str(), Some("scans"));

    let mut cfg = Config::default();
    cfg.workers.min_workers = 4;
    overrides.apply(&mut cfg).unwrap();
    assert_eq!(cfg.global.mode, ExecutionMode::Sequential);
    assert_eq!(cfg.compression.mode, CompressionMode::Ratio);
    assert_eq!(cfg.compression.document_type, DocumentType::HeritageDocument);
    assert_eq!((cfg.workers.min_workers, cfg.workers.max_workers), (3, 3));
    assert!(cfg.output.overwrite_existing);
}

#[test]
fn no_flags_leave_config_untouched() {
    let args = Args::try_parse_from(["tranche", "plan", "--input", "a.tif"]).unwrap();
    let Command::Plan { overrides, .. } = args.cmd else {
        panic!("expected plan");
    };
    let mut cfg = Config::default();
    overrides.apply(&mut cfg).unwrap();
    assert_eq!(cfg.global.mode, ExecutionMode::Parallel);
    assert_eq!(cfg.compression.mode, CompressionMode::Supervised);
    assert!(!cfg.output.overwrite_existing);
}

#[test]
fn global_options_work_after_subcommand() {
    let args = Args::try_parse_from(["tranche", "doctor", "--log-level", "debug"]).unwrap();
    assert!(matches!(args.cmd, Command::Doctor));
    assert_eq!(args.log_level.as_deref(), Some("debug"));
}

#[test]
fn unknown_mode_is_rejected() {
    assert!(Args::try_parse_from(["tranche", "run", "--input", "x", "--mode", "turbo"]).is_err());
}
