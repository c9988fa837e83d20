use tranche::config::{CompressionMode, Config, DocumentType, ExecutionMode};

#[test]
fn parse_example_config() {
    let raw = include_str!("../tranche.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    cfg.validate().expect("example config is valid");
    assert_eq!(cfg.global.mode, ExecutionMode::Parallel);
    assert_eq!(cfg.compression.mode, CompressionMode::Supervised);
    assert!(!cfg.paths.out_dir.is_empty());
    assert!(cfg.effective_max_workers() >= cfg.workers.min_workers);
}

#[test]
fn partial_sections_fall_back_to_defaults() {
    let cfg: Config = toml::from_str(
        r#"
        [workers]
        max_workers = 4

        [compression]
        mode = "ratio"
        document_type = "grayscale"
        "#,
    )
    .expect("parse TOML");
    assert_eq!(cfg.workers.min_workers, 1);
    assert_eq!(cfg.workers.memory_threshold, 0.8);
    assert_eq!(cfg.effective_max_workers(), 4);
    assert_eq!(cfg.memory.chunk_size_pixels, 1_000_000);
    assert_eq!(cfg.compression.document_type, DocumentType::Grayscale);
    assert_eq!(cfg.target_ratio(), 16.0);
    assert_eq!(cfg.psnr_threshold(), 40.0);
}

#[test]
fn explicit_targets_override_document_type() {
    let mut cfg = Config::default();
    cfg.compression.document_type = DocumentType::HeritageDocument;
    assert_eq!(cfg.psnr_threshold(), 45.0);
    cfg.quality.psnr_threshold = 38.0;
    cfg.compression.target_ratio = 8.0;
    assert_eq!(cfg.psnr_threshold(), 38.0);
    assert_eq!(cfg.target_ratio(), 8.0);
}

#[test]
fn validate_rejects_bad_values() {
    let mut cfg = Config::default();
    cfg.workers.min_workers = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.workers.min_workers = 5;
    cfg.workers.max_workers = 2;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.workers.memory_threshold = 1.5;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.memory.min_chunk_height = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.compression.compression_ratio_tolerance = 1.0;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.input.include_pattern = "(".into();
    assert!(cfg.validate().is_err());

    assert!(Config::default().validate().is_ok());
}
