mod common;

use std::sync::Arc;
use tranche::{
    codec::{
        Analyzer, EncodeParams, EncodedImage, EncodedStrip, Encoder, ImageFileOpener,
        PixelAnalyzer, RasterCodec, SourceOpener, Strategy,
    },
    config::DocumentType,
    source::{ImageGeometry, InputSource, RasterSource},
};

fn smooth(width: u32, height: u32) -> RasterSource {
    let data = (0..height)
        .flat_map(|y| (0..width).map(move |x| ((x + y) * 255 / (width + height)) as u8))
        .collect();
    RasterSource::new(ImageGeometry::new(width, height, 1, 1), data).unwrap()
}

fn encode_whole(codec: &RasterCodec, source: &RasterSource, strategy: Strategy) -> EncodedImage {
    let geometry = source.geometry();
    let region = source.read_rows(0, geometry.height).unwrap();
    let bytes = codec
        .encode(
            &region,
            &EncodeParams {
                strategy,
                document_type: DocumentType::Photograph,
            },
        )
        .unwrap();
    EncodedImage {
        geometry,
        strategy,
        extension: codec.extension(&strategy).to_string(),
        strips: vec![EncodedStrip {
            start_row: 0,
            rows: geometry.height,
            bytes,
        }],
    }
}

#[test]
fn lossless_png_is_exact() {
    let codec = Arc::new(RasterCodec::new());
    let source = common::gradient(48, 30);
    let encoded = encode_whole(&codec, &source, Strategy::Lossless);
    assert_eq!(encoded.extension, "png");

    let analysis = PixelAnalyzer::new(codec).analyze(&source, &encoded).unwrap();
    assert_eq!(analysis.metrics.mse, 0.0);
    assert!(analysis.metrics.psnr.is_infinite());
    assert!((analysis.metrics.ssim - 1.0).abs() < 1e-9);
    assert!(analysis.achieved_ratio > 0.0);
}

#[test]
fn jpeg_keeps_smooth_content_close() {
    let codec = Arc::new(RasterCodec::new());
    let source = smooth(64, 64);
    let encoded = encode_whole(&codec, &source, Strategy::TargetQuality { quality: 90 });
    assert_eq!(encoded.extension, "jpg");

    let analysis = PixelAnalyzer::new(codec).analyze(&source, &encoded).unwrap();
    assert!(analysis.metrics.psnr > 30.0, "psnr {}", analysis.metrics.psnr);
    assert!(analysis.metrics.ssim > 0.9, "ssim {}", analysis.metrics.ssim);
}

#[test]
fn analysis_walks_every_strip() {
    let codec = Arc::new(RasterCodec::new());
    let source = common::gradient(20, 12);
    let params = EncodeParams {
        strategy: Strategy::Lossless,
        document_type: DocumentType::Photograph,
    };
    let strips = [(0u32, 5u32), (5, 5), (10, 2)]
        .into_iter()
        .map(|(start, rows)| EncodedStrip {
            start_row: start,
            rows,
            bytes: codec
                .encode(&source.read_rows(start, rows).unwrap(), &params)
                .unwrap(),
        })
        .collect();
    let encoded = EncodedImage {
        geometry: source.geometry(),
        strategy: Strategy::Lossless,
        extension: "png".into(),
        strips,
    };
    let analysis = PixelAnalyzer::new(codec).analyze(&source, &encoded).unwrap();
    assert_eq!(analysis.metrics.mse, 0.0);
}

#[test]
fn ratio_targets_map_to_a_quality_ladder() {
    assert_eq!(RasterCodec::quality_for_ratio(1.5), 95);
    assert_eq!(RasterCodec::quality_for_ratio(4.0), 90);
    assert_eq!(RasterCodec::quality_for_ratio(10.0), 70);
    assert_eq!(RasterCodec::quality_for_ratio(40.0), 40);
    let mut last = u8::MAX;
    for r in [1.0, 3.0, 5.0, 8.0, 12.0, 20.0] {
        let q = RasterCodec::quality_for_ratio(r);
        assert!(q <= last);
        last = q;
    }
}

#[test]
fn opener_decodes_gray_and_rgb_files() {
    let dir = tempfile::tempdir().unwrap();
    let gray = dir.path().join("g.png");
    image::GrayImage::from_raw(8, 6, (0..48).collect())
        .unwrap()
        .save(&gray)
        .unwrap();
    let rgb = dir.path().join("c.png");
    image::RgbImage::from_pixel(5, 4, image::Rgb([10, 200, 30]))
        .save(&rgb)
        .unwrap();

    let opener = ImageFileOpener::new();
    let g = opener.open(&gray, None).unwrap();
    assert_eq!(g.geometry(), ImageGeometry::new(8, 6, 1, 1));
    assert_eq!(g.read_rows(1, 1).unwrap().data, (8..16).collect::<Vec<u8>>());

    let c = opener.open(&rgb, None).unwrap();
    assert_eq!(c.geometry(), ImageGeometry::new(5, 4, 3, 1));
    assert_eq!(&c.read_rows(3, 1).unwrap().data[..3], &[10, 200, 30]);
}

#[test]
fn opener_rejects_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    let junk = dir.path().join("junk.png");
    std::fs::write(&junk, b"definitely not an image").unwrap();
    let opener = ImageFileOpener::new();
    assert!(opener.open(&junk, None).is_err());
    assert!(opener.open(&dir.path().join("missing.png"), None).is_err());

    let ok = dir.path().join("ok.png");
    image::GrayImage::new(2, 2).save(&ok).unwrap();
    assert!(opener.open(&ok, Some(1)).is_err());
    assert!(opener.open(&ok, Some(0)).is_ok());
}
