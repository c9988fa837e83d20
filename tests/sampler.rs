mod common;

use common::{FixedProbe, FlakyProbe};
use tranche::sampler::{Measurement, ResourceSampler, ResourceSnapshot, SamplerSettings};

#[test]
fn sampler_starts_stale() {
    let sampler = ResourceSampler::new(Box::new(FixedProbe(common::idle())), SamplerSettings::default());
    assert!(sampler.latest().stale);
    assert!(sampler.history().is_empty());
}

#[test]
fn failed_measurement_returns_previous_reading_marked_stale() {
    let reading = Measurement {
        cpu_fraction: 0.4,
        memory_fraction: 0.6,
    };
    let sampler = ResourceSampler::new(
        Box::new(FlakyProbe {
            ok_calls: 1,
            reading,
        }),
        SamplerSettings::default(),
    );

    let fresh = sampler.sample();
    assert!(!fresh.stale);
    assert_eq!(fresh.memory_fraction, 0.6);

    let stale = sampler.sample();
    assert!(stale.stale);
    assert_eq!(stale.cpu_fraction, 0.4);
    assert_eq!(stale.memory_fraction, 0.6);
    assert_eq!(sampler.history().len(), 1);
}

#[test]
fn history_is_bounded() {
    let sampler = ResourceSampler::new(
        Box::new(FixedProbe(common::idle())),
        SamplerSettings {
            history_len: 3,
            ..SamplerSettings::default()
        },
    );
    for _ in 0..7 {
        sampler.sample();
    }
    let history = sampler.history();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|s| !s.stale));
}

#[test]
fn readings_are_clamped_to_unit_range() {
    let s = ResourceSnapshot::new(1.7, -0.3);
    assert_eq!(s.cpu_fraction, 1.0);
    assert_eq!(s.memory_fraction, 0.0);
    assert!(!s.stale);
}
