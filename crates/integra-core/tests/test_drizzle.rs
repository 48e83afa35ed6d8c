mod common;

use std::sync::Arc;

use tempfile::TempDir;

use common::{frames, make_plane, plain_config};
use integra_core::cancel::CancelToken;
use integra_core::consts::MAP_HIGH;
use integra_core::fileset::drizzle::{read_drizzle_data, sidecar_path};
use integra_core::pipeline::config::{Rejection, SigmaParams};
use integra_core::pipeline::{integrate_frames, ProgressReporter};

struct Silent;
impl ProgressReporter for Silent {}

fn hot_pixel_planes() -> Vec<ndarray::Array2<f32>> {
    let mut planes = vec![make_plane(20, 20, 0.5); 5];
    let mut hot = make_plane(20, 20, 0.5);
    hot[[7, 9]] = 1.0;
    planes.push(hot);
    planes
}

#[test]
fn test_sidecar_path_appends_extension() {
    assert_eq!(
        sidecar_path(std::path::Path::new("/data/light_001.tiff")),
        std::path::PathBuf::from("/data/light_001.tiff.idd")
    );
}

#[test]
fn test_drizzle_data_carries_rejection_maps() {
    let dir = TempDir::new().unwrap();
    let paths: Vec<_> = (0..6).map(|i| dir.path().join(format!("f{i}.idd"))).collect();
    let inputs = frames(hot_pixel_planes())
        .into_iter()
        .zip(&paths)
        .map(|(f, p)| f.with_drizzle_path(p))
        .collect();

    let mut config = plain_config();
    config.rejection.algorithm = Rejection::Sigma(SigmaParams::default());
    config.output.generate_drizzle_data = true;
    let result = integrate_frames(inputs, &config, &CancelToken::new(), Arc::new(Silent)).unwrap();
    assert_eq!(result.report.drizzle_failures, 0);

    for (i, path) in paths.iter().enumerate() {
        let data = read_drizzle_data(path).unwrap();
        assert_eq!((data.width, data.height), (20, 20));
        assert_eq!(data.channels.len(), 1);
        assert_eq!(data.channels[0].weight, 1.0);
        assert!((data.channels[0].location - 0.5).abs() < 1e-6);
        assert_eq!(data.rejection_maps.len(), 1);
        let hot = data.rejection_maps[0][[7, 9]] & MAP_HIGH != 0;
        assert_eq!(hot, i == 5, "file {i}");
        assert_eq!(data.rejection_maps[0].iter().filter(|&&b| b != 0).count(), usize::from(i == 5));
    }
}

#[test]
fn test_unwritable_drizzle_data_is_a_warning() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("no_such_dir");
    let inputs = frames(hot_pixel_planes())
        .into_iter()
        .enumerate()
        .map(|(i, f)| f.with_drizzle_path(missing.join(format!("f{i}.idd"))))
        .collect();

    let mut config = plain_config();
    config.output.generate_drizzle_data = true;
    let result = integrate_frames(inputs, &config, &CancelToken::new(), Arc::new(Silent)).unwrap();
    assert_eq!(result.report.drizzle_failures, 6);
    assert_eq!(result.report.warnings.len(), 6);
    assert!(result.image.is_some());
}
