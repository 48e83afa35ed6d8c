use integra_core::error::IntegraError;
use integra_core::pipeline::config::{
    Combination, EsdParams, IntegrationConfig, LargeScaleSide, Normalization, NoiseAlgorithm, OutputRange, Rejection,
    SigmaParams, WeightMode, WinsorizedParams,
};
use integra_core::pipeline::IntegrationStage;

// ---------------------------------------------------------------------------
// TOML round trips
// ---------------------------------------------------------------------------

#[test]
fn test_default_config_round_trip() {
    let mut config = IntegrationConfig::default();
    config.rejection.algorithm = Rejection::Sigma(SigmaParams::default());
    let text = toml::to_string_pretty(&config).unwrap();
    let back: IntegrationConfig = toml::from_str(&text).unwrap();
    assert_eq!(back, config);
}

#[test]
fn test_partial_config_fills_defaults() {
    let text = r#"
combination = "median"

[normalization]
mode = "multiplicative"

[weights]
mode = "dont_care"

[rejection.algorithm]
algorithm = "winsorized_sigma"
low = 3.5

[output]
range = "truncate"
noise_algorithm = "k_sigma"
"#;
    let config: IntegrationConfig = toml::from_str(text).unwrap();
    assert_eq!(config.combination, Combination::Median);
    assert_eq!(config.normalization.mode, Normalization::Multiplicative);
    assert_eq!(config.weights.mode, WeightMode::DontCare);
    assert_eq!(
        config.rejection.algorithm,
        Rejection::WinsorizedSigma(WinsorizedParams {
            low: 3.5,
            ..WinsorizedParams::default()
        })
    );
    assert!(config.rejection.clip_low && config.rejection.clip_high);
    assert_eq!(config.output.range, OutputRange::Truncate);
    assert_eq!(config.output.noise_algorithm, NoiseAlgorithm::KSigma);
    assert!(config.output.generate_integrated_image);
}

#[test]
fn test_partial_large_scale_side_keeps_defaults() {
    let text = r#"
[large_scale.high]
enabled = true
growth = 4
"#;
    let config: IntegrationConfig = toml::from_str(text).unwrap();
    let high = &config.large_scale.high;
    assert!(high.enabled);
    assert_eq!((high.protected_layers, high.growth), (2, 4));
    assert_eq!(config.large_scale.low, LargeScaleSide::default());
}

#[test]
fn test_empty_config_is_default() {
    let config: IntegrationConfig = toml::from_str("").unwrap();
    assert_eq!(config, IntegrationConfig::default());
    assert!(!config.rejection.algorithm.is_enabled());
}

#[test]
fn test_unknown_algorithm_is_an_error() {
    let text = "[rejection.algorithm]\nalgorithm = \"kappa\"\n";
    assert!(toml::from_str::<IntegrationConfig>(text).is_err());
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn test_default_config_is_valid() {
    assert!(IntegrationConfig::default().validate().is_ok());
}

#[test]
fn test_inverted_range_is_invalid() {
    let mut config = IntegrationConfig::default();
    config.range.clip_high = true;
    config.range.low = 0.5;
    config.range.high = 0.4;
    assert!(matches!(config.validate(), Err(IntegraError::Config(_))));
}

#[test]
fn test_nothing_to_generate_is_invalid() {
    let mut config = IntegrationConfig::default();
    config.output.generate_integrated_image = false;
    config.output.generate_rejection_maps = false;
    assert!(config.validate().is_err());
}

#[test]
fn test_bad_algorithm_parameters() {
    let mut config = IntegrationConfig::default();
    config.rejection.algorithm = Rejection::Esd(EsdParams {
        outliers_fraction: 1.0,
        ..EsdParams::default()
    });
    assert!(config.validate().is_err());

    config.rejection.algorithm = Rejection::Sigma(SigmaParams {
        high: 0.0,
        ..SigmaParams::default()
    });
    assert!(config.validate().is_err());
}

#[test]
fn test_large_scale_needs_rejection_and_side() {
    let mut config = IntegrationConfig::default();
    config.large_scale.high.enabled = true;
    assert!(!config.large_scale_high());
    config.rejection.algorithm = Rejection::Sigma(SigmaParams::default());
    assert!(config.large_scale_high());
    config.rejection.clip_high = false;
    assert!(!config.large_scale_high());
}

#[test]
fn test_weights_matter_for_average_or_drizzle() {
    let mut config = IntegrationConfig::default();
    assert!(config.needs_weights());
    config.combination = Combination::Median;
    assert!(!config.needs_weights());
    config.output.generate_drizzle_data = true;
    assert!(config.needs_weights());
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

#[test]
fn test_display_names() {
    assert_eq!(format!("{}", Combination::Average), "Average");
    assert_eq!(format!("{}", Rejection::Esd(EsdParams::default())), "Generalized ESD");
    assert_eq!(format!("{}", OutputRange::Rescale), "Rescale");
    assert_eq!(format!("{}", IntegrationStage::Integrating { channel: 2 }), "Integrating ch 2");
}
