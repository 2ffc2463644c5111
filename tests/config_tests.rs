//! # Configuration Tests Module
//!
//! Public behaviour of the configuration layer: presets, validation ranges and the
//! environment lookup.

#[cfg(test)]
mod tests {
    use sheetclean::config::{AppConfig, LoggingConfig, PipelineConfig, RunnerConfig};
    use sheetclean::errors::AppError;
    use std::path::PathBuf;

    /// Default pipeline settings with one change applied.
    fn with(change: impl FnOnce(&mut PipelineConfig)) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        change(&mut config);
        config
    }

    /// Test the library defaults
    #[test]
    fn test_pipeline_defaults() {
        let config = PipelineConfig::default();

        assert_eq!(config.resize_width, 1500);
        assert_eq!(config.adaptive_block_size, 35);
        assert_eq!(config.adaptive_c, 5);
        assert!(config.deskew_enabled);
        assert!(config.remove_shadow);
        assert_eq!(config.clahe_clip, 0.0);
        assert_eq!(config.denoise_strength, 0.0);
        assert!(!config.crop_table);
    }

    /// Test the deployed preset
    #[test]
    fn test_production_preset() {
        let config = PipelineConfig::production_preset();

        assert_eq!(config.resize_width, 2000);
        assert_eq!(config.adaptive_block_size, 51);
        assert_eq!(config.adaptive_c, 10);
        assert_eq!(config.clahe_clip, 2.0);
        assert_eq!(config.denoise_strength, 5.0);
        assert!(!config.crop_table);
        assert_eq!(PipelineConfig::preset("Production").unwrap(), config);
    }

    #[test]
    fn test_range_boundaries() {
        let valid = [
            with(|c| c.resize_width = 600),
            with(|c| c.resize_width = 3000),
            with(|c| c.adaptive_block_size = 11),
            with(|c| c.adaptive_block_size = 100),
            with(|c| c.adaptive_c = -20),
            with(|c| {
                c.clahe_clip = 4.0;
                c.denoise_strength = 12.0;
            }),
        ];
        for config in &valid {
            assert!(config.validate().is_ok(), "{:?}", config);
        }

        let invalid = [
            with(|c| c.resize_width = 0),
            with(|c| c.adaptive_block_size = 9),
            with(|c| c.adaptive_c = 21),
            with(|c| c.denoise_strength = f32::INFINITY),
        ];
        for config in &invalid {
            assert!(
                matches!(config.validate(), Err(AppError::Config(_))),
                "{:?}",
                config
            );
        }
    }

    #[test]
    fn test_lookup_overrides_single_fields() {
        let config = PipelineConfig::from_lookup(|key| match key {
            "SHEETCLEAN_RESIZE_WIDTH" => Some("1800".to_string()),
            "SHEETCLEAN_DESKEW" => Some("off".to_string()),
            "SHEETCLEAN_CLAHE_CLIP" => Some("3.5".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.resize_width, 1800);
        assert!(!config.deskew_enabled);
        assert_eq!(config.clahe_clip, 3.5);
        assert_eq!(config.adaptive_block_size, 35);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = PipelineConfig::production_preset();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_app_config_validation() {
        let mut config = AppConfig {
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
            runner: RunnerConfig::default(),
        };

        // Invalid: no inputs
        assert!(config.validate().is_err());

        config.runner.input_paths.push(PathBuf::from("sheet.png"));
        assert!(config.validate().is_ok());

        // Invalid: pipeline out of range
        config.pipeline.adaptive_c = 99;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().starts_with("[CONFIG]"));
    }
}
