//! # Runner Tests Module
//!
//! Batch runs against temporary directories: output layout, manifest contents and
//! failure reporting.

mod common;

#[cfg(test)]
mod tests {
    use super::common::create_attendance_sheet;
    use sheetclean::config::{AppConfig, PipelineConfig};
    use sheetclean::errors::AppError;
    use sheetclean::runner::{collect_inputs, run_batch, RunManifest};
    use std::path::Path;

    fn small_config(input: &Path, output: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.pipeline = PipelineConfig {
            resize_width: 600,
            ..Default::default()
        };
        config.runner.input_paths = vec![input.to_path_buf()];
        config.runner.output_dir = output.to_path_buf();
        config.runner.max_concurrent_pages = 2;
        config
    }

    #[test]
    fn test_collect_inputs_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.JPG", "notes.txt", "scan.pdf"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let inputs = collect_inputs(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = inputs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.png"]);

        // Listing the same file twice processes it once
        let file = dir.path().join("b.png");
        let inputs = collect_inputs(&[file.clone(), dir.path().to_path_buf()]).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0], file);
    }

    #[tokio::test]
    async fn test_run_writes_pages_and_manifest() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        for (i, name) in ["first.png", "second.png"].iter().enumerate() {
            create_attendance_sheet(400, 560, 2.0, i as u64)
                .save(input.path().join(name))
                .unwrap();
        }

        let config = small_config(input.path(), output.path());
        let manifest = run_batch(&config, None).await.unwrap();

        assert_eq!(manifest.succeeded(), 2);
        assert_eq!(manifest.failed(), 0);
        assert!(manifest.run_id.starts_with("run_"));
        assert_eq!(manifest.run_dir.parent().unwrap(), output.path());

        for page in &manifest.pages {
            let written = page.output.as_ref().unwrap();
            assert!(written.file_name().unwrap().to_string_lossy().ends_with("_processed.png"));
            let decoded = image::open(written).unwrap();
            assert_eq!(decoded.width(), 600);
            assert_eq!(page.report.as_ref().unwrap().output_dimensions.0, 600);
        }

        let json = std::fs::read_to_string(manifest.run_dir.join("manifest.json")).unwrap();
        let parsed: RunManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.pages.len(), 2);
        assert_eq!(parsed.pipeline.resize_width, 600);
        assert!(!manifest.run_dir.join("metrics.prom").exists());
    }

    #[tokio::test]
    async fn test_undecodable_page_is_reported() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("broken.png"), b"not an image").unwrap();
        create_attendance_sheet(300, 420, 0.0, 9)
            .save(input.path().join("good.png"))
            .unwrap();

        let config = small_config(input.path(), output.path());
        let manifest = run_batch(&config, None).await.unwrap();

        assert_eq!(manifest.succeeded(), 1);
        assert_eq!(manifest.failed(), 1);
        let broken = manifest
            .pages
            .iter()
            .find(|p| p.source.ends_with("broken.png"))
            .unwrap();
        assert!(broken.output.is_none());
        assert!(broken.error.as_ref().unwrap().starts_with("[IMAGE]"));
    }

    #[tokio::test]
    async fn test_empty_input_directory_is_config_error() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let config = small_config(input.path(), output.path());

        let result = run_batch(&config, None).await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
