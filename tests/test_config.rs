#[cfg(test)]
mod test_config {
    use probnet::EngineConfig;
    use probnet::common::setup::{Task, parse_options_from};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"tolerance": 1e-6, "baum_welch": {{"max_iterations": 5}}, "seed": 99}}"#
        )
        .unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.tolerance, 1e-6);
        assert_eq!(config.baum_welch.max_iterations, 5);
        assert_eq!(config.baum_welch.tolerance, 1e-6);
        assert_eq!(config.stationary.max_iterations, 10_000);
        assert_eq!(config.seed, Some(99));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = EngineConfig::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("absent.json"));
    }

    #[test]
    fn test_command_line_defaults() {
        let options =
            parse_options_from(["probnet", "--model", "hmm.json", "--task", "baum-welch"]).unwrap();
        assert_eq!(options.task, Task::BaumWelch);
        assert!(options.query.is_none());
        assert!(options.config.is_none());
        assert!(options.seed.is_none());
    }
}
