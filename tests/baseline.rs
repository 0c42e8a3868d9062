//! Integration tests for the `baseline` command.
use nbsopt::cli::{RunOpts, handle_baseline_command};
use nbsopt::settings::Settings;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

/// Get the path to the demo model.
fn get_model_dir() -> PathBuf {
    PathBuf::from("demos/catchment")
}

/// An integration test for the `baseline` command.
#[test]
fn test_handle_baseline_command() {
    unsafe { std::env::set_var("NBSOPT_LOG_LEVEL", "off") };

    let tempdir = tempdir().unwrap();
    let opts = RunOpts {
        output_dir: Some(tempdir.path().to_path_buf()),
        overwrite: false,
    };
    handle_baseline_command(&get_model_dir(), &opts, Some(Settings::default())).unwrap();

    let contents = fs::read_to_string(tempdir.path().join("cost_of_inaction.csv")).unwrap();
    let scenarios = contents
        .lines()
        .skip(1)
        .map(|line| line.split(',').next().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(scenarios, ["current", "moderate", "severe"]);

    // Second time will fail because the logging is already initialised
    let opts = RunOpts {
        output_dir: Some(tempdir.path().join("again")),
        overwrite: false,
    };
    assert_eq!(
        handle_baseline_command(&get_model_dir(), &opts, Some(Settings::default()))
            .unwrap_err()
            .chain()
            .next()
            .unwrap()
            .to_string(),
        "Failed to initialise logging."
    );
}
