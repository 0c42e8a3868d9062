//! Code for writing metadata to file
use crate::model::Model;
use anyhow::Result;
use chrono::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// The output file name for metadata
const METADATA_FILE_NAME: &str = "metadata.toml";

#[derive(Serialize)]
struct Metadata<'a> {
    run: RunMetadata<'a>,
    program: ProgramMetadata,
}

/// Information about the model run
#[derive(Serialize)]
struct RunMetadata<'a> {
    /// Path to the model which was run
    model_path: &'a Path,
    /// The command which was run (e.g. "baseline")
    command: &'a str,
    /// The date and time on which the run started
    datetime: String,
    /// Base seed for the random streams
    seed: u64,
    /// The climate scenario used for evaluation and optimisation
    scenario: &'a str,
    /// Monte Carlo iterations per evaluation
    iterations: u32,
}

/// Information about the program
#[derive(Serialize)]
struct ProgramMetadata {
    /// The program name
    name: &'static str,
    /// The program version as specified in Cargo.toml
    version: &'static str,
    /// Whether it is a debug build
    is_debug: bool,
}

impl Default for ProgramMetadata {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            is_debug: cfg!(debug_assertions),
        }
    }
}

/// Write metadata to the specified output path in TOML format
pub fn write_metadata(
    output_path: &Path,
    model_path: &Path,
    command: &str,
    model: &Model,
) -> Result<()> {
    let metadata = Metadata {
        run: RunMetadata {
            model_path,
            command,
            datetime: Local::now().to_rfc2822(),
            seed: model.parameters.seed,
            scenario: &model.parameters.scenario.0,
            iterations: model.parameters.iterations,
        },
        program: ProgramMetadata::default(),
    };
    let file_path = output_path.join(METADATA_FILE_NAME);
    fs::write(&file_path, toml::to_string(&metadata)?)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::model;
    use rstest::rstest;
    use tempfile::tempdir;

    #[rstest]
    fn test_write_metadata(model: Model) {
        let dir = tempdir().unwrap();
        write_metadata(dir.path(), Path::new("/models/catchment"), "baseline", &model).unwrap();

        let contents = fs::read_to_string(dir.path().join(METADATA_FILE_NAME)).unwrap();
        let value: toml::Table = toml::from_str(&contents).unwrap();
        assert_eq!(value["run"]["command"].as_str(), Some("baseline"));
        assert_eq!(value["run"]["scenario"].as_str(), Some("current"));
        assert_eq!(value["program"]["name"].as_str(), Some("nbsopt"));
    }
}
