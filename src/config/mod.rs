#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use args::*;

#[cfg(feature = "cli")]
mod args {
    use crate::core::writer::DEFAULT_MISSING_VALUE;
    use crate::core::{ConfigProvider, OutputLayout};
    use crate::domain::model::DocumentFormat;
    use crate::utils::error::{EtlError, Result};
    use crate::utils::validation::{self, Validate};
    use clap::{Args, Parser, Subcommand, ValueEnum};
    use std::fs;
    use std::path::Path;

    const INPUT_EXTENSIONS: &[&str] = &["json", "xml"];

    #[derive(Debug, Parser)]
    #[command(name = "clinical-etl")]
    #[command(about = "Convert FHIR and CCDA clinical documents into per-category CSV tables")]
    pub struct Cli {
        #[command(subcommand)]
        pub command: Command,
    }

    #[derive(Debug, Subcommand)]
    pub enum Command {
        /// Extract records from documents and write CSV tables
        Convert(ConvertArgs),
        /// Add a keyword flag column to an existing CSV
        Flag(FlagArgs),
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
    pub enum FormatArg {
        #[default]
        Auto,
        FhirJson,
        FhirXml,
        Ccda,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
    pub enum LayoutArg {
        #[default]
        Merged,
        PerDocument,
    }

    #[derive(Debug, Clone, Args)]
    pub struct ConvertArgs {
        /// Documents to convert, relative to --input-dir when given
        pub files: Vec<String>,

        /// Directory holding the documents; scanned for .json/.xml files when no FILES are given
        #[arg(long)]
        pub input_dir: Option<String>,

        #[arg(long, default_value = "./output")]
        pub output_path: String,

        #[arg(long, value_enum, default_value_t = FormatArg::Auto)]
        pub format: FormatArg,

        /// TOML file overriding the built-in category mappings
        #[arg(long)]
        pub mapping: Option<String>,

        #[arg(long, value_enum, default_value_t = LayoutArg::Merged)]
        pub layout: LayoutArg,

        #[arg(long, default_value = DEFAULT_MISSING_VALUE)]
        pub missing_value: String,

        /// Bundle all tables into one zip archive with this name
        #[arg(long)]
        pub archive: Option<String>,

        #[arg(long, help = "Log CPU and memory usage per phase")]
        pub monitor: bool,

        #[arg(short, long, help = "Enable verbose output")]
        pub verbose: bool,

        #[arg(long, help = "Emit logs as JSON lines")]
        pub log_json: bool,
    }

    impl ConvertArgs {
        /// Base directory the source storage reads from.
        pub fn input_base(&self) -> &str {
            self.input_dir.as_deref().unwrap_or(".")
        }

        /// Fills `files` from `input_dir` when none were listed.
        pub fn discover_inputs(&mut self) -> Result<()> {
            if !self.files.is_empty() {
                return Ok(());
            }
            let Some(dir) = self.input_dir.as_deref() else {
                return Err(EtlError::MissingConfigError {
                    field: "files".to_string(),
                });
            };

            let entries = fs::read_dir(dir).map_err(|source| EtlError::FileError {
                path: dir.into(),
                source,
            })?;
            let mut files = Vec::new();
            for entry in entries {
                let path = entry?.path();
                let supported = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| INPUT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false);
                if path.is_file() && supported {
                    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                        files.push(name.to_string());
                    }
                }
            }
            files.sort();

            tracing::debug!("Found {} documents in {}", files.len(), dir);
            self.files = files;
            Ok(())
        }
    }

    impl ConfigProvider for ConvertArgs {
        fn input_files(&self) -> &[String] {
            &self.files
        }

        fn output_path(&self) -> &str {
            &self.output_path
        }

        fn forced_format(&self) -> Option<DocumentFormat> {
            match self.format {
                FormatArg::Auto => None,
                FormatArg::FhirJson => Some(DocumentFormat::FhirJson),
                FormatArg::FhirXml => Some(DocumentFormat::FhirXml),
                FormatArg::Ccda => Some(DocumentFormat::Ccda),
            }
        }

        fn output_layout(&self) -> OutputLayout {
            match self.layout {
                LayoutArg::Merged => OutputLayout::Merged,
                LayoutArg::PerDocument => OutputLayout::PerDocument,
            }
        }

        fn missing_value(&self) -> &str {
            &self.missing_value
        }

        fn archive_name(&self) -> Option<&str> {
            self.archive.as_deref()
        }
    }

    impl Validate for ConvertArgs {
        fn validate(&self) -> Result<()> {
            validation::validate_non_empty_list("files", &self.files)?;
            validation::validate_path("output_path", &self.output_path)?;
            if let Some(dir) = &self.input_dir {
                validation::validate_path("input_dir", dir)?;
                if !Path::new(dir).is_dir() {
                    return Err(EtlError::InvalidConfigValueError {
                        field: "input_dir".to_string(),
                        value: dir.clone(),
                        reason: "not a directory".to_string(),
                    });
                }
            }
            // a forced format accepts any file name
            if self.format == FormatArg::Auto {
                validation::validate_file_extensions("files", &self.files, INPUT_EXTENSIONS)?;
            }
            if let Some(mapping) = &self.mapping {
                validation::validate_path("mapping", mapping)?;
                validation::validate_file_extensions("mapping", std::slice::from_ref(mapping), &["toml"])?;
            }
            if let Some(archive) = &self.archive {
                validation::validate_file_extensions("archive", std::slice::from_ref(archive), &["zip"])?;
            }
            Ok(())
        }
    }

    #[derive(Debug, Clone, Args)]
    pub struct FlagArgs {
        /// CSV file rewritten in place
        #[arg(long)]
        pub file: String,

        #[arg(long)]
        pub column: String,

        #[arg(long, value_delimiter = ',', required = true)]
        pub words: Vec<String>,

        #[arg(long)]
        pub result_column: String,

        #[arg(short, long, help = "Enable verbose output")]
        pub verbose: bool,
    }

    impl Validate for FlagArgs {
        fn validate(&self) -> Result<()> {
            validation::validate_path("file", &self.file)?;
            validation::validate_file_extensions("file", std::slice::from_ref(&self.file), &["csv"])
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use tempfile::TempDir;

        fn parse(args: &[&str]) -> Cli {
            Cli::try_parse_from(std::iter::once("clinical-etl").chain(args.iter().copied()))
                .unwrap()
        }

        fn convert(args: &[&str]) -> ConvertArgs {
            match parse(args).command {
                Command::Convert(args) => args,
                other => panic!("unexpected command {:?}", other),
            }
        }

        #[test]
        fn test_convert_defaults() {
            let args = convert(&["convert", "a.json", "b.xml"]);

            assert_eq!(args.input_files(), ["a.json", "b.xml"]);
            assert_eq!(args.output_path(), "./output");
            assert_eq!(args.forced_format(), None);
            assert_eq!(args.output_layout(), OutputLayout::Merged);
            assert_eq!(args.missing_value(), "N/A");
            assert_eq!(args.archive_name(), None);
            assert!(args.validate().is_ok());
        }

        #[test]
        fn test_convert_options() {
            let args = convert(&[
                "convert",
                "record.dat",
                "--format",
                "ccda",
                "--layout",
                "per-document",
                "--missing-value",
                "",
                "--archive",
                "tables.zip",
            ]);

            assert_eq!(args.forced_format(), Some(DocumentFormat::Ccda));
            assert_eq!(args.output_layout(), OutputLayout::PerDocument);
            assert_eq!(args.missing_value(), "");
            assert_eq!(args.archive_name(), Some("tables.zip"));
            assert!(args.validate().is_ok());
        }

        #[test]
        fn test_unsupported_extension_without_forced_format() {
            let args = convert(&["convert", "notes.txt"]);
            assert!(matches!(
                args.validate(),
                Err(EtlError::InvalidConfigValueError { ref field, .. }) if field == "files"
            ));
        }

        #[test]
        fn test_discover_inputs() {
            let dir = TempDir::new().unwrap();
            std::fs::write(dir.path().join("b.xml"), "<x/>").unwrap();
            std::fs::write(dir.path().join("a.JSON"), "{}").unwrap();
            std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

            let dir_arg = dir.path().to_str().unwrap();
            let mut args = convert(&["convert", "--input-dir", dir_arg]);
            args.discover_inputs().unwrap();

            assert_eq!(args.files, vec!["a.JSON", "b.xml"]);
            assert_eq!(args.input_base(), dir_arg);
            assert!(args.validate().is_ok());
        }

        #[test]
        fn test_no_inputs() {
            let mut args = convert(&["convert"]);
            assert!(matches!(
                args.discover_inputs(),
                Err(EtlError::MissingConfigError { .. })
            ));
        }

        #[test]
        fn test_flag_args() {
            let cli = parse(&[
                "flag",
                "--file",
                "out/fhir/conditions.csv",
                "--column",
                "condition_description",
                "--words",
                "diabetes,asthma",
                "--result-column",
                "chronic",
            ]);
            let Command::Flag(args) = cli.command else {
                panic!("expected flag command");
            };
            assert_eq!(args.words, vec!["diabetes", "asthma"]);
            assert!(args.validate().is_ok());
        }
    }
}
