#![allow(dead_code)]

use clinical_etl::config::{ConvertArgs, FormatArg, LayoutArg};
use clinical_etl::{
    ConversionPipeline, CsvWriter, EtlEngine, FormatFamily, LocalStorage, MappingConfig, Result,
    Table,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

pub fn convert_args(files: &[&str], output: &TempDir) -> ConvertArgs {
    ConvertArgs {
        files: files.iter().map(|f| f.to_string()).collect(),
        input_dir: Some(fixtures_dir().to_string_lossy().into_owned()),
        output_path: output.path().to_string_lossy().into_owned(),
        format: FormatArg::Auto,
        mapping: None,
        layout: LayoutArg::Merged,
        missing_value: "N/A".to_string(),
        archive: None,
        monitor: false,
        verbose: false,
        log_json: false,
    }
}

/// Runs a conversion the way the `convert` subcommand does.
pub fn run_convert(args: ConvertArgs) -> Result<Vec<String>> {
    let mappings = MappingConfig::load(args.mapping.as_deref())?;
    let source = LocalStorage::new(args.input_base());
    let sink = LocalStorage::new(args.output_path.clone());
    let pipeline = ConversionPipeline::new(source, sink, args, mappings);
    EtlEngine::new(pipeline).run()
}

pub fn read_table(output: &TempDir, family: FormatFamily, category: &str, relative: &str) -> Table {
    CsvWriter::default()
        .read_table(family, category, &output.path().join(relative))
        .unwrap()
}

/// Cell values of `field` in row order; missing cells read as `None`.
pub fn column(table: &Table, field: &str) -> Vec<Option<String>> {
    table
        .records()
        .iter()
        .map(|r| r.display_value(field))
        .collect()
}

pub fn cell(table: &Table, row: usize, field: &str) -> Option<String> {
    table.records()[row].display_value(field)
}
