use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use gust_core::prelude::now_ms;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    JsonPretty,
    Yaml,
}

impl ExportFormat {
    fn file_name(&self, stem: &str) -> String {
        match self {
            ExportFormat::Json => format!("{stem}.json"),
            ExportFormat::JsonPretty => format!("{stem}-pretty.json"),
            ExportFormat::Yaml => format!("{stem}.yaml"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = UnknownExportFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "json-pretty" => Ok(ExportFormat::JsonPretty),
            "yaml" => Ok(ExportFormat::Yaml),
            other => Err(UnknownExportFormatError {
                format: other.to_string(),
            }),
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("the export format `{format}` is not recognised")]
pub struct UnknownExportFormatError {
    pub format: String,
}

/// Writes report artifacts to the configured export directory, once per
/// configured format.
pub struct ReportExporter {
    formats: Vec<ExportFormat>,
    directory: PathBuf,
}

impl ReportExporter {
    pub fn new(formats: Vec<ExportFormat>, directory: impl Into<PathBuf>) -> Self {
        Self {
            formats,
            directory: directory.into(),
        }
    }

    /// Build an exporter from the configuration file's format strings. An
    /// unrecognised format is a configuration error.
    pub fn from_config(
        formats: &[String],
        directory: impl Into<PathBuf>,
    ) -> Result<Self, UnknownExportFormatError> {
        let mut parsed = Vec::with_capacity(formats.len());
        for format in formats {
            let format = format.parse()?;
            if !parsed.contains(&format) {
                parsed.push(format);
            }
        }
        Ok(Self::new(parsed, directory))
    }

    /// The aggregate report artifact for one batch run.
    pub fn export_aggregate<V: Serialize>(&self, value: &V) -> anyhow::Result<Vec<PathBuf>> {
        self.export(&format!("gust-report-{}", now_ms()), value)
    }

    /// Debug exports are best effort: a failure is logged and the run
    /// continues.
    pub fn export_debug<V: Serialize>(&self, simulation: &str, kind: &str, value: &V) {
        let stem = format!("{simulation}-{kind}-{}", now_ms());
        if let Err(e) = self.export(&stem, value) {
            log::error!("Failed to export {kind} for simulation `{simulation}`: {e:?}");
        }
    }

    pub fn export<V: Serialize>(&self, stem: &str, value: &V) -> anyhow::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(&self.directory).with_context(|| {
            format!(
                "Failed to create export directory {}",
                self.directory.display()
            )
        })?;

        let mut written = Vec::with_capacity(self.formats.len());
        for format in &self.formats {
            let path = self.directory.join(format.file_name(stem));
            let file = File::create(&path)
                .with_context(|| format!("Failed to create export file {}", path.display()))?;
            let out = BufWriter::new(file);
            match format {
                ExportFormat::Json => serde_json::to_writer(out, value)?,
                ExportFormat::JsonPretty => serde_json::to_writer_pretty(out, value)?,
                ExportFormat::Yaml => serde_yaml::to_writer(out, value)?,
            }
            written.push(path);
        }
        Ok(written)
    }
}
