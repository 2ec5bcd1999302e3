use crate::executor::ExecutionResult;
use crate::oracle::AnomalyRecord;
use crate::report::Report;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SECTION_RULE_WIDTH: usize = 60;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Result store I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Persists the raw campaign results and the final report.
pub trait ResultStore {
    fn save_results(
        &mut self,
        results: &[ExecutionResult],
        anomalies: &[AnomalyRecord],
    ) -> Result<(), StoreError>;

    fn save_report(&mut self, report: &Report) -> Result<(), StoreError>;
}

/// Human-readable text file. The header is written on creation, results and
/// the report are appended.
#[derive(Debug)]
pub struct FileResultStore {
    path: PathBuf,
}

impl FileResultStore {
    /// Creates (or truncates) the file at `path` and writes the header.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut file = File::create(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        write!(file, "Fuzzing Results\n{}\n", rule('='))
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, write: impl FnOnce(&mut dyn Write) -> std::io::Result<()>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        write(&mut writer).map_err(io_err)?;
        writer.flush().map_err(io_err)
    }
}

fn rule(c: char) -> String {
    c.to_string().repeat(SECTION_RULE_WIDTH)
}

fn write_entry(out: &mut dyn Write, result: &ExecutionResult) -> std::io::Result<()> {
    write!(
        out,
        "Input: {}\nOutput: {}\nErrors: {}\n{}\n",
        result.probe_text(),
        result.output.stdout,
        result.output.stderr,
        rule('-')
    )
}

impl ResultStore for FileResultStore {
    fn save_results(
        &mut self,
        results: &[ExecutionResult],
        anomalies: &[AnomalyRecord],
    ) -> Result<(), StoreError> {
        self.append(|out| {
            write!(out, "All Results\n{}\n", rule('='))?;
            for result in results {
                write_entry(out, result)?;
            }
            write!(out, "\nAnomalies\n{}\n", rule('='))?;
            for anomaly in anomalies {
                write_entry(out, &anomaly.result)?;
            }
            Ok(())
        })
    }

    fn save_report(&mut self, report: &Report) -> Result<(), StoreError> {
        self.append(|out| write!(out, "\n{}\n{}", rule('='), report))
    }
}

/// Keeps everything in memory; useful for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    pub results: Vec<ExecutionResult>,
    pub anomalies: Vec<AnomalyRecord>,
    pub reports: Vec<String>,
}

impl ResultStore for MemoryResultStore {
    fn save_results(
        &mut self,
        results: &[ExecutionResult],
        anomalies: &[AnomalyRecord],
    ) -> Result<(), StoreError> {
        self.results.extend_from_slice(results);
        self.anomalies.extend_from_slice(anomalies);
        Ok(())
    }

    fn save_report(&mut self, report: &Report) -> Result<(), StoreError> {
        self.reports.push(report.to_string());
        Ok(())
    }
}
