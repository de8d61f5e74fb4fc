use super::{OutputError, ensure_parent_dir};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Append-only `time count` rows, space separated, one per sampled iteration.
pub struct CountWriter {
    path: PathBuf,
    writer: csv::Writer<BufWriter<File>>,
    rows: usize,
}

impl std::fmt::Debug for CountWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountWriter")
            .field("path", &self.path)
            .field("rows", &self.rows)
            .finish()
    }
}

impl CountWriter {
    /// Creates (or truncates) the file at `path`, creating missing parent directories.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, OutputError> {
        let path = path.as_ref().to_path_buf();
        ensure_parent_dir(&path)?;
        let file = File::create(&path).map_err(|e| OutputError::io(&path, e))?;
        let writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    pub fn append(&mut self, time: f64, count: usize) -> Result<(), OutputError> {
        self.writer
            .write_record(&[format!("{time:e}"), count.to_string()])
            .map_err(|e| OutputError::csv(&self.path, e))?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer
            .flush()
            .map_err(|e| OutputError::io(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}
