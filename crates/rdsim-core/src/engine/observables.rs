use super::compartments::CompartmentTree;
use crate::core::io::OutputError;
use crate::core::io::counts::CountWriter;
use crate::core::models::ids::GeometryId;
use crate::core::models::particle::Particle;
use crate::core::models::species::SpeciesPattern;
use std::path::PathBuf;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// What a count observable measures and where it writes.
#[derive(Debug, Clone, PartialEq)]
pub struct CountSpec {
    pub name: String,
    pub pattern: SpeciesPattern,
    /// Restricts the count to particles inside this object (or nested in it).
    pub region: Option<GeometryId>,
    /// Sample every `every_n` iterations, starting at iteration 0.
    pub every_n: u64,
    /// Optional `time count` file sink.
    pub file: Option<PathBuf>,
}

impl CountSpec {
    pub fn new(name: impl Into<String>, pattern: SpeciesPattern) -> Self {
        Self {
            name: name.into(),
            pattern,
            region: None,
            every_n: 1,
            file: None,
        }
    }

    pub fn in_region(mut self, region: GeometryId) -> Self {
        self.region = Some(region);
        self
    }

    pub fn every(mut self, every_n: u64) -> Self {
        self.every_n = every_n;
        self
    }

    pub fn to_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CountSample {
    pub iteration: u64,
    pub time: f64,
    pub count: usize,
}

/// A count observable with its append-only series.
#[derive(Debug)]
pub struct CountObservable {
    spec: CountSpec,
    series: Vec<CountSample>,
    writer: Option<CountWriter>,
}

impl CountObservable {
    pub(crate) fn new(spec: CountSpec) -> Self {
        Self {
            spec,
            series: Vec::new(),
            writer: None,
        }
    }

    pub fn spec(&self) -> &CountSpec {
        &self.spec
    }

    pub fn series(&self) -> &[CountSample] {
        &self.series
    }

    pub fn values(&self) -> Vec<usize> {
        self.series.iter().map(|s| s.count).collect()
    }

    pub(crate) fn open(&mut self) -> Result<(), OutputError> {
        if let Some(path) = &self.spec.file {
            self.writer = Some(CountWriter::create(path)?);
        }
        Ok(())
    }

    pub(crate) fn is_due(&self, iteration: u64) -> bool {
        iteration % self.spec.every_n.max(1) == 0
    }

    pub(crate) fn append(&mut self, sample: CountSample) -> Result<(), OutputError> {
        self.series.push(sample);
        if let Some(writer) = &mut self.writer {
            writer.append(sample.time, sample.count)?;
        }
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<(), OutputError> {
        if let Some(writer) = &mut self.writer {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Periodic ASCII visualization export.
#[derive(Debug, Clone, PartialEq)]
pub struct VizOutput {
    /// Frame files are named `<prefix>.ascii.<iteration>.dat` and `<prefix>.mesh.<iteration>.dat`.
    pub prefix: PathBuf,
    pub every_n: u64,
    pub include_meshes: bool,
}

impl VizOutput {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            every_n: 1,
            include_meshes: true,
        }
    }

    pub fn every(mut self, every_n: u64) -> Self {
        self.every_n = every_n;
        self
    }

    pub(crate) fn is_due(&self, iteration: u64) -> bool {
        iteration % self.every_n.max(1) == 0
    }
}

/// Number of particles matching `pattern`, optionally restricted to a region.
pub fn count_matching(
    particles: &[Particle],
    pattern: SpeciesPattern,
    region: Option<GeometryId>,
    tree: &CompartmentTree,
) -> usize {
    let matches = |p: &Particle| {
        pattern.matches(p.species) && region.is_none_or(|r| tree.is_within(p.compartment, r))
    };

    #[cfg(feature = "parallel")]
    let count = particles.par_iter().filter(|&p| matches(p)).count();

    #[cfg(not(feature = "parallel"))]
    let count = particles.iter().filter(|&p| matches(p)).count();

    count
}
