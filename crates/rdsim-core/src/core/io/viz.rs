use super::{OutputError, ensure_parent_dir};
use crate::core::geometry::mesh::Mesh;
use nalgebra::Point3;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// One particle line of an ASCII frame.
#[derive(Debug, Clone, Copy)]
pub struct VizRecord<'a> {
    pub species: &'a str,
    pub id: u64,
    pub position: Point3<f64>,
}

/// Writes ASCII visualization frames under a path prefix.
///
/// Particles go to `<prefix>.ascii.<iteration>.dat` as `species id x y z nx ny nz`
/// lines (the orientation is zero for volume molecules), meshes to
/// `<prefix>.mesh.<iteration>.dat` as `o`/`v`/`f` records with 1-based indices.
#[derive(Debug, Clone)]
pub struct VizWriter {
    prefix: PathBuf,
}

impl VizWriter {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn particle_frame_path(&self, iteration: u64) -> PathBuf {
        self.frame_path("ascii", iteration)
    }

    pub fn mesh_frame_path(&self, iteration: u64) -> PathBuf {
        self.frame_path("mesh", iteration)
    }

    fn frame_path(&self, kind: &str, iteration: u64) -> PathBuf {
        let mut name = self.prefix.as_os_str().to_os_string();
        name.push(format!(".{kind}.{iteration:05}.dat"));
        PathBuf::from(name)
    }

    /// Writes the frame for `iteration` and returns the paths written.
    pub fn write_frame<'a>(
        &self,
        iteration: u64,
        particles: impl IntoIterator<Item = VizRecord<'a>>,
        meshes: &[(&str, &Mesh)],
    ) -> Result<Vec<PathBuf>, OutputError> {
        let mut written = Vec::with_capacity(2);

        let path = self.particle_frame_path(iteration);
        write_file(&path, |w| write_particles(w, particles))?;
        written.push(path);

        if !meshes.is_empty() {
            let path = self.mesh_frame_path(iteration);
            write_file(&path, |w| write_meshes(w, meshes))?;
            written.push(path);
        }
        Ok(written)
    }
}

fn write_file(
    path: &Path,
    body: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>,
) -> Result<(), OutputError> {
    ensure_parent_dir(path)?;
    let file = File::create(path).map_err(|e| OutputError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    body(&mut writer)
        .and_then(|_| writer.flush())
        .map_err(|e| OutputError::io(path, e))
}

pub fn write_particles<'a>(
    writer: &mut impl Write,
    particles: impl IntoIterator<Item = VizRecord<'a>>,
) -> io::Result<()> {
    for r in particles {
        writeln!(
            writer,
            "{} {} {} {} {} 0 0 0",
            r.species, r.id, r.position.x, r.position.y, r.position.z
        )?;
    }
    Ok(())
}

pub fn write_meshes(writer: &mut impl Write, meshes: &[(&str, &Mesh)]) -> io::Result<()> {
    let mut offset = 1;
    for (name, mesh) in meshes {
        writeln!(writer, "o {name}")?;
        for v in mesh.vertices() {
            writeln!(writer, "v {} {} {}", v.x, v.y, v.z)?;
        }
        for [a, b, c] in mesh.faces() {
            writeln!(writer, "f {} {} {}", a + offset, b + offset, c + offset)?;
        }
        offset += mesh.vertex_count();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::mesh::tests::unit_cube;
    use tempfile::tempdir;

    #[test]
    fn frame_paths_are_zero_padded() {
        let writer = VizWriter::new("out/seed_00007/Scene");
        assert_eq!(
            writer.particle_frame_path(42),
            PathBuf::from("out/seed_00007/Scene.ascii.00042.dat")
        );
        assert_eq!(
            writer.mesh_frame_path(0),
            PathBuf::from("out/seed_00007/Scene.mesh.00000.dat")
        );
    }

    #[test]
    fn mesh_records_use_global_one_based_indices() {
        let cube = unit_cube();
        let mut buf = Vec::new();
        write_meshes(&mut buf, &[("a", &cube), ("b", &cube)]).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert_eq!(text.lines().filter(|l| l.starts_with("o ")).count(), 2);
        assert_eq!(text.lines().filter(|l| l.starts_with("v ")).count(), 16);
        let max_index = text
            .lines()
            .filter_map(|l| l.strip_prefix("f "))
            .flat_map(|l| l.split(' ').map(|i| i.parse::<usize>().unwrap()))
            .max()
            .unwrap();
        assert_eq!(max_index, 16);
    }

    #[test]
    fn write_frame_creates_particle_and_mesh_files() {
        let dir = tempdir().unwrap();
        let writer = VizWriter::new(dir.path().join("viz/seed_00001/Scene"));
        let cube = unit_cube();
        let records = [
            VizRecord {
                species: "Actin",
                id: 0,
                position: Point3::new(0.5, 0.25, 0.0),
            },
            VizRecord {
                species: "CaMKII",
                id: 1,
                position: Point3::origin(),
            },
        ];
        let written = writer.write_frame(3, records, &[("CYT", &cube)]).unwrap();
        assert_eq!(written.len(), 2);

        let particles = std::fs::read_to_string(&written[0]).unwrap();
        assert_eq!(particles.lines().next(), Some("Actin 0 0.5 0.25 0 0 0 0"));
        assert_eq!(particles.lines().count(), 2);
        assert!(written[1].exists());
    }
}
