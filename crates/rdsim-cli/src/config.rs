use crate::error::{CliError, Result};
use rdsim::core::models::surface::SurfaceBehavior;
use rdsim::engine::config::{
    DEFAULT_MAX_SURFACE_INTERACTIONS, DEFAULT_REACTION_RADIUS, SimulationConfig,
    SimulationConfigBuilder,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

const DEFAULT_VIZ_DIRECTORY: &str = "viz_data";
const DEFAULT_VIZ_SCENE: &str = "Scene";

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialSimulationSection {
    time_step: Option<f64>,
    iterations: Option<u64>,
    seed: Option<u64>,
    reaction_radius: Option<f64>,
    max_surface_interactions: Option<usize>,
    output_dir: Option<PathBuf>,
}

/// How a geometry object's mesh is obtained.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", tag = "shape")]
pub enum ShapeConfig {
    Icosphere {
        radius: f64,
        subdivisions: u32,
        #[serde(default)]
        center: Option<[f64; 3]>,
    },
    Box {
        min: [f64; 3],
        max: [f64; 3],
    },
    File {
        path: PathBuf,
    },
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct GeometryConfig {
    pub name: String,
    #[serde(flatten)]
    pub shape: ShapeConfig,
    #[serde(default)]
    pub surface_class: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SpeciesConfig {
    pub name: String,
    /// 3-D diffusion constant in cm²/s.
    pub diffusion_constant: f64,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BehaviorConfig {
    Reflective,
    Transparent,
    Absorptive,
}

impl From<BehaviorConfig> for SurfaceBehavior {
    fn from(b: BehaviorConfig) -> Self {
        match b {
            BehaviorConfig::Reflective => SurfaceBehavior::Reflective,
            BehaviorConfig::Transparent => SurfaceBehavior::Transparent,
            BehaviorConfig::Absorptive => SurfaceBehavior::Absorptive,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SurfaceClassConfig {
    pub name: String,
    pub behavior: BehaviorConfig,
    /// Species the class applies to; every species when omitted.
    #[serde(default)]
    pub species: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ReleaseSiteConfig {
    pub name: String,
    pub species: String,
    /// Geometry object to fill. Mutually exclusive with `location`.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub location: Option<[f64; 3]>,
    #[serde(default)]
    pub diameter: Option<f64>,
    #[serde(default)]
    pub count: Option<usize>,
    /// Molar concentration. Mutually exclusive with `count`.
    #[serde(default)]
    pub concentration: Option<f64>,
    #[serde(default)]
    pub iteration: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ReactionConfig {
    pub name: String,
    pub reactants: Vec<String>,
    #[serde(default)]
    pub products: Vec<String>,
    /// M⁻¹s⁻¹ for two reactants, s⁻¹ for one.
    pub rate: f64,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CountConfig {
    pub name: String,
    /// Species counted; every species when omitted.
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub every: Option<u64>,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialVizSection {
    directory: Option<PathBuf>,
    scene: Option<String>,
    every: Option<u64>,
    meshes: Option<bool>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DeformationConfig {
    pub object: String,
    pub final_scale: f64,
    #[serde(default)]
    pub center: Option<[f64; 3]>,
}

/// A model file as read from disk; everything optional until merged with the CLI.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PartialModelConfig {
    #[serde(default)]
    simulation: PartialSimulationSection,
    #[serde(default)]
    geometry: Vec<GeometryConfig>,
    #[serde(default)]
    species: Vec<SpeciesConfig>,
    #[serde(default)]
    surface_class: Vec<SurfaceClassConfig>,
    #[serde(default)]
    release_site: Vec<ReleaseSiteConfig>,
    #[serde(default)]
    reaction: Vec<ReactionConfig>,
    #[serde(default)]
    count: Vec<CountConfig>,
    #[serde(default)]
    viz: Option<PartialVizSection>,
    #[serde(default)]
    deformation: Vec<DeformationConfig>,
}

/// Where and how often visualization frames are written.
#[derive(Debug, Clone, PartialEq)]
pub struct VizConfig {
    pub prefix: PathBuf,
    pub every: u64,
    pub meshes: bool,
}

/// A fully resolved model, with every path made absolute against the output directory.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub simulation: SimulationConfig,
    pub output_dir: PathBuf,
    /// Directory relative mesh-file paths are resolved against.
    pub model_dir: PathBuf,
    pub geometry: Vec<GeometryConfig>,
    pub species: Vec<SpeciesConfig>,
    pub surface_classes: Vec<SurfaceClassConfig>,
    pub release_sites: Vec<ReleaseSiteConfig>,
    pub reactions: Vec<ReactionConfig>,
    pub counts: Vec<CountConfig>,
    pub viz: Option<VizConfig>,
    pub deformations: Vec<DeformationConfig>,
}

/// Values given on the command line, which win over the model file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub output_dir: Option<PathBuf>,
    pub seed: Option<u64>,
    pub iterations: Option<u64>,
    pub time_step: Option<f64>,
    pub set_values: Vec<String>,
}

impl PartialModelConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading model from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_str_at(&content, path)
    }

    fn from_str_at(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    pub fn merge_with_cli(mut self, overrides: &Overrides, model_path: &Path) -> Result<ModelConfig> {
        self.apply_set_values(&overrides.set_values)?;
        let sim = &self.simulation;

        let time_step = overrides
            .time_step
            .or(sim.time_step)
            .ok_or_else(|| CliError::Config("`simulation.time-step` is required.".to_string()))?;
        let iterations = overrides
            .iterations
            .or(sim.iterations)
            .ok_or_else(|| CliError::Config("`simulation.iterations` is required.".to_string()))?;
        let seed = overrides.seed.or(sim.seed).unwrap_or(1);

        let simulation = SimulationConfigBuilder::new()
            .time_step(time_step)
            .total_iterations(iterations)
            .seed(seed)
            .reaction_radius(sim.reaction_radius.unwrap_or(DEFAULT_REACTION_RADIUS))
            .max_surface_interactions(
                sim.max_surface_interactions
                    .unwrap_or(DEFAULT_MAX_SURFACE_INTERACTIONS),
            )
            .build()
            .map_err(|e| CliError::Config(e.to_string()))?;

        let model_dir = model_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let output_dir = overrides
            .output_dir
            .clone()
            .or_else(|| sim.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."));

        let viz = self.viz.map(|v| {
            let directory = v.directory.unwrap_or_else(|| PathBuf::from(DEFAULT_VIZ_DIRECTORY));
            let scene = v.scene.unwrap_or_else(|| DEFAULT_VIZ_SCENE.to_string());
            VizConfig {
                prefix: output_dir
                    .join(directory)
                    .join(format!("seed_{seed:05}"))
                    .join(scene),
                every: v.every.unwrap_or(1),
                meshes: v.meshes.unwrap_or(true),
            }
        });
        let counts = self
            .count
            .into_iter()
            .map(|mut c| {
                c.file = c.file.map(|f| output_dir.join(f));
                c
            })
            .collect();

        Ok(ModelConfig {
            simulation,
            output_dir,
            model_dir,
            geometry: self.geometry,
            species: self.species,
            surface_classes: self.surface_class,
            release_sites: self.release_site,
            reactions: self.reaction,
            counts,
            viz,
            deformations: self.deformation,
        })
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value_str)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };

            match key {
                "simulation.time-step" => self.simulation.time_step = Some(parse_value(key, value_str)?),
                "simulation.iterations" => self.simulation.iterations = Some(parse_value(key, value_str)?),
                "simulation.seed" => self.simulation.seed = Some(parse_value(key, value_str)?),
                "simulation.reaction-radius" => {
                    self.simulation.reaction_radius = Some(parse_value(key, value_str)?)
                }
                "simulation.max-surface-interactions" => {
                    self.simulation.max_surface_interactions = Some(parse_value(key, value_str)?)
                }
                "simulation.output-dir" => self.simulation.output_dir = Some(PathBuf::from(value_str)),
                "viz.every" => {
                    self.viz.get_or_insert_with(Default::default).every = Some(parse_value(key, value_str)?)
                }
                "viz.meshes" => {
                    self.viz.get_or_insert_with(Default::default).meshes = Some(parse_value(key, value_str)?)
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid value for {}: {}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const MODEL: &str = r#"
        [simulation]
        time-step = 1e-5
        iterations = 1000
        seed = 23

        [[geometry]]
        name = "CYT"
        shape = "icosphere"
        radius = 0.35
        subdivisions = 4

        [[geometry]]
        name = "POOL"
        shape = "icosphere"
        radius = 0.3
        subdivisions = 4
        surface-class = "transp"

        [[species]]
        name = "Actin"
        diffusion-constant = 1e-9

        [[surface-class]]
        name = "transp"
        behavior = "transparent"
        species = "Actin"

        [[release-site]]
        name = "rel_a"
        species = "Actin"
        region = "POOL"
        count = 500

        [[count]]
        name = "actin"
        species = "Actin"
        file = "actin.dat"

        [viz]
        every = 10
    "#;

    fn model_path(dir: &Path) -> PathBuf {
        let path = dir.join("model.toml");
        fs::write(&path, MODEL).unwrap();
        path
    }

    #[test]
    fn model_file_is_resolved_against_the_output_directory() {
        let dir = tempdir().unwrap();
        let path = model_path(dir.path());
        let overrides = Overrides {
            output_dir: Some(dir.path().join("out")),
            ..Default::default()
        };
        let config = PartialModelConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&overrides, &path)
            .unwrap();

        assert_eq!(config.simulation.seed, 23);
        assert_eq!(config.simulation.total_iterations, 1000);
        assert_eq!(config.simulation.reaction_radius, DEFAULT_REACTION_RADIUS);
        assert_eq!(config.geometry.len(), 2);
        assert_eq!(config.geometry[1].surface_class.as_deref(), Some("transp"));
        assert_eq!(
            config.geometry[0].shape,
            ShapeConfig::Icosphere {
                radius: 0.35,
                subdivisions: 4,
                center: None
            }
        );
        assert_eq!(config.counts[0].file, Some(dir.path().join("out/actin.dat")));
        let viz = config.viz.unwrap();
        assert_eq!(viz.prefix, dir.path().join("out/viz_data/seed_00023/Scene"));
        assert_eq!(viz.every, 10);
        assert_eq!(config.model_dir, dir.path());
    }

    #[test]
    fn cli_overrides_win_over_set_values_and_file() {
        let dir = tempdir().unwrap();
        let path = model_path(dir.path());
        let overrides = Overrides {
            seed: Some(7),
            set_values: vec!["simulation.seed=9".into(), "simulation.iterations=20".into()],
            ..Default::default()
        };
        let config = PartialModelConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&overrides, &path)
            .unwrap();
        assert_eq!(config.simulation.seed, 7);
        assert_eq!(config.simulation.total_iterations, 20);
    }

    #[test]
    fn unknown_keys_and_bad_values_are_rejected() {
        let path = Path::new("inline.toml");
        let err = PartialModelConfig::from_str_at("[simulation]\ntimestep = 1.0\n", path).unwrap_err();
        assert!(matches!(err, CliError::FileParsing { .. }));

        let mut partial = PartialModelConfig::default();
        let err = partial
            .apply_set_values(&["simulation.seed=abc".to_string()])
            .unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
        let err = partial.apply_set_values(&["nonsense".to_string()]).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn missing_time_step_is_reported() {
        let partial = PartialModelConfig::from_str_at("[simulation]\niterations = 5\n", Path::new("m.toml")).unwrap();
        let err = partial.merge_with_cli(&Overrides::default(), Path::new("m.toml")).unwrap_err();
        assert!(err.to_string().contains("time-step"));
    }

    #[test]
    fn shipped_demo_models_parse() {
        for (name, body) in [
            ("model_b1.toml", include_str!("../../../demos/model_b1.toml")),
            ("model_b2.toml", include_str!("../../../demos/model_b2.toml")),
        ] {
            let path = Path::new(name);
            let config = PartialModelConfig::from_str_at(body, path)
                .unwrap()
                .merge_with_cli(&Overrides::default(), path)
                .unwrap();
            assert_eq!(config.simulation.total_iterations, 1000);
            assert_eq!(config.release_sites.len(), 2);
            assert_eq!(config.reactions[0].reactants, vec!["Actin", "CaMKII"]);
        }
    }
}
