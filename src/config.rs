use crate::error::{GridError, Result};
use crate::grid::GridKind;
use crate::model::disk::DiskParams;
use crate::model::sphere::SphereParams;
use crate::model::ExtentDefaults;
use crate::Scalar;
use serde::Deserialize;
use std::path::Path;

/// Per-model parameter overrides, read from the optional `--model_file` JSON.
/// Anything not present keeps the model's built-in default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub disk: DiskParams,
    pub sphere: SphereParams,
}

pub fn load_model_params(path: Option<&Path>) -> Result<ModelParams> {
    let path = match path {
        Some(p) => p,
        None => return Ok(ModelParams::default()),
    };
    let json = std::fs::read(path)?;
    serde_json::from_slice(&json).map_err(|e| {
        GridError::Configuration(format!("failed to parse model file {:?}: {}", path, e))
    })
}

/// The fully merged grid configuration: command line option > model default >
/// built-in fallback. Extents stay optional here; each geometry checks for
/// the ones it needs when its root is initialized.
#[derive(Debug, Clone)]
pub struct GridConfig {
    pub kind: GridKind,
    pub max_tree_level: u32,
    pub sidelength: Option<Scalar>,
    pub inner_radius: Option<Scalar>,
    pub outer_radius: Option<Scalar>,
    pub z_max: Option<Scalar>,
    pub n_r: usize,
    pub n_ph: usize,
    pub n_th: usize,
    pub n_z: usize,
    pub sf_r: Scalar,
    pub sf_ph: Scalar,
    pub sf_th: Scalar,
    pub sf_z: Scalar,
    pub split_first_cell: usize,
    /// Scalar gas-mass target from the command line; overrides the model's.
    pub gas_mass: Option<Scalar>,
    /// Uniform grain-alignment radius override for every cell.
    pub align_radius: Option<Scalar>,
}

impl GridConfig {
    pub fn resolve(
        cli: &ExtentDefaults,
        model: &ExtentDefaults,
        gas_mass: Option<Scalar>,
        align_radius: Option<Scalar>,
    ) -> Result<Self> {
        let kind = cli
            .grid_type
            .or(model.grid_type)
            .ok_or_else(|| GridError::Configuration("no grid type given".to_string()))?;

        let cfg = GridConfig {
            kind,
            max_tree_level: cli.max_tree_level.or(model.max_tree_level).unwrap_or(5),
            sidelength: cli.sidelength.or(model.sidelength),
            inner_radius: cli.inner_radius.or(model.inner_radius),
            outer_radius: cli.outer_radius.or(model.outer_radius),
            z_max: cli.z_max.or(model.z_max),
            n_r: cli.n_r.or(model.n_r).unwrap_or(100),
            n_ph: cli.n_ph.or(model.n_ph).unwrap_or(1),
            n_th: cli.n_th.or(model.n_th).unwrap_or(1),
            n_z: cli.n_z.or(model.n_z).unwrap_or(1),
            sf_r: cli.sf_r.or(model.sf_r).unwrap_or(1.),
            sf_ph: cli.sf_ph.or(model.sf_ph).unwrap_or(1.),
            sf_th: cli.sf_th.or(model.sf_th).unwrap_or(1.),
            sf_z: cli.sf_z.or(model.sf_z).unwrap_or(1.),
            split_first_cell: cli.split_first_cell.or(model.split_first_cell).unwrap_or(0),
            gas_mass,
            align_radius,
        };

        if cfg.n_r == 0 || cfg.n_ph == 0 || cfg.n_th == 0 || cfg.n_z == 0 {
            return Err(GridError::Configuration(
                "cell counts must be at least 1".to_string(),
            ));
        }
        for (name, sf) in [
            ("sf_r", cfg.sf_r),
            ("sf_ph", cfg.sf_ph),
            ("sf_th", cfg.sf_th),
            ("sf_z", cfg.sf_z),
        ] {
            if !(sf > 0.) {
                return Err(GridError::Configuration(format!(
                    "{} must be positive, got {}",
                    name, sf
                )));
            }
        }

        Ok(cfg)
    }

    pub fn require(&self, value: Option<Scalar>, name: &'static str) -> Result<Scalar> {
        value.ok_or(GridError::MissingExtent {
            geometry: self.kind.label(),
            name,
        })
    }
}
