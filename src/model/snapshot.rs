//! Imports an externally produced simulation snapshot and serves it through
//! the same quantity interface as the analytic models. The snapshot is a
//! MessagePack-encoded uniform sample lattice; every query returns the
//! nearest sample, which is exact at cell centers of a matching grid and a
//! reasonable approximation everywhere else.

use crate::error::{GridError, Result};
use crate::grid::GridKind;
use crate::model::{ExtentDefaults, MassTarget, QuantityModel};
use crate::{Scalar, Vec3};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotData {
    pub bounds_min: [Scalar; 3],
    pub bounds_max: [Scalar; 3],
    /// Samples per axis; arrays below are x-major, then y, then z.
    pub shape: [usize; 3],
    pub gas_density: Vec<Scalar>,
    pub temperature: Vec<Scalar>,
    pub velocity: Vec<[Scalar; 3]>,
    pub magnetic_field: Vec<[Scalar; 3]>,
    /// Total gas mass of the snapshot, kg; used as the normalization target.
    pub gas_mass: Option<Scalar>,
    pub dust_to_gas: Scalar,
}

pub struct SnapshotModel {
    data: SnapshotData,
}

impl SnapshotModel {
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let data: SnapshotData = rmp_serde::decode::from_read(reader).map_err(|e| {
            GridError::Configuration(format!("failed to decode snapshot {:?}: {}", path, e))
        })?;
        Self::new(data)
    }

    pub fn new(data: SnapshotData) -> Result<Self> {
        let n = data.shape[0] * data.shape[1] * data.shape[2];
        if n == 0 {
            return Err(GridError::Configuration(
                "snapshot has an empty sample lattice".to_string(),
            ));
        }
        for (name, len) in [
            ("gas_density", data.gas_density.len()),
            ("temperature", data.temperature.len()),
            ("velocity", data.velocity.len()),
            ("magnetic_field", data.magnetic_field.len()),
        ] {
            if len != n {
                return Err(GridError::Configuration(format!(
                    "snapshot field {} has {} samples, lattice wants {}",
                    name, len, n
                )));
            }
        }
        for (min, max) in data.bounds_min.iter().zip(&data.bounds_max) {
            if !(max > min) {
                return Err(GridError::Configuration(
                    "snapshot bounds are empty or inverted".to_string(),
                ));
            }
        }
        Ok(SnapshotModel { data })
    }

    fn sample_index(&self, position: &Vec3) -> usize {
        let d = &self.data;
        let mut idx = [0usize; 3];
        for axis in 0..3 {
            let span = d.bounds_max[axis] - d.bounds_min[axis];
            let t = (position[axis] - d.bounds_min[axis]) / span;
            let i = (t * d.shape[axis] as Scalar).floor() as isize;
            idx[axis] = i.clamp(0, d.shape[axis] as isize - 1) as usize;
        }
        (idx[0] * d.shape[1] + idx[1]) * d.shape[2] + idx[2]
    }
}

impl QuantityModel for SnapshotModel {
    fn density(&self, position: &Vec3, _distribution: usize, _region: usize) -> Scalar {
        self.data.gas_density[self.sample_index(position)]
    }

    fn dust_to_gas(&self, _distribution: usize) -> Scalar {
        self.data.dust_to_gas
    }

    fn temperature(&self, position: &Vec3) -> Scalar {
        self.data.temperature[self.sample_index(position)]
    }

    fn velocity(&self, position: &Vec3) -> Vec3 {
        let v = self.data.velocity[self.sample_index(position)];
        Vec3::new(v[0], v[1], v[2])
    }

    fn magnetic_field(&self, position: &Vec3) -> Vec3 {
        let b = self.data.magnetic_field[self.sample_index(position)];
        Vec3::new(b[0], b[1], b[2])
    }

    fn target_gas_mass(&self) -> Option<MassTarget> {
        self.data.gas_mass.map(MassTarget::Total)
    }

    fn extent_defaults(&self) -> ExtentDefaults {
        let d = &self.data;
        let mut half = 0.;
        for axis in 0..3 {
            half = d.bounds_min[axis]
                .abs()
                .max(d.bounds_max[axis].abs())
                .max(half);
        }
        ExtentDefaults {
            grid_type: Some(GridKind::Octree),
            max_tree_level: Some(6),
            sidelength: Some(2. * half),
            inner_radius: Some(0.),
            outer_radius: Some(half * 3f64.sqrt()),
            z_max: Some(half),
            n_r: Some(64),
            ..ExtentDefaults::default()
        }
    }
}
