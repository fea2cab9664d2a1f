pub(crate) mod disk;
pub(crate) mod snapshot;
pub(crate) mod sphere;

use crate::config::ModelParams;
use crate::error::{GridError, Result};
use crate::grid::{GridKind, DEFAULT_ALIGN_RADIUS};
use crate::util::RangeExt;
use crate::{Scalar, Vec3};
use nalgebra::DMatrix;
use std::ops::Range;

pub mod units {
    use crate::Scalar;

    pub const AU: Scalar = 1.495_978_707e11; // m
    pub const M_SUN: Scalar = 1.988_92e30; // kg
    pub const GRAV: Scalar = 6.674_30e-11; // m^3 kg^-1 s^-2
}

/// A target for the integrated mass of one density species: either one total
/// over the whole grid, or one value per (distribution, region) pair.
#[derive(Debug, Clone)]
pub enum MassTarget {
    Total(Scalar),
    PerRegion(DMatrix<Scalar>),
}

/// Extent parameters a model can supply as defaults. Every field can be
/// overridden from the command line; `None` means the model has no opinion.
#[derive(Debug, Clone, Default)]
pub struct ExtentDefaults {
    pub grid_type: Option<GridKind>,
    pub max_tree_level: Option<u32>,
    pub sidelength: Option<Scalar>,
    pub inner_radius: Option<Scalar>,
    pub outer_radius: Option<Scalar>,
    pub z_max: Option<Scalar>,
    pub n_r: Option<usize>,
    pub n_ph: Option<usize>,
    pub n_th: Option<usize>,
    pub n_z: Option<usize>,
    pub sf_r: Option<Scalar>,
    pub sf_ph: Option<Scalar>,
    pub sf_th: Option<Scalar>,
    pub sf_z: Option<Scalar>,
    pub split_first_cell: Option<usize>,
}

/// Supplies every per-point physical quantity the grid stores, plus the mass
/// targets and extent defaults of the underlying model. Implemented by the
/// analytic models and by the snapshot importer, which are interchangeable.
pub trait QuantityModel {
    /// Number of independent density distributions (dust species).
    fn distributions(&self) -> usize {
        1
    }

    /// Number of spatial regions mass is accounted against.
    fn regions(&self) -> usize {
        1
    }

    /// The region a position belongs to, always `< regions()`.
    fn region_of(&self, _position: &Vec3) -> usize {
        0
    }

    /// Gas density of one distribution at a position, in kg/m^3. `region` is
    /// the value of `region_of` at that position.
    fn density(&self, position: &Vec3, distribution: usize, region: usize) -> Scalar;

    fn dust_to_gas(&self, _distribution: usize) -> Scalar {
        0.01
    }

    fn temperature(&self, position: &Vec3) -> Scalar;

    fn velocity(&self, position: &Vec3) -> Vec3;

    fn magnetic_field(&self, position: &Vec3) -> Vec3;

    fn alignment_radius(&self, _position: &Vec3) -> Scalar {
        DEFAULT_ALIGN_RADIUS
    }

    fn target_gas_mass(&self) -> Option<MassTarget> {
        None
    }

    fn target_dust_mass(&self) -> Option<MassTarget> {
        None
    }

    /// Mass per (distribution, region) that is excluded from normalization,
    /// e.g. a fixed background component.
    fn ignored_mass(&self) -> Option<DMatrix<Scalar>> {
        None
    }

    fn extent_defaults(&self) -> ExtentDefaults;

    /// Density ratio above which an octree node is considered unresolved.
    fn refinement_contrast(&self) -> Scalar {
        10.
    }

    /// Whether an octree node should be subdivided. The default samples the
    /// total gas density at the node center and the 8 octant centers and
    /// fires when the contrast between them exceeds `refinement_contrast`.
    fn refine(&self, bounds: &Range<Vec3>) -> bool {
        let total = |p: &Vec3| -> Scalar {
            let region = self.region_of(p);
            (0..self.distributions())
                .map(|d| self.density(p, d, region))
                .sum()
        };

        let mut lo = Scalar::INFINITY;
        let mut hi: Scalar = 0.;
        let center = bounds.center();
        for p in std::iter::once(center).chain(bounds.octants().iter().map(|o| o.center())) {
            let rho = total(&p);
            lo = lo.min(rho);
            hi = hi.max(rho);
        }

        hi > 0. && hi > self.refinement_contrast() * lo
    }
}

/// Look up a model by the name given on the command line. `extra` carries the
/// free-form `extra_parameter` option; only the snapshot importer consumes it
/// (as the snapshot path).
pub fn by_name(
    name: &str,
    params: &ModelParams,
    extra: Option<&str>,
) -> Result<Box<dyn QuantityModel>> {
    match name {
        "disk" => Ok(Box::new(disk::DiskModel::new(params.disk.clone()))),
        "sphere" => Ok(Box::new(sphere::SphereModel::new(params.sphere.clone())?)),
        "snapshot" => {
            let path = extra.ok_or_else(|| {
                GridError::Configuration(
                    "the snapshot model needs the snapshot path via --extra_parameter".to_string(),
                )
            })?;
            Ok(Box::new(snapshot::SnapshotModel::load(path.as_ref())?))
        }
        other => Err(GridError::UnknownModel(other.to_string())),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Constant density everywhere inside a box/sphere of interest; the
    /// simplest model exercising a single distribution and region.
    pub struct UniformModel {
        pub rho: Scalar,
        pub target: Option<MassTarget>,
    }

    impl UniformModel {
        pub fn new(rho: Scalar) -> Self {
            UniformModel { rho, target: None }
        }

        pub fn with_target(rho: Scalar, target_mass: Scalar) -> Self {
            UniformModel {
                rho,
                target: Some(MassTarget::Total(target_mass)),
            }
        }
    }

    impl QuantityModel for UniformModel {
        fn density(&self, _p: &Vec3, _d: usize, _r: usize) -> Scalar {
            self.rho
        }

        fn temperature(&self, _p: &Vec3) -> Scalar {
            10.
        }

        fn velocity(&self, _p: &Vec3) -> Vec3 {
            Vec3::zeros()
        }

        fn magnetic_field(&self, _p: &Vec3) -> Vec3 {
            Vec3::new(0., 0., 1e-9)
        }

        fn target_gas_mass(&self) -> Option<MassTarget> {
            self.target.clone()
        }

        fn extent_defaults(&self) -> ExtentDefaults {
            ExtentDefaults {
                grid_type: Some(GridKind::Spherical),
                sidelength: Some(2.),
                inner_radius: Some(0.),
                outer_radius: Some(1.),
                z_max: Some(1.),
                ..ExtentDefaults::default()
            }
        }
    }

    /// Two distributions over two radial regions, with a density step so the
    /// octree refinement criterion has something to fire on. Distribution 1
    /// contributes nothing inside `r_split`.
    pub struct TwoZoneModel {
        pub r_split: Scalar,
        pub rho_in: Scalar,
        pub rho_out: Scalar,
        pub target: Option<DMatrix<Scalar>>,
    }

    impl QuantityModel for TwoZoneModel {
        fn distributions(&self) -> usize {
            2
        }

        fn regions(&self) -> usize {
            2
        }

        fn region_of(&self, p: &Vec3) -> usize {
            if p.norm() < self.r_split {
                0
            } else {
                1
            }
        }

        fn density(&self, _p: &Vec3, distribution: usize, region: usize) -> Scalar {
            match (distribution, region) {
                (0, 0) => self.rho_in,
                (0, 1) => self.rho_out,
                (1, 0) => 0.,
                (1, 1) => 0.5 * self.rho_out,
                _ => 0.,
            }
        }

        fn temperature(&self, _p: &Vec3) -> Scalar {
            15.
        }

        fn velocity(&self, _p: &Vec3) -> Vec3 {
            Vec3::zeros()
        }

        fn magnetic_field(&self, _p: &Vec3) -> Vec3 {
            Vec3::zeros()
        }

        fn target_gas_mass(&self) -> Option<MassTarget> {
            self.target.clone().map(MassTarget::PerRegion)
        }

        fn extent_defaults(&self) -> ExtentDefaults {
            ExtentDefaults {
                grid_type: Some(GridKind::Spherical),
                sidelength: Some(4.),
                inner_radius: Some(0.),
                outer_radius: Some(2.),
                z_max: Some(2.),
                ..ExtentDefaults::default()
            }
        }
    }
}
