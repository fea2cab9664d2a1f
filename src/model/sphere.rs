//! Two-zone spherical envelope with two dust distributions: distribution 0
//! fills the whole envelope, distribution 1 only the outer zone. The mass
//! targets are a full (distribution x region) matrix, which exercises the
//! per-pair normalization path; the matrix is user-editable via the model
//! file, so its shape is validated when the model is constructed.

use crate::error::Result;
use crate::grid::GridKind;
use crate::model::units::{AU, GRAV, M_SUN};
use crate::model::{ExtentDefaults, MassTarget, QuantityModel};
use crate::normalize::matrix_from_rows;
use crate::{Scalar, Vec3};
use nalgebra::DMatrix;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SphereParams {
    /// Density of distribution 0 at the zone boundary, kg/m^3.
    pub rho_ref: Scalar,
    /// Radius separating the inner from the outer zone, AU.
    pub r_split_au: Scalar,
    pub inner_radius_au: Scalar,
    pub outer_radius_au: Scalar,
    /// Radial exponents of the two distributions.
    pub p0: Scalar,
    pub p1: Scalar,
    pub t_ref: Scalar,
    pub central_mass_msun: Scalar,
    /// Uniform vertical field strength, T.
    pub b_z: Scalar,
    pub dust_to_gas: Scalar,
    /// Gas-mass targets in M_sun, one row per distribution, one column per
    /// region (inner, outer).
    pub gas_mass_msun: Vec<Vec<Scalar>>,
}

impl Default for SphereParams {
    fn default() -> Self {
        SphereParams {
            rho_ref: 1e-16,
            r_split_au: 500.,
            inner_radius_au: 10.,
            outer_radius_au: 5000.,
            p0: 2.,
            p1: 1.5,
            t_ref: 15.,
            central_mass_msun: 1.,
            b_z: 1e-9,
            dust_to_gas: 0.01,
            gas_mass_msun: vec![vec![0.4, 0.3], vec![0., 0.1]],
        }
    }
}

pub struct SphereModel {
    params: SphereParams,
    targets: DMatrix<Scalar>,
}

impl SphereModel {
    pub fn new(params: SphereParams) -> Result<Self> {
        let targets = matrix_from_rows(&params.gas_mass_msun)? * M_SUN;
        Ok(SphereModel { params, targets })
    }

    fn clamped_radius(&self, position: &Vec3) -> Scalar {
        position.norm().max(self.params.inner_radius_au * AU)
    }
}

impl QuantityModel for SphereModel {
    fn distributions(&self) -> usize {
        2
    }

    fn regions(&self) -> usize {
        2
    }

    fn region_of(&self, position: &Vec3) -> usize {
        if position.norm() < self.params.r_split_au * AU {
            0
        } else {
            1
        }
    }

    fn density(&self, position: &Vec3, distribution: usize, region: usize) -> Scalar {
        let p = &self.params;
        let r = self.clamped_radius(position);
        if r > p.outer_radius_au * AU {
            return 0.;
        }
        let x = r / (p.r_split_au * AU);
        match distribution {
            0 => p.rho_ref * x.powf(-p.p0),
            // the second species only exists in the outer zone
            1 if region == 1 => 0.5 * p.rho_ref * x.powf(-p.p1),
            _ => 0.,
        }
    }

    fn dust_to_gas(&self, _distribution: usize) -> Scalar {
        self.params.dust_to_gas
    }

    fn temperature(&self, position: &Vec3) -> Scalar {
        let p = &self.params;
        let x = self.clamped_radius(position) / (p.r_split_au * AU);
        (p.t_ref * x.powf(-0.4)).max(2.7)
    }

    fn velocity(&self, position: &Vec3) -> Vec3 {
        let p = &self.params;
        let r = self.clamped_radius(position);
        let v_ff = (2. * GRAV * p.central_mass_msun * M_SUN / r).sqrt();
        // radial infall towards the center
        position * (-v_ff / r)
    }

    fn magnetic_field(&self, _position: &Vec3) -> Vec3 {
        Vec3::new(0., 0., self.params.b_z)
    }

    fn target_gas_mass(&self) -> Option<MassTarget> {
        Some(MassTarget::PerRegion(self.targets.clone()))
    }

    fn extent_defaults(&self) -> ExtentDefaults {
        let p = &self.params;
        ExtentDefaults {
            grid_type: Some(GridKind::Spherical),
            max_tree_level: Some(5),
            sidelength: Some(2. * p.outer_radius_au * AU),
            inner_radius: Some(p.inner_radius_au * AU),
            outer_radius: Some(p.outer_radius_au * AU),
            z_max: Some(p.outer_radius_au * AU),
            n_r: Some(100),
            n_ph: Some(1),
            n_th: Some(1),
            sf_r: Some(1.03),
            ..ExtentDefaults::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_boundary_separates_the_regions() {
        let model = SphereModel::new(SphereParams::default()).unwrap();
        assert_eq!(model.region_of(&Vec3::new(100. * AU, 0., 0.)), 0);
        assert_eq!(model.region_of(&Vec3::new(1000. * AU, 0., 0.)), 1);
    }

    #[test]
    fn second_distribution_is_empty_inside() {
        let model = SphereModel::new(SphereParams::default()).unwrap();
        let inner = Vec3::new(100. * AU, 0., 0.);
        let outer = Vec3::new(1000. * AU, 0., 0.);
        assert_eq!(model.density(&inner, 1, 0), 0.);
        assert!(model.density(&outer, 1, 1) > 0.);
        assert!(model.density(&inner, 0, 0) > model.density(&outer, 0, 1));
    }

    #[test]
    fn ragged_target_matrix_is_rejected() {
        let params = SphereParams {
            gas_mass_msun: vec![vec![1., 2.], vec![3.]],
            ..SphereParams::default()
        };
        assert!(SphereModel::new(params).is_err());
    }

    #[test]
    fn infall_points_at_the_center() {
        let model = SphereModel::new(SphereParams::default()).unwrap();
        let p = Vec3::new(0., 800. * AU, 0.);
        let v = model.velocity(&p);
        assert!(v.y < 0.);
        assert!(v.x.abs() < 1e-12);
    }
}
