//! Flared accretion disk: power-law surface density with a Gaussian vertical
//! profile, a power-law temperature, Keplerian rotation around the z axis
//! and a purely toroidal field. One distribution, one region; the absolute
//! density scale is arbitrary because the gas-mass target fixes it.

use crate::grid::GridKind;
use crate::model::units::{AU, GRAV, M_SUN};
use crate::model::{ExtentDefaults, MassTarget, QuantityModel};
use crate::{Scalar, Vec3};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiskParams {
    /// Reference density at `r_ref_au` in the midplane, kg/m^3.
    pub rho_ref: Scalar,
    pub r_ref_au: Scalar,
    /// Radial density exponent.
    pub alpha: Scalar,
    /// Flaring exponent of the scale height.
    pub beta: Scalar,
    /// Scale height at `r_ref_au`, in AU.
    pub h_ref_au: Scalar,
    pub inner_radius_au: Scalar,
    pub outer_radius_au: Scalar,
    pub z_max_au: Scalar,
    /// Temperature at `r_ref_au`, K, falling off as r^-t_exp.
    pub t_ref: Scalar,
    pub t_exp: Scalar,
    /// Toroidal field strength, T.
    pub b_phi: Scalar,
    pub stellar_mass_msun: Scalar,
    pub gas_mass_msun: Scalar,
    pub dust_to_gas: Scalar,
}

impl Default for DiskParams {
    fn default() -> Self {
        DiskParams {
            rho_ref: 1e-15,
            r_ref_au: 100.,
            alpha: 2.1,
            beta: 1.1,
            h_ref_au: 10.,
            inner_radius_au: 1.,
            outer_radius_au: 300.,
            z_max_au: 100.,
            t_ref: 20.,
            t_exp: 0.5,
            b_phi: 1e-8,
            stellar_mass_msun: 0.7,
            gas_mass_msun: 1e-2,
            dust_to_gas: 0.01,
        }
    }
}

pub struct DiskModel {
    params: DiskParams,
}

impl DiskModel {
    pub fn new(params: DiskParams) -> Self {
        DiskModel { params }
    }

    fn cylindrical_radius(position: &Vec3) -> Scalar {
        (position.x * position.x + position.y * position.y).sqrt()
    }

    fn scale_height(&self, r: Scalar) -> Scalar {
        let p = &self.params;
        p.h_ref_au * AU * (r / (p.r_ref_au * AU)).powf(p.beta)
    }
}

impl QuantityModel for DiskModel {
    fn density(&self, position: &Vec3, _distribution: usize, _region: usize) -> Scalar {
        let p = &self.params;
        let r = Self::cylindrical_radius(position);
        if r < p.inner_radius_au * AU || r > p.outer_radius_au * AU {
            return 0.;
        }
        let h = self.scale_height(r);
        let vertical = (-0.5 * (position.z / h).powi(2)).exp();
        p.rho_ref * (r / (p.r_ref_au * AU)).powf(-p.alpha) * vertical
    }

    fn dust_to_gas(&self, _distribution: usize) -> Scalar {
        self.params.dust_to_gas
    }

    fn temperature(&self, position: &Vec3) -> Scalar {
        let p = &self.params;
        let r = Self::cylindrical_radius(position).max(p.inner_radius_au * AU);
        (p.t_ref * (r / (p.r_ref_au * AU)).powf(-p.t_exp)).max(2.7)
    }

    fn velocity(&self, position: &Vec3) -> Vec3 {
        let p = &self.params;
        let r = Self::cylindrical_radius(position);
        if r < p.inner_radius_au * AU {
            return Vec3::zeros();
        }
        let v_kep = (GRAV * p.stellar_mass_msun * M_SUN / r).sqrt();
        // tangential unit vector in the rotation direction
        Vec3::new(-position.y / r, position.x / r, 0.) * v_kep
    }

    fn magnetic_field(&self, position: &Vec3) -> Vec3 {
        let p = &self.params;
        let r = Self::cylindrical_radius(position);
        if r < p.inner_radius_au * AU || r > p.outer_radius_au * AU {
            return Vec3::zeros();
        }
        Vec3::new(-position.y / r, position.x / r, 0.) * p.b_phi
    }

    fn target_gas_mass(&self) -> Option<MassTarget> {
        Some(MassTarget::Total(self.params.gas_mass_msun * M_SUN))
    }

    fn extent_defaults(&self) -> ExtentDefaults {
        let p = &self.params;
        ExtentDefaults {
            grid_type: Some(GridKind::Cylindrical),
            max_tree_level: Some(6),
            sidelength: Some(2. * p.outer_radius_au * AU),
            inner_radius: Some(p.inner_radius_au * AU),
            outer_radius: Some(p.outer_radius_au * AU),
            z_max: Some(p.z_max_au * AU),
            n_r: Some(100),
            n_ph: Some(1),
            n_th: Some(1),
            n_z: Some(40),
            sf_r: Some(1.03),
            sf_z: Some(1.05),
            ..ExtentDefaults::default()
        }
    }
}
