//! Cylindrical shell geometry: cells indexed by (radial, azimuthal,
//! vertical). The vertical axis runs from -z_max to +z_max and is refined
//! towards the midplane when sf_z is not 1; the radial axis behaves exactly
//! like the spherical one, including the optional innermost-cell split.

use crate::builder::{
    axis_boundaries, mirrored_boundaries, split_innermost, BuildContext, GridBuilder,
};
use crate::config::GridConfig;
use crate::error::Result;
use crate::grid::{write_cell, Extent, GridHeader, GridKind, FORMAT_VERSION};
use crate::model::QuantityModel;
use crate::normalize::{MassAccumulator, RelativeDensityFactor};
use crate::{Scalar, Vec3};
use itertools::iproduct;
use std::f64::consts::PI;
use std::io::Write;

pub struct CylindricalRoot {
    pub r: Vec<Scalar>,
    pub ph: Vec<Scalar>,
    pub z: Vec<Scalar>,
}

pub struct CylindricalBuilder<'a> {
    ctx: BuildContext<'a>,
}

impl<'a> CylindricalBuilder<'a> {
    pub fn new(
        model: &'a dyn QuantityModel,
        cfg: &'a GridConfig,
        factors: Option<RelativeDensityFactor>,
    ) -> Self {
        CylindricalBuilder {
            ctx: BuildContext::new(model, cfg, factors),
        }
    }
}

fn sector_volume(r0: Scalar, r1: Scalar, ph0: Scalar, ph1: Scalar, z0: Scalar, z1: Scalar) -> Scalar {
    0.5 * (r1 * r1 - r0 * r0) * (ph1 - ph0) * (z1 - z0)
}

impl GridBuilder for CylindricalBuilder<'_> {
    type Root = CylindricalRoot;

    fn kind(&self) -> GridKind {
        GridKind::Cylindrical
    }

    fn init_root(&self) -> Result<CylindricalRoot> {
        let cfg = self.ctx.cfg;
        let inner = cfg.require(cfg.inner_radius, "inner_radius")?;
        let outer = cfg.require(cfg.outer_radius, "outer_radius")?;
        let z_max = cfg.require(cfg.z_max, "z_max")?;

        let mut r = axis_boundaries(inner, outer, cfg.n_r, cfg.sf_r);
        split_innermost(&mut r, cfg.split_first_cell);
        let ph = axis_boundaries(0., 2. * PI, cfg.n_ph, cfg.sf_ph);
        let z = mirrored_boundaries(-z_max, z_max, cfg.n_z, cfg.sf_z, "z")?;

        Ok(CylindricalRoot { r, ph, z })
    }

    fn header(&self, root: &CylindricalRoot) -> GridHeader {
        let cfg = self.ctx.cfg;
        GridHeader {
            version: FORMAT_VERSION,
            kind: GridKind::Cylindrical,
            extent: Extent::Cylinder {
                inner_radius: root.r[0],
                outer_radius: *root.r.last().unwrap(),
                z_max: *root.z.last().unwrap(),
                n_r: (root.r.len() - 1) as u32,
                n_ph: (root.ph.len() - 1) as u32,
                n_z: (root.z.len() - 1) as u32,
                sf_r: cfg.sf_r,
                sf_ph: cfg.sf_ph,
                sf_z: cfg.sf_z,
            },
            quantities: self.ctx.quantities.clone(),
        }
    }

    fn create_grid<W: Write>(&self, w: &mut W, root: CylindricalRoot) -> Result<MassAccumulator> {
        let mut acc = self.ctx.accumulator();
        for (i_r, i_ph, i_z) in iproduct!(
            0..root.r.len() - 1,
            0..root.ph.len() - 1,
            0..root.z.len() - 1
        ) {
            let (r0, r1) = (root.r[i_r], root.r[i_r + 1]);
            let (ph0, ph1) = (root.ph[i_ph], root.ph[i_ph + 1]);
            let (z0, z1) = (root.z[i_z], root.z[i_z + 1]);

            let r_c = 0.5 * (r0 + r1);
            let ph_c = 0.5 * (ph0 + ph1);
            let center = Vec3::new(r_c * ph_c.cos(), r_c * ph_c.sin(), 0.5 * (z0 + z1));
            let volume = sector_volume(r0, r1, ph0, ph1, z0, z1);
            let values = self.ctx.sample_cell(&center, volume, &mut acc);
            write_cell(w, &values)?;
        }
        Ok(acc)
    }
}
