//! Spherical shell geometry: cells indexed by (radial, azimuthal, polar)
//! into an implicit n_r x n_ph x n_th grid. Radial boundaries follow the
//! sf_r progression (optionally with the innermost cell split), the polar
//! axis is refined towards the equator, and cells are streamed in index
//! order without ever materializing the full grid.

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

/// Cell boundaries along each axis, radial splitting already applied.
pub struct SphericalRoot {
    pub r: Vec<Scalar>,
    pub ph: Vec<Scalar>,
    pub th: Vec<Scalar>,
}

pub struct SphericalBuilder<'a> {
    ctx: BuildContext<'a>,
}

impl<'a> SphericalBuilder<'a> {
    pub fn new(
        model: &'a dyn QuantityModel,
        cfg: &'a GridConfig,
        factors: Option<RelativeDensityFactor>,
    ) -> Self {
        SphericalBuilder {
            ctx: BuildContext::new(model, cfg, factors),
        }
    }
}

/// Volume of the shell sector [r0, r1] x [ph0, ph1] x [th0, th1], theta
/// measured as colatitude from the +z axis.
fn sector_volume(r0: Scalar, r1: Scalar, ph0: Scalar, ph1: Scalar, th0: Scalar, th1: Scalar) -> Scalar {
    (r1.powi(3) - r0.powi(3)) / 3. * (ph1 - ph0) * (th0.cos() - th1.cos())
}

fn cartesian(r: Scalar, ph: Scalar, th: Scalar) -> Vec3 {
    Vec3::new(r * th.sin() * ph.cos(), r * th.sin() * ph.sin(), r * th.cos())
}

impl GridBuilder for SphericalBuilder<'_> {
    type Root = SphericalRoot;

    fn kind(&self) -> GridKind {
        GridKind::Spherical
    }

    fn init_root(&self) -> Result<SphericalRoot> {
        let cfg = self.ctx.cfg;
        let inner = cfg.require(cfg.inner_radius, "inner_radius")?;
        let outer = cfg.require(cfg.outer_radius, "outer_radius")?;

        let mut r = axis_boundaries(inner, outer, cfg.n_r, cfg.sf_r);
        split_innermost(&mut r, cfg.split_first_cell);
        let ph = axis_boundaries(0., 2. * PI, cfg.n_ph, cfg.sf_ph);
        let th = mirrored_boundaries(0., PI, cfg.n_th, cfg.sf_th, "th")?;

        Ok(SphericalRoot { r, ph, th })
    }

    fn header(&self, root: &SphericalRoot) -> GridHeader {
        let cfg = self.ctx.cfg;
        GridHeader {
            version: FORMAT_VERSION,
            kind: GridKind::Spherical,
            extent: Extent::Sphere {
                inner_radius: root.r[0],
                outer_radius: *root.r.last().unwrap(),
                n_r: (root.r.len() - 1) as u32,
                n_ph: (root.ph.len() - 1) as u32,
                n_th: (root.th.len() - 1) as u32,
                sf_r: cfg.sf_r,
                sf_ph: cfg.sf_ph,
                sf_th: cfg.sf_th,
            },
            quantities: self.ctx.quantities.clone(),
        }
    }

    fn create_grid<W: Write>(&self, w: &mut W, root: SphericalRoot) -> Result<MassAccumulator> {
        let mut acc = self.ctx.accumulator();
        for (i_r, i_ph, i_th) in iproduct!(
            0..root.r.len() - 1,
            0..root.ph.len() - 1,
            0..root.th.len() - 1
        ) {
            let (r0, r1) = (root.r[i_r], root.r[i_r + 1]);
            let (ph0, ph1) = (root.ph[i_ph], root.ph[i_ph + 1]);
            let (th0, th1) = (root.th[i_th], root.th[i_th + 1]);

            let center = cartesian(0.5 * (r0 + r1), 0.5 * (ph0 + ph1), 0.5 * (th0 + th1));
            let volume = sector_volume(r0, r1, ph0, ph1, th0, th1);
            let values = self.ctx.sample_cell(&center, volume, &mut acc);
            write_cell(w, &values)?;
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::UniformModel;
    use crate::model::ExtentDefaults;

    fn config(n_r: usize, n_ph: usize, n_th: usize, sf_r: Scalar) -> GridConfig {
        let cli = ExtentDefaults {
            grid_type: Some(GridKind::Spherical),
            inner_radius: Some(0.),
            outer_radius: Some(10.),
            n_r: Some(n_r),
            n_ph: Some(n_ph),
            n_th: Some(n_th),
            sf_r: Some(sf_r),
            ..ExtentDefaults::default()
        };
        GridConfig::resolve(&cli, &ExtentDefaults::default(), None, None).unwrap()
    }

    #[test]
    fn shell_volumes_sum_to_the_sphere() {
        let model = UniformModel::new(1.);
        let cfg = config(16, 5, 4, 1.1);
        let builder = SphericalBuilder::new(&model, &cfg, None);
        let root = builder.init_root().unwrap();

        let mut total = 0.;
        for (i_r, i_ph, i_th) in iproduct!(0..16, 0..5, 0..4) {
            total += sector_volume(
                root.r[i_r],
                root.r[i_r + 1],
                root.ph[i_ph],
                root.ph[i_ph + 1],
                root.th[i_th],
                root.th[i_th + 1],
            );
        }
        let exact = 4. / 3. * PI * 1000.;
        assert!((total - exact).abs() < 1e-9 * exact);
    }

    #[test]
    fn uniform_mass_matches_the_analytic_total() {
        let model = UniformModel::new(2.);
        let cfg = config(10, 1, 1, 1.);
        let builder = SphericalBuilder::new(&model, &cfg, None);
        let root = builder.init_root().unwrap();
        let mut sink = Vec::new();
        let acc = builder.create_grid(&mut sink, root).unwrap();

        assert_eq!(acc.cell_count(), 10);
        let exact = 2. * 4. / 3. * PI * 1000.;
        let measured = acc.total_gas_mass()[(0, 0)];
        assert!((measured - exact).abs() < 1e-9 * exact);
        // 10 cells x (2 density slots + 8 shared quantities)
        assert_eq!(sink.len(), 10 * 10 * 8);
    }

    #[test]
    fn split_first_cell_adds_subshells() {
        let model = UniformModel::new(1.);
        let cli = ExtentDefaults {
            grid_type: Some(GridKind::Spherical),
            inner_radius: Some(1.),
            outer_radius: Some(2.),
            n_r: Some(4),
            split_first_cell: Some(3),
            ..ExtentDefaults::default()
        };
        let cfg = GridConfig::resolve(&cli, &ExtentDefaults::default(), None, None).unwrap();
        let builder = SphericalBuilder::new(&model, &cfg, None);
        let root = builder.init_root().unwrap();
        assert_eq!(root.r.len(), 4 + 3 - 1 + 1);

        let header = builder.header(&root);
        assert_eq!(header.extent.cell_count(), Some(6));
    }
}
