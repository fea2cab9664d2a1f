//! The three geometry builders and the protocol they share. Each variant is
//! self-contained: it lays out its own cell topology, queries the model at
//! every cell's representative point, and streams records through the shared
//! serializer while a [`MassAccumulator`] keeps the per-pair totals.

pub(crate) mod cylindrical;
pub(crate) mod octree;
pub(crate) mod spherical;

pub use cylindrical::CylindricalBuilder;
pub use octree::OctreeBuilder;
pub use spherical::SphericalBuilder;

use crate::config::GridConfig;
use crate::error::{GridError, Result};
use crate::grid::{quantity_schema, CellValues, GridHeader, GridKind, Quantity};
use crate::model::QuantityModel;
use crate::normalize::{MassAccumulator, RelativeDensityFactor};
use crate::{Scalar, Vec3};
use std::io::Write;
use std::path::Path;

/// The polymorphic build protocol. `init_root` sizes the root cell from the
/// merged configuration, `write_header` emits the header, `create_grid`
/// visits every cell and returns the mass totals. `normalize_density` is the
/// scalar-target path: it rescales the density slots of an already written
/// grid instead of rebuilding it.
pub trait GridBuilder {
    type Root;

    fn kind(&self) -> GridKind;

    fn init_root(&self) -> Result<Self::Root>;

    fn header(&self, root: &Self::Root) -> GridHeader;

    fn create_grid<W: Write>(&self, w: &mut W, root: Self::Root) -> Result<MassAccumulator>;

    fn write_header<W: Write>(&self, w: &mut W, root: &Self::Root) -> Result<()> {
        self.header(root).write_to(w)
    }

    fn normalize_density(
        &self,
        tmp_file: &Path,
        grid_file: &Path,
        factors: &RelativeDensityFactor,
    ) -> Result<()> {
        crate::migrate::rescale_densities(tmp_file, grid_file, factors)
    }
}

/// State shared by all three builders: the model, the merged configuration,
/// the cell schema, and the correction factors of a normalization rebuild.
pub(crate) struct BuildContext<'a> {
    pub model: &'a dyn QuantityModel,
    pub cfg: &'a GridConfig,
    pub quantities: Vec<Quantity>,
    pub factors: Option<RelativeDensityFactor>,
}

impl<'a> BuildContext<'a> {
    pub fn new(
        model: &'a dyn QuantityModel,
        cfg: &'a GridConfig,
        factors: Option<RelativeDensityFactor>,
    ) -> Self {
        BuildContext {
            model,
            cfg,
            quantities: quantity_schema(model.distributions()),
            factors,
        }
    }

    pub fn accumulator(&self) -> MassAccumulator {
        MassAccumulator::new(self.model.distributions(), self.model.regions())
    }

    /// Evaluate every quantity at a cell's representative point, fold the
    /// cell's mass into the accumulator, and return the record to write.
    pub fn sample_cell(
        &self,
        center: &Vec3,
        volume: Scalar,
        acc: &mut MassAccumulator,
    ) -> CellValues {
        let model = self.model;
        let region = model.region_of(center);
        let velocity = model.velocity(center);
        let field = model.magnetic_field(center);

        let mut values = CellValues::new();
        for q in &self.quantities {
            let v = match *q {
                Quantity::GasDensity(d) => {
                    let d = d as usize;
                    let factor = self.factors.as_ref().map_or(1., |f| f.gas(d, region));
                    let rho = model.density(center, d, region) * factor;
                    acc.add_gas(d, region, rho * volume);
                    rho
                }
                Quantity::DustDensity(d) => {
                    let d = d as usize;
                    let factor = self.factors.as_ref().map_or(1., |f| f.dust(d, region));
                    let rho = model.density(center, d, region) * model.dust_to_gas(d) * factor;
                    acc.add_dust(d, region, rho * volume);
                    rho
                }
                Quantity::Temperature => model.temperature(center),
                Quantity::VelocityX => velocity.x,
                Quantity::VelocityY => velocity.y,
                Quantity::VelocityZ => velocity.z,
                Quantity::MagneticX => field.x,
                Quantity::MagneticY => field.y,
                Quantity::MagneticZ => field.z,
                Quantity::AlignRadius => self
                    .cfg
                    .align_radius
                    .unwrap_or_else(|| model.alignment_radius(center)),
            };
            values.push(v);
        }
        acc.count_cell();
        values
    }
}

/// Boundaries of one axis with `n` cells between `start` and `end` whose
/// widths grow by the step factor `sf` per cell; `sf = 1` is uniform.
pub(crate) fn axis_boundaries(start: Scalar, end: Scalar, n: usize, sf: Scalar) -> Vec<Scalar> {
    debug_assert!(n >= 1);
    let mut bounds = Vec::with_capacity(n + 1);
    if (sf - 1.).abs() < 1e-12 {
        for i in 0..=n {
            bounds.push(start + (end - start) * i as Scalar / n as Scalar);
        }
    } else {
        let w0 = (end - start) * (sf - 1.) / (sf.powi(n as i32) - 1.);
        let mut x = start;
        bounds.push(x);
        for i in 0..n {
            x += w0 * sf.powi(i as i32);
            bounds.push(x);
        }
        bounds[n] = end;
    }
    bounds
}

/// Boundaries of an axis that is refined symmetrically towards its midpoint
/// (the disk midplane for z, the equator for theta). `sf != 1` needs an even
/// cell count so the two halves mirror exactly.
pub(crate) fn mirrored_boundaries(
    min: Scalar,
    max: Scalar,
    n: usize,
    sf: Scalar,
    axis: &'static str,
) -> Result<Vec<Scalar>> {
    if (sf - 1.).abs() < 1e-12 {
        return Ok(axis_boundaries(min, max, n, sf));
    }
    if n % 2 != 0 {
        return Err(GridError::Configuration(format!(
            "n_{} must be even when sf_{} != 1, got {}",
            axis, axis, n
        )));
    }
    let center = 0.5 * (min + max);
    let half = axis_boundaries(0., center - min, n / 2, sf);
    let mut bounds = Vec::with_capacity(n + 1);
    for w in half.iter().rev() {
        bounds.push(center - w);
    }
    for w in half.iter().skip(1) {
        bounds.push(center + w);
    }
    Ok(bounds)
}

/// Replace the innermost radial cell with `k` equal sub-shells to resolve
/// steep inner gradients. `k < 2` leaves the boundaries untouched.
pub(crate) fn split_innermost(bounds: &mut Vec<Scalar>, k: usize) {
    if k < 2 || bounds.len() < 2 {
        return;
    }
    let lo = bounds[0];
    let hi = bounds[1];
    let sub: Vec<Scalar> = (1..k)
        .map(|i| lo + (hi - lo) * i as Scalar / k as Scalar)
        .collect();
    bounds.splice(1..1, sub);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn boundaries_are_monotonic_and_hit_the_ends(
            n in 1usize..60,
            sf in 0.8f64..1.5,
            span in 1.0f64..1e4,
        ) {
            let bounds = axis_boundaries(2., 2. + span, n, sf);
            prop_assert_eq!(bounds.len(), n + 1);
            prop_assert_eq!(bounds[0], 2.);
            prop_assert_eq!(bounds[n], 2. + span);
            for w in bounds.windows(2) {
                prop_assert!(w[1] > w[0]);
            }
        }

        #[test]
        fn geometric_widths_grow_by_the_step_factor(n in 2usize..30) {
            let sf = 1.1;
            let bounds = axis_boundaries(0., 100., n, sf);
            for w in bounds.windows(3) {
                let ratio = (w[2] - w[1]) / (w[1] - w[0]);
                prop_assert!((ratio - sf).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn uniform_factor_gives_uniform_widths() {
        let bounds = axis_boundaries(0., 10., 5, 1.);
        for (i, b) in bounds.iter().enumerate() {
            assert!((b - 2. * i as Scalar).abs() < 1e-12);
        }
    }

    #[test]
    fn mirrored_boundaries_are_symmetric() {
        let bounds = mirrored_boundaries(-4., 4., 6, 1.3, "z").unwrap();
        assert_eq!(bounds.len(), 7);
        assert_eq!(bounds[0], -4.);
        assert_eq!(bounds[6], 4.);
        assert!(bounds[3].abs() < 1e-12);
        for i in 0..bounds.len() {
            assert!((bounds[i] + bounds[bounds.len() - 1 - i]).abs() < 1e-9);
        }
        // finest cells sit at the midplane
        let inner = bounds[4] - bounds[3];
        let outer = bounds[6] - bounds[5];
        assert!(outer > inner);
    }

    #[test]
    fn mirrored_refinement_needs_an_even_count() {
        assert!(mirrored_boundaries(-1., 1., 5, 1.2, "z").is_err());
        assert!(mirrored_boundaries(-1., 1., 5, 1., "z").is_ok());
    }

    #[test]
    fn split_innermost_inserts_equal_subshells() {
        let mut bounds = vec![0., 10., 20.];
        split_innermost(&mut bounds, 4);
        assert_eq!(bounds, vec![0., 2.5, 5., 7.5, 10., 20.]);

        let mut untouched = vec![0., 10.];
        split_innermost(&mut untouched, 1);
        assert_eq!(untouched, vec![0., 10.]);
    }
}
