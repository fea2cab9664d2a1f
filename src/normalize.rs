//! Mass accounting and the correction factors that make integrated masses hit
//! their targets. A build pass accumulates mass per (distribution, region);
//! afterwards the accumulated totals are compared against the model's (or the
//! command line's) targets and turned into a scaling plan:
//! scalar targets rescale the already-written grid in place, matrix targets
//! force a full rebuild so density-dependent refinement decisions stay
//! consistent with the written quantities.

use crate::error::{GridError, Result};
use crate::model::{MassTarget, QuantityModel};
use crate::Scalar;
use nalgebra::DMatrix;
use tracing::warn;

/// Masses below this are treated as "no measurable mass" when computing
/// correction factors.
pub const MASS_EPSILON: Scalar = 1e-20;

/// Running gas and dust mass totals of one build pass, one entry per
/// (distribution, region) pair. Created fresh per pass and read once.
#[derive(Debug, Clone)]
pub struct MassAccumulator {
    gas: DMatrix<Scalar>,
    dust: DMatrix<Scalar>,
    cells: usize,
}

impl MassAccumulator {
    pub fn new(distributions: usize, regions: usize) -> Self {
        MassAccumulator {
            gas: DMatrix::zeros(distributions, regions),
            dust: DMatrix::zeros(distributions, regions),
            cells: 0,
        }
    }

    pub fn add_gas(&mut self, distribution: usize, region: usize, mass: Scalar) {
        self.gas[(distribution, region)] += mass;
    }

    pub fn add_dust(&mut self, distribution: usize, region: usize, mass: Scalar) {
        self.dust[(distribution, region)] += mass;
    }

    pub fn count_cell(&mut self) {
        self.cells += 1;
    }

    pub fn cell_count(&self) -> usize {
        self.cells
    }

    pub fn total_gas_mass(&self) -> &DMatrix<Scalar> {
        &self.gas
    }

    pub fn total_dust_mass(&self) -> &DMatrix<Scalar> {
        &self.dust
    }
}

/// Multiplicative density corrections per (distribution, region), one matrix
/// for gas and one for dust. Scalar targets produce single-column matrices
/// that apply to every region alike.
#[derive(Debug, Clone)]
pub struct RelativeDensityFactor {
    gas: DMatrix<Scalar>,
    dust: DMatrix<Scalar>,
}

impl RelativeDensityFactor {
    pub fn gas(&self, distribution: usize, region: usize) -> Scalar {
        lookup(&self.gas, distribution, region)
    }

    pub fn dust(&self, distribution: usize, region: usize) -> Scalar {
        lookup(&self.dust, distribution, region)
    }
}

fn lookup(m: &DMatrix<Scalar>, distribution: usize, region: usize) -> Scalar {
    m[(distribution.min(m.nrows() - 1), region.min(m.ncols() - 1))]
}

/// What to do with the grid written by the first (unnormalized) pass.
#[derive(Debug, Clone)]
pub enum ScalingPlan {
    /// No mass targets; the first pass is already final.
    Keep,
    /// Every target is a single total: rescale the written grid in place.
    RescaleInPlace(RelativeDensityFactor),
    /// At least one per-region target matrix: rebuild from scratch with the
    /// factors applied at quantity-write time.
    Rebuild(RelativeDensityFactor),
}

/// Turn the measured masses of the first pass into a scaling plan.
/// `cli_gas_mass` is the scalar override from the command line and wins over
/// the model's declared gas target.
pub fn plan(
    model: &dyn QuantityModel,
    cli_gas_mass: Option<Scalar>,
    measured: &MassAccumulator,
) -> Result<ScalingPlan> {
    let gas_target = cli_gas_mass
        .map(MassTarget::Total)
        .or_else(|| model.target_gas_mass());
    let dust_target = model.target_dust_mass();

    if gas_target.is_none() && dust_target.is_none() {
        return Ok(ScalingPlan::Keep);
    }

    let shape = (model.distributions(), model.regions());
    let ignored = model.ignored_mass();
    if let Some(ig) = &ignored {
        check_shape(ig, shape)?;
    }

    let gas = match &gas_target {
        Some(target) => factor_matrix(target, measured.total_gas_mass(), ignored.as_ref(), shape)?,
        None => uniform(1., shape),
    };
    // Without an explicit dust target the dust tracks its gas distribution,
    // so the same correction applies.
    let dust = match &dust_target {
        Some(target) => factor_matrix(target, measured.total_dust_mass(), None, shape)?,
        None => gas.clone(),
    };

    let any_matrix = matches!(gas_target, Some(MassTarget::PerRegion(_)))
        || matches!(dust_target, Some(MassTarget::PerRegion(_)));

    let factors = RelativeDensityFactor { gas, dust };
    if any_matrix {
        Ok(ScalingPlan::Rebuild(factors))
    } else {
        Ok(ScalingPlan::RescaleInPlace(factors))
    }
}

fn uniform(value: Scalar, (distributions, _): (usize, usize)) -> DMatrix<Scalar> {
    DMatrix::from_element(distributions, 1, value)
}

fn factor_matrix(
    target: &MassTarget,
    measured: &DMatrix<Scalar>,
    ignored: Option<&DMatrix<Scalar>>,
    shape: (usize, usize),
) -> Result<DMatrix<Scalar>> {
    match target {
        MassTarget::Total(target_mass) => {
            let total = measured.sum() - ignored.map_or(0., |m| m.sum());
            Ok(uniform(ratio(*target_mass, total, "total"), shape))
        }
        MassTarget::PerRegion(targets) => {
            check_shape(targets, shape)?;
            let mut factors = DMatrix::from_element(shape.0, shape.1, 1.);
            for d in 0..shape.0 {
                for r in 0..shape.1 {
                    let m = measured[(d, r)] - ignored.map_or(0., |ig| ig[(d, r)]);
                    factors[(d, r)] =
                        ratio(targets[(d, r)], m, &format!("distribution {} region {}", d, r));
                }
            }
            Ok(factors)
        }
    }
}

/// Target/measured with the degenerate cases pinned to 1: a pair with neither
/// target nor measurable mass is already satisfied, and a pair with a target
/// but no mass to scale cannot be corrected by any factor.
fn ratio(target: Scalar, measured: Scalar, what: &str) -> Scalar {
    if target.abs() < MASS_EPSILON && measured.abs() < MASS_EPSILON {
        1.
    } else if measured.abs() < MASS_EPSILON {
        warn!(
            "no measurable mass for {} but a target of {:.3e} kg; leaving density unscaled",
            what, target
        );
        1.
    } else {
        target / measured
    }
}

fn check_shape(m: &DMatrix<Scalar>, (distributions, regions): (usize, usize)) -> Result<()> {
    if m.nrows() != distributions || m.ncols() != regions {
        return Err(GridError::ShapeMismatch {
            target_rows: m.nrows(),
            target_cols: m.ncols(),
            model_rows: distributions,
            model_cols: regions,
        });
    }
    Ok(())
}

/// Build a rectangular matrix out of user-supplied nested rows.
pub fn matrix_from_rows(rows: &[Vec<Scalar>]) -> Result<DMatrix<Scalar>> {
    let ncols = rows.first().map_or(0, |r| r.len());
    if rows.is_empty() || ncols == 0 {
        return Err(GridError::Configuration(
            "mass target matrix is empty".to_string(),
        ));
    }
    if rows.iter().any(|r| r.len() != ncols) {
        return Err(GridError::Configuration(
            "mass target matrix rows have unequal lengths".to_string(),
        ));
    }
    let flat: Vec<Scalar> = rows.iter().flatten().copied().collect();
    Ok(DMatrix::from_row_slice(rows.len(), ncols, &flat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::{TwoZoneModel, UniformModel};

    #[test]
    fn no_targets_keeps_the_first_pass() {
        let model = UniformModel::new(1.);
        let acc = MassAccumulator::new(1, 1);
        assert!(matches!(
            plan(&model, None, &acc).unwrap(),
            ScalingPlan::Keep
        ));
    }

    #[test]
    fn scalar_target_rescales_in_place() {
        let model = UniformModel::with_target(1., 10.);
        let mut acc = MassAccumulator::new(1, 1);
        acc.add_gas(0, 0, 2.);
        acc.add_dust(0, 0, 0.02);
        match plan(&model, None, &acc).unwrap() {
            ScalingPlan::RescaleInPlace(f) => {
                assert!((f.gas(0, 0) - 5.).abs() < 1e-12);
                // any region index maps onto the single uniform column
                assert!((f.gas(0, 7) - 5.).abs() < 1e-12);
                assert!((f.dust(0, 0) - 5.).abs() < 1e-12);
            }
            other => panic!("expected RescaleInPlace, got {:?}", other),
        }
    }

    #[test]
    fn cli_gas_mass_wins_over_the_model_target() {
        let model = UniformModel::with_target(1., 10.);
        let mut acc = MassAccumulator::new(1, 1);
        acc.add_gas(0, 0, 2.);
        match plan(&model, Some(4.), &acc).unwrap() {
            ScalingPlan::RescaleInPlace(f) => assert!((f.gas(0, 0) - 2.).abs() < 1e-12),
            other => panic!("expected RescaleInPlace, got {:?}", other),
        }
    }

    #[test]
    fn matrix_target_forces_a_rebuild_and_empty_pairs_stay_at_one() {
        let model = TwoZoneModel {
            r_split: 1.,
            rho_in: 1.,
            rho_out: 1.,
            target: Some(DMatrix::from_row_slice(2, 2, &[4., 6., 0., 3.])),
        };
        let mut acc = MassAccumulator::new(2, 2);
        acc.add_gas(0, 0, 2.);
        acc.add_gas(0, 1, 2.);
        // (1, 0) stays empty: no mass, no target
        acc.add_gas(1, 1, 2.);
        match plan(&model, None, &acc).unwrap() {
            ScalingPlan::Rebuild(f) => {
                assert!((f.gas(0, 0) - 2.).abs() < 1e-12);
                assert!((f.gas(0, 1) - 3.).abs() < 1e-12);
                assert!((f.gas(1, 0) - 1.).abs() < 1e-12);
                assert!((f.gas(1, 1) - 1.5).abs() < 1e-12);
            }
            other => panic!("expected Rebuild, got {:?}", other),
        }
    }

    #[test]
    fn wrong_target_shape_is_fatal() {
        let model = TwoZoneModel {
            r_split: 1.,
            rho_in: 1.,
            rho_out: 1.,
            target: Some(DMatrix::from_row_slice(1, 2, &[4., 6.])),
        };
        let acc = MassAccumulator::new(2, 2);
        match plan(&model, None, &acc) {
            Err(GridError::ShapeMismatch {
                target_rows,
                model_rows,
                ..
            }) => {
                assert_eq!(target_rows, 1);
                assert_eq!(model_rows, 2);
            }
            other => panic!("expected ShapeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn ignored_mass_is_subtracted_before_dividing() {
        let target = MassTarget::PerRegion(DMatrix::from_element(1, 1, 6.));
        let measured = DMatrix::from_element(1, 1, 5.);
        let ignored = DMatrix::from_element(1, 1, 2.);
        let f = factor_matrix(&target, &measured, Some(&ignored), (1, 1)).unwrap();
        assert!((f[(0, 0)] - 2.).abs() < 1e-12);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        assert!(matrix_from_rows(&[vec![1., 2.], vec![3.]]).is_err());
        let m = matrix_from_rows(&[vec![1., 2.], vec![3., 4.]]).unwrap();
        assert_eq!(m[(1, 0)], 3.);
    }
}
