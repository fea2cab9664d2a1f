//! Drives a whole grid build: pick the geometry, write the first
//! (unnormalized) pass to a temporary file, turn the measured masses into a
//! scaling plan, apply it, and only then rename the finished grid over the
//! requested filename. A failed run leaves the target either untouched or
//! absent, never half-written.

use crate::builder::{CylindricalBuilder, GridBuilder, OctreeBuilder, SphericalBuilder};
use crate::config::GridConfig;
use crate::error::Result;
use crate::grid::{GridKind, Quantity};
use crate::migrate;
use crate::model::QuantityModel;
use crate::normalize::{self, MassAccumulator, RelativeDensityFactor, ScalingPlan};
use crate::Scalar;
use std::fs;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub fn generate(model: &dyn QuantityModel, cfg: &GridConfig, grid_file: &Path) -> Result<()> {
    info!(
        "building {} grid for {} distributions x {} regions",
        cfg.kind.label(),
        model.distributions(),
        model.regions()
    );
    match cfg.kind {
        GridKind::Octree => run_generate(|f| OctreeBuilder::new(model, cfg, f), model, cfg, grid_file),
        GridKind::Spherical => {
            run_generate(|f| SphericalBuilder::new(model, cfg, f), model, cfg, grid_file)
        }
        GridKind::Cylindrical => {
            run_generate(|f| CylindricalBuilder::new(model, cfg, f), model, cfg, grid_file)
        }
    }
}

fn run_generate<B, F>(
    make: F,
    model: &dyn QuantityModel,
    cfg: &GridConfig,
    grid_file: &Path,
) -> Result<()>
where
    B: GridBuilder,
    F: Fn(Option<RelativeDensityFactor>) -> B,
{
    let raw_file = stage_path(grid_file, "raw");
    let scaled_file = stage_path(grid_file, "scaled");

    let result = (|| -> Result<()> {
        let builder = make(None);
        let acc = build_pass(&builder, &raw_file)?;
        info!(
            "first pass: {} cells, {:.6e} kg gas, {:.6e} kg dust",
            acc.cell_count(),
            acc.total_gas_mass().sum(),
            acc.total_dust_mass().sum()
        );

        match normalize::plan(model, cfg.gas_mass, &acc)? {
            ScalingPlan::Keep => {
                fs::rename(&raw_file, grid_file)?;
            }
            ScalingPlan::RescaleInPlace(factors) => {
                debug!("density correction factors: {:?}", factors);
                builder.normalize_density(&raw_file, &scaled_file, &factors)?;
                fs::remove_file(&raw_file)?;
                fs::rename(&scaled_file, grid_file)?;
                info!("rescaled grid to the requested total mass");
            }
            ScalingPlan::Rebuild(factors) => {
                debug!("density correction factors: {:?}", factors);
                let normalized = make(Some(factors));
                let acc = build_pass(&normalized, &scaled_file)?;
                fs::remove_file(&raw_file)?;
                fs::rename(&scaled_file, grid_file)?;
                info!(
                    "normalized pass: {:.6e} kg gas, {:.6e} kg dust",
                    acc.total_gas_mass().sum(),
                    acc.total_dust_mass().sum()
                );
            }
        }
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&raw_file);
        let _ = fs::remove_file(&scaled_file);
    } else {
        info!("wrote {:?}", grid_file);
    }
    result
}

fn build_pass<B: GridBuilder>(builder: &B, file: &Path) -> Result<MassAccumulator> {
    let root = builder.init_root()?;
    let mut w = BufWriter::new(File::create(file)?);
    builder.write_header(&mut w, &root)?;
    let acc = builder.create_grid(&mut w, root)?;
    w.flush()?;
    Ok(acc)
}

/// Lift an existing grid file to the current format revision in place.
pub fn update_grid(grid_file: &Path) -> Result<()> {
    rewrite(grid_file, "update", migrate::update)?;
    info!("updated {:?} to the current format", grid_file);
    Ok(())
}

/// Take an existing grid file back to the previous format revision in place.
pub fn revert_grid(grid_file: &Path) -> Result<()> {
    rewrite(grid_file, "revert", migrate::revert)?;
    info!("reverted {:?} to the previous format", grid_file);
    Ok(())
}

/// Set the grain-alignment radius of every cell to a constant.
pub fn set_align_radius(grid_file: &Path, radius: Scalar) -> Result<()> {
    rewrite(grid_file, "align", |input, output| {
        migrate::patch_quantity(input, output, Quantity::AlignRadius, radius)
    })?;
    info!("set alignment radius to {:.3e} m in {:?}", radius, grid_file);
    Ok(())
}

fn rewrite<F>(grid_file: &Path, stage: &str, transform: F) -> Result<()>
where
    F: FnOnce(&Path, &Path) -> Result<()>,
{
    let tmp = stage_path(grid_file, stage);
    match transform(grid_file, &tmp) {
        Ok(()) => {
            fs::rename(&tmp, grid_file)?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

/// Print a human-readable summary of an existing grid file.
pub fn print_info(grid_file: &Path, out: &mut dyn Write) -> Result<()> {
    let mut cells = 0usize;
    let mut minima: Vec<Scalar> = Vec::new();
    let mut maxima: Vec<Scalar> = Vec::new();
    let header = migrate::walk(grid_file, |header, values| {
        if cells == 0 {
            minima = vec![Scalar::INFINITY; header.record_len()];
            maxima = vec![Scalar::NEG_INFINITY; header.record_len()];
        }
        for (i, v) in values.iter().enumerate() {
            minima[i] = minima[i].min(*v);
            maxima[i] = maxima[i].max(*v);
        }
        cells += 1;
    })?;

    writeln!(out, "{:?}", grid_file)?;
    writeln!(out, "  geometry: {}", header.kind.label())?;
    writeln!(out, "  format version: {}", header.version)?;
    writeln!(out, "  extent: {:?}", header.extent)?;
    writeln!(out, "  cells: {}", cells)?;
    for (i, q) in header.quantities.iter().enumerate() {
        if cells == 0 {
            writeln!(out, "  {:?}", q)?;
        } else {
            writeln!(
                out,
                "  {:?}: min {:.6e}, max {:.6e}",
                q, minima[i], maxima[i]
            )?;
        }
    }
    Ok(())
}

fn stage_path(grid_file: &Path, stage: &str) -> PathBuf {
    let mut name = grid_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", stage));
    grid_file.with_file_name(name)
}
