//! Online migration of persisted grids between format revisions, plus the
//! in-place quantity patch and the density rescale used by the scalar
//! normalization path. All of them are sequential stream transforms over the
//! shared record layout: read the header, map it, then map every cell record
//! while the octree node markers (if any) are copied through untouched, so
//! geometry is always preserved exactly.

use crate::error::{GridError, Result};
use crate::grid::{
    read_cell, read_marker, write_cell, write_marker, CellValues, GridHeader, Quantity,
    BRANCH_MARKER, DEFAULT_ALIGN_RADIUS, FORMAT_VERSION, FORMAT_VERSION_NO_ALIGN, LEAF_MARKER,
};
use crate::normalize::RelativeDensityFactor;
use crate::Scalar;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Receives the decoded stream in file order. Markers only appear for
/// octree grids.
trait CellSink {
    fn node_marker(&mut self, _marker: u8) -> Result<()> {
        Ok(())
    }

    fn cell(&mut self, values: &CellValues) -> Result<()>;
}

fn stream<R: Read, S: CellSink>(r: &mut R, header: &GridHeader, sink: &mut S) -> Result<()> {
    match header.extent.cell_count() {
        Some(n) => {
            for _ in 0..n {
                let values = read_cell(r, header.record_len())?;
                sink.cell(&values)?;
            }
        }
        None => {
            let max_level = header.extent.max_level().unwrap_or(0);
            stream_node(r, header, sink, 0, max_level)?;
        }
    }
    crate::grid::ensure_eof(r)
}

fn stream_node<R: Read, S: CellSink>(
    r: &mut R,
    header: &GridHeader,
    sink: &mut S,
    depth: u32,
    max_level: u32,
) -> Result<()> {
    let marker = read_marker(r)?;
    match marker {
        BRANCH_MARKER => {
            if depth >= max_level {
                return Err(GridError::CorruptGrid(format!(
                    "octree deeper than the declared maximum level {}",
                    max_level
                )));
            }
            sink.node_marker(marker)?;
            for _ in 0..8 {
                stream_node(r, header, sink, depth + 1, max_level)?;
            }
        }
        LEAF_MARKER => {
            sink.node_marker(marker)?;
            let values = read_cell(r, header.record_len())?;
            sink.cell(&values)?;
        }
        other => {
            return Err(GridError::CorruptGrid(format!(
                "invalid node marker {} at depth {}",
                other, depth
            )))
        }
    }
    Ok(())
}

struct MappingSink<'a, W: Write, F> {
    w: W,
    header: &'a GridHeader,
    map: F,
}

impl<W: Write, F> CellSink for MappingSink<'_, W, F>
where
    F: FnMut(&GridHeader, &CellValues) -> CellValues,
{
    fn node_marker(&mut self, marker: u8) -> Result<()> {
        write_marker(&mut self.w, marker)
    }

    fn cell(&mut self, values: &CellValues) -> Result<()> {
        let mapped = (self.map)(self.header, values);
        write_cell(&mut self.w, &mapped)
    }
}

struct ObservingSink<'a, F> {
    header: &'a GridHeader,
    observe: F,
}

impl<F> CellSink for ObservingSink<'_, F>
where
    F: FnMut(&GridHeader, &CellValues),
{
    fn cell(&mut self, values: &CellValues) -> Result<()> {
        (self.observe)(self.header, values);
        Ok(())
    }
}

/// Stream `input` to `output`, rewriting the header once and every cell
/// record through `map_cell`. Geometry (cell counts, octree topology) is
/// copied through verbatim.
pub fn transcode<H, F>(input: &Path, output: &Path, map_header: H, map_cell: F) -> Result<()>
where
    H: FnOnce(&GridHeader) -> Result<GridHeader>,
    F: FnMut(&GridHeader, &CellValues) -> CellValues,
{
    let mut r = BufReader::new(File::open(input)?);
    let header = GridHeader::read_from(&mut r)?;
    let out_header = map_header(&header)?;

    let mut w = BufWriter::new(File::create(output)?);
    out_header.write_to(&mut w)?;
    let mut sink = MappingSink {
        w: &mut w,
        header: &header,
        map: map_cell,
    };
    stream(&mut r, &header, &mut sink)?;
    w.flush()?;
    Ok(())
}

/// Read `input` sequentially, handing every cell record to `observe`.
pub fn walk<F>(input: &Path, observe: F) -> Result<GridHeader>
where
    F: FnMut(&GridHeader, &CellValues),
{
    let mut r = BufReader::new(File::open(input)?);
    let header = GridHeader::read_from(&mut r)?;
    let mut sink = ObservingSink {
        header: &header,
        observe,
    };
    stream(&mut r, &header, &mut sink)?;
    Ok(header)
}

/// Lift a revision-1 grid to the current layout: the grain-alignment radius
/// slot is appended to the schema and every cell gets its default value.
pub fn update(input: &Path, output: &Path) -> Result<()> {
    transcode(
        input,
        output,
        |header| {
            if header.version != FORMAT_VERSION_NO_ALIGN {
                return Err(GridError::Configuration(format!(
                    "grid is already at format version {}, nothing to update",
                    header.version
                )));
            }
            let mut out = header.clone();
            out.version = FORMAT_VERSION;
            out.quantities.push(Quantity::AlignRadius);
            Ok(out)
        },
        |_, values| {
            let mut out = values.clone();
            out.push(DEFAULT_ALIGN_RADIUS);
            out
        },
    )
}

/// Exact inverse of [`update`]: drop the alignment-radius slot and go back
/// to revision 1.
pub fn revert(input: &Path, output: &Path) -> Result<()> {
    transcode(
        input,
        output,
        |header| {
            if header.version == FORMAT_VERSION_NO_ALIGN {
                return Err(GridError::Configuration(
                    "grid is already at format version 1, nothing to revert".to_string(),
                ));
            }
            let idx = header.index_of(Quantity::AlignRadius).ok_or_else(|| {
                GridError::CorruptGrid(
                    "version 2 grid without an alignment-radius slot".to_string(),
                )
            })?;
            let mut out = header.clone();
            out.version = FORMAT_VERSION_NO_ALIGN;
            out.quantities.remove(idx);
            Ok(out)
        },
        |header, values| {
            let idx = header.index_of(Quantity::AlignRadius).unwrap();
            let mut out = values.clone();
            out.remove(idx);
            out
        },
    )
}

/// Rewrite one quantity slot of every cell to a constant while copying all
/// other fields and the topology bit-for-bit.
pub fn patch_quantity(input: &Path, output: &Path, quantity: Quantity, value: Scalar) -> Result<()> {
    transcode(
        input,
        output,
        |header| {
            if header.index_of(quantity).is_none() {
                return Err(GridError::Configuration(format!(
                    "grid has no {:?} slot (update it to the current format first)",
                    quantity
                )));
            }
            Ok(header.clone())
        },
        |header, values| {
            let idx = header.index_of(quantity).unwrap();
            let mut out = values.clone();
            out[idx] = value;
            out
        },
    )
}

/// Multiply every density slot by its distribution's correction factor.
/// This is the scalar-mass-target path, where the factors are uniform across
/// regions, so the lookup needs no positional information.
pub fn rescale_densities(
    input: &Path,
    output: &Path,
    factors: &RelativeDensityFactor,
) -> Result<()> {
    transcode(
        input,
        output,
        |header| Ok(header.clone()),
        |header, values| {
            let mut out = values.clone();
            for (i, q) in header.quantities.iter().enumerate() {
                match *q {
                    Quantity::GasDensity(d) => out[i] *= factors.gas(d as usize, 0),
                    Quantity::DustDensity(d) => out[i] *= factors.dust(d as usize, 0),
                    _ => {}
                }
            }
            out
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{GridBuilder, OctreeBuilder, SphericalBuilder};
    use crate::config::GridConfig;
    use crate::grid::GridKind;
    use crate::model::test_support::{TwoZoneModel, UniformModel};
    use crate::model::ExtentDefaults;
    use std::path::PathBuf;

    fn tmp(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dustgrid_migrate_{}_{}", std::process::id(), name))
    }

    fn write_spherical_grid(path: &Path) {
        let model = UniformModel::new(3e-18);
        let cli = ExtentDefaults {
            grid_type: Some(GridKind::Spherical),
            inner_radius: Some(0.),
            outer_radius: Some(10.),
            n_r: Some(6),
            n_ph: Some(2),
            n_th: Some(2),
            ..ExtentDefaults::default()
        };
        let cfg = GridConfig::resolve(&cli, &ExtentDefaults::default(), None, None).unwrap();
        let builder = SphericalBuilder::new(&model, &cfg, None);
        let root = builder.init_root().unwrap();
        let mut w = std::io::BufWriter::new(File::create(path).unwrap());
        builder.write_header(&mut w, &root).unwrap();
        builder.create_grid(&mut w, root).unwrap();
        use std::io::Write as _;
        w.flush().unwrap();
    }

    fn write_octree_grid(path: &Path) {
        let model = TwoZoneModel {
            r_split: 0.5,
            rho_in: 1.,
            rho_out: 1e-3,
            target: None,
        };
        let cli = ExtentDefaults {
            grid_type: Some(GridKind::Octree),
            sidelength: Some(2.),
            max_tree_level: Some(3),
            ..ExtentDefaults::default()
        };
        let cfg = GridConfig::resolve(&cli, &ExtentDefaults::default(), None, None).unwrap();
        let builder = OctreeBuilder::new(&model, &cfg, None);
        let root = builder.init_root().unwrap();
        let mut w = std::io::BufWriter::new(File::create(path).unwrap());
        builder.write_header(&mut w, &root).unwrap();
        builder.create_grid(&mut w, root).unwrap();
        use std::io::Write as _;
        w.flush().unwrap();
    }

    fn cleanup(paths: &[&Path]) {
        for p in paths {
            let _ = std::fs::remove_file(p);
        }
    }

    #[test]
    fn update_and_revert_are_exact_inverses() {
        let v2 = tmp("roundtrip_v2");
        let v1 = tmp("roundtrip_v1");
        let v2_again = tmp("roundtrip_v2_again");
        let v1_again = tmp("roundtrip_v1_again");

        write_spherical_grid(&v2);
        revert(&v2, &v1).unwrap();
        update(&v1, &v2_again).unwrap();
        revert(&v2_again, &v1_again).unwrap();

        // align radius defaults to 0, which is what the builder wrote, so
        // the full cycle reproduces both revisions byte for byte
        assert_eq!(std::fs::read(&v2).unwrap(), std::fs::read(&v2_again).unwrap());
        assert_eq!(std::fs::read(&v1).unwrap(), std::fs::read(&v1_again).unwrap());

        let header = walk(&v1, |_, _| {}).unwrap();
        assert_eq!(header.version, FORMAT_VERSION_NO_ALIGN);
        assert!(header.index_of(Quantity::AlignRadius).is_none());

        cleanup(&[&v2, &v1, &v2_again, &v1_again]);
    }

    #[test]
    fn update_refuses_a_current_grid() {
        let v2 = tmp("noop_update");
        let out = tmp("noop_update_out");
        write_spherical_grid(&v2);
        assert!(matches!(
            update(&v2, &out),
            Err(GridError::Configuration(_))
        ));
        cleanup(&[&v2, &out]);
    }

    #[test]
    fn patch_rewrites_exactly_one_slot() {
        let input = tmp("patch_in");
        let output = tmp("patch_out");
        write_octree_grid(&input);

        patch_quantity(&input, &output, Quantity::AlignRadius, 2.5e-7).unwrap();

        let mut originals = Vec::new();
        walk(&input, |_, values| originals.push(values.clone())).unwrap();
        let mut i = 0;
        let header = walk(&output, |h, values| {
            let idx = h.index_of(Quantity::AlignRadius).unwrap();
            for (j, v) in values.iter().enumerate() {
                if j == idx {
                    assert_eq!(*v, 2.5e-7);
                } else {
                    assert_eq!(v.to_bits(), originals[i][j].to_bits());
                }
            }
            i += 1;
        })
        .unwrap();
        assert_eq!(i, originals.len());
        assert_eq!(header.kind, GridKind::Octree);

        cleanup(&[&input, &output]);
    }

    #[test]
    fn octree_topology_survives_migration() {
        let input = tmp("octree_in");
        let v1 = tmp("octree_v1");
        let v2 = tmp("octree_v2");
        write_octree_grid(&input);

        revert(&input, &v1).unwrap();
        update(&v1, &v2).unwrap();
        assert_eq!(std::fs::read(&input).unwrap(), std::fs::read(&v2).unwrap());

        cleanup(&[&input, &v1, &v2]);
    }

    #[test]
    fn truncated_grid_is_corrupt() {
        let input = tmp("truncated_in");
        let output = tmp("truncated_out");
        write_spherical_grid(&input);

        let mut bytes = std::fs::read(&input).unwrap();
        bytes.truncate(bytes.len() - 5);
        std::fs::write(&input, &bytes).unwrap();

        assert!(matches!(
            walk(&input, |_, _| {}),
            Err(GridError::CorruptGrid(_))
        ));
        assert!(matches!(
            patch_quantity(&input, &output, Quantity::Temperature, 1.),
            Err(GridError::CorruptGrid(_))
        ));

        cleanup(&[&input, &output]);
    }

    #[test]
    fn trailing_bytes_are_corrupt() {
        let input = tmp("trailing_in");
        write_spherical_grid(&input);

        let mut bytes = std::fs::read(&input).unwrap();
        bytes.extend_from_slice(&[0u8; 4]);
        std::fs::write(&input, &bytes).unwrap();

        assert!(matches!(
            walk(&input, |_, _| {}),
            Err(GridError::CorruptGrid(_))
        ));

        cleanup(&[&input]);
    }

    #[test]
    fn rescale_touches_only_density_slots() {
        use crate::normalize::{plan, MassAccumulator, ScalingPlan};

        let input = tmp("rescale_in");
        let output = tmp("rescale_out");
        write_spherical_grid(&input);

        let model = UniformModel::with_target(3e-18, 1.);
        let mut acc = MassAccumulator::new(1, 1);
        acc.add_gas(0, 0, 0.5);
        acc.add_dust(0, 0, 0.005);
        let factors = match plan(&model, None, &acc).unwrap() {
            ScalingPlan::RescaleInPlace(f) => f,
            other => panic!("expected RescaleInPlace, got {:?}", other),
        };

        rescale_densities(&input, &output, &factors).unwrap();

        let mut originals = Vec::new();
        walk(&input, |_, values| originals.push(values.clone())).unwrap();
        let mut i = 0;
        walk(&output, |h, values| {
            for (j, q) in h.quantities.iter().enumerate() {
                if q.is_density() {
                    assert!((values[j] - 2. * originals[i][j]).abs() <= 1e-12 * values[j].abs());
                } else {
                    assert_eq!(values[j].to_bits(), originals[i][j].to_bits());
                }
            }
            i += 1;
        })
        .unwrap();

        cleanup(&[&input, &output]);
    }
}
