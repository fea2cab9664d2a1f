//! Binary layout of a persisted grid: a fixed header followed by a sequential
//! cell stream. The per-cell record length is fixed by the header's quantity
//! schema, so any geometry can be read back irrespective of which builder
//! wrote it. All integers and floats are little-endian.
//!
//! Octree grids interleave a one-byte child-presence marker with the cell
//! stream so a reader can reconstruct the recursion without bookkeeping:
//! `BRANCH` is followed by its 8 children depth-first, `LEAF` by one record.

use crate::error::{GridError, Result};
use crate::Scalar;
use smallvec::SmallVec;
use std::io::{Read, Write};

pub const GRID_MAGIC: [u8; 4] = *b"DGRD";

/// Current format revision. Revision 1 predates the grain-alignment radius
/// slot; `migrate::update` lifts a revision-1 grid to the current layout.
pub const FORMAT_VERSION: u16 = 2;
pub const FORMAT_VERSION_NO_ALIGN: u16 = 1;

/// Value the alignment-radius slot takes when a grid is lifted from a
/// revision that did not store one.
pub const DEFAULT_ALIGN_RADIUS: Scalar = 0.;

pub const BRANCH_MARKER: u8 = 0;
pub const LEAF_MARKER: u8 = 1;

/// One cell's quantity values, ordered exactly as declared in the header.
pub type CellValues = SmallVec<[Scalar; 16]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridKind {
    Octree,
    Spherical,
    Cylindrical,
}

impl GridKind {
    pub fn id(self) -> u16 {
        match self {
            GridKind::Octree => 20,
            GridKind::Spherical => 30,
            GridKind::Cylindrical => 40,
        }
    }

    pub fn from_id(id: u16) -> Result<Self> {
        match id {
            20 => Ok(GridKind::Octree),
            30 => Ok(GridKind::Spherical),
            40 => Ok(GridKind::Cylindrical),
            other => Err(GridError::CorruptGrid(format!(
                "unknown geometry id {}",
                other
            ))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GridKind::Octree => "octree",
            GridKind::Spherical => "spherical",
            GridKind::Cylindrical => "cylindrical",
        }
    }
}

impl std::str::FromStr for GridKind {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "octree" => Ok(GridKind::Octree),
            "spherical" => Ok(GridKind::Spherical),
            "cylindrical" => Ok(GridKind::Cylindrical),
            other => Err(GridError::UnknownGridType(other.to_string())),
        }
    }
}

/// A physical quantity stored in every cell. Density slots are repeated per
/// dust distribution; the id space leaves room for more of both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Temperature,
    VelocityX,
    VelocityY,
    VelocityZ,
    MagneticX,
    MagneticY,
    MagneticZ,
    AlignRadius,
    GasDensity(u16),
    DustDensity(u16),
}

impl Quantity {
    pub fn id(self) -> u16 {
        match self {
            Quantity::Temperature => 1,
            Quantity::VelocityX => 2,
            Quantity::VelocityY => 3,
            Quantity::VelocityZ => 4,
            Quantity::MagneticX => 5,
            Quantity::MagneticY => 6,
            Quantity::MagneticZ => 7,
            Quantity::AlignRadius => 8,
            Quantity::GasDensity(d) => 100 + d,
            Quantity::DustDensity(d) => 200 + d,
        }
    }

    pub fn from_id(id: u16) -> Result<Self> {
        match id {
            1 => Ok(Quantity::Temperature),
            2 => Ok(Quantity::VelocityX),
            3 => Ok(Quantity::VelocityY),
            4 => Ok(Quantity::VelocityZ),
            5 => Ok(Quantity::MagneticX),
            6 => Ok(Quantity::MagneticY),
            7 => Ok(Quantity::MagneticZ),
            8 => Ok(Quantity::AlignRadius),
            d if (100..200).contains(&d) => Ok(Quantity::GasDensity(d - 100)),
            d if (200..300).contains(&d) => Ok(Quantity::DustDensity(d - 200)),
            other => Err(GridError::CorruptGrid(format!(
                "unknown quantity id {}",
                other
            ))),
        }
    }

    pub fn is_density(self) -> bool {
        matches!(self, Quantity::GasDensity(_) | Quantity::DustDensity(_))
    }
}

/// The cell schema written by the builders: one gas and one dust density slot
/// per distribution, then the shared scalar and vector quantities.
pub fn quantity_schema(distributions: usize) -> Vec<Quantity> {
    let mut schema = Vec::with_capacity(2 * distributions + 8);
    for d in 0..distributions {
        schema.push(Quantity::GasDensity(d as u16));
    }
    for d in 0..distributions {
        schema.push(Quantity::DustDensity(d as u16));
    }
    schema.extend_from_slice(&[
        Quantity::Temperature,
        Quantity::VelocityX,
        Quantity::VelocityY,
        Quantity::VelocityZ,
        Quantity::MagneticX,
        Quantity::MagneticY,
        Quantity::MagneticZ,
        Quantity::AlignRadius,
    ]);
    schema
}

/// Global extents and cell counts of one geometry. Counts are the counts as
/// written, i.e. after any splitting of the innermost radial cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Extent {
    Cube {
        sidelength: Scalar,
        max_level: u32,
    },
    Sphere {
        inner_radius: Scalar,
        outer_radius: Scalar,
        n_r: u32,
        n_ph: u32,
        n_th: u32,
        sf_r: Scalar,
        sf_ph: Scalar,
        sf_th: Scalar,
    },
    Cylinder {
        inner_radius: Scalar,
        outer_radius: Scalar,
        z_max: Scalar,
        n_r: u32,
        n_ph: u32,
        n_z: u32,
        sf_r: Scalar,
        sf_ph: Scalar,
        sf_z: Scalar,
    },
}

impl Extent {
    /// Total cell count for shell geometries. Octree cell counts are implied
    /// by the node markers in the stream, not the header.
    pub fn cell_count(&self) -> Option<usize> {
        match *self {
            Extent::Cube { .. } => None,
            Extent::Sphere { n_r, n_ph, n_th, .. } => {
                Some(n_r as usize * n_ph as usize * n_th as usize)
            }
            Extent::Cylinder { n_r, n_ph, n_z, .. } => {
                Some(n_r as usize * n_ph as usize * n_z as usize)
            }
        }
    }

    pub fn max_level(&self) -> Option<u32> {
        match *self {
            Extent::Cube { max_level, .. } => Some(max_level),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridHeader {
    pub version: u16,
    pub kind: GridKind,
    pub extent: Extent,
    pub quantities: Vec<Quantity>,
}

impl GridHeader {
    /// Number of scalars in each cell record.
    pub fn record_len(&self) -> usize {
        self.quantities.len()
    }

    pub fn index_of(&self, q: Quantity) -> Option<usize> {
        self.quantities.iter().position(|&x| x == q)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&GRID_MAGIC)?;
        write_u16(w, self.version)?;
        write_u16(w, self.kind.id())?;
        match self.extent {
            Extent::Cube {
                sidelength,
                max_level,
            } => {
                write_f64(w, sidelength)?;
                write_u32(w, max_level)?;
            }
            Extent::Sphere {
                inner_radius,
                outer_radius,
                n_r,
                n_ph,
                n_th,
                sf_r,
                sf_ph,
                sf_th,
            } => {
                write_f64(w, inner_radius)?;
                write_f64(w, outer_radius)?;
                write_u32(w, n_r)?;
                write_u32(w, n_ph)?;
                write_u32(w, n_th)?;
                write_f64(w, sf_r)?;
                write_f64(w, sf_ph)?;
                write_f64(w, sf_th)?;
            }
            Extent::Cylinder {
                inner_radius,
                outer_radius,
                z_max,
                n_r,
                n_ph,
                n_z,
                sf_r,
                sf_ph,
                sf_z,
            } => {
                write_f64(w, inner_radius)?;
                write_f64(w, outer_radius)?;
                write_f64(w, z_max)?;
                write_u32(w, n_r)?;
                write_u32(w, n_ph)?;
                write_u32(w, n_z)?;
                write_f64(w, sf_r)?;
                write_f64(w, sf_ph)?;
                write_f64(w, sf_z)?;
            }
        }
        write_u16(w, self.quantities.len() as u16)?;
        for q in &self.quantities {
            write_u16(w, q.id())?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        read_exact(r, &mut magic, "file magic")?;
        if magic != GRID_MAGIC {
            return Err(GridError::CorruptGrid("bad file magic".to_string()));
        }
        let version = read_u16(r, "format version")?;
        if version == 0 || version > FORMAT_VERSION {
            return Err(GridError::CorruptGrid(format!(
                "unsupported format version {}",
                version
            )));
        }
        let kind = GridKind::from_id(read_u16(r, "geometry id")?)?;
        let extent = match kind {
            GridKind::Octree => Extent::Cube {
                sidelength: read_f64(r, "sidelength")?,
                max_level: read_u32(r, "max level")?,
            },
            GridKind::Spherical => Extent::Sphere {
                inner_radius: read_f64(r, "inner radius")?,
                outer_radius: read_f64(r, "outer radius")?,
                n_r: read_u32(r, "n_r")?,
                n_ph: read_u32(r, "n_ph")?,
                n_th: read_u32(r, "n_th")?,
                sf_r: read_f64(r, "sf_r")?,
                sf_ph: read_f64(r, "sf_ph")?,
                sf_th: read_f64(r, "sf_th")?,
            },
            GridKind::Cylindrical => Extent::Cylinder {
                inner_radius: read_f64(r, "inner radius")?,
                outer_radius: read_f64(r, "outer radius")?,
                z_max: read_f64(r, "z_max")?,
                n_r: read_u32(r, "n_r")?,
                n_ph: read_u32(r, "n_ph")?,
                n_z: read_u32(r, "n_z")?,
                sf_r: read_f64(r, "sf_r")?,
                sf_ph: read_f64(r, "sf_ph")?,
                sf_z: read_f64(r, "sf_z")?,
            },
        };
        let n_quantities = read_u16(r, "quantity count")?;
        let mut quantities = Vec::with_capacity(n_quantities as usize);
        for _ in 0..n_quantities {
            quantities.push(Quantity::from_id(read_u16(r, "quantity id")?)?);
        }
        Ok(GridHeader {
            version,
            kind,
            extent,
            quantities,
        })
    }
}

pub fn write_cell<W: Write>(w: &mut W, values: &[Scalar]) -> Result<()> {
    for v in values {
        write_f64(w, *v)?;
    }
    Ok(())
}

pub fn read_cell<R: Read>(r: &mut R, record_len: usize) -> Result<CellValues> {
    let mut values = CellValues::new();
    for _ in 0..record_len {
        values.push(read_f64(r, "cell record")?);
    }
    Ok(values)
}

pub fn write_marker<W: Write>(w: &mut W, marker: u8) -> Result<()> {
    w.write_all(&[marker])?;
    Ok(())
}

pub fn read_marker<R: Read>(r: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    read_exact(r, &mut buf, "node marker")?;
    Ok(buf[0])
}

/// Errors when any bytes remain unread, so a padded or oversized stream is
/// rejected instead of silently ignored.
pub fn ensure_eof<R: Read>(r: &mut R) -> Result<()> {
    let mut buf = [0u8; 1];
    match r.read(&mut buf)? {
        0 => Ok(()),
        _ => Err(GridError::CorruptGrid(
            "trailing bytes after last cell record".to_string(),
        )),
    }
}

fn read_exact<R: Read>(r: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    r.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            GridError::CorruptGrid(format!("unexpected end of stream while reading {}", what))
        } else {
            GridError::Io(e)
        }
    })
}

fn write_u16<W: Write>(w: &mut W, v: u16) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_f64<W: Write>(w: &mut W, v: Scalar) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn read_u16<R: Read>(r: &mut R, what: &str) -> Result<u16> {
    let mut buf = [0u8; 2];
    read_exact(r, &mut buf, what)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(r: &mut R, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(r, &mut buf, what)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f64<R: Read>(r: &mut R, what: &str) -> Result<Scalar> {
    let mut buf = [0u8; 8];
    read_exact(r, &mut buf, what)?;
    Ok(Scalar::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sphere_header(version: u16) -> GridHeader {
        GridHeader {
            version,
            kind: GridKind::Spherical,
            extent: Extent::Sphere {
                inner_radius: 1.0,
                outer_radius: 100.0,
                n_r: 10,
                n_ph: 4,
                n_th: 2,
                sf_r: 1.05,
                sf_ph: 1.0,
                sf_th: 1.0,
            },
            quantities: quantity_schema(2),
        }
    }

    #[test]
    fn header_roundtrip() {
        let header = sphere_header(FORMAT_VERSION);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        let back = GridHeader::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(header, back);
        assert_eq!(back.extent.cell_count(), Some(80));
    }

    #[test]
    fn truncated_header_is_corrupt() {
        let header = sphere_header(FORMAT_VERSION);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 3);
        match GridHeader::read_from(&mut buf.as_slice()) {
            Err(GridError::CorruptGrid(_)) => {}
            other => panic!("expected CorruptGrid, got {:?}", other),
        }
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let buf = b"NOPE\x02\x00\x14\x00";
        assert!(matches!(
            GridHeader::read_from(&mut buf.as_slice()),
            Err(GridError::CorruptGrid(_))
        ));
    }

    #[test]
    fn truncated_cell_is_corrupt() {
        let mut buf = Vec::new();
        write_cell(&mut buf, &[1.0, 2.0, 3.0]).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(matches!(
            read_cell(&mut buf.as_slice(), 3),
            Err(GridError::CorruptGrid(_))
        ));
    }

    proptest! {
        #[test]
        fn quantity_id_roundtrip(d in 0u16..100) {
            for q in [
                Quantity::GasDensity(d),
                Quantity::DustDensity(d),
                Quantity::Temperature,
                Quantity::AlignRadius,
            ] {
                prop_assert_eq!(Quantity::from_id(q.id()).unwrap(), q);
            }
        }
    }

    #[test]
    fn schema_puts_align_radius_last() {
        let schema = quantity_schema(3);
        assert_eq!(schema.len(), 14);
        assert_eq!(*schema.last().unwrap(), Quantity::AlignRadius);
        assert_eq!(schema[0], Quantity::GasDensity(0));
        assert_eq!(schema[3], Quantity::DustDensity(0));
    }
}
