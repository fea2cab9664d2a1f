use crate::{Scalar, Vec3};
use std::ops::Range;

pub trait RangeExt {
    fn size(&self) -> Vec3;

    fn center(&self) -> Vec3;

    fn volume(&self) -> Scalar;

    fn contains_point(&self, x: &Vec3) -> bool;

    /// The 8 octants produced by bisecting the box through its center,
    /// ordered z-major (low z first), then y, then x.
    fn octants(&self) -> [Self; 8]
    where
        Self: Sized;
}

impl RangeExt for Range<Vec3> {
    fn size(&self) -> Vec3 {
        self.end - self.start
    }

    fn center(&self) -> Vec3 {
        0.5 * (self.start + self.end)
    }

    fn volume(&self) -> Scalar {
        let s = self.size();
        s.x * s.y * s.z
    }

    fn contains_point(&self, x: &Vec3) -> bool {
        self.start.x <= x.x
            && self.start.y <= x.y
            && self.start.z <= x.z
            && x.x < self.end.x
            && x.y < self.end.y
            && x.z < self.end.z
    }

    fn octants(&self) -> [Self; 8] {
        let c = self.center();
        std::array::from_fn(|i| {
            let pick = |bit: usize, lo: Scalar, mid: Scalar, hi: Scalar| {
                if i & bit == 0 {
                    (lo, mid)
                } else {
                    (mid, hi)
                }
            };
            let (x0, x1) = pick(1, self.start.x, c.x, self.end.x);
            let (y0, y1) = pick(2, self.start.y, c.y, self.end.y);
            let (z0, z1) = pick(4, self.start.z, c.z, self.end.z);
            Vec3::new(x0, y0, z0)..Vec3::new(x1, y1, z1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Range<Vec3> {
        Vec3::zeros()..Vec3::from_element(2.)
    }

    #[test]
    fn octants_partition_the_parent() {
        let b = unit_box();
        let octants = b.octants();

        let total: Scalar = octants.iter().map(|o| o.volume()).sum();
        assert_eq!(total, b.volume());

        for o in &octants {
            assert!(b.contains_point(&o.center()));
            assert_eq!(o.size(), 0.5 * b.size());
        }

        // octant centers are all distinct
        for (i, a) in octants.iter().enumerate() {
            for other in &octants[i + 1..] {
                assert_ne!(a.center(), other.center());
            }
        }
    }

    #[test]
    fn contains_point_is_half_open() {
        let b = unit_box();
        assert!(b.contains_point(&Vec3::zeros()));
        assert!(b.contains_point(&Vec3::from_element(1.999)));
        assert!(!b.contains_point(&Vec3::from_element(2.)));
    }
}
