//! Oriented planes for brush polygons and cutting.
//!
//! A plane is stored as `(normal, d)` with the convention
//! `signed_distance(p) = normal · p + d`. Polygon planes face outward, so
//! the interior of a brush is the negative half-space of every plane.
//!
//! Storage is `f32` to match the vertex tables; all fitting, classification
//! and intersection math runs in `f64`.

use bytemuck::{Pod, Zeroable};
use glam::{DMat3, DVec3, Vec3};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::brush_error::BrushError;

/// Vertex side: strictly inside the brush (negative half-space).
pub const SIDE_INSIDE: i8 = -1;
/// Vertex side: on the plane, within the epsilon dead zone.
pub const SIDE_ON: i8 = 0;
/// Vertex side: strictly outside (positive half-space).
pub const SIDE_OUTSIDE: i8 = 1;

/// Degenerate-normal threshold for ring fits.
const EPS: f64 = 1e-12;
/// Determinant threshold below which a 3-plane system counts as singular.
const SINGULAR_EPS: f64 = 1e-10;

/// An oriented plane `normal · p + d = 0`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    pub const fn new(normal: Vec3, d: f32) -> Self {
        Self { normal, d }
    }

    /// Plane through `point` with the given direction, normalized in `f64`.
    ///
    /// # Errors
    /// Returns [`BrushError::InvalidGeometry`] if `normal` has (near-)zero length.
    pub fn from_point_normal(point: DVec3, normal: DVec3) -> Result<Self, BrushError> {
        let len = normal.length();
        if len < EPS {
            return Err(BrushError::InvalidGeometry(format!(
                "cannot build plane from zero-length normal {normal:?}"
            )));
        }
        let n = normal / len;
        Ok(Self {
            normal: n.as_vec3(),
            d: -n.dot(point) as f32,
        })
    }

    /// Fit a plane over a closed vertex ring with Newell's method.
    ///
    /// The normal follows the ring's winding (counter-clockwise rings seen
    /// from outside produce outward normals); `d` is fitted through the ring
    /// centroid.
    ///
    /// # Errors
    /// Returns [`BrushError::InvalidGeometry`] if the ring has fewer than
    /// three vertices or its Newell normal vanishes (collinear ring).
    pub fn from_ring(ring: &[DVec3]) -> Result<Self, BrushError> {
        if ring.len() < 3 {
            return Err(BrushError::InvalidGeometry(format!(
                "plane fit needs at least 3 ring vertices, got {}",
                ring.len()
            )));
        }
        let mut normal = DVec3::ZERO;
        for (p, q) in ring.iter().circular_tuple_windows() {
            normal.x += (p.y - q.y) * (p.z + q.z);
            normal.y += (p.z - q.z) * (p.x + q.x);
            normal.z += (p.x - q.x) * (p.y + q.y);
        }
        let centroid = ring.iter().sum::<DVec3>() / ring.len() as f64;
        Self::from_point_normal(centroid, normal)
    }

    /// Signed distance of `p` from the plane, in `f64`.
    #[inline]
    pub fn signed_distance(&self, p: DVec3) -> f64 {
        self.normal.as_dvec3().dot(p) + self.d as f64
    }

    /// Classify `p` against the plane with an epsilon dead zone.
    #[inline]
    pub fn classify(&self, p: DVec3, epsilon: f64) -> i8 {
        let dist = self.signed_distance(p);
        if dist < -epsilon {
            SIDE_INSIDE
        } else if dist > epsilon {
            SIDE_OUTSIDE
        } else {
            SIDE_ON
        }
    }

    /// The same plane facing the other way.
    #[inline]
    #[must_use]
    pub fn negated(&self) -> Self {
        Self {
            normal: -self.normal,
            d: -self.d,
        }
    }

    /// Maximum absolute ring-vertex distance from the plane.
    pub fn max_residual(&self, ring: &[DVec3]) -> f64 {
        ring.iter()
            .map(|&p| self.signed_distance(p).abs())
            .fold(0.0, f64::max)
    }
}

/// Intersect three planes; `None` if the system is (near-)singular.
#[must_use]
pub fn intersect_three(p0: &Plane, p1: &Plane, p2: &Plane) -> Option<DVec3> {
    let coeffs = DMat3::from_cols(
        p0.normal.as_dvec3(),
        p1.normal.as_dvec3(),
        p2.normal.as_dvec3(),
    )
    .transpose();
    let det = coeffs.determinant();
    if det.abs() < SINGULAR_EPS {
        return None;
    }
    // normal · x = -d for each plane
    let constraints = DVec3::new(-(p0.d as f64), -(p1.d as f64), -(p2.d as f64));
    let pos = coeffs.inverse() * constraints;
    pos.is_finite().then_some(pos)
}

/// Solve a vertex position from the planes meeting at it.
///
/// Exactly three planes intersect directly. More than three average every
/// finite triple intersection. Fewer than three, or no finite triple,
/// yields `None` and the caller keeps the previous position.
#[must_use]
pub fn solve_vertex(planes: &[Plane]) -> Option<DVec3> {
    match planes.len() {
        0..=2 => None,
        3 => intersect_three(&planes[0], &planes[1], &planes[2]),
        n => {
            let mut sum = DVec3::ZERO;
            let mut count = 0u32;
            for i in 0..n {
                for j in i + 1..n {
                    for k in j + 1..n {
                        if let Some(p) = intersect_three(&planes[i], &planes[j], &planes[k]) {
                            sum += p;
                            count += 1;
                        }
                    }
                }
            }
            (count > 0).then(|| sum / count as f64)
        }
    }
}
