//! Plane in normal/offset form with the ground-stage quality record.
use crate::constants::VERTICAL_PLANE_EPS;
use crate::error::{Result, SegmentationError};
use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use serde::{Deserialize, Serialize};

/// `normal · p + offset = 0`, unit normal with `normal.z >= 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vector3<f64>,
    pub offset: f64,
}

impl Plane {
    /// Normalise `(normal, offset)` together and orient the normal upward.
    /// None when the normal has (near) zero length.
    pub fn new(normal: Vector3<f64>, offset: f64) -> Option<Self> {
        let norm = normal.norm();
        if !norm.is_finite() || norm < 1e-9 {
            return None;
        }
        let (mut n, mut d) = (normal / norm, offset / norm);
        if n.z < 0.0 {
            n = -n;
            d = -d;
        }
        Some(Self {
            normal: n,
            offset: d,
        })
    }

    /// Plane through three points; None when they are collinear.
    pub fn through_points(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Option<Self> {
        let normal = (b - a).cross(&(c - a));
        Self::new(normal, -normal.dot(&a.coords))
    }

    /// Total least squares fit: the normal is the eigenvector of the
    /// smallest eigenvalue of the point covariance.
    pub fn least_squares(points: &[Point3<f64>]) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let n = points.len() as f64;
        let centroid = points
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.coords)
            / n;
        let mut cov = Matrix3::zeros();
        for p in points {
            let d = p.coords - centroid;
            cov += d * d.transpose();
        }
        let eigen = SymmetricEigen::new(cov / n);
        let (min_idx, _) = eigen
            .eigenvalues
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))?;
        let normal: Vector3<f64> = eigen.eigenvectors.column(min_idx).into_owned();
        Self::new(normal, -normal.dot(&centroid))
    }

    /// Positive above the plane.
    pub fn signed_distance(&self, p: &Point3<f64>) -> f64 {
        self.normal.dot(&p.coords) + self.offset
    }

    /// Height of the plane at `(x, y)`.
    pub fn z_at(&self, x: f64, y: f64) -> Result<f64> {
        let nz = self.normal.z;
        if nz.abs() < VERTICAL_PLANE_EPS {
            return Err(SegmentationError::GeometricDegeneracy { nz });
        }
        Ok((-self.offset - self.normal.x * x - self.normal.y * y) / nz)
    }

    pub fn nz(&self) -> f64 {
        self.normal.z
    }
}

/// Angle between two unit normals in degrees.
pub fn angle_deg(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    a.dot(b).clamp(-1.0, 1.0).acos().to_degrees()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaneStatus {
    Estimated,
    Repaired,
}

/// Ground plane of one tile plus fit quality.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePlane {
    pub plane: Plane,
    pub inlier_ratio: f64,
    pub nz: f64,
    /// Median z of the fit inliers.
    pub z_median: f64,
    pub good: bool,
    pub status: PlaneStatus,
}
