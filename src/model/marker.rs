//! Marker module: the point records making up a segment polyline.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

// =#========================================================================#=
// MARKER
// =#========================================================================#=
/// A single sample point of a reconstructed structure.
///
/// Coordinates are in the reconstruction's voxel/world space; no unit is
/// assumed. `kind` carries the skeleton node type (e.g. soma, axon, dendrite)
/// as an opaque number and is passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub radius: Radius,
    pub kind: u16,
}

impl Marker {
    /// Creates a new marker with unit radius and type 0.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Marker {
            x,
            y,
            z,
            radius: Radius::new(1.0),
            kind: 0,
        }
    }

    /// Sets the radius of this marker.
    ///
    /// # Panics
    /// Panics if `radius` is negative or not finite.
    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = Radius::new(radius);
        self
    }

    /// Sets the node type of this marker.
    pub fn with_kind(mut self, kind: u16) -> Self {
        self.kind = kind;
        self
    }

    /// Returns the Euclidean distance to `other`.
    pub fn distance(&self, other: &Marker) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

// =#========================================================================#=
// RADIUS
// =#========================================================================#=
/// Radius of a marker, enforced non-negative and finite.
///
/// Deserialization goes through [TryFrom], so invalid radii in input data are
/// reported as [Error::InvalidRadius].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Radius(f64);

impl Radius {
    /// Creates a new radius.
    ///
    /// # Panics
    /// Panics if `radius` is negative or not finite.
    pub fn new(radius: f64) -> Self {
        assert!(radius >= 0.0, "Radius must be non-negative, got {}", radius);
        assert!(radius.is_finite(), "Radius must be finite, got {}", radius);
        Radius(radius)
    }
}

impl TryFrom<f64> for Radius {
    type Error = Error;

    fn try_from(radius: f64) -> Result<Self> {
        if radius >= 0.0 && radius.is_finite() {
            Ok(Radius(radius))
        } else {
            Err(Error::InvalidRadius(radius))
        }
    }
}

impl From<Radius> for f64 {
    fn from(radius: Radius) -> f64 {
        radius.0
    }
}

impl Deref for Radius {
    type Target = f64;
    fn deref(&self) -> &f64 {
        &self.0
    }
}
