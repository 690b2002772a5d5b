//! Geometry utilities for brush-carve.
//!
//! This module provides the oriented plane type used for polygon planes and
//! cutting, plane fitting over polygon rings, and plane-intersection solves.

pub mod plane;

pub use plane::{Plane, SIDE_INSIDE, SIDE_ON, SIDE_OUTSIDE};
