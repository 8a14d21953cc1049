//! Custom Resource Definitions for the Viewer operator
//!
//! This module contains the CRD definition watched by the controller.

mod viewer;

pub use viewer::{Viewer, ViewerSpec, FLEXY_VIS_TYPE};
