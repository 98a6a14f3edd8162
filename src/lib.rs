//! Discontinuous Galerkin engine for systems of conservation laws with an
//! optional moving-mesh interface-condition-enforcement (MDG-ICE) capability:
//! mesh node coordinates join the unknown vector and a regularized
//! Gauss-Newton loop drives both the PDE residual and the
//! interface-conservation residual to zero.

pub mod basis;
pub mod config;
pub mod disc;
pub mod error;
pub mod fe;
pub mod fespace;
pub mod geometry;
pub mod linalg;
pub mod mesh;
pub mod quadrature;
pub mod solver;
