pub mod conservation_law;
pub mod fluxes;
pub mod residual;
pub mod spacetime;

use ndarray::{Array1, Array2, Array4, ArrayView1, ArrayView2};

use crate::geometry::BoundaryCondition;

/// Physical flux F(u, grad u) of a conservation law; returns one flux vector
/// per dimension for each conserved variable, shape (ncomp, ndim).
pub trait PhysicalFlux {
    fn ncomp(&self) -> usize;
    fn ndim(&self) -> usize;

    fn flux(&self, u: ArrayView1<f64>, grad_u: ArrayView2<f64>) -> Array2<f64>;

    /// PDE-level boundary state: given the interior state and gradient,
    /// produce the exterior state and gradient for the given boundary
    /// condition. None when the flux does not implement the condition.
    fn apply_bc(
        &self,
        _u_l: ArrayView1<f64>,
        _grad_u_l: ArrayView2<f64>,
        _unit_normal: ArrayView1<f64>,
        _bctype: BoundaryCondition,
        _bcflag: usize,
    ) -> Option<(Array1<f64>, Array2<f64>)> {
        None
    }

    /// Timestep from a CFL number and reference length, using wavespeeds
    /// captured during flux evaluation. None when not provided.
    fn dt_from_cfl(&self, _cfl: f64, _reference_length: f64) -> Option<f64> {
        None
    }
}

/// Convective numerical flux H(uL, uR, n); typically a Riemann solver or
/// upwinding method.
pub trait ConvectiveNumericalFlux {
    fn ncomp(&self) -> usize;

    fn normal_flux(
        &self,
        u_l: ArrayView1<f64>,
        u_r: ArrayView1<f64>,
        unit_normal: ArrayView1<f64>,
    ) -> Array1<f64>;
}

/// Diffusive flux normal to an interface, evaluated with the single-valued
/// interface solution and gradient.
pub trait DiffusionFlux {
    fn ncomp(&self) -> usize;

    fn normal_flux(
        &self,
        u_avg: ArrayView1<f64>,
        grad_u: ArrayView2<f64>,
        unit_normal: ArrayView1<f64>,
    ) -> Array1<f64>;

    /// Flux from a prescribed normal gradient (Neumann data). The default
    /// passes the prescribed values through.
    fn neumann_flux(&self, prescribed: ArrayView1<f64>) -> Array1<f64> {
        prescribed.to_owned()
    }

    /// Homogeneity tensor G[ieq][kdim][req][sdim] with
    /// F_visc = G(u) grad u; enables the interface correction term.
    /// None when the flux does not provide it.
    fn homogeneity_tensor(&self, _u: ArrayView1<f64>) -> Option<Array4<f64>> {
        None
    }
}
