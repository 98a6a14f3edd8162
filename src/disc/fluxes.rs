use ndarray::{Array1, Array2, Array4, ArrayView1, ArrayView2};

use crate::disc::{ConvectiveNumericalFlux, DiffusionFlux, PhysicalFlux};

/// Linear advection: F = a u per component.
pub struct LinearAdvection {
    pub velocity: Vec<f64>,
    pub ncomp: usize,
}

impl PhysicalFlux for LinearAdvection {
    fn ncomp(&self) -> usize {
        self.ncomp
    }

    fn ndim(&self) -> usize {
        self.velocity.len()
    }

    fn flux(&self, u: ArrayView1<f64>, _grad_u: ArrayView2<f64>) -> Array2<f64> {
        let mut f = Array2::zeros((self.ncomp, self.velocity.len()));
        for ieq in 0..self.ncomp {
            for (idim, &a) in self.velocity.iter().enumerate() {
                f[(ieq, idim)] = a * u[ieq];
            }
        }
        f
    }
}

/// Scalar Burgers in one space dimension plus time as the last coordinate:
/// F = (u^2 / 2, u).
pub struct BurgersSpacetime;

impl PhysicalFlux for BurgersSpacetime {
    fn ncomp(&self) -> usize {
        1
    }

    fn ndim(&self) -> usize {
        2
    }

    fn flux(&self, u: ArrayView1<f64>, _grad_u: ArrayView2<f64>) -> Array2<f64> {
        let mut f = Array2::zeros((1, 2));
        f[(0, 0)] = 0.5 * u[0] * u[0];
        f[(0, 1)] = u[0];
        f
    }
}

/// Rusanov flux for the spacetime Burgers system.
pub struct RusanovBurgers;

impl ConvectiveNumericalFlux for RusanovBurgers {
    fn ncomp(&self) -> usize {
        1
    }

    fn normal_flux(
        &self,
        u_l: ArrayView1<f64>,
        u_r: ArrayView1<f64>,
        unit_normal: ArrayView1<f64>,
    ) -> Array1<f64> {
        let ul = u_l[0];
        let ur = u_r[0];
        let fl = 0.5 * ul * ul * unit_normal[0] + ul * unit_normal[1];
        let fr = 0.5 * ur * ur * unit_normal[0] + ur * unit_normal[1];
        // wave speed in the normal direction
        let sl = (ul * unit_normal[0] + unit_normal[1]).abs();
        let sr = (ur * unit_normal[0] + unit_normal[1]).abs();
        let wave_speed = sl.max(sr);
        Array1::from_elem(1, 0.5 * (fl + fr - wave_speed * (ur - ul)))
    }
}

/// Central upwinded flux for linear advection.
pub struct UpwindAdvection {
    pub velocity: Vec<f64>,
    pub ncomp: usize,
}

impl ConvectiveNumericalFlux for UpwindAdvection {
    fn ncomp(&self) -> usize {
        self.ncomp
    }

    fn normal_flux(
        &self,
        u_l: ArrayView1<f64>,
        u_r: ArrayView1<f64>,
        unit_normal: ArrayView1<f64>,
    ) -> Array1<f64> {
        let an: f64 = self
            .velocity
            .iter()
            .zip(unit_normal.iter())
            .map(|(a, n)| a * n)
            .sum();
        let mut f = Array1::zeros(self.ncomp);
        for ieq in 0..self.ncomp {
            f[ieq] = if an >= 0.0 { an * u_l[ieq] } else { an * u_r[ieq] };
        }
        f
    }
}

/// No convective contribution (pure diffusion problems).
pub struct NoConvection {
    pub ncomp: usize,
}

impl ConvectiveNumericalFlux for NoConvection {
    fn ncomp(&self) -> usize {
        self.ncomp
    }

    fn normal_flux(
        &self,
        _u_l: ArrayView1<f64>,
        _u_r: ArrayView1<f64>,
        _unit_normal: ArrayView1<f64>,
    ) -> Array1<f64> {
        Array1::zeros(self.ncomp)
    }
}

/// Isotropic linear diffusion. As a physical flux it carries the
/// conservation form F = -mu grad u; as a diffusive numerical flux it
/// returns the viscous normal flux +mu grad u . n.
pub struct LinearDiffusionFlux {
    pub mu: f64,
    pub ncomp: usize,
    pub ndim: usize,
}

impl PhysicalFlux for LinearDiffusionFlux {
    fn ncomp(&self) -> usize {
        self.ncomp
    }

    fn ndim(&self) -> usize {
        self.ndim
    }

    fn flux(&self, _u: ArrayView1<f64>, grad_u: ArrayView2<f64>) -> Array2<f64> {
        grad_u.mapv(|g| -self.mu * g)
    }
}

impl DiffusionFlux for LinearDiffusionFlux {
    fn ncomp(&self) -> usize {
        self.ncomp
    }

    fn normal_flux(
        &self,
        _u_avg: ArrayView1<f64>,
        grad_u: ArrayView2<f64>,
        unit_normal: ArrayView1<f64>,
    ) -> Array1<f64> {
        let mut f = Array1::zeros(self.ncomp);
        for ieq in 0..self.ncomp {
            for idim in 0..self.ndim {
                f[ieq] += self.mu * grad_u[(ieq, idim)] * unit_normal[idim];
            }
        }
        f
    }

    fn neumann_flux(&self, prescribed: ArrayView1<f64>) -> Array1<f64> {
        prescribed.mapv(|g| self.mu * g)
    }

    fn homogeneity_tensor(&self, _u: ArrayView1<f64>) -> Option<Array4<f64>> {
        let mut g = Array4::zeros((self.ncomp, self.ndim, self.ncomp, self.ndim));
        for ieq in 0..self.ncomp {
            for idim in 0..self.ndim {
                g[(ieq, idim, ieq, idim)] = self.mu;
            }
        }
        Some(g)
    }
}

/// No diffusive contribution (pure advection problems).
pub struct NoDiffusion {
    pub ncomp: usize,
}

impl DiffusionFlux for NoDiffusion {
    fn ncomp(&self) -> usize {
        self.ncomp
    }

    fn normal_flux(
        &self,
        _u_avg: ArrayView1<f64>,
        _grad_u: ArrayView2<f64>,
        _unit_normal: ArrayView1<f64>,
    ) -> Array1<f64> {
        Array1::zeros(self.ncomp)
    }

    fn neumann_flux(&self, _prescribed: ArrayView1<f64>) -> Array1<f64> {
        Array1::zeros(self.ncomp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_rusanov_consistency() {
        // consistent: H(u, u, n) = F(u) . n
        let flux = RusanovBurgers;
        let u = array![0.7];
        let n = array![0.6, 0.8];
        let h = flux.normal_flux(u.view(), u.view(), n.view());
        let exact = 0.5 * 0.7 * 0.7 * 0.6 + 0.7 * 0.8;
        assert!((h[0] - exact).abs() < 1e-14);
    }

    #[test]
    fn test_upwind_picks_upwind_state() {
        let flux = UpwindAdvection {
            velocity: vec![1.0, 0.0],
            ncomp: 1,
        };
        let ul = array![2.0];
        let ur = array![5.0];
        let f = flux.normal_flux(ul.view(), ur.view(), array![1.0, 0.0].view());
        assert!((f[0] - 2.0).abs() < 1e-14);
        let f = flux.normal_flux(ul.view(), ur.view(), array![-1.0, 0.0].view());
        assert!((f[0] + 5.0).abs() < 1e-14);
    }

    #[test]
    fn test_linear_diffusion_normal_flux() {
        let flux = LinearDiffusionFlux {
            mu: 2.0,
            ncomp: 1,
            ndim: 2,
        };
        let grad = array![[3.0, -1.0]];
        let f = DiffusionFlux::normal_flux(
            &flux,
            array![0.0].view(),
            grad.view(),
            array![0.0, 1.0].view(),
        );
        assert!((f[0] + 2.0).abs() < 1e-14);

        let g = flux.homogeneity_tensor(array![0.0].view()).unwrap();
        assert_eq!(g[(0, 0, 0, 0)], 2.0);
        assert_eq!(g[(0, 0, 0, 1)], 0.0);
    }
}
