use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2};

use crate::disc::spacetime::SpacetimeConnection;
use crate::disc::{ConvectiveNumericalFlux, DiffusionFlux, PhysicalFlux};
use crate::error::{AnomalyLog, SolverError};
use crate::fe::layout::{contract_grads, contract_hess, contract_values, extract_elspan};
use crate::fespace::{BasisEval, FESpace};
use crate::geometry::{mat_det, normalize, BoundaryCondition};

/// Callback producing ncomp values at a physical point (dirichlet data,
/// neumann data, source terms).
pub type PointCallback = Box<dyn Fn(&[f64], &mut [f64]) + Send + Sync>;

/// DDG / DDGIC discretization of a conservation law
/// du/dt + div F(u, grad u) = s, with time treated as a spatial dimension in
/// spacetime mode.
pub struct ConservationLawDDG<P, C, D> {
    pub phys_flux: P,
    pub conv_flux: C,
    pub diff_flux: D,

    /// use interior penalty instead of ddg (zeroes the beta1 term)
    pub interior_penalty: bool,

    /// interface correction multiplier; 1 gives DDGIC, 0 standard DDG
    /// (Danis, Yan 2023)
    pub sigma_ic: f64,

    /// dirichlet value callback per bcflag
    pub dirichlet_callbacks: Vec<PointCallback>,

    /// neumann value callback per bcflag
    pub neumann_callbacks: Vec<PointCallback>,

    /// optional source term s(x)
    pub source: Option<PointCallback>,

    /// connection to the previous time slab for spacetime-past boundaries
    pub spacetime: Option<SpacetimeConnection>,

    /// human readable names per vector component
    pub field_names: Vec<String>,
    pub residual_names: Vec<String>,
}

impl<P, C, D> ConservationLawDDG<P, C, D>
where
    P: PhysicalFlux,
    C: ConvectiveNumericalFlux,
    D: DiffusionFlux,
{
    pub fn new(phys_flux: P, conv_flux: C, diff_flux: D) -> Self {
        Self {
            phys_flux,
            conv_flux,
            diff_flux,
            interior_penalty: false,
            sigma_ic: 0.0,
            dirichlet_callbacks: Vec::new(),
            neumann_callbacks: Vec::new(),
            source: None,
            spacetime: None,
            field_names: Vec::new(),
            residual_names: Vec::new(),
        }
    }

    pub fn ncomp(&self) -> usize {
        self.phys_flux.ncomp()
    }

    /// Consistency checks run before any assembly.
    pub fn validate(&self, fespace: &FESpace) -> Result<(), SolverError> {
        let n = self.phys_flux.ncomp();
        if self.conv_flux.ncomp() != n || self.diff_flux.ncomp() != n {
            return Err(SolverError::Config(format!(
                "flux component counts disagree: physical {n}, convective {}, \
                 diffusive {}",
                self.conv_flux.ncomp(),
                self.diff_flux.ncomp()
            )));
        }
        if self.phys_flux.ndim() != fespace.mesh.ndim {
            return Err(SolverError::Config(format!(
                "flux dimension {} does not match mesh dimension {}",
                self.phys_flux.ndim(),
                fespace.mesh.ndim
            )));
        }
        for face in &fespace.mesh.faces {
            match face.bctype {
                BoundaryCondition::Dirichlet => {
                    if face.bcflag >= self.dirichlet_callbacks.len() {
                        return Err(SolverError::Config(format!(
                            "dirichlet bcflag {} has no callback",
                            face.bcflag
                        )));
                    }
                }
                BoundaryCondition::Neumann => {
                    if face.bcflag >= self.neumann_callbacks.len() {
                        return Err(SolverError::Config(format!(
                            "neumann bcflag {} has no callback",
                            face.bcflag
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn dt_from_cfl(&self, cfl: f64, reference_length: f64) -> Option<f64> {
        self.phys_flux.dt_from_cfl(cfl, reference_length)
    }

    /// DDG coefficients for a polynomial order:
    /// beta0 = (p+1)^2, beta1 = 1 / max(2p(p+1), 1).
    fn ddg_betas(&self, order: usize) -> (f64, f64) {
        let p = order as f64;
        let beta0 = (p + 1.0) * (p + 1.0);
        let beta1 = if self.interior_penalty {
            0.0
        } else {
            1.0 / (2.0 * p * (p + 1.0)).max(1.0)
        };
        (beta0, beta1)
    }

    // =============
    // = Integrals =
    // =============

    /// Weak-form domain integral of one element:
    /// res += int_e F : grad(phi) detJ - int_e s phi detJ.
    pub fn domain_integral(
        &self,
        fespace: &FESpace,
        iel: usize,
        unkel: ArrayView2<f64>,
        res: &mut Array2<f64>,
    ) -> Result<(), SolverError> {
        let neq = self.ncomp();
        let refel = fespace.el_ref(iel);
        let trans = fespace.mesh.transformation(iel);
        let coord_el = fespace.mesh.el_coord(iel);
        let ndim = fespace.mesh.ndim;
        let nbasis = refel.basis.nbasis();

        let mut source_vals = vec![0.0; neq];
        for ig in 0..refel.quadrule.npoints() {
            let xi = refel.quadrule.points.row(ig);
            let weight = refel.quadrule.weights[ig];

            let jac = trans.jacobian(coord_el.view(), xi);
            // overlapping transformation ranges in concave elements must not
            // contribute twice
            let detj = mat_det(jac.view()).max(0.0);

            let eval = &refel.evals[ig];
            let phys_grads = fespace.phys_grad_basis(eval.ref_grads.view(), jac.view())?;

            let u = contract_values(unkel, eval.values.view());
            let grad_u = contract_grads(unkel, phys_grads.view());

            let flux = self.phys_flux.flux(u.view(), grad_u.view());
            for itest in 0..nbasis {
                for ieq in 0..neq {
                    for jdim in 0..ndim {
                        res[(itest, ieq)] +=
                            flux[(ieq, jdim)] * phys_grads[(itest, jdim)] * detj * weight;
                    }
                }
            }

            if let Some(source) = &self.source {
                let x = trans.transform(coord_el.view(), xi);
                source(x.as_slice().unwrap(), &mut source_vals);
                for itest in 0..nbasis {
                    for ieq in 0..neq {
                        res[(itest, ieq)] -=
                            source_vals[ieq] * eval.values[itest] * detj * weight;
                    }
                }
            }
        }
        Ok(())
    }

    /// Physical gradients and Hessians of one element's basis at a trace
    /// quadrature point.
    fn side_eval(
        &self,
        fespace: &FESpace,
        iel: usize,
        eval: &BasisEval,
        xi: ArrayView1<f64>,
    ) -> Result<(Array2<f64>, Array3<f64>), SolverError> {
        let trans = fespace.mesh.transformation(iel);
        let coord_el = fespace.mesh.el_coord(iel);
        let jac = trans.jacobian(coord_el.view(), xi);
        let phys_grads = fespace.phys_grad_basis(eval.ref_grads.view(), jac.view())?;
        let geo_hess = trans.hessian(coord_el.view(), xi);
        let phys_hess = fespace.phys_hess_basis(
            eval.ref_hess.view(),
            phys_grads.view(),
            geo_hess.view(),
            jac.view(),
        )?;
        Ok((phys_grads, phys_hess))
    }

    /// Interior trace integral with the DDG single-valued gradient.
    pub fn trace_integral(
        &self,
        fespace: &FESpace,
        itrace: usize,
        unkel_l: ArrayView2<f64>,
        unkel_r: ArrayView2<f64>,
        res_l: &mut Array2<f64>,
        res_r: &mut Array2<f64>,
    ) -> Result<(), SolverError> {
        let neq = self.ncomp();
        let ndim = fespace.mesh.ndim;
        let trace = fespace.traces[itrace];
        let rt = fespace.trace_ref(itrace);
        let face = &fespace.mesh.faces[trace.facidx];
        let coord = fespace.mesh.nodes.view();

        let trans_l = fespace.mesh.transformation(trace.el_l);
        let trans_r = fespace.mesh.transformation(trace.el_r);
        let centroid_l = fespace.mesh.el_centroid(trace.el_l);
        let centroid_r = fespace.mesh.el_centroid(trace.el_r);

        let order_l = fespace.el_ref(trace.el_l).basis.polynomial_order();
        let order_r = fespace.el_ref(trace.el_r).basis.polynomial_order();
        let (beta0, beta1) = self.ddg_betas(order_l.max(order_r));

        let nbasis_l = fespace.el_nbasis(trace.el_l);
        let nbasis_r = fespace.el_nbasis(trace.el_r);

        for ig in 0..rt.quadrule.npoints() {
            let s = rt.quadrule.points.row(ig);
            let weight = rt.quadrule.weights[ig];

            let jac_fac = face.jacobian(coord, s);
            let sqrtg = face.root_riemann_metric(jac_fac.view());
            let unit_normal = normalize(&face.normal(coord, s));

            let bi_l = &rt.evals_l[ig].values;
            let bi_r = &rt.evals_r[ig].values;
            let xi_l = face.transform_xi_l(trans_l, s);
            let xi_r = face.transform_xi_r(trans_r, s);
            let (grad_bi_l, hess_bi_l) =
                self.side_eval(fespace, trace.el_l, &rt.evals_l[ig], xi_l.view())?;
            let (grad_bi_r, hess_bi_r) =
                self.side_eval(fespace, trace.el_r, &rt.evals_r[ig], xi_r.view())?;

            let u_l = contract_values(unkel_l, bi_l.view());
            let u_r = contract_values(unkel_r, bi_r.view());
            let grad_u_l = contract_grads(unkel_l, grad_bi_l.view());
            let grad_u_r = contract_grads(unkel_r, grad_bi_r.view());
            let hess_u_l = contract_hess(unkel_l, hess_bi_l.view());
            let hess_u_r = contract_hess(unkel_r, hess_bi_r.view());

            let fadv = self
                .conv_flux
                .normal_flux(u_l.view(), u_r.view(), unit_normal.view());

            // signed DDG length scale along the normal
            let phys_pt = face.transform(coord, s);
            let mut h_ddg = 0.0;
            for idim in 0..ndim {
                h_ddg += unit_normal[idim]
                    * ((phys_pt[idim] - centroid_l[idim])
                        + (centroid_r[idim] - phys_pt[idim]));
            }
            h_ddg = h_ddg.abs().max(f64::EPSILON).copysign(h_ddg);

            let mut grad_ddg = Array2::zeros((neq, ndim));
            for ieq in 0..neq {
                let jumpu = u_r[ieq] - u_l[ieq];
                for idim in 0..ndim {
                    let mut hess_term = 0.0;
                    for jdim in 0..ndim {
                        hess_term += (hess_u_r[(ieq, jdim, idim)]
                            - hess_u_l[(ieq, jdim, idim)])
                            * unit_normal[jdim];
                    }
                    grad_ddg[(ieq, idim)] = beta0 * jumpu / h_ddg * unit_normal[idim]
                        + 0.5 * (grad_u_l[(ieq, idim)] + grad_u_r[(ieq, idim)])
                        + beta1 * h_ddg * hess_term;
                }
            }

            let uavg = 0.5 * (&u_l + &u_r);
            let fvisc =
                self.diff_flux
                    .normal_flux(uavg.view(), grad_ddg.view(), unit_normal.view());

            for itest in 0..nbasis_l {
                for ieq in 0..neq {
                    res_l[(itest, ieq)] +=
                        (fvisc[ieq] - fadv[ieq]) * weight * sqrtg * bi_l[itest];
                }
            }
            for itest in 0..nbasis_r {
                for ieq in 0..neq {
                    res_r[(itest, ieq)] -=
                        (fvisc[ieq] - fadv[ieq]) * weight * sqrtg * bi_r[itest];
                }
            }

            // interface correction (DDGIC)
            if self.sigma_ic != 0.0 {
                if let Some(gtensor) = self.diff_flux.homogeneity_tensor(uavg.view()) {
                    for ieq in 0..neq {
                        for kdim in 0..ndim {
                            for req in 0..neq {
                                let jumpu_r = u_r[req] - u_l[req];
                                for sdim in 0..ndim {
                                    let ic = self.sigma_ic
                                        * gtensor[(ieq, kdim, req, sdim)]
                                        * unit_normal[kdim]
                                        * jumpu_r
                                        * weight
                                        * sqrtg;
                                    // the half comes from the average operator
                                    for itest in 0..nbasis_l {
                                        res_l[(itest, ieq)] -=
                                            ic * 0.5 * grad_bi_l[(itest, sdim)];
                                    }
                                    for itest in 0..nbasis_r {
                                        res_r[(itest, ieq)] -=
                                            ic * 0.5 * grad_bi_r[(itest, sdim)];
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Weak form of a boundary condition; the left element is the interior
    /// one. unkel_r is the same block as unkel_l except for periodic faces,
    /// where it belongs to the partner element.
    pub fn boundary_integral(
        &self,
        fespace: &FESpace,
        itrace: usize,
        unkel_l: ArrayView2<f64>,
        unkel_r: ArrayView2<f64>,
        res_l: &mut Array2<f64>,
        anomalies: &mut AnomalyLog,
    ) -> Result<(), SolverError> {
        let neq = self.ncomp();
        let ndim = fespace.mesh.ndim;
        let trace = fespace.traces[itrace];
        let rt = fespace.trace_ref(itrace);
        let face = &fespace.mesh.faces[trace.facidx];
        let coord = fespace.mesh.nodes.view();

        let trans_l = fespace.mesh.transformation(trace.el_l);
        let centroid_l = fespace.mesh.el_centroid(trace.el_l);
        let order_l = fespace.el_ref(trace.el_l).basis.polynomial_order();
        let nbasis_l = fespace.el_nbasis(trace.el_l);

        match face.bctype {
            BoundaryCondition::Dirichlet => {
                // Huang, Chen, Li, Yan 2016
                let (beta0, _) = self.ddg_betas(order_l);
                let callback = &self.dirichlet_callbacks[face.bcflag];
                let mut dirichlet_vals = vec![0.0; neq];

                for ig in 0..rt.quadrule.npoints() {
                    let s = rt.quadrule.points.row(ig);
                    let weight = rt.quadrule.weights[ig];
                    let jac_fac = face.jacobian(coord, s);
                    let sqrtg = face.root_riemann_metric(jac_fac.view());
                    let unit_normal = normalize(&face.normal(coord, s));
                    let phys_pt = face.transform(coord, s);

                    let bi_l = &rt.evals_l[ig].values;
                    let xi_l = face.transform_xi_l(trans_l, s);
                    let (grad_bi_l, _) =
                        self.side_eval(fespace, trace.el_l, &rt.evals_l[ig], xi_l.view())?;

                    let u_l = contract_values(unkel_l, bi_l.view());
                    let grad_u_l = contract_grads(unkel_l, grad_bi_l.view());
                    callback(phys_pt.as_slice().unwrap(), &mut dirichlet_vals);

                    let u_bc = Array1::from_vec(dirichlet_vals.clone());
                    let fadv =
                        self.conv_flux
                            .normal_flux(u_l.view(), u_bc.view(), unit_normal.view());

                    // distance from the boundary quadrature point
                    let mut h_ddg = 0.0;
                    for idim in 0..ndim {
                        h_ddg += (unit_normal[idim] * (phys_pt[idim] - centroid_l[idim])).abs();
                    }
                    h_ddg = h_ddg.max(f64::EPSILON);

                    let mut grad_ddg = Array2::zeros((neq, ndim));
                    for ieq in 0..neq {
                        let jumpu = u_bc[ieq] - u_l[ieq];
                        for idim in 0..ndim {
                            grad_ddg[(ieq, idim)] = beta0 * jumpu / h_ddg * unit_normal[idim]
                                + grad_u_l[(ieq, idim)];
                        }
                    }

                    let uavg = 0.5 * (&u_l + &u_bc);
                    let fvisc = self.diff_flux.normal_flux(
                        uavg.view(),
                        grad_ddg.view(),
                        unit_normal.view(),
                    );

                    for itest in 0..nbasis_l {
                        for ieq in 0..neq {
                            res_l[(itest, ieq)] +=
                                (fvisc[ieq] - fadv[ieq]) * weight * sqrtg * bi_l[itest];
                        }
                    }

                    if self.sigma_ic != 0.0 {
                        if let Some(gtensor) = self.diff_flux.homogeneity_tensor(uavg.view())
                        {
                            for itest in 0..nbasis_l {
                                for ieq in 0..neq {
                                    for kdim in 0..ndim {
                                        for req in 0..neq {
                                            let jumpu_r = u_bc[req] - u_l[req];
                                            for sdim in 0..ndim {
                                                res_l[(itest, ieq)] -= self.sigma_ic
                                                    * gtensor[(ieq, kdim, req, sdim)]
                                                    * unit_normal[kdim]
                                                    * grad_bi_l[(itest, sdim)]
                                                    * jumpu_r
                                                    * weight
                                                    * sqrtg;
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }

            // Neumann prescribes a solution gradient; only the diffusive
            // flux carries it and hyperbolic problems have no equivalent
            // (use extrapolation or an outflow instead).
            // Li and Tang 2017 sec 9.1.1
            BoundaryCondition::Neumann => {
                let callback = &self.neumann_callbacks[face.bcflag];
                let mut neumann_vals = vec![0.0; neq];

                for ig in 0..rt.quadrule.npoints() {
                    let s = rt.quadrule.points.row(ig);
                    let weight = rt.quadrule.weights[ig];
                    let jac_fac = face.jacobian(coord, s);
                    let sqrtg = face.root_riemann_metric(jac_fac.view());
                    let phys_pt = face.transform(coord, s);
                    let bi_l = &rt.evals_l[ig].values;

                    callback(phys_pt.as_slice().unwrap(), &mut neumann_vals);
                    let fvisc = self
                        .diff_flux
                        .neumann_flux(Array1::from_vec(neumann_vals.clone()).view());

                    for itest in 0..nbasis_l {
                        for ieq in 0..neq {
                            res_l[(itest, ieq)] += fvisc[ieq] * weight * sqrtg * bi_l[itest];
                        }
                    }
                }
            }

            BoundaryCondition::SpacetimePast => {
                self.spacetime_past_integral(fespace, itrace, unkel_l, unkel_r, res_l, anomalies)?;
            }

            // spacetime future is purely upwind: extrapolation
            BoundaryCondition::SpacetimeFuture | BoundaryCondition::Extrapolation => {
                for ig in 0..rt.quadrule.npoints() {
                    let s = rt.quadrule.points.row(ig);
                    let weight = rt.quadrule.weights[ig];
                    let jac_fac = face.jacobian(coord, s);
                    let sqrtg = face.root_riemann_metric(jac_fac.view());
                    let unit_normal = normalize(&face.normal(coord, s));

                    let bi_l = &rt.evals_l[ig].values;
                    let xi_l = face.transform_xi_l(trans_l, s);
                    let (grad_bi_l, _) =
                        self.side_eval(fespace, trace.el_l, &rt.evals_l[ig], xi_l.view())?;

                    let u_l = contract_values(unkel_l, bi_l.view());
                    let grad_u_l = contract_grads(unkel_l, grad_bi_l.view());

                    let fadv =
                        self.conv_flux
                            .normal_flux(u_l.view(), u_l.view(), unit_normal.view());
                    // exterior state and gradient match the interior: jump=0
                    let fvisc = self.diff_flux.normal_flux(
                        u_l.view(),
                        grad_u_l.view(),
                        unit_normal.view(),
                    );

                    for itest in 0..nbasis_l {
                        for ieq in 0..neq {
                            res_l[(itest, ieq)] +=
                                (fvisc[ieq] - fadv[ieq]) * weight * sqrtg * bi_l[itest];
                        }
                    }
                }
            }

            BoundaryCondition::Periodic => {
                // the partner element's block arrives in unkel_r; reuse the
                // interior DDG path and discard the partner-side scatter
                let nbasis_r = fespace.el_nbasis(trace.el_r);
                let mut res_scratch = Array2::zeros((nbasis_r, neq));
                self.trace_integral(fespace, itrace, unkel_l, unkel_r, res_l, &mut res_scratch)?;
            }

            BoundaryCondition::ParallelCom => {
                anomalies.fatal(format!(
                    "parallel communication face reached in serial assembly \
                     (trace {itrace})"
                ));
            }

            BoundaryCondition::Interior => {
                anomalies.fatal(format!("interior face {itrace} routed to boundary integral"));
            }

            // everything else goes through the PDE-level boundary state
            bctype => {
                let (beta0, _) = self.ddg_betas(order_l);
                let mut missing_bc = false;
                for ig in 0..rt.quadrule.npoints() {
                    let s = rt.quadrule.points.row(ig);
                    let weight = rt.quadrule.weights[ig];
                    let jac_fac = face.jacobian(coord, s);
                    let sqrtg = face.root_riemann_metric(jac_fac.view());
                    let unit_normal = normalize(&face.normal(coord, s));
                    let phys_pt = face.transform(coord, s);

                    let bi_l = &rt.evals_l[ig].values;
                    let xi_l = face.transform_xi_l(trans_l, s);
                    let (grad_bi_l, _) =
                        self.side_eval(fespace, trace.el_l, &rt.evals_l[ig], xi_l.view())?;

                    let u_l = contract_values(unkel_l, bi_l.view());
                    let grad_u_l = contract_grads(unkel_l, grad_bi_l.view());

                    let Some((u_r, _grad_u_r)) = self.phys_flux.apply_bc(
                        u_l.view(),
                        grad_u_l.view(),
                        unit_normal.view(),
                        bctype,
                        face.bcflag,
                    ) else {
                        missing_bc = true;
                        break;
                    };

                    let mut h_ddg = 0.0;
                    for idim in 0..ndim {
                        h_ddg += (unit_normal[idim] * (phys_pt[idim] - centroid_l[idim])).abs();
                    }
                    h_ddg = h_ddg.max(f64::EPSILON);

                    let mut grad_ddg = Array2::zeros((neq, ndim));
                    for ieq in 0..neq {
                        let jumpu = u_r[ieq] - u_l[ieq];
                        for idim in 0..ndim {
                            grad_ddg[(ieq, idim)] = beta0 * jumpu / h_ddg * unit_normal[idim]
                                + grad_u_l[(ieq, idim)];
                        }
                    }

                    let fadv =
                        self.conv_flux
                            .normal_flux(u_l.view(), u_r.view(), unit_normal.view());
                    let uavg = 0.5 * (&u_l + &u_r);
                    let fvisc = self.diff_flux.normal_flux(
                        uavg.view(),
                        grad_ddg.view(),
                        unit_normal.view(),
                    );

                    for itest in 0..nbasis_l {
                        for ieq in 0..neq {
                            res_l[(itest, ieq)] +=
                                (fvisc[ieq] - fadv[ieq]) * weight * sqrtg * bi_l[itest];
                        }
                    }

                    if self.sigma_ic != 0.0 {
                        if let Some(gtensor) = self.diff_flux.homogeneity_tensor(uavg.view())
                        {
                            for itest in 0..nbasis_l {
                                for ieq in 0..neq {
                                    for kdim in 0..ndim {
                                        for req in 0..neq {
                                            let jumpu_r = u_r[req] - u_l[req];
                                            for sdim in 0..ndim {
                                                res_l[(itest, ieq)] -= self.sigma_ic
                                                    * gtensor[(ieq, kdim, req, sdim)]
                                                    * unit_normal[kdim]
                                                    * grad_bi_l[(itest, sdim)]
                                                    * jumpu_r
                                                    * weight
                                                    * sqrtg;
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                if missing_bc {
                    anomalies.fatal(format!(
                        "boundary condition {bctype:?} reached but the physical \
                         flux does not implement it (trace {itrace})"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Spacetime-past branch: point values come from the past slab, the
    /// gradient and Hessian contractions use the current element block.
    fn spacetime_past_integral(
        &self,
        fespace: &FESpace,
        itrace: usize,
        unkel_l: ArrayView2<f64>,
        unkel_r: ArrayView2<f64>,
        res_l: &mut Array2<f64>,
        anomalies: &mut AnomalyLog,
    ) -> Result<(), SolverError> {
        let Some(st) = &self.spacetime else {
            anomalies.fatal(format!(
                "spacetime-past face reached without a spacetime connection \
                 (trace {itrace})"
            ));
            return Ok(());
        };
        let Some((jtrace, past_evals)) = st.connections.get(&itrace) else {
            anomalies.fatal(format!("no past trace connected to trace {itrace}"));
            return Ok(());
        };
        let past_el = st.fespace_past.traces[*jtrace].el_l;
        let unkel_past = extract_elspan(past_el, &st.layout_past, &st.u_past);

        let neq = self.ncomp();
        let ndim = fespace.mesh.ndim;
        let trace = fespace.traces[itrace];
        let rt = fespace.trace_ref(itrace);
        let face = &fespace.mesh.faces[trace.facidx];
        let coord = fespace.mesh.nodes.view();
        let trans_l = fespace.mesh.transformation(trace.el_l);
        let centroid_l = fespace.mesh.el_centroid(trace.el_l);
        let nbasis_l = fespace.el_nbasis(trace.el_l);

        let order_l = fespace.el_ref(trace.el_l).basis.polynomial_order();
        let order_r = st.fespace_past.el_ref(past_el).basis.polynomial_order();
        let (beta0, beta1) = self.ddg_betas(order_l.max(order_r));

        for ig in 0..rt.quadrule.npoints() {
            let s = rt.quadrule.points.row(ig);
            let weight = rt.quadrule.weights[ig];
            let jac_fac = face.jacobian(coord, s);
            let sqrtg = face.root_riemann_metric(jac_fac.view());
            let unit_normal = normalize(&face.normal(coord, s));
            let phys_pt = face.transform(coord, s);

            let bi_l = &rt.evals_l[ig].values;
            let xi_l = face.transform_xi_l(trans_l, s);
            let (grad_bi_l, hess_bi_l) =
                self.side_eval(fespace, trace.el_l, &rt.evals_l[ig], xi_l.view())?;
            let (grad_bi_r, hess_bi_r) =
                self.side_eval(fespace, trace.el_l, &rt.evals_r[ig], xi_l.view())?;

            let u_l = contract_values(unkel_l, bi_l.view());
            // point values from the past slab
            let u_r = contract_values(unkel_past.view(), past_evals[ig].values.view());
            let grad_u_l = contract_grads(unkel_l, grad_bi_l.view());
            let grad_u_r = contract_grads(unkel_r, grad_bi_r.view());
            let hess_u_l = contract_hess(unkel_l, hess_bi_l.view());
            let hess_u_r = contract_hess(unkel_r, hess_bi_r.view());

            let fadv = self
                .conv_flux
                .normal_flux(u_l.view(), u_r.view(), unit_normal.view());

            // past-slab length scale: twice the centroid distance
            let mut h_ddg = 0.0;
            for idim in 0..ndim {
                h_ddg += unit_normal[idim] * 2.0 * (phys_pt[idim] - centroid_l[idim]);
            }
            h_ddg = h_ddg.abs().max(f64::EPSILON).copysign(h_ddg);

            let mut grad_ddg = Array2::zeros((neq, ndim));
            for ieq in 0..neq {
                let jumpu = u_r[ieq] - u_l[ieq];
                for idim in 0..ndim {
                    let mut hess_term = 0.0;
                    for jdim in 0..ndim {
                        hess_term += (hess_u_r[(ieq, jdim, idim)]
                            - hess_u_l[(ieq, jdim, idim)])
                            * unit_normal[jdim];
                    }
                    grad_ddg[(ieq, idim)] = beta0 * jumpu / h_ddg * unit_normal[idim]
                        + 0.5 * (grad_u_l[(ieq, idim)] + grad_u_r[(ieq, idim)])
                        + beta1 * h_ddg * hess_term;
                }
            }

            let uavg = 0.5 * (&u_l + &u_r);
            let fvisc =
                self.diff_flux
                    .normal_flux(uavg.view(), grad_ddg.view(), unit_normal.view());

            for itest in 0..nbasis_l {
                for ieq in 0..neq {
                    res_l[(itest, ieq)] +=
                        (fvisc[ieq] - fadv[ieq]) * weight * sqrtg * bi_l[itest];
                }
            }
        }
        Ok(())
    }

    /// Interface-conservation residual of a trace, scattered into the trace
    /// basis:
    /// r_IC = -int_Gamma (F(uR, graduR) - F(uL, graduL)) . n phi dS.
    /// Vanishes on interior faces at continuous solutions.
    pub fn interface_conservation(
        &self,
        fespace: &FESpace,
        itrace: usize,
        unkel_l: ArrayView2<f64>,
        unkel_r: ArrayView2<f64>,
        res: &mut Array2<f64>,
    ) -> Result<(), SolverError> {
        let neq = self.ncomp();
        let ndim = fespace.mesh.ndim;
        let trace = fespace.traces[itrace];
        let rt = fespace.trace_ref(itrace);
        let face = &fespace.mesh.faces[trace.facidx];
        let coord = fespace.mesh.nodes.view();
        let trans_l = fespace.mesh.transformation(trace.el_l);
        let trans_r = fespace.mesh.transformation(trace.el_r);

        let order_l = fespace.el_ref(trace.el_l).basis.polynomial_order();
        let order_r = fespace.el_ref(trace.el_r).basis.polynomial_order();
        let nbasis_trace = rt.trace_basis.nbasis();

        for ig in 0..rt.quadrule.npoints() {
            let s = rt.quadrule.points.row(ig);
            let weight = rt.quadrule.weights[ig];
            let jac_fac = face.jacobian(coord, s);
            let sqrtg = face.root_riemann_metric(jac_fac.view());
            let unit_normal = normalize(&face.normal(coord, s));

            let bi_l = &rt.evals_l[ig].values;
            let bi_r = &rt.evals_r[ig].values;
            let bi_trace = rt.trace_basis.eval(s);
            let xi_l = face.transform_xi_l(trans_l, s);
            let xi_r = face.transform_xi_r(trans_r, s);
            let (grad_bi_l, _) =
                self.side_eval(fespace, trace.el_l, &rt.evals_l[ig], xi_l.view())?;
            let (grad_bi_r, _) =
                self.side_eval(fespace, trace.el_r, &rt.evals_r[ig], xi_r.view())?;

            let u_l = contract_values(unkel_l, bi_l.view());
            let mut u_r = contract_values(unkel_r, bi_r.view());
            let mut grad_u_l = contract_grads(unkel_l, grad_bi_l.view());
            let mut grad_u_r = contract_grads(unkel_r, grad_bi_r.view());

            if face.bctype != BoundaryCondition::Interior {
                match face.bctype {
                    BoundaryCondition::Dirichlet => {
                        let phys_pt = face.transform(coord, s);
                        let mut vals = vec![0.0; neq];
                        self.dirichlet_callbacks[face.bcflag]
                            (phys_pt.as_slice().unwrap(), &mut vals);
                        u_r = Array1::from_vec(vals);
                    }
                    _ => {
                        res.fill(0.0);
                        return Ok(());
                    }
                }
            }

            // HACK: drop gradient data when both sides are linear
            if order_l == 1 && order_r == 1 {
                grad_u_l.fill(0.0);
                grad_u_r.fill(0.0);
            }

            let flux_l = self.phys_flux.flux(u_l.view(), grad_u_l.view());
            let flux_r = self.phys_flux.flux(u_r.view(), grad_u_r.view());

            for ieq in 0..neq {
                let mut jumpflux = 0.0;
                for idim in 0..ndim {
                    jumpflux +=
                        (flux_r[(ieq, idim)] - flux_l[(ieq, idim)]) * unit_normal[idim];
                }
                let ic_res = jumpflux * sqrtg * weight;
                // the signed normal adds directionality, allowing
                // cancellation at v-shaped interface intersections
                for itest in 0..nbasis_trace {
                    res[(itest, ieq)] -= ic_res * bi_trace[itest];
                }
            }
        }
        Ok(())
    }
}
