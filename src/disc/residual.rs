use hashbrown::HashMap;
use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;

use crate::disc::conservation_law::ConservationLawDDG;
use crate::disc::{ConvectiveNumericalFlux, DiffusionFlux, PhysicalFlux};
use crate::error::{AnomalyLog, SolverError};
use crate::fe::geo_map::{GeoDofMap, GeoLayout, IcLayout};
use crate::fe::layout::{extract_elspan, scatter_elspan, FeLayout};
use crate::fespace::FESpace;
use crate::geometry::BoundaryCondition;
use crate::linalg::SparseMat;

/// Finite-difference step bounded below by the machine epsilon root.
pub fn scale_fd_epsilon(epsilon: f64, scale: f64) -> f64 {
    epsilon.max(scale * epsilon)
}

/// Frobenius norm of the physical flux at the element's first quadrature
/// point; sets the finite-difference scale for the element block.
fn element_flux_norm<P, C, D>(
    disc: &ConservationLawDDG<P, C, D>,
    fespace: &FESpace,
    iel: usize,
    unkel: ArrayView2<f64>,
) -> Result<f64, SolverError>
where
    P: PhysicalFlux,
    C: ConvectiveNumericalFlux,
    D: DiffusionFlux,
{
    use crate::fe::layout::{contract_grads, contract_values};
    let refel = fespace.el_ref(iel);
    let trans = fespace.mesh.transformation(iel);
    let coord_el = fespace.mesh.el_coord(iel);
    let eval = &refel.evals[0];
    let jac = trans.jacobian(coord_el.view(), refel.quadrule.points.row(0));
    let phys_grads = fespace.phys_grad_basis(eval.ref_grads.view(), jac.view())?;
    let u = contract_values(unkel, eval.values.view());
    let grad_u = contract_grads(unkel, phys_grads.view());
    let flux = disc.phys_flux.flux(u.view(), grad_u.view());
    Ok(flux.iter().map(|f| f * f).sum::<f64>().sqrt())
}

/// Assemble the PDE residual over the whole space.
pub fn form_residual<P, C, D>(
    disc: &ConservationLawDDG<P, C, D>,
    fespace: &FESpace,
    layout: &FeLayout,
    u: &[f64],
    res: &mut [f64],
    anomalies: &mut AnomalyLog,
) -> Result<(), SolverError>
where
    P: PhysicalFlux,
    C: ConvectiveNumericalFlux,
    D: DiffusionFlux,
{
    let neq = disc.ncomp();
    res.fill(0.0);

    for iel in 0..fespace.elements.len() {
        let unkel = extract_elspan(iel, layout, u);
        let mut local = Array2::zeros((fespace.el_nbasis(iel), neq));
        disc.domain_integral(fespace, iel, unkel.view(), &mut local)?;
        scatter_elspan(iel, 1.0, local.view(), 1.0, layout, res);
    }

    for itrace in fespace.interior_trace_start..fespace.interior_trace_end {
        let trace = fespace.traces[itrace];
        let unkel_l = extract_elspan(trace.el_l, layout, u);
        let unkel_r = extract_elspan(trace.el_r, layout, u);
        let mut res_l = Array2::zeros((fespace.el_nbasis(trace.el_l), neq));
        let mut res_r = Array2::zeros((fespace.el_nbasis(trace.el_r), neq));
        disc.trace_integral(
            fespace,
            itrace,
            unkel_l.view(),
            unkel_r.view(),
            &mut res_l,
            &mut res_r,
        )?;
        scatter_elspan(trace.el_l, 1.0, res_l.view(), 1.0, layout, res);
        scatter_elspan(trace.el_r, 1.0, res_r.view(), 1.0, layout, res);
    }

    for itrace in fespace.bdy_trace_start..fespace.bdy_trace_end {
        let trace = fespace.traces[itrace];
        let unkel_l = extract_elspan(trace.el_l, layout, u);
        let unkel_r = extract_elspan(trace.el_r, layout, u);
        let mut res_l = Array2::zeros((fespace.el_nbasis(trace.el_l), neq));
        disc.boundary_integral(
            fespace,
            itrace,
            unkel_l.view(),
            unkel_r.view(),
            &mut res_l,
            anomalies,
        )?;
        scatter_elspan(trace.el_l, 1.0, res_l.view(), 1.0, layout, res);
    }
    Ok(())
}

/// Interface-conservation residual over the selected traces.
pub fn form_ic_residual<P, C, D>(
    disc: &ConservationLawDDG<P, C, D>,
    fespace: &FESpace,
    layout: &FeLayout,
    u: &[f64],
    geo_map: &GeoDofMap,
    ic_layout: &IcLayout,
    res_ic: &mut [f64],
) -> Result<(), SolverError>
where
    P: PhysicalFlux,
    C: ConvectiveNumericalFlux,
    D: DiffusionFlux,
{
    let neq = disc.ncomp();
    res_ic.fill(0.0);
    for (isel, &itrace) in geo_map.selected_traces.iter().enumerate() {
        let trace = fespace.traces[itrace];
        let unkel_l = extract_elspan(trace.el_l, layout, u);
        let unkel_r = extract_elspan(trace.el_r, layout, u);
        let nbasis_trace = fespace.trace_ref(itrace).trace_basis.nbasis();
        let mut block = Array2::zeros((nbasis_trace, neq));
        disc.interface_conservation(
            fespace,
            itrace,
            unkel_l.view(),
            unkel_r.view(),
            &mut block,
        )?;
        for itest in 0..nbasis_trace {
            for iv in 0..neq {
                res_ic[ic_layout.index(isel, itest, iv)] = block[(itest, iv)];
            }
        }
    }
    Ok(())
}

/// l2 norm of the interface-conservation residual of every trace; used for
/// the geometry selection threshold.
pub fn ic_residual_norms<P, C, D>(
    disc: &ConservationLawDDG<P, C, D>,
    fespace: &FESpace,
    layout: &FeLayout,
    u: &[f64],
) -> Result<Vec<f64>, SolverError>
where
    P: PhysicalFlux,
    C: ConvectiveNumericalFlux,
    D: DiffusionFlux,
{
    let neq = disc.ncomp();
    let mut norms = vec![0.0; fespace.traces.len()];
    for itrace in fespace.interior_trace_start..fespace.interior_trace_end {
        let trace = fespace.traces[itrace];
        let unkel_l = extract_elspan(trace.el_l, layout, u);
        let unkel_r = extract_elspan(trace.el_r, layout, u);
        let nbasis_trace = fespace.trace_ref(itrace).trace_basis.nbasis();
        let mut block = Array2::zeros((nbasis_trace, neq));
        disc.interface_conservation(
            fespace,
            itrace,
            unkel_l.view(),
            unkel_r.view(),
            &mut block,
        )?;
        norms[itrace] = block.iter().map(|x| x * x).sum::<f64>().sqrt();
    }
    Ok(norms)
}

/// Residual blocks touched by one perturbation: per-element PDE blocks plus
/// per-selected-trace interface-conservation blocks.
struct LocalContribs {
    el_blocks: Vec<(usize, Array2<f64>)>,
    ic_blocks: Vec<(usize, Array2<f64>)>,
}

impl LocalContribs {
    fn el_block<'a>(
        blocks: &'a mut Vec<(usize, Array2<f64>)>,
        iel: usize,
        nbasis: usize,
        neq: usize,
    ) -> &'a mut Array2<f64> {
        if let Some(pos) = blocks.iter().position(|(i, _)| *i == iel) {
            &mut blocks[pos].1
        } else {
            blocks.push((iel, Array2::zeros((nbasis, neq))));
            &mut blocks.last_mut().unwrap().1
        }
    }
}

/// Residual contributions of a set of elements and traces, with `get_unkel`
/// supplying (possibly perturbed) element blocks.
#[allow(clippy::too_many_arguments)]
fn region_contribs<P, C, D, F>(
    disc: &ConservationLawDDG<P, C, D>,
    fespace: &FESpace,
    elements: &[usize],
    traces: &[usize],
    selected_trace_ordinal: &HashMap<usize, usize>,
    get_unkel: F,
    neq: usize,
    anomalies: &mut AnomalyLog,
) -> Result<LocalContribs, SolverError>
where
    P: PhysicalFlux,
    C: ConvectiveNumericalFlux,
    D: DiffusionFlux,
    F: Fn(usize) -> Array2<f64>,
{
    let mut contribs = LocalContribs {
        el_blocks: Vec::new(),
        ic_blocks: Vec::new(),
    };

    for &iel in elements {
        let unkel = get_unkel(iel);
        let nb = fespace.el_nbasis(iel);
        let block = LocalContribs::el_block(&mut contribs.el_blocks, iel, nb, neq);
        disc.domain_integral(fespace, iel, unkel.view(), block)?;
    }

    for &itrace in traces {
        let trace = fespace.traces[itrace];
        let face = &fespace.mesh.faces[trace.facidx];
        let unkel_l = get_unkel(trace.el_l);
        let unkel_r = get_unkel(trace.el_r);

        if face.bctype == BoundaryCondition::Interior {
            let nb_l = fespace.el_nbasis(trace.el_l);
            let nb_r = fespace.el_nbasis(trace.el_r);
            let mut res_l = Array2::zeros((nb_l, neq));
            let mut res_r = Array2::zeros((nb_r, neq));
            disc.trace_integral(
                fespace,
                itrace,
                unkel_l.view(),
                unkel_r.view(),
                &mut res_l,
                &mut res_r,
            )?;
            *LocalContribs::el_block(&mut contribs.el_blocks, trace.el_l, nb_l, neq) += &res_l;
            *LocalContribs::el_block(&mut contribs.el_blocks, trace.el_r, nb_r, neq) += &res_r;
        } else {
            let nb_l = fespace.el_nbasis(trace.el_l);
            let mut res_l = Array2::zeros((nb_l, neq));
            disc.boundary_integral(
                fespace,
                itrace,
                unkel_l.view(),
                unkel_r.view(),
                &mut res_l,
                anomalies,
            )?;
            *LocalContribs::el_block(&mut contribs.el_blocks, trace.el_l, nb_l, neq) += &res_l;
        }

        if let Some(&isel) = selected_trace_ordinal.get(&itrace) {
            let nbt = fespace.trace_ref(itrace).trace_basis.nbasis();
            let mut block = Array2::zeros((nbt, neq));
            disc.interface_conservation(
                fespace,
                itrace,
                unkel_l.view(),
                unkel_r.view(),
                &mut block,
            )?;
            contribs.ic_blocks.push((isel, block));
        }
    }
    Ok(contribs)
}

fn diff_to_triplets(
    base: &LocalContribs,
    perturbed: &LocalContribs,
    eps: f64,
    col: usize,
    layout: &FeLayout,
    ic_layout: Option<&IcLayout>,
    n_u: usize,
    triplets: &mut Vec<(usize, usize, f64)>,
) {
    for ((iel, base_block), (iel_p, pert_block)) in
        base.el_blocks.iter().zip(&perturbed.el_blocks)
    {
        debug_assert_eq!(iel, iel_p);
        for idof in 0..base_block.nrows() {
            for iv in 0..base_block.ncols() {
                let val = (pert_block[(idof, iv)] - base_block[(idof, iv)]) / eps;
                if val != 0.0 {
                    triplets.push((layout.index(*iel, idof, iv), col, val));
                }
            }
        }
    }
    if let Some(ic_layout) = ic_layout {
        for ((isel, base_block), (isel_p, pert_block)) in
            base.ic_blocks.iter().zip(&perturbed.ic_blocks)
        {
            debug_assert_eq!(isel, isel_p);
            for itest in 0..base_block.nrows() {
                for iv in 0..base_block.ncols() {
                    let val = (pert_block[(itest, iv)] - base_block[(itest, iv)]) / eps;
                    if val != 0.0 {
                        triplets.push((n_u + ic_layout.index(*isel, itest, iv), col, val));
                    }
                }
            }
        }
    }
}

/// Assemble the full residual vector (r_pde, r_ic) and its finite-difference
/// Jacobian with respect to (u, x_g).
///
/// The sparsity comes from the element/face incidence: perturbing an element
/// block touches the element and its face neighbors; perturbing a geometry
/// parameter touches every element around the node. `fd_epsilon` overrides
/// the flux-scaled step when set.
#[allow(clippy::too_many_arguments)]
pub fn form_full_system_fd<P, C, D>(
    disc: &ConservationLawDDG<P, C, D>,
    fespace: &mut FESpace,
    layout: &FeLayout,
    u: &[f64],
    geo: Option<(&GeoDofMap, &GeoLayout, &IcLayout)>,
    fd_epsilon: Option<f64>,
    anomalies: &mut AnomalyLog,
) -> Result<(Array1<f64>, SparseMat), SolverError>
where
    P: PhysicalFlux + Sync,
    C: ConvectiveNumericalFlux + Sync,
    D: DiffusionFlux + Sync,
{
    let neq = disc.ncomp();
    let n_u = layout.size();
    let (n_g, n_ic) = match geo {
        Some((_, geo_layout, ic_layout)) => (geo_layout.size(), ic_layout.size()),
        None => (0, 0),
    };
    let n_rows = n_u + n_ic;
    let n_cols = n_u + n_g;

    let selected_trace_ordinal: HashMap<usize, usize> = match geo {
        Some((geo_map, _, _)) => geo_map
            .selected_traces
            .iter()
            .enumerate()
            .map(|(i, &t)| (t, i))
            .collect(),
        None => HashMap::new(),
    };

    // base residual
    let mut res_full = Array1::zeros(n_rows);
    {
        let res_slice = res_full.as_slice_mut().unwrap();
        form_residual(disc, fespace, layout, u, &mut res_slice[..n_u], anomalies)?;
        if let Some((geo_map, _, ic_layout)) = geo {
            let (_, ic_part) = res_slice.split_at_mut(n_u);
            form_ic_residual(disc, fespace, layout, u, geo_map, ic_layout, ic_part)?;
        }
    }

    let sqrt_eps = f64::EPSILON.sqrt();
    let ic_layout_opt = geo.map(|(_, _, ic_layout)| ic_layout);

    // PDE columns: element blocks in parallel, each with its own anomaly sink
    let fespace_ref: &FESpace = fespace;
    let results: Vec<Result<(Vec<(usize, usize, f64)>, AnomalyLog), SolverError>> = (0
        ..fespace_ref.elements.len())
        .into_par_iter()
        .map(|jel| {
            let mut local_anomalies = AnomalyLog::new();
            let mut triplets = Vec::new();

            let unkel_base = extract_elspan(jel, layout, u);
            let mut region_traces: Vec<usize> =
                fespace_ref.fac_surr_el.row(jel).to_vec();
            region_traces.sort_unstable();
            region_traces.dedup();

            let base = region_contribs(
                disc,
                fespace_ref,
                &[jel],
                &region_traces,
                &selected_trace_ordinal,
                |iel| {
                    if iel == jel {
                        unkel_base.clone()
                    } else {
                        extract_elspan(iel, layout, u)
                    }
                },
                neq,
                &mut local_anomalies,
            )?;

            let eps = match fd_epsilon {
                Some(e) => e,
                None => scale_fd_epsilon(
                    sqrt_eps,
                    element_flux_norm(disc, fespace_ref, jel, unkel_base.view())?,
                ),
            };

            for jdof in 0..unkel_base.nrows() {
                for jeq in 0..neq {
                    let mut unkel_pert = unkel_base.clone();
                    unkel_pert[(jdof, jeq)] += eps;
                    let perturbed = region_contribs(
                        disc,
                        fespace_ref,
                        &[jel],
                        &region_traces,
                        &selected_trace_ordinal,
                        |iel| {
                            if iel == jel {
                                unkel_pert.clone()
                            } else {
                                extract_elspan(iel, layout, u)
                            }
                        },
                        neq,
                        &mut local_anomalies,
                    )?;
                    let col = layout.index(jel, jdof, jeq);
                    diff_to_triplets(
                        &base,
                        &perturbed,
                        eps,
                        col,
                        layout,
                        ic_layout_opt,
                        n_u,
                        &mut triplets,
                    );
                }
            }
            Ok((triplets, local_anomalies))
        })
        .collect();

    let mut triplets: Vec<(usize, usize, f64)> = Vec::new();
    for result in results {
        let (mut t, local_anomalies) = result?;
        triplets.append(&mut t);
        if local_anomalies.has_fatal() {
            anomalies.fatal("fatal anomaly during jacobian assembly");
        }
    }

    // geometry columns: perturb node coordinates through their
    // parametrizations (serial; mutates and restores the mesh)
    if let Some((geo_map, geo_layout, _)) = geo {
        for (isel, &inode) in geo_map.selected_nodes.iter().enumerate() {
            let m = geo_map.nparam(isel);
            if m == 0 {
                continue;
            }

            // region: elements around the node and all their traces
            let region_elements: Vec<usize> =
                fespace.el_surr_nodes.row(inode).to_vec();
            let mut region_traces: Vec<usize> = region_elements
                .iter()
                .flat_map(|&e| fespace.fac_surr_el.row(e).iter().copied())
                .collect();
            region_traces.sort_unstable();
            region_traces.dedup();

            let base = region_contribs(
                disc,
                fespace,
                &region_elements,
                &region_traces,
                &selected_trace_ordinal,
                |iel| extract_elspan(iel, layout, u),
                neq,
                anomalies,
            )?;

            let x_base: Vec<f64> = fespace.mesh.nodes.row(inode).to_vec();
            let mut params = vec![0.0; m];
            geo_map.constraints[isel].to_params(&x_base, &mut params);

            for iv in 0..m {
                let eps = match fd_epsilon {
                    Some(e) => e,
                    None => scale_fd_epsilon(sqrt_eps, params[iv].abs()),
                };
                let mut params_pert = params.clone();
                params_pert[iv] += eps;
                let mut x_pert = x_base.clone();
                geo_map.constraints[isel].from_params(&params_pert, &mut x_pert);
                for d in 0..fespace.mesh.ndim {
                    fespace.mesh.nodes[(inode, d)] = x_pert[d];
                }

                let perturbed = region_contribs(
                    disc,
                    fespace,
                    &region_elements,
                    &region_traces,
                    &selected_trace_ordinal,
                    |iel| extract_elspan(iel, layout, u),
                    neq,
                    anomalies,
                )?;

                // restore
                for d in 0..fespace.mesh.ndim {
                    fespace.mesh.nodes[(inode, d)] = x_base[d];
                }

                let col = n_u + geo_layout.index(isel, iv);
                diff_to_triplets(
                    &base,
                    &perturbed,
                    eps,
                    col,
                    layout,
                    ic_layout_opt,
                    n_u,
                    &mut triplets,
                );
            }
        }
    }

    let jac = SparseMat::from_triplets(n_rows, n_cols, &triplets);
    Ok((res_full, jac))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc::fluxes::{LinearDiffusionFlux, NoConvection};
    use crate::fe::layout::DofOrder;
    use crate::fespace::{BasisType, QuadratureType};
    use crate::mesh::{burgers_linear_mesh, uniform_quad_mesh};

    type HeatDisc =
        ConservationLawDDG<LinearDiffusionFlux, NoConvection, LinearDiffusionFlux>;

    fn heat_disc() -> HeatDisc {
        let mut disc = ConservationLawDDG::new(
            LinearDiffusionFlux {
                mu: 1.0,
                ncomp: 1,
                ndim: 2,
            },
            NoConvection { ncomp: 1 },
            LinearDiffusionFlux {
                mu: 1.0,
                ncomp: 1,
                ndim: 2,
            },
        );
        // u = x on every dirichlet boundary
        disc.dirichlet_callbacks
            .push(Box::new(|x: &[f64], out: &mut [f64]| out[0] = x[0]));
        disc
    }

    fn project_linear(fespace: &FESpace, layout: &FeLayout) -> Vec<f64> {
        // nodal interpolation of u(x, y) = x
        let mut u = vec![0.0; layout.size()];
        for iel in 0..fespace.elements.len() {
            let basis = &fespace.el_ref(iel).basis;
            let trans = fespace.mesh.transformation(iel);
            let coord = fespace.mesh.el_coord(iel);
            for idof in 0..basis.nbasis() {
                let x = trans.transform(coord.view(), basis.node(idof).view());
                u[layout.index(iel, idof, 0)] = x[0];
            }
        }
        u
    }

    #[test]
    fn test_ddg_residual_vanishes_for_projected_linear() {
        // exact linear solution of the laplace problem on the 6-element mesh
        let mesh = burgers_linear_mesh(true).unwrap();
        let fespace =
            FESpace::new(mesh, BasisType::Lagrange, QuadratureType::GaussLegendre, 1).unwrap();
        let mut disc = heat_disc();
        // spacetime-future boundary extrapolates; no dirichlet data needed
        disc.validate(&fespace).unwrap();

        let layout = FeLayout::new(fespace.dg_map.clone(), 1, DofOrder::DofLeft);
        let u = project_linear(&fespace, &layout);
        let mut res = vec![0.0; layout.size()];
        let mut anomalies = AnomalyLog::new();
        form_residual(&disc, &fespace, &layout, &u, &mut res, &mut anomalies).unwrap();
        assert!(anomalies.drain().is_ok());

        let norm: f64 = res.iter().map(|r| r * r).sum::<f64>().sqrt();
        assert!(norm < 1e-10, "residual norm {norm}");
    }

    #[test]
    fn test_ic_residual_vanishes_for_continuous_solution() {
        use crate::disc::fluxes::{LinearAdvection, NoDiffusion, UpwindAdvection};

        let mesh = burgers_linear_mesh(true).unwrap();
        let fespace =
            FESpace::new(mesh, BasisType::Lagrange, QuadratureType::GaussLegendre, 1).unwrap();
        let disc = ConservationLawDDG::new(
            LinearAdvection {
                velocity: vec![1.0, 0.5],
                ncomp: 1,
            },
            UpwindAdvection {
                velocity: vec![1.0, 0.5],
                ncomp: 1,
            },
            NoDiffusion { ncomp: 1 },
        );
        let layout = FeLayout::new(fespace.dg_map.clone(), 1, DofOrder::DofLeft);

        // continuous interpolant: every interface flux jump cancels
        let u = project_linear(&fespace, &layout);
        let norms = ic_residual_norms(&disc, &fespace, &layout, &u).unwrap();
        for itrace in fespace.interior_trace_start..fespace.interior_trace_end {
            assert!(norms[itrace] < 1e-12, "trace {itrace}: {}", norms[itrace]);
        }

        // a jump across element 0's right face shows up in exactly the
        // traces touching element 0
        let mut u_disc = u.clone();
        for idof in 0..4 {
            u_disc[layout.index(0, idof, 0)] += 1.0;
        }
        let norms = ic_residual_norms(&disc, &fespace, &layout, &u_disc).unwrap();
        let touching: Vec<usize> = fespace.fac_surr_el.row(0).to_vec();
        for itrace in fespace.interior_trace_start..fespace.interior_trace_end {
            if touching.contains(&itrace) {
                assert!(norms[itrace] > 1e-3, "trace {itrace} should see the jump");
            } else {
                assert!(norms[itrace] < 1e-12);
            }
        }
    }

    #[test]
    fn test_jacobian_matches_directional_difference() {
        // J v against (R(u + eps v) - R(u)) / eps verifies the incidence
        // bookkeeping end to end
        let mesh = uniform_quad_mesh(
            2,
            2,
            [0.0, 0.0],
            [1.0, 1.0],
            [crate::geometry::BoundaryCondition::Dirichlet; 4],
            [0; 4],
        )
        .unwrap();
        let mut fespace =
            FESpace::new(mesh, BasisType::Lagrange, QuadratureType::GaussLegendre, 1).unwrap();
        let disc = heat_disc();
        let layout = FeLayout::new(fespace.dg_map.clone(), 1, DofOrder::DofLeft);

        // smooth but non-trivial state
        let mut u = project_linear(&fespace, &layout);
        for (i, ui) in u.iter_mut().enumerate() {
            *ui += 0.05 * ((i as f64) * 0.61).sin();
        }

        let mut anomalies = AnomalyLog::new();
        let (res0, jac) = form_full_system_fd(
            &disc,
            &mut fespace,
            &layout,
            &u,
            None,
            None,
            &mut anomalies,
        )
        .unwrap();

        let v: Vec<f64> = (0..u.len()).map(|i| ((i as f64) * 1.3).cos()).collect();
        let eps = 1e-7;
        let u_pert: Vec<f64> = u.iter().zip(&v).map(|(ui, vi)| ui + eps * vi).collect();
        let mut res_pert = vec![0.0; layout.size()];
        form_residual(&disc, &fespace, &layout, &u_pert, &mut res_pert, &mut anomalies)
            .unwrap();

        let jv = jac.matvec(ndarray::Array1::from_vec(v).view());
        for i in 0..layout.size() {
            let fd = (res_pert[i] - res0[i]) / eps;
            assert!(
                (jv[i] - fd).abs() < 1e-5 * (1.0 + fd.abs()),
                "row {i}: Jv={} fd={fd}",
                jv[i]
            );
        }
    }

    #[test]
    fn test_geometry_column_matches_node_motion() {
        use crate::fe::geo_map::{extract_geospan, update_mesh_coords, GeoDofMap, GeoLayout};

        let mesh = burgers_linear_mesh(true).unwrap();
        let mut fespace =
            FESpace::new(mesh, BasisType::Lagrange, QuadratureType::GaussLegendre, 1).unwrap();
        let disc = heat_disc();
        let layout = FeLayout::new(fespace.dg_map.clone(), 1, DofOrder::DofLeft);

        // select every interior trace
        let all_interior: Vec<usize> =
            (fespace.interior_trace_start..fespace.interior_trace_end).collect();
        let geo_map = GeoDofMap::new(all_interior, &fespace);
        let geo_layout = GeoLayout::new(&geo_map);
        let ic_layout = IcLayout::new(&fespace, &geo_map, 1);
        assert!(geo_layout.size() > 0);

        let mut u = project_linear(&fespace, &layout);
        for (i, ui) in u.iter_mut().enumerate() {
            *ui += 0.02 * ((i as f64) * 0.37).cos();
        }

        let mut anomalies = AnomalyLog::new();
        let (res0, jac) = form_full_system_fd(
            &disc,
            &mut fespace,
            &layout,
            &u,
            Some((&geo_map, &geo_layout, &ic_layout)),
            None,
            &mut anomalies,
        )
        .unwrap();
        assert_eq!(jac.ncols, layout.size() + geo_layout.size());
        assert_eq!(jac.nrows, layout.size() + ic_layout.size());

        // move the geometry along a direction and compare against J
        let geo0 = extract_geospan(&fespace, &geo_map, &geo_layout);
        let eps = 1e-7;
        let mut dir = ndarray::Array1::zeros(layout.size() + geo_layout.size());
        let mut geo_pert = geo0.clone();
        for ig in 0..geo_layout.size() {
            let step = 0.5 + 0.1 * (ig as f64);
            dir[layout.size() + ig] = step;
            geo_pert[ig] += eps * step;
        }
        update_mesh_coords(&geo_pert, &geo_map, &geo_layout, &mut fespace);

        let mut res_pert = vec![0.0; layout.size() + ic_layout.size()];
        form_residual(
            &disc,
            &fespace,
            &layout,
            &u,
            &mut res_pert[..layout.size()],
            &mut anomalies,
        )
        .unwrap();
        {
            let (_, ic_part) = res_pert.split_at_mut(layout.size());
            form_ic_residual(&disc, &fespace, &layout, &u, &geo_map, &ic_layout, ic_part)
                .unwrap();
        }
        // restore the mesh
        update_mesh_coords(&geo0, &geo_map, &geo_layout, &mut fespace);

        let jv = jac.matvec(dir.view());
        for i in 0..res_pert.len() {
            let fd = (res_pert[i] - res0[i]) / eps;
            assert!(
                (jv[i] - fd).abs() < 2e-4 * (1.0 + fd.abs()),
                "row {i}: Jv={} fd={fd}",
                jv[i]
            );
        }
    }
}
