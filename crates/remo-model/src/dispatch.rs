//! Regional dispatch subproblem assembled as a sparse conic QP.
//!
//! ## Formulation
//!
//! For one region (a set of sites) the model is:
//!
//! ```text
//! minimize    Σ_g (c1_g·P_g,t + c2_g·P_g,t²)
//!             + Σ_c [ λ_c·(f_c − z_c) + (ρ/2)·(f_c − z_c)² ]
//!
//! subject to:
//!   Σ_g P_g,t + Σ_in η_l·f_l,t − Σ_out f_l,t = D_s,t    (balance, per site/timestep)
//!   0 ≤ P_g,t ≤ Pmax_g                                  (generator limits)
//!   −cap_l ≤ f_l,t ≤ cap_l                              (line capacity)
//! ```
//!
//! Internal lines (both endpoints in the region) only appear in the balance;
//! boundary lines additionally carry the ADMM augmented-Lagrangian terms with
//! consensus value `z` and dual price `λ` held fixed between solves.
//!
//! ## Solver Backend
//!
//! We use [Clarabel](https://github.com/oxfordcontrol/Clarabel.rs), an
//! interior-point solver for conic programs, in the standard form
//! `min ½xᵀPx + qᵀx  s.t.  Ax + s = b, s ∈ K` with a zero cone for the
//! balance equalities and a nonnegative cone for all box bounds.

use crate::{SolveResult, Subproblem, SubproblemError};
use clarabel::algebra::CscMatrix;
use clarabel::solver::{DefaultSettingsBuilder, IPSolver, SupportedConeT};
use remo_core::{CouplingKey, MultiRegionData, TransmissionLine};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Generator data flattened for matrix assembly.
#[derive(Debug, Clone)]
struct GenVar {
    site_idx: usize,
    p_max: f64,
    c1: f64,
    c2: f64,
}

/// A line kept in this region's model, with endpoint positions resolved
/// against the local site list (None = endpoint lives in another region).
#[derive(Debug, Clone)]
struct LineVar {
    line: TransmissionLine,
    in_idx: Option<usize>,
    out_idx: Option<usize>,
}

/// One region's dispatch model with fixable ADMM coupling variables.
pub struct DispatchSubproblem {
    sites: Vec<String>,
    timesteps: Vec<u32>,
    gens: Vec<GenVar>,
    internal: Vec<LineVar>,
    boundary: Vec<LineVar>,
    /// Coupling keys in variable order (boundary line major, timestep minor).
    coupling_keys: Vec<CouplingKey>,
    key_index: HashMap<CouplingKey, usize>,
    /// Consensus flow per coupling slot.
    z: Vec<f64>,
    /// Dual price per coupling slot.
    lam: Vec<f64>,
    rho: f64,
    /// Objective quadratic diagonal (the P matrix), kept across solves and
    /// adjusted in place on penalty updates.
    quad_diag: Vec<f64>,
    /// Demand per (site, timestep) in balance-row order.
    demand: Vec<f64>,
    last_x: Option<Vec<f64>>,
}

impl DispatchSubproblem {
    /// Build the model for the region made of `sites`, with initial penalty
    /// weight `rho_init` on every coupling variable.
    ///
    /// Lines with exactly one endpoint in `sites` become boundary lines and
    /// contribute one coupling variable per timestep; lines fully inside the
    /// region stay internal; lines touching no local site are dropped.
    pub fn new(data: &MultiRegionData, sites: &[String], rho_init: f64) -> Self {
        let site_set: HashSet<&str> = sites.iter().map(|s| s.as_str()).collect();
        let site_idx: HashMap<&str, usize> = sites
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();

        let gens: Vec<GenVar> = data
            .generators_in(&site_set)
            .map(|g| GenVar {
                site_idx: site_idx[g.site.as_str()],
                p_max: g.p_max,
                c1: g.cost_linear,
                c2: g.cost_quadratic,
            })
            .collect();

        let mut internal = Vec::new();
        let mut boundary = Vec::new();
        for line in &data.lines {
            let in_idx = site_idx.get(line.site_in.as_str()).copied();
            let out_idx = site_idx.get(line.site_out.as_str()).copied();
            let var = LineVar {
                line: line.clone(),
                in_idx,
                out_idx,
            };
            match (in_idx, out_idx) {
                (Some(_), Some(_)) => internal.push(var),
                (Some(_), None) | (None, Some(_)) => boundary.push(var),
                (None, None) => {}
            }
        }

        let n_t = data.timesteps.len();
        let mut coupling_keys = Vec::with_capacity(boundary.len() * n_t);
        for lv in &boundary {
            for &t in &data.timesteps {
                coupling_keys.push(CouplingKey::new(
                    t,
                    lv.line.stf,
                    lv.line.site_in.clone(),
                    lv.line.site_out.clone(),
                ));
            }
        }
        let key_index: HashMap<CouplingKey, usize> = coupling_keys
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, k)| (k, i))
            .collect();

        let n_coupling = coupling_keys.len();
        let n_var = (gens.len() + internal.len()) * n_t + n_coupling;
        let mut quad_diag = vec![0.0; n_var];
        for (g_idx, gen) in gens.iter().enumerate() {
            for t in 0..n_t {
                quad_diag[g_idx * n_t + t] = 2.0 * gen.c2;
            }
        }
        let coupling_offset = (gens.len() + internal.len()) * n_t;
        for slot in 0..n_coupling {
            quad_diag[coupling_offset + slot] = rho_init;
        }

        let mut demand = vec![0.0; sites.len() * n_t];
        for (s_idx, site) in sites.iter().enumerate() {
            for t in 0..n_t {
                demand[s_idx * n_t + t] = data.demand_at(site, t);
            }
        }

        Self {
            sites: sites.to_vec(),
            timesteps: data.timesteps.clone(),
            gens,
            internal,
            boundary,
            coupling_keys,
            key_index,
            z: vec![0.0; n_coupling],
            lam: vec![0.0; n_coupling],
            rho: rho_init,
            quad_diag,
            demand,
            last_x: None,
        }
    }

    fn n_t(&self) -> usize {
        self.timesteps.len()
    }

    fn n_var(&self) -> usize {
        self.quad_diag.len()
    }

    fn coupling_offset(&self) -> usize {
        (self.gens.len() + self.internal.len()) * self.n_t()
    }

    /// Balance-row index for a local site at timestep position `t`.
    fn balance_row(&self, site_idx: usize, t: usize) -> usize {
        site_idx * self.n_t() + t
    }

    /// Lower/upper bound of a variable by its column index.
    fn bounds(&self, var: usize) -> (f64, f64) {
        let n_t = self.n_t();
        let n_gen_vars = self.gens.len() * n_t;
        if var < n_gen_vars {
            (0.0, self.gens[var / n_t].p_max)
        } else if var < self.coupling_offset() {
            let cap = self.internal[(var - n_gen_vars) / n_t].line.capacity;
            (-cap, cap)
        } else {
            let cap = self.boundary[(var - self.coupling_offset()) / n_t]
                .line
                .capacity;
            (-cap, cap)
        }
    }

    /// Balance coefficients (row, value) contributed by a line variable.
    fn line_balance_entries(&self, lv: &LineVar, t: usize) -> Vec<(usize, f64)> {
        let mut entries = Vec::with_capacity(2);
        if let Some(s) = lv.in_idx {
            entries.push((self.balance_row(s, t), -1.0));
        }
        if let Some(s) = lv.out_idx {
            entries.push((self.balance_row(s, t), lv.line.efficiency));
        }
        entries
    }

    /// Assemble the linear cost vector from the current z/λ/ρ state.
    fn linear_cost(&self) -> Vec<f64> {
        let n_t = self.n_t();
        let mut q = vec![0.0; self.n_var()];
        for (g_idx, gen) in self.gens.iter().enumerate() {
            for t in 0..n_t {
                q[g_idx * n_t + t] = gen.c1;
            }
        }
        let offset = self.coupling_offset();
        for slot in 0..self.coupling_keys.len() {
            // λ·(f − z) + (ρ/2)(f − z)² expands to a linear term (λ − ρz)·f
            // plus the ρ/2·f² already on the quadratic diagonal.
            q[offset + slot] = self.lam[slot] - self.rho * self.z[slot];
        }
        q
    }
}

impl Subproblem for DispatchSubproblem {
    fn coupling_keys(&self) -> &[CouplingKey] {
        &self.coupling_keys
    }

    fn fix_coupling(
        &mut self,
        flow_global: &HashMap<CouplingKey, f64>,
        lambda: &HashMap<CouplingKey, f64>,
    ) -> Result<(), SubproblemError> {
        for (key, &value) in flow_global {
            let slot = *self
                .key_index
                .get(key)
                .ok_or_else(|| SubproblemError::MissingVariable { key: key.clone() })?;
            self.z[slot] = value;
        }
        for (key, &value) in lambda {
            let slot = *self
                .key_index
                .get(key)
                .ok_or_else(|| SubproblemError::MissingVariable { key: key.clone() })?;
            self.lam[slot] = value;
        }
        Ok(())
    }

    fn apply_penalty_update(&mut self, rho_old: f64, rho_new: f64) {
        // Incremental rewrite: only the coupling entries of the quadratic
        // diagonal change, everything else in the objective is untouched.
        let delta = rho_new - rho_old;
        let offset = self.coupling_offset();
        for slot in 0..self.coupling_keys.len() {
            self.quad_diag[offset + slot] += delta;
        }
        self.rho = rho_new;
    }

    fn solve(&mut self) -> Result<SolveResult, SubproblemError> {
        let n_var = self.n_var();
        let n_t = self.n_t();
        let n_eq = self.sites.len() * n_t;

        if n_var == 0 {
            // Degenerate region: nothing to dispatch. Feasible only if it has
            // no demand either.
            let total_demand: f64 = self.demand.iter().sum();
            if total_demand.abs() < 1e-9 {
                self.last_x = Some(Vec::new());
                return Ok(SolveResult {
                    objective: 0.0,
                    solver_iterations: 0,
                });
            }
            return Err(SubproblemError::Infeasible {
                status: "demand without any supply variable".into(),
            });
        }

        // Rows 0..n_eq are balance equalities (zero cone); each variable then
        // gets an upper- and a lower-bound row in the nonnegative cone:
        //   x ≤ ub   →   x + s = ub
        //  −x ≤ −lb  →  −x + s = −lb
        let mut cols: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n_var];
        let mut rhs = vec![0.0; n_eq + 2 * n_var];
        rhs[..n_eq].copy_from_slice(&self.demand);

        let n_gen_vars = self.gens.len() * n_t;
        for (g_idx, gen) in self.gens.iter().enumerate() {
            for t in 0..n_t {
                let var = g_idx * n_t + t;
                cols[var].push((self.balance_row(gen.site_idx, t), 1.0));
            }
        }
        for (l_idx, lv) in self.internal.iter().enumerate() {
            for t in 0..n_t {
                let var = n_gen_vars + l_idx * n_t + t;
                cols[var].extend(self.line_balance_entries(lv, t));
            }
        }
        let coupling_offset = self.coupling_offset();
        for (l_idx, lv) in self.boundary.iter().enumerate() {
            for t in 0..n_t {
                let var = coupling_offset + l_idx * n_t + t;
                cols[var].extend(self.line_balance_entries(lv, t));
            }
        }

        for var in 0..n_var {
            let (lb, ub) = self.bounds(var);
            let ub_row = n_eq + 2 * var;
            cols[var].push((ub_row, 1.0));
            cols[var].push((ub_row + 1, -1.0));
            rhs[ub_row] = ub;
            rhs[ub_row + 1] = -lb;
        }

        // Convert to CSC (columns sorted by row index).
        let mut col_ptr = Vec::with_capacity(n_var + 1);
        let mut row_idx = Vec::new();
        let mut values = Vec::new();
        let mut nnz = 0;
        for col in cols.iter_mut() {
            col_ptr.push(nnz);
            col.sort_by_key(|(r, _)| *r);
            for &(r, v) in col.iter() {
                row_idx.push(r);
                values.push(v);
                nnz += 1;
            }
        }
        col_ptr.push(nnz);
        let a_mat = CscMatrix::new(n_eq + 2 * n_var, n_var, col_ptr, row_idx, values);

        // Diagonal P in CSC form (upper triangular by construction).
        let p_col_ptr: Vec<usize> = (0..=n_var).collect();
        let p_row_idx: Vec<usize> = (0..n_var).collect();
        let p_mat = CscMatrix::new(n_var, n_var, p_col_ptr, p_row_idx, self.quad_diag.clone());

        let q = self.linear_cost();
        let cones = [
            SupportedConeT::ZeroConeT(n_eq),
            SupportedConeT::NonnegativeConeT(2 * n_var),
        ];

        let settings = DefaultSettingsBuilder::default()
            .verbose(false)
            .build()
            .map_err(|e| SubproblemError::Numerical(format!("Clarabel settings error: {:?}", e)))?;

        let mut solver =
            clarabel::solver::DefaultSolver::new(&p_mat, &q, &a_mat, &rhs, &cones, settings)
                .map_err(|e| {
                    SubproblemError::Numerical(format!("Clarabel initialization failed: {:?}", e))
                })?;
        solver.solve();

        let sol = solver.solution;
        use clarabel::solver::SolverStatus::*;
        match sol.status {
            Solved | AlmostSolved => {}
            PrimalInfeasible | AlmostPrimalInfeasible | DualInfeasible
            | AlmostDualInfeasible => {
                return Err(SubproblemError::Infeasible {
                    status: format!("{:?}", sol.status),
                });
            }
            other => {
                return Err(SubproblemError::Numerical(format!(
                    "Clarabel returned status {:?}",
                    other
                )));
            }
        }

        // Local objective contribution is the true dispatch cost; penalty and
        // dual terms are coordination artifacts and excluded.
        let mut objective = 0.0;
        for (g_idx, gen) in self.gens.iter().enumerate() {
            for t in 0..n_t {
                let p = sol.x[g_idx * n_t + t];
                objective += gen.c1 * p + gen.c2 * p * p;
            }
        }

        debug!(
            sites = self.sites.len(),
            vars = n_var,
            iterations = sol.iterations,
            objective,
            "subproblem solved"
        );

        self.last_x = Some(sol.x.clone());
        Ok(SolveResult {
            objective,
            solver_iterations: sol.iterations as usize,
        })
    }

    fn extract_boundary_flows(
        &self,
        keys: &[CouplingKey],
    ) -> Result<HashMap<CouplingKey, f64>, SubproblemError> {
        let x = self.last_x.as_ref().ok_or(SubproblemError::NotSolved)?;
        let offset = self.coupling_offset();
        let mut flows = HashMap::with_capacity(keys.len());
        for key in keys {
            let slot = *self
                .key_index
                .get(key)
                .ok_or_else(|| SubproblemError::MissingVariable { key: key.clone() })?;
            flows.insert(key.clone(), x[offset + slot]);
        }
        Ok(flows)
    }
}

/// Solve the monolithic problem over all sites at once.
///
/// Used by the result aggregator as the diagnostic reference for the
/// decomposed objective; every line is internal here, so no coupling
/// variables or penalty terms exist.
pub fn solve_centralized(data: &MultiRegionData) -> Result<f64, SubproblemError> {
    let mut model = DispatchSubproblem::new(data, &data.sites, 0.0);
    let result = model.solve()?;
    Ok(result.objective)
}
