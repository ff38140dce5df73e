//! The constraint system and its progressive-filling solver.

use std::collections::BTreeSet;

use log::trace;

use crate::precision::Precision;

/// Bound value meaning "no upper bound" (any value `<= 0` is treated the same way).
pub const UNBOUNDED: f64 = -1.0;

/// Stable handle of a variable inside a [System].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableId(pub usize);

/// Stable handle of a constraint inside a [System].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstraintId(pub usize);

struct Variable {
    weight: f64,
    bound: f64,
    value: f64,
    rank: u64,
    elements: Vec<(ConstraintId, f64)>,
}

struct Constraint {
    capacity: f64,
    shared: bool,
    rank: u64,
    elements: Vec<(VariableId, f64)>,
}

/// A system of linear capacity constraints solved by max-min fair progressive filling.
///
/// Variables and constraints live in slot arenas so their ids stay valid across removals.
/// Each variable and constraint carries an insertion rank; every iteration and every
/// tie-break is ordered by rank, which makes the solver deterministic regardless of the
/// order mutations happened in.
pub struct System {
    variables: Vec<Option<Variable>>,
    constraints: Vec<Option<Constraint>>,
    free_variables: Vec<usize>,
    free_constraints: Vec<usize>,
    next_rank: u64,
    selective_update: bool,
    all_dirty: bool,
    dirty_constraints: BTreeSet<usize>,
    dirty_variables: BTreeSet<usize>,
    precision: Precision,
}

impl System {
    pub fn new(selective_update: bool) -> Self {
        System {
            variables: Vec::new(),
            constraints: Vec::new(),
            free_variables: Vec::new(),
            free_constraints: Vec::new(),
            next_rank: 0,
            selective_update,
            all_dirty: true,
            dirty_constraints: BTreeSet::new(),
            dirty_variables: BTreeSet::new(),
            precision: Precision::default(),
        }
    }

    pub fn set_precision(&mut self, precision: Precision) {
        self.precision = precision;
        self.all_dirty = true;
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    fn take_rank(&mut self) -> u64 {
        self.next_rank += 1;
        self.next_rank
    }

    /// Registers a new constraint of the given capacity.
    ///
    /// Non-shared constraints (fatpipes) grant every variable its full demand: their
    /// usage is the maximum over users instead of the sum.
    pub fn constraint_new(&mut self, capacity: f64, shared: bool) -> ConstraintId {
        let rank = self.take_rank();
        let constraint = Constraint {
            capacity,
            shared,
            rank,
            elements: Vec::new(),
        };
        let idx = match self.free_constraints.pop() {
            Some(idx) => {
                self.constraints[idx] = Some(constraint);
                idx
            }
            None => {
                self.constraints.push(Some(constraint));
                self.constraints.len() - 1
            }
        };
        self.dirty_constraints.insert(idx);
        ConstraintId(idx)
    }

    /// Registers a new variable. `bound <= 0` means unbounded. Weight 0 means suspended:
    /// the variable gets no share and is ignored when looking for bottlenecks.
    pub fn variable_new(&mut self, weight: f64, bound: f64) -> VariableId {
        let rank = self.take_rank();
        let variable = Variable {
            weight,
            bound,
            value: 0.0,
            rank,
            elements: Vec::new(),
        };
        let idx = match self.free_variables.pop() {
            Some(idx) => {
                self.variables[idx] = Some(variable);
                idx
            }
            None => {
                self.variables.push(Some(variable));
                self.variables.len() - 1
            }
        };
        self.dirty_variables.insert(idx);
        VariableId(idx)
    }

    fn variable(&self, id: VariableId) -> &Variable {
        self.variables[id.0].as_ref().expect("variable was removed")
    }

    fn variable_mut(&mut self, id: VariableId) -> &mut Variable {
        self.variables[id.0].as_mut().expect("variable was removed")
    }

    fn constraint(&self, id: ConstraintId) -> &Constraint {
        self.constraints[id.0].as_ref().expect("constraint was removed")
    }

    fn constraint_mut(&mut self, id: ConstraintId) -> &mut Constraint {
        self.constraints[id.0].as_mut().expect("constraint was removed")
    }

    /// Attaches `variable` to `constraint` with the given coefficient. If the pair is
    /// already attached the coefficients are summed, so a route crossing the same link
    /// twice consumes its capacity twice.
    pub fn expand(&mut self, constraint: ConstraintId, variable: VariableId, coeff: f64) {
        let existing = self
            .variable(variable)
            .elements
            .iter()
            .position(|&(c, _)| c == constraint);
        match existing {
            Some(pos) => {
                self.variable_mut(variable).elements[pos].1 += coeff;
                let var_pos = self
                    .constraint(constraint)
                    .elements
                    .iter()
                    .position(|&(v, _)| v == variable)
                    .expect("element lists out of sync");
                self.constraint_mut(constraint).elements[var_pos].1 += coeff;
            }
            None => {
                self.variable_mut(variable).elements.push((constraint, coeff));
                self.constraint_mut(constraint).elements.push((variable, coeff));
            }
        }
        self.mark_dirty_constraint(constraint);
    }

    /// Detaches a variable from every constraint and frees its slot.
    pub fn remove_variable(&mut self, id: VariableId) {
        let variable = self.variables[id.0].take().expect("variable was removed twice");
        for (constraint, _) in variable.elements.iter() {
            if let Some(c) = self.constraints[constraint.0].as_mut() {
                c.elements.retain(|&(v, _)| v != id);
            }
            self.mark_dirty_constraint(*constraint);
        }
        self.dirty_variables.remove(&id.0);
        self.free_variables.push(id.0);
    }

    /// Removes a constraint; variables attached to it lose the corresponding element.
    pub fn remove_constraint(&mut self, id: ConstraintId) {
        let constraint = self.constraints[id.0].take().expect("constraint was removed twice");
        for (variable, _) in constraint.elements.iter() {
            if let Some(v) = self.variables[variable.0].as_mut() {
                v.elements.retain(|&(c, _)| c != id);
            }
            self.dirty_variables.insert(variable.0);
        }
        self.dirty_constraints.remove(&id.0);
        self.free_constraints.push(id.0);
    }

    pub fn update_variable_weight(&mut self, id: VariableId, weight: f64) {
        self.variable_mut(id).weight = weight;
        self.mark_dirty_variable(id);
    }

    pub fn update_variable_bound(&mut self, id: VariableId, bound: f64) {
        self.variable_mut(id).bound = bound;
        self.mark_dirty_variable(id);
    }

    pub fn update_constraint_capacity(&mut self, id: ConstraintId, capacity: f64) {
        self.constraint_mut(id).capacity = capacity;
        self.mark_dirty_constraint(id);
    }

    pub fn variable_weight(&self, id: VariableId) -> f64 {
        self.variable(id).weight
    }

    /// The rate allocated by the last [System::solve] call.
    pub fn variable_value(&self, id: VariableId) -> f64 {
        self.variable(id).value
    }

    pub fn constraint_capacity(&self, id: ConstraintId) -> f64 {
        self.constraint(id).capacity
    }

    /// Sum of allocated rates weighted by coefficients, for feasibility checks.
    pub fn constraint_usage(&self, id: ConstraintId) -> f64 {
        let constraint = self.constraint(id);
        if constraint.shared {
            constraint
                .elements
                .iter()
                .map(|&(v, coeff)| self.variable(v).value * coeff)
                .sum()
        } else {
            constraint
                .elements
                .iter()
                .map(|&(v, coeff)| self.variable(v).value * coeff)
                .fold(0.0, f64::max)
        }
    }

    fn mark_dirty_constraint(&mut self, id: ConstraintId) {
        if self.constraints[id.0].is_some() {
            self.dirty_constraints.insert(id.0);
        }
    }

    fn mark_dirty_variable(&mut self, id: VariableId) {
        if self.variables[id.0].is_some() {
            self.dirty_variables.insert(id.0);
        }
    }

    /// Whether something changed since the last solve.
    pub fn is_dirty(&self) -> bool {
        self.all_dirty || !self.dirty_constraints.is_empty() || !self.dirty_variables.is_empty()
    }

    /// Recomputes allocations. With selective update enabled only the connected
    /// components touched since the last solve are recomputed; results are identical to
    /// a full recomputation because components are independent.
    pub fn solve(&mut self) {
        if !self.is_dirty() {
            return;
        }
        let scope_vars = if self.selective_update && !self.all_dirty {
            self.dirty_component_variables()
        } else {
            (0..self.variables.len())
                .filter(|&idx| self.variables[idx].is_some())
                .collect()
        };
        self.solve_scope(&scope_vars);
        self.all_dirty = false;
        self.dirty_constraints.clear();
        self.dirty_variables.clear();
    }

    /// Collects the variables of every connected component containing a dirty node,
    /// walking the bipartite variable-constraint graph.
    fn dirty_component_variables(&self) -> Vec<usize> {
        let mut seen_vars: BTreeSet<usize> = BTreeSet::new();
        let mut seen_cons: BTreeSet<usize> = BTreeSet::new();
        let mut var_queue: Vec<usize> = Vec::new();
        let mut con_queue: Vec<usize> = Vec::new();

        for &idx in self.dirty_variables.iter() {
            if self.variables[idx].is_some() && seen_vars.insert(idx) {
                var_queue.push(idx);
            }
        }
        for &idx in self.dirty_constraints.iter() {
            if self.constraints[idx].is_some() && seen_cons.insert(idx) {
                con_queue.push(idx);
            }
        }
        while !var_queue.is_empty() || !con_queue.is_empty() {
            if let Some(idx) = var_queue.pop() {
                let variable = self.variables[idx].as_ref().unwrap();
                for &(constraint, _) in variable.elements.iter() {
                    if self.constraints[constraint.0].is_some() && seen_cons.insert(constraint.0) {
                        con_queue.push(constraint.0);
                    }
                }
            }
            if let Some(idx) = con_queue.pop() {
                let constraint = self.constraints[idx].as_ref().unwrap();
                for &(variable, _) in constraint.elements.iter() {
                    if self.variables[variable.0].is_some() && seen_vars.insert(variable.0) {
                        var_queue.push(variable.0);
                    }
                }
            }
        }
        seen_vars.into_iter().collect()
    }

    fn solve_scope(&mut self, scope_vars: &[usize]) {
        let eps = self.precision;

        // Active variables sorted by rank; suspended ones are pinned to zero right away.
        let mut active: Vec<usize> = Vec::new();
        let mut scope_cons: BTreeSet<usize> = BTreeSet::new();
        for &idx in scope_vars.iter() {
            let variable = self.variables[idx].as_ref().unwrap();
            for &(constraint, _) in variable.elements.iter() {
                scope_cons.insert(constraint.0);
            }
            if variable.weight > 0.0 {
                active.push(idx);
            } else {
                self.variables[idx].as_mut().unwrap().value = 0.0;
            }
        }
        active.sort_by_key(|&idx| self.variables[idx].as_ref().unwrap().rank);
        let mut constraints: Vec<usize> = scope_cons.into_iter().collect();
        constraints.sort_by_key(|&idx| self.constraints[idx].as_ref().unwrap().rank);

        let mut unsat: BTreeSet<usize> = active.iter().copied().collect();
        let mut residual: Vec<f64> = constraints
            .iter()
            .map(|&idx| self.constraints[idx].as_ref().unwrap().capacity)
            .collect();
        let mut saturated: Vec<bool> = vec![false; constraints.len()];

        #[derive(Clone, Copy)]
        enum Candidate {
            Constraint(usize),
            Bound(usize),
        }

        while !unsat.is_empty() {
            // Bottleneck candidates: constraints first, variable bounds second. Within a
            // kind the earliest inserted wins on an epsilon-tie.
            let mut best: Option<(f64, Candidate)> = None;

            for (pos, &cons_idx) in constraints.iter().enumerate() {
                if saturated[pos] {
                    continue;
                }
                let constraint = self.constraints[cons_idx].as_ref().unwrap();
                let mut usage = 0.0;
                let mut in_use = false;
                for &(variable, coeff) in constraint.elements.iter() {
                    if !unsat.contains(&variable.0) {
                        continue;
                    }
                    let weight = self.variables[variable.0].as_ref().unwrap().weight;
                    if constraint.shared {
                        usage += weight * coeff;
                    } else {
                        usage = f64::max(usage, weight * coeff);
                    }
                    in_use = true;
                }
                if !in_use || usage <= 0.0 {
                    continue;
                }
                let rate = f64::max(residual[pos], 0.0) / usage;
                if best.map_or(true, |(r, _)| eps.strictly_less(rate, r)) {
                    best = Some((rate, Candidate::Constraint(pos)));
                }
            }
            for &var_idx in active.iter() {
                if !unsat.contains(&var_idx) {
                    continue;
                }
                let variable = self.variables[var_idx].as_ref().unwrap();
                if variable.bound <= 0.0 {
                    continue;
                }
                let rate = variable.bound / variable.weight;
                if best.map_or(true, |(r, _)| eps.strictly_less(rate, r)) {
                    best = Some((rate, Candidate::Bound(var_idx)));
                }
            }

            match best {
                None => {
                    // Leftover variables touch no live constraint and carry no bound;
                    // nothing limits them, so they cannot back a real action.
                    for &var_idx in unsat.iter() {
                        self.variables[var_idx].as_mut().unwrap().value = 0.0;
                    }
                    break;
                }
                Some((_, Candidate::Bound(var_idx))) => {
                    let value = self.variables[var_idx].as_ref().unwrap().bound;
                    self.settle_variable(var_idx, value, &constraints, &mut residual);
                    unsat.remove(&var_idx);
                    trace!("maxmin: variable {} saturated by its bound at {}", var_idx, value);
                }
                Some((rate, Candidate::Constraint(pos))) => {
                    let cons_idx = constraints[pos];
                    let members: Vec<(usize, f64)> = self.constraints[cons_idx]
                        .as_ref()
                        .unwrap()
                        .elements
                        .iter()
                        .filter(|(v, _)| unsat.contains(&v.0))
                        .map(|&(v, _)| (v.0, self.variables[v.0].as_ref().unwrap().weight))
                        .collect();
                    for (var_idx, weight) in members {
                        let bound = self.variables[var_idx].as_ref().unwrap().bound;
                        let mut value = weight * rate;
                        if bound > 0.0 {
                            value = f64::min(value, bound);
                        }
                        self.settle_variable(var_idx, value, &constraints, &mut residual);
                        unsat.remove(&var_idx);
                    }
                    saturated[pos] = true;
                    trace!("maxmin: constraint {} saturated at rate {}", cons_idx, rate);
                }
            }
        }
    }

    /// Freezes a variable at `value` and charges it against every shared constraint it
    /// touches. Fatpipe capacity is not consumed: each user sees the full pipe.
    fn settle_variable(&mut self, var_idx: usize, value: f64, constraints: &[usize], residual: &mut [f64]) {
        self.variables[var_idx].as_mut().unwrap().value = value;
        let elements = self.variables[var_idx].as_ref().unwrap().elements.clone();
        for (constraint, coeff) in elements {
            if !self.constraints[constraint.0].as_ref().unwrap().shared {
                continue;
            }
            if let Some(pos) = constraints.iter().position(|&c| c == constraint.0) {
                residual[pos] = f64::max(residual[pos] - value * coeff, 0.0);
            }
        }
    }
}
