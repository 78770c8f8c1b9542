use std::collections::{BTreeSet, HashMap, HashSet};

use orc_expr::scan_task_references;
use orc_model::{RetryPolicy, Workflow};

use crate::error::{PlanError, Result};

/// A task annotated with its effective timeout and retry policy, inherited
/// from workflow defaults when the task declares none (spec §4.4 step 5).
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub name: String,
    pub effective_timeout_ms: u64,
    pub retry: RetryPolicy,
}

/// The output of the planner (spec §4.4): topological levels plus the
/// predecessor/successor edge maps the runtime uses to recompute `Ready`
/// as tasks complete.
#[derive(Debug, Clone)]
pub struct Plan {
    pub levels: Vec<Vec<String>>,
    pub predecessors: HashMap<String, BTreeSet<String>>,
    pub successors: HashMap<String, BTreeSet<String>>,
    pub entries: HashMap<String, PlanEntry>,
}

static EMPTY_SET: once_cell::sync::Lazy<BTreeSet<String>> =
    once_cell::sync::Lazy::new(BTreeSet::new);

impl Plan {
    pub fn entry(&self, name: &str) -> Option<&PlanEntry> {
        self.entries.get(name)
    }

    pub fn predecessors_of(&self, name: &str) -> &BTreeSet<String> {
        self.predecessors.get(name).unwrap_or(&EMPTY_SET)
    }
}

/// Builds a `Plan` from a validated `Workflow` (spec §4.4, full algorithm).
pub fn build_plan(workflow: &Workflow) -> Result<Plan> {
    validate_names(workflow)?;

    let declared_order: Vec<&str> = workflow.tasks.iter().map(|t| t.name.as_str()).collect();
    let known: HashSet<&str> = declared_order.iter().copied().collect();

    let mut predecessors: HashMap<String, BTreeSet<String>> = HashMap::new();
    for task in &workflow.tasks {
        let mut deps: BTreeSet<String> = task.depends_on.iter().cloned().collect();
        for implicit in scan_task_references(&task.parameters) {
            deps.insert(implicit);
        }
        for dep in &deps {
            if !known.contains(dep.as_str()) {
                return Err(PlanError::UnknownDependency(task.name.clone(), dep.clone()));
            }
        }
        predecessors.insert(task.name.clone(), deps);
    }

    detect_cycle(&declared_order, &predecessors)?;

    let mut successors: HashMap<String, BTreeSet<String>> =
        declared_order.iter().map(|n| (n.to_string(), BTreeSet::new())).collect();
    for (name, deps) in &predecessors {
        for dep in deps {
            successors.get_mut(dep).unwrap().insert(name.clone());
        }
    }

    let levels = topological_levels(&declared_order, &predecessors)?;

    let entries = workflow
        .tasks
        .iter()
        .map(|task| {
            let entry = PlanEntry {
                name: task.name.clone(),
                effective_timeout_ms: workflow.effective_timeout_ms(task),
                retry: task.retry.clone().unwrap_or_else(RetryPolicy::no_retry),
            };
            (task.name.clone(), entry)
        })
        .collect();

    Ok(Plan {
        levels,
        predecessors,
        successors,
        entries,
    })
}

fn validate_names(workflow: &Workflow) -> Result<()> {
    let mut seen = HashSet::new();
    for task in &workflow.tasks {
        if task.name.trim().is_empty() {
            return Err(PlanError::EmptyTaskName);
        }
        if !seen.insert(task.name.as_str()) {
            return Err(PlanError::DuplicateTaskName(task.name.clone()));
        }
    }
    Ok(())
}

/// DFS cycle detection with a recursion stack, reporting the cycle path in
/// declaration order for a readable error (spec §4.4 step 2).
fn detect_cycle(
    declared_order: &[&str],
    predecessors: &HashMap<String, BTreeSet<String>>,
) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack: Vec<&str> = Vec::new();

    fn visit<'a>(
        node: &'a str,
        predecessors: &'a HashMap<String, BTreeSet<String>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Result<()> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| *n == node).unwrap_or(0);
                let mut path: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                path.push(node.to_string());
                return Err(PlanError::Cycle(path));
            }
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        stack.push(node);
        if let Some(deps) = predecessors.get(node) {
            for dep in deps {
                visit(dep.as_str(), predecessors, marks, stack)?;
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
        Ok(())
    }

    for node in declared_order {
        visit(node, predecessors, &mut marks, &mut stack)?;
    }
    Ok(())
}

/// Kahn's algorithm; ties within a level broken by declaration order so
/// planning is deterministic across runs (spec §4.4 step 4).
fn topological_levels(
    declared_order: &[&str],
    predecessors: &HashMap<String, BTreeSet<String>>,
) -> Result<Vec<Vec<String>>> {
    let mut remaining: HashMap<&str, usize> = declared_order
        .iter()
        .map(|n| (*n, predecessors.get(*n).map(|d| d.len()).unwrap_or(0)))
        .collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut levels: Vec<Vec<String>> = Vec::new();

    while placed.len() < declared_order.len() {
        let mut current_level: Vec<&str> = declared_order
            .iter()
            .copied()
            .filter(|n| !placed.contains(n) && remaining[n] == 0)
            .collect();

        if current_level.is_empty() {
            // Every remaining task still waits on something: the only way
            // that happens after cycle detection already passed is a bug
            // in this function, not a user-facing error, but we surface it
            // the same way for safety.
            let stuck: Vec<String> = declared_order
                .iter()
                .filter(|n| !placed.contains(*n))
                .map(|n| n.to_string())
                .collect();
            return Err(PlanError::Cycle(stuck));
        }

        current_level.sort_by_key(|n| declared_order.iter().position(|d| d == n).unwrap());

        for node in &current_level {
            placed.insert(node);
        }
        for node in &current_level {
            for (name, deps) in predecessors {
                if deps.contains(*node) {
                    if let Some(count) = remaining.get_mut(name.as_str()) {
                        *count = count.saturating_sub(1);
                    }
                }
            }
        }

        levels.push(current_level.into_iter().map(|s| s.to_string()).collect());
    }

    Ok(levels)
}
