//! Action Sequencer
//!
//! Places custom actions into the installer engine's execute sequence.
//!
//! # Algorithm
//!
//! 1. Nodes are the lifecycle phases (chained in their fixed order) followed
//!    by the declared custom actions
//! 2. Each rule adds one edge: `S after A` is `A -> S`, `S before A` is `S -> A`
//! 3. Kahn's algorithm emits a total order. Among ready nodes the one with the
//!    lowest rank wins, where a phase ranks at its sequence number and an
//!    action ranks one past (or one short of) its first anchor, so each action
//!    lands next to the anchor it names
//! 4. Leftover nodes mean a cycle, reported as [`CompileError::OrderingContradiction`]
//! 5. Actions are numbered into the gap after the step that precedes them
//!
//! In-script actions (deferred, commit, rollback) must end up strictly between
//! `InstallInitialize` and `InstallFinalize`.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::str::FromStr;
use strum::IntoEnumIterator;
use tracing::debug;

use crate::engine::condition::{check_guard, GuardScope};
use crate::error::CompileError;
use crate::manifest::{CustomActionDecl, SequenceRuleDecl};
use crate::types::{ExecuteMode, LifecyclePhase, ReturnPolicy};

// ============================================================================
// Output Types
// ============================================================================

/// A validated custom action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAction {
    pub id: String,
    pub file_key: String,
    pub execute: ExecuteMode,
    pub impersonate: bool,
    #[serde(rename = "return")]
    pub return_policy: ReturnPolicy,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Phase,
    Action,
}

/// One entry of the execute sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledStep {
    pub name: String,
    pub kind: StepKind,
    pub sequence: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Actions and the full execute sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub actions: Vec<ResolvedAction>,
    pub steps: Vec<ScheduledStep>,
}

// ============================================================================
// Action Validation
// ============================================================================

/// Validate custom action declarations.
///
/// # Errors
///
/// - [`CompileError::DuplicateActionId`] for a repeated id or a phase name
/// - [`CompileError::UnresolvedFileKey`] when the file key names no file
/// - [`CompileError::MissingReturnPolicy`] for an in-script action without one
pub fn validate_actions(
    actions: &[CustomActionDecl],
    file_keys: &BTreeSet<String>,
) -> Result<Vec<ResolvedAction>, CompileError> {
    let mut seen = BTreeSet::new();
    let mut resolved = Vec::with_capacity(actions.len());

    for action in actions {
        if LifecyclePhase::from_str(&action.id).is_ok() || !seen.insert(action.id.as_str()) {
            return Err(CompileError::DuplicateActionId {
                id: action.id.clone(),
            });
        }
        if !file_keys.contains(&action.file_key) {
            return Err(CompileError::UnresolvedFileKey {
                owner: action.id.clone(),
                file_key: action.file_key.clone(),
            });
        }

        let return_policy = match (action.return_policy, action.execute.is_in_script()) {
            (Some(policy), _) => policy,
            (None, false) => ReturnPolicy::Check,
            (None, true) => {
                return Err(CompileError::MissingReturnPolicy {
                    action: action.id.clone(),
                });
            }
        };

        resolved.push(ResolvedAction {
            id: action.id.clone(),
            file_key: action.file_key.clone(),
            execute: action.execute,
            impersonate: action.impersonate,
            return_policy,
            arguments: action.arguments.clone(),
        });
    }

    Ok(resolved)
}

// ============================================================================
// Constraint Graph
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Before,
    After,
}

/// Phases first (index = phase order), then actions in declaration order
struct ConstraintGraph {
    names: Vec<String>,
    phase_count: usize,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    /// First rule of each node: (anchor, direction)
    first_anchor: Vec<Option<(usize, Direction)>>,
}

impl ConstraintGraph {
    fn new(actions: &[ResolvedAction]) -> Self {
        let mut names: Vec<String> = LifecyclePhase::iter().map(|p| p.to_string()).collect();
        let phase_count = names.len();
        names.extend(actions.iter().map(|a| a.id.clone()));

        let n = names.len();
        let mut graph = Self {
            names,
            phase_count,
            successors: vec![Vec::new(); n],
            predecessors: vec![Vec::new(); n],
            first_anchor: vec![None; n],
        };
        for i in 1..phase_count {
            graph.add_edge(i - 1, i);
        }
        graph
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    fn is_phase(&self, node: usize) -> bool {
        node < self.phase_count
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        if !self.successors[from].contains(&to) {
            self.successors[from].push(to);
            self.predecessors[to].push(from);
        }
    }

    /// Whether a path of edges leads from `from` to `to`
    fn reaches(&self, from: usize, to: usize) -> bool {
        let mut seen = vec![false; self.names.len()];
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !std::mem::replace(&mut seen[node], true) {
                stack.extend(self.successors[node].iter().copied());
            }
        }
        false
    }

    /// Pin every in-script action between InstallInitialize and
    /// InstallFinalize so ordering can never place it outside the script.
    ///
    /// Expects a graph without cycles.
    fn pin_script_window(&mut self, actions: &[ResolvedAction]) -> Result<(), CompileError> {
        let phase_node = |phase: LifecyclePhase| {
            LifecyclePhase::iter()
                .position(|p| p == phase)
                .unwrap_or_default()
        };
        let start = phase_node(LifecyclePhase::InstallInitialize);
        let end = phase_node(LifecyclePhase::InstallFinalize);

        for (i, action) in actions.iter().enumerate() {
            if !action.execute.is_in_script() {
                continue;
            }
            let node = self.phase_count + i;
            if self.reaches(end, node) || self.reaches(node, start) {
                return Err(CompileError::DeferredOutsideScript {
                    action: action.id.clone(),
                });
            }
            self.add_edge(start, node);
            self.add_edge(node, end);
        }
        Ok(())
    }

    fn phase_rank(node: usize) -> i64 {
        LifecyclePhase::iter()
            .nth(node)
            .map(|p| i64::from(p.sequence_number()))
            .unwrap_or(0)
    }

    /// Rank used to break ties between ready nodes
    fn ranks(&self) -> Vec<i64> {
        fn rank(graph: &ConstraintGraph, node: usize, memo: &mut [Option<i64>], visiting: &mut [bool]) -> i64 {
            if let Some(r) = memo[node] {
                return r;
            }
            if graph.is_phase(node) {
                return ConstraintGraph::phase_rank(node);
            }
            if visiting[node] {
                // Cyclic anchors; Kahn reports the cycle
                return 0;
            }
            visiting[node] = true;
            let r = match graph.first_anchor[node] {
                Some((anchor, Direction::After)) => rank(graph, anchor, memo, visiting) + 1,
                Some((anchor, Direction::Before)) => rank(graph, anchor, memo, visiting) - 1,
                None => 0,
            };
            visiting[node] = false;
            memo[node] = Some(r);
            r
        }

        let n = self.names.len();
        let mut memo = vec![None; n];
        let mut visiting = vec![false; n];
        (0..n).map(|node| rank(self, node, &mut memo, &mut visiting)).collect()
    }

    /// Kahn's algorithm with a rank priority
    fn order(&self) -> Result<Vec<usize>, CompileError> {
        let ranks = self.ranks();
        let mut in_degree: Vec<usize> = self.predecessors.iter().map(Vec::len).collect();

        // Min-heap on (rank, phase-after-action, declaration index)
        let key = |node: usize| Reverse((ranks[node], self.is_phase(node), node));
        let mut ready: BinaryHeap<_> = (0..self.names.len())
            .filter(|&node| in_degree[node] == 0)
            .map(key)
            .collect();

        let mut order = Vec::with_capacity(self.names.len());
        while let Some(Reverse((_, _, node))) = ready.pop() {
            order.push(node);
            for &next in &self.successors[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(key(next));
                }
            }
        }

        if order.len() < self.names.len() {
            return Err(CompileError::OrderingContradiction {
                cycle: self.find_cycle(&in_degree),
            });
        }
        Ok(order)
    }

    /// Walk remaining predecessors from the first unsorted node until a node
    /// repeats; every unsorted node has at least one unsorted predecessor
    fn find_cycle(&self, in_degree: &[usize]) -> Vec<String> {
        let remaining = |node: &usize| in_degree[*node] > 0;
        let Some(start) = (0..self.names.len()).find(remaining) else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut current = start;
        loop {
            let Some(prev) = self.predecessors[current].iter().copied().filter(remaining).min() else {
                break;
            };
            if let Some(pos) = path.iter().position(|&n| n == prev) {
                let mut cycle = path[pos..].to_vec();
                cycle.push(prev);
                cycle.reverse();
                return cycle.into_iter().map(|n| self.names[n].clone()).collect();
            }
            path.push(prev);
            current = prev;
        }

        path.into_iter().rev().map(|n| self.names[n].clone()).collect()
    }
}

// ============================================================================
// Scheduling
// ============================================================================

/// Validate actions and rules and produce the execute sequence.
pub fn schedule(
    actions: &[CustomActionDecl],
    rules: &[SequenceRuleDecl],
    file_keys: &BTreeSet<String>,
    scope: &GuardScope,
) -> Result<Schedule, CompileError> {
    let resolved = validate_actions(actions, file_keys)?;
    let mut graph = ConstraintGraph::new(&resolved);
    let mut conditions: HashMap<usize, Vec<String>> = HashMap::new();

    for rule in rules {
        let subject = graph.index_of(&rule.action).ok_or_else(|| CompileError::UnknownAction {
            action: rule.action.clone(),
        })?;

        let (anchor_name, direction) = match (&rule.before, &rule.after) {
            (Some(before), None) => (before, Direction::Before),
            (None, Some(after)) => (after, Direction::After),
            (Some(_), Some(_)) => {
                return Err(CompileError::InvalidSequenceRule {
                    action: rule.action.clone(),
                    reason: "a rule names either 'before' or 'after', not both".to_string(),
                });
            }
            (None, None) => {
                return Err(CompileError::InvalidSequenceRule {
                    action: rule.action.clone(),
                    reason: "a rule must name 'before' or 'after'".to_string(),
                });
            }
        };
        let anchor = graph.index_of(anchor_name).ok_or_else(|| CompileError::UnknownAction {
            action: anchor_name.clone(),
        })?;

        if anchor == subject {
            return Err(CompileError::OrderingContradiction {
                cycle: vec![rule.action.clone(), rule.action.clone()],
            });
        }

        match direction {
            Direction::After => graph.add_edge(anchor, subject),
            Direction::Before => graph.add_edge(subject, anchor),
        }
        if graph.first_anchor[subject].is_none() {
            graph.first_anchor[subject] = Some((anchor, direction));
        }

        if let Some(text) = &rule.condition {
            if graph.is_phase(subject) {
                return Err(CompileError::InvalidSequenceRule {
                    action: rule.action.clone(),
                    reason: "guard conditions apply only to custom actions".to_string(),
                });
            }
            let condition = check_guard(&rule.action, text, scope)?;
            conditions.entry(subject).or_default().push(condition.text);
        }
    }

    if let Some(action) = resolved
        .iter()
        .enumerate()
        .find(|(i, _)| graph.first_anchor[graph.phase_count + i].is_none())
        .map(|(_, a)| a)
    {
        return Err(CompileError::UnscheduledAction {
            action: action.id.clone(),
        });
    }

    // Contradictions among the rules themselves are reported first
    graph.order()?;
    graph.pin_script_window(&resolved)?;
    let order = graph.order()?;
    check_script_window(&graph, &order, &resolved)?;
    let steps = number_steps(&graph, &order, conditions)?;

    debug!(
        "Scheduled {} custom actions into {} steps",
        resolved.len(),
        steps.len()
    );

    Ok(Schedule {
        actions: resolved,
        steps,
    })
}

/// Holds by construction once the window is pinned
fn check_script_window(
    graph: &ConstraintGraph,
    order: &[usize],
    actions: &[ResolvedAction],
) -> Result<(), CompileError> {
    let position = |phase: LifecyclePhase| {
        let node = graph.index_of(&phase.to_string());
        order.iter().position(|&n| Some(n) == node)
    };
    let (Some(start), Some(end)) = (
        position(LifecyclePhase::InstallInitialize),
        position(LifecyclePhase::InstallFinalize),
    ) else {
        return Ok(());
    };

    for (pos, &node) in order.iter().enumerate() {
        if graph.is_phase(node) {
            continue;
        }
        let action = &actions[node - graph.phase_count];
        if action.execute.is_in_script() && !(start < pos && pos < end) {
            return Err(CompileError::DeferredOutsideScript {
                action: action.id.clone(),
            });
        }
    }
    Ok(())
}

/// Phases keep their numbers; actions take the next free number after the
/// preceding step and must stay below the following phase
fn number_steps(
    graph: &ConstraintGraph,
    order: &[usize],
    mut conditions: HashMap<usize, Vec<String>>,
) -> Result<Vec<ScheduledStep>, CompileError> {
    let mut steps = Vec::with_capacity(order.len());
    let mut previous = 0u32;
    let mut anchor = "start of sequence".to_string();

    for (pos, &node) in order.iter().enumerate() {
        let name = graph.names[node].clone();
        if graph.is_phase(node) {
            previous = ConstraintGraph::phase_rank(node) as u32;
            anchor = name.clone();
            steps.push(ScheduledStep {
                name,
                kind: StepKind::Phase,
                sequence: previous,
                condition: None,
            });
            continue;
        }

        let limit = order[pos + 1..]
            .iter()
            .find(|&&n| graph.is_phase(n))
            .map(|&n| ConstraintGraph::phase_rank(n) as u32);
        let sequence = previous + 1;
        if limit.is_some_and(|limit| sequence >= limit) {
            return Err(CompileError::SequenceGapExhausted { anchor });
        }
        previous = sequence;

        let condition = conditions.remove(&node).map(|guards| match guards.as_slice() {
            [single] => single.clone(),
            many => many
                .iter()
                .map(|g| format!("({})", g))
                .collect::<Vec<_>>()
                .join(" AND "),
        });

        steps.push(ScheduledStep {
            name,
            kind: StepKind::Action,
            sequence,
            condition,
        });
    }

    Ok(steps)
}
