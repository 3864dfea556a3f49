//! Separability-aware input removal over transform trees.
//!
//! Removing a pixel axis from a composed transform means finding and
//! dropping the minimal subtree that consumes it, without splitting any
//! non-separable subtree. The algorithm partitions a stack node's inputs
//! over its children ([`input_map`]), recurses one stack level at a time,
//! and returns the surviving subtrees as a flat list that
//! [`recompose`] folds back into a single stack.
//!
//! Removal is positional at its core ([`remove_input_at`]); the by-name
//! surface ([`remove_input`]) resolves a name to the first input position
//! carrying it, since primitive names repeat freely across a stack.

use crate::tree::{CompositionOp, TransformTree};
use log::{debug, trace};
use thiserror::Error;

/// Error from the tree input-removal algebra
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlgebraError {
    /// The tree couples more than one disjoint group of inputs
    #[error("transform couples {groups} disjoint non-separable input groups; at most one is supported")]
    MultipleCoupledGroups {
        /// Number of non-separable groups found
        groups: usize,
    },
    /// Nothing left to recompose
    #[error("cannot recompose an empty list of subtrees")]
    EmptyRecompose,
}

/// Partition a tree's top-level inputs over its immediate children.
///
/// For a stack node the ordered input names split between the two
/// children; a pipe node or a leaf is atomic and owns all of its inputs.
pub fn input_map(tree: &TransformTree) -> Vec<(&TransformTree, Vec<String>)> {
    match tree {
        TransformTree::Stack(a, b) => {
            let names = tree.input_names();
            let split = a.n_inputs();
            vec![
                (a.as_ref(), names[..split].to_vec()),
                (b.as_ref(), names[split..].to_vec()),
            ]
        }
        _ => vec![(tree, tree.input_names())],
    }
}

/// Groups of mutually coupled input indices.
///
/// Two inputs are coupled when some output depends on both; the groups
/// are the transitive closure of that relation, in ascending order of
/// their smallest member. Singleton groups are included.
pub fn coupled_input_groups(tree: &TransformTree) -> Vec<Vec<usize>> {
    let m = tree.separability_matrix();
    let n = tree.n_inputs();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        let mut root = i;
        while parent[root] != root {
            root = parent[root];
        }
        let mut walk = i;
        while parent[walk] != root {
            let next = parent[walk];
            parent[walk] = root;
            walk = next;
        }
        root
    }

    for o in 0..m.nrows() {
        let mut first: Option<usize> = None;
        for i in 0..n {
            if !m[(o, i)] {
                continue;
            }
            match first {
                None => first = Some(i),
                Some(f) => {
                    let (a, b) = (find(&mut parent, f), find(&mut parent, i));
                    if a != b {
                        parent[b] = a;
                    }
                }
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut roots: Vec<usize> = Vec::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        match roots.iter().position(|&r| r == root) {
            Some(g) => groups[g].push(i),
            None => {
                roots.push(root);
                groups.push(vec![i]);
            }
        }
    }
    groups
}

/// Whether the input at `index` shares an output with any other input.
fn input_is_coupled_at(tree: &TransformTree, index: usize) -> bool {
    let m = tree.separability_matrix();
    let n = tree.n_inputs();
    (0..m.nrows()).any(|o| m[(o, index)] && (0..n).any(|i| i != index && m[(o, i)]))
}

/// The atomic (non-stack) removal rule: a subtree consuming only the
/// removed input is dropped; a non-separable subtree mixing it with
/// other inputs survives whole unless coupled subtrees are being
/// dropped; anything else is dropped entirely.
fn remove_from_atomic(tree: &TransformTree, index: usize, drop_coupled: bool) -> Vec<TransformTree> {
    if tree.n_inputs() > 1 && input_is_coupled_at(tree, index) && !drop_coupled {
        trace!("keeping non-separable subtree; cannot isolate input {index}");
        vec![tree.clone()]
    } else {
        trace!("dropping subtree consuming input {index}");
        Vec::new()
    }
}

fn remove_at_inner(tree: &TransformTree, index: usize, drop_coupled: bool) -> Vec<TransformTree> {
    let (a, b) = match tree {
        TransformTree::Stack(a, b) => (a, b),
        _ => return remove_from_atomic(tree, index, drop_coupled),
    };

    // Exactly one child owns the input; the other is kept unmodified.
    let na = a.n_inputs();
    let mut survivors = Vec::new();
    if index < na {
        survivors.extend(descend(a, index, drop_coupled));
        survivors.push(b.as_ref().clone());
    } else {
        survivors.push(a.as_ref().clone());
        survivors.extend(descend(b, index - na, drop_coupled));
    }
    survivors
}

fn descend(child: &TransformTree, index: usize, drop_coupled: bool) -> Vec<TransformTree> {
    if child.n_inputs() == 1 {
        // The child consumes only the removed input.
        trace!("dropping single-input subtree");
        Vec::new()
    } else if child.op() == Some(CompositionOp::Stack) {
        remove_at_inner(child, index, drop_coupled)
    } else {
        remove_from_atomic(child, index, drop_coupled)
    }
}

/// Remove the input at `index` (and the minimal subtree consuming it)
/// from a composed transform.
///
/// Returns the surviving independent subtrees as a flat list, never
/// re-nested; [`recompose`] folds them back into one transform. An index
/// beyond the tree's inputs is a no-op and returns the tree unchanged.
/// When `drop_coupled` is set, a non-separable subtree that mixes the
/// input with others is dropped wholesale instead of kept.
///
/// # Errors
/// [`AlgebraError::MultipleCoupledGroups`] when the tree couples two or
/// more disjoint input groups: the recursion is only proven correct for a
/// single maximal non-separable group, so that precondition is asserted
/// rather than silently generalized.
pub fn remove_input_at(
    tree: &TransformTree,
    index: usize,
    drop_coupled: bool,
) -> Result<Vec<TransformTree>, AlgebraError> {
    if index >= tree.n_inputs() {
        return Ok(vec![tree.clone()]);
    }

    let coupled_groups = coupled_input_groups(tree)
        .into_iter()
        .filter(|g| g.len() > 1)
        .count();
    if coupled_groups > 1 {
        return Err(AlgebraError::MultipleCoupledGroups {
            groups: coupled_groups,
        });
    }

    debug!("removing input {index} (drop_coupled={drop_coupled})");
    Ok(remove_at_inner(tree, index, drop_coupled))
}

/// Remove the first input carrying `name`; a no-op when no input does.
///
/// See [`remove_input_at`] for the removal semantics.
pub fn remove_input(
    tree: &TransformTree,
    name: &str,
    drop_coupled: bool,
) -> Result<Vec<TransformTree>, AlgebraError> {
    match tree.input_names().iter().position(|n| n == name) {
        Some(index) => remove_input_at(tree, index, drop_coupled),
        None => Ok(vec![tree.clone()]),
    }
}

/// The contiguous block of input positions that
/// [`remove_input_at`] would eliminate, as `(offset, len)`.
///
/// `len == 0` means the consuming subtree would be kept whole (unable to
/// isolate the input). Mirrors the removal descent exactly so callers can
/// account for inputs that vanish alongside the target.
pub(crate) fn removal_span(
    tree: &TransformTree,
    index: usize,
    drop_coupled: bool,
) -> (usize, usize) {
    fn atomic_span(
        tree: &TransformTree,
        index: usize,
        offset: usize,
        drop_coupled: bool,
    ) -> (usize, usize) {
        if tree.n_inputs() > 1 && input_is_coupled_at(tree, index) && !drop_coupled {
            (offset, 0)
        } else {
            (offset, tree.n_inputs())
        }
    }

    fn child_span(
        child: &TransformTree,
        index: usize,
        offset: usize,
        drop_coupled: bool,
    ) -> (usize, usize) {
        if child.n_inputs() == 1 {
            (offset, 1)
        } else if child.op() == Some(CompositionOp::Stack) {
            go(child, index, offset, drop_coupled)
        } else {
            atomic_span(child, index, offset, drop_coupled)
        }
    }

    fn go(tree: &TransformTree, index: usize, offset: usize, drop_coupled: bool) -> (usize, usize) {
        let (a, b) = match tree {
            TransformTree::Stack(a, b) => (a, b),
            _ => return atomic_span(tree, index, offset, drop_coupled),
        };
        let na = a.n_inputs();
        if index < na {
            child_span(a, index, offset, drop_coupled)
        } else {
            child_span(b, index - na, offset + na, drop_coupled)
        }
    }

    go(tree, index, 0, drop_coupled)
}

/// Fold a list of subtrees back into one transform by stacking.
///
/// The result's input count is the sum of the parts' input counts.
pub fn recompose(trees: Vec<TransformTree>) -> Result<TransformTree, AlgebraError> {
    let mut iter = trees.into_iter();
    let first = iter.next().ok_or(AlgebraError::EmptyRecompose)?;
    Ok(iter.fold(first, TransformTree::stack))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{AffineMatrix2, Scale, Shift};
    use nalgebra::Matrix2;

    fn shift(offset: f64) -> TransformTree {
        TransformTree::leaf(Shift::new(offset))
    }

    fn affine() -> TransformTree {
        TransformTree::leaf(AffineMatrix2::new(Matrix2::new(0.0, -1.0, 1.0, 0.0)))
    }

    fn three_way_stack() -> TransformTree {
        TransformTree::stack(
            TransformTree::stack(shift(1.0), TransformTree::leaf(Scale::new(2.0))),
            shift(3.0),
        )
    }

    #[test]
    fn test_input_map_partitions_stack() {
        let tree = TransformTree::stack(affine(), shift(0.0));
        let map = input_map(&tree);
        assert_eq!(map.len(), 2);
        assert_eq!(map[0].1, vec!["x", "y"]);
        assert_eq!(map[1].1, vec!["x"]);
    }

    #[test]
    fn test_input_map_treats_leaf_as_atomic() {
        let tree = affine();
        let map = input_map(&tree);
        assert_eq!(map.len(), 1);
        assert_eq!(map[0].1.len(), 2);
    }

    #[test]
    fn test_remove_absent_input_is_noop() {
        let tree = three_way_stack();
        let out = remove_input(&tree, "nope", false).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].n_inputs(), tree.n_inputs());

        let out = remove_input_at(&tree, 17, false).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_coupled_groups() {
        // (affine pair) & shift: groups {0,1} and {2}.
        let tree = TransformTree::stack(affine(), shift(0.0));
        let groups = coupled_input_groups(&tree);
        assert_eq!(groups, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn test_remove_exclusive_leaf_from_three_way_stack() {
        let tree = three_way_stack();
        assert_eq!(tree.n_inputs(), 3);
        let out = remove_input_at(&tree, 1, false).unwrap();
        assert_eq!(out.len(), 2);
        let recomposed = recompose(out).unwrap();
        assert_eq!(recomposed.n_inputs(), tree.n_inputs() - 1);
    }

    #[test]
    fn test_remove_by_name_resolves_first_position() {
        // Every leaf names its input "x"; the first one is removed.
        let tree = three_way_stack();
        let out = remove_input(&tree, "x", false).unwrap();
        assert_eq!(recompose(out).unwrap().n_inputs(), 2);
    }

    #[test]
    fn test_keeps_non_separable_subtree_without_drop_coupled() {
        // Input 1 couples to input 0 through the affine; without
        // drop_coupled the subtree survives whole.
        let tree = TransformTree::stack(affine(), shift(0.0));
        let out = remove_input_at(&tree, 1, false).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].n_inputs(), 2);
    }

    #[test]
    fn test_drop_coupled_removes_non_separable_subtree() {
        let tree = TransformTree::stack(affine(), shift(0.0));
        let out = remove_input_at(&tree, 1, true).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].n_inputs(), 1);
    }

    #[test]
    fn test_multiple_coupled_groups_is_an_error() {
        let tree = TransformTree::stack(affine(), affine());
        let err = remove_input_at(&tree, 0, false).unwrap_err();
        assert_eq!(err, AlgebraError::MultipleCoupledGroups { groups: 2 });
    }

    #[test]
    fn test_recompose_empty_fails() {
        assert_eq!(
            recompose(Vec::new()).unwrap_err(),
            AlgebraError::EmptyRecompose
        );
    }

    #[test]
    fn test_recompose_sums_inputs() {
        let tree = recompose(vec![affine(), shift(0.0), shift(1.0)]).unwrap();
        assert_eq!(tree.n_inputs(), 4);
        assert_eq!(tree.n_outputs(), 4);
    }

    #[test]
    fn test_deep_stack_recursion_finds_minimal_subtree() {
        // ((shift & scale) & affine): removing input 0 keeps scale and
        // the affine pair.
        let tree = TransformTree::stack(
            TransformTree::stack(shift(1.0), TransformTree::leaf(Scale::new(2.0))),
            affine(),
        );
        let out = remove_input_at(&tree, 0, false).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].n_inputs(), 1);
        assert_eq!(out[1].n_inputs(), 2);
    }
}
