use std::collections::BTreeMap;

/// Maximum number of trailing branch targets whose ordered sub-combinations
/// relaxed path coverage enumerates.
pub const RELAXED_SUBPATH_LIMIT: usize = 12;

/// Prefix tree of branch paths with a visit counter per node.
#[derive(Debug, Clone, Default)]
pub struct PathTree {
    nodes: BTreeMap<usize, PathTree>,
    covered: usize,
}

impl PathTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one visit of `path` and of every prefix of it.
    pub fn add(&mut self, path: &[usize]) {
        let mut node = self;
        node.covered += 1;
        for target in path {
            node = node.nodes.entry(*target).or_default();
            node.covered += 1;
        }
    }

    /// Visits of `path`; the empty path counts every `add`.
    pub fn get(&self, path: &[usize]) -> usize {
        let mut node = self;
        for target in path {
            match node.nodes.get(target) {
                Some(next) => node = next,
                None => return 0,
            }
        }
        node.covered
    }

    pub fn contains(&self, path: &[usize]) -> bool {
        self.get(path) > 0
    }
}

/// Every ordered, non-empty sub-combination of `path`, shortest first.
/// `[3, 2, 1]` yields `[3] [2] [1] [3,2] [3,1] [2,1] [3,2,1]`.
pub fn all_subpaths(path: &[usize]) -> Vec<Vec<usize>> {
    let n = path.len();
    let mut masks: Vec<u64> = (1..(1u64 << n)).collect();
    // Shortest first, then lexicographic on picked positions.
    masks.sort_by_cached_key(|m| {
        let positions: Vec<usize> = (0..n).filter(|i| m & (1 << i) != 0).collect();
        (m.count_ones(), positions)
    });
    masks
        .into_iter()
        .map(|m| (0..n).filter(|i| m & (1 << i) != 0).map(|i| path[i]).collect())
        .collect()
}

/// Paths to mark as covered under relaxed path coverage: the full path plus
/// the sub-combinations of its last [`RELAXED_SUBPATH_LIMIT`] targets.
pub fn relaxed_paths(path: &[usize]) -> Vec<Vec<usize>> {
    if path.len() <= RELAXED_SUBPATH_LIMIT {
        return all_subpaths(path);
    }
    let window = &path[path.len() - RELAXED_SUBPATH_LIMIT..];
    let mut paths = all_subpaths(window);
    paths.push(path.to_vec());
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_counts_prefixes() {
        let mut tree = PathTree::new();
        tree.add(&[1, 2, 3]);
        tree.add(&[1, 2]);
        assert_eq!(tree.get(&[1]), 2);
        assert_eq!(tree.get(&[1, 2]), 2);
        assert_eq!(tree.get(&[1, 2, 3]), 1);
        assert_eq!(tree.get(&[2]), 0);
        assert_eq!(tree.get(&[]), 2);
        assert!(!tree.contains(&[1, 3]));
    }

    #[test]
    fn test_all_subpaths_order() {
        assert_eq!(
            all_subpaths(&[3, 2, 1]),
            vec![vec![3], vec![2], vec![1], vec![3, 2], vec![3, 1], vec![2, 1], vec![3, 2, 1]]
        );
        assert!(all_subpaths(&[]).is_empty());
    }

    #[test]
    fn test_relaxed_paths_are_bounded() {
        let long: Vec<usize> = (0..20).collect();
        let paths = relaxed_paths(&long);
        assert_eq!(paths.len(), (1 << RELAXED_SUBPATH_LIMIT) - 1 + 1);
        assert!(paths.contains(&long));
        assert!(paths.iter().all(|p| p.len() <= RELAXED_SUBPATH_LIMIT || p == &long));
    }
}
