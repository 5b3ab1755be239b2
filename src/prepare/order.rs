//! Ordering requirements so providers run after the variables they need.

use std::collections::{BTreeSet, HashMap};

/// Order `items` so that an item providing variable X comes before items
/// that depend on X.
///
/// Dependencies naming a variable no item provides, or one `satisfied`
/// accepts, are ignored. Ties keep the input order. Returns `None` if the
/// remaining dependencies form a cycle.
pub fn topological_order<T>(
    items: &[T],
    key: impl Fn(&T) -> &str,
    dependencies: impl Fn(&T) -> Vec<String>,
    satisfied: impl Fn(&str) -> bool,
) -> Option<Vec<usize>> {
    let index_of: HashMap<&str, usize> = items
        .iter()
        .enumerate()
        .map(|(i, item)| (key(item), i))
        .collect();

    // dependents[i] lists the items waiting on item i
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    let mut in_degree = vec![0usize; items.len()];
    for (i, item) in items.iter().enumerate() {
        let wanted: BTreeSet<usize> = dependencies(item)
            .iter()
            .filter(|var| !satisfied(var))
            .filter_map(|var| index_of.get(var.as_str()).copied())
            .filter(|&provider| provider != i)
            .collect();
        in_degree[i] = wanted.len();
        for provider in wanted {
            dependents[provider].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..items.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut result = Vec::with_capacity(items.len());
    while let Some(next) = ready.pop_first() {
        result.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    (result.len() == items.len()).then_some(result)
}

/// Like [`topological_order`], falling back to input order on a cycle.
pub fn order_or_input<T>(
    items: &[T],
    key: impl Fn(&T) -> &str,
    dependencies: impl Fn(&T) -> Vec<String>,
    satisfied: impl Fn(&str) -> bool,
) -> Vec<usize> {
    match topological_order(items, &key, dependencies, satisfied) {
        Some(order) => order,
        None => {
            let names: Vec<&str> = items.iter().map(&key).collect();
            tracing::debug!(
                "Requirement dependencies form a cycle among {}; keeping manifest order",
                names.join(", ")
            );
            (0..items.len()).collect()
        }
    }
}
