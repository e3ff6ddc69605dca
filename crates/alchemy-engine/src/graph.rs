use std::collections::{BTreeSet, HashMap};

use alchemy_domain::Fqn;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::EngineError;

/// Builds a dependency graph from recorded `deps` (dependency -> dependent
/// edges) and returns fqns in dependency-first order: every resource
/// appears after everything it depends on. Reversing the result gives the
/// order a finalizer should delete in (dependents before their
/// dependencies).
pub fn dependency_order(deps: &HashMap<Fqn, BTreeSet<Fqn>>) -> Result<Vec<Fqn>, EngineError> {
    let mut graph = DiGraph::<Fqn, ()>::new();
    let mut index_of: HashMap<Fqn, NodeIndex> = HashMap::new();

    let mut node_index = |fqn: &Fqn, graph: &mut DiGraph<Fqn, ()>, index_of: &mut HashMap<Fqn, NodeIndex>| -> NodeIndex {
        if let Some(idx) = index_of.get(fqn) {
            return *idx;
        }
        let idx = graph.add_node(fqn.clone());
        index_of.insert(fqn.clone(), idx);
        idx
    };

    for (fqn, its_deps) in deps {
        let dependent = node_index(fqn, &mut graph, &mut index_of);
        for dep in its_deps {
            let dependency = node_index(dep, &mut graph, &mut index_of);
            graph.add_edge(dependency, dependent, ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(|idx| graph[idx].clone()).collect()),
        Err(cycle) => {
            let offender = graph[cycle.node_id()].clone();
            Err(EngineError::DependencyCycle(vec![offender]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alchemy_domain::Fqn;

    fn fqn(s: &str) -> Fqn {
        Fqn::new("app", s).unwrap()
    }

    #[test]
    fn orders_dependency_before_dependent() {
        let mut deps = HashMap::new();
        let mut its = BTreeSet::new();
        its.insert(fqn("db"));
        deps.insert(fqn("web"), its);
        deps.insert(fqn("db"), BTreeSet::new());

        let order = dependency_order(&deps).unwrap();
        let db_pos = order.iter().position(|f| f == &fqn("db")).unwrap();
        let web_pos = order.iter().position(|f| f == &fqn("web")).unwrap();
        assert!(db_pos < web_pos);
    }

    #[test]
    fn detects_cycle() {
        let mut deps = HashMap::new();
        let mut a_deps = BTreeSet::new();
        a_deps.insert(fqn("b"));
        let mut b_deps = BTreeSet::new();
        b_deps.insert(fqn("a"));
        deps.insert(fqn("a"), a_deps);
        deps.insert(fqn("b"), b_deps);

        let err = dependency_order(&deps).unwrap_err();
        assert!(matches!(err, EngineError::DependencyCycle(_)));
    }
}
