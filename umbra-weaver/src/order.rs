// Processing order for reflected types.
//
// Structs are classified dependency-first so the blittability of a struct
// is known before any struct that embeds it; classes are processed
// base-first so a subclass sees its parent's functions and events.

use std::collections::{HashMap, HashSet};

use crate::error::AuthoringError;
use crate::model::PropertyKind;

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    New,
    Visiting,
    Done,
}

/// Order `0..count` so every node follows the nodes it depends on. Roots are
/// taken in declaration order. Returns the node closing a cycle on failure.
pub fn dependency_first(count: usize, deps: impl Fn(usize) -> Vec<usize>) -> Result<Vec<usize>, usize> {
    let mut marks = vec![Mark::New; count];
    let mut order = Vec::with_capacity(count);
    let mut stack: Vec<(usize, bool)> = Vec::new();

    for root in 0..count {
        stack.push((root, false));
        while let Some((i, expanded)) = stack.pop() {
            if expanded {
                marks[i] = Mark::Done;
                order.push(i);
                continue;
            }
            if marks[i] != Mark::New {
                continue;
            }
            marks[i] = Mark::Visiting;
            stack.push((i, true));
            for d in deps(i).into_iter().rev() {
                match marks[d] {
                    Mark::New => stack.push((d, false)),
                    Mark::Visiting => return Err(d),
                    Mark::Done => {}
                }
            }
        }
    }
    Ok(order)
}

/// Struct order and blittability. `fields[i]` are the field kinds of struct
/// `i`; `external` answers for structs declared by other modules.
pub fn order_structs(
    names: &[String],
    fields: &[Vec<PropertyKind>],
    external: &dyn Fn(&str) -> bool,
) -> Result<(Vec<usize>, HashMap<String, bool>), AuthoringError> {
    let index: HashMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
    let order = dependency_first(names.len(), |i| {
        fields[i]
            .iter()
            .filter_map(|k| k.direct_struct())
            .filter_map(|n| index.get(n).copied())
            .collect()
    })
    .map_err(|i| AuthoringError::StructCycle(names[i].clone()))?;

    let mut blittable: HashMap<String, bool> = HashMap::with_capacity(names.len());
    let mut constructed: HashSet<&str> = HashSet::with_capacity(names.len());
    for &i in &order {
        if !constructed.insert(names[i].as_str()) {
            return Err(AuthoringError::DuplicateMetadata(names[i].clone()));
        }
        let known = |n: &str| match blittable.get(n) {
            Some(&b) => b,
            None => external(n),
        };
        let is_blittable = !fields[i].is_empty() && fields[i].iter().all(|k| k.is_blittable(&known));
        blittable.insert(names[i].clone(), is_blittable);
    }
    Ok((order, blittable))
}

/// Base-first class order. `parents[i]` is the index of class `i`'s parent
/// when the parent is declared in the same module.
pub fn order_classes(names: &[String], parents: &[Option<usize>]) -> Result<Vec<usize>, AuthoringError> {
    dependency_first(names.len(), |i| parents[i].into_iter().collect())
        .map_err(|i| AuthoringError::InheritanceCycle(names[i].clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(name: &str) -> PropertyKind {
        PropertyKind::Struct { name: name.into() }
    }

    #[test]
    fn blittability_is_independent_of_declaration_order() {
        // Outer embeds Inner but is declared first.
        let names = vec!["Outer".to_string(), "Inner".to_string(), "Labelled".to_string()];
        let fields = vec![
            vec![s("Inner"), PropertyKind::Float],
            vec![PropertyKind::Int32, PropertyKind::Double],
            vec![s("Inner"), PropertyKind::String],
        ];
        let (order, blittable) = order_structs(&names, &fields, &|_| false).unwrap();
        assert_eq!(order, [1, 0, 2]);
        assert!(blittable["Outer"]);
        assert!(blittable["Inner"]);
        assert!(!blittable["Labelled"]);
    }

    #[test]
    fn external_structs_answer_for_themselves() {
        let names = vec!["Transform".to_string()];
        let fields = vec![vec![s("Vector"), s("Quat")]];
        let (_, blittable) = order_structs(&names, &fields, &|n| n == "Vector").unwrap();
        assert!(!blittable["Transform"]);
        let (_, blittable) = order_structs(&names, &fields, &|_| true).unwrap();
        assert!(blittable["Transform"]);
    }

    #[test]
    fn struct_cycles_are_rejected() {
        let names = vec!["A".to_string(), "B".to_string()];
        let fields = vec![vec![s("B")], vec![s("A")]];
        assert!(matches!(
            order_structs(&names, &fields, &|_| false),
            Err(AuthoringError::StructCycle(_))
        ));
        let selfish = vec![vec![s("A")]];
        assert!(matches!(
            order_structs(&names[..1], &selfish, &|_| false),
            Err(AuthoringError::StructCycle(n)) if n == "A"
        ));
    }

    #[test]
    fn classes_come_base_first() {
        let names: Vec<String> = ["Sniper", "Soldier", "Unit"].iter().map(|s| s.to_string()).collect();
        let parents = vec![Some(1), Some(2), None];
        assert_eq!(order_classes(&names, &parents).unwrap(), [2, 1, 0]);

        let looped = vec![Some(1), Some(0), None];
        assert!(matches!(order_classes(&names, &looped), Err(AuthoringError::InheritanceCycle(_))));
    }
}
