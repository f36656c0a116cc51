use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tracing::debug;
use tracksmith_core::{Identity, Model, OperationKind, PendingOperation};

use crate::error::TrackerError;

struct Graph {
    successors: Vec<Vec<usize>>,
    indegree: Vec<usize>,
}

impl Graph {
    fn new(n: usize) -> Self {
        Self {
            successors: vec![Vec::new(); n],
            indegree: vec![0; n],
        }
    }

    fn edge(&mut self, before: usize, after: usize) {
        if before != after {
            self.successors[before].push(after);
            self.indegree[after] += 1;
        }
    }
}

fn build(operations: &[PendingOperation], model: &Model) -> Result<Graph, TrackerError> {
    let mut graph = Graph::new(operations.len());
    let mut inserts: HashMap<&Identity, usize> = HashMap::new();
    let mut deletes: HashMap<&Identity, usize> = HashMap::new();
    for (i, op) in operations.iter().enumerate() {
        match op.kind {
            OperationKind::Insert => inserts.insert(&op.identity, i),
            OperationKind::Delete => deletes.insert(&op.identity, i),
            OperationKind::Update => None,
        };
    }

    for (i, op) in operations.iter().enumerate() {
        let entity = model.get(&op.identity.entity)?;
        let current = op.record();
        let original = op.original_record();

        for reference in entity.required_references() {
            match op.kind {
                OperationKind::Insert | OperationKind::Update => {
                    let target = reference.target_identity(&current);
                    if let Some(&t) = target.as_ref().and_then(|t| inserts.get(t)) {
                        graph.edge(t, i);
                    }
                    if op.kind == OperationKind::Update {
                        let previous = reference.target_identity(&original);
                        if previous != target {
                            if let Some(&d) = previous.as_ref().and_then(|p| deletes.get(p)) {
                                graph.edge(i, d);
                            }
                        }
                    }
                }
                OperationKind::Delete => {
                    let target = reference.target_identity(&original);
                    if let Some(&d) = target.as_ref().and_then(|t| deletes.get(t)) {
                        graph.edge(i, d);
                    }
                }
            }
        }
    }
    Ok(graph)
}

/// Order `operations` so that every dependency executes first. Fails with
/// [`TrackerError::CyclicDependency`] when required references form a cycle.
///
/// An edge `a -> b` means `a` must execute before `b`. Edges come only from
/// required references declared in the model:
/// - inserting a target precedes inserting or updating a record that points at it;
/// - deleting a referencing record precedes deleting its target;
/// - an update that moves a reference away from a target precedes deleting that target.
///
/// Ready operations leave a heap keyed by registration sequence, so unrelated
/// operations keep the order their entries were registered in.
pub fn order(
    operations: Vec<PendingOperation>,
    model: &Model,
) -> Result<Vec<PendingOperation>, TrackerError> {
    let mut graph = build(&operations, model)?;

    let mut ready = BinaryHeap::new();
    for (i, op) in operations.iter().enumerate() {
        if graph.indegree[i] == 0 {
            ready.push(Reverse((op.seq, i)));
        }
    }

    let mut order = Vec::with_capacity(operations.len());
    while let Some(Reverse((_, current))) = ready.pop() {
        order.push(current);
        for &next in &graph.successors[current] {
            graph.indegree[next] -= 1;
            if graph.indegree[next] == 0 {
                ready.push(Reverse((operations[next].seq, next)));
            }
        }
    }

    if order.len() != operations.len() {
        let mut unresolved: Vec<&PendingOperation> = operations
            .iter()
            .enumerate()
            .filter_map(|(i, op)| (graph.indegree[i] > 0).then_some(op))
            .collect();
        unresolved.sort_by_key(|op| op.seq);
        return Err(TrackerError::CyclicDependency(
            unresolved.into_iter().map(|op| op.identity.clone()).collect(),
        ));
    }

    let mut slots: Vec<Option<PendingOperation>> = operations.into_iter().map(Some).collect();
    let ordered: Vec<PendingOperation> = order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect();
    debug!(ops = ordered.len(), "operations ordered");
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracksmith_core::{EntityModel, FieldMap, FieldValue, Record};

    fn model() -> Model {
        Model::new()
            .entity(EntityModel::new("Author", &["id"]))
            .entity(
                EntityModel::new("Post", &["id"])
                    .references("author", &["author_id"], "Author")
                    .optional_reference("editor", &["editor_id"], "Author"),
            )
            .entity(EntityModel::new("Comment", &["id"]).references("post", &["post_id"], "Post"))
            .entity(EntityModel::new("Egg", &["id"]).references("chicken", &["chicken_id"], "Chicken"))
            .entity(EntityModel::new("Chicken", &["id"]).references("egg", &["egg_id"], "Egg"))
    }

    fn insert(seq: u64, record: Record) -> PendingOperation {
        let identity = model().identity_of(&record).unwrap();
        PendingOperation::insert(seq, identity, record.fields)
    }

    fn delete(seq: u64, record: Record) -> PendingOperation {
        let identity = model().identity_of(&record).unwrap();
        PendingOperation::delete(seq, identity, record.fields.clone(), Some(record.fields))
    }

    fn ids(ops: &[PendingOperation]) -> Vec<String> {
        ops.iter().map(|op| op.identity.to_string()).collect()
    }

    #[test]
    fn referenced_insert_goes_first() {
        let ops = vec![
            insert(0, Record::new("Post").with("id", 1).with("author_id", 7)),
            insert(1, Record::new("Author").with("id", 7)),
        ];
        let ordered = order(ops, &model()).unwrap();
        assert_eq!(ids(&ordered), vec!["Author(7)", "Post(1)"]);
    }

    #[test]
    fn deletes_run_in_reverse_dependency_order() {
        let ops = vec![
            delete(0, Record::new("Author").with("id", 7)),
            delete(1, Record::new("Post").with("id", 1).with("author_id", 7)),
            delete(2, Record::new("Comment").with("id", 3).with("post_id", 1)),
        ];
        let ordered = order(ops, &model()).unwrap();
        assert_eq!(ids(&ordered), vec!["Comment(3)", "Post(1)", "Author(7)"]);
    }

    #[test]
    fn unrelated_operations_keep_registration_order() {
        let ops = vec![
            insert(5, Record::new("Author").with("id", 3)),
            insert(2, Record::new("Author").with("id", 1)),
            insert(9, Record::new("Author").with("id", 2)),
        ];
        let ordered = order(ops, &model()).unwrap();
        assert_eq!(ids(&ordered), vec!["Author(1)", "Author(3)", "Author(2)"]);
    }

    #[test]
    fn optional_and_null_references_add_no_edges() {
        let ops = vec![
            insert(0, Record::new("Post").with("id", 1).with("author_id", FieldValue::Null).with("editor_id", 7)),
            insert(1, Record::new("Author").with("id", 7)),
        ];
        let ordered = order(ops, &model()).unwrap();
        assert_eq!(ids(&ordered), vec!["Post(1)", "Author(7)"]);
    }

    #[test]
    fn update_moving_away_precedes_delete_of_old_target() {
        let original = Record::new("Post").with("id", 1).with("author_id", 7);
        let mut moved = original.fields.clone();
        moved.insert("author_id".into(), FieldValue::Integer(8));
        let update = PendingOperation::update(
            1,
            Identity::of("Post", 1),
            moved,
            original.fields.clone(),
            ["author_id".to_string()].into(),
        );
        let ops = vec![delete(0, Record::new("Author").with("id", 7)), update];
        let ordered = order(ops, &model()).unwrap();
        assert_eq!(ids(&ordered), vec!["Post(1)", "Author(7)"]);
    }

    #[test]
    fn update_pointing_at_new_record_waits_for_insert() {
        let mut fields = FieldMap::new();
        fields.insert("id".into(), FieldValue::Integer(1));
        fields.insert("author_id".into(), FieldValue::Integer(8));
        let mut original = fields.clone();
        original.insert("author_id".into(), FieldValue::Integer(7));
        let update = PendingOperation::update(
            0,
            Identity::of("Post", 1),
            fields,
            original,
            ["author_id".to_string()].into(),
        );
        let ops = vec![update, insert(1, Record::new("Author").with("id", 8))];
        let ordered = order(ops, &model()).unwrap();
        assert_eq!(ids(&ordered), vec!["Author(8)", "Post(1)"]);
    }

    #[test]
    fn self_reference_is_not_a_cycle() {
        let model = Model::new().entity(
            EntityModel::new("Node", &["id"]).references("parent", &["parent_id"], "Node"),
        );
        let record = Record::new("Node").with("id", 1).with("parent_id", 1);
        let op = PendingOperation::insert(0, Identity::of("Node", 1), record.fields);
        assert_eq!(order(vec![op], &model).unwrap().len(), 1);
    }

    #[test]
    fn required_cycle_is_reported() {
        let ops = vec![
            insert(0, Record::new("Egg").with("id", 1).with("chicken_id", 1)),
            insert(1, Record::new("Chicken").with("id", 1).with("egg_id", 1)),
            insert(2, Record::new("Author").with("id", 1)),
        ];
        let err = order(ops, &model()).unwrap_err();
        match err {
            TrackerError::CyclicDependency(ids) => {
                assert_eq!(ids, vec![Identity::of("Egg", 1), Identity::of("Chicken", 1)]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }
}
