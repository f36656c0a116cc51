use tracksmith_core::{field_value::FieldValue, operations::OperationKind, Record};
use tracksmith_engine::{EntityState, ExecutionMode, TrackerConfig, TrackerError, TrackingMode};
use tracksmith_harness::*;
use tracksmith_storage::{FailureKind, OperationFailure, Query, SqliteStore, StorageError};

fn per_operation() -> TrackerConfig {
    TrackerConfig::new().with_execution(ExecutionMode::PerOperation)
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn modify_and_commit_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut ctx = TestContext::new()?;
    ctx.seed(vec![author(1, "X")])?;

    let mut scope = ctx.scope();
    scope.load(&ctx.store, &Query::all("Author"), TrackingMode::Tracked)?;
    assert_eq!(scope.current_state(&author_id(1))?, EntityState::Unchanged);

    scope.set_field(&author_id(1), "name", "Y")?;
    scope.detect(&author_id(1))?;
    assert_eq!(scope.current_state(&author_id(1))?, EntityState::Modified);

    let result = scope.commit(&mut ctx.store)?;
    assert!(result.is_success());
    assert_eq!(result.succeeded.len(), 1);
    assert_eq!(result.succeeded[0].kind, OperationKind::Update);

    let entry = scope.entry(&author_id(1))?.ok_or("entry missing")?;
    assert_eq!(entry.state(), EntityState::Unchanged);
    let snapshot = entry.snapshot().ok_or("snapshot missing")?;
    assert_eq!(snapshot.get("name"), Some(&FieldValue::Text("Y".into())));
    assert_eq!(snapshot.fields(), &entry.record().fields);

    let stored = ctx.stored(&author_id(1))?.ok_or("row missing")?;
    assert_eq!(stored.get("name"), Some(&FieldValue::Text("Y".into())));
    Ok(())
}

#[test]
fn delete_and_commit_removes_entry() -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = TestContext::new()?;
    ctx.seed(vec![author(1, "X")])?;

    let mut scope = ctx.scope();
    scope.load(&ctx.store, &Query::all("Author"), TrackingMode::Tracked)?;
    scope.mark_deleted(&author_id(1))?;
    assert_eq!(scope.current_state(&author_id(1))?, EntityState::Deleted);

    let result = scope.commit(&mut ctx.store)?;
    assert!(result.is_success());
    assert!(scope.is_empty());
    assert_eq!(scope.current_state(&author_id(1))?, EntityState::Detached);
    assert_eq!(ctx.stored(&author_id(1))?, None);
    Ok(())
}

#[test]
fn committed_inserts_are_visible_to_new_scopes() -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = TestContext::new()?;
    let mut scope = ctx.scope();
    scope.mark_added(author(1, "Ann"))?;
    scope.mark_added(post(1, 1, "Hello"))?;
    assert!(scope.commit(&mut ctx.store)?.is_success());
    assert_eq!(scope.current_state(&post_id(1))?, EntityState::Unchanged);

    let mut fresh = ctx.scope();
    let posts = fresh.load(&ctx.store, &Query::all("Post").filter_eq("author_id", 1), TrackingMode::Tracked)?;
    assert_eq!(posts, vec![post(1, 1, "Hello")]);
    Ok(())
}

#[test]
fn generated_keys_survive_commit() -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = TestContext::new()?;
    let mut scope = ctx.scope();
    let tag = scope.mark_added(Record::new("Tag").with("label", "rust"))?;
    assert!(scope.commit(&mut ctx.store)?.is_success());

    let stored = ctx.stored(&tag)?.ok_or("tag missing")?;
    assert_eq!(stored.get("label"), Some(&FieldValue::Text("rust".into())));
    assert_eq!(stored.get("id"), tag.key.first());
    Ok(())
}

#[test]
fn commit_without_changes_does_not_touch_store() -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = TestContext::new()?;
    ctx.seed(vec![author(1, "Ann")])?;
    let batches = ctx.store.batch_count()?;

    let mut scope = ctx.scope();
    scope.load(&ctx.store, &Query::all("Author"), TrackingMode::Tracked)?;
    let result = scope.commit(&mut ctx.store)?;
    assert!(result.is_empty());
    assert_eq!(result.batch_id, None);
    assert_eq!(ctx.store.batch_count()?, batches);
    Ok(())
}

#[test]
fn file_backed_commit_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = TestContext::file_backed()?;
    ctx.seed(vec![author(1, "Ann"), post(1, 1, "Hello")])?;

    let mut scope = ctx.scope();
    scope.load(&ctx.store, &Query::all("Post"), TrackingMode::Tracked)?;
    scope.set_field(&post_id(1), "title", "Edited")?;
    assert!(scope.commit(&mut ctx.store)?.is_success());

    ctx.reopen()?;
    let stored = ctx.stored(&post_id(1))?.ok_or("post missing")?;
    assert_eq!(stored.get("title"), Some(&FieldValue::Text("Edited".into())));
    assert_eq!(ctx.store.count("Author")?, 1);
    Ok(())
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn atomic_failure_leaves_scope_untouched() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = FaultyStore::new(SqliteStore::open_in_memory(blog_model())?);
    store.reject(author_id(2), OperationFailure::new(FailureKind::Conflict, "injected"));
    let ctx = TestContext::new()?;

    let mut scope = ctx.scope();
    scope.mark_added(author(1, "Ann"))?;
    scope.mark_added(author(2, "Bo"))?;
    let result = scope.commit(&mut store)?;

    assert!(result.succeeded.is_empty());
    assert_eq!(result.failed.len(), 2);
    let kinds: Vec<FailureKind> = result
        .failed
        .iter()
        .filter_map(|f| f.failure().map(|failure| failure.kind))
        .collect();
    assert_eq!(kinds, vec![FailureKind::RolledBack, FailureKind::Conflict]);
    assert!(matches!(result.failed[1].error, TrackerError::StoreExecution { .. }));

    assert_eq!(scope.current_state(&author_id(1))?, EntityState::Added);
    assert_eq!(scope.current_state(&author_id(2))?, EntityState::Added);
    assert_eq!(store.inner().count("Author")?, 0);
    Ok(())
}

#[test]
fn per_operation_mode_applies_successes() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = FaultyStore::new(SqliteStore::open_in_memory(blog_model())?);
    store.reject(author_id(2), OperationFailure::new(FailureKind::Conflict, "injected"));
    let ctx = TestContext::with_config(per_operation())?;

    let mut scope = ctx.scope();
    scope.mark_added(author(1, "Ann"))?;
    scope.mark_added(author(2, "Bo"))?;
    scope.mark_added(author(3, "Cy"))?;
    let result = scope.commit(&mut store)?;

    assert_eq!(result.succeeded.len(), 2);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].identity, author_id(2));
    assert_eq!(scope.current_state(&author_id(1))?, EntityState::Unchanged);
    assert_eq!(scope.current_state(&author_id(2))?, EntityState::Added);
    assert_eq!(scope.current_state(&author_id(3))?, EntityState::Unchanged);
    assert_eq!(store.inner().count("Author")?, 2);

    // Nothing retries on its own; committing again after the fault clears does.
    store.clear_rejections();
    let retry = scope.commit(&mut store)?;
    assert_eq!(retry.succeeded.len(), 1);
    assert_eq!(store.inner().count("Author")?, 3);
    Ok(())
}

#[test]
fn unavailable_store_fails_every_operation() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = FaultyStore::new(SqliteStore::open_in_memory(blog_model())?);
    let ctx = TestContext::with_config(per_operation())?;
    let mut scope = ctx.scope();
    scope.mark_added(author(1, "Ann"))?;
    scope.mark_added(author(2, "Bo"))?;

    store.fail_next_batch("connection lost");
    let result = scope.commit(&mut store)?;
    assert!(result.succeeded.is_empty());
    assert_eq!(result.failed.len(), 2);
    for failed in &result.failed {
        assert_eq!(failed.failure().map(|f| f.kind), Some(FailureKind::Store));
    }
    assert_eq!(scope.current_state(&author_id(1))?, EntityState::Added);

    assert!(scope.commit(&mut store)?.is_success());
    assert_eq!(store.batches_seen(), 2);
    Ok(())
}

#[test]
fn unavailable_store_fails_atomic_batch() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = FaultyStore::new(SqliteStore::open_in_memory(blog_model())?);
    let ctx = TestContext::new()?;
    let mut scope = ctx.scope();
    scope.mark_added(author(1, "Ann"))?;
    scope.mark_added(post(1, 1, "Hello"))?;

    store.fail_next_batch("cancelled");
    let result = scope.commit(&mut store)?;
    assert!(result.succeeded.is_empty());
    assert_eq!(result.failed.len(), 2);
    for failed in &result.failed {
        assert_eq!(failed.failure().map(|f| f.kind), Some(FailureKind::Store));
    }
    assert_eq!(scope.current_state(&author_id(1))?, EntityState::Added);
    assert_eq!(scope.current_state(&post_id(1))?, EntityState::Added);
    assert_eq!(store.inner().count("Author")?, 0);
    assert_eq!(store.inner().count("Post")?, 0);
    assert_eq!(store.inner().batch_count()?, 0);
    Ok(())
}

#[test]
fn duplicate_insert_is_a_conflict() -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = TestContext::new()?;
    ctx.seed(vec![author(1, "Ann")])?;

    let mut scope = ctx.scope();
    scope.mark_added(author(1, "Other Ann"))?;
    let result = scope.commit(&mut ctx.store)?;
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].failure().map(|f| f.kind), Some(FailureKind::Conflict));
    Ok(())
}

#[test]
fn dangling_reference_violates_constraint() -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = TestContext::new()?;
    let mut scope = ctx.scope();
    scope.mark_added(post(1, 99, "Orphan"))?;
    let result = scope.commit(&mut ctx.store)?;
    assert_eq!(
        result.failed[0].failure().map(|f| f.kind),
        Some(FailureKind::ConstraintViolation)
    );
    assert_eq!(ctx.stored(&post_id(1))?, None);
    Ok(())
}

#[test]
fn deleting_a_referenced_record_is_refused() -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = TestContext::new()?;
    ctx.seed(vec![author(1, "Ann"), post(1, 1, "Hello")])?;

    let mut scope = ctx.scope();
    scope.load(&ctx.store, &Query::all("Author"), TrackingMode::Tracked)?;
    scope.mark_deleted(&author_id(1))?;
    let result = scope.commit(&mut ctx.store)?;
    assert_eq!(
        result.failed[0].failure().map(|f| f.kind),
        Some(FailureKind::ConstraintViolation)
    );
    assert_eq!(scope.current_state(&author_id(1))?, EntityState::Deleted);
    assert!(ctx.stored(&author_id(1))?.is_some());
    Ok(())
}

#[test]
fn overlapping_scopes_surface_store_errors() -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = TestContext::new()?;
    ctx.seed(vec![author(1, "Ann")])?;

    let mut deleter = ctx.scope();
    let mut editor = ctx.scope();
    deleter.load(&ctx.store, &Query::all("Author"), TrackingMode::Tracked)?;
    editor.load(&ctx.store, &Query::all("Author"), TrackingMode::Tracked)?;

    deleter.mark_deleted(&author_id(1))?;
    assert!(deleter.commit(&mut ctx.store)?.is_success());

    editor.set_field(&author_id(1), "name", "Too late")?;
    let result = editor.commit(&mut ctx.store)?;
    let failed = result.failed.first().ok_or("expected a failure")?;
    assert_eq!(failed.failure().map(|f| f.kind), Some(FailureKind::NotFound));
    assert_eq!(editor.current_state(&author_id(1))?, EntityState::Modified);
    Ok(())
}

#[test]
fn reopening_an_in_memory_store_fails() -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = TestContext::new()?;
    assert!(matches!(ctx.reopen(), Err(StorageError::Unavailable(_))));
    Ok(())
}
