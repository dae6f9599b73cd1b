mod common;

use common::{USER, context_for, last_notice, signed_in_backend};
use medlog::backend::memory::{Call, Failures};
use medlog::delete::{Answered, CLEAR_PROMPT, DELETE_PROMPT, DeleteOutcome};
use medlog::notify::NoticeKind;

#[tokio::test]
async fn blobs_are_removed_before_the_record() {
    let backend = signed_in_backend();
    let entry = backend.seed_entry(USER, "Ibuprofen", &["u1/a.png", "u1/b.png"], 20);
    backend.seed_blob("u1/a.png", b"a");
    backend.seed_blob("u1/b.png", b"b");
    let mut context = context_for(&backend).await;
    backend.clear_calls();

    let outcome = context
        .delete_entry(&entry.id, &mut Answered(true))
        .await
        .unwrap();

    assert_eq!(outcome, DeleteOutcome::Deleted { blob_error: None });
    let calls = backend.calls();
    assert_eq!(
        &calls[..3],
        &[
            Call::Fetch(entry.id.clone()),
            Call::Remove(vec!["u1/a.png".to_string(), "u1/b.png".to_string()]),
            Call::DeleteById(entry.id.clone()),
        ]
    );
    assert!(backend.blob_paths().is_empty());
    assert!(backend.rows().is_empty());
    assert!(context.list().entries().is_empty());
    assert_eq!(
        last_notice(&context),
        Some((NoticeKind::Success, "Entry deleted successfully!".to_string()))
    );
}

#[tokio::test]
async fn record_delete_still_runs_when_blob_removal_fails() {
    let backend = signed_in_backend();
    let entry = backend.seed_entry(USER, "Ibuprofen", &["u1/a.png"], 20);
    let mut context = context_for(&backend).await;
    backend.set_failures(Failures {
        remove: true,
        ..Failures::default()
    });
    backend.clear_calls();

    let outcome = context
        .delete_entry(&entry.id, &mut Answered(true))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        DeleteOutcome::Deleted {
            blob_error: Some(_)
        }
    ));
    assert!(backend.calls().contains(&Call::DeleteById(entry.id.clone())));
    assert!(backend.rows().is_empty());
}

#[tokio::test]
async fn entry_without_images_skips_blob_removal() {
    let backend = signed_in_backend();
    let entry = backend.seed_entry(USER, "Ibuprofen", &[], 20);
    let mut context = context_for(&backend).await;
    backend.clear_calls();

    context
        .delete_entry(&entry.id, &mut Answered(true))
        .await
        .unwrap();

    assert!(
        !backend
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Remove(_)))
    );
}

#[tokio::test]
async fn declined_confirmation_touches_nothing() {
    let backend = signed_in_backend();
    let entry = backend.seed_entry(USER, "Ibuprofen", &["u1/a.png"], 20);
    let mut context = context_for(&backend).await;
    backend.clear_calls();

    let mut prompts = Vec::new();
    let mut decline = |prompt: &str| {
        prompts.push(prompt.to_string());
        false
    };
    let outcome = context.delete_entry(&entry.id, &mut decline).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::Cancelled);

    let outcome = context.clear_all(&mut Answered(false)).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::Cancelled);

    assert_eq!(prompts, vec![DELETE_PROMPT.to_string()]);
    assert!(backend.calls().is_empty());
    assert_eq!(backend.rows().len(), 1);
}

#[tokio::test]
async fn failed_record_delete_is_an_error() {
    let backend = signed_in_backend();
    let entry = backend.seed_entry(USER, "Ibuprofen", &[], 20);
    let mut context = context_for(&backend).await;
    backend.set_failures(Failures {
        delete: true,
        ..Failures::default()
    });
    backend.clear_calls();

    assert!(
        context
            .delete_entry(&entry.id, &mut Answered(true))
            .await
            .is_err()
    );
    // No refresh after a failed delete; the row stays listed
    assert!(
        !backend
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Select(_)))
    );
    assert_eq!(context.list().entries().len(), 1);
    assert_eq!(
        last_notice(&context),
        Some((
            NoticeKind::Failure,
            "Failed to delete entry. Please try again.".to_string()
        ))
    );
}

#[tokio::test]
async fn clear_all_with_no_entries_succeeds_without_calls() {
    let backend = signed_in_backend();
    let mut context = context_for(&backend).await;
    backend.clear_calls();

    let outcome = context.clear_all(&mut Answered(true)).await.unwrap();

    assert_eq!(outcome, DeleteOutcome::Deleted { blob_error: None });
    assert!(backend.calls().is_empty());
    assert_eq!(
        last_notice(&context),
        Some((
            NoticeKind::Success,
            "All entries cleared successfully!".to_string()
        ))
    );
}

#[tokio::test]
async fn clear_all_removes_every_blob_in_one_call_then_the_rows() {
    let backend = signed_in_backend();
    backend.seed_entry(USER, "Ibuprofen", &["u1/a.png", "u1/b.png"], 20);
    backend.seed_entry(USER, "Aspirin", &["u1/c.jpg"], 10);
    backend.seed_entry("other", "Kept", &["other/d.jpg"], 10);
    let mut context = context_for(&backend).await;
    backend.clear_calls();

    let mut asked = None;
    let mut confirm = |prompt: &str| {
        asked = Some(prompt.to_string());
        true
    };
    context.clear_all(&mut confirm).await.unwrap();
    assert_eq!(asked.as_deref(), Some(CLEAR_PROMPT));

    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    match &calls[0] {
        Call::Remove(paths) => {
            let mut paths = paths.clone();
            paths.sort();
            assert_eq!(paths, vec!["u1/a.png", "u1/b.png", "u1/c.jpg"]);
        }
        other => panic!("expected a bulk blob removal, got {:?}", other),
    }
    assert_eq!(calls[1], Call::DeleteByOwner(USER.to_string()));

    assert!(context.list().entries().is_empty());
    let rows = backend.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].medicine_name, "Kept");
}

#[tokio::test]
async fn failed_clear_all_keeps_the_loaded_list() {
    let backend = signed_in_backend();
    backend.seed_entry(USER, "Ibuprofen", &["u1/a.png"], 20);
    let mut context = context_for(&backend).await;
    backend.set_failures(Failures {
        delete: true,
        ..Failures::default()
    });
    backend.clear_calls();

    assert!(context.clear_all(&mut Answered(true)).await.is_err());

    assert_eq!(context.list().entries().len(), 1);
    assert!(
        !backend
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Select(_)))
    );
    assert_eq!(
        last_notice(&context),
        Some((
            NoticeKind::Failure,
            "Failed to clear entries. Please try again.".to_string()
        ))
    );
}
