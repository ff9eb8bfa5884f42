//! Integration tests for the stores and GC trigger contracts, using
//! testcontainers. These tests start PostgreSQL in Docker and clean up when
//! the container handle drops.
//!
//! Run them with a local Docker daemon:
//! ```bash
//! cargo test -p stevedore-postgres --test stores_testcontainers -- --ignored
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use chrono::{Duration, Utc};
use common::{
    connect_again, create_blob, create_manifest, create_repository, digest_of, start_database,
};
use stevedore::{mediatype, MigrationStatus};
use stevedore_postgres::{
    schema, BlobStore, Error, GCBlobTaskStore, GCManifestTaskStore, ManifestStore, NamespaceStore,
    RepositoryStore, SortOrder, TagPagination, TagStore,
};

const DAY: i64 = 24 * 60 * 60;

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_namespace_create_or_find_is_idempotent() {
    let (_container, db) = start_database().await;
    let store = NamespaceStore::new();

    let first = store
        .create_or_find(db.client(), "gitlab-org")
        .await
        .unwrap();
    let second = store
        .create_or_find(db.client(), "gitlab-org")
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(store.count(db.client()).await.unwrap(), 1);

    let err = store.create(db.client(), "gitlab-org").await.unwrap_err();
    assert!(matches!(err, Error::UniqueViolation));
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_create_or_find_by_path_builds_parent_chain() {
    let (_container, db) = start_database().await;

    let repo = create_repository(&db, "gitlab-org/build/foo").await;
    assert_eq!(repo.path, "gitlab-org/build/foo");
    assert_eq!(repo.name, "foo");
    assert_eq!(repo.migration_status, MigrationStatus::Native);

    let store = RepositoryStore::new();
    let ancestors = store.ancestors(db.client(), &repo).await.unwrap();
    let paths: Vec<_> = ancestors.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["gitlab-org", "gitlab-org/build"]);

    let root = store
        .find_by_path(db.client(), "gitlab-org")
        .await
        .unwrap()
        .unwrap();
    let descendants = store.descendants(db.client(), &root).await.unwrap();
    let paths: Vec<_> = descendants.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["gitlab-org/build", "gitlab-org/build/foo"]);
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_create_or_find_resurrects_soft_deleted_repository() {
    let (_container, db) = start_database().await;
    let repo = create_repository(&db, "a/b").await;

    db.client()
        .execute(
            "UPDATE repositories SET deleted_at = now() WHERE id = $1",
            &[&repo.id],
        )
        .await
        .unwrap();

    let store = RepositoryStore::new();
    // soft-deleted rows are absent for reads
    assert!(store
        .find_by_path(db.client(), "a/b")
        .await
        .unwrap()
        .is_none());

    let revived = create_repository(&db, "a/b").await;
    assert_eq!(revived.id, repo.id);
    assert!(revived.deleted_at.is_none());
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_unknown_media_type_is_rejected() {
    let (_container, db) = start_database().await;
    let digest = digest_of("some blob");

    let err = BlobStore::new()
        .create(db.client(), &digest, "application/x-not-registered", 5)
        .await
        .unwrap_err();
    match err {
        Error::UnknownMediaType(mt) => assert_eq!(mt, "application/x-not-registered"),
        other => panic!("expected UnknownMediaType, got {other:?}"),
    }
}

// Scenario: enqueue and postpone on re-upload. One queue row per digest,
// review_after inside the jitter window, monotonically non-decreasing.
#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_blob_upload_enqueues_review_inside_jitter_window() {
    let (_container, db) = start_database().await;
    let store = GCBlobTaskStore::new();

    let t0 = Utc::now();
    let digest = create_blob(&db, "blob-1", 42).await;
    let t1 = Utc::now();

    let tasks = store.find_all(db.client()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.digest, digest);
    assert_eq!(task.event, "blob_upload");
    assert_eq!(task.review_count, 0);
    assert!(task.review_after > t0 + Duration::seconds(DAY + 5));
    assert!(task.review_after < t1 + Duration::seconds(DAY + 60));

    // delete and re-create: still one row, review pushed forward, count kept
    let first_review_after = task.review_after;
    BlobStore::new().delete(db.client(), &digest).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    let t2 = Utc::now();
    create_blob(&db, "blob-1", 42).await;
    let t3 = Utc::now();

    let tasks = store.find_all(db.client()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.event, "blob_upload");
    assert_eq!(task.review_count, 0);
    assert!(task.review_after >= first_review_after);
    assert!(task.review_after > t2 + Duration::seconds(DAY + 5));
    assert!(task.review_after < t3 + Duration::seconds(DAY + 60));
}

// Scenario: cascaded blob review on manifest delete.
#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_manifest_delete_enqueues_config_blob_review() {
    let (_container, db) = start_database().await;
    let repo = create_repository(&db, "g/p").await;
    let config_digest = create_blob(&db, "config-blob", 1457).await;
    let manifest = create_manifest(&db, &repo, "manifest-payload", Some(&config_digest)).await;

    // the insert recorded the config link
    let row = db
        .client()
        .query_one(
            "SELECT COUNT(*) FROM gc_blobs_configurations WHERE digest = $1",
            &[&config_digest.to_string()],
        )
        .await
        .unwrap();
    assert_eq!(row.get::<_, i64>(0), 1);

    ManifestStore::new()
        .delete(db.client(), repo.namespace_id, repo.id, manifest.id)
        .await
        .unwrap();

    let tasks = GCBlobTaskStore::new().find_all(db.client()).await.unwrap();
    let task = tasks
        .iter()
        .find(|t| t.digest == config_digest)
        .expect("config blob review task");
    assert_eq!(task.event, "manifest_delete");
}

// Scenario: tag switch pushes the previous manifest into review.
#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_tag_switch_enqueues_previous_manifest() {
    let (_container, db) = start_database().await;
    let repo = create_repository(&db, "g/p").await;

    let t0 = Utc::now();
    let m1 = create_manifest(&db, &repo, "manifest-1", None).await;
    let m2 = create_manifest(&db, &repo, "manifest-2", None).await;
    let tag_store = TagStore::new();
    tag_store
        .create_or_update(db.client(), repo.namespace_id, repo.id, "latest", m1.id)
        .await
        .unwrap();
    tag_store
        .create_or_update(db.client(), repo.namespace_id, repo.id, "latest", m2.id)
        .await
        .unwrap();
    let ts = Utc::now();

    let tasks = GCManifestTaskStore::new()
        .find_all(db.client())
        .await
        .unwrap();
    let for_m1: Vec<_> = tasks.iter().filter(|t| t.manifest_id == m1.id).collect();
    assert_eq!(for_m1.len(), 1);
    let task = for_m1[0];
    assert_eq!(task.event, "tag_switch");
    // upsert keeps max(review_after); anchor the window across both events
    assert!(task.review_after > t0 + Duration::seconds(DAY + 5));
    assert!(task.review_after < ts + Duration::seconds(DAY + 60));
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_tag_delete_enqueues_manifest_only_while_it_exists() {
    let (_container, db) = start_database().await;
    let repo = create_repository(&db, "g/p").await;
    let manifest = create_manifest(&db, &repo, "manifest-1", None).await;
    let tag_store = TagStore::new();
    tag_store
        .create_or_update(db.client(), repo.namespace_id, repo.id, "latest", manifest.id)
        .await
        .unwrap();

    // direct tag delete: manifest still exists, event recorded
    tag_store
        .delete(db.client(), repo.namespace_id, repo.id, "latest")
        .await
        .unwrap();
    let tasks = GCManifestTaskStore::new()
        .find_all(db.client())
        .await
        .unwrap();
    let task = tasks
        .iter()
        .find(|t| t.manifest_id == manifest.id)
        .expect("manifest review task");
    assert_eq!(task.event, "tag_delete");

    // deleting the manifest cascades the queue row away
    ManifestStore::new()
        .delete(db.client(), repo.namespace_id, repo.id, manifest.id)
        .await
        .unwrap();
    assert_eq!(
        GCManifestTaskStore::new().count(db.client()).await.unwrap(),
        0
    );
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_layer_delete_cascade_enqueues_layer_blob() {
    let (_container, db) = start_database().await;
    let repo = create_repository(&db, "g/p").await;
    let layer_digest = create_blob(&db, "layer-blob", 2479).await;
    let manifest = create_manifest(&db, &repo, "manifest-1", None).await;
    ManifestStore::new()
        .associate_layer_blob(
            db.client(),
            &manifest,
            &layer_digest,
            2479,
            mediatype::DOCKER_LAYER,
        )
        .await
        .unwrap();

    ManifestStore::new()
        .delete(db.client(), repo.namespace_id, repo.id, manifest.id)
        .await
        .unwrap();

    let tasks = GCBlobTaskStore::new().find_all(db.client()).await.unwrap();
    let task = tasks
        .iter()
        .find(|t| t.digest == layer_digest)
        .expect("layer blob review task");
    assert_eq!(task.event, "layer_delete");
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_deleting_referenced_child_manifest_fails() {
    let (_container, db) = start_database().await;
    let repo = create_repository(&db, "g/p").await;
    let child = create_manifest(&db, &repo, "child", None).await;
    let parent = create_manifest(&db, &repo, "parent-list", None).await;
    let store = ManifestStore::new();
    store
        .associate_manifest(db.client(), repo.namespace_id, repo.id, parent.id, child.id)
        .await
        .unwrap();

    let err = store
        .delete(db.client(), repo.namespace_id, repo.id, child.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ManifestReferencedInList));

    // dissociating unblocks the delete, and the child lands in review
    store
        .dissociate_manifest(db.client(), repo.namespace_id, repo.id, parent.id, child.id)
        .await
        .unwrap();
    let digest = store
        .delete(db.client(), repo.namespace_id, repo.id, child.id)
        .await
        .unwrap();
    assert_eq!(digest, Some(child.digest));
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_associate_manifest_rejects_self_and_missing_child() {
    let (_container, db) = start_database().await;
    let repo = create_repository(&db, "g/p").await;
    let parent = create_manifest(&db, &repo, "parent-list", None).await;
    let store = ManifestStore::new();

    let err = store
        .associate_manifest(db.client(), repo.namespace_id, repo.id, parent.id, parent.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SelfReferencedManifest));

    let err = store
        .associate_manifest(db.client(), repo.namespace_id, repo.id, parent.id, 424_242)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RefManifestNotFound));
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_disabled_trigger_suppresses_enqueue() {
    let (_container, db) = start_database().await;

    schema::disable_trigger(db.client(), schema::GCTrigger::BlobUploads)
        .await
        .unwrap();
    create_blob(&db, "quiet-blob", 1).await;
    assert_eq!(GCBlobTaskStore::new().count(db.client()).await.unwrap(), 0);

    schema::enable_trigger(db.client(), schema::GCTrigger::BlobUploads)
        .await
        .unwrap();
    create_blob(&db, "loud-blob", 1).await;
    assert_eq!(GCBlobTaskStore::new().count(db.client()).await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_find_all_paginated_skips_empty_repositories() {
    let (_container, db) = start_database().await;
    let store = RepositoryStore::new();

    let full = create_repository(&db, "a/full").await;
    create_repository(&db, "a/empty").await;
    let also_full = create_repository(&db, "b/full").await;
    create_manifest(&db, &full, "m-1", None).await;
    create_manifest(&db, &also_full, "m-2", None).await;

    let page = store.find_all_paginated(db.client(), 10, "").await.unwrap();
    let paths: Vec<_> = page.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["a/full", "b/full"]);

    let page = store
        .find_all_paginated(db.client(), 10, "a/full")
        .await
        .unwrap();
    let paths: Vec<_> = page.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["b/full"]);

    assert_eq!(store.count_after_path(db.client(), "").await.unwrap(), 2);
    assert_eq!(
        store.count_after_path(db.client(), "a/full").await.unwrap(),
        1
    );
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_tag_pagination_six_modes() {
    let (_container, db) = start_database().await;
    let repo = create_repository(&db, "g/p").await;
    let manifest = create_manifest(&db, &repo, "m", None).await;
    let tag_store = TagStore::new();
    for name in ["a", "b", "c", "d", "e"] {
        tag_store
            .create_or_update(db.client(), repo.namespace_id, repo.id, name, manifest.id)
            .await
            .unwrap();
    }
    let store = RepositoryStore::new();
    let names = |tags: Vec<stevedore::Tag>| -> Vec<String> {
        tags.into_iter().map(|t| t.name).collect()
    };

    let page = |sort, last: Option<&str>, before: Option<&str>| TagPagination {
        limit: 2,
        sort,
        last: last.map(String::from),
        before: before.map(String::from),
        name: None,
    };

    // ascending: first page, after marker, before marker
    let tags = store
        .tags_paginated(db.client(), &repo, &page(SortOrder::Asc, None, None))
        .await
        .unwrap();
    assert_eq!(names(tags), vec!["a", "b"]);
    let tags = store
        .tags_paginated(db.client(), &repo, &page(SortOrder::Asc, Some("b"), None))
        .await
        .unwrap();
    assert_eq!(names(tags), vec!["c", "d"]);
    let tags = store
        .tags_paginated(db.client(), &repo, &page(SortOrder::Asc, None, Some("c")))
        .await
        .unwrap();
    assert_eq!(names(tags), vec!["a", "b"]);

    // descending: first page, after marker, before marker
    let tags = store
        .tags_paginated(db.client(), &repo, &page(SortOrder::Desc, None, None))
        .await
        .unwrap();
    assert_eq!(names(tags), vec!["e", "d"]);
    let tags = store
        .tags_paginated(db.client(), &repo, &page(SortOrder::Desc, Some("d"), None))
        .await
        .unwrap();
    assert_eq!(names(tags), vec!["c", "b"]);
    let tags = store
        .tags_paginated(db.client(), &repo, &page(SortOrder::Desc, None, Some("c")))
        .await
        .unwrap();
    assert_eq!(names(tags), vec!["e", "d"]);
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_tag_partial_match_escapes_like_metacharacters() {
    let (_container, db) = start_database().await;
    let repo = create_repository(&db, "g/p").await;
    let manifest = create_manifest(&db, &repo, "m", None).await;
    let tag_store = TagStore::new();
    for name in ["v1.0", "v1_0", "v100", "50-percent", "50percent"] {
        tag_store
            .create_or_update(db.client(), repo.namespace_id, repo.id, name, manifest.id)
            .await
            .unwrap();
    }
    let store = RepositoryStore::new();

    // a literal underscore matches only itself, not any character
    let tags = store
        .tags_paginated(
            db.client(),
            &repo,
            &TagPagination {
                name: Some("v1_0".to_string()),
                ..TagPagination::default()
            },
        )
        .await
        .unwrap();
    let names: Vec<_> = tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["v1_0"]);

    assert_eq!(
        store
            .tags_count(db.client(), &repo, Some("v1"))
            .await
            .unwrap(),
        3
    );
    assert_eq!(store.tags_count(db.client(), &repo, None).await.unwrap(), 5);
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_size_counts_only_tagged_manifests() {
    let (_container, db) = start_database().await;
    let repo = create_repository(&db, "g/p").await;
    let store = RepositoryStore::new();

    // linked blobs alone contribute nothing
    let loose = create_blob(&db, "loose-blob", 1000).await;
    store.link_blob(db.client(), &repo, &loose).await.unwrap();
    assert_eq!(store.size(db.client(), &repo).await.unwrap(), 0);

    // two manifests sharing one layer, both tagged: deduplicated sum
    let shared = create_blob(&db, "shared-layer", 100).await;
    let only_m2 = create_blob(&db, "m2-layer", 11).await;
    let m1 = create_manifest(&db, &repo, "m-1", None).await;
    let m2 = create_manifest(&db, &repo, "m-2", None).await;
    let manifest_store = ManifestStore::new();
    manifest_store
        .associate_layer_blob(db.client(), &m1, &shared, 100, mediatype::DOCKER_LAYER)
        .await
        .unwrap();
    manifest_store
        .associate_layer_blob(db.client(), &m2, &shared, 100, mediatype::DOCKER_LAYER)
        .await
        .unwrap();
    manifest_store
        .associate_layer_blob(db.client(), &m2, &only_m2, 11, mediatype::DOCKER_LAYER)
        .await
        .unwrap();

    let tag_store = TagStore::new();
    tag_store
        .create_or_update(db.client(), repo.namespace_id, repo.id, "one", m1.id)
        .await
        .unwrap();
    assert_eq!(store.size(db.client(), &repo).await.unwrap(), 100);

    tag_store
        .create_or_update(db.client(), repo.namespace_id, repo.id, "two", m2.id)
        .await
        .unwrap();
    assert_eq!(store.size(db.client(), &repo).await.unwrap(), 111);
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_size_follows_manifest_list_references() {
    let (_container, db) = start_database().await;
    let repo = create_repository(&db, "g/p").await;
    let store = RepositoryStore::new();
    let manifest_store = ManifestStore::new();

    let layer = create_blob(&db, "child-layer", 77).await;
    let child = create_manifest(&db, &repo, "child", None).await;
    manifest_store
        .associate_layer_blob(db.client(), &child, &layer, 77, mediatype::DOCKER_LAYER)
        .await
        .unwrap();
    let list = create_manifest(&db, &repo, "list", None).await;
    manifest_store
        .associate_manifest(db.client(), repo.namespace_id, repo.id, list.id, child.id)
        .await
        .unwrap();

    // untagged list: nothing reachable
    assert_eq!(store.size(db.client(), &repo).await.unwrap(), 0);

    TagStore::new()
        .create_or_update(db.client(), repo.namespace_id, repo.id, "latest", list.id)
        .await
        .unwrap();
    assert_eq!(store.size(db.client(), &repo).await.unwrap(), 77);
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_size_with_descendants_and_estimates() {
    let (_container, db) = start_database().await;
    let store = RepositoryStore::new();
    let manifest_store = ManifestStore::new();

    let root = create_repository(&db, "g").await;
    let nested = create_repository(&db, "g/p").await;
    let layer = create_blob(&db, "nested-layer", 123).await;
    let manifest = create_manifest(&db, &nested, "m", None).await;
    manifest_store
        .associate_layer_blob(db.client(), &manifest, &layer, 123, mediatype::DOCKER_LAYER)
        .await
        .unwrap();
    TagStore::new()
        .create_or_update(db.client(), nested.namespace_id, nested.id, "t", manifest.id)
        .await
        .unwrap();

    assert_eq!(
        store.size_with_descendants(db.client(), &root).await.unwrap(),
        123
    );
    assert_eq!(
        store
            .size_with_descendants(db.client(), &nested)
            .await
            .unwrap(),
        123
    );

    // estimates ignore tagging but exist only for the root
    assert_eq!(
        store
            .estimated_size_with_descendants(db.client(), &root)
            .await
            .unwrap(),
        123
    );
    let err = store
        .estimated_size_with_descendants(db.client(), &nested)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OnlyRootEstimates));
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_rename_moves_subtree_paths() {
    let (_container, db) = start_database().await;
    let store = RepositoryStore::new();

    let repo = create_repository(&db, "g/old").await;
    create_repository(&db, "g/old/a").await;
    create_repository(&db, "g/old/a/b").await;

    let renamed = store
        .rename(db.client(), &repo, "g/new", "new")
        .await
        .unwrap();
    assert_eq!(renamed.path, "g/new");
    assert_eq!(renamed.name, "new");

    let changed = store
        .rename_path_for_sub_repositories(db.client(), repo.namespace_id, "g/old", "g/new")
        .await
        .unwrap();
    assert_eq!(changed, 2);

    let moved = store
        .find_by_path(db.client(), "g/new/a/b")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved.name, "b");
    assert!(store
        .find_by_path(db.client(), "g/old/a")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_transactor_composes_store_calls() {
    let (container, mut db) = start_database().await;

    // rolled-back work is invisible
    {
        let tx = db.begin(None).await.unwrap();
        RepositoryStore::new()
            .create_or_find_by_path(tx.client(), &"t/rolled-back".parse().unwrap())
            .await
            .unwrap();
        tx.rollback().await.unwrap();
    }
    assert!(RepositoryStore::new()
        .find_by_path(db.client(), "t/rolled-back")
        .await
        .unwrap()
        .is_none());

    // committed work is visible from another connection
    {
        let tx = db.begin(None).await.unwrap();
        RepositoryStore::new()
            .create_or_find_by_path(tx.client(), &"t/committed".parse().unwrap())
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }
    let other = connect_again(&container).await;
    assert!(RepositoryStore::new()
        .find_by_path(other.client(), "t/committed")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_skip_locked_dequeue_hands_out_distinct_tasks() {
    let (container, mut db) = start_database().await;
    let mut other = connect_again(&container).await;
    let store = GCBlobTaskStore::new();

    create_blob(&db, "task-blob-1", 1).await;
    create_blob(&db, "task-blob-2", 2).await;
    // make both tasks due immediately
    db.client()
        .execute(
            "UPDATE gc_blob_review_queue SET review_after = now() - interval '1 second'",
            &[],
        )
        .await
        .unwrap();

    let tx1 = db.begin(None).await.unwrap();
    let first = store.next(tx1.client()).await.unwrap().unwrap();

    let tx2 = other.begin(None).await.unwrap();
    let second = store.next(tx2.client()).await.unwrap().unwrap();

    // the second worker skipped the locked row
    assert_ne!(first.digest, second.digest);

    tx1.rollback().await.unwrap();
    tx2.rollback().await.unwrap();
}
