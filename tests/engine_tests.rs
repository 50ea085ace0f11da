//! Engine-level tests: leases, block commits, conditions and listings,
//! evaluated at explicit instants.

mod common;

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

use azurite_core::conditions::ConditionalHeaders;
use azurite_core::engine::{
    AppendBlockOptions, BlobCreateOptions, DeleteSnapshots, ListBlobsOptions,
    ListContainersOptions,
};
use azurite_core::lease::LeaseState;
use azurite_core::models::{BlockListEntry, BlockListType, BlockSource, PublicAccessLevel};
use azurite_core::{
    AccessConditions, BlobEngine, ErrorCode, FsExtentStore, LeaseAction, MemoryMetadataStore,
    MetadataStore, DEFAULT_ACCOUNT,
};
use common::{at, blob_ref, block_id, create_container, memory_engine, put_blob, read_all};

fn acquire(duration: i64, id: &str) -> LeaseAction {
    LeaseAction::Acquire {
        duration,
        proposed_id: Some(id.to_string()),
    }
}

#[tokio::test]
async fn test_lease_acquire_renew_release() {
    let engine = memory_engine();
    create_container(&engine, "leases").await;
    let blob = blob_ref("leases", "held.txt");
    put_blob(&engine, &at(0), &blob, "content").await;
    let none = ConditionalHeaders::default();

    let acquired = engine
        .blob_lease(&at(1), &blob, &acquire(30, "lease-a"), &none)
        .await
        .unwrap();
    assert_eq!(acquired.outcome.lease_id.as_deref(), Some("lease-a"));

    let err = engine
        .blob_lease(
            &at(2),
            &blob,
            &LeaseAction::Renew {
                lease_id: "stale".to_string(),
            },
            &none,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::LeaseIdMismatchWithLeaseOperation);

    engine
        .blob_lease(
            &at(3),
            &blob,
            &LeaseAction::Renew {
                lease_id: "lease-a".to_string(),
            },
            &none,
        )
        .await
        .unwrap();
    engine
        .blob_lease(
            &at(4),
            &blob,
            &LeaseAction::Release {
                lease_id: "lease-a".to_string(),
            },
            &none,
        )
        .await
        .unwrap();

    let props = engine
        .get_blob_properties(&at(5), &blob, "", &AccessConditions::default())
        .await
        .unwrap();
    assert_eq!(props.lease.state(at(5).now), LeaseState::Available);
}

#[tokio::test]
async fn test_lease_changes_etag_but_not_last_modified() {
    let engine = memory_engine();
    create_container(&engine, "leases").await;
    let blob = blob_ref("leases", "etag.txt");
    put_blob(&engine, &at(0), &blob, "content").await;
    let before = engine
        .get_blob_properties(&at(0), &blob, "", &AccessConditions::default())
        .await
        .unwrap();

    let response = engine
        .blob_lease(&at(10), &blob, &acquire(-1, "lease-a"), &ConditionalHeaders::default())
        .await
        .unwrap();
    assert_ne!(response.etag, before.properties.etag);
    assert_eq!(response.last_modified, before.properties.last_modified);
}

#[tokio::test]
async fn test_lease_expiry_is_derived_from_time() {
    let engine = memory_engine();
    create_container(&engine, "leases").await;
    let blob = blob_ref("leases", "expiring.txt");
    put_blob(&engine, &at(0), &blob, "content").await;
    let none = ConditionalHeaders::default();

    engine
        .blob_lease(&at(0), &blob, &acquire(15, "lease-a"), &none)
        .await
        .unwrap();

    // Still held: writes need the id.
    let err = engine
        .set_blob_metadata(&at(10), &blob, HashMap::new(), &AccessConditions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::LeaseIdMissing);

    // After the duration the lease is expired without any timer firing.
    let err = engine
        .blob_lease(
            &at(16),
            &blob,
            &LeaseAction::Change {
                lease_id: "lease-a".to_string(),
                proposed_id: "lease-b".to_string(),
            },
            &none,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::LeaseNotPresentWithLeaseOperation);

    let err = engine
        .set_blob_metadata(&at(16), &blob, HashMap::new(), &AccessConditions::lease("lease-a"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::LeaseLost);

    let reacquired = engine
        .blob_lease(&at(17), &blob, &acquire(20, "lease-c"), &none)
        .await
        .unwrap();
    assert_eq!(reacquired.outcome.lease_id.as_deref(), Some("lease-c"));
}

#[tokio::test]
async fn test_lease_break_period() {
    let engine = memory_engine();
    create_container(&engine, "leases").await;
    let blob = blob_ref("leases", "breaking.txt");
    put_blob(&engine, &at(0), &blob, "content").await;
    let none = ConditionalHeaders::default();

    engine
        .blob_lease(&at(0), &blob, &acquire(-1, "lease-a"), &none)
        .await
        .unwrap();
    let broken = engine
        .blob_lease(
            &at(1),
            &blob,
            &LeaseAction::Break {
                break_period: Some(10),
            },
            &none,
        )
        .await
        .unwrap();
    assert_eq!(broken.outcome.lease_time, Some(10));

    let err = engine
        .blob_lease(&at(5), &blob, &acquire(-1, "lease-a"), &none)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::LeaseIsBreakingAndCannotBeAcquired);

    // Once the break period passes anyone can acquire.
    engine
        .blob_lease(&at(12), &blob, &acquire(-1, "lease-b"), &none)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_container_lease_guards_delete() {
    let engine = memory_engine();
    create_container(&engine, "guarded").await;
    engine
        .container_lease(
            &at(1),
            DEFAULT_ACCOUNT,
            "guarded",
            &acquire(-1, "lease-a"),
            &ConditionalHeaders::default(),
        )
        .await
        .unwrap();

    let err = engine
        .delete_container(&at(2), DEFAULT_ACCOUNT, "guarded", &AccessConditions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::LeaseIdMissing);

    engine
        .delete_container(&at(3), DEFAULT_ACCOUNT, "guarded", &AccessConditions::lease("lease-a"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_commit_resolves_blocks_in_order() {
    let engine = memory_engine();
    create_container(&engine, "blocks").await;
    let blob = blob_ref("blocks", "assembled.bin");
    let (one, two) = (block_id("block-1"), block_id("block-2"));

    engine
        .stage_block(&at(0), &blob, &one, Bytes::from_static(b"aaa"), None, None)
        .await
        .unwrap();
    engine
        .stage_block(&at(0), &blob, &two, Bytes::from_static(b"bbbbb"), None, None)
        .await
        .unwrap();

    let committed = engine
        .commit_block_list(
            &at(1),
            &blob,
            &[BlockListEntry::latest(&one), BlockListEntry::latest(&two)],
            BlobCreateOptions::default(),
        )
        .await
        .unwrap();

    let sizes: Vec<_> = committed
        .committed_blocks
        .iter()
        .map(|b| (b.block_id.as_str(), b.size))
        .collect();
    assert_eq!(sizes, vec![(one.as_str(), 3), (two.as_str(), 5)]);
    assert_eq!(committed.properties.content_length, 8);
    assert_eq!(read_all(&engine, &at(2), &blob).await, b"aaabbbbb");
}

#[tokio::test]
async fn test_commit_subset_keeps_other_blocks_staged() {
    let engine = memory_engine();
    create_container(&engine, "blocks").await;
    let blob = blob_ref("blocks", "subset.bin");
    let (one, two) = (block_id("block-1"), block_id("block-2"));

    for (id, content) in [(&one, "first"), (&two, "second")] {
        engine
            .stage_block(&at(0), &blob, id, Bytes::from(content), None, None)
            .await
            .unwrap();
    }
    engine
        .commit_block_list(
            &at(1),
            &blob,
            &[BlockListEntry::latest(&two)],
            BlobCreateOptions::default(),
        )
        .await
        .unwrap();

    let listing = engine
        .get_block_list(&at(2), &blob, "", BlockListType::All, &AccessConditions::default())
        .await
        .unwrap();
    let committed: Vec<_> = listing.list.committed.iter().map(|b| b.block_id.as_str()).collect();
    let uncommitted: Vec<_> = listing.list.uncommitted.iter().map(|b| b.block_id.as_str()).collect();
    assert_eq!(committed, vec![two.as_str()]);
    assert_eq!(uncommitted, vec![one.as_str()]);

    // A later commit can still pick up the remaining block.
    engine
        .commit_block_list(
            &at(3),
            &blob,
            &[
                BlockListEntry::new(two.clone(), BlockSource::Committed),
                BlockListEntry::new(one.clone(), BlockSource::Uncommitted),
            ],
            BlobCreateOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(read_all(&engine, &at(4), &blob).await, b"secondfirst");
}

#[tokio::test]
async fn test_unresolved_block_fails_whole_commit() {
    let engine = memory_engine();
    create_container(&engine, "blocks").await;
    let blob = blob_ref("blocks", "missing.bin");
    let one = block_id("block-1");

    engine
        .stage_block(&at(0), &blob, &one, Bytes::from_static(b"data"), None, None)
        .await
        .unwrap();
    let err = engine
        .commit_block_list(
            &at(1),
            &blob,
            &[BlockListEntry::latest(&one), BlockListEntry::latest(block_id("block-9"))],
            BlobCreateOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidBlockList);

    // Nothing was committed and the staged block survives.
    let listing = engine
        .get_block_list(&at(2), &blob, "", BlockListType::All, &AccessConditions::default())
        .await
        .unwrap();
    assert!(listing.blob.is_none());
    assert_eq!(listing.list.uncommitted.len(), 1);
}

#[tokio::test]
async fn test_restage_replaces_block() {
    let engine = memory_engine();
    create_container(&engine, "blocks").await;
    let blob = blob_ref("blocks", "restaged.bin");
    let one = block_id("block-1");

    for content in ["old", "newer"] {
        engine
            .stage_block(&at(0), &blob, &one, Bytes::from(content), None, None)
            .await
            .unwrap();
    }

    let listing = engine
        .get_block_list(&at(1), &blob, "", BlockListType::Uncommitted, &AccessConditions::default())
        .await
        .unwrap();
    assert_eq!(listing.list.uncommitted.len(), 1);
    assert_eq!(listing.list.uncommitted[0].size, 5);

    engine
        .commit_block_list(&at(2), &blob, &[BlockListEntry::latest(&one)], BlobCreateOptions::default())
        .await
        .unwrap();
    assert_eq!(read_all(&engine, &at(3), &blob).await, b"newer");
}

#[tokio::test]
async fn test_empty_commit_creates_empty_blob() {
    let engine = memory_engine();
    create_container(&engine, "blocks").await;
    let blob = blob_ref("blocks", "empty.bin");

    let ctx = at(42);
    let committed = engine
        .commit_block_list(&ctx, &blob, &[], BlobCreateOptions::default())
        .await
        .unwrap();
    assert_eq!(committed.properties.content_length, 0);
    assert!(committed.committed_blocks.is_empty());
    assert_eq!(committed.properties.created_on, ctx.now);
    assert!(read_all(&engine, &at(43), &blob).await.is_empty());
}

#[tokio::test]
async fn test_md5_mismatch_does_not_stage() {
    let engine = memory_engine();
    create_container(&engine, "blocks").await;
    let blob = blob_ref("blocks", "checked.bin");
    let wrong = azurite_core::blocks::content_md5(b"other content");

    let err = engine
        .stage_block(
            &at(0),
            &blob,
            &block_id("block-1"),
            Bytes::from_static(b"content"),
            Some(&wrong),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Md5Mismatch);

    let err = engine
        .get_block_list(&at(1), &blob, "", BlockListType::All, &AccessConditions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BlobNotFound);
}

#[tokio::test]
async fn test_block_id_length_must_match_unless_loose() {
    let engine = memory_engine();
    create_container(&engine, "blocks").await;
    let blob = blob_ref("blocks", "lengths.bin");

    engine
        .stage_block(&at(0), &blob, &block_id("a"), Bytes::from_static(b"1"), None, None)
        .await
        .unwrap();
    let err = engine
        .stage_block(&at(0), &blob, &block_id("longer-id"), Bytes::from_static(b"2"), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidBlobOrBlock);

    let loose = memory_engine().with_loose(true);
    create_container(&loose, "blocks").await;
    loose
        .stage_block(&at(0), &blob, &block_id("a"), Bytes::from_static(b"1"), None, None)
        .await
        .unwrap();
    loose
        .stage_block(&at(0), &blob, &block_id("longer-id"), Bytes::from_static(b"2"), None, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_if_none_match_star() {
    let engine = memory_engine();
    create_container(&engine, "conditions").await;
    let blob = blob_ref("conditions", "once.txt");
    let options = || BlobCreateOptions {
        access: AccessConditions::when(ConditionalHeaders::if_none_match("*")),
        ..Default::default()
    };

    engine
        .put_blob(&at(0), &blob, Bytes::from_static(b"first"), None, options())
        .await
        .unwrap();
    let err = engine
        .put_blob(&at(1), &blob, Bytes::from_static(b"second"), None, options())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BlobAlreadyExists);
    assert_eq!(err.code.status_code().as_u16(), 409);
    assert_eq!(read_all(&engine, &at(2), &blob).await, b"first");
}

#[tokio::test]
async fn test_if_match_uses_current_etag() {
    let engine = memory_engine();
    create_container(&engine, "conditions").await;
    let blob = blob_ref("conditions", "versioned.txt");
    put_blob(&engine, &at(0), &blob, "v1").await;
    let etag = engine
        .get_blob_properties(&at(0), &blob, "", &AccessConditions::default())
        .await
        .unwrap()
        .properties
        .etag;

    let updated = engine
        .set_blob_metadata(
            &at(1),
            &blob,
            HashMap::from([("owner".to_string(), "me".to_string())]),
            &AccessConditions::when(ConditionalHeaders::if_match(etag.clone())),
        )
        .await
        .unwrap();
    assert_ne!(updated.properties.etag, etag);

    let err = engine
        .set_blob_metadata(
            &at(2),
            &blob,
            HashMap::new(),
            &AccessConditions::when(ConditionalHeaders::if_match(etag)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ConditionNotMet);
}

#[tokio::test]
async fn test_tag_condition() {
    let engine = memory_engine();
    create_container(&engine, "conditions").await;
    let blob = blob_ref("conditions", "tagged.txt");
    engine
        .put_blob(
            &at(0),
            &blob,
            Bytes::from_static(b"data"),
            None,
            BlobCreateOptions {
                tags: HashMap::from([("tag1".to_string(), "val1".to_string())]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let err = engine
        .set_blob_metadata(
            &at(1),
            &blob,
            HashMap::new(),
            &AccessConditions::when(ConditionalHeaders::if_tags("tag1<>'val1'")),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ConditionNotMet);
    assert_eq!(err.code.status_code().as_u16(), 412);

    engine
        .set_blob_metadata(
            &at(2),
            &blob,
            HashMap::new(),
            &AccessConditions::when(ConditionalHeaders::if_tags("tag1='val1'")),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_container_pagination_is_deterministic() {
    let engine = memory_engine();
    // Created out of order; listings come back sorted.
    for i in [7, 2, 9, 0, 4, 1, 8, 3, 6, 5] {
        create_container(&engine, &format!("page-{:02}", i)).await;
    }

    let mut seen = Vec::new();
    let mut sizes = Vec::new();
    let mut marker = None;
    for _ in 0..3 {
        let page = engine
            .list_containers(
                &at(1),
                DEFAULT_ACCOUNT,
                &ListContainersOptions {
                    prefix: None,
                    marker: marker.clone(),
                    max_results: Some(4),
                },
            )
            .await
            .unwrap();
        sizes.push(page.items().count());
        seen.extend(page.items().map(|c| c.name.clone()));
        marker = Some(page.next_marker.clone());
    }

    assert_eq!(sizes, vec![4, 4, 2]);
    assert_eq!(marker.as_deref(), Some(""));
    let expected: Vec<_> = (0..10).map(|i| format!("page-{:02}", i)).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_blob_pagination_with_delimiter() {
    let engine = memory_engine();
    create_container(&engine, "tree").await;
    for name in ["a/1", "a/2", "a/3", "b", "c/1", "d"] {
        put_blob(&engine, &at(0), &blob_ref("tree", name), "x").await;
    }

    let options = |marker: Option<String>| ListBlobsOptions {
        delimiter: Some("/".to_string()),
        marker,
        max_results: Some(2),
        ..Default::default()
    };

    let first = engine
        .list_blobs(&at(1), DEFAULT_ACCOUNT, "tree", &options(None))
        .await
        .unwrap();
    assert_eq!(first.prefixes().collect::<Vec<_>>(), vec!["a/"]);
    assert_eq!(
        first.items().map(|b| b.name.as_str()).collect::<Vec<_>>(),
        vec!["b"]
    );
    assert_eq!(first.next_marker, "b");

    let second = engine
        .list_blobs(&at(1), DEFAULT_ACCOUNT, "tree", &options(Some(first.next_marker)))
        .await
        .unwrap();
    assert_eq!(second.prefixes().collect::<Vec<_>>(), vec!["c/"]);
    assert_eq!(
        second.items().map(|b| b.name.as_str()).collect::<Vec<_>>(),
        vec!["d"]
    );
    assert!(second.is_last());
}

#[tokio::test]
async fn test_snapshots_survive_parent_writes() {
    let engine = memory_engine();
    create_container(&engine, "snaps").await;
    let blob = blob_ref("snaps", "doc.txt");
    put_blob(&engine, &at(0), &blob, "v1").await;

    let snapshot = engine
        .create_snapshot(&at(1), &blob, HashMap::new(), &AccessConditions::default())
        .await
        .unwrap();
    put_blob(&engine, &at(2), &blob, "v2").await;

    let download = engine
        .download_blob(&at(3), &blob, &snapshot.snapshot, None, &AccessConditions::default())
        .await
        .unwrap();
    assert_eq!(download.content_length(), 2);
    assert_eq!(read_all(&engine, &at(3), &blob).await, b"v2");

    let err = engine
        .delete_blob(&at(4), &blob, "", None, &AccessConditions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::SnapshotsPresent);

    engine
        .delete_blob(&at(5), &blob, "", Some(DeleteSnapshots::Only), &AccessConditions::default())
        .await
        .unwrap();
    assert!(engine
        .metadata()
        .list_snapshots(&blob)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(read_all(&engine, &at(6), &blob).await, b"v2");
}

#[tokio::test]
async fn test_find_blobs_by_tags() {
    let engine = memory_engine();
    create_container(&engine, "alpha").await;
    create_container(&engine, "beta").await;
    for (container, name, env) in [
        ("alpha", "one", "prod"),
        ("alpha", "two", "dev"),
        ("beta", "three", "prod"),
    ] {
        engine
            .put_blob(
                &at(0),
                &blob_ref(container, name),
                Bytes::from_static(b"x"),
                None,
                BlobCreateOptions {
                    tags: HashMap::from([("env".to_string(), env.to_string())]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let page = engine
        .find_blobs_by_tags(&at(1), DEFAULT_ACCOUNT, None, "env = 'prod'", None, Some(1))
        .await
        .unwrap();
    assert_eq!(page.blobs.len(), 1);
    assert_eq!(page.blobs[0].name, "one");
    assert_eq!(page.next_marker, "alpha/one");

    let rest = engine
        .find_blobs_by_tags(
            &at(1),
            DEFAULT_ACCOUNT,
            None,
            "env = 'prod'",
            Some(&page.next_marker),
            Some(1),
        )
        .await
        .unwrap();
    assert_eq!(rest.blobs[0].container, "beta");
    assert!(rest.next_marker.is_empty());

    let scoped = engine
        .find_blobs_by_tags(&at(1), DEFAULT_ACCOUNT, Some("alpha"), "env = 'dev'", None, None)
        .await
        .unwrap();
    assert_eq!(scoped.blobs.len(), 1);
    assert_eq!(scoped.blobs[0].name, "two");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_are_serialized() {
    let engine = Arc::new(memory_engine());
    create_container(&engine, "logs").await;
    let blob = blob_ref("logs", "append.log");
    engine
        .create_append_blob(&at(0), &blob, BlobCreateOptions::default())
        .await
        .unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let blob = blob.clone();
            tokio::spawn(async move {
                engine
                    .append_block(
                        &at(1),
                        &blob,
                        Bytes::from_static(b"0123456789"),
                        &AppendBlockOptions::default(),
                    )
                    .await
                    .map(|outcome| outcome.append_offset)
            })
        })
        .collect();

    let mut offsets = Vec::new();
    for task in tasks {
        offsets.push(task.await.unwrap().unwrap());
    }
    offsets.sort_unstable();
    let expected: Vec<u64> = (0..20).map(|i| i * 10).collect();
    assert_eq!(offsets, expected);

    let props = engine
        .get_blob_properties(&at(2), &blob, "", &AccessConditions::default())
        .await
        .unwrap();
    assert_eq!(props.properties.content_length, 200);
    assert_eq!(props.properties.committed_block_count, Some(20));
}

#[tokio::test]
async fn test_append_position_condition() {
    let engine = memory_engine();
    create_container(&engine, "logs").await;
    let blob = blob_ref("logs", "positioned.log");
    engine
        .create_append_blob(&at(0), &blob, BlobCreateOptions::default())
        .await
        .unwrap();

    let err = engine
        .append_block(
            &at(1),
            &blob,
            Bytes::from_static(b"abc"),
            &AppendBlockOptions {
                append_position: Some(5),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AppendPositionConditionNotMet);

    let err = engine
        .append_block(
            &at(1),
            &blob,
            Bytes::from_static(b"abc"),
            &AppendBlockOptions {
                max_size: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::MaxBlobSizeConditionNotMet);
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let metadata_path = dir.path().join("__blobstorage__.json");
    let extent_path = dir.path().join("__blobstorage__");
    let blob = blob_ref("durable", "kept.txt");

    {
        let engine = BlobEngine::new(
            Arc::new(MemoryMetadataStore::open(&metadata_path).await.unwrap()),
            Arc::new(FsExtentStore::new(extent_path.clone()).await.unwrap()),
        );
        engine
            .create_container(
                &at(0),
                DEFAULT_ACCOUNT,
                "durable",
                HashMap::new(),
                PublicAccessLevel::Blob,
            )
            .await
            .unwrap();
        put_blob(&engine, &at(1), &blob, "persisted content").await;
    }

    let engine = BlobEngine::new(
        Arc::new(MemoryMetadataStore::open(&metadata_path).await.unwrap()),
        Arc::new(FsExtentStore::new(extent_path).await.unwrap()),
    );
    let container = engine
        .get_container_properties(&at(2), DEFAULT_ACCOUNT, "durable", &AccessConditions::default())
        .await
        .unwrap();
    assert_eq!(container.properties.public_access, PublicAccessLevel::Blob);
    assert_eq!(read_all(&engine, &at(2), &blob).await, b"persisted content");
}
