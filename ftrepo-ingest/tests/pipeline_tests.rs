//! End-to-end ingestion runs over in-memory fakes
//!
//! Each test drives a full orchestrator run and checks the documents it
//! writes plus the state of the fake blob store.

mod helpers;

use ftrepo_ingest::models::ItemOutcome;
use ftrepo_ingest::workflow::IngestOptions;
use ftrepo_ingest::RunError;
use helpers::{
    app_summaries, attachment, ipa, MemoryBlobStore, MemorySource, ScriptedBackend, ScriptedStore, TestEnv, CDN,
};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const IG_312: &str = "Instagram 312.0 with no ads";
const IG_311: &str = "Instagram 311.0 with no ads";
const BH_312: &str = "BHInstagram for Instagram 312.0";
const YT_19: &str = "YouTube 19.4 YTLite";

fn options(max_items: usize) -> IngestOptions {
    IngestOptions {
        max_items_per_source: max_items,
        max_concurrent_downloads: 2,
        ..IngestOptions::default()
    }
}

fn seeded_instagram(version: &str, filename: &str) -> serde_json::Value {
    json!({
        "name": "FTRepo",
        "identifier": "xyz.ftrepo",
        "apps": [{
            "name": "Instagram",
            "bundleIdentifier": "com.burbn.instagram",
            "version": version,
            "downloadURL": format!("{}/{}", CDN, filename),
            "iconURL": "https://icons.test/instagram.png",
            "developerName": "@ipa_drops",
            "versions": []
        }]
    })
}

#[tokio::test]
async fn test_new_items_are_published_to_both_documents() {
    // Given: an empty catalog and two announcements in one channel
    let env = TestEnv::new();
    let source = Arc::new(MemorySource::new().channel(
        "ipa_drops",
        vec![
            attachment("Instagram_312.ipa", IG_312, 1),
            attachment("YouTube_19.4.ipa", YT_19, 2),
        ],
    ));
    let blobs = Arc::new(MemoryBlobStore::new());
    let backend = Arc::new(
        ScriptedBackend::new()
            .answer(IG_312, "Instagram", "312.0", None, "com.burbn.instagram")
            .answer(YT_19, "YouTube", "19.4", None, "com.google.ios.youtube"),
    );

    // When: one run completes
    let report = env
        .orchestrator(source, blobs.clone(), backend.clone(), options(5))
        .run(CancellationToken::new())
        .await
        .expect("run should succeed");

    // Then: both entries are applied, uploaded and written
    assert_eq!(report.tally.applied_new, 2);
    assert_eq!(report.tally.failed(), 0);
    assert_eq!(report.catalog_size, 2);
    assert_eq!(report.derived_size, 2);
    assert_eq!(backend.call_count(), 2);
    assert!(blobs.contains("Instagram_312.ipa"));
    assert!(blobs.contains("YouTube_19.4.ipa"));

    let apps = env.read_apps();
    assert_eq!(
        app_summaries(&apps),
        vec![
            ("Instagram".to_string(), "com.burbn.instagram".to_string(), "312.0".to_string()),
            ("YouTube".to_string(), "com.google.ios.youtube".to_string(), "19.4".to_string()),
        ]
    );
    assert_eq!(apps["name"], "FTRepo");
    assert_eq!(
        apps["apps"][0]["downloadURL"],
        format!("{}/Instagram_312.ipa", CDN)
    );
    assert_eq!(apps["apps"][0]["developerName"], "@ipa_drops");
    assert!(apps["apps"][0]["localizedDescription"]
        .as_str()
        .unwrap()
        .starts_with("from @ipa_drops |\n"));

    let derived = env.read_derived();
    assert_eq!(derived["apps"].as_array().unwrap().len(), 2);
    assert_eq!(derived["news"], json!([]));
    assert!(env.cache_path().exists());
}

#[tokio::test]
async fn test_already_published_package_is_skipped_before_extraction() {
    // Given: the blob store already holds the announced package
    let env = TestEnv::new();
    let source = Arc::new(
        MemorySource::new().channel("ipa_drops", vec![attachment("Instagram_312.ipa", IG_312, 1)]),
    );
    let blobs = Arc::new(MemoryBlobStore::new().with_blob("Instagram_312.ipa"));
    let backend = Arc::new(ScriptedBackend::new().answer(
        IG_312,
        "Instagram",
        "312.0",
        None,
        "com.burbn.instagram",
    ));

    // When
    let report = env
        .orchestrator(source.clone(), blobs.clone(), backend.clone(), options(5))
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then: nothing was downloaded, inferred or uploaded
    assert_eq!(report.tally.skipped_duplicate, 1);
    assert_eq!(report.tally.applied(), 0);
    assert_eq!(source.download_count(), 0);
    assert_eq!(backend.call_count(), 0);
    assert_eq!(blobs.upload_count(), 0);
    assert_eq!(report.items[0].outcome, ItemOutcome::SkippedDuplicate);
}

#[tokio::test]
async fn test_older_version_is_rejected_without_upload() {
    // Given: the catalog holds 312.0 and 311.0 is announced
    let env = TestEnv::new();
    env.write_apps(&seeded_instagram("312.0", "Instagram_312.ipa"));
    let source = Arc::new(
        MemorySource::new().channel("ipa_drops", vec![attachment("Instagram_311.ipa", IG_311, 1)]),
    );
    let blobs = Arc::new(MemoryBlobStore::new().with_blob("Instagram_312.ipa"));
    let backend = Arc::new(ScriptedBackend::new().answer(
        IG_311,
        "Instagram",
        "311.0",
        None,
        "com.burbn.instagram",
    ));

    // When
    let report = env
        .orchestrator(source, blobs.clone(), backend, options(5))
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then
    assert_eq!(report.tally.rejected_stale, 1);
    assert_eq!(blobs.upload_count(), 0);
    assert!(!blobs.contains("Instagram_311.ipa"));
    assert_eq!(report.items[0].detail.as_deref(), Some("311.0 <= 312.0"));
    assert_eq!(app_summaries(&env.read_apps())[0].2, "312.0");
}

#[tokio::test]
async fn test_upgrade_replaces_entry_and_deletes_old_package() {
    // Given: a legacy record for 311.0 whose package name lives only in the URL
    let env = TestEnv::new();
    env.write_apps(&seeded_instagram("311.0", "Instagram_311.ipa"));
    let source = Arc::new(
        MemorySource::new().channel("ipa_drops", vec![attachment("Instagram_312.ipa", IG_312, 1)]),
    );
    let blobs = Arc::new(MemoryBlobStore::new().with_blob("Instagram_311.ipa"));
    let backend = Arc::new(ScriptedBackend::new().answer(
        IG_312,
        "Instagram",
        "312.0",
        None,
        "com.burbn.instagram",
    ));

    // When
    let report = env
        .orchestrator(source, blobs.clone(), backend, options(5))
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then: one entry at 312.0, icon carried over, old package gone
    assert_eq!(report.tally.applied_upgraded, 1);
    assert_eq!(report.tally.orphaned, 0);
    let apps = env.read_apps();
    assert_eq!(
        app_summaries(&apps),
        vec![(
            "Instagram".to_string(),
            "com.burbn.instagram".to_string(),
            "312.0".to_string()
        )]
    );
    assert_eq!(apps["apps"][0]["iconURL"], "https://icons.test/instagram.png");
    assert_eq!(apps["apps"][0]["fileName"], "Instagram_312.ipa");
    assert_eq!(blobs.deleted(), vec!["Instagram_311.ipa".to_string()]);
    assert_eq!(blobs.names(), vec!["Instagram_312.ipa".to_string()]);
}

#[tokio::test]
async fn test_extraction_failure_does_not_stop_other_items() {
    // Given: five announcements, one of which the service cannot answer
    let env = TestEnv::new();
    let descriptions: Vec<String> = (1..=5).map(|i| format!("Tool {} version 1.{}", i, i)).collect();
    let attachments = descriptions
        .iter()
        .enumerate()
        .map(|(i, d)| attachment(&format!("tool{}.ipa", i + 1), d, i as i64))
        .collect();
    let source = Arc::new(MemorySource::new().channel("ipa_drops", attachments));
    let blobs = Arc::new(MemoryBlobStore::new());
    let mut backend = ScriptedBackend::new();
    for (i, description) in descriptions.iter().enumerate() {
        if i == 2 {
            continue;
        }
        backend = backend.answer(
            description,
            &format!("Tool {}", i + 1),
            &format!("1.{}", i + 1),
            None,
            &format!("com.example.tool{}", i + 1),
        );
    }

    // When
    let report = env
        .orchestrator(source, blobs.clone(), Arc::new(backend), options(5))
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then
    assert_eq!(report.tally.applied_new, 4);
    assert_eq!(report.tally.extraction_failed, 1);
    assert_eq!(report.extractor.failures, 1);
    assert!(!blobs.contains("tool3.ipa"));
    let failures: Vec<_> = report.failures().map(|item| item.filename.as_str()).collect();
    assert_eq!(failures, vec!["tool3.ipa"]);
    assert_eq!(env.read_apps()["apps"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_identical_descriptions_share_one_inference_call() {
    // Given: the same announcement posted twice under different filenames
    let env = TestEnv::new();
    let source = Arc::new(MemorySource::new().channel(
        "ipa_drops",
        vec![
            attachment("Instagram_312.ipa", IG_312, 1),
            attachment("Instagram_312_mirror.ipa", IG_312, 2),
        ],
    ));
    let blobs = Arc::new(MemoryBlobStore::new());
    let backend = Arc::new(ScriptedBackend::new().answer(
        IG_312,
        "Instagram",
        "312.0",
        None,
        "com.burbn.instagram",
    ));

    // When
    let report = env
        .orchestrator(source, blobs.clone(), backend.clone(), options(5))
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then: the second item is answered from the cache and is not newer
    assert_eq!(backend.call_count(), 1);
    assert_eq!(report.extractor.cache_hits, 1);
    assert_eq!(report.tally.applied_new, 1);
    assert_eq!(report.tally.rejected_stale, 1);
    assert!(!blobs.contains("Instagram_312_mirror.ipa"));
}

#[tokio::test]
async fn test_fetch_failure_is_isolated() {
    // Given
    let env = TestEnv::new();
    let source = Arc::new(
        MemorySource::new()
            .channel(
                "ipa_drops",
                vec![
                    attachment("Instagram_312.ipa", IG_312, 1),
                    attachment("YouTube_19.4.ipa", YT_19, 2),
                ],
            )
            .failing_download("YouTube_19.4.ipa"),
    );
    let blobs = Arc::new(MemoryBlobStore::new());
    let backend = Arc::new(
        ScriptedBackend::new()
            .answer(IG_312, "Instagram", "312.0", None, "com.burbn.instagram")
            .answer(YT_19, "YouTube", "19.4", None, "com.google.ios.youtube"),
    );

    // When
    let report = env
        .orchestrator(source, blobs, backend.clone(), options(5))
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then: the failed item never reaches inference
    assert_eq!(report.tally.applied_new, 1);
    assert_eq!(report.tally.fetch_failed, 1);
    assert_eq!(backend.call_count(), 1);
    assert_eq!(report.catalog_size, 1);
}

#[tokio::test]
async fn test_cancelled_run_persists_nothing() {
    // Given: cancellation arrives while the first item is being inferred
    let env = TestEnv::new();
    let cancel = CancellationToken::new();
    let source = Arc::new(MemorySource::new().channel(
        "ipa_drops",
        vec![
            attachment("Instagram_312.ipa", IG_312, 1),
            attachment("YouTube_19.4.ipa", YT_19, 2),
        ],
    ));
    let blobs = Arc::new(MemoryBlobStore::new());
    let backend = Arc::new(
        ScriptedBackend::new()
            .answer(IG_312, "Instagram", "312.0", None, "com.burbn.instagram")
            .answer(YT_19, "YouTube", "19.4", None, "com.google.ios.youtube")
            .cancel_on_first_call(cancel.clone()),
    );

    // When
    let result = env
        .orchestrator(source, blobs.clone(), backend.clone(), options(5))
        .run(cancel)
        .await;

    // Then: no documents, no cache, no packages left behind
    assert!(matches!(result, Err(RunError::Cancelled)));
    assert_eq!(backend.call_count(), 1);
    assert!(!env.apps_path().exists());
    assert!(!env.derived_path().exists());
    assert!(!env.cache_path().exists());
    assert!(blobs.names().is_empty());
    assert_eq!(blobs.deleted(), vec!["Instagram_312.ipa".to_string()]);
}

#[tokio::test]
async fn test_entry_with_missing_package_is_dropped() {
    // Given: two catalog entries, only one of which still has its package
    let env = TestEnv::new();
    env.write_apps(&json!({
        "name": "FTRepo",
        "identifier": "xyz.ftrepo",
        "apps": [
            {
                "name": "Kept",
                "bundleIdentifier": "com.example.kept",
                "version": "1.0",
                "downloadURL": format!("{}/kept.ipa", CDN),
                "fileName": "kept.ipa"
            },
            {
                "name": "Gone",
                "bundleIdentifier": "com.example.gone",
                "version": "1.0",
                "downloadURL": format!("{}/gone.ipa", CDN),
                "fileName": "gone.ipa"
            }
        ]
    }));
    let source = Arc::new(MemorySource::new().channel("ipa_drops", Vec::new()));
    let blobs = Arc::new(MemoryBlobStore::new().with_blob("kept.ipa"));

    // When
    let report = env
        .orchestrator(source, blobs, Arc::new(ScriptedBackend::new()), options(5))
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then
    assert_eq!(report.tally.orphaned, 1);
    let names: Vec<_> = app_summaries(&env.read_apps())
        .into_iter()
        .map(|(name, _, _)| name)
        .collect();
    assert_eq!(names, vec!["Kept".to_string()]);
}

#[tokio::test]
async fn test_empty_blob_store_does_not_wipe_catalog() {
    // Given: catalog entries but a blob store that lists nothing
    let env = TestEnv::new();
    env.write_apps(&seeded_instagram("312.0", "Instagram_312.ipa"));
    let source = Arc::new(MemorySource::new().channel("ipa_drops", Vec::new()));

    // When
    let report = env
        .orchestrator(
            source,
            Arc::new(MemoryBlobStore::new()),
            Arc::new(ScriptedBackend::new()),
            options(5),
        )
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then
    assert_eq!(report.tally.orphaned, 0);
    assert_eq!(report.catalog_size, 1);
}

#[tokio::test]
async fn test_variant_gets_its_own_derived_identifier() {
    // Given: a stock build and a BHInstagram build sharing one bundle id
    let env = TestEnv::new();
    let source = Arc::new(MemorySource::new().channel(
        "ipa_drops",
        vec![
            attachment("Instagram_312.ipa", IG_312, 1),
            attachment("BHInstagram_312.ipa", BH_312, 2),
        ],
    ));
    let backend = Arc::new(
        ScriptedBackend::new()
            .answer(IG_312, "Instagram", "312.0", None, "com.burbn.instagram")
            .answer(BH_312, "Instagram", "312.0", Some("bhinstagram"), "com.burbn.instagram"),
    );

    // When
    let report = env
        .orchestrator(source, Arc::new(MemoryBlobStore::new()), backend, options(5))
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then: both slots exist; the variant label uses the registry spelling
    assert_eq!(report.tally.applied_new, 2);
    assert!(report.conflicts.is_empty());
    assert_eq!(
        app_summaries(&env.read_apps()),
        vec![
            ("Instagram".to_string(), "com.burbn.instagram".to_string(), "312.0".to_string()),
            (
                "Instagram (BHInstagram)".to_string(),
                "com.burbn.instagram".to_string(),
                "312.0".to_string()
            ),
        ]
    );

    let derived = env.read_derived();
    let ids: Vec<_> = app_summaries(&derived)
        .into_iter()
        .map(|(_, id, _)| id)
        .collect();
    assert_eq!(
        ids,
        vec![
            "com.burbn.instagram".to_string(),
            "com.burbn.instagram.bhinstagram".to_string()
        ]
    );
    assert_eq!(derived["apps"][1]["versions"][0]["buildVersion"], "312.0");
}

#[tokio::test]
async fn test_per_source_budget_limits_listing() {
    // Given: seven announcements and a budget of five
    let env = TestEnv::new();
    let mut backend = ScriptedBackend::new();
    let mut attachments = Vec::new();
    for i in 1..=7 {
        let description = format!("Tool {} version 2.{}", i, i);
        backend = backend.answer(
            &description,
            &format!("Tool {}", i),
            &format!("2.{}", i),
            None,
            &format!("com.example.tool{}", i),
        );
        attachments.push(attachment(&format!("tool{}.ipa", i), &description, i));
    }
    let source = Arc::new(MemorySource::new().channel("ipa_drops", attachments));
    let backend = Arc::new(backend);

    // When
    let report = env
        .orchestrator(source, Arc::new(MemoryBlobStore::new()), backend.clone(), options(5))
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then: only the five newest were considered
    assert_eq!(report.scan.attachments_listed, 5);
    assert_eq!(report.tally.applied_new, 5);
    assert_eq!(backend.call_count(), 5);
}

#[tokio::test]
async fn test_upload_failure_leaves_no_entry() {
    // Given
    let env = TestEnv::new();
    let source = Arc::new(
        MemorySource::new().channel("ipa_drops", vec![attachment("Instagram_312.ipa", IG_312, 1)]),
    );
    let blobs = Arc::new(MemoryBlobStore::new().failing_upload("Instagram_312.ipa"));
    let backend = Arc::new(ScriptedBackend::new().answer(
        IG_312,
        "Instagram",
        "312.0",
        None,
        "com.burbn.instagram",
    ));

    // When
    let report = env
        .orchestrator(source, blobs, backend, options(5))
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then
    assert_eq!(report.tally.upload_failed, 1);
    assert_eq!(report.catalog_size, 0);
    assert_eq!(env.read_apps()["apps"], json!([]));
}

#[tokio::test]
async fn test_topics_are_scanned_and_unavailable_sources_skipped() {
    // Given: a forum channel with two topics, one of them forbidden
    let env = TestEnv::new();
    let source = Arc::new(
        MemorySource::new()
            .channel("forum", Vec::new())
            .topic("forum", "instagram", vec![attachment("Instagram_312.ipa", IG_312, 1)])
            .topic("forum", "private", vec![attachment("YouTube_19.4.ipa", YT_19, 1)])
            .unavailable("forum/private"),
    );
    let backend = Arc::new(
        ScriptedBackend::new()
            .answer(IG_312, "Instagram", "312.0", None, "com.burbn.instagram")
            .answer(YT_19, "YouTube", "19.4", None, "com.google.ios.youtube"),
    );

    // When
    let report = env
        .orchestrator(source, Arc::new(MemoryBlobStore::new()), backend, options(5))
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then
    assert_eq!(report.scan.sources_scanned, 3);
    assert_eq!(report.scan.sources_unavailable, 1);
    assert_eq!(report.tally.applied_new, 1);
    assert_eq!(report.items[0].source, "forum/instagram");
    assert_eq!(env.read_apps()["apps"][0]["developerName"], "@forum");
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    // Given: a completed run
    let env = TestEnv::new();
    let source = Arc::new(
        MemorySource::new().channel("ipa_drops", vec![attachment("Instagram_312.ipa", IG_312, 1)]),
    );
    let blobs = Arc::new(MemoryBlobStore::new());
    let backend = Arc::new(ScriptedBackend::new().answer(
        IG_312,
        "Instagram",
        "312.0",
        None,
        "com.burbn.instagram",
    ));
    env.orchestrator(source.clone(), blobs.clone(), backend.clone(), options(5))
        .run(CancellationToken::new())
        .await
        .unwrap();
    let first = env.read_apps();

    // When: the same channel is ingested again
    let report = env
        .orchestrator(source, blobs.clone(), backend.clone(), options(5))
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then: the package is recognized and the catalog is unchanged
    assert_eq!(report.tally.skipped_duplicate, 1);
    assert_eq!(report.tally.applied(), 0);
    assert_eq!(backend.call_count(), 1);
    assert_eq!(blobs.upload_count(), 1);
    assert_eq!(env.read_apps(), first);
}

#[tokio::test]
async fn test_name_override_applies_by_bundle_identifier() {
    // Given
    let env = TestEnv::new();
    let source = Arc::new(
        MemorySource::new().channel("ipa_drops", vec![attachment("YouTube_19.4.ipa", YT_19, 1)]),
    );
    let backend = Arc::new(ScriptedBackend::new().answer(
        YT_19,
        "Youtube",
        "19.4",
        None,
        "com.google.ios.youtube",
    ));
    let mut opts = options(5);
    opts.name_overrides
        .insert("com.google.ios.youtube".to_string(), "YouTube".to_string());

    // When
    env.orchestrator(source, Arc::new(MemoryBlobStore::new()), backend, opts)
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then
    assert_eq!(app_summaries(&env.read_apps())[0].0, "YouTube");
}

#[tokio::test]
async fn test_unwritable_derived_document_rolls_back_the_run() {
    // Given: a seeded catalog and a derived path occupied by a non-empty directory
    let env = TestEnv::new();
    let seed = seeded_instagram("311.0", "Instagram_311.ipa");
    env.write_apps(&seed);
    std::fs::create_dir(env.derived_path()).unwrap();
    std::fs::write(env.derived_path().join("stray.json"), "{}").unwrap();

    let source = Arc::new(
        MemorySource::new().channel("ipa_drops", vec![attachment("Instagram_312.ipa", IG_312, 1)]),
    );
    let blobs = Arc::new(MemoryBlobStore::new().with_blob("Instagram_311.ipa"));
    let backend = Arc::new(ScriptedBackend::new().answer(
        IG_312,
        "Instagram",
        "312.0",
        None,
        "com.burbn.instagram",
    ));

    // When
    let result = env
        .orchestrator(source, blobs.clone(), backend, options(5))
        .run(CancellationToken::new())
        .await;

    // Then: the run fails, the primary document is the seed and the upload is gone
    assert!(matches!(result, Err(RunError::Persistence(_))));
    assert_eq!(env.read_apps(), seed);
    assert!(!env.dir.path().join("apps.json.tmp").exists());
    assert_eq!(blobs.names(), vec!["Instagram_311.ipa".to_string()]);
    assert_eq!(blobs.deleted(), vec!["Instagram_312.ipa".to_string()]);
}

#[tokio::test]
async fn test_unwritable_derived_document_leaves_no_primary_on_first_run() {
    // Given: no catalog yet and a derived path occupied by a non-empty directory
    let env = TestEnv::new();
    std::fs::create_dir(env.derived_path()).unwrap();
    std::fs::write(env.derived_path().join("stray.json"), "{}").unwrap();
    let source = Arc::new(
        MemorySource::new().channel("ipa_drops", vec![attachment("YouTube_19.4.ipa", YT_19, 1)]),
    );
    let blobs = Arc::new(MemoryBlobStore::new());
    let backend = Arc::new(ScriptedBackend::new().answer(
        YT_19,
        "YouTube",
        "19.4",
        None,
        "com.google.ios.youtube",
    ));

    // When
    let result = env
        .orchestrator(source, blobs.clone(), backend, options(5))
        .run(CancellationToken::new())
        .await;

    // Then
    assert!(result.is_err());
    assert!(!env.apps_path().exists());
    assert!(blobs.names().is_empty());
}

#[tokio::test]
async fn test_upgrade_keeps_app_level_presentation_fields() {
    // Given: a seeded app with fields the pipeline does not manage
    let env = TestEnv::new();
    let mut seed = seeded_instagram("311.0", "Instagram_311.ipa");
    seed["apps"][0]["tintColor"] = json!("c13584");
    seed["apps"][0]["subtitle"] = json!("Photos and reels");
    seed["apps"][0]["screenshots"] = json!(["https://icons.test/ig1.png"]);
    env.write_apps(&seed);

    let source = Arc::new(
        MemorySource::new().channel("ipa_drops", vec![attachment("Instagram_312.ipa", IG_312, 1)]),
    );
    let blobs = Arc::new(MemoryBlobStore::new().with_blob("Instagram_311.ipa"));
    let backend = Arc::new(ScriptedBackend::new().answer(
        IG_312,
        "Instagram",
        "312.0",
        None,
        "com.burbn.instagram",
    ));

    // When
    env.orchestrator(source, blobs, backend, options(5))
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then: the replacement entry carries them into both documents
    let apps = env.read_apps();
    let derived = env.read_derived();
    for app in [&apps["apps"][0], &derived["apps"][0]] {
        assert_eq!(app["version"], "312.0");
        assert_eq!(app["tintColor"], "c13584");
        assert_eq!(app["subtitle"], "Photos and reels");
        assert_eq!(app["screenshots"][0], "https://icons.test/ig1.png");
        assert_eq!(app["iconURL"], "https://icons.test/instagram.png");
    }
}

#[tokio::test]
async fn test_packages_are_downloaded_only_as_resolving_needs_them() {
    // Given: four queued items, one download at a time, and cancellation
    // arriving while the first item is resolved
    let env = TestEnv::new();
    let cancel = CancellationToken::new();
    let source = Arc::new(MemorySource::new().channel(
        "ipa_drops",
        vec![
            attachment("Instagram_312.ipa", IG_312, 1),
            attachment("YouTube_19.4.ipa", YT_19, 2),
            attachment("BH_312.ipa", BH_312, 3),
            attachment("Instagram_311.ipa", IG_311, 4),
        ],
    ));
    let backend = Arc::new(
        ScriptedBackend::new()
            .answer(IG_312, "Instagram", "312.0", None, "com.burbn.instagram")
            .cancel_on_first_call(cancel.clone()),
    );
    let opts = IngestOptions {
        max_items_per_source: 5,
        max_concurrent_downloads: 1,
        ..IngestOptions::default()
    };

    // When
    let result = env
        .orchestrator(source.clone(), Arc::new(MemoryBlobStore::new()), backend, opts)
        .run(cancel)
        .await;

    // Then: the queue was not drained into memory ahead of resolution
    assert!(matches!(result, Err(RunError::Cancelled)));
    assert!(source.download_count() <= 2, "downloaded {}", source.download_count());
}

#[tokio::test]
async fn test_package_plist_supplies_minimum_os_version() {
    // Given: a real archive whose bundle identifier differs from the inferred one
    let env = TestEnv::new();
    let source = Arc::new(
        MemorySource::new()
            .channel("ipa_drops", vec![attachment("Instagram_312.ipa", IG_312, 1)])
            .contents("Instagram_312.ipa", ipa("com.resigned.instagram", "312.0", "15.1")),
    );
    let backend = Arc::new(ScriptedBackend::new().answer(
        IG_312,
        "Instagram",
        "312.0",
        None,
        "com.burbn.instagram",
    ));

    // When
    env.orchestrator(source, Arc::new(MemoryBlobStore::new()), backend, options(5))
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then: the inferred identifier is kept and the plist's minimum OS is published
    let apps = env.read_apps();
    assert_eq!(apps["apps"][0]["bundleIdentifier"], "com.burbn.instagram");
    assert_eq!(apps["apps"][0]["minOSVersion"], "15.1");
    assert_eq!(apps["apps"][0]["versions"][0]["minOSVersion"], "15.1");
    assert_eq!(env.read_derived()["apps"][0]["minOSVersion"], "15.1");
}

#[tokio::test]
async fn test_entry_without_icon_gets_one_from_the_app_store() {
    // Given: a new app with no icon anywhere and a store that knows it
    let env = TestEnv::new();
    let source = Arc::new(
        MemorySource::new().channel("ipa_drops", vec![attachment("YouTube_19.4.ipa", YT_19, 1)]),
    );
    let backend = Arc::new(ScriptedBackend::new().answer(
        YT_19,
        "YouTube",
        "19.4",
        None,
        "com.google.ios.youtube",
    ));
    let store = Arc::new(ScriptedStore::new().listing(
        "com.google.ios.youtube",
        "YouTube",
        "com.google.ios.youtube",
        "https://icons.test/youtube.png",
    ));

    // When
    env.orchestrator(source, Arc::new(MemoryBlobStore::new()), backend, options(5))
        .with_icon_resolver(env.icon_resolver(store.clone()))
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then: the icon is published and the lookup is cached for later runs
    assert_eq!(env.read_apps()["apps"][0]["iconURL"], "https://icons.test/youtube.png");
    assert_eq!(store.terms(), vec!["com.google.ios.youtube".to_string()]);
    let cache = helpers::read_json(&env.appstore_cache_path());
    assert_eq!(
        cache["com.google.ios.youtube:YouTube"]["icon"],
        "https://icons.test/youtube.png"
    );
}

#[tokio::test]
async fn test_existing_icon_is_kept_without_searching() {
    // Given: a seeded entry with an icon
    let env = TestEnv::new();
    env.write_apps(&seeded_instagram("311.0", "Instagram_311.ipa"));
    let source = Arc::new(
        MemorySource::new().channel("ipa_drops", vec![attachment("Instagram_312.ipa", IG_312, 1)]),
    );
    let backend = Arc::new(ScriptedBackend::new().answer(
        IG_312,
        "Instagram",
        "312.0",
        None,
        "com.burbn.instagram",
    ));
    let store = Arc::new(ScriptedStore::new());

    // When
    env.orchestrator(
        source,
        Arc::new(MemoryBlobStore::new().with_blob("Instagram_311.ipa")),
        backend,
        options(5),
    )
    .with_icon_resolver(env.icon_resolver(store.clone()))
    .run(CancellationToken::new())
    .await
    .unwrap();

    // Then
    assert_eq!(env.read_apps()["apps"][0]["iconURL"], "https://icons.test/instagram.png");
    assert!(store.terms().is_empty());
}

#[tokio::test]
async fn test_unreachable_app_store_does_not_block_publishing() {
    // Given
    let env = TestEnv::new();
    let source = Arc::new(
        MemorySource::new().channel("ipa_drops", vec![attachment("YouTube_19.4.ipa", YT_19, 1)]),
    );
    let backend = Arc::new(ScriptedBackend::new().answer(
        YT_19,
        "YouTube",
        "19.4",
        None,
        "com.google.ios.youtube",
    ));

    // When
    let report = env
        .orchestrator(source, Arc::new(MemoryBlobStore::new()), backend, options(5))
        .with_icon_resolver(env.icon_resolver(Arc::new(ScriptedStore::new().offline())))
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then: published without an icon, and the failure is not cached
    assert_eq!(report.tally.applied_new, 1);
    assert!(env.read_apps()["apps"][0].get("iconURL").is_none());
    assert!(!env.appstore_cache_path().exists());
}
