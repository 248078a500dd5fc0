//! End-to-end staging cycles: run, then post-backup
//!
//! Each test drives the orchestrator against a temp-dir configuration with
//! an in-memory snapshot provider.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use cli_lib::records::SnapshotRecordStore;
use cli_lib::{BackupResult, BackupType};
use common::StagingFixture;
use snapshot::{Origin, SnapshotProvider};
use stage_core::{SnapshotId, Stage, StageError, VolumeId};

fn records(fixture: &StagingFixture) -> SnapshotRecordStore {
    SnapshotRecordStore::open(&fixture.settings().state_dir())
}

#[tokio::test]
async fn incremental_cycle_stages_and_cleans_up() {
    let fixture = StagingFixture::new("");
    fixture.journal("C", &[r"\docs\a.txt", "/docs/b.txt", "/docs/a.txt"]);

    let report = fixture.orchestrator().run(BackupType::Incr).await.unwrap();
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(report.modules, 2);

    // Filter list: leaf first, ancestors once, single terminator
    assert_eq!(
        fixture.filter("C"),
        "+ /docs/a.txt\r\n+ /docs\r\n+ /docs/b.txt\r\n- *\r\n"
    );
    // D had no journal: exclude everything
    assert_eq!(fixture.filter("D"), "- *\r\n");

    // Journal and intermediate queue are both consumed
    assert_eq!(std::fs::metadata(fixture.queue_path("C", "txt")).unwrap().len(), 0);
    assert_eq!(std::fs::metadata(fixture.queue_path("C", "queue")).unwrap().len(), 0);

    // Both snapshots were created by this run and recorded
    let recorded = records(&fixture).load_all().unwrap();
    assert_eq!(recorded.len(), 2);
    for run in &report.volumes {
        let selection = run.selection.as_ref().unwrap();
        assert_eq!(selection.origin, Origin::Created);
        assert!(recorded[&run.volume].contains(&selection.snapshot.id));
    }

    let conf = fixture.rsyncd_conf();
    assert!(conf.contains("[VSSC]\n"));
    assert!(conf.contains("[VSSD]\n"));
    assert!(conf.contains("\tpath = /proc/sys/Device/created-"));
    assert!(conf.contains(&format!(
        "\tinclude from = {}\n",
        fixture.filter_path("C").display()
    )));

    let summary = fixture
        .orchestrator()
        .post_backup(BackupResult::Success)
        .await
        .unwrap();
    assert!(summary.failures.is_empty());
    assert_eq!(summary.volumes.iter().map(|v| v.deleted).sum::<usize>(), 2);
    assert!(fixture.provider.ids("C:").is_empty());
    assert!(fixture.provider.ids("D:").is_empty());
    assert!(records(&fixture).load_all().unwrap().is_empty());
}

#[tokio::test]
async fn fresh_foreign_snapshot_is_reused_and_never_deleted() {
    let fixture = StagingFixture::new("");
    fixture
        .provider
        .seed("C:", "foreign-fresh", Utc::now() - ChronoDuration::seconds(10));
    fixture
        .provider
        .seed("C:", "foreign-stale", Utc::now() - ChronoDuration::seconds(4000));

    let report = fixture.orchestrator().run(BackupType::Incr).await.unwrap();
    let c = report
        .volumes
        .iter()
        .find(|v| v.volume == VolumeId::new("C:"))
        .unwrap();
    let selection = c.selection.as_ref().unwrap();
    assert_eq!(selection.snapshot.id, SnapshotId::new("foreign-fresh"));
    assert_eq!(selection.origin, Origin::Existing);

    // Only D's newly created snapshot is on record
    let recorded = records(&fixture).load_all().unwrap();
    assert!(!recorded.contains_key(&VolumeId::new("C:")));
    assert_eq!(recorded[&VolumeId::new("D:")].len(), 1);

    fixture
        .orchestrator()
        .post_backup(BackupResult::Success)
        .await
        .unwrap();

    assert_eq!(fixture.provider.ids("C:"), vec!["foreign-fresh", "foreign-stale"]);
    assert!(fixture.provider.ids("D:").is_empty());
}

#[tokio::test]
async fn failing_volume_does_not_block_others() {
    let fixture = StagingFixture::new("");
    fixture.journal("C", &["/a.txt"]);
    fixture.journal("D", &["/b.txt"]);
    fixture.provider.fail_list("D:", true);

    let report = fixture.orchestrator().run(BackupType::Incr).await.unwrap();

    // D's pipeline still ran; only its snapshot step failed
    assert_eq!(fixture.filter("D"), "+ /b.txt\r\n- *\r\n");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].volume, VolumeId::new("D:"));
    assert_eq!(report.failures[0].stage, Stage::Snapshot);

    let conf = fixture.rsyncd_conf();
    assert!(conf.contains("[VSSC]"));
    assert!(!conf.contains("[VSSD]"));

    match report.into_result() {
        Err(StageError::Aggregate(failures)) => assert_eq!(failures.len(), 1),
        other => panic!("expected aggregate failure, got {:?}", other),
    }
}

#[tokio::test]
async fn refused_creation_is_reported_per_volume() {
    let fixture = StagingFixture::new("");
    fixture.provider.refuse_create("C:", true);

    let report = fixture.orchestrator().run(BackupType::Incr).await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].error.to_string().contains("insufficient storage"));
    let recorded = records(&fixture).load_all().unwrap();
    assert!(!recorded.contains_key(&VolumeId::new("C:")));
    assert!(recorded.contains_key(&VolumeId::new("D:")));
}

#[tokio::test]
async fn full_backup_omits_include_from() {
    let fixture = StagingFixture::new("");
    fixture.journal("C", &["/a.txt"]);

    let report = fixture.orchestrator().run(BackupType::Full).await.unwrap();
    assert!(report.failures.is_empty());

    // The queue pipeline still runs so the journal stays bounded
    assert_eq!(std::fs::metadata(fixture.queue_path("C", "txt")).unwrap().len(), 0);

    let conf = fixture.rsyncd_conf();
    assert!(conf.contains("[VSSC]"));
    assert!(!conf.contains("include from"));
}

#[tokio::test]
async fn incomplete_filter_keeps_volume_out_of_incremental_backup() {
    let fixture = StagingFixture::new("");
    fixture.journal("C", &["/a.txt"]);
    // A directory where the filter list should go makes the closure build fail
    std::fs::create_dir(fixture.filter_path("C")).unwrap();

    let report = fixture.orchestrator().run(BackupType::Incr).await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, Stage::Pipeline);
    // The drained entries survive in the intermediate queue for the next run
    assert_eq!(
        std::fs::read_to_string(fixture.queue_path("C", "queue")).unwrap(),
        "/a.txt\r\n"
    );

    let conf = fixture.rsyncd_conf();
    assert!(!conf.contains("[VSSC]"));
    assert!(conf.contains("[VSSD]"));
}

#[tokio::test]
async fn queue_kept_until_backup_succeeds() {
    let fixture = StagingFixture::new(r#"queue_retention = "keep-until-backup-succeeds""#);
    fixture.journal("C", &["/docs/a.txt"]);

    fixture.orchestrator().run(BackupType::Incr).await.unwrap();
    let intermediate = fixture.queue_path("C", "queue");
    assert_eq!(std::fs::read_to_string(&intermediate).unwrap(), "/docs/a.txt\r\n");

    fixture
        .orchestrator()
        .post_backup(BackupResult::Failed)
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(&intermediate).unwrap(), "/docs/a.txt\r\n");

    // The next run re-consolidates the kept entries with the new ones
    fixture.journal("C", &["/other.txt"]);
    fixture.orchestrator().run(BackupType::Incr).await.unwrap();
    assert_eq!(
        fixture.filter("C"),
        "+ /docs/a.txt\r\n+ /docs\r\n+ /other.txt\r\n- *\r\n"
    );

    let summary = fixture
        .orchestrator()
        .post_backup(BackupResult::Success)
        .await
        .unwrap();
    assert!(summary
        .volumes
        .iter()
        .find(|v| v.volume == VolumeId::new("C:"))
        .unwrap()
        .queue_cleared);
    assert_eq!(std::fs::metadata(&intermediate).unwrap().len(), 0);
}

#[tokio::test]
async fn failed_deletion_stays_on_record_for_retry() {
    let fixture = StagingFixture::new("");
    fixture.orchestrator().run(BackupType::Incr).await.unwrap();
    let created = records(&fixture).get(&VolumeId::new("C:")).unwrap();
    assert_eq!(created.len(), 1);

    fixture.provider.refuse_delete("C:", true);
    let summary = fixture
        .orchestrator()
        .post_backup(BackupResult::Success)
        .await
        .unwrap();
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].stage, Stage::Cleanup);
    assert_eq!(records(&fixture).get(&VolumeId::new("C:")).unwrap(), created);
    assert!(records(&fixture).get(&VolumeId::new("D:")).unwrap().is_empty());

    fixture.provider.refuse_delete("C:", false);
    let summary = fixture
        .orchestrator()
        .post_backup(BackupResult::Success)
        .await
        .unwrap();
    assert!(summary.failures.is_empty());
    assert!(records(&fixture).get(&VolumeId::new("C:")).unwrap().is_empty());
}

#[tokio::test]
async fn snapshot_deleted_elsewhere_is_dropped_from_record() {
    let fixture = StagingFixture::new("");
    fixture.provider.fail_list("D:", true);
    fixture.orchestrator().run(BackupType::Incr).await.unwrap();
    fixture.provider.fail_list("D:", false);

    // Someone else removed C's snapshot between the run and the cleanup
    let id = records(&fixture)
        .get(&VolumeId::new("C:"))
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    assert!(fixture
        .provider
        .delete(&VolumeId::new("C:"), &id)
        .await
        .unwrap());

    let summary = fixture
        .orchestrator()
        .post_backup(BackupResult::Success)
        .await
        .unwrap();
    let c = summary
        .volumes
        .iter()
        .find(|v| v.volume == VolumeId::new("C:"))
        .unwrap();
    assert_eq!(c.gone, 1);
    assert_eq!(c.deleted, 0);
    assert!(records(&fixture).load_all().unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_run_is_rejected() {
    let fixture = StagingFixture::new("");
    let _held = cli_lib::locks::RunLock::acquire(&fixture.settings().state_dir()).unwrap();

    let err = fixture.orchestrator().run(BackupType::Incr).await.unwrap_err();
    assert!(err.to_string().contains("in progress"));
}
