mod common;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use common::{
    FakeArchiver, FakeRemote, directory_config, exposure, night, science_exposure, write_exposure,
};
use nightrelay::config::DirectoryConfig;
use nightrelay::ledger::{Stage, StatusShelf};
use nightrelay::observability::Observer;
use nightrelay::pipeline::{ExposurePipeline, TransferOptions, permissions};
use nightrelay::schedule::{
    ArchivalTrigger, ArchiveOutcome, CatchupMode, CatchupOutcome, CatchupScanner,
};
use tempfile::TempDir;

const MEMBER: &str = "desi_spectro_data_20231031.tar";

/// Promote the standard exposure so the destination night exists
async fn promoted(root: &Path) -> (DirectoryConfig, StatusShelf) {
    let directory = directory_config(root);
    science_exposure(&directory, &night(), exposure());

    let remote = FakeRemote::default();
    let observer = Observer::default();
    let options = TransferOptions::default();
    let mut shelf = StatusShelf::new(directory.status_dir());
    ExposurePipeline::new(&directory, &remote, &observer, &options)
        .process(&mut shelf, &night(), exposure())
        .await
        .unwrap();
    assert!(directory.destination_exposure(&night(), &exposure()).is_dir());
    (directory, shelf)
}

fn scratch(root: &Path) -> std::path::PathBuf {
    let scratch = root.join("scratch");
    fs::create_dir_all(&scratch).unwrap();
    scratch
}

#[tokio::test]
async fn test_catchup_resyncs_late_files() {
    let temp_dir = TempDir::new().unwrap();
    let (directory, mut shelf) = promoted(temp_dir.path()).await;
    let scratch = scratch(temp_dir.path());
    let night = night();

    // A late file arrives together with an updated manifest
    let files = [
        ("desi-00000127.fits.fz", "fits"),
        ("guide-00000127.fits.fz", "guide"),
        ("request-00000127.json", "{}"),
        ("sky-00000127.fits.fz", "sky"),
    ];
    write_exposure(&directory, &night, exposure(), &files, &files);

    let remote = FakeRemote::default();
    let observer = Observer::default();
    let options = TransferOptions::default();
    let scanner = CatchupScanner::new(&directory, &remote, &observer, &options, &scratch);

    let outcome = scanner.run(&mut shelf, &night, CatchupMode::Daily).await.unwrap();
    assert_eq!(
        outcome,
        CatchupOutcome::Resynced {
            exposures: vec![exposure()]
        }
    );

    let destination = directory.destination_exposure(&night, &exposure());
    assert_eq!(fs::read(destination.join("sky-00000127.fits.fz")).unwrap(), b"sky");
    let mode = fs::metadata(destination.join("sky-00000127.fits.fz"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o440);

    let marker = scanner.marker_path(&night, CatchupMode::Daily);
    let preview = fs::read_to_string(&marker).unwrap();
    assert!(preview.contains("00000127/sky-00000127.fits.fz"));

    let checksum = shelf
        .ledger_for(&night)
        .unwrap()
        .current(&night, exposure(), Stage::Checksum)
        .unwrap()
        .clone();
    assert!(checksum.success);

    let outcome = scanner.run(&mut shelf, &night, CatchupMode::Daily).await.unwrap();
    assert_eq!(outcome, CatchupOutcome::AlreadyDone);
    let outcome = scanner.run(&mut shelf, &night, CatchupMode::Forced).await.unwrap();
    assert_eq!(outcome, CatchupOutcome::Unchanged);
}

#[tokio::test]
async fn test_catchup_without_data() {
    let temp_dir = TempDir::new().unwrap();
    let directory = directory_config(temp_dir.path());
    let scratch = scratch(temp_dir.path());
    let mut shelf = StatusShelf::new(directory.status_dir());

    let remote = FakeRemote::default();
    let observer = Observer::default();
    let options = TransferOptions::default();
    let scanner = CatchupScanner::new(&directory, &remote, &observer, &options, &scratch);

    let outcome = scanner.run(&mut shelf, &night(), CatchupMode::Daily).await.unwrap();
    assert_eq!(outcome, CatchupOutcome::NoData);
    assert_eq!(remote.sync_count(), 0);
    assert!(!scanner.marker_path(&night(), CatchupMode::Daily).exists());
}

#[tokio::test]
async fn test_archive_requires_member_and_index() {
    let temp_dir = TempDir::new().unwrap();
    let (directory, mut shelf) = promoted(temp_dir.path()).await;
    let scratch = scratch(temp_dir.path());
    let night = night();

    let remote = FakeRemote::default();
    let archiver = FakeArchiver::new(&[MEMBER]);
    let observer = Observer::default();
    let options = TransferOptions::default();
    let catchup = CatchupScanner::new(&directory, &remote, &observer, &options, &scratch);
    let archival = ArchivalTrigger::new(&directory, &archiver, &observer, &options, &scratch, true);

    let outcome = archival.run(&mut shelf, &catchup, &night).await.unwrap();
    assert_eq!(outcome, ArchiveOutcome::Attempted { success: true });
    assert_eq!(
        archiver.writes(),
        vec![format!("desi/spectro/data/{MEMBER}")]
    );
    assert!(archival.listing_path().exists());
    assert!(catchup.marker_path(&night, CatchupMode::Forced).exists());

    let night_dir = directory.destination_night(&night);
    let mode = fs::metadata(&night_dir).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o550);
    assert_eq!(observer.metrics.snapshot().archives_attempted, 1);

    // The write registered both the member and its index
    let outcome = archival.run(&mut shelf, &catchup, &night).await.unwrap();
    assert_eq!(outcome, ArchiveOutcome::AlreadyArchived);
    assert_eq!(archiver.writes().len(), 1);

    permissions::unlock(&night_dir).unwrap();
}

#[tokio::test]
async fn test_archive_unavailable_postpones() {
    let temp_dir = TempDir::new().unwrap();
    let (directory, mut shelf) = promoted(temp_dir.path()).await;
    let scratch = scratch(temp_dir.path());

    let remote = FakeRemote::default();
    let archiver = FakeArchiver {
        available: false,
        ..FakeArchiver::new(&[])
    };
    let observer = Observer::default();
    let options = TransferOptions::default();
    let catchup = CatchupScanner::new(&directory, &remote, &observer, &options, &scratch);
    let archival = ArchivalTrigger::new(&directory, &archiver, &observer, &options, &scratch, true);

    let outcome = archival.run(&mut shelf, &catchup, &night()).await.unwrap();
    assert_eq!(outcome, ArchiveOutcome::Unavailable);
    assert!(archiver.writes().is_empty());
    assert_eq!(remote.sync_count(), 0);
    assert_eq!(observer.metrics.snapshot().alerts_raised, 1);
}

#[tokio::test]
async fn test_archive_disabled_still_locks() {
    let temp_dir = TempDir::new().unwrap();
    let (directory, mut shelf) = promoted(temp_dir.path()).await;
    let scratch = scratch(temp_dir.path());
    let night = night();

    let remote = FakeRemote::default();
    let archiver = FakeArchiver::new(&[]);
    let observer = Observer::default();
    let options = TransferOptions::default();
    let catchup = CatchupScanner::new(&directory, &remote, &observer, &options, &scratch);
    let archival = ArchivalTrigger::new(&directory, &archiver, &observer, &options, &scratch, false);

    let outcome = archival.run(&mut shelf, &catchup, &night).await.unwrap();
    assert_eq!(outcome, ArchiveOutcome::Disabled);
    assert!(archiver.writes().is_empty());
    assert!(!archival.listing_path().exists());

    let night_dir = directory.destination_night(&night);
    let mode = fs::metadata(&night_dir).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o550);
    permissions::unlock(&night_dir).unwrap();
}

#[tokio::test]
async fn test_archive_without_data() {
    let temp_dir = TempDir::new().unwrap();
    let directory = directory_config(temp_dir.path());
    let scratch = scratch(temp_dir.path());
    let mut shelf = StatusShelf::new(directory.status_dir());

    let remote = FakeRemote::default();
    let archiver = FakeArchiver::new(&[]);
    let observer = Observer::default();
    let options = TransferOptions::default();
    let catchup = CatchupScanner::new(&directory, &remote, &observer, &options, &scratch);
    let archival = ArchivalTrigger::new(&directory, &archiver, &observer, &options, &scratch, true);

    let outcome = archival.run(&mut shelf, &catchup, &night()).await.unwrap();
    assert_eq!(outcome, ArchiveOutcome::NoData);
}

#[tokio::test]
async fn test_archive_index_alone_is_incomplete() {
    let temp_dir = TempDir::new().unwrap();
    let (directory, mut shelf) = promoted(temp_dir.path()).await;
    let scratch = scratch(temp_dir.path());
    let night = night();

    let remote = FakeRemote::default();
    let index = format!("{MEMBER}.idx");
    let archiver = FakeArchiver::new(&[index.as_str()]);
    let observer = Observer::default();
    let options = TransferOptions::default();
    let catchup = CatchupScanner::new(&directory, &remote, &observer, &options, &scratch);
    let archival = ArchivalTrigger::new(&directory, &archiver, &observer, &options, &scratch, true);

    let outcome = archival.run(&mut shelf, &catchup, &night).await.unwrap();
    assert_eq!(outcome, ArchiveOutcome::Attempted { success: true });
    assert_eq!(archiver.writes().len(), 1);

    permissions::unlock(&directory.destination_night(&night)).unwrap();
}

/// Run the archival trigger against a failing archiver; returns the
/// outcome and the alert log text
async fn failed_write(archiver: FakeArchiver) -> (ArchiveOutcome, String) {
    let temp_dir = TempDir::new().unwrap();
    let (directory, mut shelf) = promoted(temp_dir.path()).await;
    let scratch = scratch(temp_dir.path());
    let night = night();
    let alert_log = temp_dir.path().join("alerts.jsonl");

    let remote = FakeRemote::default();
    let observer = Observer::new(Some(alert_log.clone()));
    let options = TransferOptions::default();
    let catchup = CatchupScanner::new(&directory, &remote, &observer, &options, &scratch);
    let archival = ArchivalTrigger::new(&directory, &archiver, &observer, &options, &scratch, true);

    let outcome = archival.run(&mut shelf, &catchup, &night).await.unwrap();
    assert_eq!(archiver.writes().len(), 1);
    assert_eq!(observer.metrics.snapshot().alerts_raised, 1);

    permissions::unlock(&directory.destination_night(&night)).unwrap();
    (outcome, fs::read_to_string(alert_log).unwrap())
}

#[tokio::test]
async fn test_archive_write_nonzero_exit() {
    let (outcome, alerts) = failed_write(FakeArchiver::failing(72, "")).await;
    assert_eq!(outcome, ArchiveOutcome::Attempted { success: false });
    assert!(alerts.contains(r#""subject":"htar""#));
    assert!(alerts.contains(&format!("HTAR Backup failed for desi/spectro/data/{MEMBER} (status = 72).")));
}

#[tokio::test]
async fn test_archive_write_stderr_is_failure() {
    let (outcome, alerts) =
        failed_write(FakeArchiver::failing(0, "HTAR: index file not written")).await;
    assert_eq!(outcome, ArchiveOutcome::Attempted { success: false });
    assert!(alerts.contains("(status = 0)"));
    assert!(alerts.contains("HTAR error message was: HTAR: index file not written"));
}
