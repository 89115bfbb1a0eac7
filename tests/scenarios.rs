//! End-to-end scenarios S1-S6, driven entirely through the public `Wal`
//! facade against a fresh `MemStore` each open — the same shape as the
//! scenarios would run against a real column store, since `Wal` never
//! exposes column contents directly (that's the collaborator's job).

use batwal::{ColumnType, MemStore, Wal, WalConfig, WalError};
use tempfile::tempdir;

fn reopen(config: &WalConfig) -> Wal {
    Wal::open(config.clone(), Box::new(MemStore::new())).unwrap()
}

#[test]
fn s1_create_insert_commit_restart() {
    let dir = tempdir().unwrap();
    let config = WalConfig::for_testing(dir.path());

    {
        let mut wal = reopen(&config);
        let mut txn = wal.begin(100).unwrap();
        txn.log_create(7, ColumnType::Int32).unwrap();
        txn.log_bulk(
            7,
            0,
            vec![
                batwal::AtomValue::Int32(10),
                batwal::AtomValue::Int32(20),
                batwal::AtomValue::Int32(30),
            ],
        )
        .unwrap();
        txn.commit().unwrap();
    }

    let wal = reopen(&config);
    assert!(wal.find_bat(7).is_some());
    assert_eq!(wal.row_count(7), Some(3));
    assert_eq!(wal.saved_tid(), 1);
}

#[test]
fn s2_crash_before_end_marker_leaves_catalog_untouched() {
    let dir = tempdir().unwrap();
    let config = WalConfig::for_testing(dir.path());

    {
        let mut wal = reopen(&config);
        let mut txn = wal.begin(200).unwrap();
        txn.log_create(8, ColumnType::Str).unwrap();
        txn.log_bulk(
            8,
            0,
            vec![
                batwal::AtomValue::Str("a".to_string()),
                batwal::AtomValue::Str("b".to_string()),
            ],
        )
        .unwrap();
        // No `commit()` call: simulates a kill before the commit's
        // fsync. `txn` is dropped here without a LOG_END ever reaching
        // disk.
    }

    let wal = reopen(&config);
    assert_eq!(wal.find_bat(8), None);
    assert_eq!(wal.saved_tid(), 0);

    // The stream is still writable: the truncated segment is reused,
    // discarded logically rather than physically truncated.
    let mut wal = wal;
    let mut txn = wal.begin(250).unwrap();
    txn.log_create(8, ColumnType::Str).unwrap();
    txn.commit().unwrap();
    assert!(wal.find_bat(8).is_some());
}

#[test]
fn s3_destroy_then_checkpoint_releases_space() {
    let dir = tempdir().unwrap();
    let config = WalConfig::for_testing(dir.path());

    let mut wal = Wal::open(config.clone(), Box::new(MemStore::new())).unwrap();
    {
        let mut txn = wal.begin(100).unwrap();
        txn.log_create(7, ColumnType::Int32).unwrap();
        txn.log_bulk(
            7,
            0,
            vec![batwal::AtomValue::Int32(10), batwal::AtomValue::Int32(20)],
        )
        .unwrap();
        txn.commit().unwrap();
    }
    // Rotate before destroying, so segment 1 is eligible for reclamation
    // at checkpoint time (the checkpointer never reclaims the segment
    // currently open for append).
    wal.begin_with_options(150, true).unwrap().commit().unwrap();
    {
        let mut txn = wal.begin(300).unwrap();
        txn.log_destroy(7).unwrap();
        txn.commit().unwrap();
    }

    let report = wal.checkpoint(300).unwrap();
    assert!(!config.segment_path(1).exists());
    assert!(report.segments_reclaimed.contains(&1));
    assert_eq!(wal.find_bat(7), None);
}

#[test]
fn s4_sequence_survives_restart() {
    let dir = tempdir().unwrap();
    let config = WalConfig::for_testing(dir.path());

    {
        let mut wal = reopen(&config);
        let mut txn = wal.begin(400).unwrap();
        txn.log_sequence(1, 42).unwrap();
        txn.commit().unwrap();
        let mut txn = wal.begin(410).unwrap();
        txn.log_sequence(1, 43).unwrap();
        txn.commit().unwrap();
    }

    let wal = reopen(&config);
    assert_eq!(wal.get_sequence(1), Some(43));
}

#[test]
fn s5_interleaved_transactions_one_aborts() {
    let dir = tempdir().unwrap();
    let config = WalConfig::for_testing(dir.path());

    {
        let mut wal = reopen(&config);
        // `Wal::begin` borrows `wal` mutably for the lifetime of the
        // returned builder, so two genuinely concurrent builders can't
        // coexist through the facade: single writer, enforced
        // statically. Genuine interleaving — one transaction's `LOG_END`
        // landing while another is still open — is instead exercised
        // directly against raw records in `replay.rs`'s own test suite
        // (`nested_frames_use_stack_attribution`), where it only works
        // out correctly because the later transaction closes before the
        // earlier one (LIFO); see that module's doc comment for why the
        // wire format admits no other attribution scheme. Here we
        // exercise the equivalent sequential order the facade allows:
        // t1 opens and logs, aborts before t2 ever begins.
        let mut t1 = wal.begin(500).unwrap();
        t1.log_create(9, ColumnType::Int32).unwrap();
        t1.abort().unwrap();

        let mut t2 = wal.begin(501).unwrap();
        t2.log_create(10, ColumnType::Int32).unwrap();
        t2.commit().unwrap();
    }

    let wal = reopen(&config);
    assert_eq!(wal.find_bat(9), None);
    assert!(wal.find_bat(10).is_some());
}

#[test]
fn s6_legacy_upgrade_then_normal_startup() {
    use batwal::codec::cursor::Writer;

    let dir = tempdir().unwrap();
    let config = WalConfig::for_testing(dir.path());
    std::fs::write(config.header_path(), "052200\n\n").unwrap();

    // A hand-written old-format segment: CreateId("tname", 't', 77)
    // followed by InsertId(77, [1, 2]), using the exact legacy tag
    // layout `legacy.rs` documents.
    let mut w = Writer::new();
    w.write_bytes(&batwal::codec::BOM.to_le_bytes());
    w.write_u8(0); // CreateId
    let name = b"tname";
    w.write_u32(name.len() as u32);
    w.write_bytes(name);
    w.write_u8(b't');
    w.write_i64(77);
    w.write_u8(1); // InsertId
    w.write_u8(b't');
    w.write_i64(77);
    w.write_i64(2);
    w.write_i32(1);
    w.write_i32(2);
    std::fs::write(config.segment_path(1), w.into_bytes()).unwrap();

    let wal = Wal::open(config, Box::new(MemStore::new())).unwrap();
    let outcome = wal.legacy_outcome().expect("directory needed an upgrade");
    let object_id = outcome.find_object_id(b't', 77).unwrap();
    assert_eq!(wal.find_bat(object_id), Some(object_id));
    assert_eq!(wal.row_count(object_id), Some(2));
}

#[test]
fn disabled_wal_never_touches_disk_but_still_tracks_tid() {
    let dir = tempdir().unwrap();
    let config = WalConfig::for_testing(dir.path());
    let mut wal = Wal::open_with_options(config.clone(), Box::new(MemStore::new()), true).unwrap();

    let mut txn = wal.begin(1).unwrap();
    txn.log_create(1, ColumnType::Int32).unwrap();
    txn.commit().unwrap();

    assert_eq!(wal.find_bat(1), None); // disabled: no catalog mutation
    assert_eq!(wal.saved_tid(), 1); // tid bookkeeping still advances
    assert!(!config.header_path().exists());
}

#[allow(dead_code)]
fn assert_send<T: Send>() {}

#[allow(dead_code)]
fn error_variants_are_exhaustively_matchable(e: WalError) {
    match e {
        WalError::ShortRead { .. }
        | WalError::CorruptHeader { .. }
        | WalError::UnknownType(_)
        | WalError::ValueTooLarge(_)
        | WalError::Duplicate(_)
        | WalError::NotFound(_)
        | WalError::Io(_)
        | WalError::Store(_)
        | WalError::Poisoned(_) => {}
    }
}
