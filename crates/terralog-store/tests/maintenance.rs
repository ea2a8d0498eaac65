//! End-to-end maintenance scenario over a file-backed archive:
//! rebuild, weighting migration, integrity repair, recomputation, and
//! unit-system reconfiguration.

use terralog_store::{
    ArchiveStore, RebuildOptions, RecalcOptions, RecalcOutcome, RecordQuery, ScanOptions,
    ScanOutcome, TransferOutcome, WeightingOptions, WeightingOutcome,
};
use terralog_types::{ArchiveRecord, UnitSystem, Value, default_schema};

const DAY: i64 = 86_400;

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn seed_records() -> Vec<ArchiveRecord> {
    let mut records = Vec::new();
    for day in 0..3i64 {
        for slot in 0..6i64 {
            let ts = day * DAY + slot * 3_600 + 300;
            records.push(
                ArchiveRecord::new(ts)
                    .with_value("temperature", 60.0 + (day * 6 + slot) as f64)
                    .with_value("wind_speed", (slot % 4) as f64 * 3.0)
                    .with_value("co2", 700 + slot * 10),
            );
        }
    }
    records
}

#[test]
fn full_maintenance_cycle() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("station.db");
    let store = ArchiveStore::create(&path, default_schema(), Some(UnitSystem::Us)).unwrap();
    store.insert_records(&seed_records()).unwrap();

    // Rebuild creates the daily tables on demand and fills three days.
    let summary = store.rebuild_daily(&RebuildOptions::default()).unwrap();
    assert_eq!(summary.records_processed, 18);
    assert_eq!(summary.days_rebuilt, 3);
    let day0 = store.daily_row("temperature", 0).unwrap().unwrap();
    assert_eq!(day0.count, 6);
    assert_eq!(day0.min, Some(60.0));
    assert_eq!(day0.max, Some(65.0));
    assert!(day0.wtime > 0);

    // A store downgraded to the unweighted version migrates back up to
    // identical rows, and a second migration is a no-op.
    let rows_before = store.daily_rows(None).unwrap();
    store.set_metadata("daily_summary_version", "1.0").unwrap();
    let outcome = store.migrate_weighting(&WeightingOptions::default()).unwrap();
    assert!(matches!(outcome, WeightingOutcome::Applied { .. }));
    assert_eq!(store.daily_rows(None).unwrap(), rows_before);
    assert_eq!(
        store.migrate_weighting(&WeightingOptions::default()).unwrap(),
        WeightingOutcome::AlreadyApplied
    );

    // A writer left text in two numeric columns; check finds it, fix
    // repairs it, and the repaired archive scans clean.
    store
        .update_value(300, "co2", &Value::Text("725".into()))
        .unwrap();
    store
        .update_value(3_900, "temperature", &Value::Text("sensor fault".into()))
        .unwrap();

    let check = store.scan_types(&ScanOptions::default()).unwrap();
    assert_eq!(check.outcome, ScanOutcome::Unfixed);
    assert_eq!(check.violations.len(), 2);

    let fix = store
        .scan_types(&ScanOptions {
            fix: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(fix.outcome, ScanOutcome::Fixed);
    assert_eq!(fix.violations[0].after, Some(Value::Integer(725)));
    assert_eq!(fix.violations[1].after, Some(Value::Null));
    assert_eq!(
        store.scan_types(&ScanOptions::default()).unwrap().outcome,
        ScanOutcome::Clean
    );

    // The archive changed under the summary; recomputing the daily max
    // from archive data brings the summary back in line.
    store
        .update_value(2 * 3_600 + 300, "wind_speed", &Value::Real(40.0))
        .unwrap();
    let recalc = store
        .recalc_daily_max("wind_speed", &RecalcOptions::default())
        .unwrap();
    assert!(matches!(recalc, RecalcOutcome::Recalculated { .. }));
    let wind0 = store.daily_row("wind_speed", 0).unwrap().unwrap();
    assert_eq!(wind0.max, Some(40.0));
    assert_eq!(wind0.max_time, Some(2 * 3_600 + 300));

    // An observation with no data reports NoData and changes nothing.
    assert_eq!(
        store
            .recalc_daily_max("rain", &RecalcOptions::default())
            .unwrap(),
        RecalcOutcome::NoData
    );

    // Reconfigure into a metric sibling store, values converted.
    let (dest_path, outcome) = store.reconfigure(UnitSystem::Metric, false).unwrap();
    assert_eq!(dest_path, dir.path().join("station_new.db"));
    assert!(matches!(
        outcome,
        TransferOutcome::Transferred { records: 18, .. }
    ));

    let dest = ArchiveStore::open(&dest_path).unwrap();
    assert_eq!(dest.unit_system().unwrap(), Some(UnitSystem::Metric));
    assert_eq!(dest.record_count().unwrap(), 18);
    let converted = dest
        .records(&RecordQuery::new().oldest_first().limit(1))
        .unwrap();
    // 60 °F is 15.56 °C.
    let temp = converted[0].get("temperature").unwrap().as_f64().unwrap();
    assert!((temp - 15.5556).abs() < 0.01);

    // Dry runs report realistic work but leave both stores untouched.
    let before = store.daily_rows(None).unwrap();
    let dry = store
        .rebuild_daily(&RebuildOptions {
            dry_run: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(dry.records_processed, 18);
    assert_eq!(store.daily_rows(None).unwrap(), before);
}
