//! Lifecycle tests for stages: sentinel broadcast, draining, aborting.

use holdpen_pipeline::{
    bounded, spawn_source, spawn_stage, Emitter, Envelope, ErrorPolicy, Failure, StageConfig,
    StageState, StreamReceiver, Supervisor, Transform,
};
use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

struct Double;

impl Transform for Double {
    type Input = u64;
    type Output = u64;

    fn apply(&self, input: u64, out: &mut Emitter<'_, u64>) -> Result<(), Failure> {
        out.emit(input * 2)
    }
}

/// Emits `n` copies of each input `n`.
struct Repeat;

impl Transform for Repeat {
    type Input = u64;
    type Output = u64;

    fn apply(&self, input: u64, out: &mut Emitter<'_, u64>) -> Result<(), Failure> {
        for _ in 0..input {
            out.emit(input)?;
        }
        Ok(())
    }
}

/// Fails fatally on one poisoned value, slowly processes the rest.
struct Poisoned {
    poison: u64,
}

impl Transform for Poisoned {
    type Input = u64;
    type Output = u64;

    fn apply(&self, input: u64, out: &mut Emitter<'_, u64>) -> Result<(), Failure> {
        if input == self.poison {
            return Err(Failure::fatal(format!("poisoned record {input}")));
        }
        thread::sleep(Duration::from_millis(2));
        out.emit(input)
    }
}

/// Loses odd records, keeps going.
struct DropOdd;

impl Transform for DropOdd {
    type Input = u64;
    type Output = u64;

    fn apply(&self, input: u64, out: &mut Emitter<'_, u64>) -> Result<(), Failure> {
        if input % 2 == 1 {
            return Err(Failure::degraded(format!("odd record {input}")));
        }
        out.emit(input)
    }
}

struct SkipZero;

impl Transform for SkipZero {
    type Input = u64;
    type Output = u64;

    fn apply(&self, input: u64, out: &mut Emitter<'_, u64>) -> Result<(), Failure> {
        assert_ne!(input, 0, "filtered record reached a worker");
        out.emit(input)
    }

    fn admit(&self, input: &u64) -> bool {
        *input != 0
    }
}

fn feed(values: impl IntoIterator<Item = u64> + Send + 'static) -> StreamReceiver<u64> {
    let (tx, rx) = bounded(100);
    thread::spawn(move || {
        for v in values {
            if tx.send(v).is_err() {
                return;
            }
        }
        let _ = tx.finish();
    });
    rx
}

/// Collect everything up to and including the first sentinel, failing on anything after it.
fn drain(rx: &StreamReceiver<u64>) -> (Vec<u64>, usize) {
    let mut records = Vec::new();
    let mut sentinels = 0;
    loop {
        match rx.recv() {
            Ok(Envelope::Record(r)) => {
                assert_eq!(sentinels, 0, "record after sentinel");
                records.push(r);
            }
            Ok(Envelope::Sentinel) => {
                sentinels += 1;
                break;
            }
            Err(_) => break,
        }
    }
    (records, sentinels)
}

#[test]
fn stage_broadcasts_one_sentinel_per_worker_and_emits_one() {
    for workers in [1usize, 3, 8] {
        let stage = spawn_stage(
            Double,
            StageConfig::new("double").workers(workers).capacity(5),
            feed(0..200),
        )
        .unwrap();

        let (records, sentinels) = drain(&stage.output);
        let metrics = stage.metrics();

        assert_eq!(sentinels, 1);
        // output sentinel only after every worker is gone
        assert_eq!(metrics.workers_exited(), workers as u64);
        assert_eq!(metrics.sentinels_broadcast(), workers as u64);
        assert_eq!(stage.state(), StageState::Terminated);

        let got: BTreeSet<u64> = records.into_iter().collect();
        let want: BTreeSet<u64> = (0..200).map(|v| v * 2).collect();
        assert_eq!(got, want);
        assert_eq!(metrics.records_in(), 200);
        assert_eq!(metrics.records_out(), 200);
    }
}

#[test]
fn fan_out_emits_many_per_input() {
    let stage = spawn_stage(Repeat, StageConfig::new("repeat").workers(2), feed(vec![1, 2, 3])).unwrap();
    let (mut records, sentinels) = drain(&stage.output);
    records.sort_unstable();
    assert_eq!(sentinels, 1);
    assert_eq!(records, vec![1, 2, 2, 3, 3, 3]);
}

#[test]
fn fatal_error_still_drains_every_worker() {
    let stage = spawn_stage(
        Poisoned { poison: 5 },
        StageConfig::new("poisoned").workers(4).capacity(4),
        feed(0..100),
    )
    .unwrap();

    let (records, sentinels) = drain(&stage.output);
    assert_eq!(sentinels, 1);
    assert!(!records.contains(&5));

    let err = stage.errors.recv().unwrap();
    assert_eq!(err.stage, "poisoned");
    assert!(err.is_fatal());

    let metrics = stage.metrics();
    assert_eq!(metrics.workers_exited(), 4);
    // the failed worker's sentinel may find nobody left to receive it
    assert!(metrics.sentinels_broadcast() >= 3);
    assert_eq!(stage.state(), StageState::Terminated);
}

#[test]
fn every_worker_failing_does_not_hang() {
    // all four workers hit a poisoned value; only the first report is authoritative
    struct AlwaysFails;
    impl Transform for AlwaysFails {
        type Input = u64;
        type Output = u64;
        fn apply(&self, input: u64, _out: &mut Emitter<'_, u64>) -> Result<(), Failure> {
            thread::sleep(Duration::from_millis(5));
            Err(Failure::fatal(format!("failed on {input}")))
        }
    }

    let stage = spawn_stage(AlwaysFails, StageConfig::new("fails").workers(4), feed(0..1000)).unwrap();
    let (records, sentinels) = drain(&stage.output);
    assert!(records.is_empty());
    assert_eq!(sentinels, 1);
    assert!(stage.errors.recv().unwrap().is_fatal());
    assert_eq!(stage.metrics().workers_exited(), 4);
}

#[test]
fn degraded_errors_do_not_stop_the_stage() {
    let stage = spawn_stage(DropOdd, StageConfig::new("even").workers(2), feed(0..10)).unwrap();
    let errors = stage.errors.clone();
    let watcher = thread::spawn(move || errors.iter().count());

    let (mut records, sentinels) = drain(&stage.output);
    records.sort_unstable();
    assert_eq!(sentinels, 1);
    assert_eq!(records, vec![0, 2, 4, 6, 8]);

    drop(stage);
    let reported = watcher.join().unwrap();
    assert!(reported >= 1 && reported <= 5);
}

#[test]
fn admit_filters_before_workers() {
    let stage = spawn_stage(SkipZero, StageConfig::new("skip").workers(3), feed(vec![0, 1, 0, 2])).unwrap();
    let (mut records, _) = drain(&stage.output);
    records.sort_unstable();
    assert_eq!(records, vec![1, 2]);
    assert_eq!(stage.metrics().records_filtered(), 2);
}

#[test]
fn upstream_disconnect_is_treated_as_end_of_stream() {
    let (tx, rx) = bounded::<u64>(10);
    tx.send(21).unwrap();
    drop(tx);

    let stage = spawn_stage(Double, StageConfig::new("orphan").workers(2), rx).unwrap();
    let (records, sentinels) = drain(&stage.output);
    assert_eq!(records, vec![42]);
    assert_eq!(sentinels, 1);
}

#[test]
fn zero_workers_is_rejected() {
    let (_tx, rx) = bounded::<u64>(1);
    assert!(spawn_stage(Double, StageConfig::new("none").workers(0), rx).is_err());
}

#[test]
fn chained_stages_under_supervisor() {
    let source = spawn_source("numbers", 10, &tracing::Span::none(), |tx| {
        for i in 0..50u64 {
            tx.send(i)?;
        }
        Ok(())
    })
    .unwrap();
    let doubled = spawn_stage(Double, StageConfig::new("double").workers(3), source.output.clone()).unwrap();
    let repeated = spawn_stage(Repeat, StageConfig::new("repeat").workers(2), doubled.output.clone()).unwrap();

    let mut sup = Supervisor::new();
    sup.watch(&source, ErrorPolicy::Abort)
        .watch(&doubled, ErrorPolicy::Abort)
        .watch(&repeated, ErrorPolicy::Abort);

    let mut total = 0u64;
    let outcome = sup
        .run(repeated.output.clone(), |r| {
            total += r;
            Ok(())
        })
        .unwrap();

    // each value v = 2i appears v times
    let expected_records: u64 = (0..50u64).map(|i| 2 * i).sum();
    assert_eq!(outcome.records, expected_records);
    assert_eq!(total, (0..50u64).map(|i| (2 * i) * (2 * i)).sum::<u64>());
}

#[test]
fn supervisor_reports_failure_from_middle_stage() {
    let source = spawn_source("numbers", 10, &tracing::Span::none(), |tx| {
        for i in 0..50u64 {
            tx.send(i)?;
        }
        Ok(())
    })
    .unwrap();
    let poisoned = spawn_stage(
        Poisoned { poison: 10 },
        StageConfig::new("poisoned").workers(2),
        source.output.clone(),
    )
    .unwrap();
    let doubled = spawn_stage(Double, StageConfig::new("double").workers(2), poisoned.output.clone()).unwrap();

    let mut sup = Supervisor::new();
    sup.watch(&source, ErrorPolicy::Abort)
        .watch(&poisoned, ErrorPolicy::Abort)
        .watch(&doubled, ErrorPolicy::Abort);

    let err = sup.run(doubled.output.clone(), |_| Ok(())).unwrap_err();
    assert!(err.to_string().contains("poisoned"));
}

#[test]
fn every_degraded_record_is_counted_as_a_warning() {
    let source = spawn_source("numbers", 10, &tracing::Span::none(), |tx| {
        for i in 0..200u64 {
            tx.send(i)?;
        }
        Ok(())
    })
    .unwrap();
    let even = spawn_stage(DropOdd, StageConfig::new("even").workers(4), source.output.clone()).unwrap();

    let mut sup = Supervisor::new();
    sup.watch(&source, ErrorPolicy::Abort)
        .watch(&even, ErrorPolicy::Warn);
    let outcome = sup.run(even.output.clone(), |_| Ok(())).unwrap();

    let metrics = even.metrics();
    assert_eq!(outcome.records, 100);
    assert_eq!(outcome.dropped, metrics.errors_dropped());
    assert_eq!(outcome.warning_count(), 100);
    assert_eq!(metrics.errors_reported() + metrics.errors_dropped(), 100);
}
