//! Synchronized task bodies running on the reference ring runtime.

use parloop::ir::{BinaryOp, ComparePred};
use parloop::prelude::*;
use parloop::runtime::interp::DEFAULT_STEP_LIMIT;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

struct OrderedLoop {
    func: Function,
    header: BlockId,
    exit: BlockId,
    cmp: InstId,
    work: InstId,
    latch_br: InstId,
}

/// `for (i = tid; i < n; i += T) { work(i / d) }` split into header, body
/// and latch blocks. `d` is `tid - bad_thread` when a failing worker is
/// requested, 1 otherwise.
fn ordered_loop(bad_thread: Option<i64>) -> OrderedLoop {
    let mut b = FunctionBuilder::new("ordered", abi::FIRST_USER_ARG + 1);
    let entry = b.entry();
    let header = b.block("header");
    let body = b.block("body");
    let latch = b.block("latch");
    let exit = b.block("exit");
    b.br(header);

    b.position_at(header);
    let i = b.phi(vec![(entry, Value::Arg(abi::THREAD_ID))]);
    let cmp = b.compare(ComparePred::Lt, i.into(), Value::Arg(abi::FIRST_USER_ARG));
    b.cond_br(cmp.into(), body, exit);

    b.position_at(body);
    let arg: Value = match bad_thread {
        Some(t) => {
            let d = b.binary(BinaryOp::Sub, Value::Arg(abi::THREAD_ID), Value::Const(t));
            b.binary(BinaryOp::Div, i.into(), d.into()).into()
        }
        None => i.into(),
    };
    let work = b.call("work", vec![arg]);
    b.br(latch);

    b.position_at(latch);
    let next = b.add(i.into(), Value::Arg(abi::NUM_THREADS));
    let latch_br = b.br(header);
    b.add_incoming(i, latch, next.into());

    b.position_at(exit);
    b.ret(None);

    OrderedLoop { func: b.finish().expect("valid body"), header, exit, cmp, work, latch_br }
}

fn recorder() -> (Arc<Mutex<Vec<i64>>>, impl Fn(usize, &str, &[i64]) -> i64 + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let hook = move |_tid: usize, name: &str, args: &[i64]| -> i64 {
        if name == "work" {
            log.lock().unwrap().push(args[0]);
        }
        0
    };
    (seen, hook)
}

fn parallelized_work_loop() -> LoopResult {
    let l = ordered_loop(None);
    let candidate = LoopCandidate::new("ordered", l.func, l.header).with_dependences(vec![OpDependence {
        source: l.work,
        target: l.work,
        kind: DependenceKind::Data,
        is_memory: true,
        hazard: Some(Hazard::Output),
        is_loop_carried: true,
    }]);
    let result = Parallelizer::default().parallelize_loop(&candidate).unwrap();
    assert!(result.report.parallelized, "{}", result.report);
    result
}

#[test]
fn test_segment_runs_in_iteration_order() {
    let result = parallelized_work_loop();
    let (seen, hook) = recorder();

    let stats = parloop::simulate(&result, 4, &[16], Some(&hook), DEFAULT_STEP_LIMIT)
        .unwrap()
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), (0..16).collect::<Vec<i64>>());

    assert_eq!(stats.len(), 4);
    for s in &stats {
        // Four iterations each, plus the signal on leaving the loop.
        assert_eq!(s.waits, 4, "worker {}", s.thread_id);
        assert_eq!(s.signals, 5, "worker {}", s.thread_id);
    }
}

#[test]
fn test_uneven_iteration_counts() {
    let result = parallelized_work_loop();
    let (seen, hook) = recorder();

    let stats = parloop::simulate(&result, 4, &[10], Some(&hook), DEFAULT_STEP_LIMIT)
        .unwrap()
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<i64>>());
    let waits: Vec<u64> = stats.iter().map(|s| s.waits).collect();
    assert_eq!(waits, vec![3, 3, 2, 2]);
}

#[test]
fn test_segment_spanning_the_header() {
    // The segment starts at the loop condition, so every header visit
    // waits, including the one that leaves the loop.
    let l = ordered_loop(None);
    let mut tasks = vec![Task::new(l.func, l.header)];
    let segments = vec![SequentialSegment::new(0, [l.cmp], [l.latch_br])];
    insert_synchronization(&mut tasks, &segments, &[l.exit]).unwrap();
    let task = tasks.pop().unwrap();

    let ring = SyncRing::new(4, 1).unwrap();
    let (seen, hook) = recorder();
    let stats = run_parallel(&task, &ring, &[16], Some(&hook), DEFAULT_STEP_LIMIT).unwrap();

    assert_eq!(*seen.lock().unwrap(), (0..16).collect::<Vec<i64>>());
    for s in &stats {
        assert_eq!((s.waits, s.signals), (5, 5), "worker {}", s.thread_id);
    }
}

/// `while (i < n) { work(i); i += T }` with the condition and the call in
/// one segment.
#[test]
fn test_segment_from_header_compare_to_body() {
    let mut b = FunctionBuilder::new("while", abi::FIRST_USER_ARG + 1);
    let entry = b.entry();
    let header = b.block("header");
    let body = b.block("body");
    let exit = b.block("exit");
    b.br(header);

    b.position_at(header);
    let i = b.phi(vec![(entry, Value::Arg(abi::THREAD_ID))]);
    let cmp = b.compare(ComparePred::Lt, i.into(), Value::Arg(abi::FIRST_USER_ARG));
    b.cond_br(cmp.into(), body, exit);

    b.position_at(body);
    let work = b.call("work", vec![i.into()]);
    let next = b.add(i.into(), Value::Arg(abi::NUM_THREADS));
    b.br(header);
    b.add_incoming(i, body, next.into());

    b.position_at(exit);
    b.ret(None);

    let task = Task::new(b.finish().expect("valid body"), header);
    let lp = task.loop_structure().unwrap();
    let segment = SequentialSegment::from_instructions(0, &task, &lp, &[cmp, work]).unwrap();
    assert_eq!(segment.entries().iter().copied().collect::<Vec<_>>(), vec![cmp]);
    assert_eq!(segment.exits().iter().copied().collect::<Vec<_>>(), vec![work]);

    let mut tasks = vec![task];
    insert_synchronization(&mut tasks, &[segment], &[exit]).unwrap();
    let task = tasks.pop().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let hook = move |tid: usize, name: &str, args: &[i64]| -> i64 {
        if name == "work" {
            // Low thread ids run slow so later threads try to overtake.
            thread::sleep(Duration::from_millis(2 * (4 - tid as u64)));
            log.lock().unwrap().push(args[0]);
        }
        0
    };

    let ring = SyncRing::new(4, 1).unwrap();
    let stats = run_parallel(&task, &ring, &[16], Some(&hook), DEFAULT_STEP_LIMIT).unwrap();
    assert_eq!(*seen.lock().unwrap(), (0..16).collect::<Vec<i64>>());
    for s in &stats {
        // One signal per iteration after `work`, one more on leaving.
        assert_eq!((s.waits, s.signals), (5, 5), "worker {}", s.thread_id);
    }
}

/// Odd iterations run `work` in a branch before the shared `log` call.
#[test]
fn test_first_reached_entry_waits_once() {
    let mut b = FunctionBuilder::new("diamond", abi::FIRST_USER_ARG + 1);
    let entry = b.entry();
    let header = b.block("header");
    let body = b.block("body");
    let then_bb = b.block("then");
    let join = b.block("join");
    let exit = b.block("exit");
    b.br(header);

    b.position_at(header);
    let i = b.phi(vec![(entry, Value::Arg(abi::THREAD_ID))]);
    let cmp = b.compare(ComparePred::Lt, i.into(), Value::Arg(abi::FIRST_USER_ARG));
    b.cond_br(cmp.into(), body, exit);

    b.position_at(body);
    let odd = b.binary(BinaryOp::Rem, i.into(), Value::Const(2));
    b.cond_br(odd.into(), then_bb, join);

    b.position_at(then_bb);
    let work = b.call("work", vec![i.into()]);
    b.br(join);

    b.position_at(join);
    let log_call = b.call("log", vec![i.into()]);
    let next = b.add(i.into(), Value::Arg(abi::NUM_THREADS));
    b.br(header);
    b.add_incoming(i, join, next.into());

    b.position_at(exit);
    b.ret(None);

    let task = Task::new(b.finish().expect("valid body"), header);
    let lp = task.loop_structure().unwrap();
    let segment = SequentialSegment::from_instructions(0, &task, &lp, &[work, log_call]).unwrap();
    assert_eq!(segment.entries().iter().copied().collect::<Vec<_>>(), vec![work, log_call]);
    assert_eq!(segment.exits().iter().copied().collect::<Vec<_>>(), vec![log_call]);

    let mut tasks = vec![task];
    let report = insert_synchronization(&mut tasks, &[segment], &[exit]).unwrap();
    assert_eq!(report.waits, 2);
    assert_eq!(report.decision_blocks.len(), 2);
    let task = tasks.pop().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let hook = move |tid: usize, name: &str, args: &[i64]| -> i64 {
        if tid % 2 == 1 {
            thread::sleep(Duration::from_millis(1));
        }
        log.lock().unwrap().push((name.to_string(), args[0]));
        0
    };

    let ring = SyncRing::new(4, 1).unwrap();
    let stats = run_parallel(&task, &ring, &[16], Some(&hook), DEFAULT_STEP_LIMIT).unwrap();

    let mut expected = Vec::new();
    for i in 0..16 {
        if i % 2 == 1 {
            expected.push(("work".to_string(), i));
        }
        expected.push(("log".to_string(), i));
    }
    assert_eq!(*seen.lock().unwrap(), expected);
    for s in &stats {
        assert_eq!(s.waits, 4, "worker {}", s.thread_id);
    }
}

#[test]
fn test_failing_worker_releases_the_ring() {
    let l = ordered_loop(Some(1));
    let mut tasks = vec![Task::new(l.func, l.header)];
    let segments = vec![SequentialSegment::new(0, [l.work], [l.work])];
    insert_synchronization(&mut tasks, &segments, &[l.exit]).unwrap();
    let task = tasks.pop().unwrap();

    let ring = SyncRing::new(4, 1).unwrap();
    let err = run_parallel(&task, &ring, &[16], None, DEFAULT_STEP_LIMIT).unwrap_err();
    assert!(matches!(err, RuntimeError::DivisionByZero(_)), "{}", err);
    assert!(ring.is_poisoned());
}

#[test]
fn test_untransformed_loop_is_not_simulated() {
    let l = ordered_loop(None);
    let candidate = LoopCandidate::new("doall", l.func, l.header);
    let result = Parallelizer::default().parallelize_loop(&candidate).unwrap();
    assert!(!result.report.parallelized);
    assert!(parloop::simulate(&result, 2, &[4], None, DEFAULT_STEP_LIMIT).unwrap().is_none());
}
