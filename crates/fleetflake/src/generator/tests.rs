use std::{
    cell::Cell,
    collections::HashSet,
    rc::Rc,
    sync::{Arc, Mutex},
    thread::scope,
};

use crate::{
    Generator, IdGenStatus, LockSnowflakeGenerator, MonotonicClock, ServiceCategory, SnowflakeId,
    TimeSource, node_id,
};

struct MockTime {
    millis: u64,
}

impl TimeSource for MockTime {
    fn current_millis(&self) -> u64 {
        self.millis
    }
}

#[derive(Clone)]
struct SharedMockStepTime {
    clock: Rc<MockStepTime>,
}

impl TimeSource for SharedMockStepTime {
    fn current_millis(&self) -> u64 {
        self.clock.values[self.clock.index.get()]
    }
}

struct MockStepTime {
    values: Vec<u64>,
    index: Cell<usize>,
}

struct FixedTime;
impl TimeSource for FixedTime {
    fn current_millis(&self) -> u64 {
        0
    }
}

trait IdGenStatusExt {
    fn unwrap_ready(self) -> SnowflakeId;
    fn unwrap_pending(self) -> u64;
}

impl IdGenStatusExt for IdGenStatus {
    fn unwrap_ready(self) -> SnowflakeId {
        match self {
            Self::Ready { id } => id,
            Self::Pending { yield_for } => {
                panic!("unexpected pending (yield for: {yield_for})")
            }
        }
    }

    fn unwrap_pending(self) -> u64 {
        match self {
            Self::Ready { id } => panic!("unexpected ready ({id})"),
            Self::Pending { yield_for } => yield_for,
        }
    }
}

#[test]
fn sequence_increments_within_same_tick() {
    let generator = LockSnowflakeGenerator::new(0, MockTime { millis: 42 });

    let id1 = generator.poll_id().unwrap_ready();
    let id2 = generator.poll_id().unwrap_ready();
    let id3 = generator.poll_id().unwrap_ready();

    assert_eq!(id1.timestamp(), 42);
    assert_eq!(id2.timestamp(), 42);
    assert_eq!(id3.timestamp(), 42);
    assert_eq!(id1.sequence(), 0);
    assert_eq!(id2.sequence(), 1);
    assert_eq!(id3.sequence(), 2);
    assert!(id1 < id2 && id2 < id3);
}

#[test]
fn pending_when_sequence_exhausted() {
    let generator =
        LockSnowflakeGenerator::from_components(0, 0, SnowflakeId::max_sequence(), FixedTime);
    assert_eq!(generator.poll_id().unwrap_pending(), 1);
}

#[test]
fn pending_while_clock_is_behind() {
    let generator = LockSnowflakeGenerator::from_components(50, 3, 0, MockTime { millis: 45 });
    assert_eq!(generator.poll_id().unwrap_pending(), 5);
}

#[test]
fn rollover_resets_sequence_on_next_tick() {
    let shared_time = SharedMockStepTime {
        clock: Rc::new(MockStepTime {
            values: vec![42, 43],
            index: Cell::new(0),
        }),
    };
    let generator = LockSnowflakeGenerator::new(1, shared_time.clone());

    for i in 0..=SnowflakeId::max_sequence() {
        let id = generator.poll_id().unwrap_ready();
        assert_eq!(id.sequence(), i);
        assert_eq!(id.timestamp(), 42);
    }

    assert_eq!(generator.poll_id().unwrap_pending(), 1);

    shared_time.clock.index.set(1);

    let id = generator.poll_id().unwrap_ready();
    assert_eq!(id.timestamp(), 43);
    assert_eq!(id.sequence(), 0);
    assert_eq!(id.node_offset(), 1);
}

#[test]
fn monotonic_clock_ids_are_non_decreasing() {
    const TOTAL_IDS: usize = 4096 * 64;

    let generator = Generator::new(node_id(ServiceCategory::Order, 1).unwrap());
    let mut last = generator.next_id();
    for _ in 1..TOTAL_IDS {
        let id = generator.next_id();
        assert!(id > last);
        assert!(id.timestamp() >= last.timestamp());
        assert_eq!(id.node_offset(), 1);
        last = id;
    }
}

#[test]
fn shared_generator_is_unique_across_threads() {
    const THREADS: usize = 8;
    const TOTAL_IDS: usize = 4096 * 64;
    const IDS_PER_THREAD: usize = TOTAL_IDS / THREADS;

    let generator = Arc::new(Generator::new(node_id(ServiceCategory::User, 0).unwrap()));
    let seen_ids = Arc::new(Mutex::new(HashSet::with_capacity(TOTAL_IDS)));

    scope(|s| {
        for _ in 0..THREADS {
            let generator = Arc::clone(&generator);
            let seen_ids = Arc::clone(&seen_ids);

            s.spawn(move || {
                for _ in 0..IDS_PER_THREAD {
                    let id = generator.generate_i64();
                    assert!(seen_ids.lock().unwrap().insert(id));
                }
            });
        }
    });

    assert_eq!(seen_ids.lock().unwrap().len(), TOTAL_IDS);
}

#[test]
fn disjoint_node_ids_never_collide() {
    const IDS_PER_GENERATOR: usize = 10_000;

    let clock = MonotonicClock::default();
    let a = Generator::with_time(node_id(ServiceCategory::User, 0).unwrap(), clock.clone());
    let b = Generator::with_time(node_id(ServiceCategory::User, 1).unwrap(), clock);

    let (ids_a, ids_b) = scope(|s| {
        let ha = s.spawn(|| (0..IDS_PER_GENERATOR).map(|_| a.generate_i64()).collect::<Vec<_>>());
        let hb = s.spawn(|| (0..IDS_PER_GENERATOR).map(|_| b.generate_i64()).collect::<Vec<_>>());
        (ha.join().unwrap(), hb.join().unwrap())
    });

    let set_a: HashSet<_> = ids_a.iter().copied().collect();
    let set_b: HashSet<_> = ids_b.iter().copied().collect();
    assert_eq!(set_a.len(), IDS_PER_GENERATOR);
    assert_eq!(set_b.len(), IDS_PER_GENERATOR);
    assert!(set_a.is_disjoint(&set_b));
}

#[test]
fn disjoint_node_ids_never_collide_within_one_millisecond() {
    let a = Generator::with_time(node_id(ServiceCategory::Gateway, 10).unwrap(), MockTime {
        millis: 42,
    });
    let b = Generator::with_time(node_id(ServiceCategory::Gateway, 11).unwrap(), MockTime {
        millis: 42,
    });

    let mut seen = HashSet::new();
    for _ in 0..=SnowflakeId::max_sequence() {
        let id_a = a.poll_id().unwrap_ready();
        let id_b = b.poll_id().unwrap_ready();
        assert_eq!(id_a.timestamp(), id_b.timestamp());
        assert!(seen.insert(id_a));
        assert!(seen.insert(id_b));
    }
    assert_eq!(seen.len(), 2 * 4096);
}

#[test]
fn string_and_integer_forms_agree() {
    let generator = Generator::with_time(node_id(ServiceCategory::Auth, 9).unwrap(), MockTime {
        millis: 7,
    });
    let as_string = generator.generate();
    let as_int = generator.generate_i64();
    let parsed: i64 = as_string.parse().unwrap();
    assert_eq!(parsed + 1, as_int);
    assert_eq!(SnowflakeId::from_raw(as_int as u64).node_offset(), 9);
}
