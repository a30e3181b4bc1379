use std::{
    collections::HashSet,
    sync::Barrier,
    thread,
    time::Duration,
};

use derive_more::Add;
use rand::{
    Rng,
    SeedableRng,
    rngs::SmallRng,
};
use rstest::rstest;

use ferret::{
    List,
    ListConfig,
    list::test_scaffolding,
};
use shmc::{
    error::Error,
    log::debug,
    memory::{
        Area,
        KiB,
        MiB,
    },
};

mod log;

#[rstest]
#[case("")]
#[case("64")]
#[case("64:")]
#[case("4:1024")]
#[case("64:1")]
#[case("64:65536")]
#[case("sixty four:1024")]
#[cfg_attr(not(miri), timeout(Duration::from_secs(1)))]
fn malformed_config(#[case] config: &str) {
    let area = Area::new("malformed_config", 64 * KiB).unwrap();

    assert!(matches!(List::create(&area, "list", config), Err(Error::Config(_))));
    assert_eq!(area.chunk_names().unwrap(), Vec::<String>::new());
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(1)))]
fn post_and_get() {
    let area = Area::new("post_and_get", 64 * KiB).unwrap();
    let list = List::create(&area, "events", "24:8").unwrap();
    assert_eq!(list.config(), ListConfig::new(24, 8).unwrap());

    let producer = list.producer();
    let mut consumer = List::get(&area, "events").unwrap().consumer();
    let mut buf = [0; 16];

    assert_eq!(consumer.get(&mut buf).unwrap_err(), Error::Empty);

    assert_eq!(producer.post(b"first").unwrap(), 8);
    assert_eq!(producer.post(b"second event").unwrap(), 9);

    let first = consumer.get(&mut buf).unwrap();
    assert_eq!(first.element(), 8);
    assert_eq!(first.len(), 16);
    assert_eq!(&buf, b"first\0\0\0\0\0\0\0\0\0\0\0");

    let second = consumer.get(&mut buf).unwrap();
    assert_eq!(second.element(), 9);
    assert_eq!(&buf[.. 12], b"second event");
    assert!(second.timestamp() >= first.timestamp());

    assert_eq!(consumer.get(&mut buf).unwrap_err(), Error::Empty);
    assert_eq!(consumer.lost(), 0);
    assert_eq!(test_scaffolding::cursors(&list).unwrap(), (10, 10));
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(1)))]
fn sizes() {
    let area = Area::new("sizes", 64 * KiB).unwrap();
    let list = List::create(&area, "events", "16:4").unwrap();
    let producer = list.producer();
    let mut consumer = list.consumer();

    assert_eq!(
        producer.post(&[0; 9]).unwrap_err(),
        Error::BufferTooSmall {
            capacity: 8,
            size: 9,
        },
    );

    // Отвергнутая запись не занимает номер.
    assert_eq!(producer.post(&[7; 8]).unwrap(), 4);

    let mut small = [0; 4];
    assert_eq!(
        consumer.get(&mut small).unwrap_err(),
        Error::BufferTooSmall {
            capacity: 4,
            size: 8,
        },
    );

    let mut buf = [0xFF; 8];
    assert_eq!(consumer.get(&mut buf).unwrap().element(), 4);
    assert_eq!(buf, [7; 8]);
    assert_eq!(consumer.get(&mut buf).unwrap_err(), Error::Empty);
    assert_eq!(test_scaffolding::cursors(&list).unwrap(), (5, 5));
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(1)))]
fn rejected_post_leaves_no_stale_record() {
    let area = Area::new("rejected_post_leaves_no_stale_record", 64 * KiB).unwrap();
    let list = List::create(&area, "events", "16:2").unwrap();
    let producer = list.producer();
    let mut consumer = list.consumer();
    let mut buf = [0; 8];

    producer.post(&[1; 8]).unwrap();
    producer.post(&[2; 8]).unwrap();
    for expected in [[1; 8], [2; 8]] {
        consumer.get(&mut buf).unwrap();
        assert_eq!(buf, expected);
    }

    assert_eq!(
        producer.post(&[9; 9]).unwrap_err(),
        Error::BufferTooSmall {
            capacity: 8,
            size: 9,
        },
    );
    assert_eq!(consumer.get(&mut buf).unwrap_err(), Error::Empty);
    assert_eq!(consumer.lost(), 0);

    producer.post(&[3; 8]).unwrap();
    consumer.get(&mut buf).unwrap();
    assert_eq!(buf, [3; 8]);
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(1)))]
fn lost_elements() {
    let area = Area::new("lost_elements", 64 * KiB).unwrap();
    let list = List::create(&area, "events", "16:4").unwrap();
    let producer = list.producer();
    let mut consumer = list.consumer();

    for event in 0 .. 10_u64 {
        producer.post(&event.to_le_bytes()).unwrap();
    }

    let mut buf = [0; 8];
    assert_eq!(consumer.get(&mut buf).unwrap_err(), Error::Lost { count: 6 });
    assert_eq!(consumer.lost(), 6);

    for event in 6 .. 10_u64 {
        let entry = consumer.get(&mut buf).unwrap();
        assert_eq!(entry.element(), 4 + event);
        assert_eq!(u64::from_le_bytes(buf), event);
    }

    assert_eq!(consumer.get(&mut buf).unwrap_err(), Error::Empty);
    assert_eq!(consumer.lost(), 6);
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(1)))]
fn out_of_order_commit() {
    let area = Area::new("out_of_order_commit", 64 * KiB).unwrap();
    let list = List::create(&area, "events", "16:8").unwrap();
    let slow = list.producer();
    let fast = slow.clone();
    let mut consumer = list.consumer();
    let mut buf = [0; 8];

    let early = slow.dequeue().unwrap();
    let late = fast.dequeue().unwrap();
    assert_eq!((early.element(), late.element()), (8, 9));
    assert_eq!((early.buffer(), late.buffer()), (0, 1));

    fast.write(&late, b"late").unwrap();
    fast.commit(late).unwrap();

    // Более ранняя запись не опубликована, поэтому не видна и поздняя.
    assert_eq!(consumer.get(&mut buf).unwrap_err(), Error::Empty);
    assert_eq!(test_scaffolding::cursors(&list).unwrap(), (8, 10));

    slow.write(&early, b"early").unwrap();
    slow.commit(early).unwrap();
    assert_eq!(test_scaffolding::cursors(&list).unwrap(), (10, 10));

    assert_eq!(consumer.get(&mut buf).unwrap().element(), 8);
    assert_eq!(&buf[.. 5], b"early");
    assert_eq!(consumer.get(&mut buf).unwrap().element(), 9);
    assert_eq!(&buf[.. 4], b"late");
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(1)))]
fn lookup() {
    let area = Area::new("lookup", 64 * KiB).unwrap();

    assert_eq!(List::get(&area, "events").unwrap_err(), Error::NotFound);

    area.create_chunk("other", 128).unwrap();
    assert!(matches!(List::get(&area, "other"), Err(Error::Corrupted(_))));

    List::create(&area, "events", "64:16").unwrap();
    assert_eq!(List::create(&area, "events", "64:16").unwrap_err(), Error::AlreadyExists);
    assert_eq!(List::get(&area, "events").unwrap().config().to_string(), "64:16");
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(30)))]
fn every_element_is_unique() {
    const THREADS: usize = 8;
    const EVENTS: usize = 2_000;

    let area = Area::new("every_element_is_unique", MiB).unwrap();
    let list = List::create_with(&area, "events", ListConfig::new(16, THREADS * EVENTS).unwrap()).unwrap();
    let barrier = Barrier::new(THREADS);

    let elements = thread::scope(|scope| {
        let threads = (0 .. THREADS)
            .map(|id| {
                let producer = list.producer();
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    (0 .. EVENTS)
                        .map(|event| producer.post(&event_payload(id, event)).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();

        threads.into_iter().flat_map(|producer| producer.join().unwrap()).collect::<Vec<_>>()
    });

    assert_eq!(elements.iter().collect::<HashSet<_>>().len(), THREADS * EVENTS);

    let mut consumer = list.consumer();
    let mut buf = [0; 8];
    let mut next_event = [0; THREADS];

    for _ in 0 .. THREADS * EVENTS {
        consumer.get(&mut buf).unwrap();
        let (id, event) = parse_payload(buf);
        assert_eq!(event, next_event[id]);
        next_event[id] += 1;
    }

    assert_eq!(consumer.get(&mut buf).unwrap_err(), Error::Empty);
    assert_eq!(consumer.lost(), 0);
    assert_eq!(next_event, [EVENTS; THREADS]);
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(30)))]
fn concurrent_consumer(
    #[values(4, 64, 1024)] count: usize,
) {
    const THREADS: usize = 4;
    const EVENTS: usize = 5_000;

    let area = Area::new("concurrent_consumer", MiB).unwrap();
    let list = List::create_with(&area, "events", ListConfig::new(16, count).unwrap()).unwrap();
    let barrier = Barrier::new(THREADS + 1);

    let stats = thread::scope(|scope| {
        for id in 0 .. THREADS {
            let producer = list.producer();
            let barrier = &barrier;
            scope.spawn(move || {
                let mut rng = SmallRng::seed_from_u64(SEED + id as u64);
                barrier.wait();
                for event in 0 .. EVENTS {
                    producer.post(&event_payload(id, event)).unwrap();
                    if rng.gen_ratio(1, 16) {
                        thread::yield_now();
                    }
                }
            });
        }

        let mut consumer = list.consumer();
        let mut buf = [0; 8];
        let mut last_event = [None; THREADS];
        let mut stats = Stats::default();
        barrier.wait();

        while stats.received + stats.lost < THREADS * EVENTS {
            match consumer.get(&mut buf) {
                Ok(_) => {
                    let (id, event) = parse_payload(buf);
                    assert!(last_event[id] < Some(event));
                    last_event[id] = Some(event);
                    stats = stats + Stats::received();
                },
                Err(Error::Lost { count }) => {
                    stats = stats + Stats::lost(count);
                },
                Err(Error::Empty) => {
                    stats = stats + Stats::empty();
                    thread::yield_now();
                },
                Err(error) => panic!("unexpected error {error:?}"),
            }
        }

        assert_eq!(u64::try_from(stats.lost).unwrap(), consumer.lost());
        stats
    });

    debug!(count, ?stats, "consumer is done");

    assert_eq!(stats.received + stats.lost, THREADS * EVENTS);
    if count >= THREADS * EVENTS {
        assert_eq!(stats.lost, 0);
    }
}

#[derive(Add, Clone, Copy, Debug, Default)]
struct Stats {
    received: usize,
    lost: usize,
    empty: usize,
}

impl Stats {
    fn received() -> Self {
        Self {
            received: 1,
            ..Self::default()
        }
    }

    fn lost(count: u64) -> Self {
        Self {
            lost: usize::try_from(count).unwrap(),
            ..Self::default()
        }
    }

    fn empty() -> Self {
        Self {
            empty: 1,
            ..Self::default()
        }
    }
}

fn event_payload(
    id: usize,
    event: usize,
) -> [u8; 8] {
    u64::try_from(id << 32 | event).unwrap().to_le_bytes()
}

fn parse_payload(payload: [u8; 8]) -> (usize, usize) {
    let payload = usize::try_from(u64::from_le_bytes(payload)).unwrap();
    (payload >> 32, payload & 0xFFFF_FFFF)
}

#[ctor::ctor]
fn init() {
    log::init();
}

const SEED: u64 = 314159265;
