use std::{
    collections::HashSet,
    sync::Barrier,
    thread,
    time::Duration,
};

use rstest::rstest;

use shmc::{
    error::Error,
    log::debug,
    memory::{
        Area,
        ChunkStatus,
        KiB,
        Namespace,
        Page,
        area::test_scaffolding::{
            self,
            DESCRIPTOR_SIZE,
            HEADER_SIZE,
        },
    },
};

mod log;

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(1)))]
fn create_and_get() {
    let area = Area::new("create_and_get", 4 * KiB).unwrap();

    let chunk = area.create_chunk("info", 20).unwrap();
    assert_eq!(chunk.size(), 20);
    assert_eq!(chunk.capacity(), 24);
    assert_eq!(chunk.offset(), HEADER_SIZE + DESCRIPTOR_SIZE);
    assert!(chunk.is_ready());

    chunk.write(0, b"twenty bytes of data").unwrap();

    let peer = area.get_chunk("info", 20).unwrap();
    let mut data = [0; 20];
    peer.read(0, &mut data).unwrap();
    assert_eq!(&data, b"twenty bytes of data");

    assert_eq!(area.get_chunk("missing", 20).unwrap_err(), Error::NotFound);
    assert_eq!(
        area.get_chunk("info", 64).unwrap_err(),
        Error::SizeMismatch {
            expected: 64,
            actual: 20,
        },
    );
    assert_eq!(area.create_chunk("info", 8).unwrap_err(), Error::AlreadyExists);
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(1)))]
fn chunk_accessors_are_bounded() {
    let area = Area::new("chunk_accessors_are_bounded", Page::SIZE).unwrap();
    let chunk = area.create_chunk("small", 16).unwrap();

    assert!(chunk.atomic_u64(8).is_ok());
    assert!(matches!(chunk.atomic_u64(16), Err(Error::OutOfBounds { .. })));
    assert!(matches!(chunk.write(10, &[0; 8]), Err(Error::OutOfBounds { .. })));
    assert_eq!(chunk.atomic_u64(4).unwrap_err(), Error::InvalidAlignment);
}

#[rstest]
#[case("")]
#[case("a name that is longer than thirty two bytes")]
#[case("nul\0inside")]
#[cfg_attr(not(miri), timeout(Duration::from_secs(1)))]
fn invalid_names(#[case] name: &str) {
    let area = Area::new("invalid_names", Page::SIZE).unwrap();
    assert_eq!(area.add_chunk(name, 8).unwrap_err(), Error::InvalidArgument);
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(1)))]
fn directory() {
    let area = Area::new("directory", Page::SIZE).unwrap();
    let initial_free = area.free_size().unwrap();
    assert_eq!(initial_free, Page::SIZE - HEADER_SIZE - DESCRIPTOR_SIZE);

    for (name, size) in [("tx_ring", 100), ("rx_ring", 100), ("info", 64)] {
        area.create_chunk(name, size).unwrap();
    }

    assert_eq!(area.chunk_names().unwrap(), ["tx_ring", "rx_ring", "info"]);
    assert_eq!(
        area.free_size().unwrap(),
        initial_free - 3 * DESCRIPTOR_SIZE - 104 - 104 - 64,
    );

    let free = area.free_size().unwrap();
    let last = area.create_chunk("last", free).unwrap();
    debug!(?last, "filled the area");
    assert_eq!(area.free_size().unwrap(), 0);
    assert_eq!(area.create_chunk("one_more", 1).unwrap_err(), Error::NoMemory);
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(1)))]
fn unpublished_chunk_is_not_found() {
    let area = Area::new("unpublished_chunk_is_not_found", Page::SIZE).unwrap();

    let chunk = area.add_chunk("ring", 64).unwrap();
    assert_eq!(chunk.status().unwrap(), ChunkStatus::Clear);
    assert_eq!(area.get_chunk("ring", 64).unwrap_err(), Error::NotFound);
    assert_eq!(
        area.get_chunk_timeout("ring", 64, Duration::from_millis(20)).unwrap_err(),
        Error::Timeout,
    );
    assert_eq!(area.chunk_names().unwrap(), ["ring"]);

    chunk.publish().unwrap();
    assert_eq!(area.get_chunk("ring", 64).unwrap().status().unwrap(), ChunkStatus::Ready);
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(5)))]
fn peer_waits_for_publication() {
    let area = Area::new("peer_waits_for_publication", Page::SIZE).unwrap();
    let chunk = area.add_chunk("info", 8).unwrap();

    let peer = {
        let area = area.clone();
        thread::spawn(move || {
            let chunk = area.get_chunk_timeout("info", 8, Duration::from_secs(4)).unwrap();
            chunk.atomic_u64(0).unwrap().load(std::sync::atomic::Ordering::Relaxed)
        })
    };

    thread::sleep(Duration::from_millis(20));
    chunk.atomic_u64(0).unwrap().store(0xC0FFEE, std::sync::atomic::Ordering::Relaxed);
    chunk.publish().unwrap();

    assert_eq!(peer.join().unwrap(), 0xC0FFEE);
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(10)))]
fn concurrent_creation() {
    const THREADS: usize = 8;
    const CHUNKS: usize = 16;

    let area = Area::new("concurrent_creation", 64 * KiB).unwrap();
    let barrier = Barrier::new(THREADS);

    let created = thread::scope(|scope| {
        let threads = (0 .. THREADS)
            .map(|thread| {
                let area = &area;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    let mut created = 0;
                    for chunk in 0 .. CHUNKS {
                        // Половина имён общая для всех потоков.
                        let name = if chunk % 2 == 0 {
                            format!("shared_{chunk}")
                        } else {
                            format!("own_{thread}_{chunk}")
                        };
                        match area.create_chunk(&name, 8 * (chunk + 1)) {
                            Ok(_) => created += 1,
                            Err(Error::AlreadyExists) => {},
                            Err(error) => panic!("unexpected error {error:?}"),
                        }
                    }
                    created
                })
            })
            .collect::<Vec<_>>();

        threads.into_iter().map(|thread| thread.join().unwrap()).sum::<usize>()
    });

    let names = area.chunk_names().unwrap();
    let unique = names.iter().collect::<HashSet<_>>();

    assert_eq!(created, CHUNKS / 2 + THREADS * CHUNKS / 2);
    assert_eq!(names.len(), created);
    assert_eq!(unique.len(), names.len());

    for name in names {
        assert!(area.find_chunk(&name).unwrap().is_ready());
    }
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(1)))]
fn corrupted_directory() {
    let area = Area::new("corrupted_directory", Page::SIZE).unwrap();
    area.create_chunk("first", 8).unwrap();

    test_scaffolding::corrupt(&area, test_scaffolding::FIRST_CHUNK, 8).unwrap();

    assert!(matches!(area.chunk_names(), Err(Error::Corrupted(_))));
    assert!(matches!(area.get_chunk("first", 8), Err(Error::Corrupted(_))));
    assert!(matches!(area.add_chunk("second", 8), Err(Error::Corrupted(_))));
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(1)))]
fn signals() {
    let area = Area::new("signals", Page::SIZE).unwrap();

    let signal = area.add_signal("tx_signal").unwrap();
    assert_eq!(area.add_signal("tx_signal").unwrap_err(), Error::AlreadyExists);
    assert_eq!(area.get_signal("rx_signal").unwrap_err(), Error::NotFound);

    area.get_signal("tx_signal").unwrap().trigger();
    assert!(signal.try_wait());
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(5)))]
fn namespace() {
    let namespace = Namespace::new();

    assert_eq!(namespace.attach("ankh").unwrap_err(), Error::NotFound);
    assert_eq!(
        namespace.attach_timeout("ankh", Duration::from_millis(10)).unwrap_err(),
        Error::Timeout,
    );

    let area = namespace.create("ankh", 3 * Page::SIZE - 1).unwrap();
    assert_eq!(area.size(), 3 * Page::SIZE);
    assert_eq!(namespace.create("ankh", Page::SIZE).unwrap_err(), Error::AlreadyExists);

    area.create_chunk("info", 8).unwrap();

    let peer = namespace.attach("ankh").unwrap();
    assert_eq!(peer.name(), "ankh");
    assert_eq!(peer.get_chunk("info", 8).unwrap().offset(), HEADER_SIZE + DESCRIPTOR_SIZE);

    namespace.remove("ankh").unwrap();
    assert_eq!(namespace.attach("ankh").unwrap_err(), Error::NotFound);
    assert_eq!(namespace.remove("ankh").unwrap_err(), Error::NotFound);

    // Дескрипторы, полученные до удаления, продолжают работать.
    assert!(peer.get_chunk("info", 8).is_ok());
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(5)))]
fn attach_waits_for_creation() {
    let namespace = Namespace::new();

    thread::scope(|scope| {
        let peer = scope.spawn(|| namespace.attach_timeout("late", Duration::from_secs(4)));
        thread::sleep(Duration::from_millis(20));
        namespace.create("late", Page::SIZE).unwrap();
        assert_eq!(peer.join().unwrap().unwrap().name(), "late");
    });
}

#[ctor::ctor]
fn init() {
    log::init();
}
