use std::{
    thread,
    time::Duration,
};

use rstest::rstest;

use shmc::{
    error::Error,
    ipc::{
        ClientSession,
        ServerSession,
        SessionConfig,
        ring,
        session::{
            INFO,
            RX_RING,
            TX_RING,
            generate_mac,
        },
    },
    log::info,
    memory::{
        KiB,
        Namespace,
    },
};

mod log;

const HW_ADDR: [u8; 6] = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
const TIMEOUT: Duration = Duration::from_secs(4);

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(5)))]
fn session() {
    let namespace = Namespace::new();
    let config = SessionConfig::default();
    let area = namespace.create("session", 16 * KiB).unwrap();

    let mut client = ClientSession::create(&area, &config).unwrap();
    assert_eq!(area.chunk_names().unwrap(), [TX_RING, RX_RING, INFO]);

    let mut server =
        ServerSession::attach(&namespace.attach("session").unwrap(), &config, HW_ADDR, 7, TIMEOUT).unwrap();

    assert_eq!(server.mac(), generate_mac(HW_ADDR, 7));
    assert_eq!(client.info().mac().unwrap(), server.mac());
    assert_eq!(client.info().mtu().unwrap(), 1500);

    let mut buf = [0; 2048];

    client.send(b"twenty bytes of data").unwrap();
    server.wait_for_data_timeout(TIMEOUT).unwrap();
    assert_eq!(server.transmit(&mut buf).unwrap(), 20);
    assert_eq!(&buf[.. 20], b"twenty bytes of data");
    assert_eq!(server.transmit(&mut buf).unwrap_err(), Error::Empty);

    server.deliver(b"pong").unwrap();
    client.wait_for_data_timeout(TIMEOUT).unwrap();
    assert_eq!(client.receive(&mut buf).unwrap(), 4);
    assert_eq!(&buf[.. 4], b"pong");

    let snapshot = client.info().snapshot().unwrap();
    info!(%snapshot);
    assert_eq!(snapshot.num_tx, 1);
    assert_eq!(snapshot.tx_bytes, 20);
    assert_eq!(snapshot.num_rx, 1);
    assert_eq!(snapshot.rx_bytes, 4);
    assert_eq!(snapshot.tx_dropped, 0);
    assert_eq!(snapshot.rx_dropped, 0);
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(5)))]
fn drops() {
    let namespace = Namespace::new();
    let config = SessionConfig {
        buffer_size: 64,
        mtu: 32,
    };
    let area = namespace.create("drops", 4 * KiB).unwrap();

    let mut client = ClientSession::create(&area, &config).unwrap();
    let mut server = ServerSession::attach(&area, &config, HW_ADDR, 0, TIMEOUT).unwrap();

    // Пакет больше буфера сервера отбрасывается, следующий за ним доходит.
    client.send(&[0xAA; 40]).unwrap();
    client.send(&[0xBB; 8]).unwrap();

    let mut buf = [0; 32];
    assert_eq!(
        server.transmit(&mut buf).unwrap_err(),
        Error::BufferTooSmall {
            capacity: 32,
            size: 40,
        },
    );
    assert_eq!(server.transmit(&mut buf).unwrap(), 8);

    // Кольцо клиента переполнено: сервер учитывает потерю.
    server.deliver(&[1; 24]).unwrap();
    server.deliver(&[2; 24]).unwrap();
    assert!(matches!(
        server.deliver(&[3; 24]),
        Err(Error::Ring(ring::Error::WouldOverflow { .. })),
    ));

    let snapshot = server.info().snapshot().unwrap();
    assert_eq!(snapshot.tx_dropped, 1);
    assert_eq!(snapshot.num_tx, 1);
    assert_eq!(snapshot.tx_bytes, 8);
    assert_eq!(snapshot.num_rx, 2);
    assert_eq!(snapshot.rx_dropped, 1);
    assert_eq!(snapshot.rx_bytes, 48);

    assert_eq!(client.receive(&mut buf).unwrap(), 24);
    assert_eq!(buf[.. 24], [1; 24]);
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(10)))]
fn ping_pong() {
    const ROUNDS: u32 = 1_000;

    let namespace = Namespace::new();
    let config = SessionConfig::default();

    thread::scope(|scope| {
        let server = scope.spawn(|| {
            let area = namespace.attach_timeout("ping_pong", TIMEOUT).unwrap();
            let mut server = ServerSession::attach(&area, &config, HW_ADDR, 1, TIMEOUT).unwrap();
            let mut buf = [0; 2048];

            for _ in 0 .. ROUNDS {
                server.wait_for_data_timeout(TIMEOUT).unwrap();
                let size = server.transmit(&mut buf).unwrap();
                server.deliver(&buf[.. size]).unwrap();
            }
        });

        let area = namespace.create("ping_pong", 16 * KiB).unwrap();
        let mut client = ClientSession::create(&area, &config).unwrap();
        let mut buf = [0; 2048];

        for round in 0 .. ROUNDS {
            let ping = round.to_le_bytes();
            client.send(&ping).unwrap();
            client.wait_for_data_timeout(TIMEOUT).unwrap();
            assert_eq!(client.receive(&mut buf).unwrap(), ping.len());
            assert_eq!(buf[.. ping.len()], ping);
        }

        server.join().unwrap();

        let snapshot = client.info().snapshot().unwrap();
        assert_eq!(snapshot.num_tx, u64::from(ROUNDS));
        assert_eq!(snapshot.num_rx, u64::from(ROUNDS));
        assert_eq!(snapshot.mac, generate_mac(HW_ADDR, 1));
    });
}

#[rstest]
#[cfg_attr(not(miri), timeout(Duration::from_secs(1)))]
fn attach_without_client() {
    let namespace = Namespace::new();
    let area = namespace.create("attach_without_client", 4 * KiB).unwrap();

    assert_eq!(
        ServerSession::attach(&area, &SessionConfig::default(), HW_ADDR, 0, Duration::from_millis(10))
            .unwrap_err(),
        Error::Timeout,
    );
}

#[ctor::ctor]
fn init() {
    log::init();
}
