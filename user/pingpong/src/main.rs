//! Обмен пакетами между клиентской и серверной сессиями через разделяемую память.
//!
//! Клиент создаёт в области сессию и отправляет пакеты случайного размера,
//! сервер подключается к ней и отражает каждый пакет обратно.
//! Статистика сессии периодически журналируется по таймеру.

#![warn(clippy::missing_docs_in_private_items)]

use std::{
    env,
    process::ExitCode,
    thread,
    time::Duration,
};

use rand::{
    Rng,
    SeedableRng,
    rngs::SmallRng,
};
use tracing_core::LevelFilter;
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

use ddekit::{
    TimerConfig,
    TimerService,
};
use shmc::{
    error::{
        Error::{
            Corrupted,
            NoMemory,
        },
        Result,
    },
    ipc::{
        ClientSession,
        ServerSession,
        info::format_mac,
    },
    log::{
        debug,
        error,
        info,
        warn,
    },
    memory::{
        KiB,
        Namespace,
    },
    time,
};

use args::{
    Args,
    MIN_PAYLOAD_SIZE,
    PACKET_HEADER_SIZE,
    USAGE,
};

/// Разбор аргументов командной строки.
mod args;

/// Аппаратный адрес, из которого сервер выводит MAC--адрес сессии.
/// Он же служит MAC--адресом самого сервера.
const HW_ADDR: [u8; 6] = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];

/// Широковещательный MAC--адрес.
const BROADCAST: [u8; 6] = [0xFF; 6];

/// Байт, которым заполняется полезная нагрузка пакетов.
const PAYLOAD: u8 = 0x1B;

/// Сколько ждать пакета от другой стороны.
const TIMEOUT: Duration = Duration::from_secs(5);

/// Период журналирования статистики сессии в миллисекундах.
const STATS_PERIOD_MS: u64 = 1_000;

fn main() -> ExitCode {
    init_log();

    let args = match Args::parse(env::args().skip(1)) {
        Ok(args) => args,
        Err(error) => {
            error!(?error, "invalid arguments");
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        },
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(?error, "pingpong failed");
            ExitCode::FAILURE
        },
    }
}

/// Запускает клиента и сервер в двух потоках.
fn run(args: &Args) -> Result<()> {
    let namespace = Namespace::new();
    let area_size = 2 * args.session.buffer_size + 16 * KiB;

    info!(shm_name = %args.shm_name, buffer_size = args.session.buffer_size, rounds = args.rounds, "start");

    thread::scope(|scope| -> Result<()> {
        let pong = thread::Builder::new()
            .name("pong".into())
            .spawn_scoped(scope, || pong(&namespace, args))
            .map_err(|_| NoMemory)?;

        let area = namespace.create(&args.shm_name, area_size)?;
        let client = ClientSession::create(&area, &args.session)?;
        let pinged = ping(client, args);

        pong.join().map_err(|_| Corrupted("the pong thread panicked"))??;
        pinged
    })
}

/// Клиентская сторона: отправляет пакеты и проверяет отражённые.
fn ping(
    mut client: ClientSession,
    args: &Args,
) -> Result<()> {
    let timers = TimerService::new(TimerConfig::default())?;
    let stats_period = timers.ms_to_jiffies(STATS_PERIOD_MS);
    let session_info = client.info().clone();
    timers.add_periodic(
        move || match session_info.snapshot() {
            Ok(snapshot) => info!(%snapshot, "session statistics"),
            Err(error) => warn!(?error, "failed to read session statistics"),
        },
        timers.jiffies() + stats_period,
        stats_period,
    )?;

    let mut rng = SmallRng::seed_from_u64(time::timestamp());
    let mut tx = vec![0; args.max_packet_size()];
    let mut rx = vec![0; args.max_packet_size()];
    let mut peer = None;

    for round in 0 .. args.rounds {
        let (mac, partner) = peer.unwrap_or(([0; 6], BROADCAST));
        let payload = rng.gen_range(MIN_PAYLOAD_SIZE ..= args.max_packet_size() - PACKET_HEADER_SIZE);
        let size = PACKET_HEADER_SIZE + payload;

        fill_packet(&mut tx[.. size], partner, mac);
        client.send(&tx[.. size])?;

        client.wait_for_data_timeout(TIMEOUT)?;
        let received = client.receive(&mut rx)?;
        if received != size {
            return Err(Corrupted("reflected packet size mismatch"));
        }

        // К первому ответу сервер уже назначил сессии MAC--адрес.
        let (mac, partner) = match peer {
            Some(peer) => peer,
            None => {
                let learned = (client.info().mac()?, source(&rx));
                info!(mac = %format_mac(learned.0), partner = %format_mac(learned.1), "learned addresses");
                peer = Some(learned);
                learned
            },
        };
        check_packet(&rx[.. received], mac, partner)?;

        if round % 10_000 == 0 {
            debug!(round, size, "ping");
        }
    }

    let snapshot = client.info().snapshot()?;
    info!(%snapshot, "done");

    Ok(())
}

/// Серверная сторона: отражает каждый полученный пакет.
fn pong(
    namespace: &Namespace,
    args: &Args,
) -> Result<()> {
    let area = namespace.attach_timeout(&args.shm_name, TIMEOUT)?;
    let mut server = ServerSession::attach(&area, &args.session, HW_ADDR, 0, TIMEOUT)?;
    let client = server.mac();
    let mut buf = vec![0; args.max_packet_size()];

    for _ in 0 .. args.rounds {
        server.wait_for_data_timeout(TIMEOUT)?;
        let size = server.transmit(&mut buf)?;
        let packet = &mut buf[.. size];

        // Первый пакет клиент отправляет, ещё не зная адресов.
        if destination(packet) != BROADCAST {
            check_packet(packet, HW_ADDR, client)?;
        }

        fill_packet(packet, client, HW_ADDR);
        server.deliver(packet)?;
    }

    Ok(())
}

/// Заполняет пакет заголовком и полезной нагрузкой.
fn fill_packet(
    packet: &mut [u8],
    destination: [u8; 6],
    source: [u8; 6],
) {
    packet[.. 6].copy_from_slice(&destination);
    packet[6 .. PACKET_HEADER_SIZE].copy_from_slice(&source);
    packet[PACKET_HEADER_SIZE ..].fill(PAYLOAD);
}

/// Проверяет заголовок и полезную нагрузку пакета.
fn check_packet(
    packet: &[u8],
    destination: [u8; 6],
    source: [u8; 6],
) -> Result<()> {
    if self::destination(packet) != destination {
        warn!(
            expected = %format_mac(destination),
            actual = %format_mac(self::destination(packet)),
            "destination mismatch"
        );
        return Err(Corrupted("destination mismatch"));
    }

    if self::source(packet) != source {
        warn!(
            expected = %format_mac(source),
            actual = %format_mac(self::source(packet)),
            "source mismatch"
        );
        return Err(Corrupted("source mismatch"));
    }

    if packet[PACKET_HEADER_SIZE ..].iter().any(|&byte| byte != PAYLOAD) {
        return Err(Corrupted("payload mismatch"));
    }

    Ok(())
}

/// MAC--адрес получателя пакета.
fn destination(packet: &[u8]) -> [u8; 6] {
    let mut mac = [0; 6];
    mac.copy_from_slice(&packet[.. 6]);
    mac
}

/// MAC--адрес отправителя пакета.
fn source(packet: &[u8]) -> [u8; 6] {
    let mut mac = [0; 6];
    mac.copy_from_slice(&packet[6 .. PACKET_HEADER_SIZE]);
    mac
}

/// Устанавливает подписчика [`tracing`].
/// Уровень журналирования задаётся переменной окружения `RUST_LOG`, по умолчанию `info`.
fn init_log() {
    let filter = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy();

    let format = fmt::format()
        .with_level(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(true)
        .compact();

    tracing_subscriber::fmt().event_format(format).with_env_filter(filter).init();
}
