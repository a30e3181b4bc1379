use shmc::{
    error::{
        Error::{
            Config,
            InvalidArgument,
        },
        Result,
    },
    ipc::{
        SessionConfig,
        ring::FRAME_HEADER_SIZE,
    },
};

/// Размер заголовка пакета: MAC--адреса получателя и отправителя.
pub const PACKET_HEADER_SIZE: usize = 12;

/// Минимальный размер полезной нагрузки пакета.
pub const MIN_PAYLOAD_SIZE: usize = 20;

/// Максимальный размер пакета.
pub const MAX_PACKET_SIZE: usize = 1024;

/// Количество обменов пакетами по умолчанию.
pub const DEFAULT_ROUNDS: u64 = 100_000;

/// Строка с описанием использования.
pub const USAGE: &str = "usage: pingpong <shm_name> [-bufsize <n>] [-rounds <n>]";

/// Аргументы командной строки.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Args {
    /// Имя разделяемой области.
    pub shm_name: String,

    /// Параметры сессии.
    pub session: SessionConfig,

    /// Количество обменов пакетами.
    pub rounds: u64,
}

impl Args {
    /// Разбирает аргументы командной строки без имени программы.
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut args = args.into_iter();
        let mut shm_name = None;
        let mut session = SessionConfig::default();
        let mut rounds = DEFAULT_ROUNDS;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-bufsize" => session.buffer_size = value(args.next())?,
                "-rounds" => rounds = value(args.next())?,
                _ if arg.starts_with('-') => return Err(Config("unknown option")),
                _ if shm_name.is_none() => shm_name = Some(arg),
                _ => return Err(Config("unexpected argument")),
            }
        }

        let args = Self {
            shm_name: shm_name.ok_or(Config("missing shm_name"))?,
            session,
            rounds,
        };

        if args.max_packet_size() < PACKET_HEADER_SIZE + MIN_PAYLOAD_SIZE {
            return Err(Config("buffer size is too small"));
        }

        Ok(args)
    }

    /// Максимальный размер пакета, помещающийся в кольцевой буфер сессии.
    pub fn max_packet_size(&self) -> usize {
        self.session.buffer_size.saturating_sub(FRAME_HEADER_SIZE).min(MAX_PACKET_SIZE)
    }
}

/// Разбирает числовое значение опции.
fn value<T: std::str::FromStr>(value: Option<String>) -> Result<T> {
    value.ok_or(Config("missing option value"))?.parse().map_err(|_| InvalidArgument)
}

#[cfg(test)]
mod test {
    use shmc::Error;

    use super::{
        Args,
        DEFAULT_ROUNDS,
    };

    fn parse(args: &[&str]) -> Result<Args, Error> {
        Args::parse(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn defaults() {
        let args = parse(&["ankh"]).unwrap();

        assert_eq!(args.shm_name, "ankh");
        assert_eq!(args.session.buffer_size, 2048);
        assert_eq!(args.rounds, DEFAULT_ROUNDS);
        assert_eq!(args.max_packet_size(), 1024);
    }

    #[test]
    fn options() {
        let args = parse(&["-bufsize", "256", "ankh", "-rounds", "10"]).unwrap();

        assert_eq!(args.shm_name, "ankh");
        assert_eq!(args.session.buffer_size, 256);
        assert_eq!(args.rounds, 10);
        assert_eq!(args.max_packet_size(), 248);
    }

    #[test]
    fn invalid() {
        assert!(matches!(parse(&[]), Err(Error::Config(_))));
        assert!(matches!(parse(&["ankh", "other"]), Err(Error::Config(_))));
        assert!(matches!(parse(&["ankh", "-bufsize"]), Err(Error::Config(_))));
        assert!(matches!(parse(&["ankh", "-bufsize", "big"]), Err(Error::InvalidArgument)));
        assert!(matches!(parse(&["ankh", "-bufsize", "16"]), Err(Error::Config(_))));
        assert!(matches!(parse(&["ankh", "-verbose"]), Err(Error::Config(_))));
    }
}
