use ::redis::aio::ConnectionManager;
use ::redis::{Client, Cmd, RedisError};

use crate::engine::{BloomReserve, RemoteEngine, RemoteError};

impl From<RedisError> for RemoteError {
    fn from(e: RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            RemoteError::Unavailable(e.to_string())
        } else {
            RemoteError::Command(e.to_string())
        }
    }
}

/// RedisEngine drives a Redis server with the RedisBloom module loaded.
///
/// The connection manager is cheap to clone and reconnects on its own, so
/// every command works on its own clone and independent requests never wait
/// on each other.
#[derive(Clone)]
pub struct RedisEngine {
    conn: ConnectionManager,
}

impl RedisEngine {
    /// connect opens a managed connection to `url` and pings the server.
    pub async fn connect(url: &str) -> Result<Self, RemoteError> {
        let client = Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;

        let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;

        Ok(Self { conn })
    }
}

/// bf_insert_cmd builds
/// `BF.INSERT <key> CAPACITY <n> ERROR <p> [EXPANSION <e> | NONSCALING] ITEMS <value>`.
///
/// A plain BF.ADD would create a missing filter with the server defaults, so
/// every add carries the declared tuning.
fn bf_insert_cmd(key: &str, reserve: &BloomReserve, value: &[u8]) -> Cmd {
    let mut cmd = ::redis::cmd("BF.INSERT");
    cmd.arg(key)
        .arg("CAPACITY")
        .arg(reserve.capacity)
        .arg("ERROR")
        .arg(reserve.error_rate);
    if reserve.non_scaling {
        cmd.arg("NONSCALING");
    } else if reserve.expansion > 0 {
        cmd.arg("EXPANSION").arg(reserve.expansion);
    }
    cmd.arg("ITEMS").arg(value);
    cmd
}

fn bf_exists_cmd(key: &str, value: &[u8]) -> Cmd {
    let mut cmd = ::redis::cmd("BF.EXISTS");
    cmd.arg(key).arg(value);
    cmd
}

fn pf_add_cmd(key: &str, value: &[u8]) -> Cmd {
    let mut cmd = ::redis::cmd("PFADD");
    cmd.arg(key).arg(value);
    cmd
}

fn pf_count_cmd(key: &str) -> Cmd {
    let mut cmd = ::redis::cmd("PFCOUNT");
    cmd.arg(key);
    cmd
}

#[async_trait]
impl RemoteEngine for RedisEngine {
    async fn bf_add(&self, key: &str, reserve: &BloomReserve, value: &[u8]) -> Result<bool, RemoteError> {
        let mut conn = self.conn.clone();
        // one reply per item
        let added: Vec<bool> = bf_insert_cmd(key, reserve, value)
            .query_async(&mut conn)
            .await?;
        added
            .first()
            .copied()
            .ok_or_else(|| RemoteError::Command(format!("BF.INSERT {} returned no reply", key)))
    }

    async fn bf_exists(&self, key: &str, value: &[u8]) -> Result<bool, RemoteError> {
        let mut conn = self.conn.clone();
        let exists: bool = bf_exists_cmd(key, value).query_async(&mut conn).await?;
        Ok(exists)
    }

    async fn pf_add(&self, key: &str, value: &[u8]) -> Result<bool, RemoteError> {
        let mut conn = self.conn.clone();
        let changed: bool = pf_add_cmd(key, value).query_async(&mut conn).await?;
        Ok(changed)
    }

    async fn pf_count(&self, key: &str) -> Result<u64, RemoteError> {
        let mut conn = self.conn.clone();
        let count: u64 = pf_count_cmd(key).query_async(&mut conn).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use ::redis::{Arg, Cmd, ErrorKind, RedisError};

    use crate::engine::redis::{bf_exists_cmd, bf_insert_cmd, pf_add_cmd, pf_count_cmd};
    use crate::engine::{BloomReserve, RemoteError};

    fn args(cmd: &Cmd) -> Vec<String> {
        cmd.args_iter()
            .map(|arg| match arg {
                Arg::Simple(data) => String::from_utf8_lossy(data).into_owned(),
                Arg::Cursor => "<cursor>".to_string(),
            })
            .collect()
    }

    fn reserve(expansion: u32, non_scaling: bool) -> BloomReserve {
        BloomReserve {
            capacity: 1000,
            error_rate: 0.0001,
            expansion,
            non_scaling,
        }
    }

    #[test]
    fn test_bf_insert_carries_tuning() {
        let cmd = bf_insert_cmd("f", &reserve(0, false), b"alice");
        assert_eq!(
            args(&cmd),
            vec!["BF.INSERT", "f", "CAPACITY", "1000", "ERROR", "0.0001", "ITEMS", "alice"]
        );

        let cmd = bf_insert_cmd("f", &reserve(4, false), b"alice");
        assert_eq!(
            args(&cmd),
            vec![
                "BF.INSERT", "f", "CAPACITY", "1000", "ERROR", "0.0001", "EXPANSION", "4", "ITEMS",
                "alice"
            ]
        );

        let cmd = bf_insert_cmd("f", &reserve(4, true), b"alice");
        assert_eq!(
            args(&cmd),
            vec![
                "BF.INSERT", "f", "CAPACITY", "1000", "ERROR", "0.0001", "NONSCALING", "ITEMS",
                "alice"
            ]
        );
    }

    #[test]
    fn test_read_and_counter_commands() {
        assert_eq!(args(&bf_exists_cmd("f", b"bob")), vec!["BF.EXISTS", "f", "bob"]);
        assert_eq!(args(&pf_add_cmd("c", b"ip1")), vec!["PFADD", "c", "ip1"]);
        assert_eq!(args(&pf_count_cmd("c")), vec!["PFCOUNT", "c"]);
    }

    #[test]
    fn test_error_mapping() {
        let e: RemoteError = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ))
        .into();
        assert!(matches!(e, RemoteError::Unavailable(_)));

        let e: RemoteError = RedisError::from((ErrorKind::ResponseError, "ERR unknown command")).into();
        assert!(matches!(e, RemoteError::Command(_)));
    }
}
