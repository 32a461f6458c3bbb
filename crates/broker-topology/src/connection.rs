//! Broker connection supervisor: connects with exponential backoff and
//! reconnects on drop, instead of a recursive self-restart from inside an
//! event handler.

use lapin::{Connection, ConnectionProperties};
use std::time::Duration;
use tracing::{error, info, warn};

pub async fn connect_with_backoff(url: &str) -> Connection {
    let mut backoff = Duration::from_millis(500);
    const MAX_BACKOFF: Duration = Duration::from_secs(30);

    loop {
        match Connection::connect(url, ConnectionProperties::default().with_executor(tokio_executor_trait::Tokio::current()).with_reactor(tokio_reactor_trait::Tokio)).await {
            Ok(conn) => {
                info!("connected to broker");
                return conn;
            }
            Err(e) => {
                warn!(error = %e, backoff_ms = backoff.as_millis(), "broker connect failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

/// Runs `body` to completion; if the connection drops mid-run, reconnects
/// with backoff and calls `body` again. An explicit supervisor loop, never
/// a self-restart scheduled from inside an event handler.
pub async fn supervise<F, Fut>(url: String, mut body: F)
where
    F: FnMut(Connection) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    loop {
        let conn = connect_with_backoff(&url).await;
        body(conn).await;
        error!("broker session ended, reconnecting");
    }
}
