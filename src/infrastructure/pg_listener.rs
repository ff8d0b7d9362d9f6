//! PostgreSQL `LISTEN` connection feeding the outbox tailer.
//!
//! Diesel connections are synchronous, so the connection lives on a
//! blocking thread. The thread drains pending notifications on a short
//! interval and hands their payloads to an async channel; the tailer only
//! ever awaits that channel.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use log::{debug, info};
use tokio::sync::{mpsc, oneshot};

use crate::domain::ports::{ChangeNotifier, Subscription};
use crate::errors::NotifierError;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_CAPACITY: usize = 1024;

pub struct PgChangeNotifier {
    database_url: String,
    poll_interval: Duration,
    keepalive_interval: Duration,
    capacity: usize,
}

impl PgChangeNotifier {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl ChangeNotifier for PgChangeNotifier {
    async fn listen(&self, channel: &str) -> Result<Subscription, NotifierError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(self.capacity);
        let listener = ListenerThread {
            database_url: self.database_url.clone(),
            channel: channel.to_string(),
            poll_interval: self.poll_interval,
            keepalive_interval: self.keepalive_interval,
        };

        tokio::task::spawn_blocking(move || listener.run(ready_tx, tx));

        match ready_rx.await {
            Ok(Ok(())) => Ok(Subscription { notifications: rx }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(NotifierError::Connect(
                "listener thread exited before subscribing".to_string(),
            )),
        }
    }
}

struct ListenerThread {
    database_url: String,
    channel: String,
    poll_interval: Duration,
    keepalive_interval: Duration,
}

impl ListenerThread {
    fn run(
        self,
        ready: oneshot::Sender<Result<(), NotifierError>>,
        notifications: mpsc::Sender<Result<String, NotifierError>>,
    ) {
        let mut conn = match self.subscribe() {
            Ok(conn) => conn,
            Err(e) => {
                // `listen` may have been dropped already.
                ready.send(Err(e)).ok();
                return;
            }
        };
        if ready.send(Ok(())).is_err() {
            return;
        }

        let mut last_check = Instant::now();
        loop {
            if notifications.is_closed() {
                debug!("Listener on '{}' released", self.channel);
                return;
            }

            for notification in conn.notifications_iter() {
                match notification {
                    Ok(n) if n.channel == self.channel => {
                        if notifications.blocking_send(Ok(n.payload)).is_err() {
                            return;
                        }
                    }
                    Ok(n) => debug!("Ignoring notification on channel '{}'", n.channel),
                    Err(e) => {
                        // Last item either way; a closed receiver needs no report.
                        notifications
                            .blocking_send(Err(NotifierError::ConnectionLost(e.to_string())))
                            .ok();
                        return;
                    }
                }
            }

            // A silently dropped socket only shows up on the next round trip.
            if last_check.elapsed() >= self.keepalive_interval {
                if let Err(e) = diesel::sql_query("SELECT 1").execute(&mut conn) {
                    notifications
                        .blocking_send(Err(NotifierError::ConnectionLost(e.to_string())))
                        .ok();
                    return;
                }
                last_check = Instant::now();
            }

            std::thread::sleep(self.poll_interval);
        }
    }

    fn subscribe(&self) -> Result<PgConnection, NotifierError> {
        let mut conn = PgConnection::establish(&self.database_url)
            .map_err(|e| NotifierError::Connect(e.to_string()))?;
        diesel::sql_query(format!("LISTEN {}", quote_identifier(&self.channel)))
            .execute(&mut conn)
            .map_err(|e| NotifierError::Listen {
                channel: self.channel.clone(),
                message: e.to_string(),
            })?;
        info!("LISTEN issued on channel '{}'", self.channel);
        Ok(conn)
    }
}

/// Quote a channel name as a PostgreSQL identifier.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
