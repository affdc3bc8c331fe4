use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use meshcp_core::config::LeaderConfig;
use meshcp_core::{LeaderElector, LeadershipFlag, MeshError, Result};

/// Leader election using a PostgreSQL advisory lock.
///
/// The lock is session scoped, so the winning instance keeps the connection it
/// locked on for as long as it leads. Losing that connection means losing
/// leadership.
pub struct PgLeaderElection {
    pool: sqlx::PgPool,
    lock_id: i64,
    check_interval: Duration,
    flag: LeadershipFlag,
    session: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgLeaderElection {
    /// Create a new leader election instance.
    pub fn new(pool: sqlx::PgPool, config: &LeaderConfig) -> Self {
        Self {
            pool,
            lock_id: config.lock_id,
            check_interval: config.check_interval(),
            flag: LeadershipFlag::new(false),
            session: Mutex::new(None),
        }
    }

    /// Flag driven by this election.
    pub fn flag(&self) -> LeadershipFlag {
        self.flag.clone()
    }

    /// Try to acquire leadership. Returns whether this instance now leads.
    pub async fn try_become_leader(&self) -> Result<bool> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(true);
        }

        let mut conn = self.pool.acquire().await?;
        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(self.lock_id)
            .fetch_one(&mut *conn)
            .await?;

        if acquired {
            *session = Some(conn);
            if self.flag.set(true) {
                tracing::info!(lock_id = self.lock_id, "Became leader");
            }
        }
        Ok(acquired)
    }

    /// Verify the locking session is still alive.
    pub async fn check_session(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        let Some(conn) = session.as_mut() else {
            return Ok(());
        };

        if let Err(e) = sqlx::query("SELECT 1").execute(&mut **conn).await {
            // The lock went away with the session.
            *session = None;
            self.flag.set(false);
            return Err(MeshError::Store(format!("leader session lost: {}", e)));
        }
        Ok(())
    }

    /// Release leadership.
    pub async fn release_leadership(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        let Some(mut conn) = session.take() else {
            return Ok(());
        };
        self.flag.set(false);

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.lock_id)
            .execute(&mut *conn)
            .await?;

        tracing::info!(lock_id = self.lock_id, "Released leadership");
        Ok(())
    }

    /// Run the election loop until shutdown, then release the lock.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.check_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = if self.is_leader() {
                        self.check_session().await
                    } else {
                        self.try_become_leader().await.map(|_| ())
                    };
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Leader election check failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Leader election shutting down");
                    break;
                }
            }
        }

        if let Err(e) = self.release_leadership().await {
            tracing::warn!(error = %e, "Failed to release leadership");
        }
    }
}

impl LeaderElector for PgLeaderElection {
    fn is_leader(&self) -> bool {
        self.flag.is_leader()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.flag.subscribe()
    }
}
