//! PostgreSQL connector backed by `sqlx`.
//!
//! The pipeline is synchronous; each session owns a current-thread `tokio`
//! runtime and blocks on the driver's futures. One connection is opened per
//! table load and closed after commit or rollback.

use std::io::Read;

use anyhow::{Context, Result};
use log::debug;
use sqlx::{Connection, PgConnection, postgres::PgConnectOptions};
use tokio::runtime::{Builder, Runtime};

use crate::{
    config::ConnectionParams,
    replace::{Connector, LoadSession},
};

const APPLICATION_NAME: &str = "report-mirror";
const COPY_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct PostgresConnector {
    params: ConnectionParams,
}

impl PostgresConnector {
    pub fn new(params: ConnectionParams) -> Self {
        Self { params }
    }

    fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.params.host)
            .port(self.params.port)
            .database(&self.params.database)
            .username(&self.params.user)
            .application_name(APPLICATION_NAME);
        if let Some(password) = &self.params.password {
            options = options.password(password);
        }
        options
    }
}

impl Connector for PostgresConnector {
    type Session = PostgresSession;

    fn open(&self) -> Result<PostgresSession> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Starting database runtime")?;
        let options = self.connect_options();
        let mut connection = runtime
            .block_on(PgConnection::connect_with(&options))
            .with_context(|| format!("Connecting to {}", self.params))?;
        debug!("Connected to {}", self.params);
        runtime
            .block_on(sqlx::raw_sql("BEGIN").execute(&mut connection))
            .context("Starting transaction")?;
        Ok(PostgresSession {
            runtime,
            connection,
        })
    }
}

pub struct PostgresSession {
    runtime: Runtime,
    connection: PgConnection,
}

impl PostgresSession {
    fn finish(self, statement: &'static str) -> Result<()> {
        let PostgresSession {
            runtime,
            mut connection,
        } = self;
        runtime
            .block_on(sqlx::raw_sql(statement).execute(&mut connection))
            .with_context(|| format!("Executing {statement}"))?;
        runtime
            .block_on(connection.close())
            .context("Closing database connection")
    }
}

impl LoadSession for PostgresSession {
    fn execute(&mut self, statement: &str) -> Result<()> {
        let Self {
            runtime,
            connection,
        } = self;
        runtime.block_on(sqlx::raw_sql(statement).execute(&mut *connection))?;
        Ok(())
    }

    fn copy_in(&mut self, statement: &str, payload: &mut dyn Read) -> Result<u64> {
        let Self {
            runtime,
            connection,
        } = self;
        runtime.block_on(async {
            let mut copy = connection.copy_in_raw(statement).await?;
            let mut buffer = vec![0u8; COPY_CHUNK_BYTES];
            loop {
                let read = match payload.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(read) => read,
                    Err(err) => {
                        copy.abort(err.to_string()).await?;
                        return Err(anyhow::Error::from(err).context("Reading COPY payload"));
                    }
                };
                copy.send(&buffer[..read]).await?;
            }
            let rows = copy.finish().await?;
            Ok::<u64, anyhow::Error>(rows)
        })
    }

    fn commit(self) -> Result<()> {
        self.finish("COMMIT")
    }

    fn rollback(self) -> Result<()> {
        self.finish("ROLLBACK")
    }
}
