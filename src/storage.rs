use crate::error::MonitorError;
use crate::ingest::IngestTarget;
use crate::repository::{
    ObservationRepository, ReportLedger, ScheduleRepository, TimezoneRepository,
};
use crate::types::{
    OperatingHoursRule, ReportRecord, ReportStatus, SiteId, StatusObservation, TimezoneAssignment,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Object, Pool, PoolConfig, Runtime};
use tokio_postgres::NoTls;

const SCHEMA: &str = r#"
DO $$ BEGIN
    CREATE TYPE site_status AS ENUM ('active', 'inactive');
EXCEPTION WHEN duplicate_object THEN NULL;
END $$;

DO $$ BEGIN
    CREATE TYPE report_status AS ENUM ('Running', 'Complete', 'Failed');
EXCEPTION WHEN duplicate_object THEN NULL;
END $$;

CREATE TABLE IF NOT EXISTS store_status (
    id BIGSERIAL PRIMARY KEY,
    store_id TEXT NOT NULL,
    timestamp_utc TIMESTAMPTZ NOT NULL,
    status site_status NOT NULL
);
CREATE INDEX IF NOT EXISTS store_status_store_ts_idx ON store_status (store_id, timestamp_utc);
CREATE INDEX IF NOT EXISTS store_status_ts_idx ON store_status (timestamp_utc);

CREATE TABLE IF NOT EXISTS business_hours (
    id BIGSERIAL PRIMARY KEY,
    store_id TEXT NOT NULL,
    day_of_week SMALLINT NOT NULL,
    start_time_local TIME NOT NULL,
    end_time_local TIME NOT NULL,
    closes_at_day_end BOOLEAN NOT NULL DEFAULT false
);
ALTER TABLE business_hours ADD COLUMN IF NOT EXISTS closes_at_day_end BOOLEAN NOT NULL DEFAULT false;
CREATE INDEX IF NOT EXISTS business_hours_store_idx ON business_hours (store_id);

CREATE TABLE IF NOT EXISTS store_timezone (
    store_id TEXT PRIMARY KEY,
    timezone_str TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ingest_run (
    id SMALLINT PRIMARY KEY CHECK (id = 1),
    completed_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS report (
    id TEXT PRIMARY KEY,
    status report_status NOT NULL DEFAULT 'Running',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    completed_at TIMESTAMPTZ,
    file_path TEXT
);
"#;

/// Acesso ao PostgreSQL via pool de conexões.
pub struct Storage {
    pool: Pool,
}

impl Storage {
    pub async fn connect(database_url: &str, max_connections: usize) -> Result<Self, MonitorError> {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.url = Some(database_url.to_string());
        cfg.pool = Some(PoolConfig::new(max_connections));
        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
        // Falha cedo se o banco não estiver acessível
        let _client = pool.get().await?;
        Ok(Self { pool })
    }

    async fn client(&self) -> Result<Object, MonitorError> {
        Ok(self.pool.get().await?)
    }

    /// Cria tipos, tabelas e índices se ainda não existirem.
    pub async fn ensure_schema(&self) -> Result<(), MonitorError> {
        let client = self.client().await?;
        client.batch_execute(SCHEMA).await?;
        Ok(())
    }
}

#[async_trait]
impl IngestTarget for Storage {
    async fn ingestion_completed(&self) -> Result<bool, MonitorError> {
        let client = self.client().await?;
        let row = client
            .query_one("SELECT EXISTS (SELECT 1 FROM ingest_run)", &[])
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn clear_source_data(&self) -> Result<(), MonitorError> {
        let client = self.client().await?;
        client
            .batch_execute("TRUNCATE store_status, business_hours, store_timezone")
            .await?;
        Ok(())
    }

    async fn insert_observations(&self, batch: &[StatusObservation]) -> Result<u64, MonitorError> {
        let mut object = self.client().await?;
        let client: &mut tokio_postgres::Client = &mut object;
        let tx = client.transaction().await?;
        let stmt = tx
            .prepare(
                "INSERT INTO store_status (store_id, timestamp_utc, status) VALUES ($1, $2, $3)",
            )
            .await?;
        let mut inserted = 0;
        for observation in batch {
            inserted += tx
                .execute(
                    &stmt,
                    &[&observation.site_id, &observation.instant, &observation.status],
                )
                .await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn insert_rules(&self, batch: &[OperatingHoursRule]) -> Result<u64, MonitorError> {
        let mut object = self.client().await?;
        let client: &mut tokio_postgres::Client = &mut object;
        let tx = client.transaction().await?;
        let stmt = tx
            .prepare(
                r#"
                INSERT INTO business_hours
                    (store_id, day_of_week, start_time_local, end_time_local, closes_at_day_end)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .await?;
        let mut inserted = 0;
        for rule in batch {
            let weekday = i16::from(rule.weekday);
            inserted += tx
                .execute(
                    &stmt,
                    &[
                        &rule.site_id,
                        &weekday,
                        &rule.local_start,
                        &rule.local_end,
                        &rule.closes_at_day_end,
                    ],
                )
                .await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn insert_zones(&self, batch: &[TimezoneAssignment]) -> Result<u64, MonitorError> {
        let mut object = self.client().await?;
        let client: &mut tokio_postgres::Client = &mut object;
        let tx = client.transaction().await?;
        let stmt = tx
            .prepare(
                r#"
                INSERT INTO store_timezone (store_id, timezone_str) VALUES ($1, $2)
                ON CONFLICT (store_id) DO UPDATE SET timezone_str = EXCLUDED.timezone_str
                "#,
            )
            .await?;
        let mut inserted = 0;
        for assignment in batch {
            inserted += tx
                .execute(&stmt, &[&assignment.site_id, &assignment.zone_id])
                .await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn mark_ingestion_completed(&self) -> Result<(), MonitorError> {
        let client = self.client().await?;
        client
            .execute(
                r#"
                INSERT INTO ingest_run (id, completed_at) VALUES (1, $1)
                ON CONFLICT (id) DO UPDATE SET completed_at = EXCLUDED.completed_at
                "#,
                &[&Utc::now()],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ObservationRepository for Storage {
    async fn query(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatusObservation>, MonitorError> {
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT store_id, timestamp_utc, status
                FROM store_status
                WHERE store_id = $1 AND timestamp_utc >= $2 AND timestamp_utc <= $3
                ORDER BY timestamp_utc
                "#,
                &[&site_id, &start, &end],
            )
            .await?;
        let observations = rows
            .into_iter()
            .map(StatusObservation::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(observations)
    }

    async fn site_ids(&self) -> Result<Vec<SiteId>, MonitorError> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT DISTINCT store_id FROM store_status ORDER BY store_id", &[])
            .await?;
        let ids = rows
            .iter()
            .map(|row| row.try_get::<_, String>("store_id"))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    async fn max_instant(&self) -> Result<Option<DateTime<Utc>>, MonitorError> {
        let client = self.client().await?;
        let row = client
            .query_one("SELECT MAX(timestamp_utc) FROM store_status", &[])
            .await?;
        Ok(row.try_get(0)?)
    }
}

#[async_trait]
impl ScheduleRepository for Storage {
    async fn rules_for(&self, site_id: &str) -> Result<Vec<OperatingHoursRule>, MonitorError> {
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT store_id, day_of_week, start_time_local, end_time_local, closes_at_day_end
                FROM business_hours
                WHERE store_id = $1
                ORDER BY id
                "#,
                &[&site_id],
            )
            .await?;
        let rules = rows
            .into_iter()
            .map(OperatingHoursRule::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }
}

#[async_trait]
impl TimezoneRepository for Storage {
    async fn zone_for(&self, site_id: &str) -> Result<Option<String>, MonitorError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT timezone_str FROM store_timezone WHERE store_id = $1",
                &[&site_id],
            )
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("timezone_str")?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ReportLedger for Storage {
    async fn create_report(&self, id: &str) -> Result<ReportRecord, MonitorError> {
        let record = ReportRecord::running(id);
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO report (id, status, created_at) VALUES ($1, $2, $3)",
                &[&record.id, &record.status, &record.created_at],
            )
            .await?;
        Ok(record)
    }

    async fn complete_report(&self, id: &str, file_path: &str) -> Result<(), MonitorError> {
        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE report SET status = $2, completed_at = $3, file_path = $4 WHERE id = $1",
                &[&id, &ReportStatus::Complete, &Utc::now(), &file_path],
            )
            .await?;
        if updated == 0 {
            return Err(MonitorError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn fail_report(&self, id: &str) -> Result<(), MonitorError> {
        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE report SET status = $2, completed_at = $3 WHERE id = $1",
                &[&id, &ReportStatus::Failed, &Utc::now()],
            )
            .await?;
        if updated == 0 {
            return Err(MonitorError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn find_report(&self, id: &str) -> Result<Option<ReportRecord>, MonitorError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT id, status, created_at, completed_at, file_path FROM report WHERE id = $1",
                &[&id],
            )
            .await?;
        match row {
            Some(row) => Ok(Some(ReportRecord::try_from(row)?)),
            None => Ok(None),
        }
    }
}
