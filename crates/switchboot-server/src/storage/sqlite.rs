use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, error, info};

use switchboot_core::models::{
    Device, DeviceUpdate, EventLog, Job, LogLevel, NewDevice, NewEvent, NewJob, Run, RunDevice,
    RunDeviceStatus, RunStatus,
};

use crate::error::StorageError;
use crate::storage::traits::{Repository, RunDeviceUpdate};

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        info!(database_url = %database_url, "Initializing SQLite database");

        // Extract the database file path from the URL
        let db_path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        // Create the directory if it doesn't exist
        if !db_path.starts_with(":memory:") {
            if let Some(parent_dir) = Path::new(db_path).parent() {
                if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                    info!(directory = %parent_dir.display(), "Creating database directory");
                    std::fs::create_dir_all(parent_dir).map_err(|e| {
                        StorageError::Migration(format!(
                            "Failed to create database directory: {}",
                            e
                        ))
                    })?;
                }
            }
        }

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StorageError::Migration(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        // In-memory databases live inside a single connection; never let the
        // pool recycle it or spin up blank siblings.
        let is_memory = database_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if is_memory { 1 } else { 10 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await?;

        Self::create_tables(&pool).await?;
        Self::soft_migrate(&pool).await?;

        info!("SQLite storage initialized successfully");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_tables(pool: &SqlitePool) -> Result<(), StorageError> {
        let statements = [
            (
                "jobs",
                r#"
                CREATE TABLE IF NOT EXISTS jobs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    customer TEXT,
                    created_at DATETIME NOT NULL
                )
                "#,
            ),
            (
                "devices",
                r#"
                CREATE TABLE IF NOT EXISTS devices (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id INTEGER NOT NULL,
                    port INTEGER,
                    vendor TEXT,
                    model TEXT,
                    hostname TEXT NOT NULL,
                    mgmt_ip TEXT NOT NULL,
                    mask TEXT NOT NULL,
                    gateway TEXT NOT NULL,
                    mgmt_vlan INTEGER,
                    status TEXT NOT NULL DEFAULT 'pending',
                    FOREIGN KEY (job_id) REFERENCES jobs (id) ON DELETE CASCADE
                )
                "#,
            ),
            (
                "runs",
                r#"
                CREATE TABLE IF NOT EXISTS runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id INTEGER NOT NULL,
                    started_at DATETIME NOT NULL,
                    finished_at DATETIME,
                    status TEXT NOT NULL DEFAULT 'RUNNING',
                    parallelism INTEGER NOT NULL DEFAULT 4,
                    FOREIGN KEY (job_id) REFERENCES jobs (id) ON DELETE CASCADE
                )
                "#,
            ),
            (
                "run_devices",
                r#"
                CREATE TABLE IF NOT EXISTS run_devices (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id INTEGER NOT NULL,
                    device_id INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    started_at DATETIME,
                    finished_at DATETIME,
                    error_message TEXT,
                    error_code TEXT,
                    template_hash TEXT,
                    tasks TEXT,
                    captured_config TEXT,
                    UNIQUE (run_id, device_id),
                    FOREIGN KEY (run_id) REFERENCES runs (id) ON DELETE CASCADE
                )
                "#,
            ),
            (
                "event_logs",
                r#"
                CREATE TABLE IF NOT EXISTS event_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id INTEGER NOT NULL,
                    device_id INTEGER,
                    port INTEGER,
                    ts DATETIME NOT NULL,
                    level TEXT NOT NULL,
                    message TEXT NOT NULL,
                    raw TEXT,
                    error_code TEXT,
                    FOREIGN KEY (run_id) REFERENCES runs (id) ON DELETE CASCADE
                )
                "#,
            ),
        ];

        for (table, sql) in statements {
            sqlx::query(sql).execute(pool).await.map_err(|e| {
                error!(table = %table, error = %e, "Failed to create table");
                StorageError::Migration(format!("Failed to create {} table: {}", table, e))
            })?;
        }

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_devices_job_id ON devices(job_id)",
            "CREATE INDEX IF NOT EXISTS idx_runs_job_id ON runs(job_id)",
            "CREATE INDEX IF NOT EXISTS idx_run_devices_run_id ON run_devices(run_id)",
            "CREATE INDEX IF NOT EXISTS idx_event_logs_run_id ON event_logs(run_id)",
            "CREATE INDEX IF NOT EXISTS idx_event_logs_ts ON event_logs(ts)",
        ];
        for sql in indexes {
            sqlx::query(sql)
                .execute(pool)
                .await
                .map_err(|e| StorageError::Migration(format!("Failed to create index: {}", e)))?;
        }

        Ok(())
    }

    // Older databases predate some diagnostic columns; add anything missing
    // without touching existing data.
    async fn soft_migrate(pool: &SqlitePool) -> Result<(), StorageError> {
        let updates: [(&str, &[&str]); 2] = [
            (
                "run_devices",
                &["error_code", "template_hash", "tasks", "captured_config"],
            ),
            ("event_logs", &["error_code"]),
        ];

        for (table, columns) in updates {
            let rows = sqlx::query(&format!("PRAGMA table_info({})", table))
                .fetch_all(pool)
                .await?;
            let existing: Vec<String> = rows
                .iter()
                .map(|row| row.get::<String, _>("name"))
                .collect();

            for column in columns {
                if !existing.iter().any(|c| c == column) {
                    info!(table = %table, column = %column, "Adding missing column");
                    sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} TEXT", table, column))
                        .execute(pool)
                        .await
                        .map_err(|e| {
                            StorageError::Migration(format!(
                                "Failed to add column {} to {}: {}",
                                column, table, e
                            ))
                        })?;
                }
            }
        }

        Ok(())
    }
}

fn map_job(row: &sqlx::sqlite::SqliteRow) -> Job {
    Job {
        id: row.get("id"),
        name: row.get("name"),
        customer: row.get("customer"),
        created_at: row.get("created_at"),
    }
}

fn map_device(row: &sqlx::sqlite::SqliteRow) -> Device {
    Device {
        id: row.get("id"),
        job_id: row.get("job_id"),
        port: row.get::<Option<i64>, _>("port").map(|p| p as u8),
        vendor: row.get("vendor"),
        model: row.get("model"),
        hostname: row.get("hostname"),
        mgmt_ip: row.get("mgmt_ip"),
        mask: row.get("mask"),
        gateway: row.get("gateway"),
        mgmt_vlan: row.get::<Option<i64>, _>("mgmt_vlan").map(|v| v as u16),
        status: row.get("status"),
    }
}

fn map_run(row: &sqlx::sqlite::SqliteRow) -> Run {
    let status: String = row.get("status");
    Run {
        id: row.get("id"),
        job_id: row.get("job_id"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        status: RunStatus::from_str(&status).unwrap_or(RunStatus::Running),
        parallelism: row.get::<i64, _>("parallelism") as u32,
    }
}

fn map_run_device(row: &sqlx::sqlite::SqliteRow) -> RunDevice {
    let status: String = row.get("status");
    let tasks: Option<String> = row.get("tasks");
    RunDevice {
        run_id: row.get("run_id"),
        device_id: row.get("device_id"),
        status: RunDeviceStatus::from_str(&status).unwrap_or(RunDeviceStatus::Pending),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        error_message: row.get("error_message"),
        error_code: row.get("error_code"),
        template_hash: row.get("template_hash"),
        tasks: tasks
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default(),
    }
}

fn map_event(row: &sqlx::sqlite::SqliteRow) -> EventLog {
    let level: String = row.get("level");
    EventLog {
        id: row.get("id"),
        run_id: row.get("run_id"),
        device_id: row.get("device_id"),
        port: row.get::<Option<i64>, _>("port").map(|p| p as u8),
        ts: row.get("ts"),
        level: LogLevel::from_str(&level).unwrap_or(LogLevel::Info),
        message: row.get("message"),
        raw: row.get("raw"),
        error_code: row.get("error_code"),
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn create_job(&self, new: &NewJob) -> Result<Job, StorageError> {
        let created_at = Utc::now();
        let result = sqlx::query("INSERT INTO jobs (name, customer, created_at) VALUES (?, ?, ?)")
            .bind(&new.name)
            .bind(&new.customer)
            .bind(created_at)
            .execute(&self.pool)
            .await?;

        Ok(Job {
            id: result.last_insert_rowid(),
            name: new.name.clone(),
            customer: new.customer.clone(),
            created_at,
        })
    }

    async fn get_job(&self, job_id: i64) -> Result<Option<Job>, StorageError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(map_job))
    }

    async fn list_jobs(&self, skip: i64, limit: i64) -> Result<Vec<Job>, StorageError> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY id LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(skip)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(map_job).collect())
    }

    async fn delete_job(&self, job_id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_device(&self, job_id: i64, new: &NewDevice) -> Result<Device, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO devices (job_id, port, vendor, model, hostname, mgmt_ip, mask, gateway, mgmt_vlan, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job_id)
        .bind(new.port.map(i64::from))
        .bind(&new.vendor)
        .bind(&new.model)
        .bind(&new.hostname)
        .bind(&new.mgmt_ip)
        .bind(&new.mask)
        .bind(&new.gateway)
        .bind(new.mgmt_vlan.map(i64::from))
        .bind(&new.status)
        .execute(&self.pool)
        .await?;

        Ok(Device {
            id: result.last_insert_rowid(),
            job_id,
            port: new.port,
            vendor: new.vendor.clone(),
            model: new.model.clone(),
            hostname: new.hostname.clone(),
            mgmt_ip: new.mgmt_ip.clone(),
            mask: new.mask.clone(),
            gateway: new.gateway.clone(),
            mgmt_vlan: new.mgmt_vlan,
            status: new.status.clone(),
        })
    }

    async fn get_device(&self, device_id: i64) -> Result<Option<Device>, StorageError> {
        let row = sqlx::query("SELECT * FROM devices WHERE id = ?")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(map_device))
    }

    async fn list_devices(&self, job_id: i64) -> Result<Vec<Device>, StorageError> {
        let rows = sqlx::query("SELECT * FROM devices WHERE job_id = ? ORDER BY id")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(map_device).collect())
    }

    async fn update_device(
        &self,
        device_id: i64,
        update: &DeviceUpdate,
    ) -> Result<Option<Device>, StorageError> {
        let Some(current) = self.get_device(device_id).await? else {
            return Ok(None);
        };

        let device = Device {
            id: current.id,
            job_id: current.job_id,
            port: update.port.or(current.port),
            vendor: update.vendor.clone().or(current.vendor),
            model: update.model.clone().or(current.model),
            hostname: update.hostname.clone().unwrap_or(current.hostname),
            mgmt_ip: update.mgmt_ip.clone().unwrap_or(current.mgmt_ip),
            mask: update.mask.clone().unwrap_or(current.mask),
            gateway: update.gateway.clone().unwrap_or(current.gateway),
            mgmt_vlan: update.mgmt_vlan.or(current.mgmt_vlan),
            status: update.status.clone().unwrap_or(current.status),
        };

        sqlx::query(
            r#"
            UPDATE devices
            SET port = ?, vendor = ?, model = ?, hostname = ?, mgmt_ip = ?, mask = ?,
                gateway = ?, mgmt_vlan = ?, status = ?
            WHERE id = ?
            "#,
        )
        .bind(device.port.map(i64::from))
        .bind(&device.vendor)
        .bind(&device.model)
        .bind(&device.hostname)
        .bind(&device.mgmt_ip)
        .bind(&device.mask)
        .bind(&device.gateway)
        .bind(device.mgmt_vlan.map(i64::from))
        .bind(&device.status)
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        Ok(Some(device))
    }

    async fn delete_device(&self, device_id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn assigned_ports(&self) -> Result<Vec<u8>, StorageError> {
        let rows = sqlx::query("SELECT DISTINCT port FROM devices WHERE port IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| row.get::<i64, _>("port") as u8)
            .collect())
    }

    async fn create_run(&self, job_id: i64, parallelism: u32) -> Result<Run, StorageError> {
        let started_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO runs (job_id, started_at, status, parallelism) VALUES (?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(started_at)
        .bind(RunStatus::Running.as_str())
        .bind(i64::from(parallelism))
        .execute(&self.pool)
        .await?;

        Ok(Run {
            id: result.last_insert_rowid(),
            job_id,
            started_at,
            finished_at: None,
            status: RunStatus::Running,
            parallelism,
        })
    }

    async fn get_run(&self, run_id: i64) -> Result<Option<Run>, StorageError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(map_run))
    }

    async fn set_run_status(&self, run_id: i64, status: RunStatus) -> Result<(), StorageError> {
        let finished_at: Option<DateTime<Utc>> = status.is_terminal().then(Utc::now);
        sqlx::query("UPDATE runs SET status = ?, finished_at = COALESCE(?, finished_at) WHERE id = ?")
            .bind(status.as_str())
            .bind(finished_at)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn begin_run_device(&self, run_id: i64, device_id: i64) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO run_devices (run_id, device_id, status)
            VALUES (?, ?, ?)
            ON CONFLICT (run_id, device_id) DO NOTHING
            "#,
        )
        .bind(run_id)
        .bind(device_id)
        .bind(RunDeviceStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_run_device_status(
        &self,
        run_id: i64,
        device_id: i64,
        status: RunDeviceStatus,
        update: RunDeviceUpdate,
    ) -> Result<(), StorageError> {
        self.begin_run_device(run_id, device_id).await?;

        let Some(current) = self.get_run_device(run_id, device_id).await? else {
            return Err(StorageError::Query(format!(
                "run device ({}, {}) missing after upsert",
                run_id, device_id
            )));
        };

        // A terminal record is final; late non-terminal writes are dropped.
        if current.status.is_terminal() && !status.is_terminal() {
            debug!(
                run_id = run_id,
                device_id = device_id,
                current = %current.status,
                requested = %status,
                "Refusing to downgrade terminal run-device status"
            );
            return Ok(());
        }

        let now = Utc::now();
        // Terminal rows always carry both timestamps, even when the device
        // failed before it ever went RUNNING.
        let started_at = match current.started_at {
            None if status == RunDeviceStatus::Running || status.is_terminal() => Some(now),
            existing => existing,
        };
        let finished_at = match (status.is_terminal(), current.finished_at) {
            (true, None) => Some(now),
            (_, existing) => existing,
        };

        let tasks_json = match &update.tasks {
            Some(tasks) => Some(serde_json::to_string(tasks)?),
            None => None,
        };

        sqlx::query(
            r#"
            UPDATE run_devices
            SET status = ?,
                started_at = ?,
                finished_at = ?,
                error_message = COALESCE(?, error_message),
                error_code = COALESCE(?, error_code),
                template_hash = COALESCE(?, template_hash),
                tasks = COALESCE(?, tasks)
            WHERE run_id = ? AND device_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(started_at)
        .bind(finished_at)
        .bind(&update.error_message)
        .bind(&update.error_code)
        .bind(&update.template_hash)
        .bind(&tasks_json)
        .bind(run_id)
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_run_device(
        &self,
        run_id: i64,
        device_id: i64,
    ) -> Result<Option<RunDevice>, StorageError> {
        let row = sqlx::query("SELECT * FROM run_devices WHERE run_id = ? AND device_id = ?")
            .bind(run_id)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(map_run_device))
    }

    async fn list_run_devices(&self, run_id: i64) -> Result<Vec<RunDevice>, StorageError> {
        let rows = sqlx::query("SELECT * FROM run_devices WHERE run_id = ? ORDER BY id")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(map_run_device).collect())
    }

    async fn append_event(&self, event: &NewEvent) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO event_logs (run_id, device_id, port, ts, level, message, raw, error_code)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.run_id)
        .bind(event.device_id)
        .bind(event.port.map(i64::from))
        .bind(Utc::now())
        .bind(event.level.as_str())
        .bind(&event.message)
        .bind(&event.raw)
        .bind(&event.error_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_events(&self, run_id: i64) -> Result<Vec<EventLog>, StorageError> {
        let rows = sqlx::query("SELECT * FROM event_logs WHERE run_id = ? ORDER BY id")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(map_event).collect())
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
