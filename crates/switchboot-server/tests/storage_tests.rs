mod common;

use common::{memory_repo, new_device, seed_job};
use switchboot_core::models::{
    LogLevel, NewEvent, RunDeviceStatus, RunStatus, VerifyStatus, VerifyTask,
};
use switchboot_server::storage::{Repository, RunDeviceUpdate, SqliteRepository};

#[tokio::test]
async fn run_device_timestamps_are_stamped_once() {
    let repo = memory_repo().await;
    let job_id = seed_job(&repo, "J").await;
    let device = repo
        .create_device(job_id, &new_device("sw1", "10.0.0.1", Some(1), None))
        .await
        .unwrap();
    let run = repo.create_run(job_id, 1).await.unwrap();

    repo.set_run_device_status(
        run.id,
        device.id,
        RunDeviceStatus::Running,
        RunDeviceUpdate::default(),
    )
    .await
    .unwrap();
    let first = repo.get_run_device(run.id, device.id).await.unwrap().unwrap();
    let started_at = first.started_at.expect("started_at stamped on RUNNING");
    assert!(first.finished_at.is_none());

    // A second RUNNING write must not move the start timestamp.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    repo.set_run_device_status(
        run.id,
        device.id,
        RunDeviceStatus::Running,
        RunDeviceUpdate::default(),
    )
    .await
    .unwrap();
    let second = repo.get_run_device(run.id, device.id).await.unwrap().unwrap();
    assert_eq!(second.started_at, Some(started_at));

    repo.set_run_device_status(
        run.id,
        device.id,
        RunDeviceStatus::Verified,
        RunDeviceUpdate::default(),
    )
    .await
    .unwrap();
    let terminal = repo.get_run_device(run.id, device.id).await.unwrap().unwrap();
    let finished_at = terminal.finished_at.expect("finished_at stamped on terminal");
    assert!(finished_at >= started_at);
}

#[tokio::test]
async fn terminal_status_cannot_be_downgraded() {
    let repo = memory_repo().await;
    let job_id = seed_job(&repo, "J").await;
    let device = repo
        .create_device(job_id, &new_device("sw1", "10.0.0.1", Some(1), None))
        .await
        .unwrap();
    let run = repo.create_run(job_id, 1).await.unwrap();

    repo.set_run_device_status(
        run.id,
        device.id,
        RunDeviceStatus::Failed,
        RunDeviceUpdate {
            error_message: Some("boom".to_string()),
            error_code: Some("COMMAND_ERROR".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    repo.set_run_device_status(
        run.id,
        device.id,
        RunDeviceStatus::Running,
        RunDeviceUpdate::default(),
    )
    .await
    .unwrap();

    let rd = repo.get_run_device(run.id, device.id).await.unwrap().unwrap();
    assert_eq!(rd.status, RunDeviceStatus::Failed);
    assert_eq!(rd.error_message.as_deref(), Some("boom"));
}

#[tokio::test]
async fn template_hash_survives_later_transitions() {
    let repo = memory_repo().await;
    let job_id = seed_job(&repo, "J").await;
    let device = repo
        .create_device(job_id, &new_device("sw1", "10.0.0.1", Some(1), None))
        .await
        .unwrap();
    let run = repo.create_run(job_id, 1).await.unwrap();

    repo.set_run_device_status(
        run.id,
        device.id,
        RunDeviceStatus::Running,
        RunDeviceUpdate {
            template_hash: Some("abc123def456".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    repo.set_run_device_status(
        run.id,
        device.id,
        RunDeviceStatus::Failed,
        RunDeviceUpdate {
            error_message: Some("Timeout on conf t".to_string()),
            error_code: Some("SERIAL_TIMEOUT".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let rd = repo.get_run_device(run.id, device.id).await.unwrap().unwrap();
    assert_eq!(rd.template_hash.as_deref(), Some("abc123def456"));
    assert_eq!(rd.error_code.as_deref(), Some("SERIAL_TIMEOUT"));
}

#[tokio::test]
async fn verify_tasks_round_trip_through_storage() {
    let repo = memory_repo().await;
    let job_id = seed_job(&repo, "J").await;
    let device = repo
        .create_device(job_id, &new_device("sw1", "10.0.0.1", Some(1), None))
        .await
        .unwrap();
    let run = repo.create_run(job_id, 1).await.unwrap();

    let tasks = vec![
        VerifyTask {
            name: "Verify IP Address".to_string(),
            status: VerifyStatus::Success,
            message: "IP 10.0.0.1 found".to_string(),
            code: "IP_MATCH".to_string(),
        },
        VerifyTask {
            name: "Verify SSH".to_string(),
            status: VerifyStatus::Failed,
            message: "SSH disabled".to_string(),
            code: "SSH_DISABLED".to_string(),
        },
    ];
    repo.set_run_device_status(
        run.id,
        device.id,
        RunDeviceStatus::Verified,
        RunDeviceUpdate {
            tasks: Some(tasks),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let rd = repo.get_run_device(run.id, device.id).await.unwrap().unwrap();
    assert_eq!(rd.tasks.len(), 2);
    assert_eq!(rd.tasks[0].code, "IP_MATCH");
    assert_eq!(rd.tasks[1].status, VerifyStatus::Failed);
}

#[tokio::test]
async fn begin_run_device_is_idempotent() {
    let repo = memory_repo().await;
    let job_id = seed_job(&repo, "J").await;
    let device = repo
        .create_device(job_id, &new_device("sw1", "10.0.0.1", Some(1), None))
        .await
        .unwrap();
    let run = repo.create_run(job_id, 1).await.unwrap();

    repo.begin_run_device(run.id, device.id).await.unwrap();
    repo.begin_run_device(run.id, device.id).await.unwrap();

    let rows = repo.list_run_devices(run.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, RunDeviceStatus::Pending);
}

#[tokio::test]
async fn run_terminal_status_stamps_finished_at() {
    let repo = memory_repo().await;
    let job_id = seed_job(&repo, "J").await;
    let run = repo.create_run(job_id, 4).await.unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert!(run.finished_at.is_none());

    repo.set_run_status(run.id, RunStatus::Completed).await.unwrap();
    let run = repo.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn events_are_append_only_and_ordered() {
    let repo = memory_repo().await;
    let job_id = seed_job(&repo, "J").await;
    let run = repo.create_run(job_id, 1).await.unwrap();

    for (level, message) in [
        (LogLevel::Info, "Synchronizing prompt..."),
        (LogLevel::Debug, "Initial prompt detected"),
        (LogLevel::Error, "Command failed: bad"),
    ] {
        repo.append_event(&NewEvent {
            run_id: run.id,
            device_id: None,
            port: Some(1),
            level,
            message: message.to_string(),
            raw: None,
            error_code: None,
        })
        .await
        .unwrap();
    }

    let events = repo.list_events(run.id).await.unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].message, "Synchronizing prompt...");
    assert_eq!(events[2].level, LogLevel::Error);
    // Timestamps never run backwards within the appended order.
    assert!(events.windows(2).all(|pair| pair[0].ts <= pair[1].ts));
}

#[tokio::test]
async fn deleting_a_job_cascades_to_runs_and_logs() {
    let repo = memory_repo().await;
    let job_id = seed_job(&repo, "J").await;
    let device = repo
        .create_device(job_id, &new_device("sw1", "10.0.0.1", Some(1), None))
        .await
        .unwrap();
    let run = repo.create_run(job_id, 1).await.unwrap();
    repo.begin_run_device(run.id, device.id).await.unwrap();
    repo.append_event(&NewEvent {
        run_id: run.id,
        device_id: Some(device.id),
        port: Some(1),
        level: LogLevel::Info,
        message: "hello".to_string(),
        raw: None,
        error_code: None,
    })
    .await
    .unwrap();

    assert!(repo.delete_job(job_id).await.unwrap());
    assert!(repo.get_job(job_id).await.unwrap().is_none());
    assert!(repo.get_run(run.id).await.unwrap().is_none());
    assert!(repo.get_device(device.id).await.unwrap().is_none());
    assert!(repo.list_events(run.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn soft_migration_adds_missing_columns() {
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::SqlitePool;
    use std::str::FromStr;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("legacy.db");
    let url = format!("sqlite:{}", db_path.display());

    // Lay down a pre-upgrade schema that predates the diagnostic columns.
    {
        let options = SqliteConnectOptions::from_str(&url)
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.unwrap();
        sqlx::query(
            r#"
            CREATE TABLE run_devices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL,
                device_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                started_at DATETIME,
                finished_at DATETIME,
                error_message TEXT,
                UNIQUE (run_id, device_id)
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"
            CREATE TABLE event_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL,
                device_id INTEGER,
                port INTEGER,
                ts DATETIME NOT NULL,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                raw TEXT
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;
    }

    let repo = SqliteRepository::new(&url).await.unwrap();
    let job = repo
        .create_job(&switchboot_core::models::NewJob {
            name: "J".to_string(),
            customer: None,
        })
        .await
        .unwrap();
    let device = repo
        .create_device(job.id, &new_device("sw1", "10.0.0.1", Some(1), None))
        .await
        .unwrap();
    let run = repo.create_run(job.id, 1).await.unwrap();

    // The upgraded columns are usable straight away.
    repo.set_run_device_status(
        run.id,
        device.id,
        RunDeviceStatus::Failed,
        RunDeviceUpdate {
            error_code: Some("COMMAND_ERROR".to_string()),
            template_hash: Some("abc123def456".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let rd = repo.get_run_device(run.id, device.id).await.unwrap().unwrap();
    assert_eq!(rd.error_code.as_deref(), Some("COMMAND_ERROR"));
    assert_eq!(rd.template_hash.as_deref(), Some("abc123def456"));
}
