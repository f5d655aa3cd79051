//! Activity builders shared by the handler tests.

use chrono::{DateTime, TimeZone, Utc};
use projector_common::domain;
use projector_common::{Activity, Payload};

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn project_created(id: i64, secs: i64, uuid: &str, org: &str, name: &str) -> Activity {
    Activity::new(
        id,
        "project.created",
        at(secs),
        Payload::Project(domain::Project {
            uuid: uuid.into(),
            organization_uuid: org.into(),
            name: name.into(),
            ..Default::default()
        }),
    )
}

pub fn project_deleted(id: i64, secs: i64, uuid: &str, org: &str) -> Activity {
    Activity::new(
        id,
        "project.deleted",
        at(secs),
        Payload::Project(domain::Project {
            uuid: uuid.into(),
            organization_uuid: org.into(),
            ..Default::default()
        }),
    )
}

pub fn task(
    id: i64,
    name: &str,
    secs: i64,
    uuid: &str,
    project: &str,
    task_name: &str,
) -> Activity {
    Activity::new(
        id,
        name,
        at(secs),
        Payload::Task(domain::Task {
            uuid: uuid.into(),
            project_uuid: project.into(),
            name: task_name.into(),
            ..Default::default()
        }),
    )
}

pub fn environment(id: i64, name: &str, secs: i64, uuid: &str, env_name: &str) -> Activity {
    Activity::new(
        id,
        name,
        at(secs),
        Payload::Environment(domain::Environment {
            uuid: uuid.into(),
            name: env_name.into(),
            ..Default::default()
        }),
    )
}

pub fn job(id: i64, name: &str, secs: i64, uuid: &str, env: &str, task: &str) -> Activity {
    Activity::new(
        id,
        name,
        at(secs),
        Payload::Job(domain::Job {
            uuid: uuid.into(),
            environment_uuid: env.into(),
            task_uuid: task.into(),
            ..Default::default()
        }),
    )
}

pub fn operation(id: i64, name: &str, secs: i64, uuid: &str, job: Option<&str>) -> Activity {
    let mut op = domain::Operation {
        uuid: uuid.into(),
        job_uuid: job.map(str::to_string),
        started_at: Some(at(secs)),
        ..Default::default()
    };
    match name {
        "operation.succeeded" => op.finished_at = Some(at(secs)),
        "operation.failed" => {
            op.finished_at = Some(at(secs));
            op.failed_at = Some(at(secs));
            op.exit_status = 1;
        }
        "operation.failed-fatally" => op.fatal_error = Some("fatal".into()),
        _ => {}
    }
    Activity::new(id, name, at(secs), Payload::Operation(op))
}

pub fn canceled_by_user(id: i64, secs: i64, uuid: &str) -> Activity {
    Activity::new(
        id,
        "operation.canceled-by-user",
        at(secs),
        Payload::OperationCanceledByUser(domain::OperationCanceledByUser { uuid: uuid.into() }),
    )
}

/// Environment `E1` ("production"), task `T1` ("deploy", project `P1`) and
/// job `J1` tying them together, in causal order starting at `secs`.
pub fn job_fixture(secs: i64) -> Vec<Activity> {
    vec![
        environment(100, "environment.added", secs, "E1", "production"),
        task(101, "task.added", secs + 1, "T1", "P1", "deploy"),
        job(102, "job.added", secs + 2, "J1", "E1", "T1"),
    ]
}
