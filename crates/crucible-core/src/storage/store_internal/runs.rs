use crate::model::{ExperimentStatus, HypothesisRun, HypothesisStatus, RequestBodies, RunStatus};
use crate::storage::{now_rfc3339, StoreError};
use rusqlite::{params, Connection, OptionalExtension};

pub(crate) fn upsert_hypothesis_run_impl(
    conn: &Connection,
    run: &HypothesisRun,
) -> Result<(), StoreError> {
    conn.execute(
        r#"
            INSERT INTO hypothesis_runs (
                experiment_id, hypothesis_id, row_id, result_request_id, status, error, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(hypothesis_id, row_id) DO UPDATE SET
                experiment_id = excluded.experiment_id,
                result_request_id = excluded.result_request_id,
                status = excluded.status,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
        params![
            run.experiment_id,
            run.hypothesis_id,
            run.row_id,
            run.result_request_id,
            run.status.as_str(),
            run.error,
            now_rfc3339(),
        ],
    )?;
    Ok(())
}

pub(crate) fn list_hypothesis_runs_impl(
    conn: &Connection,
    experiment_id: &str,
) -> Result<Vec<HypothesisRun>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT r.experiment_id, r.hypothesis_id, r.row_id, r.result_request_id, r.status, r.error
         FROM hypothesis_runs r
         JOIN hypotheses h ON h.id = r.hypothesis_id
         JOIN dataset_rows d ON d.id = r.row_id
         WHERE r.experiment_id = ?1
         ORDER BY h.position ASC, d.position ASC",
    )?;
    let rows = stmt
        .query_map([experiment_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(experiment_id, hypothesis_id, row_id, result_request_id, status, error)| {
                let status = RunStatus::parse(&status).ok_or_else(|| StoreError::Corrupt {
                    entity: "hypothesis_runs",
                    detail: format!("unknown status '{status}'"),
                })?;
                Ok(HypothesisRun {
                    experiment_id,
                    hypothesis_id,
                    row_id,
                    result_request_id,
                    status,
                    error,
                })
            },
        )
        .collect()
}

pub(crate) fn request_log_exists_impl(
    conn: &Connection,
    request_id: &str,
) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM request_logs WHERE request_id = ?1",
        [request_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn record_request_log_impl(
    conn: &Connection,
    request_id: &str,
    organization_id: &str,
    status_code: Option<u16>,
    bodies: Option<&RequestBodies>,
) -> Result<(), StoreError> {
    conn.execute(
        r#"
            INSERT INTO request_logs (
                request_id, organization_id, status_code, request_body, response_body, received_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(request_id) DO NOTHING
            "#,
        params![
            request_id,
            organization_id,
            status_code.map(i64::from),
            bodies.map(|b| b.request_body.as_str()),
            bodies.map(|b| b.response_body.as_str()),
            now_rfc3339()
        ],
    )?;
    Ok(())
}

pub(crate) fn request_log_bodies_impl(
    conn: &Connection,
    request_id: &str,
) -> Result<Option<RequestBodies>, StoreError> {
    let bodies = conn
        .query_row(
            "SELECT request_body, response_body FROM request_logs WHERE request_id = ?1",
            [request_id],
            |row| {
                Ok(RequestBodies {
                    request_body: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    response_body: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                })
            },
        )
        .optional()?;
    Ok(bodies)
}

pub(crate) fn update_hypothesis_status_impl(
    conn: &Connection,
    hypothesis_id: &str,
    status: HypothesisStatus,
) -> Result<(), StoreError> {
    let updated = conn.execute(
        "UPDATE hypotheses SET status = ?1 WHERE id = ?2",
        params![status.as_str(), hypothesis_id],
    )?;
    if updated == 0 {
        return Err(StoreError::NotFound {
            entity: "hypothesis",
            id: hypothesis_id.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn hypothesis_status_impl(
    conn: &Connection,
    hypothesis_id: &str,
) -> Result<Option<HypothesisStatus>, StoreError> {
    let s: Option<String> = conn
        .query_row(
            "SELECT status FROM hypotheses WHERE id = ?1",
            [hypothesis_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(s.as_deref().and_then(HypothesisStatus::parse))
}

pub(crate) fn finish_experiment_impl(
    conn: &Connection,
    experiment_id: &str,
    status: ExperimentStatus,
) -> Result<(), StoreError> {
    let updated = conn.execute(
        "UPDATE experiments SET status = ?1, finished_at = ?2 WHERE id = ?3",
        params![status.as_str(), now_rfc3339(), experiment_id],
    )?;
    if updated == 0 {
        return Err(StoreError::NotFound {
            entity: "experiment",
            id: experiment_id.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn experiment_status_impl(
    conn: &Connection,
    experiment_id: &str,
) -> Result<Option<ExperimentStatus>, StoreError> {
    let s: Option<String> = conn
        .query_row(
            "SELECT status FROM experiments WHERE id = ?1",
            [experiment_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(s.as_deref().and_then(ExperimentStatus::parse))
}
