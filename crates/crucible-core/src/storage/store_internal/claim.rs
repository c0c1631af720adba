use crate::model::{DatasetRow, Experiment, ExperimentStatus, Hypothesis, HypothesisStatus};
use crate::storage::{now_rfc3339, StoreError};
use rusqlite::{params, Connection, OptionalExtension};

pub(crate) fn claim_next_queued_in_txn_impl(
    conn: &Connection,
) -> Result<Option<Experiment>, StoreError> {
    conn.execute("BEGIN IMMEDIATE", [])?;
    let result = claim_next_queued_inner(conn);

    match &result {
        Ok(_) => {
            if let Err(e) = conn.execute("COMMIT", []) {
                let _ = conn.execute("ROLLBACK", []);
                return Err(e.into());
            }
        }
        Err(_) => {
            let _ = conn.execute("ROLLBACK", []);
        }
    }

    result
}

fn claim_next_queued_inner(conn: &Connection) -> Result<Option<Experiment>, StoreError> {
    let picked: Option<(String, String, String)> = conn
        .query_row(
            r#"
            SELECT id, organization_id, dataset_id
            FROM experiments
            WHERE status = 'queued'
            ORDER BY created_at ASC, rowid ASC
            LIMIT 1
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((id, organization_id, dataset_id)) = picked else {
        return Ok(None);
    };

    let updated = conn.execute(
        "UPDATE experiments SET status = 'running', started_at = ?1 WHERE id = ?2 AND status = 'queued'",
        params![now_rfc3339(), id],
    )?;
    if updated == 0 {
        return Ok(None);
    }

    conn.execute(
        "UPDATE hypotheses SET status = 'running' WHERE experiment_id = ?1 AND status = 'pending'",
        [&id],
    )?;

    let hypotheses = load_hypotheses_impl(conn, &id)?;

    Ok(Some(Experiment {
        id,
        organization_id,
        dataset_id,
        status: ExperimentStatus::Running,
        hypotheses,
    }))
}

pub(crate) fn load_hypotheses_impl(
    conn: &Connection,
    experiment_id: &str,
) -> Result<Vec<Hypothesis>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, experiment_id, prompt_version_id, model, provider_key_id, status
         FROM hypotheses
         WHERE experiment_id = ?1
         ORDER BY position ASC",
    )?;
    let rows = stmt
        .query_map([experiment_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(id, experiment_id, prompt_version_id, model, provider_key_id, status)| {
                let status = HypothesisStatus::parse(&status).ok_or_else(|| StoreError::Corrupt {
                    entity: "hypotheses",
                    detail: format!("unknown status '{status}' for {id}"),
                })?;
                Ok(Hypothesis {
                    id,
                    experiment_id,
                    prompt_version_id,
                    model,
                    provider_key_id,
                    status,
                })
            },
        )
        .collect()
}

pub(crate) fn load_dataset_rows_impl(
    conn: &Connection,
    dataset_id: &str,
) -> Result<Vec<DatasetRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, request_path, inputs_json
         FROM dataset_rows
         WHERE dataset_id = ?1
         ORDER BY position ASC",
    )?;
    let rows = stmt
        .query_map([dataset_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, request_path, inputs_json)| {
            let inputs = serde_json::from_str(&inputs_json).map_err(|e| StoreError::Corrupt {
                entity: "dataset_rows",
                detail: format!("inputs for {id}: {e}"),
            })?;
            Ok(DatasetRow {
                id,
                input_record: crate::model::InputRecord {
                    request_path,
                    inputs,
                },
            })
        })
        .collect()
}

pub(crate) fn load_prompt_template_impl(
    conn: &Connection,
    prompt_version_id: &str,
) -> Result<serde_json::Value, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT template_json FROM prompt_versions WHERE id = ?1",
            [prompt_version_id],
            |row| row.get(0),
        )
        .optional()?;

    let raw = raw.ok_or_else(|| StoreError::NotFound {
        entity: "prompt_version",
        id: prompt_version_id.to_string(),
    })?;

    serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
        entity: "prompt_versions",
        detail: format!("template for {prompt_version_id}: {e}"),
    })
}
