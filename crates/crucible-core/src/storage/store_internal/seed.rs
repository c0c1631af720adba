use crate::model::NewExperiment;
use crate::storage::{now_rfc3339, StoreError};
use rusqlite::{params, Connection};

pub(crate) fn upsert_organization_impl(
    conn: &Connection,
    id: &str,
    owner_id: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO organizations (id, owner_id) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET owner_id = excluded.owner_id",
        params![id, owner_id],
    )?;
    Ok(())
}

pub(crate) fn upsert_provider_key_impl(
    conn: &Connection,
    id: &str,
    organization_id: &str,
    name: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO provider_keys (id, organization_id, name) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET organization_id = excluded.organization_id, name = excluded.name",
        params![id, organization_id, name],
    )?;
    Ok(())
}

pub(crate) fn upsert_prompt_version_impl(
    conn: &Connection,
    id: &str,
    organization_id: &str,
    template: &serde_json::Value,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO prompt_versions (id, organization_id, template_json) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET template_json = excluded.template_json",
        params![id, organization_id, template.to_string()],
    )?;
    Ok(())
}

pub(crate) fn enqueue_experiment_in_txn_impl(
    conn: &Connection,
    new: &NewExperiment,
) -> Result<String, StoreError> {
    conn.execute("BEGIN IMMEDIATE", [])?;
    let result = enqueue_experiment_inner(conn, new);

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

fn enqueue_experiment_inner(conn: &Connection, new: &NewExperiment) -> Result<String, StoreError> {
    let experiment_id = new
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let dataset_id = new
        .dataset_id
        .clone()
        .unwrap_or_else(|| format!("ds-{experiment_id}"));

    conn.execute(
        "INSERT INTO experiments (id, organization_id, dataset_id, status, created_at)
         VALUES (?1, ?2, ?3, 'queued', ?4)",
        params![experiment_id, new.organization_id, dataset_id, now_rfc3339()],
    )?;

    for (position, record) in new.rows.iter().enumerate() {
        let inputs_json = serde_json::to_string(&record.inputs).map_err(|e| StoreError::Corrupt {
            entity: "dataset_rows",
            detail: e.to_string(),
        })?;
        conn.execute(
            "INSERT INTO dataset_rows (id, dataset_id, position, request_path, inputs_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                uuid::Uuid::new_v4().to_string(),
                dataset_id,
                position as i64,
                record.request_path,
                inputs_json,
            ],
        )?;
    }

    for (position, h) in new.hypotheses.iter().enumerate() {
        conn.execute(
            "INSERT INTO hypotheses (id, experiment_id, position, prompt_version_id, model, provider_key_id, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')",
            params![
                uuid::Uuid::new_v4().to_string(),
                experiment_id,
                position as i64,
                h.prompt_version_id,
                h.model,
                h.provider_key_id,
            ],
        )?;
    }

    for (position, evaluator) in new.evaluators.iter().enumerate() {
        super::scores::insert_experiment_evaluator_impl(conn, &experiment_id, position, evaluator)?;
    }

    Ok(experiment_id)
}
