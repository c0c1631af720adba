use crate::evaluator::EvaluatorScore;
use crate::model::{score_name, ExperimentEvaluator, NewEvaluator};
use crate::storage::{now_rfc3339, StoreError};
use rusqlite::{params, Connection, OptionalExtension};

/// Runs inside the caller's transaction. Returns the evaluator id.
pub(crate) fn insert_experiment_evaluator_impl(
    conn: &Connection,
    experiment_id: &str,
    position: usize,
    evaluator: &NewEvaluator,
) -> Result<String, StoreError> {
    let id = evaluator
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    conn.execute(
        "INSERT INTO experiment_evaluators (id, experiment_id, position, name, score_name, code)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            experiment_id,
            position as i64,
            evaluator.name,
            score_name(&evaluator.name),
            evaluator.code,
        ],
    )?;
    Ok(id)
}

pub(crate) fn list_experiment_evaluators_impl(
    conn: &Connection,
    experiment_id: &str,
) -> Result<Vec<ExperimentEvaluator>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, experiment_id, name, score_name, code
         FROM experiment_evaluators
         WHERE experiment_id = ?1
         ORDER BY position ASC",
    )?;
    let evaluators = stmt
        .query_map([experiment_id], |row| {
            Ok(ExperimentEvaluator {
                id: row.get(0)?,
                experiment_id: row.get(1)?,
                name: row.get(2)?,
                score_name: row.get(3)?,
                code: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(evaluators)
}

pub(crate) fn score_impl(
    conn: &Connection,
    request_id: &str,
    score_name: &str,
) -> Result<Option<EvaluatorScore>, StoreError> {
    let stored: Option<(String, f64)> = conn
        .query_row(
            "SELECT value_type, value FROM scores WHERE request_id = ?1 AND score_name = ?2",
            params![request_id, score_name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    stored
        .map(|(value_type, value)| match value_type.as_str() {
            "boolean" => Ok(EvaluatorScore::Boolean(value != 0.0)),
            "numeric" => Ok(EvaluatorScore::Numeric(value)),
            other => Err(StoreError::Corrupt {
                entity: "scores",
                detail: format!("unknown value type '{other}'"),
            }),
        })
        .transpose()
}

/// First write wins. Returns `false` when a score already existed.
pub(crate) fn record_score_impl(
    conn: &Connection,
    request_id: &str,
    score_name: &str,
    evaluator_id: &str,
    score: &EvaluatorScore,
) -> Result<bool, StoreError> {
    let (value_type, value) = match score {
        EvaluatorScore::Boolean(b) => ("boolean", if *b { 1.0 } else { 0.0 }),
        EvaluatorScore::Numeric(n) => ("numeric", *n),
    };
    let inserted = conn.execute(
        r#"
            INSERT INTO scores (request_id, score_name, evaluator_id, value_type, value, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(request_id, score_name) DO NOTHING
            "#,
        params![
            request_id,
            score_name,
            evaluator_id,
            value_type,
            value,
            now_rfc3339()
        ],
    )?;
    Ok(inserted > 0)
}
