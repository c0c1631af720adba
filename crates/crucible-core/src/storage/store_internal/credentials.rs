use crate::storage::{now_rfc3339, NewCredentialRecord, ProviderKeyRow, StoreError};
use rusqlite::{params, Connection, OptionalExtension};

pub(crate) fn organization_owner_impl(
    conn: &Connection,
    organization_id: &str,
) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT owner_id FROM organizations WHERE id = ?1 LIMIT 1",
            [organization_id],
            |row| row.get(0),
        )
        .optional()?)
}

pub(crate) fn provider_key_impl(
    conn: &Connection,
    organization_id: &str,
    provider_key_id: &str,
) -> Result<Option<ProviderKeyRow>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, organization_id, name FROM provider_keys
             WHERE id = ?1 AND organization_id = ?2 LIMIT 1",
            params![provider_key_id, organization_id],
            |row| {
                Ok(ProviderKeyRow {
                    id: row.get(0)?,
                    organization_id: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )
        .optional()?)
}

pub(crate) fn insert_credential_record_impl(
    conn: &Connection,
    record: &NewCredentialRecord<'_>,
) -> Result<String, StoreError> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        r#"
            INSERT INTO credentials (
                id, kind, secret_hash, owner_id, organization_id, provider_key_id, label, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        params![
            id,
            record.kind,
            record.secret_hash,
            record.owner_id,
            record.organization_id,
            record.provider_key_id,
            record.label,
            now_rfc3339(),
        ],
    )?;
    Ok(id)
}

pub(crate) fn delete_credential_record_impl(
    conn: &Connection,
    id: &str,
) -> Result<bool, StoreError> {
    let deleted = conn.execute("DELETE FROM credentials WHERE id = ?1", [id])?;
    Ok(deleted > 0)
}

pub(crate) fn count_credential_records_impl(conn: &Connection) -> Result<u32, StoreError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM credentials", [], |row| row.get(0))?;
    Ok(count as u32)
}
