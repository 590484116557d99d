//! Connection repository.

use anyhow::{Context, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::models::Connection;

const CONNECTION_COLUMNS: &str = "id, organization_id, connection_type, credentials, username, \
     password, location, warehouse_name, database_name, role, host, port, connection_options";

fn connection_from_row(row: &PgRow) -> Result<Connection> {
    Ok(Connection {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        connection_type: row.try_get::<String, _>("connection_type")?.parse()?,
        credentials: row.try_get("credentials")?,
        username: row.try_get("username")?,
        password: row.try_get("password")?,
        location: row.try_get("location")?,
        warehouse_name: row.try_get("warehouse_name")?,
        database_name: row.try_get("database_name")?,
        role: row.try_get("role")?,
        host: row.try_get("host")?,
        port: row.try_get("port")?,
        connection_options: row.try_get("connection_options")?,
    })
}

pub async fn load_connection_by_id(
    pool: &PgPool,
    organization_id: i64,
    connection_id: i64,
) -> Result<Connection> {
    let row = sqlx::query(&format!(
        "select {CONNECTION_COLUMNS} from connections \
         where id = $1 and organization_id = $2 and deactivated_at is null"
    ))
    .bind(connection_id)
    .bind(organization_id)
    .fetch_one(pool)
    .await
    .with_context(|| format!("loading connection {connection_id}"))?;

    connection_from_row(&row)
}
