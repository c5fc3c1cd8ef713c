//! PostGIS read-replica executor for builder-produced statements.

use bytes::Bytes;
use chrono::NaiveDate;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use layer_query::{SqlQuery, SqlValue};
use maps_common::{MapsError, MapsResult};

/// Read-replica connection pool.
pub struct Replica {
    pool: PgPool,
}

impl Replica {
    /// Create a new replica connection from a database URL.
    pub async fn connect(database_url: &str) -> MapsResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| MapsError::DatabaseError(format!("Connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the development schema (one statement per `;`).
    pub async fn migrate(&self) -> MapsResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| MapsError::DatabaseError(format!("Migration failed: {}", e)))?;
            }
        }

        Ok(())
    }

    /// Ping the replica; used by readiness checks.
    pub async fn ping(&self) -> MapsResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| MapsError::DatabaseError(format!("Ping failed: {}", e)))?;
        Ok(())
    }

    /// Fetch a single MVT tile binary.
    ///
    /// An empty feature set yields an empty (still valid) tile body.
    pub async fn fetch_tile(&self, query: &SqlQuery) -> MapsResult<Bytes> {
        let row = bind_all(sqlx::query(&query.sql), &query.params)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MapsError::DatabaseError(format!("Tile query failed: {}", e)))?;

        let tile: Option<Vec<u8>> = match row {
            Some(row) => row
                .try_get("tile")
                .map_err(|e| MapsError::DatabaseError(format!("Tile column missing: {}", e)))?,
            None => None,
        };

        Ok(Bytes::from(tile.unwrap_or_default()))
    }

    /// Fetch the single-row info aggregate.
    pub async fn fetch_info(&self, query: &SqlQuery) -> MapsResult<InfoCounts> {
        let row = bind_all(sqlx::query(&query.sql), &query.params)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MapsError::DatabaseError(format!("Info query failed: {}", e)))?;

        InfoCounts::from_row(&row)
    }

    /// Fetch sparse time-series rows (date order).
    pub async fn fetch_series(&self, query: &SqlQuery) -> MapsResult<Vec<SeriesPoint>> {
        let rows = bind_all(sqlx::query(&query.sql), &query.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MapsError::DatabaseError(format!("Series query failed: {}", e)))?;

        rows.iter().map(SeriesPoint::from_row).collect()
    }

    /// Fetch per-school detail rows.
    pub async fn fetch_school_details(&self, query: &SqlQuery) -> MapsResult<Vec<SchoolDetailRow>> {
        let rows = bind_all(sqlx::query(&query.sql), &query.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MapsError::DatabaseError(format!("School query failed: {}", e)))?;

        rows.iter().map(SchoolDetailRow::from_row).collect()
    }

    /// Fetch (school, year) time-player rows.
    pub async fn fetch_time_player_rows(&self, query: &SqlQuery) -> MapsResult<Vec<TimePlayerRow>> {
        let rows = bind_all(sqlx::query(&query.sql), &query.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MapsError::DatabaseError(format!("Time player query failed: {}", e)))?;

        rows.iter().map(TimePlayerRow::from_row).collect()
    }
}

/// Bind builder parameters positionally onto a prepared statement.
fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    params: &[SqlValue],
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
            SqlValue::Date(v) => query.bind(*v),
            SqlValue::IntArray(v) => query.bind(v.clone()),
            SqlValue::TextArray(v) => query.bind(v.clone()),
        };
    }
    query
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> MapsResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| MapsError::DatabaseError(format!("Column '{}' decode failed: {}", column, e)))
}

/// Count-by-bucket aggregate for the info panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoCounts {
    pub good: i64,
    pub moderate: i64,
    pub bad: i64,
    pub unknown: i64,
    pub measured: i64,
    pub total_schools: i64,
}

impl InfoCounts {
    fn from_row(row: &PgRow) -> MapsResult<Self> {
        Ok(Self {
            good: get(row, "good")?,
            moderate: get(row, "moderate")?,
            bad: get(row, "bad")?,
            unknown: get(row, "unknown")?,
            measured: get(row, "measured")?,
            total_schools: get(row, "total_schools")?,
        })
    }
}

/// One point of the sparse daily series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub school_id: Option<i64>,
    pub avg_value: Option<f64>,
}

impl SeriesPoint {
    fn from_row(row: &PgRow) -> MapsResult<Self> {
        Ok(Self {
            date: get(row, "date")?,
            school_id: get(row, "school_id")?,
            avg_value: get(row, "avg_value")?,
        })
    }
}

/// Classification plus weekly snapshot for one school.
#[derive(Debug, Clone, PartialEq)]
pub struct SchoolDetailRow {
    pub id: i64,
    pub name: Option<String>,
    pub country_id: Option<i64>,
    pub admin1_id: Option<i64>,
    pub connectivity_status: Option<String>,
    pub is_rt_connected: bool,
    pub measured_value: Option<f64>,
    pub attribute_value: Option<String>,
    pub field_status: String,
    pub week_connectivity_speed: Option<f64>,
    pub week_connectivity: Option<bool>,
}

impl SchoolDetailRow {
    fn from_row(row: &PgRow) -> MapsResult<Self> {
        Ok(Self {
            id: get(row, "id")?,
            name: get(row, "name")?,
            country_id: get(row, "country_id")?,
            admin1_id: get(row, "admin1_id")?,
            connectivity_status: get(row, "connectivity_status")?,
            is_rt_connected: get(row, "is_rt_connected")?,
            measured_value: get(row, "measured_value")?,
            attribute_value: get(row, "attribute_value")?,
            field_status: get(row, "field_status")?,
            week_connectivity_speed: get(row, "week_connectivity_speed")?,
            week_connectivity: get(row, "week_connectivity")?,
        })
    }
}

/// One (school, year) row of the time player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimePlayerRow {
    pub school_id: i64,
    pub year: i32,
    pub field_status: String,
    pub is_rt_connected: bool,
}

impl TimePlayerRow {
    fn from_row(row: &PgRow) -> MapsResult<Self> {
        Ok(Self {
            school_id: get(row, "id")?,
            year: get(row, "year")?,
            field_status: get(row, "field_status")?,
            is_rt_connected: get(row, "is_rt_connected")?,
        })
    }
}

/// Development/read-model schema.
pub const SCHEMA_SQL: &str = r#"
CREATE EXTENSION IF NOT EXISTS postgis;

CREATE TABLE IF NOT EXISTS data_sources (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    version INT NOT NULL DEFAULT 1,
    status TEXT NOT NULL DEFAULT 'DRAFT',
    column_config JSONB NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS data_layers (
    id BIGSERIAL PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'DRAFT',
    is_reverse BOOLEAN NOT NULL DEFAULT FALSE,
    global_benchmark JSONB,
    legend_configs JSONB NOT NULL DEFAULT '[]',
    data_source_id BIGINT NOT NULL REFERENCES data_sources(id),
    data_source_column TEXT NOT NULL,
    live_source_types TEXT[] NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS data_layer_countries (
    layer_id BIGINT NOT NULL REFERENCES data_layers(id),
    country_id BIGINT NOT NULL,
    is_default BOOLEAN NOT NULL DEFAULT FALSE,
    PRIMARY KEY (layer_id, country_id)
);

CREATE TABLE IF NOT EXISTS schools (
    id BIGSERIAL PRIMARY KEY,
    name TEXT,
    country_id BIGINT NOT NULL,
    admin1_id BIGINT,
    admin2_id BIGINT,
    geopoint GEOMETRY(Point, 4326) NOT NULL,
    connectivity_status TEXT NOT NULL DEFAULT 'unknown',
    coverage_type TEXT,
    last_weekly_status_id BIGINT
);

CREATE TABLE IF NOT EXISTS school_daily_status (
    id BIGSERIAL PRIMARY KEY,
    school_id BIGINT NOT NULL REFERENCES schools(id),
    date DATE NOT NULL,
    live_data_source TEXT NOT NULL DEFAULT 'UNKNOWN',
    connectivity_speed DOUBLE PRECISION,
    connectivity_latency DOUBLE PRECISION
);

CREATE TABLE IF NOT EXISTS school_weekly_status (
    id BIGSERIAL PRIMARY KEY,
    school_id BIGINT NOT NULL REFERENCES schools(id),
    year INT NOT NULL,
    week INT NOT NULL,
    live_data_source TEXT NOT NULL DEFAULT 'UNKNOWN',
    connectivity BOOLEAN,
    connectivity_speed DOUBLE PRECISION,
    connectivity_latency DOUBLE PRECISION
);

CREATE INDEX IF NOT EXISTS idx_schools_geopoint ON schools USING GIST (geopoint);
CREATE INDEX IF NOT EXISTS idx_schools_country ON schools (country_id);
CREATE INDEX IF NOT EXISTS idx_daily_school_date ON school_daily_status (school_id, date);
CREATE INDEX IF NOT EXISTS idx_weekly_school_year_week ON school_weekly_status (school_id, year, week)
"#;
