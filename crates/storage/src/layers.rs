//! Data-layer configuration lookup and publish-time maintenance.
//!
//! Public endpoints only ever see `PUBLISHED` layers; the publish
//! transition validates the configuration, recomputes the layer↔country
//! facts, and is the single write path this service owns.

use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::info;

use maps_common::layer::validate_identifier;
use maps_common::{DataLayer, DataSource, LayerStatus, LayerType, MapsError, MapsResult};

use crate::replica::Replica;

impl Replica {
    /// Look up a layer scoped to `status = PUBLISHED`, with its data source.
    ///
    /// Unpublished and unknown ids both come back as `None`, which public
    /// handlers surface as 404.
    pub async fn fetch_published_layer(
        &self,
        layer_id: i64,
    ) -> MapsResult<Option<(DataLayer, DataSource)>> {
        let row = sqlx::query(&layer_select("dl.id = $1 AND dl.status = 'PUBLISHED'"))
            .bind(layer_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| MapsError::DatabaseError(format!("Layer query failed: {}", e)))?;

        row.as_ref().map(layer_from_row).transpose()
    }

    /// Look up a layer regardless of lifecycle status (publish workflow).
    pub async fn fetch_layer(&self, layer_id: i64) -> MapsResult<Option<(DataLayer, DataSource)>> {
        let row = sqlx::query(&layer_select("dl.id = $1"))
            .bind(layer_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| MapsError::DatabaseError(format!("Layer query failed: {}", e)))?;

        row.as_ref().map(layer_from_row).transpose()
    }

    /// Publish a layer: validate its configuration against the data source,
    /// flip the status, and rebuild the country-relationship facts.
    ///
    /// Validation failures here are configuration errors; nothing invalid
    /// reaches the tile path.
    pub async fn publish_layer(&self, layer_id: i64) -> MapsResult<DataLayer> {
        let (mut layer, source) = self
            .fetch_layer(layer_id)
            .await?
            .ok_or(MapsError::LayerNotFound(layer_id))?;

        if layer.status == LayerStatus::Disabled {
            return Err(MapsError::ConfigError(format!(
                "layer '{}' is disabled and cannot be published",
                layer.code
            )));
        }

        layer.validate_for_publish(&source)?;

        sqlx::query("UPDATE data_layers SET status = 'PUBLISHED' WHERE id = $1")
            .bind(layer_id)
            .execute(self.pool())
            .await
            .map_err(|e| MapsError::DatabaseError(format!("Publish update failed: {}", e)))?;
        layer.status = LayerStatus::Published;

        let countries = self.rebuild_country_relationships(&layer).await?;
        info!(layer = %layer.code, countries, "published data layer");

        Ok(layer)
    }

    /// Recompute the "country has data for this layer" facts.
    ///
    /// Existing `is_default` rows survive the rebuild.
    pub async fn rebuild_country_relationships(&self, layer: &DataLayer) -> MapsResult<u64> {
        sqlx::query("DELETE FROM data_layer_countries WHERE layer_id = $1 AND is_default = FALSE")
            .bind(layer.id)
            .execute(self.pool())
            .await
            .map_err(|e| MapsError::DatabaseError(format!("Relationship delete failed: {}", e)))?;

        let inserted = match layer.layer_type {
            LayerType::Live => {
                let mut sources = layer.live_source_types.clone();
                sources.push(maps_common::UNKNOWN_SOURCE.to_string());

                sqlx::query(
                    "INSERT INTO data_layer_countries (layer_id, country_id, is_default) \
                     SELECT $1, s.country_id, FALSE \
                     FROM schools s \
                     JOIN school_daily_status sds ON sds.school_id = s.id \
                     WHERE sds.live_data_source = ANY($2) \
                     GROUP BY s.country_id \
                     ON CONFLICT (layer_id, country_id) DO NOTHING",
                )
                .bind(layer.id)
                .bind(sources)
                .execute(self.pool())
                .await
            }
            LayerType::Static => {
                // The interpolated column went through the identifier
                // whitelist during validation.
                validate_identifier(&layer.data_source_column)?;
                sqlx::query(&format!(
                    "INSERT INTO data_layer_countries (layer_id, country_id, is_default) \
                     SELECT $1, s.country_id, FALSE \
                     FROM schools s \
                     WHERE s.{} IS NOT NULL \
                     GROUP BY s.country_id \
                     ON CONFLICT (layer_id, country_id) DO NOTHING",
                    layer.data_source_column
                ))
                .bind(layer.id)
                .execute(self.pool())
                .await
            }
        }
        .map_err(|e| MapsError::DatabaseError(format!("Relationship rebuild failed: {}", e)))?;

        Ok(inserted.rows_affected())
    }

    /// A country's default live overlay, if one is marked.
    pub async fn default_layer_for_country(&self, country_id: i64) -> MapsResult<Option<i64>> {
        let row = sqlx::query(
            "SELECT dlc.layer_id AS layer_id \
             FROM data_layer_countries dlc \
             JOIN data_layers dl ON dl.id = dlc.layer_id \
             WHERE dlc.country_id = $1 AND dlc.is_default AND dl.status = 'PUBLISHED' \
             LIMIT 1",
        )
        .bind(country_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| MapsError::DatabaseError(format!("Default layer query failed: {}", e)))?;

        row.map(|r| {
            r.try_get("layer_id")
                .map_err(|e| MapsError::DatabaseError(format!("Column decode failed: {}", e)))
        })
        .transpose()
    }
}

fn layer_select(predicate: &str) -> String {
    format!(
        "SELECT dl.id AS id, dl.code AS code, dl.name AS name, dl.type AS type, \
         dl.category AS category, dl.status AS status, dl.is_reverse AS is_reverse, \
         dl.global_benchmark AS global_benchmark, dl.legend_configs AS legend_configs, \
         dl.data_source_id AS data_source_id, dl.data_source_column AS data_source_column, \
         dl.live_source_types AS live_source_types, \
         ds.id AS ds_id, ds.name AS ds_name, ds.version AS ds_version, \
         ds.status AS ds_status, ds.column_config AS ds_column_config \
         FROM data_layers dl \
         JOIN data_sources ds ON ds.id = dl.data_source_id \
         WHERE {}",
        predicate
    )
}

fn layer_from_row(row: &PgRow) -> MapsResult<(DataLayer, DataSource)> {
    let db_err = |e: sqlx::Error| MapsError::DatabaseError(format!("Column decode failed: {}", e));
    fn cfg_err(what: &'static str) -> impl Fn(serde_json::Error) -> MapsError {
        move |e| MapsError::ConfigError(format!("bad {} JSON: {}", what, e))
    }

    let status: String = row.try_get("status").map_err(db_err)?;
    let status = status
        .parse::<LayerStatus>()
        .map_err(|_| MapsError::ConfigError(format!("unknown layer status '{}'", status)))?;

    let layer_type: String = row.try_get("type").map_err(db_err)?;
    let layer_type = match layer_type.as_str() {
        "LIVE" => LayerType::Live,
        "STATIC" => LayerType::Static,
        other => {
            return Err(MapsError::ConfigError(format!("unknown layer type '{}'", other)));
        }
    };

    let global_benchmark: Option<serde_json::Value> =
        row.try_get("global_benchmark").map_err(db_err)?;
    let global_benchmark = global_benchmark
        .map(serde_json::from_value)
        .transpose()
        .map_err(cfg_err("global_benchmark"))?;

    let legend_configs: serde_json::Value = row.try_get("legend_configs").map_err(db_err)?;
    let legend_configs =
        serde_json::from_value(legend_configs).map_err(cfg_err("legend_configs"))?;

    let ds_status: String = row.try_get("ds_status").map_err(db_err)?;
    let ds_status = ds_status
        .parse::<LayerStatus>()
        .map_err(|_| MapsError::ConfigError(format!("unknown source status '{}'", ds_status)))?;

    let column_config: serde_json::Value = row.try_get("ds_column_config").map_err(db_err)?;
    let column_config = serde_json::from_value(column_config).map_err(cfg_err("column_config"))?;

    let layer = DataLayer {
        id: row.try_get("id").map_err(db_err)?,
        code: row.try_get("code").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        layer_type,
        category: row.try_get("category").map_err(db_err)?,
        status,
        is_reverse: row.try_get("is_reverse").map_err(db_err)?,
        global_benchmark,
        legend_configs,
        data_source_id: row.try_get("data_source_id").map_err(db_err)?,
        data_source_column: row.try_get("data_source_column").map_err(db_err)?,
        live_source_types: row.try_get("live_source_types").map_err(db_err)?,
    };

    let source = DataSource {
        id: row.try_get("ds_id").map_err(db_err)?,
        name: row.try_get("ds_name").map_err(db_err)?,
        version: row.try_get("ds_version").map_err(db_err)?,
        status: ds_status,
        column_config,
    };

    Ok((layer, source))
}
