//! Dynamic SQL construction for data-layer tile and info queries.
//!
//! Every statement is assembled from server-controlled templates. The only
//! interpolated identifiers are column names drawn from the publish-time
//! whitelist; every user-influenced value travels as a numbered bind
//! parameter through [`SqlValue`].

pub mod builder;
pub mod case;
pub mod context;
pub mod sql;

pub use builder::{
    info_query, map_tile_query, school_detail_query, series_query, time_player_rows_query,
    time_player_tile_query,
};
pub use context::{
    ContextParams, LayerSql, QueryContext, DEFAULT_TILE_ROW_LIMIT, MAX_TILE_ROW_LIMIT,
    RANDOM_ORDER_MAX_ZOOM,
};
pub use sql::{ParamSink, SqlQuery, SqlValue};
