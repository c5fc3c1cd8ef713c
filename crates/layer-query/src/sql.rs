//! Typed SQL fragments: bind-parameter sink and finished statements.

use chrono::NaiveDate;
use maps_common::BoundingBox;

/// A bindable value. Executors bind these positionally through the driver;
/// values never appear in the SQL text itself.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    IntArray(Vec<i64>),
    TextArray(Vec<String>),
}

/// A finished statement: SQL text plus its bind parameters in order.
#[derive(Debug, Clone)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Collects bind parameters and hands out `$n` placeholders.
#[derive(Debug, Default)]
pub struct ParamSink {
    values: Vec<SqlValue>,
}

impl ParamSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value and return its placeholder.
    pub fn bind(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn finish(self, sql: String) -> SqlQuery {
        SqlQuery { sql, params: self.values }
    }
}

/// Densified tile-envelope polygon expression.
///
/// The envelope is segmentized at a quarter of its width so reprojection at
/// low zoom doesn't distort the clip edges.
pub fn envelope_geom_sql(envelope: &BoundingBox, sink: &mut ParamSink) -> String {
    let segment = envelope.width() / 4.0;
    format!(
        "ST_Segmentize(ST_MakeEnvelope({}, {}, {}, {}, 3857), {})",
        sink.bind(SqlValue::Float(envelope.min_x)),
        sink.bind(SqlValue::Float(envelope.min_y)),
        sink.bind(SqlValue::Float(envelope.max_x)),
        sink.bind(SqlValue::Float(envelope.max_y)),
        sink.bind(SqlValue::Float(segment)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_numbered_in_order() {
        let mut sink = ParamSink::new();
        assert_eq!(sink.bind(SqlValue::Int(1)), "$1");
        assert_eq!(sink.bind(SqlValue::Text("x".into())), "$2");
        assert_eq!(sink.bind(SqlValue::Float(0.5)), "$3");

        let query = sink.finish("SELECT $1, $2, $3".into());
        assert_eq!(query.params.len(), 3);
        assert_eq!(query.params[0], SqlValue::Int(1));
    }

    #[test]
    fn test_envelope_geom_binds_coordinates() {
        let mut sink = ParamSink::new();
        let bbox = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let geom = envelope_geom_sql(&bbox, &mut sink);

        assert_eq!(geom, "ST_Segmentize(ST_MakeEnvelope($1, $2, $3, $4, 3857), $5)");
        assert_eq!(sink.len(), 5);
        // Segment length is a quarter of the envelope width
        let query = sink.finish(geom);
        assert_eq!(query.params[4], SqlValue::Float(25.0));
    }
}
