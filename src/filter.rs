use std::collections::HashMap;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::Uri;
use serde::Deserialize;
use serde_json::Value;

use crate::api_constants::{
    DEFAULT_NEARBY_DISTANCE, DEFAULT_NEARBY_LAT, DEFAULT_NEARBY_LNG, FILTER_HEADER,
};
use crate::error::ApiError;

/// Type-safe representation of filterable route columns.
/// Column names in generated SQL only ever come from this enum,
/// never from the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteField {
    Id,
    DisplayName,
    RouteName,
    IdUserAccount,
    Type,
    FavoriteCount,
    CurrentRating,
    PhotoUrl,
    Distance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Integer,
    Real,
    Text,
}

impl RouteField {
    pub const ALL: [Self; 9] = [
        Self::Id,
        Self::DisplayName,
        Self::RouteName,
        Self::IdUserAccount,
        Self::Type,
        Self::FavoriteCount,
        Self::CurrentRating,
        Self::PhotoUrl,
        Self::Distance,
    ];

    pub const fn as_sql_column(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::DisplayName => "display_name",
            Self::RouteName => "route_name",
            Self::IdUserAccount => "id_user_account",
            Self::Type => "type",
            Self::FavoriteCount => "favorite_count",
            Self::CurrentRating => "current_rating",
            Self::PhotoUrl => "photo_url",
            Self::Distance => "distance",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_sql_column() == name)
    }

    const fn kind(&self) -> FieldKind {
        match self {
            Self::Id | Self::IdUserAccount | Self::FavoriteCount => FieldKind::Integer,
            Self::CurrentRating | Self::Distance => FieldKind::Real,
            Self::DisplayName | Self::RouteName | Self::Type | Self::PhotoUrl => FieldKind::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FilterValue {
    fn from_json(field: RouteField, value: &Value) -> Result<Self, ApiError> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Real))
                .ok_or_else(|| {
                    ApiError::invalid_filter(format!(
                        "Unsupported number for filter field {}",
                        field.as_sql_column()
                    ))
                }),
            Value::String(s) => Ok(Self::Text(s.clone())),
            Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
                Err(ApiError::invalid_filter(format!(
                    "Filter field {} must be a string, number or null",
                    field.as_sql_column()
                )))
            }
        }
    }

    fn from_query(field: RouteField, raw: &str) -> Result<Self, ApiError> {
        let invalid = || {
            ApiError::invalid_filter(format!(
                "Invalid value for filter field {}",
                field.as_sql_column()
            ))
        };

        match field.kind() {
            FieldKind::Integer => raw.parse().map(Self::Integer).map_err(|_| invalid()),
            FieldKind::Real => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Self::Real)
                .ok_or_else(invalid),
            FieldKind::Text => Ok(Self::Text(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterSql {
    clause: String,
    params: Vec<FilterValue>,
}

impl FilterSql {
    pub fn clause(&self) -> &str {
        &self.clause
    }

    pub fn params(&self) -> &[FilterValue] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.clause.is_empty()
    }

    /// The clause prefixed with `WHERE`, or an empty string.
    pub fn where_clause(&self) -> String {
        if self.clause.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clause)
        }
    }
}

/// Column equality filter on the `route` table, combined with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteFilter {
    conditions: Vec<(RouteField, FilterValue)>,
}

impl RouteFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: RouteField, value: FilterValue) -> Self {
        self.conditions.retain(|(existing, _)| *existing != field);
        self.conditions.push((field, value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn parse_json(raw: &str) -> Result<Self, ApiError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ApiError::invalid_filter(format!("Filter is not valid JSON: {e}")))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, ApiError> {
        let Value::Object(map) = value else {
            return Err(ApiError::invalid_filter("Filter must be a JSON object"));
        };

        let mut filter = Self::new();
        for (key, value) in map {
            let field = RouteField::from_name(key)
                .ok_or_else(|| ApiError::invalid_filter(format!("Unknown filter field: {key}")))?;
            filter = filter.with(field, FilterValue::from_json(field, value)?);
        }
        Ok(filter)
    }

    pub fn from_pairs(pairs: &HashMap<String, String>) -> Result<Self, ApiError> {
        let mut keys: Vec<&String> = pairs.keys().collect();
        keys.sort();

        let mut filter = Self::new();
        for key in keys {
            let field = RouteField::from_name(key)
                .ok_or_else(|| ApiError::invalid_filter(format!("Unknown filter field: {key}")))?;
            filter = filter.with(field, FilterValue::from_query(field, &pairs[key])?);
        }
        Ok(filter)
    }

    /// Builds the AND-ed equality clause, qualifying columns with `alias` when given.
    pub fn to_sql(&self, alias: Option<&str>) -> FilterSql {
        let mut parts = Vec::with_capacity(self.conditions.len());
        let mut params = Vec::new();

        for (field, value) in &self.conditions {
            let column = match alias {
                Some(prefix) => format!("{prefix}.{}", field.as_sql_column()),
                None => field.as_sql_column().to_string(),
            };
            match value {
                FilterValue::Null => parts.push(format!("{column} IS NULL")),
                other => {
                    parts.push(format!("{column} = ?"));
                    params.push(other.clone());
                }
            }
        }

        FilterSql {
            clause: parts.join(" AND "),
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NearbyParams {
    lat: f64,
    lng: f64,
    #[serde(default)]
    distance: Option<f64>,
}

/// Centre and half-width (in degrees) of a nearby-waypoint search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub distance: f64,
}

impl Default for NearbyQuery {
    fn default() -> Self {
        Self {
            lat: DEFAULT_NEARBY_LAT,
            lng: DEFAULT_NEARBY_LNG,
            distance: DEFAULT_NEARBY_DISTANCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl NearbyQuery {
    fn from_params(params: NearbyParams) -> Result<Self, ApiError> {
        if !params.lat.is_finite() || !params.lng.is_finite() {
            return Err(ApiError::invalid_filter("lat and lng must be finite numbers"));
        }

        let distance = match params.distance {
            None => DEFAULT_NEARBY_DISTANCE,
            Some(d) if d == 0.0 => DEFAULT_NEARBY_DISTANCE,
            Some(d) if d.is_finite() && d > 0.0 => d,
            Some(_) => {
                return Err(ApiError::invalid_filter(
                    "distance must be a positive number of degrees",
                ))
            }
        };

        Ok(Self {
            lat: params.lat,
            lng: params.lng,
            distance,
        })
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox {
            min_lat: self.lat - self.distance,
            max_lat: self.lat + self.distance,
            min_lng: self.lng - self.distance,
            max_lng: self.lng + self.distance,
        }
    }
}

/// Something that can be read from the `filter` header (JSON) or, failing
/// that, from the query string.
pub trait FilterSource: Sized {
    fn from_json(raw: &str) -> Result<Self, ApiError>;
    fn from_query(uri: &Uri) -> Result<Self, ApiError>;
    fn absent() -> Self;
}

impl FilterSource for RouteFilter {
    fn from_json(raw: &str) -> Result<Self, ApiError> {
        Self::parse_json(raw)
    }

    fn from_query(uri: &Uri) -> Result<Self, ApiError> {
        let Query(pairs) = Query::<HashMap<String, String>>::try_from_uri(uri)
            .map_err(|e| ApiError::invalid_filter(e.body_text()))?;
        Self::from_pairs(&pairs)
    }

    fn absent() -> Self {
        Self::new()
    }
}

impl FilterSource for NearbyQuery {
    fn from_json(raw: &str) -> Result<Self, ApiError> {
        let params: NearbyParams = serde_json::from_str(raw)
            .map_err(|e| ApiError::invalid_filter(format!("Invalid nearby filter: {e}")))?;
        Self::from_params(params)
    }

    fn from_query(uri: &Uri) -> Result<Self, ApiError> {
        let Query(params) = Query::<NearbyParams>::try_from_uri(uri)
            .map_err(|e| ApiError::invalid_filter(e.body_text()))?;
        Self::from_params(params)
    }

    fn absent() -> Self {
        Self::default()
    }
}

/// Extractor for `FilterSource` types. The `filter` header wins over the
/// query string; with neither present the source's default is used.
pub struct Filter<T>(pub T);

impl<S, T> FromRequestParts<S> for Filter<T>
where
    S: Send + Sync,
    T: FilterSource,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(value) = parts.headers.get(FILTER_HEADER) {
            let raw = value
                .to_str()
                .map_err(|_| ApiError::invalid_filter("Filter header must be visible ASCII"))?;
            if !raw.trim().is_empty() {
                return T::from_json(raw).map(Filter);
            }
        }

        match parts.uri.query() {
            Some(query) if !query.is_empty() => T::from_query(&parts.uri).map(Filter),
            _ => Ok(Filter(T::absent())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_equality_clause_from_json() {
        let filter =
            RouteFilter::from_value(&json!({ "id_user_account": 7, "type": null })).unwrap();
        let sql = filter.to_sql(Some("route"));

        assert_eq!(
            sql.clause(),
            "route.id_user_account = ? AND route.type IS NULL"
        );
        assert_eq!(sql.params(), &[FilterValue::Integer(7)]);
        assert_eq!(
            sql.where_clause(),
            " WHERE route.id_user_account = ? AND route.type IS NULL"
        );
    }

    #[test]
    fn empty_filter_has_no_where_clause() {
        let sql = RouteFilter::parse_json("{}").unwrap().to_sql(None);
        assert!(sql.is_empty());
        assert_eq!(sql.where_clause(), "");
    }

    #[test]
    fn rejects_unknown_columns() {
        let err = RouteFilter::parse_json(r#"{"1=1; DROP TABLE route; --": 1}"#).unwrap_err();
        assert_eq!(err.code(), Some("INVALID_FILTER"));
    }

    #[test]
    fn rejects_non_scalar_values() {
        let err = RouteFilter::from_value(&json!({ "id": [1, 2] })).unwrap_err();
        assert_eq!(err.code(), Some("INVALID_FILTER"));

        let err = RouteFilter::parse_json("[1]").unwrap_err();
        assert_eq!(err.code(), Some("INVALID_FILTER"));
    }

    #[test]
    fn query_pairs_are_typed_by_column() {
        let mut pairs = HashMap::new();
        pairs.insert("id".to_string(), "12".to_string());
        pairs.insert("route_name".to_string(), "Levee loop".to_string());
        let filter = RouteFilter::from_pairs(&pairs).unwrap();
        let sql = filter.to_sql(None);

        assert_eq!(sql.clause(), "id = ? AND route_name = ?");
        assert_eq!(
            sql.params(),
            &[
                FilterValue::Integer(12),
                FilterValue::Text("Levee loop".to_string())
            ]
        );

        pairs.insert("favorite_count".to_string(), "lots".to_string());
        assert!(RouteFilter::from_pairs(&pairs).is_err());
    }

    #[test]
    fn nearby_defaults_distance() {
        let query = NearbyQuery::from_json(r#"{"lat": 1.0, "lng": 2.0}"#).unwrap();
        assert_eq!(query.distance, DEFAULT_NEARBY_DISTANCE);

        let query = NearbyQuery::from_json(r#"{"lat": 1.0, "lng": 2.0, "distance": 0}"#).unwrap();
        assert_eq!(query.distance, DEFAULT_NEARBY_DISTANCE);

        assert!(NearbyQuery::from_json(r#"{"lat": 1.0, "lng": 2.0, "distance": -1}"#).is_err());
        assert!(NearbyQuery::from_json(r#"{"lat": 1.0}"#).is_err());
        assert!(NearbyQuery::from_json(r#"{"lat": 1.0, "lng": 2.0, "radius": 3}"#).is_err());
    }

    #[test]
    fn bounding_box_spans_distance_each_way() {
        let bbox = NearbyQuery {
            lat: 29.5,
            lng: -90.0,
            distance: 0.5,
        }
        .bounding_box();

        assert_eq!(
            bbox,
            BoundingBox {
                min_lat: 29.0,
                max_lat: 30.0,
                min_lng: -90.5,
                max_lng: -89.5,
            }
        );
    }

    #[test]
    fn nearby_reads_query_string() {
        let uri: Uri = "/route&nearby?lat=10&lng=20&distance=0.5".parse().unwrap();
        let query = NearbyQuery::from_query(&uri).unwrap();
        assert_eq!(
            query,
            NearbyQuery {
                lat: 10.0,
                lng: 20.0,
                distance: 0.5
            }
        );
    }
}
