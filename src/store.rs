use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, warn};

use crate::api_constants::SENTINEL_USER_ID;
use crate::db::{self, DbPools, DbQueryError};
use crate::filter::{NearbyQuery, RouteFilter};
use crate::models::{
    CreatedRoute, MergedRoute, MergedRow, NearbyWaypoint, NewRoute, NewWaypoint, Route, Waypoint,
    WaypointPosition,
};

const ROUTE_COLUMNS: &str = "id, display_name, route_name, id_user_account, type, favorite_count, current_rating, photo_url, route_preview, distance, disowned_at";
const WAYPOINT_COLUMNS: &str = "id, id_route, lat, lng, count, street";

// Five bound parameters per waypoint keeps each statement well under
// SQLite's host parameter limit.
pub const WAYPOINT_BATCH_SIZE: usize = 1000;

pub async fn list_routes(pools: &DbPools, filter: &RouteFilter) -> Result<Vec<Route>, DbQueryError> {
    let filter_sql = filter.to_sql(None);
    let sql = format!(
        "SELECT {ROUTE_COLUMNS} FROM route{} ORDER BY id",
        filter_sql.where_clause()
    );

    let query = crate::bind_filter_params!(sqlx::query_as::<_, Route>(&sql), filter_sql.params());
    db::query_with_timeout(query.fetch_all(pools.read())).await
}

pub async fn fetch_merged_route(
    pools: &DbPools,
    filter: &RouteFilter,
) -> Result<Option<MergedRoute>, DbQueryError> {
    let filter_sql = filter.to_sql(Some("route"));
    let sql = format!(
        "SELECT route.id, route.route_name, route.type, route.current_rating, route.favorite_count, \
         waypoint.lat, waypoint.lng, waypoint.count \
         FROM route JOIN waypoint ON route.id = waypoint.id_route{} \
         ORDER BY route.id, waypoint.count",
        filter_sql.where_clause()
    );

    let query =
        crate::bind_filter_params!(sqlx::query_as::<_, MergedRow>(&sql), filter_sql.params());
    let rows = db::query_with_timeout(query.fetch_all(pools.read())).await?;

    Ok(merge_route_rows(rows))
}

/// Folds joined route/waypoint rows into the first route's summary.
/// Rows belonging to any later route are dropped.
pub fn merge_route_rows(rows: Vec<MergedRow>) -> Option<MergedRoute> {
    let first = rows.first()?.clone();

    let waypoints: Vec<WaypointPosition> = rows
        .iter()
        .filter(|row| row.id == first.id)
        .map(|row| WaypointPosition {
            lat: row.lat,
            lng: row.lng,
            count: row.count,
        })
        .collect();

    if waypoints.len() < rows.len() {
        warn!(
            "Route filter matched more than one route; returning route {} only",
            first.id
        );
    }

    Some(MergedRoute {
        id: first.id,
        route_name: first.route_name,
        route_type: first.route_type,
        current_rating: first.current_rating,
        favorite_count: first.favorite_count,
        waypoints,
    })
}

/// Route starts, and named-street waypoints, inside the query's bounding box.
pub async fn find_nearby(
    pools: &DbPools,
    query: &NearbyQuery,
) -> Result<Vec<NearbyWaypoint>, DbQueryError> {
    let bbox = query.bounding_box();
    debug!(
        "Nearby search lat [{}, {}] lng [{}, {}]",
        bbox.min_lat, bbox.max_lat, bbox.min_lng, bbox.max_lng
    );

    db::query_with_timeout(
        sqlx::query_as::<_, NearbyWaypoint>(
            "SELECT waypoint.id, waypoint.id_route, waypoint.lat, waypoint.lng, waypoint.count, waypoint.street,
                    route.display_name, route.route_name, route.id_user_account, route.type,
                    route.favorite_count, route.current_rating, route.photo_url, route.route_preview,
                    route.distance
             FROM waypoint JOIN route ON route.id = waypoint.id_route
             WHERE waypoint.lat BETWEEN ? AND ?
               AND waypoint.lng BETWEEN ? AND ?
               AND (waypoint.count = 0 OR waypoint.street IS NOT NULL)
             ORDER BY waypoint.id_route, waypoint.count",
        )
        .bind(bbox.min_lat)
        .bind(bbox.max_lat)
        .bind(bbox.min_lng)
        .bind(bbox.max_lng)
        .fetch_all(pools.read()),
    )
    .await
}

/// Inserts a route and all of its waypoints in one transaction.
/// Nothing is persisted unless every statement succeeds.
pub async fn insert_route(
    pools: &DbPools,
    route: &NewRoute,
    waypoints: &[NewWaypoint],
) -> Result<CreatedRoute, DbQueryError> {
    let mut tx = db::query_with_timeout(pools.write().begin()).await?;

    let sql = format!(
        "INSERT INTO route (display_name, route_name, id_user_account, type, favorite_count, current_rating, photo_url, route_preview, distance) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {ROUTE_COLUMNS}"
    );
    let created = db::query_with_timeout(
        sqlx::query_as::<_, Route>(&sql)
            .bind(&route.display_name)
            .bind(&route.route_name)
            .bind(route.id_user_account)
            .bind(&route.route_type)
            .bind(route.favorite_count)
            .bind(route.current_rating)
            .bind(&route.photo_url)
            .bind(route.route_preview.as_ref().map(Json))
            .bind(route.distance)
            .fetch_one(&mut *tx),
    )
    .await?;

    let mut inserted = Vec::with_capacity(waypoints.len());
    for batch in waypoints.chunks(WAYPOINT_BATCH_SIZE) {
        let mut query_builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("INSERT INTO waypoint (id_route, lat, lng, count, street) ");

        query_builder.push_values(batch, |mut b, waypoint| {
            b.push_bind(created.id)
                .push_bind(waypoint.lat)
                .push_bind(waypoint.lng)
                .push_bind(waypoint.count)
                .push_bind(waypoint.street.as_deref());
        });
        query_builder.push(format!(" RETURNING {WAYPOINT_COLUMNS}"));

        let rows = db::query_with_timeout(
            query_builder
                .build_query_as::<Waypoint>()
                .fetch_all(&mut *tx),
        )
        .await?;
        inserted.extend(rows);
    }

    db::query_with_timeout(tx.commit()).await?;

    inserted.sort_by_key(|w| w.count);
    Ok(CreatedRoute {
        route: created,
        waypoints: inserted,
    })
}

/// Hands every route matching `filter` to the sentinel user and stamps
/// `disowned_at`. Routes already disowned are left untouched, so the result
/// holds only the rows changed by this call.
pub async fn disown_routes(
    pools: &DbPools,
    filter: &RouteFilter,
) -> Result<Vec<Route>, DbQueryError> {
    let filter_sql = filter.to_sql(None);
    let mut conditions = String::from("disowned_at IS NULL");
    if !filter_sql.is_empty() {
        conditions.push_str(" AND ");
        conditions.push_str(filter_sql.clause());
    }
    let sql = format!(
        "UPDATE route SET id_user_account = ?, disowned_at = ? WHERE {conditions} RETURNING {ROUTE_COLUMNS}"
    );
    let disowned_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    let query = sqlx::query_as::<_, Route>(&sql)
        .bind(SENTINEL_USER_ID)
        .bind(disowned_at);
    let query = crate::bind_filter_params!(query, filter_sql.params());

    let mut routes = db::query_with_timeout(query.fetch_all(pools.write())).await?;
    routes.sort_by_key(|r| r.id);
    Ok(routes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, count: i64, lat: f64) -> MergedRow {
        MergedRow {
            id,
            route_name: Some(format!("route {id}")),
            route_type: None,
            current_rating: Some(4.0),
            favorite_count: 0,
            lat,
            lng: -90.0,
            count,
        }
    }

    #[test]
    fn merges_rows_into_first_route() {
        let merged = merge_route_rows(vec![row(3, 0, 29.9), row(3, 1, 29.95), row(3, 2, 30.0)])
            .unwrap();

        assert_eq!(merged.id, 3);
        assert_eq!(merged.route_name.as_deref(), Some("route 3"));
        assert_eq!(
            merged.waypoints.iter().map(|w| w.count).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(merged.waypoints[1].lat, 29.95);
    }

    #[test]
    fn drops_rows_from_other_routes() {
        let merged = merge_route_rows(vec![row(1, 0, 1.0), row(1, 1, 2.0), row(2, 0, 3.0)]).unwrap();
        assert_eq!(merged.id, 1);
        assert_eq!(merged.waypoints.len(), 2);
    }

    #[test]
    fn no_rows_means_no_route() {
        assert!(merge_route_rows(Vec::new()).is_none());
    }

    #[test]
    fn merged_route_hides_waypoint_columns() {
        let merged = merge_route_rows(vec![row(9, 0, 1.0)]).unwrap();
        let json = serde_json::to_value(&merged).unwrap();
        let object = json.as_object().unwrap();

        assert!(object.get("lat").is_none());
        assert!(object.get("lng").is_none());
        assert!(object.get("count").is_none());
        assert_eq!(json["waypoints"][0]["count"], 0);
        assert!(json["type"].is_null());
    }
}
