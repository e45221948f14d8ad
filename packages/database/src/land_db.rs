//! Land-use node storage in `DuckDB`.
//!
//! Holds regions with their neighbour lists, land-use ways, every imported
//! node (with the three verdict columns filled in by the admissibility
//! pipeline) and the per-region result summaries. The default database
//! lives at `data/wind_siting.duckdb`.

use std::path::Path;
use std::str::FromStr as _;

use duckdb::{Connection, Row};
use wind_siting_land_models::{
    Coordinates, EvaluatedNode, Landuse, Node, NodeVerdict, Region, RegionSummary, SummaryRecord,
    ThresholdKey, Way,
};

use crate::DbError;

/// Opens (or creates) the siting `DuckDB` and ensures the schema exists.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent() {
        crate::paths::ensure_dir(parent)?;
    }

    log::debug!("Opening siting database at {}", path.display());
    let conn = Connection::open(path)?;
    create_schema(&conn)?;
    Ok(conn)
}

/// Opens a throwaway in-memory database with the schema applied.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open_in_memory() -> Result<Connection, DbError> {
    let conn = Connection::open_in_memory()?;
    create_schema(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS regions (
            id BIGINT PRIMARY KEY,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS region_neighbours (
            region_id BIGINT NOT NULL,
            neighbour_id BIGINT NOT NULL,
            ordinal BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ways (
            id BIGINT PRIMARY KEY,
            region_id BIGINT NOT NULL,
            landuse TEXT
        );

        CREATE TABLE IF NOT EXISTS nodes (
            id BIGINT PRIMARY KEY,
            lon DOUBLE NOT NULL,
            lat DOUBLE NOT NULL,
            region_id BIGINT NOT NULL,
            landuse TEXT,
            way_id BIGINT,
            closest_distance_restriction DOUBLE,
            restricting_node_id BIGINT,
            is_buildable BOOLEAN
        );

        CREATE TABLE IF NOT EXISTS region_results (
            region_id BIGINT NOT NULL,
            distance_m BIGINT NOT NULL,
            min_power_mw BIGINT NOT NULL,
            overall_area_km2 DOUBLE NOT NULL,
            overall_power_mw DOUBLE NOT NULL,
            node_count BIGINT NOT NULL,
            PRIMARY KEY (region_id, distance_m, min_power_mw)
        );",
    )?;

    Ok(())
}

/// Runs `f` inside a transaction, committing on success and rolling back
/// on failure.
fn in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, DbError>,
) -> Result<T, DbError> {
    conn.execute_batch("BEGIN TRANSACTION")?;

    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                log::error!("Rollback failed: {rollback}");
            }
            Err(e)
        }
    }
}

fn region_id_from(value: i64) -> Result<u32, DbError> {
    u32::try_from(value).map_err(|_| DbError::Conversion {
        message: format!("region id {value} out of range"),
    })
}

fn landuse_from(value: Option<String>) -> Result<Option<Landuse>, DbError> {
    value
        .map(|text| {
            Landuse::from_str(&text).map_err(|_| DbError::Conversion {
                message: format!("unknown landuse {text:?}"),
            })
        })
        .transpose()
}

/// Upserts regions and replaces their neighbour lists.
///
/// # Errors
///
/// Returns [`DbError`] if any write fails; nothing is written in that case.
pub fn insert_regions(conn: &Connection, regions: &[Region]) -> Result<u64, DbError> {
    in_transaction(conn, |conn| {
        let mut region_stmt =
            conn.prepare("INSERT OR REPLACE INTO regions (id, name) VALUES (?, ?)")?;
        let mut clear_stmt = conn.prepare("DELETE FROM region_neighbours WHERE region_id = ?")?;
        let mut neighbour_stmt = conn.prepare(
            "INSERT INTO region_neighbours (region_id, neighbour_id, ordinal) VALUES (?, ?, ?)",
        )?;

        for region in regions {
            let id = i64::from(region.id);
            region_stmt.execute(duckdb::params![id, region.name])?;
            clear_stmt.execute([id])?;

            for (ordinal, neighbour) in (0_i64..).zip(&region.neighbours) {
                neighbour_stmt.execute(duckdb::params![id, i64::from(*neighbour), ordinal])?;
            }
        }

        Ok(regions.len() as u64)
    })
}

/// Upserts ways.
///
/// # Errors
///
/// Returns [`DbError`] if any write fails; nothing is written in that case.
pub fn insert_ways(conn: &Connection, ways: &[Way]) -> Result<u64, DbError> {
    in_transaction(conn, |conn| {
        let mut stmt = conn
            .prepare("INSERT OR REPLACE INTO ways (id, region_id, landuse) VALUES (?, ?, ?)")?;

        for way in ways {
            stmt.execute(duckdb::params![
                way.id,
                i64::from(way.region_id),
                way.landuse.as_ref().map(AsRef::<str>::as_ref),
            ])?;
        }

        Ok(ways.len() as u64)
    })
}

/// Upserts nodes. A re-imported node loses any verdict it had.
///
/// # Errors
///
/// Returns [`DbError`] if any write fails; nothing is written in that case.
pub fn insert_nodes(conn: &Connection, nodes: &[Node]) -> Result<u64, DbError> {
    in_transaction(conn, |conn| {
        let mut stmt = conn.prepare(
            "INSERT OR REPLACE INTO nodes (id, lon, lat, region_id, landuse, way_id)
             VALUES (?, ?, ?, ?, ?, ?)",
        )?;

        for node in nodes {
            stmt.execute(duckdb::params![
                node.id,
                node.coordinates.lon,
                node.coordinates.lat,
                i64::from(node.region_id),
                node.landuse.as_ref().map(AsRef::<str>::as_ref),
                node.way_id,
            ])?;
        }

        Ok(nodes.len() as u64)
    })
}

/// Clears every node verdict and every region summary.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub fn reset_results(conn: &Connection) -> Result<(), DbError> {
    in_transaction(conn, |conn| {
        let cleared = conn.execute(
            "UPDATE nodes SET closest_distance_restriction = NULL,
                restricting_node_id = NULL,
                is_buildable = NULL
             WHERE is_buildable IS NOT NULL",
            [],
        )?;
        let summaries = conn.execute("DELETE FROM region_results", [])?;
        log::info!("Cleared {cleared} node verdicts and {summaries} region summaries");
        Ok(())
    })
}

/// All region ids, ascending.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn region_ids(conn: &Connection) -> Result<Vec<u32>, DbError> {
    let mut stmt = conn.prepare("SELECT id FROM regions ORDER BY id")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    ids.into_iter().map(region_id_from).collect()
}

/// Returns `true` if the region exists.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn region_exists(conn: &Connection, region_id: u32) -> Result<bool, DbError> {
    let count: i64 = conn
        .prepare("SELECT COUNT(*) FROM regions WHERE id = ?")?
        .query_row([i64::from(region_id)], |row| row.get(0))?;
    Ok(count > 0)
}

/// Stored neighbour ids of a region in insertion order, or `None` if the
/// region does not exist.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn region_neighbours(conn: &Connection, region_id: u32) -> Result<Option<Vec<u32>>, DbError> {
    if !region_exists(conn, region_id)? {
        return Ok(None);
    }

    let mut stmt = conn.prepare(
        "SELECT neighbour_id FROM region_neighbours WHERE region_id = ? ORDER BY ordinal",
    )?;
    let ids = stmt
        .query_map([i64::from(region_id)], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    ids.into_iter()
        .map(region_id_from)
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn landuse_placeholders(landuse: &[Landuse]) -> String {
    landuse.iter().map(|_| "?").collect::<Vec<_>>().join(", ")
}

fn node_from_row(row: &Row<'_>) -> Result<Node, DbError> {
    Ok(Node {
        id: row.get(0)?,
        coordinates: Coordinates::new(row.get(1)?, row.get(2)?),
        region_id: region_id_from(row.get(3)?)?,
        landuse: landuse_from(row.get(4)?)?,
        way_id: row.get(5)?,
    })
}

/// Nodes of a region whose landuse is in `landuse`, ordered by id.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be converted.
pub fn nodes_by_region_and_landuse(
    conn: &Connection,
    region_id: u32,
    landuse: &[Landuse],
) -> Result<Vec<Node>, DbError> {
    if landuse.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT id, lon, lat, region_id, landuse, way_id
         FROM nodes
         WHERE region_id = ? AND landuse IN ({})
         ORDER BY id",
        landuse_placeholders(landuse)
    );
    let mut stmt = conn.prepare(&sql)?;

    stmt.raw_bind_parameter(1, i64::from(region_id))?;
    for (i, value) in landuse.iter().enumerate() {
        stmt.raw_bind_parameter(i + 2, AsRef::<str>::as_ref(value))?;
    }

    stmt.raw_execute()?;
    let mut rows = stmt.raw_query();
    let mut nodes = Vec::new();
    while let Some(row) = rows.next()? {
        nodes.push(node_from_row(row)?);
    }

    Ok(nodes)
}

/// Buildable nodes of a region whose landuse is in `landuse`, with their
/// verdicts, ordered by id. Nodes whose way was never imported are left
/// out.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be converted.
pub fn buildable_nodes(
    conn: &Connection,
    region_id: u32,
    landuse: &[Landuse],
) -> Result<Vec<EvaluatedNode>, DbError> {
    if landuse.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT n.id, n.lon, n.lat, n.region_id, n.landuse, n.way_id,
                n.closest_distance_restriction, n.restricting_node_id, n.is_buildable
         FROM nodes n
         JOIN ways w ON w.id = n.way_id
         WHERE n.region_id = ? AND n.is_buildable AND n.landuse IN ({})
         ORDER BY n.id",
        landuse_placeholders(landuse)
    );
    let mut stmt = conn.prepare(&sql)?;

    stmt.raw_bind_parameter(1, i64::from(region_id))?;
    for (i, value) in landuse.iter().enumerate() {
        stmt.raw_bind_parameter(i + 2, AsRef::<str>::as_ref(value))?;
    }

    stmt.raw_execute()?;
    let mut rows = stmt.raw_query();
    let mut nodes = Vec::new();
    while let Some(row) = rows.next()? {
        nodes.push(EvaluatedNode {
            node: node_from_row(row)?,
            verdict: NodeVerdict {
                closest_distance_restriction: row.get(6)?,
                restricting_node_id: row.get(7)?,
                is_buildable: row.get(8)?,
            },
        });
    }

    Ok(nodes)
}

/// Whether the node has a verdict, or `None` if the node does not exist.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn node_has_verdict(conn: &Connection, node_id: i64) -> Result<Option<bool>, DbError> {
    let mut stmt = conn.prepare("SELECT is_buildable IS NOT NULL FROM nodes WHERE id = ?")?;
    match stmt.query_row([node_id], |row| row.get(0)) {
        Ok(has_verdict) => Ok(Some(has_verdict)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DbError::DuckDb(e)),
    }
}

/// Writes the verdict columns of a node. Returns `false` if no such node
/// exists.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub fn update_node_verdict(
    conn: &Connection,
    node_id: i64,
    verdict: &NodeVerdict,
) -> Result<bool, DbError> {
    let updated = conn.execute(
        "UPDATE nodes
         SET closest_distance_restriction = ?, restricting_node_id = ?, is_buildable = ?
         WHERE id = ?",
        duckdb::params![
            verdict.closest_distance_restriction,
            verdict.restricting_node_id,
            verdict.is_buildable,
            node_id,
        ],
    )?;
    Ok(updated > 0)
}

/// Upserts the summary for `(region_id, key)`.
///
/// # Errors
///
/// Returns [`DbError`] if the upsert fails.
pub fn upsert_region_summary(
    conn: &Connection,
    region_id: u32,
    key: ThresholdKey,
    summary: &RegionSummary,
) -> Result<(), DbError> {
    let node_count = i64::try_from(summary.node_count).map_err(|_| DbError::Conversion {
        message: format!("node count {} out of range", summary.node_count),
    })?;

    conn.execute(
        "INSERT INTO region_results
            (region_id, distance_m, min_power_mw, overall_area_km2, overall_power_mw, node_count)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (region_id, distance_m, min_power_mw) DO UPDATE SET
            overall_area_km2 = EXCLUDED.overall_area_km2,
            overall_power_mw = EXCLUDED.overall_power_mw,
            node_count = EXCLUDED.node_count",
        duckdb::params![
            i64::from(region_id),
            i64::from(key.distance_m),
            i64::from(key.min_power_mw),
            summary.overall_area_km2,
            summary.overall_power_mw,
            node_count,
        ],
    )?;
    Ok(())
}

fn record_from_row(row: &Row<'_>) -> Result<SummaryRecord, DbError> {
    let narrow = |value: i64, what: &str| {
        u32::try_from(value).map_err(|_| DbError::Conversion {
            message: format!("{what} {value} out of range"),
        })
    };
    let node_count: i64 = row.get(5)?;

    Ok(SummaryRecord {
        region_id: region_id_from(row.get(0)?)?,
        distance_m: narrow(row.get(1)?, "distance")?,
        min_power_mw: narrow(row.get(2)?, "min power")?,
        overall_area_km2: row.get(3)?,
        overall_power_mw: row.get(4)?,
        node_count: u64::try_from(node_count).map_err(|_| DbError::Conversion {
            message: format!("node count {node_count} out of range"),
        })?,
    })
}

/// Stored summaries, optionally for one region, ordered by region then
/// key.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be converted.
pub fn summary_records(
    conn: &Connection,
    region_id: Option<u32>,
) -> Result<Vec<SummaryRecord>, DbError> {
    let filter = if region_id.is_some() { "WHERE region_id = ?" } else { "" };
    let sql = format!(
        "SELECT region_id, distance_m, min_power_mw, overall_area_km2, overall_power_mw, node_count
         FROM region_results
         {filter}
         ORDER BY region_id, distance_m, min_power_mw"
    );
    let mut stmt = conn.prepare(&sql)?;

    if let Some(region_id) = region_id {
        stmt.raw_bind_parameter(1, i64::from(region_id))?;
    }
    stmt.raw_execute()?;

    let mut rows = stmt.raw_query();
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(record_from_row(row)?);
    }

    Ok(records)
}
