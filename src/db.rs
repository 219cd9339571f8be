use std::path::Path;

use anyhow::{bail, Context, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Type, Value, ValueRef};
use rusqlite::{Connection, Row, ToSql};

use crate::normalize::{parse_timestamp, TIMESTAMP_FORMAT};
use crate::record::{Agent, Field, GeoPoint, ListingRecord};

pub const NORMALIZED_TABLE: &str = "listings";
const PARTITION_PREFIX: &str = "raw_";

/// Listing columns shared by partition tables and the normalized table.
/// Columns without a declared type hold `Field` values: NULL when unknown,
/// TEXT while raw, REAL/INTEGER once coerced.
const LISTING_COLUMNS: &[(&str, &str)] = &[
    ("title", "TEXT"),
    ("listing_id", "TEXT"),
    ("url", "TEXT NOT NULL"),
    ("is_vip", "BOOLEAN NOT NULL DEFAULT 0"),
    ("price", ""),
    ("area", ""),
    ("location", "TEXT"),
    ("property_type", "TEXT"),
    ("width", ""),
    ("length", ""),
    ("bedrooms", ""),
    ("bathrooms", ""),
    ("floors", ""),
    ("position", "TEXT"),
    ("direction", "TEXT"),
    ("alley_width", ""),
    ("road_type", "TEXT"),
    ("description", "TEXT"),
    ("images", "TEXT NOT NULL DEFAULT '[]'"),
    ("latitude", "REAL"),
    ("longitude", "REAL"),
    ("agent_avatar", "TEXT"),
    ("agent_role", "TEXT"),
    ("agent_name", "TEXT"),
    ("agent_listing_count", "INTEGER"),
    ("region", "TEXT NOT NULL"),
    ("category", "TEXT NOT NULL"),
    ("scraped_at", "TEXT"),
    ("last_updated", "TEXT"),
    ("last_updated_at", "TEXT"),
];

impl<T: ToSql> ToSql for Field<T> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Field::Unknown => Ok(ToSqlOutput::Owned(Value::Null)),
            Field::Raw(text) => text.to_sql(),
            Field::Value(v) => v.to_sql(),
        }
    }
}

impl<T: FromSql> FromSql for Field<T> {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(Field::Unknown),
            ValueRef::Text(_) => String::column_result(value).map(Field::Raw),
            ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
            _ => T::column_result(value).map(Field::Value),
        }
    }
}

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    create_listing_table(conn, NORMALIZED_TABLE)?;
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS qc_report (
            id          INTEGER PRIMARY KEY,
            table_name  TEXT NOT NULL,
            rows        INTEGER NOT NULL,
            missing     INTEGER NOT NULL,
            is_empty    BOOLEAN NOT NULL,
            checked_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

fn create_listing_table(conn: &Connection, table: &str) -> Result<()> {
    let columns = LISTING_COLUMNS
        .iter()
        .map(|(name, ty)| format!("{} {}", name, ty).trim_end().to_string())
        .collect::<Vec<_>>()
        .join(",\n            ");
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (\n            id INTEGER PRIMARY KEY,\n            {}\n        );",
        table, columns
    ))
    .with_context(|| format!("Failed to create table {}", table))?;
    Ok(())
}

/// Partition table for a region slug: `ha-noi` → `raw_ha_noi`.
pub fn table_for_region(region: &str) -> Result<String> {
    let name = region.replace('-', "_");
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        bail!("Region slug {:?} cannot name a table", region);
    }
    Ok(format!("{}{}", PARTITION_PREFIX, name))
}

// ── Crawl output ──

/// Append one partition's records to its region table in a single
/// transaction. Reruns append; nothing is deduplicated.
pub fn append_partition(conn: &Connection, region: &str, records: &[ListingRecord]) -> Result<usize> {
    let table = table_for_region(region)?;
    create_listing_table(conn, &table)?;
    let tx = conn.unchecked_transaction()?;
    let count = insert_records(&tx, &table, records)?;
    tx.commit()?;
    Ok(count)
}

pub fn partition_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name LIKE 'raw\\_%' ESCAPE '\\'
         ORDER BY name",
    )?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(rows)
}

pub fn fetch_table(conn: &Connection, table: &str) -> Result<Vec<ListingRecord>> {
    let columns = LISTING_COLUMNS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!("SELECT {} FROM {} ORDER BY id", columns, table))?;
    let rows = stmt
        .query_map([], row_to_record)?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read {}", table))?;
    Ok(rows)
}

// ── Union + QC ──

pub struct QcRow {
    pub table: String,
    pub rows: usize,
    /// Unknown attributes summed over all rows.
    pub missing: usize,
}

impl QcRow {
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Every partition table's rows, concatenated in table-name order, plus a
/// quality-control line per table.
pub fn union_partitions(conn: &Connection) -> Result<(Vec<ListingRecord>, Vec<QcRow>)> {
    let mut all = Vec::new();
    let mut report = Vec::new();
    for table in partition_tables(conn)? {
        let rows = fetch_table(conn, &table)?;
        report.push(QcRow {
            missing: rows.iter().map(ListingRecord::unknown_count).sum(),
            rows: rows.len(),
            table,
        });
        all.extend(rows);
    }
    Ok((all, report))
}

pub fn save_qc_report(conn: &Connection, rows: &[QcRow]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO qc_report (table_name, rows, missing, is_empty) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for r in rows {
            stmt.execute(rusqlite::params![r.table, r.rows, r.missing, r.is_empty()])?;
        }
    }
    tx.commit()?;
    Ok(())
}

// ── Normalized dataset ──

pub fn replace_normalized(conn: &Connection, records: &[ListingRecord]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(&format!("DELETE FROM {}", NORMALIZED_TABLE), [])?;
    let count = insert_records(&tx, NORMALIZED_TABLE, records)?;
    tx.commit()?;
    Ok(count)
}

pub fn fetch_normalized(conn: &Connection) -> Result<Vec<ListingRecord>> {
    fetch_table(conn, NORMALIZED_TABLE)
}

// ── Status ──

pub fn table_counts(conn: &Connection) -> Result<Vec<(String, usize)>> {
    let mut tables = partition_tables(conn)?;
    tables.push(NORMALIZED_TABLE.to_string());
    tables
        .into_iter()
        .map(|t| -> Result<(String, usize)> {
            let n: usize = conn.query_row(&format!("SELECT COUNT(*) FROM {}", t), [], |r| r.get(0))?;
            Ok((t, n))
        })
        .collect()
}

fn insert_records(conn: &Connection, table: &str, records: &[ListingRecord]) -> Result<usize> {
    let names = LISTING_COLUMNS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=LISTING_COLUMNS.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table, names, placeholders
    ))?;

    let mut count = 0;
    for r in records {
        let images = serde_json::to_string(&r.images)?;
        let scraped_at = r.scraped_at.map(|t| t.format(TIMESTAMP_FORMAT).to_string());
        let updated_at = r
            .last_updated_at
            .map(|t| t.format(TIMESTAMP_FORMAT).to_string());
        count += stmt.execute(rusqlite::params![
            r.title, r.listing_id, r.url, r.is_vip,
            r.price, r.area, r.location,
            r.property_type, r.width, r.length, r.bedrooms, r.bathrooms, r.floors,
            r.position, r.direction, r.alley_width, r.road_type,
            r.description, images,
            r.coordinates.map(|c| c.lat), r.coordinates.map(|c| c.lon),
            r.agent.avatar, r.agent.role, r.agent.name, r.agent.listing_count,
            r.region, r.category, scraped_at, r.last_updated, updated_at,
        ])?;
    }
    Ok(count)
}

fn row_to_record(row: &Row) -> rusqlite::Result<ListingRecord> {
    let images: String = row.get(18)?;
    let images = serde_json::from_str(&images)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(18, Type::Text, Box::new(e)))?;
    let lat: Option<f64> = row.get(19)?;
    let lon: Option<f64> = row.get(20)?;
    let scraped_at: Option<String> = row.get(27)?;
    let updated_at: Option<String> = row.get(29)?;

    Ok(ListingRecord {
        title: row.get(0)?,
        listing_id: row.get(1)?,
        url: row.get(2)?,
        is_vip: row.get(3)?,
        price: row.get(4)?,
        area: row.get(5)?,
        location: row.get(6)?,
        property_type: row.get(7)?,
        width: row.get(8)?,
        length: row.get(9)?,
        bedrooms: row.get(10)?,
        bathrooms: row.get(11)?,
        floors: row.get(12)?,
        position: row.get(13)?,
        direction: row.get(14)?,
        alley_width: row.get(15)?,
        road_type: row.get(16)?,
        description: row.get(17)?,
        images,
        coordinates: lat.zip(lon).map(|(lat, lon)| GeoPoint { lat, lon }),
        agent: Agent {
            avatar: row.get(21)?,
            role: row.get(22)?,
            name: row.get(23)?,
            listing_count: row.get(24)?,
        },
        region: row.get(25)?,
        category: row.get(26)?,
        scraped_at: scraped_at.as_deref().and_then(parse_timestamp),
        last_updated: row.get(28)?,
        last_updated_at: updated_at.as_deref().and_then(parse_timestamp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn open() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = connect(&dir.path().join("nested").join("test.sqlite")).unwrap();
        init_schema(&conn).unwrap();
        (dir, conn)
    }

    fn sample(region: &str, url: &str) -> ListingRecord {
        ListingRecord {
            title: Some("Bán đất".into()),
            url: url.into(),
            is_vip: true,
            price: Field::Raw("2.5 tỷ".into()),
            area: Field::Value(72.0),
            bedrooms: Field::Value(3),
            images: vec!["https://img.guland.vn/a.jpg".into()],
            coordinates: Some(GeoPoint {
                lat: 10.78,
                lon: 106.68,
            }),
            agent: Agent {
                name: Some("Chủ nhà".into()),
                listing_count: Some(12),
                ..Agent::default()
            },
            region: region.into(),
            category: "dat-tho-cu".into(),
            scraped_at: NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(8, 30, 0),
            ..ListingRecord::default()
        }
    }

    #[test]
    fn region_table_names() {
        assert_eq!(table_for_region("ha-noi").unwrap(), "raw_ha_noi");
        assert_eq!(
            table_for_region("ba-ria-vung-tau").unwrap(),
            "raw_ba_ria_vung_tau"
        );
        assert!(table_for_region("ha noi").is_err());
        assert!(table_for_region("x; DROP TABLE listings").is_err());
        assert!(table_for_region("").is_err());
    }

    #[test]
    fn partition_rows_survive_storage() {
        let (_dir, conn) = open();
        let rec = sample("ha-noi", "https://guland.vn/a");
        assert_eq!(append_partition(&conn, "ha-noi", &[rec.clone()]).unwrap(), 1);

        let back = fetch_table(&conn, "raw_ha_noi").unwrap();
        assert_eq!(back, vec![rec]);
        assert!(back[0].width.is_unknown());
    }

    #[test]
    fn reruns_append() {
        let (_dir, conn) = open();
        let rec = sample("ca-mau", "https://guland.vn/b");
        append_partition(&conn, "ca-mau", &[rec.clone()]).unwrap();
        append_partition(&conn, "ca-mau", &[rec]).unwrap();
        assert_eq!(fetch_table(&conn, "raw_ca_mau").unwrap().len(), 2);
    }

    #[test]
    fn union_with_qc() {
        let (_dir, conn) = open();
        append_partition(&conn, "ha-noi", &[sample("ha-noi", "https://guland.vn/1")]).unwrap();
        append_partition(
            &conn,
            "ca-mau",
            &[
                sample("ca-mau", "https://guland.vn/2"),
                sample("ca-mau", "https://guland.vn/3"),
            ],
        )
        .unwrap();
        append_partition(&conn, "an-giang", &[]).unwrap();

        let (rows, qc) = union_partitions(&conn).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].url, "https://guland.vn/2");

        let tables: Vec<&str> = qc.iter().map(|q| q.table.as_str()).collect();
        assert_eq!(tables, vec!["raw_an_giang", "raw_ca_mau", "raw_ha_noi"]);
        assert!(qc[0].is_empty());
        assert_eq!(qc[1].rows, 2);
        assert_eq!(qc[1].missing, 2 * sample("x", "y").unknown_count());

        save_qc_report(&conn, &qc).unwrap();
        let n: usize = conn
            .query_row("SELECT COUNT(*) FROM qc_report", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 3);
    }

    #[test]
    fn normalized_table_is_replaced() {
        let (_dir, conn) = open();
        let a = sample("ha-noi", "https://guland.vn/a");
        let b = sample("ha-noi", "https://guland.vn/b");
        replace_normalized(&conn, &[a.clone(), b]).unwrap();
        replace_normalized(&conn, &[a.clone()]).unwrap();
        assert_eq!(fetch_normalized(&conn).unwrap(), vec![a]);

        let counts = table_counts(&conn).unwrap();
        assert_eq!(counts, vec![("listings".to_string(), 1)]);
    }
}
