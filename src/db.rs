use anyhow::Result;
use rusqlite::{Connection, params};
use tracing::debug;

use crate::error::ScrapeError;
use crate::normalize::{CastCredit, Film};

// Initialize database, tables and the reporting view
pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS peliculas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            titulo TEXT NOT NULL,
            anio INTEGER,
            calificacion NUMERIC(3,1),
            duracion INTEGER,
            metascore INTEGER,
            UNIQUE (titulo, anio)
        );

        CREATE TABLE IF NOT EXISTS actores (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pelicula_id INTEGER NOT NULL
                REFERENCES peliculas(id) ON DELETE CASCADE,
            nombre TEXT NOT NULL,
            posicion_orden INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_peliculas_anio
            ON peliculas (anio);

        CREATE INDEX IF NOT EXISTS idx_peliculas_calificacion
            ON peliculas (calificacion);

        CREATE INDEX IF NOT EXISTS idx_actores_pelicula
            ON actores (pelicula_id);

        -- film + cast join surface for read-only consumers
        CREATE VIEW IF NOT EXISTS pelicula_reparto AS
            SELECT p.id AS pelicula_id,
                   p.titulo,
                   p.anio,
                   p.calificacion,
                   p.metascore,
                   a.nombre,
                   a.posicion_orden
            FROM peliculas p
            JOIN actores a ON a.pelicula_id = p.id;
        ",
    )?;

    Ok(())
}

// Insert or refresh a film keyed on (titulo, anio); the surrogate id is
// stable across reruns.
pub fn upsert_film(conn: &Connection, film: &Film) -> Result<i64> {
    let id = conn.query_row(
        "
        INSERT INTO peliculas (titulo, anio, calificacion, duracion, metascore)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (titulo, anio) DO UPDATE SET
            calificacion = excluded.calificacion,
            duracion = excluded.duracion,
            metascore = excluded.metascore
        RETURNING id
        ",
        params![
            film.title,
            film.year,
            film.rating,
            film.runtime_min,
            film.metascore
        ],
        |row| row.get::<_, i64>(0),
    )?;

    Ok(id)
}

// Cast rows are keyed on (pelicula_id, posicion_orden): a rerun refreshes the
// name in the billing slot instead of piling up duplicates. The table carries
// no UNIQUE on that pair (the schema is fixed), so update-then-insert is only
// race-free because the pipeline is the single writer, inside the per-film
// transaction.
pub fn upsert_actor(conn: &Connection, film_id: i64, credit: &CastCredit) -> Result<()> {
    let updated = conn.execute(
        "
        UPDATE actores
        SET nombre = ?3
        WHERE pelicula_id = ?1 AND posicion_orden = ?2
        ",
        params![film_id, credit.position, credit.name],
    )?;

    if updated == 0 {
        conn.execute(
            "
            INSERT INTO actores (pelicula_id, nombre, posicion_orden)
            VALUES (?1, ?2, ?3)
            ",
            params![film_id, credit.name, credit.position],
        )?;
    }

    Ok(())
}

/// Store of record for the pipeline. All writes for one film share a
/// transaction, so a failure rolls back that film only.
pub struct DbSink {
    conn: Connection,
}

impl DbSink {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        init(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn write(&mut self, film: &Film, cast: &[CastCredit]) -> Result<(), ScrapeError> {
        self.write_inner(film, cast).map_err(|cause| ScrapeError::Sink {
            sink: "database",
            cause,
        })
    }

    fn write_inner(&mut self, film: &Film, cast: &[CastCredit]) -> Result<()> {
        let tx = self.conn.transaction()?;
        let film_id = upsert_film(&tx, film)?;
        for credit in cast {
            upsert_actor(&tx, film_id, credit)?;
        }
        tx.commit()?;
        debug!(film = %film.identity(), id = film_id, "stored");
        Ok(())
    }
}

// --- Analytical queries (read-only) ---

#[derive(Debug)]
pub struct DecadeRuntimeRow {
    pub decade: i32,
    pub title: String,
    pub year: i32,
    pub runtime_min: i32,
    pub decade_avg: f64,
    pub rank: i32,
}

// Longest films ranked inside their own decade partition, rank capped at 5.
pub fn top_runtime_per_decade(conn: &Connection) -> Result<Vec<DecadeRuntimeRow>> {
    let mut stmt = conn.prepare(
        "
        SELECT decada, titulo, anio, duracion, promedio_decada, puesto
        FROM (
            SELECT (anio / 10) * 10 AS decada,
                   titulo,
                   anio,
                   duracion,
                   AVG(duracion) OVER (PARTITION BY (anio / 10) * 10) AS promedio_decada,
                   RANK() OVER (
                       PARTITION BY (anio / 10) * 10
                       ORDER BY duracion DESC
                   ) AS puesto
            FROM peliculas
            WHERE anio IS NOT NULL AND duracion IS NOT NULL
        )
        WHERE puesto <= 5
        ORDER BY decada, puesto
        ",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok(DecadeRuntimeRow {
            decade: row.get(0)?,
            title: row.get(1)?,
            year: row.get(2)?,
            runtime_min: row.get(3)?,
            decade_avg: row.get(4)?,
            rank: row.get(5)?,
        })
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }

    Ok(results)
}

#[derive(Debug)]
pub struct YearRatingSpread {
    pub year: i32,
    pub films: i64,
    pub stddev: f64,
}

// Population stddev of the rating per year; years with a single rated film
// carry no spread and are excluded. SQLite has no stddev aggregate, so the
// variance comes from SQL and the square root is taken here.
pub fn rating_stddev_by_year(conn: &Connection) -> Result<Vec<YearRatingSpread>> {
    let mut stmt = conn.prepare(
        "
        SELECT anio,
               COUNT(*) AS n,
               AVG(calificacion * calificacion)
                   - AVG(calificacion) * AVG(calificacion) AS varianza
        FROM peliculas
        WHERE anio IS NOT NULL AND calificacion IS NOT NULL
        GROUP BY anio
        HAVING COUNT(*) >= 2
        ORDER BY anio
        ",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i32>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, f64>(2)?,
        ))
    })?;

    let mut results = Vec::new();
    for row in rows {
        let (year, films, variance) = row?;
        results.push(YearRatingSpread {
            year,
            films,
            // floating point can leave the variance a hair below zero
            stddev: variance.max(0.0).sqrt(),
        });
    }

    Ok(results)
}

#[derive(Debug)]
pub struct DivergenceRow {
    pub title: String,
    pub year: i32,
    pub rating: f64,
    pub metascore: i32,
    pub relative: f64,
}

// Films whose IMDb rating (scaled to 0-100) sits more than 20% away from
// the metascore, relative to the metascore.
pub fn rating_metascore_divergence(conn: &Connection) -> Result<Vec<DivergenceRow>> {
    let mut stmt = conn.prepare(
        "
        SELECT titulo, anio, calificacion, metascore,
               ABS(calificacion * 10.0 - metascore) / metascore AS desviacion
        FROM peliculas
        WHERE metascore IS NOT NULL
          AND metascore > 0
          AND calificacion IS NOT NULL
          AND ABS(calificacion * 10.0 - metascore) / metascore > 0.20
        ORDER BY desviacion DESC
        ",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok(DivergenceRow {
            title: row.get(0)?,
            year: row.get(1)?,
            rating: row.get(2)?,
            metascore: row.get(3)?,
            relative: row.get(4)?,
        })
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }

    Ok(results)
}

#[derive(Debug)]
pub struct CastRow {
    pub title: String,
    pub year: i32,
    pub name: String,
    pub position: i32,
}

// Filter over the pelicula_reparto view by actor name, optionally pinned to
// one billing position.
pub fn films_by_actor(
    conn: &Connection,
    name: &str,
    position: Option<i32>,
) -> Result<Vec<CastRow>> {
    let mut stmt = conn.prepare(
        "
        SELECT titulo, anio, nombre, posicion_orden
        FROM pelicula_reparto
        WHERE nombre = ?1
          AND (?2 IS NULL OR posicion_orden = ?2)
        ORDER BY anio, titulo
        ",
    )?;

    let rows = stmt.query_map(params![name, position], |row| {
        Ok(CastRow {
            title: row.get(0)?,
            year: row.get(1)?,
            name: row.get(2)?,
            position: row.get(3)?,
        })
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        conn
    }

    fn film(title: &str, year: i32, rating: f64, runtime: i32, metascore: Option<i32>) -> Film {
        Film {
            title: title.into(),
            year,
            rating,
            runtime_min: runtime,
            metascore,
        }
    }

    fn credit(name: &str, position: i32) -> CastCredit {
        CastCredit {
            name: name.into(),
            position,
        }
    }

    #[test]
    fn upsert_film_is_idempotent_on_identity() {
        let conn = open();

        let first = upsert_film(&conn, &film("Se7en", 1995, 8.5, 127, Some(65))).unwrap();
        let second = upsert_film(&conn, &film("Se7en", 1995, 8.6, 127, Some(65))).unwrap();
        assert_eq!(first, second);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM peliculas", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        // last write wins on mutable fields
        let rating: f64 = conn
            .query_row("SELECT calificacion FROM peliculas WHERE id = ?1", [first], |r| r.get(0))
            .unwrap();
        assert!((rating - 8.6).abs() < 1e-9);
    }

    #[test]
    fn same_title_different_year_is_a_distinct_film() {
        let conn = open();
        let a = upsert_film(&conn, &film("King Kong", 1933, 7.9, 100, None)).unwrap();
        let b = upsert_film(&conn, &film("King Kong", 2005, 7.2, 187, Some(81))).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn null_metascore_is_stored_as_null() {
        let conn = open();
        let id = upsert_film(&conn, &film("12 Angry Men", 1957, 9.0, 96, None)).unwrap();
        let metascore: Option<i32> = conn
            .query_row("SELECT metascore FROM peliculas WHERE id = ?1", [id], |r| r.get(0))
            .unwrap();
        assert_eq!(metascore, None);
    }

    #[test]
    fn actor_rerun_does_not_duplicate_rows() {
        let conn = open();
        let id = upsert_film(&conn, &film("Heat", 1995, 8.3, 170, Some(76))).unwrap();

        for _ in 0..2 {
            upsert_actor(&conn, id, &credit("Al Pacino", 1)).unwrap();
            upsert_actor(&conn, id, &credit("Robert De Niro", 2)).unwrap();
        }

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM actores WHERE pelicula_id = ?1", [id], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn actor_slot_refreshes_name_in_place() {
        let conn = open();
        let id = upsert_film(&conn, &film("Heat", 1995, 8.3, 170, Some(76))).unwrap();

        upsert_actor(&conn, id, &credit("Al Pacino", 1)).unwrap();
        upsert_actor(&conn, id, &credit("Robert De Niro", 1)).unwrap();

        let name: String = conn
            .query_row(
                "SELECT nombre FROM actores WHERE pelicula_id = ?1 AND posicion_orden = 1",
                [id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(name, "Robert De Niro");
    }

    #[test]
    fn deleting_a_film_cascades_to_its_cast() {
        let conn = open();
        let id = upsert_film(&conn, &film("Heat", 1995, 8.3, 170, Some(76))).unwrap();
        upsert_actor(&conn, id, &credit("Al Pacino", 1)).unwrap();

        conn.execute("DELETE FROM peliculas WHERE id = ?1", [id]).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM actores", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn decade_ranking_never_crosses_decades() {
        let conn = open();
        upsert_film(&conn, &film("The Shawshank Redemption", 1994, 9.3, 142, Some(82))).unwrap();
        upsert_film(&conn, &film("Se7en", 1995, 8.6, 136, Some(65))).unwrap();
        upsert_film(&conn, &film("The Godfather", 1972, 9.2, 175, Some(100))).unwrap();

        let rows = top_runtime_per_decade(&conn).unwrap();
        assert_eq!(rows.len(), 3);

        // 1970s partition: the longest film overall, rank 1 in its own decade
        assert_eq!(rows[0].decade, 1970);
        assert_eq!(rows[0].title, "The Godfather");
        assert_eq!(rows[0].rank, 1);

        // 1990s partition ranks only against itself
        assert_eq!(rows[1].decade, 1990);
        assert_eq!(rows[1].title, "The Shawshank Redemption");
        assert_eq!(rows[1].rank, 1);
        assert_eq!(rows[2].title, "Se7en");
        assert_eq!(rows[2].rank, 2);
        assert!((rows[1].decade_avg - 139.0).abs() < 1e-9);
    }

    #[test]
    fn decade_ranking_caps_at_five_per_decade() {
        let conn = open();
        for i in 0..7 {
            upsert_film(&conn, &film(&format!("Film {i}"), 1990 + i, 8.0, 100 + i, None)).unwrap();
        }
        let rows = top_runtime_per_decade(&conn).unwrap();
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r.rank <= 5));
        // longest first within the decade
        assert_eq!(rows[0].runtime_min, 106);
    }

    #[test]
    fn stddev_needs_at_least_two_films_per_year() {
        let conn = open();
        upsert_film(&conn, &film("A", 1994, 8.0, 100, None)).unwrap();
        upsert_film(&conn, &film("B", 1994, 9.0, 100, None)).unwrap();
        upsert_film(&conn, &film("C", 1972, 9.2, 100, None)).unwrap();

        let rows = rating_stddev_by_year(&conn).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].year, 1994);
        assert_eq!(rows[0].films, 2);
        // population stddev of {8.0, 9.0}
        assert!((rows[0].stddev - 0.5).abs() < 1e-9);
    }

    #[test]
    fn divergence_filters_on_twenty_percent_relative() {
        let conn = open();
        // |93 - 82| / 82 = 13% -> out
        upsert_film(&conn, &film("Aligned", 1994, 9.3, 142, Some(82))).unwrap();
        // |80 - 55| / 55 = 45% -> in
        upsert_film(&conn, &film("Divisive", 2000, 8.0, 110, Some(55))).unwrap();
        // no metascore -> out
        upsert_film(&conn, &film("Unscored", 1957, 9.0, 96, None)).unwrap();

        let rows = rating_metascore_divergence(&conn).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Divisive");
        assert!(rows[0].relative > 0.20);
    }

    #[test]
    fn view_filters_by_actor_and_position() {
        let conn = open();
        let heat = upsert_film(&conn, &film("Heat", 1995, 8.3, 170, Some(76))).unwrap();
        let padrino = upsert_film(&conn, &film("The Godfather", 1972, 9.2, 175, Some(100))).unwrap();
        upsert_actor(&conn, heat, &credit("Al Pacino", 1)).unwrap();
        upsert_actor(&conn, heat, &credit("Robert De Niro", 2)).unwrap();
        upsert_actor(&conn, padrino, &credit("Marlon Brando", 1)).unwrap();
        upsert_actor(&conn, padrino, &credit("Al Pacino", 2)).unwrap();

        let any = films_by_actor(&conn, "Al Pacino", None).unwrap();
        assert_eq!(any.len(), 2);

        let top_billed = films_by_actor(&conn, "Al Pacino", Some(1)).unwrap();
        assert_eq!(top_billed.len(), 1);
        assert_eq!(top_billed[0].title, "Heat");
    }

    #[test]
    fn db_sink_writes_film_and_cast_transactionally() {
        let mut sink = DbSink {
            conn: {
                let conn = Connection::open_in_memory().unwrap();
                init(&conn).unwrap();
                conn
            },
        };

        let f = film("Heat", 1995, 8.3, 170, Some(76));
        let cast = vec![credit("Al Pacino", 1), credit("Robert De Niro", 2)];
        sink.write(&f, &cast).unwrap();
        sink.write(&f, &cast).unwrap();

        let films: i64 = sink
            .conn()
            .query_row("SELECT COUNT(*) FROM peliculas", [], |r| r.get(0))
            .unwrap();
        let actors: i64 = sink
            .conn()
            .query_row("SELECT COUNT(*) FROM actores", [], |r| r.get(0))
            .unwrap();
        assert_eq!(films, 1);
        assert_eq!(actors, 2);
    }
}
