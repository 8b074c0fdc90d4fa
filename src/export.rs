use std::fs::{self, File, OpenOptions};
use std::path::Path;

use anyhow::{Context, Result};
use csv::Writer;
use tracing::debug;

use crate::error::ScrapeError;
use crate::normalize::{CastCredit, Film};

const MOVIES_FILE: &str = "peliculas.csv";
const ACTORS_FILE: &str = "actores.csv";

/// Append-only CSV audit trail, one file per entity. Reruns append duplicate
/// rows on purpose; the database sink is the de-duplicated store of record.
pub struct CsvSink {
    movies: Writer<File>,
    actors: Writer<File>,
}

impl CsvSink {
    pub fn open(dir: &str) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("creating CSV dir {dir}"))?;

        let movies = open_appending(
            &Path::new(dir).join(MOVIES_FILE),
            &["titulo", "anio", "calificacion", "duracion", "metascore"],
        )?;
        let actors = open_appending(
            &Path::new(dir).join(ACTORS_FILE),
            &["pelicula", "nombre", "posicion_orden"],
        )?;

        Ok(Self { movies, actors })
    }

    pub fn write(&mut self, film: &Film, cast: &[CastCredit]) -> Result<(), ScrapeError> {
        self.write_inner(film, cast).map_err(|cause| ScrapeError::Sink {
            sink: "csv",
            cause,
        })
    }

    fn write_inner(&mut self, film: &Film, cast: &[CastCredit]) -> Result<()> {
        self.movies.write_record([
            film.title.as_str(),
            &film.year.to_string(),
            &format!("{:.1}", film.rating),
            &film.runtime_min.to_string(),
            &film.metascore.map(|m| m.to_string()).unwrap_or_default(),
        ])?;

        let key = film.identity();
        for credit in cast {
            self.actors
                .write_record([key.as_str(), &credit.name, &credit.position.to_string()])?;
        }

        // flush per film so an aborted run still leaves a usable trail
        self.movies.flush()?;
        self.actors.flush()?;

        debug!(film = %key, cast = cast.len(), "exported to CSV");
        Ok(())
    }
}

fn open_appending(path: &Path, header: &[&str]) -> Result<Writer<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let is_new = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    if is_new {
        writer.write_record(header)?;
    }
    Ok(writer)
}
