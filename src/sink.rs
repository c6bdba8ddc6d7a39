use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Mutex,
};

use csv::{Reader, ReaderBuilder, StringRecord, Writer, WriterBuilder};
use rand::seq::SliceRandom;

use crate::{
    errors::SinkError,
    types::{DownloadedRecord, Labels, Record, ResolvedEntry},
};

/// Append-only csv file shared by the workers of one stage.
///
/// Every append writes the whole row and flushes under one lock, so a crash leaves the
/// file valid up to its last complete record.
pub struct RecordSink {
    path: PathBuf,
    width: usize,
    writer: Mutex<Writer<File>>,
}

impl RecordSink {
    pub fn create(path: impl AsRef<Path>, header: &[String]) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = WriterBuilder::new()
            .flexible(false)
            .from_path(&path)
            .map_err(|source| SinkError::Open {
                path: path.clone(),
                source,
            })?;
        writer.write_record(header)?;
        writer.flush()?;
        debug!("opened record sink {:?}", path);
        Ok(RecordSink {
            path,
            width: header.len(),
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &impl Record) -> Result<(), SinkError> {
        let fields = record.to_fields();
        if fields.len() != self.width {
            return Err(SinkError::Width {
                found: fields.len(),
                expected: self.width,
            });
        }
        let mut writer = self.writer.lock().map_err(|_| SinkError::Poisoned)?;
        writer.write_record(&fields)?;
        writer.flush()?;
        Ok(())
    }

    pub fn append_all<'a, R: Record + 'a>(
        &self,
        records: impl IntoIterator<Item = &'a R>,
    ) -> Result<usize, SinkError> {
        let mut count = 0;
        for record in records {
            self.append(record)?;
            count += 1;
        }
        Ok(count)
    }
}

fn open(path: &Path) -> Result<Reader<File>, SinkError> {
    ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        })
}

fn split_record(record: &StringRecord) -> Option<(String, Labels)> {
    let mut fields = record.iter();
    let first = fields.next()?.trim();
    if first.is_empty() {
        return None;
    }
    Some((first.to_string(), Labels::from_fields(fields)))
}

/// Lazily reads a csv whose first column is a link or path and whose remaining columns are
/// character labels. Malformed rows are skipped with a warning.
fn read_labelled(
    path: &Path,
) -> Result<impl Iterator<Item = (String, Labels)> + Send + 'static, SinkError> {
    let shown = path.display().to_string();
    let rows = open(path)?
        .into_records()
        .enumerate()
        .filter_map(move |(i, row)| match row {
            Ok(record) => {
                let parsed = split_record(&record);
                if parsed.is_none() {
                    warn!("skipping row {} of {}: empty first column", i + 1, shown);
                }
                parsed
            }
            Err(e) => {
                warn!("skipping row {} of {}: {}", i + 1, shown, e);
                None
            }
        });
    Ok(rows)
}

pub fn read_links(
    path: &Path,
) -> Result<impl Iterator<Item = ResolvedEntry> + Send + 'static, SinkError> {
    Ok(read_labelled(path)?.map(|(external_link, characters)| ResolvedEntry {
        external_link,
        characters,
    }))
}

pub fn read_vods(
    path: &Path,
) -> Result<impl Iterator<Item = DownloadedRecord> + Send + 'static, SinkError> {
    Ok(read_labelled(path)?.map(|(video, characters)| DownloadedRecord {
        video_path: PathBuf::from(video),
        characters,
    }))
}

/// Copies a uniform random sample of `samples` rows of `path` (header included) to `out`.
/// Returns `None` without writing anything when the file has fewer rows than asked for.
pub fn sample_rows(path: &Path, samples: usize, out: &Path) -> Result<Option<PathBuf>, SinkError> {
    let mut reader = open(path)?;
    let header = reader.headers()?.clone();
    let rows = reader.records().collect::<Result<Vec<StringRecord>, csv::Error>>()?;
    if samples > rows.len() {
        warn!(
            "provided sample ({}) was larger than the {} rows of {:?}, not taking a sample",
            samples,
            rows.len(),
            path
        );
        return Ok(None);
    }

    let mut rng = rand::thread_rng();
    let chosen = rows.choose_multiple(&mut rng, samples);

    let mut writer = WriterBuilder::new().flexible(true).from_path(out).map_err(|source| {
        SinkError::Open {
            path: out.to_path_buf(),
            source,
        }
    })?;
    writer.write_record(&header)?;
    for row in chosen {
        writer.write_record(row)?;
    }
    writer.flush()?;
    info!("wrote {} sampled rows to {:?}", samples, out);
    Ok(Some(out.to_path_buf()))
}
