//! Non-volatile backups of observation buffers.
//!
//! One file per observation, named by the observation's absolute path with
//! `/` escaped as `~`. Layout: a little-endian `u16` version header, a
//! `u32` sample count, the samples, and a trailing CRC-32 of everything
//! before it. A file with an unknown version or a bad CRC is discarded
//! rather than restored.

use std::collections::HashSet;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sample::{Sample, Value};

use crate::error::{Error, Result};

const VERSION: u16 = 1;

const TAG_TRIGGER: u8 = 0;
const TAG_BOOLEAN: u8 = 1;
const TAG_NUMERIC: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_JSON: u8 = 4;

/// Backup files for observation buffers under one directory.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> BackupStore {
        BackupStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, obs_path: &str) -> PathBuf {
        self.dir.join(escape(obs_path))
    }

    /// Persist a buffer. The write goes through a temporary file in the
    /// same directory so a crash cannot leave a torn backup behind.
    pub fn save(&self, obs_path: &str, samples: &[Rc<Sample>]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let bytes = encode(samples)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(self.file_for(obs_path))
            .map_err(|err| Error::IoError(err.to_string()))?;
        Ok(())
    }

    /// Read a buffer back. `NotFound` when no backup exists; a corrupt
    /// file is deleted and reported as `FormatError`.
    pub fn load(&self, obs_path: &str) -> Result<Vec<Sample>> {
        let file = self.file_for(obs_path);
        let bytes = std::fs::read(&file)?;
        match decode(&bytes) {
            Ok(samples) => Ok(samples),
            Err(err) => {
                tracing::warn!(
                    observation = obs_path,
                    error = %err,
                    "discarding corrupt buffer backup"
                );
                let _ = std::fs::remove_file(&file);
                Err(err)
            }
        }
    }

    pub fn delete(&self, obs_path: &str) {
        let _ = std::fs::remove_file(self.file_for(obs_path));
    }

    /// Delete every backup whose observation path is not in `keep`.
    pub fn retain(&self, keep: &HashSet<String>) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !keep.contains(&unescape(name)) {
                tracing::debug!(file = name, "removing stale buffer backup");
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }
}

fn escape(obs_path: &str) -> String {
    obs_path.replace('/', "~")
}

fn unescape(file_name: &str) -> String {
    file_name.replace('~', "/")
}

fn encode(samples: &[Rc<Sample>]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.write_u16::<LittleEndian>(VERSION)?;
    out.write_u32::<LittleEndian>(samples.len() as u32)?;
    for sample in samples {
        out.write_f64::<LittleEndian>(sample.timestamp())?;
        match sample.value() {
            Value::Trigger => out.write_u8(TAG_TRIGGER)?,
            Value::Boolean(b) => {
                out.write_u8(TAG_BOOLEAN)?;
                out.write_u8(*b as u8)?;
            }
            Value::Numeric(n) => {
                out.write_u8(TAG_NUMERIC)?;
                out.write_f64::<LittleEndian>(*n)?;
            }
            Value::String(s) => {
                out.write_u8(TAG_STRING)?;
                write_bytes(&mut out, s.as_bytes())?;
            }
            Value::Json(v) => {
                out.write_u8(TAG_JSON)?;
                let text = serde_json::to_string(v)
                    .map_err(|err| Error::FormatError(err.to_string()))?;
                write_bytes(&mut out, text.as_bytes())?;
            }
        }
    }
    let crc = crc32fast::hash(&out);
    out.write_u32::<LittleEndian>(crc)?;
    Ok(out)
}

fn decode(bytes: &[u8]) -> Result<Vec<Sample>> {
    if bytes.len() < 10 {
        return Err(Error::FormatError("backup file is truncated".to_string()));
    }
    let (body, trailer) = bytes.split_at(bytes.len() - 4);
    let stored = (&trailer[..]).read_u32::<LittleEndian>()?;
    if crc32fast::hash(body) != stored {
        return Err(Error::FormatError("backup checksum mismatch".to_string()));
    }

    let mut cursor = body;
    let version = cursor.read_u16::<LittleEndian>()?;
    if version != VERSION {
        return Err(Error::FormatError(format!(
            "unknown backup version {}",
            version
        )));
    }
    let count = cursor.read_u32::<LittleEndian>()?;
    let mut samples = Vec::with_capacity(count.min(4096) as usize);
    for _ in 0..count {
        let ts = cursor.read_f64::<LittleEndian>()?;
        let value = match cursor.read_u8()? {
            TAG_TRIGGER => Value::Trigger,
            TAG_BOOLEAN => Value::Boolean(cursor.read_u8()? != 0),
            TAG_NUMERIC => Value::Numeric(cursor.read_f64::<LittleEndian>()?),
            TAG_STRING => Value::String(
                String::from_utf8(read_bytes(&mut cursor)?)
                    .map_err(|err| Error::FormatError(err.to_string()))?,
            ),
            TAG_JSON => {
                let text = read_bytes(&mut cursor)?;
                Value::Json(
                    serde_json::from_slice(&text)
                        .map_err(|err| Error::FormatError(err.to_string()))?,
                )
            }
            tag => return Err(Error::FormatError(format!("unknown value tag {}", tag))),
        };
        samples.push(Sample::new(ts, value));
    }
    Ok(samples)
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    out.write_u32::<LittleEndian>(bytes.len() as u32)?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn read_bytes(cursor: &mut &[u8]) -> Result<Vec<u8>> {
    let len = cursor.read_u32::<LittleEndian>()? as usize;
    if len > cursor.len() {
        return Err(Error::FormatError("backup length field overruns".to_string()));
    }
    let (head, tail) = cursor.split_at(len);
    let out = head.to_vec();
    *cursor = tail;
    Ok(out)
}
