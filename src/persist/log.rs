//! Append-only record log
//! ----------------------
//! Each record is a 12-byte header (magic, kind, version, length), a bincode
//! payload and a trailing CRC32 of the payload. Appends flush and sync so a
//! batch is durable once `append` returns. A short read at the tail (a torn
//! append) ends the log and is cut off when the log is next opened for
//! append; a bad magic or checksum is reported as corruption.

use anyhow::{anyhow, Context, Result};
use crc32fast::Hasher as Crc32;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::warn;

const MAGIC_LOG: u32 = 0x4156_4442; // 'AVDB'
const VERSION: u8 = 1;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind { FileTable = 1, Registry = 2 }

#[derive(Debug, Clone, Copy)]
struct RecHeader { magic: u32, kind: u8, version: u8, _pad: u16, len: u32 }

impl RecHeader {
    fn to_bytes(self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4] = self.kind; buf[5] = self.version; buf[6..8].copy_from_slice(&self._pad.to_le_bytes());
        buf[8..12].copy_from_slice(&self.len.to_le_bytes());
        buf
    }
    fn from_bytes(buf: &[u8; 12]) -> Self {
        Self {
            magic: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            kind: buf[4],
            version: buf[5],
            _pad: u16::from_le_bytes([buf[6], buf[7]]),
            len: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }
}

fn crc_of(payload: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Read exactly `buf.len()` bytes; `Ok(false)` on a clean or torn end of file.
fn read_full(f: &mut File, buf: &mut [u8]) -> Result<bool> {
    match f.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub struct RecordLog<R> {
    file: File,
    path: PathBuf,
    kind: LogKind,
    records: usize,
    _rec: PhantomData<fn() -> R>,
}

impl<R: Serialize + DeserializeOwned> RecordLog<R> {
    /// Open (creating if needed) for append, counting the records already
    /// present. A torn trailing record is truncated away first.
    pub fn open(path: &Path, kind: LogKind) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create record log directory: {}", parent.display()))?;
        }
        let (recs, good_len) = Self::scan(path, kind)?;
        let file = OpenOptions::new().create(true).append(true).open(path)
            .with_context(|| format!("open record log for append: {}", path.display()))?;
        let on_disk = file.metadata().with_context(|| format!("stat record log: {}", path.display()))?.len();
        if on_disk > good_len {
            warn!(target: "appvirt::persist", "truncating {} torn bytes at end of {}", on_disk - good_len, path.display());
            file.set_len(good_len).with_context(|| format!("truncate record log: {}", path.display()))?;
            file.sync_all()?;
        }
        Ok(Self { file, path: path.to_path_buf(), kind, records: recs.len(), _rec: PhantomData })
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn record_count(&self) -> usize { self.records }

    pub fn append(&mut self, rec: &R) -> Result<()> {
        let bytes = encode_record(self.kind, rec)?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;
        self.file.sync_data()?;
        self.records += 1;
        Ok(())
    }

    pub fn read_all(path: &Path, kind: LogKind) -> Result<Vec<R>> { Ok(Self::scan(path, kind)?.0) }

    /// Decode every complete record and return the byte length they span.
    fn scan(path: &Path, kind: LogKind) -> Result<(Vec<R>, u64)> {
        let mut out = Vec::new();
        let mut good_len = 0u64;
        if !path.exists() { return Ok((out, good_len)); }
        let mut f = OpenOptions::new().read(true).open(path)
            .with_context(|| format!("open record log for read: {}", path.display()))?;
        loop {
            let mut hb = [0u8; 12];
            if !read_full(&mut f, &mut hb)? { break; }
            let header = RecHeader::from_bytes(&hb);
            if header.magic != MAGIC_LOG { return Err(anyhow!("bad record log magic in {}", path.display())); }
            if header.kind != kind as u8 { return Err(anyhow!("record log {} holds kind {}, expected {}", path.display(), header.kind, kind as u8)); }
            let mut payload = vec![0u8; header.len as usize];
            if !read_full(&mut f, &mut payload)? { break; }
            let mut crc_bytes = [0u8; 4];
            if !read_full(&mut f, &mut crc_bytes)? { break; }
            if u32::from_le_bytes(crc_bytes) != crc_of(&payload) {
                return Err(anyhow!("record log CRC mismatch in {}", path.display()));
            }
            let rec: R = bincode::deserialize(&payload)
                .with_context(|| format!("decode record in {}", path.display()))?;
            out.push(rec);
            good_len += 12 + header.len as u64 + 4;
        }
        Ok((out, good_len))
    }

    /// Replace the log contents with `recs` atomically (tmp file + rename) and reopen.
    pub fn rewrite(&mut self, recs: &[R]) -> Result<()> {
        let tmp = self.path.with_extension("log.tmp");
        {
            let mut f = File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
            for r in recs { f.write_all(&encode_record(self.kind, r)?)?; }
            f.flush()?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace record log {}", self.path.display()))?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)
            .with_context(|| format!("reopen record log: {}", self.path.display()))?;
        self.records = recs.len();
        Ok(())
    }
}

fn encode_record<R: Serialize>(kind: LogKind, rec: &R) -> Result<Vec<u8>> {
    let payload = bincode::serialize(rec)?;
    let header = RecHeader { magic: MAGIC_LOG, kind: kind as u8, version: VERSION, _pad: 0, len: payload.len() as u32 };
    let mut out = Vec::with_capacity(12 + payload.len() + 4);
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc_of(&payload).to_le_bytes());
    Ok(out)
}
