//! The sync journal: a single-writer SQLite store holding per-path
//! metadata, transfer resume checkpoints, the error blacklist and pending
//! server-side poll continuations.
//!
//! One journal file lives in the root of every synchronized folder. All
//! access goes through a single connection guarded by a mutex, so the
//! journal may be called from any thread but serializes its callers.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, OptionalExtension};
use tracing::{debug, info, warn};

use crate::errors::{JournalError, Result};
use crate::fs::set_file_hidden;
use crate::phash::PathHash;
use crate::records::{BlacklistEntry, DownloadInfo, EntryType, FileRecord, PollInfo, UploadInfo};
use crate::sql::SqlGateway;

/// Journal file name inside the synchronized folder.
pub const JOURNAL_FILE_NAME: &str = ".csync_journal.db";

/// Reserved etag meaning "do not trust the cached value, ask the server".
pub const INVALID_ETAG: &str = "_invalid_";

#[derive(Debug, Clone)]
pub struct JournalOptions {
    /// Result of the filesystem case-preservation probe. Case-preserving
    /// filesystems require the blacklist lookup to ignore case.
    pub case_preserving: bool,
}

impl Default for JournalOptions {
    fn default() -> Self {
        Self {
            case_preserving: cfg!(any(windows, target_os = "macos")),
        }
    }
}

fn running_version() -> (i64, i64, i64) {
    let parse = |s: &str| s.parse().unwrap_or(0);
    (
        parse(env!("CARGO_PKG_VERSION_MAJOR")),
        parse(env!("CARGO_PKG_VERSION_MINOR")),
        parse(env!("CARGO_PKG_VERSION_PATCH")),
    )
}

pub struct SyncJournal {
    inner: Mutex<Inner>,
}

struct Inner {
    db_file: PathBuf,
    options: JournalOptions,
    gateway: Option<SqlGateway>,
    /// Paths registered by `avoid_read_from_db_on_next_sync`; any record
    /// written below one of them gets its etag forced to `_invalid_`.
    avoid_read_filter: Vec<String>,
    possible_upgrade_from_prior_major: bool,
}

impl SyncJournal {
    /// Journal for the given synchronized folder root. The database is not
    /// touched until the first operation.
    pub fn new(folder_root: impl AsRef<Path>, options: JournalOptions) -> Self {
        Self {
            inner: Mutex::new(Inner {
                db_file: folder_root.as_ref().join(JOURNAL_FILE_NAME),
                options,
                gateway: None,
                avoid_read_filter: Vec::new(),
                possible_upgrade_from_prior_major: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn database_file_path(&self) -> PathBuf {
        self.lock().db_file.clone()
    }

    pub fn exists(&self) -> bool {
        self.lock().db_file.exists()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connect().is_ok()
    }

    /// Read-only signal: the database predates version tracking and may
    /// stem from a prior major release.
    pub fn possible_upgrade_from_prior_major(&self) -> Result<bool> {
        let mut inner = self.lock();
        inner.connect()?;
        Ok(inner.possible_upgrade_from_prior_major)
    }

    /// Commit any running transaction and drop the connection. Also clears
    /// the etag-invalidation filter.
    pub fn close(&self) {
        let mut inner = self.lock();
        debug!(file = %inner.db_file.display(), "closing journal");
        if let Some(gateway) = inner.gateway.as_mut() {
            if let Err(error) = gateway.commit() {
                warn!(%error, "commit on close failed");
            }
        }
        inner.gateway = None;
        inner.avoid_read_filter.clear();
        inner.possible_upgrade_from_prior_major = false;
    }

    pub fn start_transaction(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.with_gateway("start transaction", |gw| Ok(gw.begin()))?
    }

    /// Commit the running transaction, optionally starting a new one.
    pub fn commit(&self, context: &str, start_new: bool) -> Result<()> {
        let mut inner = self.lock();
        inner.with_gateway(context, |gw| Ok(gw.commit_internal(context, start_new)))?
    }

    pub fn commit_if_needed_and_start_new_transaction(&self, context: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.with_gateway(context, |gw| {
            if gw.transaction_open() {
                Ok(gw.commit_internal(context, true))
            } else {
                Ok(gw.begin())
            }
        })?
    }

    pub fn get_file_record(&self, path: &str) -> Result<Option<FileRecord>> {
        let phash = PathHash::compute(path);
        let mut inner = self.lock();
        inner.with_gateway("get file record", |gw| {
            let mut stmt = gw.prepare(
                "SELECT path, inode, uid, gid, mode, modtime, type, md5, \
                 fileid, remotePerm, filesize FROM metadata WHERE phash=?1",
            )?;
            stmt.query_row(params![phash.0], |row| {
                Ok(FileRecord {
                    path: row.get(0)?,
                    inode: row.get(1)?,
                    mode: row.get(4)?,
                    modtime: row.get(5)?,
                    kind: EntryType::from_i64(row.get(6)?),
                    etag: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                    file_id: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                    remote_perm: row.get(9)?,
                    file_size: row.get::<_, Option<i64>>(10)?.unwrap_or_default(),
                })
            })
            .optional()
        })
    }

    /// Insert or replace the metadata row for `record.path`.
    ///
    /// Records written below a path registered through
    /// `avoid_read_from_db_on_next_sync` get their etag replaced by the
    /// invalid sentinel so the next run re-queries the server.
    pub fn set_file_record(&self, record: &FileRecord) -> Result<()> {
        let mut record = record.clone();
        let mut inner = self.lock();

        if inner.filtered_by_avoid_read(&record.path) {
            debug!(path = %record.path, "etag write filtered, forcing refresh on next sync");
            record.etag = INVALID_ETAG.to_string();
        }

        let phash = PathHash::compute(&record.path);
        if !phash.is_valid() {
            return Err(JournalError::InvalidRecord("empty path".to_string()));
        }
        let pathlen = record.path.len() as i64;
        inner.with_gateway("set file record", |gw| {
            let mut stmt = gw.prepare(
                "INSERT OR REPLACE INTO metadata \
                 (phash, pathlen, path, inode, uid, gid, mode, modtime, type, md5, fileid, remotePerm, filesize) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            stmt.execute(params![
                phash.0,
                pathlen,
                record.path,
                record.inode,
                0, // uid not used
                0, // gid not used
                record.mode,
                record.modtime,
                record.kind.as_i64(),
                record.etag,
                record.file_id,
                record.remote_perm,
                record.file_size,
            ])?;
            Ok(())
        })
    }

    /// Delete the metadata row for `path`; with `recursive` also every row
    /// below `path/`.
    pub fn delete_file_record(&self, path: &str, recursive: bool) -> Result<()> {
        let phash = PathHash::compute(path);
        let mut inner = self.lock();
        inner.with_gateway("delete file record", |gw| {
            gw.prepare("DELETE FROM metadata WHERE phash=?1")?
                .execute(params![phash.0])?;
            if recursive {
                gw.prepare("DELETE FROM metadata WHERE path LIKE(?1||'/%')")?
                    .execute(params![path])?;
            }
            Ok(())
        })
    }

    pub fn file_record_count(&self) -> Result<i64> {
        let mut inner = self.lock();
        inner.with_gateway("count metadata", |gw| {
            gw.prepare("SELECT COUNT(*) FROM metadata")?
                .query_row([], |row| row.get(0))
        })
    }

    pub fn get_download_info(&self, file: &str) -> Result<Option<DownloadInfo>> {
        let mut inner = self.lock();
        inner.with_gateway("get download info", |gw| {
            let mut stmt =
                gw.prepare("SELECT tmpfile, etag, errorcount FROM downloadinfo WHERE path=?1")?;
            stmt.query_row(params![file], |row| {
                Ok(DownloadInfo {
                    tmpfile: row.get(0)?,
                    etag: row.get(1)?,
                    error_count: row.get(2)?,
                    valid: true,
                })
            })
            .optional()
        })
    }

    /// Store a download checkpoint; an invalid checkpoint deletes the row.
    pub fn set_download_info(&self, file: &str, info: &DownloadInfo) -> Result<()> {
        if !info.valid {
            return self.delete_download_info(file);
        }
        let mut inner = self.lock();
        inner.with_gateway("set download info", |gw| {
            gw.prepare(
                "INSERT OR REPLACE INTO downloadinfo (path, tmpfile, etag, errorcount) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![file, info.tmpfile, info.etag, info.error_count])?;
            Ok(())
        })
    }

    pub fn delete_download_info(&self, file: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.with_gateway("delete download info", |gw| {
            gw.prepare("DELETE FROM downloadinfo WHERE path=?1")?
                .execute(params![file])?;
            Ok(())
        })
    }

    /// Remove download checkpoints for paths outside the keep-set and hand
    /// them back so the caller can delete the temporary files.
    pub fn get_and_delete_stale_download_infos(
        &self,
        keep: &HashSet<String>,
    ) -> Result<Vec<DownloadInfo>> {
        let mut inner = self.lock();
        inner.with_gateway("stale download infos", |gw| {
            let mut stmt = gw.prepare("SELECT tmpfile, etag, errorcount, path FROM downloadinfo")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    DownloadInfo {
                        tmpfile: row.get(0)?,
                        etag: row.get(1)?,
                        error_count: row.get(2)?,
                        valid: true,
                    },
                    row.get::<_, String>(3)?,
                ))
            })?;
            let mut stale = Vec::new();
            let mut stale_paths = Vec::new();
            for row in rows {
                let (info, path) = row?;
                if !keep.contains(&path) {
                    stale.push(info);
                    stale_paths.push(path);
                }
            }
            drop(stmt);
            if !stale_paths.is_empty() {
                debug!(count = stale_paths.len(), "removing stale downloadinfo entries");
                let mut del = gw.prepare("DELETE FROM downloadinfo WHERE path=?1")?;
                for path in &stale_paths {
                    del.execute(params![path])?;
                }
            }
            Ok(stale)
        })
    }

    pub fn download_info_count(&self) -> Result<i64> {
        let mut inner = self.lock();
        inner.with_gateway("count downloadinfo", |gw| {
            gw.prepare("SELECT COUNT(*) FROM downloadinfo")?
                .query_row([], |row| row.get(0))
        })
    }

    pub fn get_upload_info(&self, file: &str) -> Result<Option<UploadInfo>> {
        let mut inner = self.lock();
        inner.with_gateway("get upload info", |gw| {
            let mut stmt = gw.prepare(
                "SELECT chunk, transferid, errorcount, size, modtime FROM uploadinfo WHERE path=?1",
            )?;
            stmt.query_row(params![file], |row| {
                Ok(UploadInfo {
                    chunk: row.get(0)?,
                    transfer_id: row.get(1)?,
                    error_count: row.get(2)?,
                    size: row.get(3)?,
                    modtime: row.get(4)?,
                    valid: true,
                })
            })
            .optional()
        })
    }

    /// Store an upload checkpoint; an invalid checkpoint deletes the row.
    pub fn set_upload_info(&self, file: &str, info: &UploadInfo) -> Result<()> {
        if !info.valid {
            return self.delete_upload_info(file);
        }
        let mut inner = self.lock();
        inner.with_gateway("set upload info", |gw| {
            gw.prepare(
                "INSERT OR REPLACE INTO uploadinfo (path, chunk, transferid, errorcount, size, modtime) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?
            .execute(params![
                file,
                info.chunk,
                info.transfer_id,
                info.error_count,
                info.size,
                info.modtime,
            ])?;
            Ok(())
        })
    }

    pub fn delete_upload_info(&self, file: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.with_gateway("delete upload info", |gw| {
            gw.prepare("DELETE FROM uploadinfo WHERE path=?1")?
                .execute(params![file])?;
            Ok(())
        })
    }

    pub fn delete_stale_upload_infos(&self, keep: &HashSet<String>) -> Result<()> {
        let mut inner = self.lock();
        inner.with_gateway("stale upload infos", |gw| {
            let mut stmt = gw.prepare("SELECT path FROM uploadinfo")?;
            let paths = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            drop(stmt);
            let mut del = gw.prepare("DELETE FROM uploadinfo WHERE path=?1")?;
            for path in paths.iter().filter(|p| !keep.contains(*p)) {
                debug!(path, "removing stale uploadinfo entry");
                del.execute(params![path])?;
            }
            Ok(())
        })
    }

    pub fn blacklist_entry(&self, file: &str) -> Result<Option<BlacklistEntry>> {
        if file.is_empty() {
            return Ok(None);
        }
        let mut inner = self.lock();
        // Case-preserving filesystems need a case-insensitive lookup here.
        let sql = if inner.options.case_preserving {
            "SELECT lastTryEtag, lastTryModtime, retrycount, errorstring, lastTryTime, ignoreDuration \
             FROM blacklist WHERE path=?1 COLLATE NOCASE"
        } else {
            "SELECT lastTryEtag, lastTryModtime, retrycount, errorstring, lastTryTime, ignoreDuration \
             FROM blacklist WHERE path=?1"
        };
        let file = file.to_string();
        inner.with_gateway("get blacklist entry", move |gw| {
            let mut stmt = gw.prepare(sql)?;
            stmt.query_row(params![file], |row| {
                Ok(BlacklistEntry {
                    file: file.clone(),
                    last_try_etag: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    last_try_modtime: row.get::<_, Option<i64>>(1)?.unwrap_or_default(),
                    retry_count: row.get(2)?,
                    error_string: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    last_try_time: row.get::<_, Option<i64>>(4)?.unwrap_or_default(),
                    ignore_duration: row.get::<_, Option<i64>>(5)?.unwrap_or_default(),
                })
            })
            .optional()
        })
    }

    pub fn update_blacklist_entry(&self, entry: &BlacklistEntry) -> Result<()> {
        let mut inner = self.lock();
        debug!(
            file = %entry.file,
            retry_count = entry.retry_count,
            ignore_duration = entry.ignore_duration,
            "set blacklist entry"
        );
        inner.with_gateway("set blacklist entry", |gw| {
            gw.prepare(
                "INSERT OR REPLACE INTO blacklist \
                 (path, lastTryEtag, lastTryModtime, retrycount, errorstring, lastTryTime, ignoreDuration) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?
            .execute(params![
                entry.file,
                entry.last_try_etag,
                entry.last_try_modtime,
                entry.retry_count,
                entry.error_string,
                entry.last_try_time,
                entry.ignore_duration,
            ])?;
            Ok(())
        })
    }

    pub fn wipe_blacklist_entry(&self, file: &str) -> Result<()> {
        if file.is_empty() {
            return Ok(());
        }
        let mut inner = self.lock();
        inner.with_gateway("wipe blacklist entry", |gw| {
            gw.prepare("DELETE FROM blacklist WHERE path=?1")?
                .execute(params![file])?;
            Ok(())
        })
    }

    /// Clear the whole blacklist, returning the number of removed rows.
    pub fn wipe_blacklist(&self) -> Result<usize> {
        let mut inner = self.lock();
        inner.with_gateway("wipe blacklist", |gw| {
            gw.prepare("DELETE FROM blacklist")?.execute([])
        })
    }

    pub fn delete_stale_blacklist_entries(&self, keep: &HashSet<String>) -> Result<()> {
        let mut inner = self.lock();
        inner.with_gateway("stale blacklist entries", |gw| {
            let mut stmt = gw.prepare("SELECT path FROM blacklist")?;
            let paths = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            drop(stmt);
            let mut del = gw.prepare("DELETE FROM blacklist WHERE path=?1")?;
            for path in paths.iter().filter(|p| !keep.contains(*p)) {
                debug!(path, "removing stale blacklist entry");
                del.execute(params![path])?;
            }
            Ok(())
        })
    }

    pub fn blacklist_entry_count(&self) -> Result<i64> {
        let mut inner = self.lock();
        inner.with_gateway("count blacklist", |gw| {
            gw.prepare("SELECT COUNT(*) FROM blacklist")?
                .query_row([], |row| row.get(0))
        })
    }

    pub fn get_poll_infos(&self) -> Result<Vec<PollInfo>> {
        let mut inner = self.lock();
        inner.with_gateway("get poll infos", |gw| {
            let mut stmt = gw.prepare("SELECT path, modtime, pollpath FROM poll")?;
            let infos = stmt
                .query_map([], |row| {
                    Ok(PollInfo {
                        file: row.get(0)?,
                        modtime: row.get(1)?,
                        url: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(infos)
        })
    }

    /// Record a pending server-side continuation; an empty url deletes it.
    pub fn set_poll_info(&self, info: &PollInfo) -> Result<()> {
        let mut inner = self.lock();
        inner.with_gateway("set poll info", |gw| {
            if info.url.is_empty() {
                gw.prepare("DELETE FROM poll WHERE path=?1")?
                    .execute(params![info.file])?;
            } else {
                gw.prepare(
                    "INSERT OR REPLACE INTO poll (path, modtime, pollpath) VALUES (?1, ?2, ?3)",
                )?
                .execute(params![info.file, info.modtime, info.url])?;
            }
            Ok(())
        })
    }

    /// Defeat the rename detector for `path` and everything below it by
    /// clearing the stable identifiers, then force a server re-query.
    pub fn avoid_renames_on_next_sync(&self, path: &str) -> Result<()> {
        let mut inner = self.lock();
        let rows = inner.with_gateway("avoid renames", |gw| {
            gw.prepare(
                "UPDATE metadata SET fileid = '', inode = 0 \
                 WHERE path == ?1 OR path LIKE(?1||'/%')",
            )?
            .execute(params![path])
        })?;
        debug!(path, rows, "cleared fileid/inode for rename avoidance");
        inner.avoid_read_from_db(path)
    }

    /// Make sure the next run does not trust cached etags on the way to
    /// `path`: invalidate every directory row that is an ancestor of it and
    /// filter future etag writes below `path` for the rest of this run.
    pub fn avoid_read_from_db_on_next_sync(&self, path: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.avoid_read_from_db(path)
    }

    /// Drop metadata rows whose path is not part of the authoritative
    /// keep-set, then checkpoint the write-ahead log.
    pub fn post_sync_cleanup(&self, keep: &HashSet<String>) -> Result<()> {
        let mut inner = self.lock();
        inner.with_gateway("post sync cleanup", |gw| {
            let mut stmt = gw.prepare("SELECT phash, path FROM metadata ORDER BY path")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            drop(stmt);

            let superfluous: Vec<String> = rows
                .into_iter()
                .filter(|(_, path)| !keep.contains(path))
                .map(|(phash, _)| phash.to_string())
                .collect();
            if !superfluous.is_empty() {
                let sql = format!(
                    "DELETE FROM metadata WHERE phash IN ({})",
                    superfluous.join(",")
                );
                info!(count = superfluous.len(), "journal cleanup of removed entries");
                gw.conn().execute(&sql, [])?;
            }
            Ok(())
        })?;
        inner.with_gateway("wal checkpoint", |gw| Ok(gw.wal_checkpoint()))??;
        inner.possible_upgrade_from_prior_major = false;
        Ok(())
    }
}

impl Inner {
    /// Whether a future write of `path` must have its etag invalidated.
    fn filtered_by_avoid_read(&self, path: &str) -> bool {
        self.avoid_read_filter
            .iter()
            .any(|member| path == member || path.starts_with(&format!("{}/", member)))
    }

    fn avoid_read_from_db(&mut self, path: &str) -> Result<()> {
        let rows = self.with_gateway("avoid read from db", |gw| {
            // Matches rows whose path is an ancestor directory of `path`.
            gw.prepare(
                "UPDATE metadata SET md5=?1 WHERE ?2 LIKE(path||'/%') AND type == 2",
            )?
            .execute(params![INVALID_ETAG, path])
        })?;
        debug!(path, rows, "invalidated ancestor directory etags");
        self.avoid_read_filter.push(path.to_string());
        Ok(())
    }

    /// Run `op` against a connected gateway. A failing statement commits
    /// whatever the open transaction holds, closes the connection and
    /// surfaces the error; the next call reconnects.
    fn with_gateway<T>(
        &mut self,
        context: &str,
        op: impl FnOnce(&mut SqlGateway) -> rusqlite::Result<T>,
    ) -> Result<T> {
        self.connect()?;
        let Some(gateway) = self.gateway.as_mut() else {
            return Err(JournalError::Closed);
        };
        let outcome = op(gateway);
        match outcome {
            Ok(value) => Ok(value),
            Err(error) => {
                warn!(context, %error, "SQL error, flushing and closing the journal");
                if let Some(gateway) = self.gateway.as_mut() {
                    let _ = gateway.commit();
                }
                self.gateway = None;
                Err(JournalError::Database(error))
            }
        }
    }

    fn connect(&mut self) -> Result<()> {
        if self.gateway.is_some() {
            return Ok(());
        }
        if self.db_file.as_os_str().is_empty() {
            return Err(JournalError::EmptyPath);
        }

        let is_new_db = !self.db_file.exists();
        let mut gateway = SqlGateway::open(&self.db_file)?;

        // Hide the database and its WAL siblings from directory listings.
        for suffix in ["", "-wal", "-shm"] {
            let mut os_path = self.db_file.clone().into_os_string();
            os_path.push(suffix);
            if let Err(error) = set_file_hidden(Path::new(&os_path), true) {
                debug!(%error, "could not mark journal file hidden");
            }
        }

        // Inserts are slow on their own, so everything runs inside one
        // long transaction that is committed at well-known points.
        gateway.begin()?;

        let setup = Self::create_schema(&mut gateway, is_new_db);
        match setup {
            Ok(upgrade) => {
                self.possible_upgrade_from_prior_major = upgrade;
            }
            Err(error) => {
                let _ = gateway.commit();
                warn!(%error, "journal schema setup failed");
                return Err(error);
            }
        }

        gateway.commit_internal("schema setup", true)?;
        if let Err(error) = Self::migrate(&mut gateway) {
            let _ = gateway.commit();
            warn!(%error, "journal migration failed");
            return Err(error);
        }
        // End connection setup without leaving a transaction open.
        gateway.commit_internal("connect end", false)?;

        self.gateway = Some(gateway);
        info!(file = %self.db_file.display(), "journal connected");
        Ok(())
    }

    fn create_schema(gateway: &mut SqlGateway, is_new_db: bool) -> Result<bool> {
        gateway.conn().execute_batch(
            "CREATE TABLE IF NOT EXISTS metadata(\
                 phash INTEGER(8),\
                 pathlen INTEGER,\
                 path VARCHAR(4096),\
                 inode INTEGER,\
                 uid INTEGER,\
                 gid INTEGER,\
                 mode INTEGER,\
                 modtime INTEGER(8),\
                 type INTEGER,\
                 md5 VARCHAR(32),\
                 PRIMARY KEY(phash)\
             );\
             CREATE TABLE IF NOT EXISTS downloadinfo(\
                 path VARCHAR(4096),\
                 tmpfile VARCHAR(4096),\
                 etag VARCHAR(32),\
                 errorcount INTEGER,\
                 PRIMARY KEY(path)\
             );\
             CREATE TABLE IF NOT EXISTS uploadinfo(\
                 path VARCHAR(4096),\
                 chunk INTEGER,\
                 transferid INTEGER,\
                 errorcount INTEGER,\
                 size INTEGER(8),\
                 modtime INTEGER(8),\
                 PRIMARY KEY(path)\
             );\
             CREATE TABLE IF NOT EXISTS blacklist(\
                 path VARCHAR(4096),\
                 lastTryEtag VARCHAR(32),\
                 lastTryModtime INTEGER(8),\
                 retrycount INTEGER,\
                 errorstring VARCHAR(4096),\
                 PRIMARY KEY(path)\
             );\
             CREATE TABLE IF NOT EXISTS poll(\
                 path VARCHAR(4096),\
                 modtime INTEGER(8),\
                 pollpath VARCHAR(4096)\
             );\
             CREATE TABLE IF NOT EXISTS version(\
                 major INTEGER(8),\
                 minor INTEGER(8),\
                 patch INTEGER(8),\
                 custom VARCHAR(256)\
             );",
        )?;

        let (major, minor, patch) = running_version();
        let stored: Option<(i64, i64, i64)> = gateway
            .conn()
            .query_row("SELECT major, minor, patch FROM version", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .optional()?;

        let mut possible_upgrade = false;
        match stored {
            None => {
                // A populated database without a version row predates
                // version tracking.
                if !is_new_db {
                    info!("possible upgrade from a prior major release detected");
                    possible_upgrade = true;
                }
                gateway
                    .conn()
                    .execute(
                        "INSERT INTO version VALUES (?1, ?2, ?3, ?4)",
                        params![major, minor, patch, env!("CARGO_PKG_VERSION")],
                    )?;
            }
            Some((db_major, db_minor, db_patch)) => {
                if (db_major, db_minor, db_patch) != (major, minor, patch) {
                    gateway.conn().execute(
                        "UPDATE version SET major=?1, minor=?2, patch=?3, custom=?4 \
                         WHERE major=?5 AND minor=?6 AND patch=?7",
                        params![
                            major,
                            minor,
                            patch,
                            env!("CARGO_PKG_VERSION"),
                            db_major,
                            db_minor,
                            db_patch,
                        ],
                    )?;
                }
            }
        }
        Ok(possible_upgrade)
    }

    /// Idempotent structure updates: columns added after the first release
    /// and the helper indexes.
    fn migrate(gateway: &mut SqlGateway) -> Result<()> {
        let metadata_columns = gateway.table_columns("metadata")?;
        if !metadata_columns.iter().any(|c| c == "fileid") {
            gateway
                .conn()
                .execute_batch("ALTER TABLE metadata ADD COLUMN fileid VARCHAR(128);")?;
            gateway.commit_internal("add fileid column", true)?;
        }
        if !metadata_columns.iter().any(|c| c == "remotePerm") {
            gateway
                .conn()
                .execute_batch("ALTER TABLE metadata ADD COLUMN remotePerm VARCHAR(128);")?;
            gateway.commit_internal("add remotePerm column", true)?;
        }
        if !metadata_columns.iter().any(|c| c == "filesize") {
            gateway
                .conn()
                .execute_batch("ALTER TABLE metadata ADD COLUMN filesize BIGINT;")?;
            gateway.commit_internal("add filesize column", true)?;
        }
        gateway.conn().execute_batch(
            "CREATE INDEX IF NOT EXISTS metadata_file_id ON metadata(fileid);\
             CREATE INDEX IF NOT EXISTS metadata_inode ON metadata(inode);\
             CREATE INDEX IF NOT EXISTS metadata_pathlen ON metadata(pathlen);",
        )?;
        gateway.commit_internal("add metadata indexes", true)?;

        let blacklist_columns = gateway.table_columns("blacklist")?;
        if !blacklist_columns.iter().any(|c| c == "lastTryTime") {
            gateway.conn().execute_batch(
                "ALTER TABLE blacklist ADD COLUMN lastTryTime INTEGER(8);\
                 ALTER TABLE blacklist ADD COLUMN ignoreDuration INTEGER(8);",
            )?;
            gateway.commit_internal("add blacklist retry columns", true)?;
        }
        Ok(())
    }
}

impl Drop for SyncJournal {
    fn drop(&mut self) {
        self.close();
    }
}
