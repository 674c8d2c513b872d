//! Replay session: serves previously captured chart snapshots from disk.
//!
//! Snapshots live at `{root}/{view_path}.txt`, e.g.
//! `snapshots/regional-global-daily/2022-01-27.txt`. This lets a harvest be
//! re-run offline against captured pages without touching the chart site.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::domain::{ChartKind, RawBlob};
use crate::session::{ChartSession, Credentials, SessionError};

#[derive(Debug)]
pub struct ReplaySession {
    root: PathBuf,
    logged_in: bool,
}

impl ReplaySession {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            logged_in: false,
        }
    }

    /// Where the snapshot for `(date, region, kind)` is expected.
    pub fn snapshot_path(root: &Path, date: NaiveDate, region: &str, kind: ChartKind) -> PathBuf {
        root.join(format!("{}.txt", kind.view_path(region, date)))
    }
}

impl ChartSession for ReplaySession {
    fn login(&mut self, _credentials: &Credentials) -> Result<(), SessionError> {
        if !self.root.is_dir() {
            return Err(SessionError::Rejected(format!(
                "snapshot directory {} does not exist",
                self.root.display()
            )));
        }
        self.logged_in = true;
        Ok(())
    }

    fn fetch_blob(
        &mut self,
        date: NaiveDate,
        region: &str,
        kind: ChartKind,
    ) -> Result<RawBlob, SessionError> {
        if !self.logged_in {
            return Err(SessionError::Rejected("not logged in".into()));
        }
        let path = Self::snapshot_path(&self.root, date, region, kind);
        std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                SessionError::Navigation(format!("no snapshot at {}", path.display()))
            }
            _ => SessionError::Navigation(format!("read {}: {e}", path.display())),
        })
    }

    fn close(&mut self) {
        self.logged_in = false;
    }
}
