//! Chart kinds, their positional record layout, and the decoded chart record.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Which daily chart a snapshot belongs to.
///
/// The kind fixes the positional layout of the raw text: see [`RecordLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Song,
    Artist,
}

/// Positional layout of one ranked entry in a raw chart blob.
///
/// A record is `stride` consecutive lines: the position line, the change line,
/// `text_fields` verbatim text lines, and one trailing metrics line holding
/// `metric_tokens` space-separated numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub stride: usize,
    pub text_fields: usize,
    pub metric_tokens: usize,
}

const SONG_LAYOUT: RecordLayout = RecordLayout {
    stride: 5,
    text_fields: 2,
    metric_tokens: 4,
};

const ARTIST_LAYOUT: RecordLayout = RecordLayout {
    stride: 4,
    text_fields: 1,
    metric_tokens: 3,
};

const SONG_COLUMNS: [&str; 10] = [
    "date", "region", "position", "change", "title", "artist", "peak", "previous", "streak",
    "streams",
];

const ARTIST_COLUMNS: [&str; 8] = [
    "date", "region", "position", "change", "name", "peak", "previous", "streak",
];

impl ChartKind {
    pub const ALL: [ChartKind; 2] = [ChartKind::Song, ChartKind::Artist];

    pub const fn layout(self) -> RecordLayout {
        match self {
            ChartKind::Song => SONG_LAYOUT,
            ChartKind::Artist => ARTIST_LAYOUT,
        }
    }

    /// Lines per record in the raw blob.
    pub const fn stride(self) -> usize {
        self.layout().stride
    }

    /// Column names of the tabular export, in order.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            ChartKind::Song => &SONG_COLUMNS,
            ChartKind::Artist => &ARTIST_COLUMNS,
        }
    }

    pub fn has_title(self) -> bool {
        self.layout().text_fields > 1
    }

    pub fn has_streams(self) -> bool {
        self.layout().metric_tokens > 3
    }

    /// Chart page address for a region abbreviation and date, e.g.
    /// `regional-global-daily/2022-01-27` or `artist-us-daily/2022-01-27`.
    pub fn view_path(self, region: &str, date: NaiveDate) -> String {
        let prefix = match self {
            ChartKind::Song => "regional",
            ChartKind::Artist => "artist",
        };
        format!("{prefix}-{region}-daily/{}", date.format("%Y-%m-%d"))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChartKind::Song => "song",
            ChartKind::Artist => "artist",
        }
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "song" | "songs" => Ok(ChartKind::Song),
            "artist" | "artists" => Ok(ChartKind::Artist),
            other => Err(format!("unknown chart kind '{other}' (expected song or artist)")),
        }
    }
}

/// One ranked entry of a daily chart.
///
/// `title` and `streams` are only present on song charts. The metric fields are
/// `None` when the snapshot's metrics line did not carry a usable number for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRecord {
    pub date: NaiveDate,
    pub region: String,
    pub position: u32,
    /// Signed delta (`+1`, `-3`), `new`, or `=`; kept as the raw token.
    pub change: String,
    pub title: Option<String>,
    /// Artist name (the credited artist for songs).
    pub name: String,
    pub peak: Option<u32>,
    pub previous: Option<u32>,
    pub streak: Option<u32>,
    pub streams: Option<u64>,
}
