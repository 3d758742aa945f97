//! Append-only per-conversation history.
//!
//! One record per line, CRLF-terminated: `<unix_ts> <IN|OUT> <sender>
//! <text>`. A sibling `lastread` file holds exactly one record: the most
//! recent message the user is considered to have read. Missing files mean
//! "no history yet", never an error.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;
use time::{Date, OffsetDateTime};

use crate::conversation::{LogMessage, OWN_SENDER};

pub const HISTORY_FILE: &str = "history";
pub const LASTREAD_FILE: &str = "lastread";

const RECORD_TERMINATOR: &str = "\r\n";

/// Backward-seek stride used to locate the final record without scanning
/// the whole file.
const SEEK_STEP: u64 = 128;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed history record: {line:?}")]
    Malformed { line: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub timestamp: i64,
    pub own: bool,
    pub sender: String,
    pub text: String,
}

impl Record {
    pub fn from_message(msg: &LogMessage) -> Self {
        Self {
            timestamp: msg.timestamp,
            own: msg.own,
            sender: if msg.own {
                OWN_SENDER.to_owned()
            } else {
                msg.sender.clone()
            },
            text: msg.text.clone(),
        }
    }
}

fn format_record(record: &Record) -> String {
    let direction = if record.own { "OUT" } else { "IN" };
    let sender = if record.own { OWN_SENDER } else { &record.sender };
    // One record stays on one line: embedded newlines use the wire tag.
    let text = record.text.replace('\n', "<br/>");
    format!("{} {direction} {sender} {text}{RECORD_TERMINATOR}", record.timestamp)
}

fn parse_record(line: &str) -> Result<Record, HistoryError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = line.splitn(4, ' ');
    let timestamp = fields.next().and_then(|f| f.parse::<i64>().ok());
    let direction = fields.next();
    let sender = fields.next();
    let text = fields.next().unwrap_or("");

    match (timestamp, direction, sender) {
        (Some(timestamp), Some(direction), Some(sender))
            if direction == "IN" || direction == "OUT" =>
        {
            Ok(Record {
                timestamp,
                own: direction == "OUT",
                sender: sender.to_owned(),
                text: text.replace("<br/>", "\n"),
            })
        }
        _ => Err(HistoryError::Malformed {
            line: line.to_owned(),
        }),
    }
}

/// Append one record; an own record also overwrites the lastread marker,
/// since sending implies having read everything before it.
pub fn append(dir: &Path, record: &Record) -> Result<(), HistoryError> {
    fs::create_dir_all(dir)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(HISTORY_FILE))?;
    file.write_all(format_record(record).as_bytes())?;

    if record.own {
        write_lastread(dir, record)?;
    }
    Ok(())
}

pub fn write_lastread(dir: &Path, record: &Record) -> Result<(), HistoryError> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(LASTREAD_FILE), format_record(record))?;
    Ok(())
}

pub fn read_lastread(dir: &Path) -> Result<Option<Record>, HistoryError> {
    let data = match fs::read_to_string(dir.join(LASTREAD_FILE)) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    match data.lines().next() {
        Some(line) if !line.is_empty() => Ok(Some(parse_record(line)?)),
        _ => Ok(None),
    }
}

/// The final record of the history file, found by walking backward from the
/// end in fixed-size steps. Empty or absent files yield `None`.
pub fn read_last_record(dir: &Path) -> Result<Option<Record>, HistoryError> {
    read_last_record_counting(&dir.join(HISTORY_FILE)).map(|(record, _)| record)
}

/// Also reports how many bytes the backward walk touched, so tests can
/// verify the tail read stays bounded regardless of file size.
fn read_last_record_counting(path: &Path) -> Result<(Option<Record>, u64), HistoryError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok((None, 0)),
        Err(err) => return Err(err.into()),
    };
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok((None, 0));
    }

    // The final record's own terminator sits at EOF; search the region
    // before it for the terminator of the record preceding it.
    let region_end = len.saturating_sub(RECORD_TERMINATOR.len() as u64);
    let mut scanned: u64 = 0;
    let mut start: u64 = 0;
    let mut high = region_end;
    let mut chunk = vec![0u8; SEEK_STEP as usize + 1];

    while high > 0 {
        let low = high.saturating_sub(SEEK_STEP);
        // Read one byte past `high` (if the region allows) so a terminator
        // straddling the chunk boundary is still seen.
        let read_end = (high + 1).min(region_end);
        let read_len = (read_end - low) as usize;
        file.seek(SeekFrom::Start(low))?;
        let buf = &mut chunk[..read_len];
        file.read_exact(buf)?;
        scanned += read_len as u64;

        if let Some(pos) = find_last_terminator(buf) {
            start = low + pos as u64 + RECORD_TERMINATOR.len() as u64;
            break;
        }
        high = low;
    }

    file.seek(SeekFrom::Start(start))?;
    let mut tail = String::new();
    file.read_to_string(&mut tail)?;
    scanned += tail.len() as u64;

    let line = tail.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Ok((None, scanned));
    }
    Ok((Some(parse_record(line)?), scanned))
}

fn find_last_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(2).rposition(|w| w == b"\r\n")
}

/// Replay the whole history file into log messages: the lastread record (if
/// any) marks where unread begins, calendar-day changes insert a synthetic
/// marker, and a non-empty history ends with a "restarted" marker.
pub fn load(dir: &Path, now: i64) -> Result<Vec<LogMessage>, HistoryError> {
    let lastread = read_lastread(dir)?;

    let file = match File::open(dir.join(HISTORY_FILE)) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut out = Vec::new();
    let mut last_date: Option<Date> = None;
    // Until the lastread record passes by, everything counts as read.
    let mut past_boundary = lastread.is_none();

    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let record = parse_record(&line)?;

        let date = day_of(record.timestamp);
        if let (Some(prev), Some(curr)) = (last_date, date) {
            if prev != curr {
                out.push(LogMessage::date_changed(record.timestamp, curr));
            }
        }
        if date.is_some() {
            last_date = date;
        }

        out.push(LogMessage {
            timestamp: record.timestamp,
            sender: record.sender.clone(),
            text: record.text.clone(),
            own: record.own,
            is_read: !past_boundary,
        });

        if let Some(ref boundary) = lastread {
            if !past_boundary && record == *boundary {
                past_boundary = true;
            }
        }
    }

    if !out.is_empty() {
        out.push(LogMessage::restarted(now));
    }
    Ok(out)
}

fn day_of(timestamp: i64) -> Option<Date> {
    OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()
        .map(|t| t.date())
}
