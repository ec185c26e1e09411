//! LIST reply parser for Unix (`ls -l`) and Windows/IIS listings.
//! Lines in neither format are kept as [`FtpEntryKind::Unknown`].

use crate::ftp::types::{FtpEntry, FtpEntryKind};
use regex::Regex;

/// Parse a complete LIST body, dropping `.` / `..` and `total` lines.
pub fn parse_listing(raw: &str) -> Vec<FtpEntry> {
    let unix = Regex::new(
        r"(?x)
        ^([dlcbps-][rwxsStT-]{9})[+@.]?\s+  # permissions
        \d+\s+                            # link count
        \S+\s+                            # owner
        \S+\s+                            # group
        (\d+)\s+                          # size
        \w{3}\s+\d{1,2}\s+[\d:]+\s+       # date
        (.+)$                             # name (possibly with -> target)
        ",
    )
    .ok();
    let windows = Regex::new(
        r"(?x)
        ^\d{2}-\d{2}-\d{2,4}\s+           # date
        \d{1,2}:\d{2}(?:AM|PM)?\s+        # time
        (<DIR>|\d+)\s+                    # size or <DIR>
        (.+)$                             # name
        ",
    )
    .ok();

    raw.lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty() && !l.starts_with("total "))
        .map(|line| {
            unix.as_ref()
                .and_then(|re| parse_unix(re, line))
                .or_else(|| windows.as_ref().and_then(|re| parse_windows(re, line)))
                .unwrap_or_else(|| FtpEntry {
                    name: line.trim().to_string(),
                    kind: FtpEntryKind::Unknown,
                    size: 0,
                    raw: line.to_string(),
                })
        })
        .filter(|e| e.name != "." && e.name != "..")
        .collect()
}

fn parse_unix(re: &Regex, line: &str) -> Option<FtpEntry> {
    let caps = re.captures(line)?;
    let perms = caps.get(1)?.as_str();
    let size = caps.get(2)?.as_str().parse::<u64>().unwrap_or(0);
    let name_raw = caps.get(3)?.as_str();

    let kind = match perms.as_bytes().first() {
        Some(b'd') => FtpEntryKind::Directory,
        Some(b'l') => FtpEntryKind::Symlink,
        Some(b'-') => FtpEntryKind::File,
        _ => FtpEntryKind::Unknown,
    };
    let name = match (kind.clone(), name_raw.find(" -> ")) {
        (FtpEntryKind::Symlink, Some(pos)) => &name_raw[..pos],
        _ => name_raw,
    };

    Some(FtpEntry {
        name: name.to_string(),
        kind,
        size,
        raw: line.to_string(),
    })
}

fn parse_windows(re: &Regex, line: &str) -> Option<FtpEntry> {
    let caps = re.captures(line)?;
    let size_or_dir = caps.get(1)?.as_str();
    let name = caps.get(2)?.as_str().to_string();

    let (kind, size) = if size_or_dir == "<DIR>" {
        (FtpEntryKind::Directory, 0)
    } else {
        (FtpEntryKind::File, size_or_dir.parse::<u64>().unwrap_or(0))
    };
    Some(FtpEntry {
        name,
        kind,
        size,
        raw: line.to_string(),
    })
}
