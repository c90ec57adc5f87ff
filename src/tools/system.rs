use crate::error::ToolError;
use serde_json::{json, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::time::Duration;
use sysinfo::Disks;
use walkdir::WalkDir;

const MAX_TREE_ENTRIES: usize = 500;
const MAX_TREE_DEPTH: usize = 10;
const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

pub fn get_file_tree(path: &str, max_depth: usize) -> Result<Value, ToolError> {
    let root = Path::new(path);
    let meta = fs::metadata(root).map_err(|e| ToolError::io(path, e))?;
    if !meta.is_dir() {
        return Err(ToolError::Failed(format!("{} is not a directory", path)));
    }

    let depth = max_depth.clamp(1, MAX_TREE_DEPTH);
    let mut entries = Vec::new();
    let mut unreadable = 0usize;
    let mut truncated = false;

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(depth)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => {
                unreadable += 1;
                continue;
            }
        };
        if entries.len() >= MAX_TREE_ENTRIES {
            truncated = true;
            break;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();
        if entry.file_type().is_dir() {
            entries.push(format!("{}/", relative));
        } else {
            entries.push(relative);
        }
    }

    Ok(json!({
        "path": path,
        "max_depth": depth,
        "entries": entries,
        "truncated": truncated,
        "unreadable": unreadable,
    }))
}

pub fn check_file_exists(path: &str) -> Result<Value, ToolError> {
    let p = Path::new(path);
    let is_symlink = fs::symlink_metadata(p)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);

    match fs::metadata(p) {
        Ok(meta) => {
            let kind = if meta.is_dir() {
                "directory"
            } else if meta.is_file() {
                "file"
            } else {
                "other"
            };
            Ok(json!({
                "path": path,
                "exists": true,
                "type": kind,
                "is_symlink": is_symlink,
                "size_bytes": meta.len(),
            }))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(json!({
            "path": path,
            "exists": false,
            "is_symlink": is_symlink,
        })),
        Err(e) => Err(ToolError::io(path, e)),
    }
}

pub fn read_config_file(path: &str, max_lines: usize) -> Result<Value, ToolError> {
    if Path::new(path).is_dir() {
        return Err(ToolError::Failed(format!("{} is a directory", path)));
    }
    let file = File::open(path).map_err(|e| ToolError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    let mut truncated = false;

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| ToolError::io(path, e))?;
        if read == 0 {
            break;
        }
        if lines.len() == max_lines {
            truncated = true;
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        lines.push(line.trim_end_matches(|c: char| c == '\n' || c == '\r').to_string());
    }

    Ok(json!({
        "path": path,
        "lines_read": lines.len(),
        "truncated": truncated,
        "content": lines.join("\n"),
    }))
}

/// A port counts as in use when something accepts connections on localhost.
pub fn check_port_in_use(port: u16) -> Value {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let in_use = TcpStream::connect_timeout(&addr, PORT_PROBE_TIMEOUT).is_ok();
    json!({
        "port": port,
        "in_use": in_use,
    })
}

pub fn get_disk_space(path: &str) -> Result<Value, ToolError> {
    let target = fs::canonicalize(path).map_err(|e| ToolError::io(path, e))?;
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|d| target.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().components().count())
        .ok_or_else(|| ToolError::Failed(format!("no mounted filesystem holds {}", path)))?;

    let total = disk.total_space();
    let available = disk.available_space();
    let used = total.saturating_sub(available);
    let gib = |bytes: u64| (bytes as f64 / 1024f64.powi(3) * 100.0).round() / 100.0;
    let percent_used = if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64 * 1000.0).round() / 10.0
    };

    Ok(json!({
        "path": path,
        "mount_point": disk.mount_point().display().to_string(),
        "filesystem": disk.file_system().to_string_lossy(),
        "total_bytes": total,
        "available_bytes": available,
        "used_bytes": used,
        "total_gb": gib(total),
        "free_gb": gib(available),
        "percent_used": percent_used,
    }))
}

/// Probes without modifying anything visible: files are opened for append,
/// directories get an unnamed temporary file.
pub fn check_write_permission(path: &str) -> Result<Value, ToolError> {
    let p = Path::new(path);
    match fs::metadata(p) {
        Ok(meta) if meta.is_dir() => Ok(json!({
            "path": path,
            "exists": true,
            "type": "directory",
            "writable": tempfile::tempfile_in(p).is_ok(),
        })),
        Ok(_) => Ok(json!({
            "path": path,
            "exists": true,
            "type": "file",
            "writable": OpenOptions::new().append(true).open(p).is_ok(),
        })),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let parent = p
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let writable = parent.is_dir() && tempfile::tempfile_in(parent).is_ok();
            Ok(json!({
                "path": path,
                "exists": false,
                "parent": parent.display().to_string(),
                "writable": writable,
            }))
        }
        Err(e) => Err(ToolError::io(path, e)),
    }
}
