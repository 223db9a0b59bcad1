use std::fs;
use std::path::Path;

const KB: u64 = 1024;
const MB: u64 = 1024 * 1024;

pub fn get_size<P: AsRef<Path>>(path: P) -> Result<u64, std::io::Error> {
    let path = path.as_ref();
    let metadata = fs::metadata(path)?;

    if metadata.is_file() {
        Ok(metadata.len())
    } else if metadata.is_dir() {
        let mut total_size = 0;
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            total_size += get_size(entry.path())?;
        }
        Ok(total_size)
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "Not a file or directory",
        ))
    }
}

/// Human readable size in binary units, capped at megabytes.
pub fn format_size(size: u64) -> String {
    if size < KB {
        format!("{} B", size)
    } else if size < MB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{:.2} MB", size as f64 / MB as f64)
    }
}

/// Keeps artifact names to a safe character set.
pub fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        "backup".to_string()
    } else {
        sanitized
    }
}
