pub mod cert;
pub mod csr;
pub mod key;
pub mod selection;
pub mod token;

use std::time::{SystemTime, UNIX_EPOCH};

use colored::Colorize;

use crate::error::CliResult;

pub fn done(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn fail(message: &str) {
    eprintln!("{} {}", "✗".red(), message.red());
}

fn yes_no(value: bool) -> colored::ColoredString {
    if value {
        "yes".green()
    } else {
        "no".yellow()
    }
}

/// RFC 3339 rendering of a certificate time
fn format_time(at: SystemTime) -> String {
    let secs = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    time::OffsetDateTime::from_unix_timestamp(secs)
        .ok()
        .and_then(|t| t.format(&time::format_description::well_known::Rfc3339).ok())
        .unwrap_or_else(|| secs.to_string())
}

/// Write `bytes` to `out`, or print them when they are text and no file is given
fn write_output(bytes: &[u8], out: Option<String>) -> CliResult<()> {
    match out {
        Some(path) => {
            std::fs::write(&path, bytes)?;
            done(&format!("Written to {}", path));
        }
        None => match std::str::from_utf8(bytes) {
            Ok(text) => print!("{}", text),
            Err(_) => println!("{}", hex::encode(bytes)),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(UNIX_EPOCH), "1970-01-01T00:00:00Z");
        assert_eq!(
            format_time(UNIX_EPOCH + Duration::from_secs(86_400)),
            "1970-01-02T00:00:00Z"
        );
    }

    #[test]
    fn test_write_output_to_file() {
        let dir = std::env::temp_dir().join(format!("signet-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.der");

        write_output(&[0x30, 0x00], Some(path.display().to_string())).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![0x30, 0x00]);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
