use crate::error::{SyncError, SyncResult};
use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::Path,
    time::Duration,
};

const USER_AGENT: &str = concat!("packsync/", env!("CARGO_PKG_VERSION"));
const CHUNK_SIZE: usize = 8192;
const DRIVE_DOWNLOAD_URL: &str = "https://drive.google.com/uc?export=download&id=";

/// Called after every chunk with `(bytes_done, bytes_total)`.
pub type TransferCallback<'a> = &'a mut dyn FnMut(u64, Option<u64>);

pub fn drive_download_url(file_id: &str) -> String {
    format!("{DRIVE_DOWNLOAD_URL}{}", file_id.trim())
}

/// Streams `url` into `dest`, returning the number of bytes written.
pub fn fetch(url: &str, dest: &Path, progress: TransferCallback<'_>) -> SyncResult<u64> {
    let failed = |reason: String| SyncError::TransferFailed {
        url: url.to_string(),
        reason,
    };

    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(10))
        .timeout_read(Duration::from_secs(60))
        .build();
    tracing::info!("downloading bundle from {url}");
    let response = match agent.get(url).set("User-Agent", USER_AGENT).call() {
        Ok(response) => response,
        Err(ureq::Error::Status(code, response)) => {
            return Err(failed(format!("HTTP {code} {}", response.status_text())));
        }
        Err(err) => return Err(failed(err.to_string())),
    };

    let total = response
        .header("Content-Length")
        .and_then(|value| value.trim().parse::<u64>().ok());
    let file = File::create(dest).map_err(|err| failed(format!("create {dest:?}: {err}")))?;
    let mut writer = BufWriter::new(file);
    let mut reader = response.into_reader();
    let done = copy_with_progress(&mut reader, &mut writer, total, progress)
        .map_err(|err| failed(err.to_string()))?;
    writer
        .flush()
        .map_err(|err| failed(format!("write {dest:?}: {err}")))?;

    tracing::info!("downloaded {done} bytes");
    Ok(done)
}

fn copy_with_progress(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    total: Option<u64>,
    progress: TransferCallback<'_>,
) -> std::io::Result<u64> {
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut done = 0u64;
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        writer.write_all(&buffer[..read])?;
        done = done.saturating_add(read as u64);
        progress(done, total);
    }
    if done == 0 {
        progress(0, total);
    }
    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn drive_url_uses_direct_download_endpoint() {
        assert_eq!(
            drive_download_url(" abc123 "),
            "https://drive.google.com/uc?export=download&id=abc123"
        );
    }

    #[test]
    fn progress_is_reported_per_chunk_and_monotonic() {
        let payload = vec![7u8; CHUNK_SIZE * 2 + 100];
        let mut reader = Cursor::new(payload.clone());
        let mut out = Vec::new();
        let mut seen = Vec::new();
        let mut record = |done: u64, total: Option<u64>| seen.push((done, total));

        let done = copy_with_progress(
            &mut reader,
            &mut out,
            Some(payload.len() as u64),
            &mut record,
        )
        .unwrap();

        assert_eq!(done, payload.len() as u64);
        assert_eq!(out, payload);
        assert!(seen.len() >= 3);
        assert!(seen.windows(2).all(|pair| pair[0].0 < pair[1].0));
        assert_eq!(seen.last(), Some(&(payload.len() as u64, Some(payload.len() as u64))));
    }

    #[test]
    fn empty_body_still_reports_once() {
        let mut reader = Cursor::new(Vec::<u8>::new());
        let mut out = Vec::new();
        let mut calls = 0;
        let mut record = |_: u64, _: Option<u64>| calls += 1;
        copy_with_progress(&mut reader, &mut out, None, &mut record).unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn http_error_status_is_a_transfer_failure() {
        use std::io::{BufRead, BufReader};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            let mut stream = stream;
            stream
                .write_all(
                    b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nnot found",
                )
                .unwrap();
        });

        let dir = tempfile::TempDir::new().unwrap();
        let mut ignore = |_: u64, _: Option<u64>| {};
        let err = fetch(
            &format!("http://{addr}/mods.zip"),
            &dir.path().join("mods.zip"),
            &mut ignore,
        )
        .unwrap_err();
        server.join().unwrap();

        match err {
            SyncError::TransferFailed { reason, .. } => assert!(reason.contains("HTTP 404")),
            other => panic!("expected transfer failure, got {other:?}"),
        }
    }

    #[test]
    fn unreachable_host_is_a_transfer_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut ignore = |_: u64, _: Option<u64>| {};
        let err = fetch(
            "http://127.0.0.1:9/mods.zip",
            &dir.path().join("mods.zip"),
            &mut ignore,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::TransferFailed { .. }));
    }
}
