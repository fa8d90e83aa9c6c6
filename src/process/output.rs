use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Forward a child's output into the log, one event per line. Reads until
/// EOF so the child never writes into a closed or full pipe.
pub(crate) fn forward_output(
    service: String,
    stream: OutputStream,
    reader: Option<impl AsyncRead + Unpin + Send + 'static>,
) -> Option<JoinHandle<()>> {
    let reader = reader?;

    Some(tokio::spawn(async move {
        let result = read_lines(reader, |line| {
            info!(target: "service", service = %service, stream = stream.as_str(), "[{}] {}", service, line);
        })
        .await;

        if let Err(e) = result {
            warn!("Stopped reading {} of {}: {}", stream.as_str(), service, e);
        }
    }))
}

/// Hand every line of `reader` to `on_line`, without its line ending.
/// Bytes that are not UTF-8 are replaced rather than ending the stream.
/// Returns the number of lines read.
async fn read_lines(
    reader: impl AsyncRead + Unpin,
    mut on_line: impl FnMut(&str),
) -> std::io::Result<usize> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut count = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(count);
        }

        let line = String::from_utf8_lossy(&buf);
        on_line(line.trim_end_matches(['\n', '\r']));
        count += 1;
    }
}
