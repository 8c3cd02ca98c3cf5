//! Line-delimited JSON messaging between a driver and a stub server process.
//!
//! Every message is a single JSON document followed by `\n`. The server reads its control
//! messages from stdin and writes `ready` and acknowledgement messages to stdout, so
//! nothing else may be written to stdout by the server process.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

#[derive(Error, Debug)]
pub enum Error {
    #[error("control channel I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot decode control message '{0}': {1}")]
    Decode(String, serde_json::Error),
    #[error("cannot encode control message: {0}")]
    Encode(serde_json::Error),
}

pub struct MessageReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R> MessageReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Reads the next message. Returns `Ok(None)` once the other side closed the channel.
    /// Blank lines are skipped. A line that cannot be decoded yields `Error::Decode`, after
    /// which the reader can still be used.
    pub async fn read<T: DeserializeOwned>(&mut self) -> Result<Option<T>, Error> {
        loop {
            let line = match self.lines.next_line().await? {
                Some(line) => line,
                None => return Ok(None),
            };

            if line.trim().is_empty() {
                continue;
            }

            return serde_json::from_str(&line)
                .map(Some)
                .map_err(|err| Error::Decode(line, err));
        }
    }
}

pub struct MessageWriter<W> {
    writer: W,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write<T: Serialize>(&mut self, message: &T) -> Result<(), Error> {
        let mut line = serde_json::to_vec(message).map_err(Error::Encode)?;
        line.push(b'\n');

        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), Error> {
        Ok(self.writer.shutdown().await?)
    }
}
