//! Client for the spreadsheet bridge (JSONL over TCP localhost)
//!
//! One connection per session. Requests are written one line at a time and
//! replies are matched by id. A reply that arrives after its request timed
//! out is skipped by the next request, so one slow answer does not poison
//! the connection.

use async_trait::async_trait;
use calcpilot_core::{CalcError, CellRef, Result, SessionSettings};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::protocol::{
    BridgeReply, BridgeRequest, CellContent, DocumentInfo, ReplyEnvelope, RequestEnvelope,
    SessionInfo, SheetOp, CLIENT_NAME, PROTOCOL_VERSION,
};
use crate::session::CalcSession;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Partial reply line kept across a timed-out read
    pending: Vec<u8>,
}

impl Connection {
    /// Next complete reply line, or `None` once the bridge hung up
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        // read_until keeps partial data in `pending` when cancelled
        let read = self.reader.read_until(b'\n', &mut self.pending).await?;
        if read == 0 && self.pending.is_empty() {
            return Ok(None);
        }
        let line = std::mem::take(&mut self.pending);
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    /// Send one request line and wait for the reply carrying `id`
    async fn exchange(&mut self, line: &str, id: u64) -> Result<Option<ReplyEnvelope>> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        loop {
            let Some(reply) = self.next_line().await? else {
                return Ok(None);
            };
            let reply = reply.trim_end();
            let envelope: ReplyEnvelope = serde_json::from_str(reply).map_err(|e| {
                CalcError::Protocol(format!("Malformed reply '{}': {}", reply, e))
            })?;

            if envelope.id < id {
                debug!("Skipping late reply {} while waiting for {}", envelope.id, id);
                continue;
            }
            return Ok(Some(envelope));
        }
    }
}

/// A connection to a running spreadsheet bridge
pub struct BridgeSession {
    endpoint: String,
    request_timeout: Duration,
    connection: Mutex<Connection>,
    next_id: AtomicU64,
    info: SessionInfo,
}

impl BridgeSession {
    /// Connect to the bridge and perform the hello handshake
    pub async fn connect(settings: &SessionSettings) -> Result<Self> {
        let endpoint = settings.endpoint.clone();
        let connect_timeout = Duration::from_secs(settings.connect_timeout_secs);

        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| {
                CalcError::SessionUnavailable(format!(
                    "Timed out connecting to {} after {:?}",
                    endpoint, connect_timeout
                ))
            })?
            .map_err(|e| {
                CalcError::SessionUnavailable(format!("Failed to connect to {}: {}", endpoint, e))
            })?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let mut session = Self {
            endpoint,
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            connection: Mutex::new(Connection {
                reader: BufReader::new(read_half),
                writer: write_half,
                pending: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
            info: SessionInfo {
                application: String::new(),
                protocol_version: PROTOCOL_VERSION,
            },
        };

        let reply = session
            .request(BridgeRequest::Hello {
                client: CLIENT_NAME.to_string(),
                protocol_version: PROTOCOL_VERSION,
            })
            .await?;

        match reply {
            BridgeReply::Welcome(info) => {
                if info.protocol_version != PROTOCOL_VERSION {
                    return Err(CalcError::Protocol(format!(
                        "Bridge speaks protocol v{}, expected v{}",
                        info.protocol_version, PROTOCOL_VERSION
                    )));
                }
                debug!("Connected to {} at {}", info.application, session.endpoint);
                session.info = info;
                Ok(session)
            }
            other => Err(unexpected("welcome", &other)),
        }
    }

    /// Handshake details reported by the bridge
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn request(&self, request: BridgeRequest) -> Result<BridgeReply> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&RequestEnvelope { id, request })?;
        line.push('\n');

        let mut connection = self.connection.lock().await;

        let envelope = tokio::time::timeout(self.request_timeout, connection.exchange(&line, id))
            .await
            .map_err(|_| {
                CalcError::Session(format!(
                    "No reply from {} within {:?}",
                    self.endpoint, self.request_timeout
                ))
            })?
            .map_err(|e| match e {
                CalcError::Io(e) => {
                    CalcError::SessionUnavailable(format!("{}: {}", self.endpoint, e))
                }
                other => other,
            })?;

        let Some(envelope) = envelope else {
            return Err(CalcError::SessionUnavailable(format!(
                "{} closed the connection",
                self.endpoint
            )));
        };

        if envelope.id != id {
            return Err(CalcError::Protocol(format!(
                "Reply id {} does not match request id {}",
                envelope.id, id
            )));
        }

        match envelope.reply {
            BridgeReply::Error { code, message } => {
                Err(CalcError::Session(format!("{} ({})", message, code)))
            }
            reply => Ok(reply),
        }
    }
}

fn unexpected(expected: &str, reply: &BridgeReply) -> CalcError {
    CalcError::Protocol(format!("Expected {} reply, got {:?}", expected, reply))
}

#[async_trait]
impl CalcSession for BridgeSession {
    async fn ping(&self) -> Result<()> {
        match self.request(BridgeRequest::Ping).await? {
            BridgeReply::Pong => Ok(()),
            other => Err(unexpected("pong", &other)),
        }
    }

    async fn current_document(&self) -> Result<DocumentInfo> {
        match self.request(BridgeRequest::CurrentDocument).await? {
            BridgeReply::Document(document) => Ok(document),
            other => Err(unexpected("document", &other)),
        }
    }

    async fn active_sheet(&self) -> Result<String> {
        match self.request(BridgeRequest::ActiveSheet).await? {
            BridgeReply::ActiveSheet { name } => Ok(name),
            other => Err(unexpected("active_sheet", &other)),
        }
    }

    async fn sheet_names(&self) -> Result<Vec<String>> {
        match self.request(BridgeRequest::SheetNames).await? {
            BridgeReply::SheetNames { names } => Ok(names),
            other => Err(unexpected("sheet_names", &other)),
        }
    }

    async fn sheet_count(&self) -> Result<usize> {
        match self.request(BridgeRequest::SheetCount).await? {
            BridgeReply::SheetCount { count } => Ok(count),
            other => Err(unexpected("sheet_count", &other)),
        }
    }

    async fn open_documents(&self) -> Result<Vec<DocumentInfo>> {
        match self.request(BridgeRequest::OpenDocuments).await? {
            BridgeReply::Documents { documents } => Ok(documents),
            other => Err(unexpected("documents", &other)),
        }
    }

    async fn read_cell(&self, cell: &CellRef) -> Result<CellContent> {
        let request = BridgeRequest::ReadCell {
            sheet: cell.sheet.clone(),
            cell: cell.cell.clone(),
        };
        match self.request(request).await? {
            BridgeReply::Cell(content) => Ok(content),
            other => Err(unexpected("cell", &other)),
        }
    }

    async fn apply(&self, op: &SheetOp) -> Result<()> {
        let request = BridgeRequest::Apply { op: op.clone() };
        match self.request(request).await? {
            BridgeReply::Applied => Ok(()),
            other => Err(unexpected("applied", &other)),
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
