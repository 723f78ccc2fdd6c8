use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::backend::SqliteBackend;
use crate::config::ServerConfig;
use crate::dispatcher::FlightSqlService;
use crate::error::{FlightSqlError, Result};
use crate::protocol::ipc::{decode_stream, encode_schema, encode_stream};
use crate::protocol::messages::{
    parse_header, BackendMessage, FrontendMessage, ProtocolError, HEADER_LEN,
};
use crate::protocol::Command;

pub struct FlightSqlServer {
    service: Arc<FlightSqlService>,
    addr: String,
}

impl FlightSqlServer {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let backend = SqliteBackend::new(&config.db_path)?;
        if config.seed {
            backend.seed_example_tables()?;
        }
        Ok(Self {
            service: Arc::new(FlightSqlService::new(Arc::new(backend))),
            addr: config.addr.clone(),
        })
    }

    pub async fn run(&self) -> std::result::Result<(), String> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| format!("Failed to bind: {}", e))?;
        tracing::info!("flightsqlite listening on {}", self.addr);
        serve(listener, self.service.clone()).await
    }
}

/// Accept connections forever, one task per connection.
pub async fn serve(listener: TcpListener, service: Arc<FlightSqlService>) -> std::result::Result<(), String> {
    loop {
        let (stream, addr) = listener.accept().await.map_err(|e| format!("Accept error: {}", e))?;
        tracing::info!("New connection from {}", addr);

        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, service).await {
                tracing::error!("Connection error: {}", e);
            }
        });
    }
}

/// Public wrapper for integration tests
pub async fn handle_connection_public(
    stream: TcpStream,
    service: Arc<FlightSqlService>,
) -> std::result::Result<(), String> {
    handle_connection(stream, service).await
}

async fn send(stream: &mut TcpStream, msg: &BackendMessage) -> std::result::Result<(), String> {
    stream.write_all(&msg.serialize()).await.map_err(|e| format!("Write error: {}", e))
}

fn error_response(err: &FlightSqlError) -> BackendMessage {
    BackendMessage::ErrorResponse { code: err.code().to_string(), message: err.to_string() }
}

async fn handle_connection(
    mut stream: TcpStream,
    service: Arc<FlightSqlService>,
) -> std::result::Result<(), String> {
    loop {
        let mut header = [0u8; HEADER_LEN];
        match stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::info!("Client disconnected");
                return Ok(());
            }
            Err(e) => return Err(format!("Read error: {}", e)),
        }

        let body_len = match parse_header(&header) {
            Ok((_, body_len)) => body_len,
            Err(ProtocolError::TooLarge(len)) => {
                // skip the body so the next frame lines up
                let mut rest = (&mut stream).take((len - 4) as u64);
                tokio::io::copy(&mut rest, &mut tokio::io::sink())
                    .await
                    .map_err(|e| format!("Read body error: {}", e))?;
                send(&mut stream, &error_response(&ProtocolError::TooLarge(len).into())).await?;
                continue;
            }
            Err(e) => {
                // a bad length leaves no way to find the next frame
                let err = FlightSqlError::from(e);
                let _ = send(&mut stream, &error_response(&err)).await;
                return Err(err.to_string());
            }
        };

        let mut full_msg = Vec::with_capacity(HEADER_LEN + body_len);
        full_msg.extend_from_slice(&header);
        full_msg.resize(HEADER_LEN + body_len, 0);
        if body_len > 0 {
            stream
                .read_exact(&mut full_msg[HEADER_LEN..])
                .await
                .map_err(|e| format!("Read body error: {}", e))?;
        }

        let msg = match FrontendMessage::parse(&Bytes::from(full_msg)) {
            Ok(FrontendMessage::Terminate) => {
                tracing::info!("Client terminated");
                return Ok(());
            }
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Parse error: {}", e);
                send(&mut stream, &error_response(&e.into())).await?;
                continue;
            }
        };

        let worker = service.clone();
        let response = match tokio::task::spawn_blocking(move || dispatch(&worker, msg)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                tracing::warn!(code = err.code(), "Request failed: {}", err);
                error_response(&err)
            }
            Err(join) => error_response(&FlightSqlError::Engine(format!("Worker failed: {}", join))),
        };
        send(&mut stream, &response).await?;
    }
}

/// Answer one request frame. Runs on the blocking pool.
fn dispatch(service: &FlightSqlService, msg: FrontendMessage) -> Result<BackendMessage> {
    match msg {
        FrontendMessage::GetFlightInfo { command } => {
            let info = service.get_flight_info(&Command::decode(&command)?)?;
            Ok(BackendMessage::FlightInfo {
                schema: encode_schema(&info.schema)?,
                ticket: info.ticket,
                total_records: info.total_records,
                total_bytes: info.total_bytes,
            })
        }
        FrontendMessage::DoGet { ticket } => {
            let result = service.do_get(&ticket)?;
            Ok(BackendMessage::DataStream { data: encode_stream(&result.schema, &result.batches)? })
        }
        FrontendMessage::DoPut { command, data } => {
            let command = Command::decode(&command)?;
            let batches = if data.is_empty() { Vec::new() } else { decode_stream(&data)?.1 };
            Ok(BackendMessage::PutResult { app_metadata: service.do_put(&command, &batches)? })
        }
        FrontendMessage::DoAction { action_type, body } => {
            Ok(BackendMessage::ActionResult { body: service.do_action(&action_type, &body)? })
        }
        FrontendMessage::Terminate => {
            Err(FlightSqlError::InvalidArgument("Terminate has no reply".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    async fn start_test_server() -> u16 {
        let backend = SqliteBackend::new(":memory:").unwrap();
        backend.seed_example_tables().unwrap();
        let service = Arc::new(FlightSqlService::new(Arc::new(backend)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(serve(listener, service));
        port
    }

    async fn read_response(stream: &mut TcpStream) -> BackendMessage {
        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).await.unwrap();
        let (_, body_len) = parse_header(&header).unwrap();
        let mut full = header.to_vec();
        full.resize(HEADER_LEN + body_len, 0);
        stream.read_exact(&mut full[HEADER_LEN..]).await.unwrap();
        BackendMessage::parse(&Bytes::from(full)).unwrap()
    }

    async fn send_request(stream: &mut TcpStream, msg: FrontendMessage) {
        stream.write_all(&msg.serialize()).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_answers_flight_info() {
        let port = start_test_server().await;
        let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).await.unwrap();
        send_request(&mut stream, FrontendMessage::GetFlightInfo { command: Command::GetTableTypes.encode() })
            .await;
        match read_response(&mut stream).await {
            BackendMessage::FlightInfo { ticket, .. } => assert_eq!(ticket, Command::GetTableTypes.encode()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_keeps_connection() {
        let port = start_test_server().await;
        let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).await.unwrap();

        let bad = Command::StatementQuery { query: "SELECT * FROM nonexistent".into() };
        send_request(&mut stream, FrontendMessage::DoGet { ticket: bad.encode() }).await;
        match read_response(&mut stream).await {
            BackendMessage::ErrorResponse { code, message } => {
                assert_eq!(code, "INTERNAL");
                assert!(message.contains("no such table"), "{}", message);
            }
            other => panic!("unexpected {:?}", other),
        }

        let good = Command::StatementQuery { query: "SELECT 1".into() };
        send_request(&mut stream, FrontendMessage::DoGet { ticket: good.encode() }).await;
        assert!(matches!(read_response(&mut stream).await, BackendMessage::DataStream { .. }));
    }

    #[tokio::test]
    async fn test_server_rejects_unknown_frame_type() {
        let port = start_test_server().await;
        let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).await.unwrap();

        let mut buf = BytesMut::new();
        buf.put_u8(b'Z');
        buf.put_i32(4);
        stream.write_all(&buf).await.unwrap();
        match read_response(&mut stream).await {
            BackendMessage::ErrorResponse { code, .. } => assert_eq!(code, "PROTOCOL"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_terminate() {
        let port = start_test_server().await;
        let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).await.unwrap();
        send_request(&mut stream, FrontendMessage::Terminate).await;

        let mut resp = [0u8; 1];
        let result = stream.read(&mut resp).await.unwrap();
        assert_eq!(result, 0);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let port = start_test_server().await;
        let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).await.unwrap();

        let mut buf = BytesMut::new();
        buf.put_u8(b'G');
        buf.put_i32(200 * 1024 * 1024);
        stream.write_all(&buf).await.unwrap();
        stream.shutdown().await.unwrap();

        // the server drains until EOF, so the reply may or may not arrive
        let mut response = vec![0u8; 512];
        let n = stream.read(&mut response).await.unwrap_or(0);
        if n > 0 {
            assert_eq!(response[0], b'E', "Expected ErrorResponse for oversized frame");
        }
    }
}
