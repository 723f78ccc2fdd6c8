//! Async client for the wire protocol. One request in flight per connection.

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::backend::QueryResult;
use crate::dispatcher::FlightInfo;
use crate::error::{FlightSqlError, Result};
use crate::protocol::command::{
    Command, DoPutUpdateResult, PreparedStatementCreated, ACTION_CLOSE_PREPARED_STATEMENT,
    ACTION_CREATE_PREPARED_STATEMENT,
};
use crate::protocol::ipc::{decode_schema, decode_stream, encode_stream};
use crate::protocol::messages::{parse_header, BackendMessage, FrontendMessage, ProtocolError, HEADER_LEN};

/// A prepared statement as seen by the client.
#[derive(Debug, Clone)]
pub struct PreparedHandle {
    pub handle: String,
    pub dataset_schema: SchemaRef,
    pub parameter_schema: SchemaRef,
}

pub struct FlightSqlClient {
    stream: TcpStream,
}

fn unexpected(msg: &BackendMessage) -> FlightSqlError {
    ProtocolError::InvalidFormat(format!("Unexpected response: {:?}", msg)).into()
}

impl FlightSqlClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self { stream })
    }

    async fn read_response(&mut self) -> Result<BackendMessage> {
        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header).await?;
        let (_, body_len) = parse_header(&header)?;
        let mut frame = header.to_vec();
        frame.resize(HEADER_LEN + body_len, 0);
        self.stream.read_exact(&mut frame[HEADER_LEN..]).await?;
        Ok(BackendMessage::parse(&Bytes::from(frame))?)
    }

    /// Send one frame and wait for its reply. Error frames come back as `Err`.
    async fn request(&mut self, msg: FrontendMessage) -> Result<BackendMessage> {
        self.stream.write_all(&msg.serialize()).await?;
        match self.read_response().await? {
            BackendMessage::ErrorResponse { code, message } => {
                Err(FlightSqlError::from_code(&code, message))
            }
            other => Ok(other),
        }
    }

    pub async fn get_flight_info(&mut self, command: &Command) -> Result<FlightInfo> {
        match self.request(FrontendMessage::GetFlightInfo { command: command.encode() }).await? {
            BackendMessage::FlightInfo { schema, ticket, total_records, total_bytes } => Ok(FlightInfo {
                schema: decode_schema(&schema)?,
                ticket,
                total_records,
                total_bytes,
            }),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn do_get(&mut self, ticket: &[u8]) -> Result<QueryResult> {
        match self.request(FrontendMessage::DoGet { ticket: ticket.to_vec() }).await? {
            BackendMessage::DataStream { data } => {
                let (schema, batches) = decode_stream(&data)?;
                Ok(QueryResult { schema, batches })
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Upload parameter batches (possibly none) and return the put metadata.
    pub async fn do_put(&mut self, command: &Command, batches: &[RecordBatch]) -> Result<Vec<u8>> {
        let data = match batches.first() {
            Some(first) => encode_stream(&first.schema(), batches)?,
            None => Vec::new(),
        };
        match self.request(FrontendMessage::DoPut { command: command.encode(), data }).await? {
            BackendMessage::PutResult { app_metadata } => Ok(app_metadata),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn do_action(&mut self, action_type: &str, command: &Command) -> Result<Vec<u8>> {
        let msg = FrontendMessage::DoAction { action_type: action_type.to_string(), body: command.encode() };
        match self.request(msg).await? {
            BackendMessage::ActionResult { body } => Ok(body),
            other => Err(unexpected(&other)),
        }
    }

    /// `GetFlightInfo` followed by `DoGet` on the returned ticket.
    pub async fn fetch(&mut self, command: &Command) -> Result<QueryResult> {
        let info = self.get_flight_info(command).await?;
        self.do_get(&info.ticket).await
    }

    pub async fn execute(&mut self, query: &str) -> Result<QueryResult> {
        self.fetch(&Command::StatementQuery { query: query.to_string() }).await
    }

    pub async fn execute_update(&mut self, query: &str) -> Result<i64> {
        let command = Command::StatementUpdate { query: query.to_string() };
        let metadata = self.do_put(&command, &[]).await?;
        Ok(DoPutUpdateResult::decode(&metadata)?.record_count)
    }

    pub async fn prepare(&mut self, query: &str) -> Result<PreparedHandle> {
        let command = Command::PreparedStatementCreate { query: query.to_string() };
        let body = self.do_action(ACTION_CREATE_PREPARED_STATEMENT, &command).await?;
        let created = PreparedStatementCreated::decode(&body)?;
        Ok(PreparedHandle {
            handle: created.handle,
            dataset_schema: decode_schema(&created.dataset_schema)?,
            parameter_schema: decode_schema(&created.parameter_schema)?,
        })
    }

    /// Bind `parameters` (if any) and run the prepared query.
    pub async fn execute_prepared(
        &mut self,
        handle: &str,
        parameters: &[RecordBatch],
    ) -> Result<QueryResult> {
        let command = Command::PreparedStatementQuery { handle: handle.to_string() };
        if !parameters.is_empty() {
            self.do_put(&command, parameters).await?;
        }
        self.fetch(&command).await
    }

    pub async fn execute_prepared_update(
        &mut self,
        handle: &str,
        parameters: &[RecordBatch],
    ) -> Result<i64> {
        let command = Command::PreparedStatementUpdate { handle: handle.to_string() };
        let metadata = self.do_put(&command, parameters).await?;
        Ok(DoPutUpdateResult::decode(&metadata)?.record_count)
    }

    pub async fn close_prepared(&mut self, handle: &str) -> Result<()> {
        let command = Command::PreparedStatementClose { handle: handle.to_string() };
        self.do_action(ACTION_CLOSE_PREPARED_STATEMENT, &command).await?;
        Ok(())
    }

    /// Say goodbye and drop the connection.
    pub async fn close(mut self) -> Result<()> {
        self.stream.write_all(&FrontendMessage::Terminate.serialize()).await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}
