use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::time::timeout;

use emberkv_common::{
    ConnectionError, INITIAL_BUFFER_CAPACITY, MAX_REQUEST_SIZE, ProtocolError, WRITE_TIMEOUT_SECS,
};
use emberkv_protocol::{Reply, parse_request};

/// Wrapper sobre TcpStream com buffers de leitura/escrita do protocolo de
/// linha.
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
    out: BytesMut,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            out: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Lê uma requisição completa do stream. Retorna `None` no EOF limpo;
    /// EOF no meio de uma requisição é reset.
    pub async fn read_request(&mut self) -> Result<Option<Vec<Bytes>>, ConnectionError> {
        loop {
            if let Some((args, used)) = parse_request(&self.buffer)? {
                self.buffer.advance(used);
                return Ok(Some(args));
            }

            if self.buffer.len() > MAX_REQUEST_SIZE {
                return Err(ConnectionError::Protocol(ProtocolError::RequestTooLarge(
                    self.buffer.len(),
                )));
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ConnectionError::ConnectionReset);
            }
        }
    }

    /// Escreve uma resposta no stream, com timeout para não prender o
    /// handler num peer que parou de ler.
    pub async fn write_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        self.out.clear();
        reply.encode(&mut self.out);
        let write = async {
            self.stream.write_all(&self.out).await?;
            self.stream.flush().await
        };
        match timeout(Duration::from_secs(WRITE_TIMEOUT_SECS), write).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}
