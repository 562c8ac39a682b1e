use bytes::{BufMut, Bytes, BytesMut};
use emberkv_common::ProtocolError;

/// Resposta do servidor no protocolo de linha.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `+<texto>\r\n`
    Simple(String),
    /// `:<n>\r\n`
    Integer(i64),
    /// `$<len>\r\n<bytes>\r\n`
    Bulk(Bytes),
    /// `$-1\r\n`
    Null,
    /// `-<KIND> <mensagem>\r\n`
    Error(String),
}

impl Reply {
    /// Codifica a resposta no buffer de saída.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Reply::Simple(s) => {
                dst.put_u8(b'+');
                dst.put(s.as_bytes());
                dst.put(&b"\r\n"[..]);
            }
            Reply::Integer(n) => {
                dst.put_u8(b':');
                dst.put(n.to_string().as_bytes());
                dst.put(&b"\r\n"[..]);
            }
            Reply::Bulk(data) => {
                dst.put_u8(b'$');
                dst.put(data.len().to_string().as_bytes());
                dst.put(&b"\r\n"[..]);
                dst.put(data.as_ref());
                dst.put(&b"\r\n"[..]);
            }
            Reply::Null => {
                dst.put(&b"$-1\r\n"[..]);
            }
            Reply::Error(msg) => {
                dst.put_u8(b'-');
                dst.put(msg.as_bytes());
                dst.put(&b"\r\n"[..]);
            }
        }
    }

    /// Helper: cria um Reply::Bulk a partir de &str.
    pub fn bulk(s: &str) -> Reply {
        Reply::Bulk(Bytes::from(s.to_string()))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

/// Faz o parse de uma resposta completa do início de `src`.
///
/// Retorna `Ok(None)` enquanto faltam bytes. Usado pelo cliente.
pub fn parse_reply(src: &[u8]) -> Result<Option<(Reply, usize)>, ProtocolError> {
    if src.is_empty() {
        return Ok(None);
    }
    let (line, next) = match get_line(src, 1) {
        Some(v) => v,
        None => return Ok(None),
    };

    match src[0] {
        b'+' => Ok(Some((
            Reply::Simple(String::from_utf8_lossy(line).into_owned()),
            next,
        ))),
        b'-' => Ok(Some((
            Reply::Error(String::from_utf8_lossy(line).into_owned()),
            next,
        ))),
        b':' => Ok(Some((Reply::Integer(parse_int(line)?), next))),
        b'$' => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some((Reply::Null, next)));
            }
            if len < 0 {
                return Err(ProtocolError::BadReply(format!(
                    "tamanho de bulk inválido: {len}"
                )));
            }
            let len = len as usize;
            let end = next + len;
            if end + 2 > src.len() {
                return Ok(None);
            }
            if &src[end..end + 2] != b"\r\n" {
                return Err(ProtocolError::BadReply("bulk sem terminador".into()));
            }
            Ok(Some((
                Reply::Bulk(Bytes::copy_from_slice(&src[next..end])),
                end + 2,
            )))
        }
        byte => Err(ProtocolError::BadReply(format!(
            "tipo de resposta inválido: {byte:#x}"
        ))),
    }
}

fn get_line(src: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let end = src.len();
    for i in start..end.saturating_sub(1) {
        if src[i] == b'\r' && src[i + 1] == b'\n' {
            return Some((&src[start..i], i + 2));
        }
    }
    None
}

fn parse_int(line: &[u8]) -> Result<i64, ProtocolError> {
    let s = std::str::from_utf8(line)
        .map_err(|_| ProtocolError::BadReply("inteiro inválido".into()))?;
    s.parse::<i64>()
        .map_err(|_| ProtocolError::BadReply(format!("'{s}' não é um inteiro")))
}
