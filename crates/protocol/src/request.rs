use bytes::{BufMut, Bytes, BytesMut};
use emberkv_common::{MAX_REQUEST_SIZE, ProtocolError};

/// Extrai uma requisição completa do início de `src`.
///
/// Uma requisição é uma linha terminada em CRLF (LF sozinho é tolerado),
/// com argumentos separados por espaço/tab. Um argumento iniciado por `$`
/// usa a forma binária `$N\r\n<N bytes>`, que pode conter CR/LF no corpo.
///
/// Retorna `Ok(None)` se a linha ainda está incompleta, ou
/// `Ok(Some((argumentos, bytes consumidos)))` quando há uma linha inteira.
/// Linha vazia produz um vetor vazio de argumentos.
pub fn parse_request(src: &[u8]) -> Result<Option<(Vec<Bytes>, usize)>, ProtocolError> {
    let mut args = Vec::new();
    let mut pos = 0;

    loop {
        while pos < src.len() && matches!(src[pos], b' ' | b'\t') {
            pos += 1;
        }
        if pos >= src.len() {
            return Ok(None);
        }

        match src[pos] {
            b'\n' => return Ok(Some((args, pos + 1))),
            b'\r' => {
                if pos + 1 >= src.len() {
                    return Ok(None);
                }
                if src[pos + 1] != b'\n' {
                    return Err(ProtocolError::BadLineEnding);
                }
                return Ok(Some((args, pos + 2)));
            }
            b'$' => {
                let (arg, next) = match parse_escape(src, pos)? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                args.push(arg);
                pos = next;
                // Depois do escape só pode vir separador ou fim de linha.
                if pos >= src.len() {
                    return Ok(None);
                }
                if !matches!(src[pos], b' ' | b'\t' | b'\r' | b'\n') {
                    return Err(ProtocolError::BadEscape);
                }
            }
            _ => {
                let start = pos;
                while pos < src.len() && !matches!(src[pos], b' ' | b'\t' | b'\r' | b'\n') {
                    pos += 1;
                }
                if pos >= src.len() {
                    return Ok(None);
                }
                args.push(Bytes::copy_from_slice(&src[start..pos]));
            }
        }
    }
}

/// Parse de `$N\r\n<N bytes>` começando em `src[pos] == b'$'`.
fn parse_escape(src: &[u8], pos: usize) -> Result<Option<(Bytes, usize)>, ProtocolError> {
    let digits_start = pos + 1;
    let mut i = digits_start;
    while i < src.len() && src[i].is_ascii_digit() {
        i += 1;
    }
    if i >= src.len() {
        return Ok(None);
    }
    if i == digits_start {
        return Err(ProtocolError::BadEscape);
    }

    let text = std::str::from_utf8(&src[digits_start..i]).map_err(|_| ProtocolError::BadEscape)?;
    let len: u64 = text.parse().map_err(|_| ProtocolError::BadEscape)?;
    if len as usize > MAX_REQUEST_SIZE {
        return Err(ProtocolError::RequestTooLarge(len as usize));
    }
    let len = len as usize;

    if src[i] != b'\r' {
        return Err(ProtocolError::BadEscape);
    }
    if i + 1 >= src.len() {
        return Ok(None);
    }
    if src[i + 1] != b'\n' {
        return Err(ProtocolError::BadEscape);
    }

    let data_start = i + 2;
    let data_end = data_start + len;
    if data_end > src.len() {
        return Ok(None);
    }
    Ok(Some((
        Bytes::copy_from_slice(&src[data_start..data_end]),
        data_end,
    )))
}

/// Codifica argumentos como uma linha de requisição.
///
/// Argumentos vazios, com separadores/CR/LF, ou iniciados por `$` saem na
/// forma binária; os demais como tokens simples.
pub fn encode_request(args: &[Bytes], dst: &mut BytesMut) {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            dst.put_u8(b' ');
        }
        if needs_escape(arg) {
            dst.put_u8(b'$');
            dst.put(arg.len().to_string().as_bytes());
            dst.put(&b"\r\n"[..]);
            dst.put(arg.as_ref());
        } else {
            dst.put(arg.as_ref());
        }
    }
    dst.put(&b"\r\n"[..]);
}

fn needs_escape(arg: &[u8]) -> bool {
    arg.is_empty()
        || arg[0] == b'$'
        || arg
            .iter()
            .any(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
}
