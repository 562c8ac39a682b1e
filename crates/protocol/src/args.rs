use bytes::Bytes;
use emberkv_common::{CommandError, MAX_KEY_SIZE, MAX_VALUE_SIZE};

/// Cursor sobre os argumentos de uma requisição tokenizada.
///
/// O primeiro token é o verbo; os demais são consumidos em sequência com
/// validação de tamanho embutida.
pub(crate) struct Args {
    parts: Vec<Bytes>,
    pos: usize,
    verb: String,
}

impl Args {
    pub(crate) fn new(parts: Vec<Bytes>) -> Args {
        let verb = parts
            .first()
            .map(|v| String::from_utf8_lossy(v).to_uppercase())
            .unwrap_or_default();
        Args {
            parts,
            pos: 1,
            verb,
        }
    }

    pub(crate) fn verb(&self) -> &str {
        &self.verb
    }

    pub(crate) fn next_bytes(&mut self) -> Result<Bytes, CommandError> {
        if self.pos >= self.parts.len() {
            return Err(CommandError::WrongArity(self.verb.clone()));
        }
        let arg = self.parts[self.pos].clone();
        self.pos += 1;
        Ok(arg)
    }

    /// Próximo argumento validado como chave ou campo (1 a 512 bytes).
    pub(crate) fn next_key(&mut self) -> Result<Bytes, CommandError> {
        let key = self.next_bytes()?;
        if key.is_empty() || key.len() > MAX_KEY_SIZE {
            return Err(CommandError::KeySize(key.len()));
        }
        Ok(key)
    }

    /// Próximo argumento validado como valor (até 64 KiB).
    pub(crate) fn next_value(&mut self) -> Result<Bytes, CommandError> {
        let value = self.next_bytes()?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(CommandError::ValueSize(value.len()));
        }
        Ok(value)
    }

    pub(crate) fn next_i64(&mut self) -> Result<i64, CommandError> {
        let raw = self.next_bytes()?;
        let s = std::str::from_utf8(&raw)
            .map_err(|_| CommandError::NotAnInteger(String::from_utf8_lossy(&raw).into_owned()))?;
        s.parse::<i64>()
            .map_err(|_| CommandError::NotAnInteger(s.to_string()))
    }

    /// Verifica se todos os argumentos foram consumidos.
    pub(crate) fn finish(&self) -> Result<(), CommandError> {
        if self.pos < self.parts.len() {
            Err(CommandError::WrongArity(self.verb.clone()))
        } else {
            Ok(())
        }
    }

    pub(crate) fn has_remaining(&self) -> bool {
        self.pos < self.parts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(parts: &[&[u8]]) -> Args {
        Args::new(parts.iter().map(|p| Bytes::copy_from_slice(p)).collect())
    }

    #[test]
    fn extracts_in_order() {
        let mut args = args_of(&[b"SET", b"key", b"value"]);
        assert_eq!(args.verb(), "SET");
        assert_eq!(args.next_key().unwrap(), Bytes::from("key"));
        assert_eq!(args.next_value().unwrap(), Bytes::from("value"));
        args.finish().unwrap();
    }

    #[test]
    fn missing_argument_is_wrong_arity() {
        let mut args = args_of(&[b"GET"]);
        assert!(matches!(
            args.next_key(),
            Err(CommandError::WrongArity(v)) if v == "GET"
        ));
    }

    #[test]
    fn extra_argument_fails_finish() {
        let mut args = args_of(&[b"PING", b"a", b"b"]);
        args.next_bytes().unwrap();
        args.next_bytes().unwrap();
        args.finish().unwrap();

        let args = args_of(&[b"TTL", b"k", b"sobra"]);
        assert!(args.finish().is_err());
    }

    #[test]
    fn key_size_bounds() {
        let mut args = args_of(&[b"GET", b""]);
        assert!(matches!(args.next_key(), Err(CommandError::KeySize(0))));

        let big = vec![b'k'; MAX_KEY_SIZE + 1];
        let mut args = Args::new(vec![Bytes::from("GET"), Bytes::from(big)]);
        assert!(matches!(args.next_key(), Err(CommandError::KeySize(_))));

        let max = vec![b'k'; MAX_KEY_SIZE];
        let mut args = Args::new(vec![Bytes::from("GET"), Bytes::from(max)]);
        assert!(args.next_key().is_ok());
    }

    #[test]
    fn value_size_bound() {
        let big = vec![b'v'; MAX_VALUE_SIZE + 1];
        let mut args = Args::new(vec![Bytes::from("SET"), Bytes::from(big)]);
        assert!(matches!(args.next_value(), Err(CommandError::ValueSize(_))));
    }

    #[test]
    fn integer_parsing() {
        let mut args = args_of(&[b"INCRBY", b"-42"]);
        assert_eq!(args.next_i64().unwrap(), -42);

        let mut args = args_of(&[b"INCRBY", b"abc"]);
        assert!(matches!(args.next_i64(), Err(CommandError::NotAnInteger(_))));
    }
}
