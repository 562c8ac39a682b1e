use bytes::Bytes;
use emberkv_common::CommandError;

use crate::args::Args;

/// Enum com todos os comandos suportados.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get(Bytes),
    Set {
        key: Bytes,
        value: Bytes,
        ttl_secs: Option<u64>,
    },
    Del(Bytes),
    Exists(Bytes),
    Expire {
        key: Bytes,
        seconds: u64,
    },
    Ttl(Bytes),
    Incr(Bytes),
    IncrBy {
        key: Bytes,
        delta: i64,
    },
    LPush {
        key: Bytes,
        element: Bytes,
    },
    RPush {
        key: Bytes,
        element: Bytes,
    },
    LPop(Bytes),
    RPop(Bytes),
    LLen(Bytes),
    HSet {
        key: Bytes,
        field: Bytes,
        value: Bytes,
    },
    HGet {
        key: Bytes,
        field: Bytes,
    },
    HDel {
        key: Bytes,
        field: Bytes,
    },
    Ping(Option<Bytes>),
    Echo(Bytes),
    DbSize,
    Shutdown,
    Unknown(String),
}

impl Command {
    /// Monta um Command a partir dos argumentos tokenizados.
    ///
    /// Aridade e limites de tamanho são validados aqui; o store confia no
    /// que recebe. Verbo desconhecido vira `Command::Unknown`, não erro.
    pub fn from_args(parts: Vec<Bytes>) -> Result<Command, CommandError> {
        let mut args = Args::new(parts);
        let verb = args.verb().to_string();

        let cmd = match verb.as_str() {
            "GET" => {
                let key = args.next_key()?;
                args.finish()?;
                Command::Get(key)
            }
            "SET" => parse_set(&mut args)?,
            "DEL" => {
                let key = args.next_key()?;
                args.finish()?;
                Command::Del(key)
            }
            "EXISTS" => {
                let key = args.next_key()?;
                args.finish()?;
                Command::Exists(key)
            }
            "EXPIRE" => {
                let key = args.next_key()?;
                let seconds = args.next_i64()?;
                args.finish()?;
                if seconds <= 0 {
                    return Err(CommandError::InvalidExpiry);
                }
                Command::Expire {
                    key,
                    seconds: seconds as u64,
                }
            }
            "TTL" => {
                let key = args.next_key()?;
                args.finish()?;
                Command::Ttl(key)
            }
            "INCR" => {
                let key = args.next_key()?;
                args.finish()?;
                Command::Incr(key)
            }
            "INCRBY" => {
                let key = args.next_key()?;
                let delta = args.next_i64()?;
                args.finish()?;
                Command::IncrBy { key, delta }
            }
            "LPUSH" => {
                let key = args.next_key()?;
                let element = args.next_value()?;
                args.finish()?;
                Command::LPush { key, element }
            }
            "RPUSH" => {
                let key = args.next_key()?;
                let element = args.next_value()?;
                args.finish()?;
                Command::RPush { key, element }
            }
            "LPOP" => {
                let key = args.next_key()?;
                args.finish()?;
                Command::LPop(key)
            }
            "RPOP" => {
                let key = args.next_key()?;
                args.finish()?;
                Command::RPop(key)
            }
            "LLEN" => {
                let key = args.next_key()?;
                args.finish()?;
                Command::LLen(key)
            }
            "HSET" => {
                let key = args.next_key()?;
                let field = args.next_key()?;
                let value = args.next_value()?;
                args.finish()?;
                Command::HSet { key, field, value }
            }
            "HGET" => {
                let key = args.next_key()?;
                let field = args.next_key()?;
                args.finish()?;
                Command::HGet { key, field }
            }
            "HDEL" => {
                let key = args.next_key()?;
                let field = args.next_key()?;
                args.finish()?;
                Command::HDel { key, field }
            }
            "PING" => {
                let msg = if args.has_remaining() {
                    Some(args.next_bytes()?)
                } else {
                    None
                };
                args.finish()?;
                Command::Ping(msg)
            }
            "ECHO" => {
                let msg = args.next_bytes()?;
                args.finish()?;
                Command::Echo(msg)
            }
            "DBSIZE" => {
                args.finish()?;
                Command::DbSize
            }
            "SHUTDOWN" => {
                args.finish()?;
                Command::Shutdown
            }
            _ => Command::Unknown(verb),
        };

        Ok(cmd)
    }
}

fn parse_set(args: &mut Args) -> Result<Command, CommandError> {
    let key = args.next_key()?;
    let value = args.next_value()?;
    let mut ttl_secs = None;

    while args.has_remaining() {
        let opt = args.next_bytes()?;
        match String::from_utf8_lossy(&opt).to_uppercase().as_str() {
            "EX" => {
                let secs = args.next_i64()?;
                if secs <= 0 {
                    return Err(CommandError::InvalidExpiry);
                }
                ttl_secs = Some(secs as u64);
            }
            other => {
                return Err(CommandError::InvalidSetOption(other.to_string()));
            }
        }
    }

    Ok(Command::Set {
        key,
        value,
        ttl_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberkv_common::MAX_KEY_SIZE;

    fn cmd(parts: &[&[u8]]) -> Result<Command, CommandError> {
        Command::from_args(parts.iter().map(|p| Bytes::copy_from_slice(p)).collect())
    }

    #[test]
    fn parse_get() {
        assert_eq!(cmd(&[b"GET", b"mykey"]).unwrap(), Command::Get(Bytes::from("mykey")));
    }

    #[test]
    fn parse_set_simple() {
        assert_eq!(
            cmd(&[b"SET", b"key", b"value"]).unwrap(),
            Command::Set {
                key: Bytes::from("key"),
                value: Bytes::from("value"),
                ttl_secs: None,
            }
        );
    }

    #[test]
    fn parse_set_with_ex() {
        match cmd(&[b"SET", b"key", b"value", b"EX", b"10"]).unwrap() {
            Command::Set { ttl_secs, .. } => assert_eq!(ttl_secs, Some(10)),
            other => panic!("esperado Set, veio {other:?}"),
        }
    }

    #[test]
    fn set_rejects_bad_expiry() {
        assert!(matches!(
            cmd(&[b"SET", b"k", b"v", b"EX", b"0"]),
            Err(CommandError::InvalidExpiry)
        ));
        assert!(matches!(
            cmd(&[b"SET", b"k", b"v", b"EX", b"-5"]),
            Err(CommandError::InvalidExpiry)
        ));
        assert!(matches!(
            cmd(&[b"SET", b"k", b"v", b"EX", b"abc"]),
            Err(CommandError::NotAnInteger(_))
        ));
        assert!(matches!(
            cmd(&[b"SET", b"k", b"v", b"NX"]),
            Err(CommandError::InvalidSetOption(_))
        ));
    }

    #[test]
    fn expire_rejects_non_positive_ttl() {
        assert!(matches!(
            cmd(&[b"EXPIRE", b"k", b"0"]),
            Err(CommandError::InvalidExpiry)
        ));
        assert!(matches!(
            cmd(&[b"EXPIRE", b"k", b"-1"]),
            Err(CommandError::InvalidExpiry)
        ));
    }

    #[test]
    fn parse_incrby_negative_delta() {
        assert_eq!(
            cmd(&[b"INCRBY", b"c", b"-7"]).unwrap(),
            Command::IncrBy {
                key: Bytes::from("c"),
                delta: -7,
            }
        );
    }

    #[test]
    fn parse_list_commands() {
        assert_eq!(
            cmd(&[b"LPUSH", b"fila", b"job"]).unwrap(),
            Command::LPush {
                key: Bytes::from("fila"),
                element: Bytes::from("job"),
            }
        );
        assert_eq!(cmd(&[b"RPOP", b"fila"]).unwrap(), Command::RPop(Bytes::from("fila")));
        assert_eq!(cmd(&[b"LLEN", b"fila"]).unwrap(), Command::LLen(Bytes::from("fila")));
    }

    #[test]
    fn parse_hash_commands() {
        assert_eq!(
            cmd(&[b"HSET", b"u", b"nome", b"alice"]).unwrap(),
            Command::HSet {
                key: Bytes::from("u"),
                field: Bytes::from("nome"),
                value: Bytes::from("alice"),
            }
        );
        assert_eq!(
            cmd(&[b"HDEL", b"u", b"nome"]).unwrap(),
            Command::HDel {
                key: Bytes::from("u"),
                field: Bytes::from("nome"),
            }
        );
    }

    #[test]
    fn parse_ping_with_and_without_message() {
        assert_eq!(cmd(&[b"PING"]).unwrap(), Command::Ping(None));
        assert_eq!(
            cmd(&[b"PING", b"oi"]).unwrap(),
            Command::Ping(Some(Bytes::from("oi")))
        );
    }

    #[test]
    fn case_insensitive_verbs() {
        assert_eq!(cmd(&[b"ping"]).unwrap(), Command::Ping(None));
        match cmd(&[b"set", b"k", b"v", b"ex", b"5"]).unwrap() {
            Command::Set { ttl_secs, .. } => assert_eq!(ttl_secs, Some(5)),
            other => panic!("esperado Set, veio {other:?}"),
        }
    }

    #[test]
    fn unknown_verb_is_not_an_error() {
        assert_eq!(cmd(&[b"FOOBAR"]).unwrap(), Command::Unknown("FOOBAR".into()));
    }

    #[test]
    fn wrong_arity() {
        assert!(matches!(cmd(&[b"GET"]), Err(CommandError::WrongArity(_))));
        assert!(matches!(
            cmd(&[b"GET", b"a", b"b"]),
            Err(CommandError::WrongArity(_))
        ));
        assert!(matches!(
            cmd(&[b"HSET", b"k", b"f"]),
            Err(CommandError::WrongArity(_))
        ));
        assert!(matches!(
            cmd(&[b"SHUTDOWN", b"agora"]),
            Err(CommandError::WrongArity(_))
        ));
    }

    #[test]
    fn key_limits_enforced() {
        let big = vec![b'x'; MAX_KEY_SIZE + 1];
        let r = Command::from_args(vec![Bytes::from("GET"), Bytes::from(big)]);
        assert!(matches!(r, Err(CommandError::KeySize(_))));
    }

    #[test]
    fn tokenized_request_to_command() {
        // Fluxo completo: bytes da rede → tokens → comando
        let (parts, _) = crate::parse_request(b"SET chave $10\r\nbin\r\ndado! EX 60\r\n")
            .unwrap()
            .unwrap();
        match Command::from_args(parts).unwrap() {
            Command::Set {
                key,
                value,
                ttl_secs,
            } => {
                assert_eq!(key, Bytes::from("chave"));
                assert_eq!(value, Bytes::from(&b"bin\r\ndado!"[..]));
                assert_eq!(ttl_secs, Some(60));
            }
            other => panic!("esperado Set, veio {other:?}"),
        }
    }
}
