use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use tokio::time::Instant;

/// Tipo do valor armazenado. União fechada: dispatch sempre exaustivo.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(Bytes),
    Integer(i64),
    List(VecDeque<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
}

impl Value {
    /// Nome do tipo para logs e mensagens de erro.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
        }
    }
}

/// Entrada no store: valor + expiração opcional (clock monotônico).
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    pub expires_at: Option<Instant>,
}

impl Entry {
    pub fn new(value: Value, expires_at: Option<Instant>) -> Self {
        Self { value, expires_at }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|t| now >= t).unwrap_or(false)
    }
}
