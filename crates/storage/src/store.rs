use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tracing::debug;

use emberkv_common::StoreError;

use crate::entry::{Entry, Value};
use crate::wal::{LogJob, Record, RecordOp, wall_now_ms};

/// Uma mutação completa do store. É a unidade que vai para o log de
/// persistência: o caminho ao vivo e o replay passam pelo mesmo `apply`.
///
/// TTLs aqui são sempre em milissegundos *restantes* no momento do apply;
/// o ajuste por downtime acontece no replay, antes de construir a mutação.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Set {
        key: Bytes,
        value: Bytes,
        ttl_ms: Option<u64>,
    },
    Del {
        key: Bytes,
    },
    Expire {
        key: Bytes,
        ttl_ms: u64,
    },
    Incr {
        key: Bytes,
        delta: i64,
    },
    PushFront {
        key: Bytes,
        element: Bytes,
    },
    PushBack {
        key: Bytes,
        element: Bytes,
    },
    PopFront {
        key: Bytes,
    },
    PopBack {
        key: Bytes,
    },
    HashSet {
        key: Bytes,
        field: Bytes,
        value: Bytes,
    },
    HashDel {
        key: Bytes,
        field: Bytes,
    },
}

/// Resultado de uma mutação aplicada.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done,
    Existed(bool),
    Int(i64),
    Len(usize),
    Popped(Option<Bytes>),
    FieldCreated(bool),
    FieldRemoved(bool),
}

impl Outcome {
    /// Indica se a mutação alterou estado. No-ops (DEL de chave ausente,
    /// pop em lista vazia) não geram registro no log.
    pub fn mutated(&self) -> bool {
        !matches!(
            self,
            Outcome::Existed(false) | Outcome::Popped(None) | Outcome::FieldRemoved(false)
        )
    }
}

/// Resposta de `ttl`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TtlState {
    Missing,
    Persistent,
    Remaining(Duration),
}

/// Estatísticas de uma rodada de amostragem do sweeper.
#[derive(Debug, Clone, Copy)]
pub struct SweepStats {
    pub sampled: usize,
    pub expired: usize,
}

struct State {
    entries: HashMap<Bytes, Entry>,
    // Índice swap-remove das chaves com expiração: amostragem O(1).
    ttl_keys: Vec<Bytes>,
    ttl_pos: HashMap<Bytes, usize>,
    next_seq: u64,
    log_tx: Option<mpsc::UnboundedSender<LogJob>>,
}

struct Shared {
    state: RwLock<State>,
    persist_failed: AtomicBool,
}

/// Handle para o store. `Clone` é barato (Arc); o lock único de
/// leitores/escritores guarda o mapa inteiro.
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

impl Store {
    pub fn new() -> Self {
        Store {
            shared: Arc::new(Shared {
                state: RwLock::new(State {
                    entries: HashMap::new(),
                    ttl_keys: Vec::new(),
                    ttl_pos: HashMap::new(),
                    next_seq: 1,
                    log_tx: None,
                }),
                persist_failed: AtomicBool::new(false),
            }),
        }
    }

    // --- leituras (lock compartilhado, reap preguiçoso sob lock exclusivo) ---

    /// GET: valor de String/Integer, `None` se ausente, WRONGTYPE para
    /// List/Hash. Uma entrada expirada é removida no caminho.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        let now = Instant::now();
        {
            let state = self.shared.state.read().unwrap();
            match state.entries.get(key) {
                None => return Ok(None),
                Some(e) if !e.is_expired(now) => {
                    return match &e.value {
                        Value::String(data) => Ok(Some(data.clone())),
                        Value::Integer(n) => Ok(Some(Bytes::from(n.to_string()))),
                        _ => Err(StoreError::WrongType),
                    };
                }
                Some(_) => {}
            }
        }
        self.reap(key, now);
        Ok(None)
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        let now = Instant::now();
        {
            let state = self.shared.state.read().unwrap();
            match state.entries.get(key) {
                None => return false,
                Some(e) if !e.is_expired(now) => return true,
                Some(_) => {}
            }
        }
        self.reap(key, now);
        false
    }

    pub fn ttl(&self, key: &[u8]) -> TtlState {
        let now = Instant::now();
        {
            let state = self.shared.state.read().unwrap();
            match state.entries.get(key) {
                None => return TtlState::Missing,
                Some(e) if !e.is_expired(now) => {
                    return match e.expires_at {
                        None => TtlState::Persistent,
                        Some(t) => TtlState::Remaining(t.saturating_duration_since(now)),
                    };
                }
                Some(_) => {}
            }
        }
        self.reap(key, now);
        TtlState::Missing
    }

    /// LLEN: chave ausente conta como lista vazia.
    pub fn llen(&self, key: &[u8]) -> Result<usize, StoreError> {
        let now = Instant::now();
        {
            let state = self.shared.state.read().unwrap();
            match state.entries.get(key) {
                None => return Ok(0),
                Some(e) if !e.is_expired(now) => {
                    return match &e.value {
                        Value::List(list) => Ok(list.len()),
                        _ => Err(StoreError::WrongType),
                    };
                }
                Some(_) => {}
            }
        }
        self.reap(key, now);
        Ok(0)
    }

    pub fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Bytes>, StoreError> {
        let now = Instant::now();
        {
            let state = self.shared.state.read().unwrap();
            match state.entries.get(key) {
                None => return Ok(None),
                Some(e) if !e.is_expired(now) => {
                    return match &e.value {
                        Value::Hash(map) => Ok(map.get(field).cloned()),
                        _ => Err(StoreError::WrongType),
                    };
                }
                Some(_) => {}
            }
        }
        self.reap(key, now);
        Ok(None)
    }

    /// DBSIZE: chaves residentes (pode incluir expiradas ainda não varridas).
    pub fn len(&self) -> usize {
        self.shared.state.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a chave se (ainda) estiver expirada. Checagem dupla: outra
    /// conexão pode ter sobrescrito entre o read lock e o write lock.
    fn reap(&self, key: &[u8], now: Instant) {
        let mut state = self.shared.state.write().unwrap();
        let expired = state
            .entries
            .get(key)
            .map(|e| e.is_expired(now))
            .unwrap_or(false);
        if expired {
            state.remove_entry(key);
            debug!(key = %String::from_utf8_lossy(key), "chave expirada removida no acesso");
        }
    }

    // --- escritas ---

    /// Aplica uma mutação sob o lock exclusivo. Se persistência está ativa e
    /// a mutação alterou estado, enfileira o registro (seq atribuído sob o
    /// lock, mantendo ordem do log = ordem das mutações) e devolve o
    /// receptor do ack de durabilidade, aguardado *fora* do lock.
    pub fn mutate(
        &self,
        m: Mutation,
    ) -> Result<(Outcome, Option<oneshot::Receiver<()>>), StoreError> {
        if self.shared.persist_failed.load(Ordering::Acquire) {
            return Err(StoreError::PersistenceFailed);
        }
        let mut state = self.shared.state.write().unwrap();
        let outcome = state.apply(&m, Instant::now())?;

        let mut ack_rx = None;
        if outcome.mutated() {
            if let Some(tx) = &state.log_tx {
                let seq = state.next_seq;
                let record = Record {
                    seq,
                    ts_ms: wall_now_ms(),
                    op: RecordOp::Mutation(m),
                };
                let (ack_tx, rx) = oneshot::channel();
                if tx.send(LogJob { record, ack: ack_tx }).is_err() {
                    // Writer morreu: persistência entra em Failed.
                    self.shared.persist_failed.store(true, Ordering::Release);
                    return Err(StoreError::PersistenceFailed);
                }
                state.next_seq = seq + 1;
                ack_rx = Some(rx);
            }
        }
        Ok((outcome, ack_rx))
    }

    /// Replay: aplica uma mutação sem atribuir seq nem reenfileirar no log.
    pub fn apply_replayed(&self, m: &Mutation) -> Result<Outcome, StoreError> {
        let mut state = self.shared.state.write().unwrap();
        state.apply(m, Instant::now())
    }

    /// Restaura uma entrada vinda de um registro de snapshot.
    pub fn restore(&self, key: Bytes, value: Value, ttl_ms: Option<u64>) {
        let mut state = self.shared.state.write().unwrap();
        let expires_at = ttl_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        if expires_at.is_some() {
            state.index_add(key.clone());
        } else {
            state.index_remove(&key);
        }
        state.entries.insert(key, Entry::new(value, expires_at));
    }

    /// Estado vivo com TTLs restantes em ms, para escrita de snapshot.
    /// Entradas expiradas são omitidas.
    pub fn dump(&self) -> Vec<(Bytes, Value, Option<u64>)> {
        let now = Instant::now();
        let state = self.shared.state.read().unwrap();
        state
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, e)| {
                let remaining = e
                    .expires_at
                    .map(|t| t.saturating_duration_since(now).as_millis() as u64);
                (k.clone(), e.value.clone(), remaining)
            })
            .collect()
    }

    // --- sweeper ---

    /// Uma rodada de amostragem: sorteia até `max` chaves do índice de TTLs
    /// e remove as expiradas. O lock é segurado só durante o lote.
    pub fn sweep_sample(&self, max: usize) -> SweepStats {
        let now = Instant::now();
        let mut rng = rand::thread_rng();
        let mut state = self.shared.state.write().unwrap();
        if state.ttl_keys.is_empty() {
            return SweepStats {
                sampled: 0,
                expired: 0,
            };
        }
        let sampled = max.min(state.ttl_keys.len());
        let mut expired = 0;
        for _ in 0..sampled {
            if state.ttl_keys.is_empty() {
                break;
            }
            let idx = rng.gen_range(0..state.ttl_keys.len());
            let key = state.ttl_keys[idx].clone();
            let stale = state
                .entries
                .get(&key[..])
                .map(|e| e.is_expired(now))
                .unwrap_or(true);
            if stale {
                state.remove_entry(&key[..]);
                expired += 1;
            }
        }
        SweepStats { sampled, expired }
    }

    // --- acoplamento com o log writer ---

    pub fn attach_log(&self, tx: mpsc::UnboundedSender<LogJob>) {
        self.shared.state.write().unwrap().log_tx = Some(tx);
    }

    /// Solta o sender do log; o writer drena a fila e encerra.
    pub fn detach_log(&self) {
        self.shared.state.write().unwrap().log_tx = None;
    }

    pub fn set_next_seq(&self, seq: u64) {
        self.shared.state.write().unwrap().next_seq = seq;
    }

    pub fn next_seq(&self) -> u64 {
        self.shared.state.read().unwrap().next_seq
    }

    pub fn mark_persist_failed(&self) {
        self.shared.persist_failed.store(true, Ordering::Release);
    }

    pub fn persist_failed(&self) -> bool {
        self.shared.persist_failed.load(Ordering::Acquire)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn apply(&mut self, m: &Mutation, now: Instant) -> Result<Outcome, StoreError> {
        match m {
            Mutation::Set { key, value, ttl_ms } => {
                let expires_at = ttl_ms.map(|ms| now + Duration::from_millis(ms));
                if expires_at.is_some() {
                    self.index_add(key.clone());
                } else {
                    // SET sem TTL limpa expiração anterior.
                    self.index_remove(key);
                }
                self.entries
                    .insert(key.clone(), Entry::new(Value::String(value.clone()), expires_at));
                Ok(Outcome::Done)
            }
            Mutation::Del { key } => {
                self.take_if_expired(key, now);
                Ok(Outcome::Existed(self.remove_entry(key).is_some()))
            }
            Mutation::Expire { key, ttl_ms } => {
                self.take_if_expired(key, now);
                let deadline = now + Duration::from_millis(*ttl_ms);
                match self.entries.get_mut(&key[..]) {
                    Some(e) => e.expires_at = Some(deadline),
                    None => return Err(StoreError::KeyNotFound),
                }
                self.index_add(key.clone());
                Ok(Outcome::Done)
            }
            Mutation::Incr { key, delta } => {
                self.take_if_expired(key, now);
                if let Some(e) = self.entries.get_mut(&key[..]) {
                    // A expiração da entrada é preservada: mutação in-place.
                    return match &mut e.value {
                        Value::Integer(n) => {
                            let new = n.checked_add(*delta).ok_or(StoreError::Overflow)?;
                            *n = new;
                            Ok(Outcome::Int(new))
                        }
                        _ => Err(StoreError::WrongType),
                    };
                }
                self.entries
                    .insert(key.clone(), Entry::new(Value::Integer(*delta), None));
                Ok(Outcome::Int(*delta))
            }
            Mutation::PushFront { key, element } => self.list_push(key, element, true, now),
            Mutation::PushBack { key, element } => self.list_push(key, element, false, now),
            Mutation::PopFront { key } => self.list_pop(key, true, now),
            Mutation::PopBack { key } => self.list_pop(key, false, now),
            Mutation::HashSet { key, field, value } => {
                self.take_if_expired(key, now);
                if let Some(e) = self.entries.get_mut(&key[..]) {
                    return match &mut e.value {
                        Value::Hash(map) => Ok(Outcome::FieldCreated(
                            map.insert(field.clone(), value.clone()).is_none(),
                        )),
                        _ => Err(StoreError::WrongType),
                    };
                }
                let mut map = HashMap::new();
                map.insert(field.clone(), value.clone());
                self.entries
                    .insert(key.clone(), Entry::new(Value::Hash(map), None));
                Ok(Outcome::FieldCreated(true))
            }
            Mutation::HashDel { key, field } => {
                self.take_if_expired(key, now);
                let removed;
                let drained;
                match self.entries.get_mut(&key[..]) {
                    None => return Ok(Outcome::FieldRemoved(false)),
                    Some(e) => match &mut e.value {
                        Value::Hash(map) => {
                            removed = map.remove(&field[..]).is_some();
                            drained = map.is_empty();
                        }
                        _ => return Err(StoreError::WrongType),
                    },
                }
                if drained {
                    // Hash vazio não existe: a chave é removida junto.
                    self.remove_entry(&key[..]);
                }
                Ok(Outcome::FieldRemoved(removed))
            }
        }
    }

    fn list_push(
        &mut self,
        key: &Bytes,
        element: &Bytes,
        front: bool,
        now: Instant,
    ) -> Result<Outcome, StoreError> {
        self.take_if_expired(key, now);
        if let Some(e) = self.entries.get_mut(&key[..]) {
            return match &mut e.value {
                Value::List(list) => {
                    if front {
                        list.push_front(element.clone());
                    } else {
                        list.push_back(element.clone());
                    }
                    Ok(Outcome::Len(list.len()))
                }
                _ => Err(StoreError::WrongType),
            };
        }
        let mut list = VecDeque::new();
        list.push_back(element.clone());
        self.entries
            .insert(key.clone(), Entry::new(Value::List(list), None));
        Ok(Outcome::Len(1))
    }

    fn list_pop(&mut self, key: &Bytes, front: bool, now: Instant) -> Result<Outcome, StoreError> {
        self.take_if_expired(key, now);
        let popped;
        let drained;
        match self.entries.get_mut(&key[..]) {
            None => return Ok(Outcome::Popped(None)),
            Some(e) => match &mut e.value {
                Value::List(list) => {
                    popped = if front {
                        list.pop_front()
                    } else {
                        list.pop_back()
                    };
                    drained = list.is_empty();
                }
                _ => return Err(StoreError::WrongType),
            },
        }
        if drained {
            // O último pop remove a chave inteira.
            self.remove_entry(&key[..]);
        }
        Ok(Outcome::Popped(popped))
    }

    /// Expiração preguiçosa antes de qualquer checagem de tipo.
    fn take_if_expired(&mut self, key: &[u8], now: Instant) {
        let stale = self
            .entries
            .get(key)
            .map(|e| e.is_expired(now))
            .unwrap_or(false);
        if stale {
            self.remove_entry(key);
        }
    }

    fn remove_entry(&mut self, key: &[u8]) -> Option<Entry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.index_remove(key);
        }
        removed
    }

    fn index_add(&mut self, key: Bytes) {
        if !self.ttl_pos.contains_key(&key[..]) {
            self.ttl_pos.insert(key.clone(), self.ttl_keys.len());
            self.ttl_keys.push(key);
        }
    }

    fn index_remove(&mut self, key: &[u8]) {
        if let Some(pos) = self.ttl_pos.remove(key) {
            self.ttl_keys.swap_remove(pos);
            if pos < self.ttl_keys.len() {
                let moved = self.ttl_keys[pos].clone();
                self.ttl_pos.insert(moved, pos);
            }
        }
    }
}
