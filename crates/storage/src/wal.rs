//! Log de persistência write-ahead + snapshots de compactação.
//!
//! Cada registro é um frame `len: u32 LE | crc32: u32 LE | payload`, com o
//! payload começando em `seq: u64 LE | ts_ms: i64 LE | op: u8`. O CRC cobre
//! apenas o payload; `len` é o tamanho do payload. Uma cauda truncada ou com
//! CRC inválido encerra o replay no último registro válido e o arquivo é
//! fisicamente truncado ali. O snapshot usa o mesmo framing, mas carrega só
//! o estado final de cada chave.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use emberkv_common::{MAX_LOG_RECORD_SIZE, PersistError};

use crate::dir::{log_path, snapshot_path, snapshot_tmp_path};
use crate::entry::Value;
use crate::store::{Mutation, Store};

/// Modo de durabilidade por escrita.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// Persistência desativada.
    #[default]
    Off,
    /// Registro fica no buffer do writer; a resposta volta na hora.
    Buffered,
    /// Flush do buffer do processo antes de responder.
    Flush,
    /// Flush + fdatasync antes de responder.
    Sync,
}

/// Código de operação no payload.
mod op {
    pub const STATE: u8 = 0;
    pub const SET: u8 = 1;
    pub const DEL: u8 = 2;
    pub const EXPIRE: u8 = 3;
    pub const INCR: u8 = 4;
    pub const PUSH_FRONT: u8 = 5;
    pub const PUSH_BACK: u8 = 6;
    pub const POP_FRONT: u8 = 7;
    pub const POP_BACK: u8 = 8;
    pub const HSET: u8 = 9;
    pub const HDEL: u8 = 10;
}

/// Um registro do log: número de sequência, timestamp de parede (auditoria e
/// contabilização do downtime no replay) e a operação.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub seq: u64,
    pub ts_ms: i64,
    pub op: RecordOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOp {
    Mutation(Mutation),
    /// Registro de snapshot: estado final de uma chave, TTL restante em ms.
    State {
        key: Bytes,
        value: Value,
        ttl_ms: Option<u64>,
    },
}

/// Item enfileirado para o writer: registro + ack de durabilidade.
pub struct LogJob {
    pub record: Record,
    pub ack: oneshot::Sender<()>,
}

/// Relógio de parede em ms desde a época. Só aparece em registros; expiração
/// usa o clock monotônico.
pub fn wall_now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl Record {
    /// Codifica o frame completo (len + crc + payload) em `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        let mut payload = BytesMut::with_capacity(64);
        payload.put_u64_le(self.seq);
        payload.put_i64_le(self.ts_ms);
        match &self.op {
            RecordOp::State { key, value, ttl_ms } => {
                payload.put_u8(op::STATE);
                put_bytes(&mut payload, key);
                put_value(&mut payload, value);
                put_ttl(&mut payload, *ttl_ms);
            }
            RecordOp::Mutation(m) => encode_mutation(m, &mut payload),
        }
        dst.put_u32_le(payload.len() as u32);
        dst.put_u32_le(crc32fast::hash(&payload));
        dst.put(payload);
    }
}

fn encode_mutation(m: &Mutation, dst: &mut BytesMut) {
    match m {
        Mutation::Set { key, value, ttl_ms } => {
            dst.put_u8(op::SET);
            put_bytes(dst, key);
            put_bytes(dst, value);
            put_ttl(dst, *ttl_ms);
        }
        Mutation::Del { key } => {
            dst.put_u8(op::DEL);
            put_bytes(dst, key);
        }
        Mutation::Expire { key, ttl_ms } => {
            dst.put_u8(op::EXPIRE);
            put_bytes(dst, key);
            dst.put_u64_le(*ttl_ms);
        }
        Mutation::Incr { key, delta } => {
            dst.put_u8(op::INCR);
            put_bytes(dst, key);
            dst.put_i64_le(*delta);
        }
        Mutation::PushFront { key, element } => {
            dst.put_u8(op::PUSH_FRONT);
            put_bytes(dst, key);
            put_bytes(dst, element);
        }
        Mutation::PushBack { key, element } => {
            dst.put_u8(op::PUSH_BACK);
            put_bytes(dst, key);
            put_bytes(dst, element);
        }
        Mutation::PopFront { key } => {
            dst.put_u8(op::POP_FRONT);
            put_bytes(dst, key);
        }
        Mutation::PopBack { key } => {
            dst.put_u8(op::POP_BACK);
            put_bytes(dst, key);
        }
        Mutation::HashSet { key, field, value } => {
            dst.put_u8(op::HSET);
            put_bytes(dst, key);
            put_bytes(dst, field);
            put_bytes(dst, value);
        }
        Mutation::HashDel { key, field } => {
            dst.put_u8(op::HDEL);
            put_bytes(dst, key);
            put_bytes(dst, field);
        }
    }
}

fn put_bytes(dst: &mut BytesMut, data: &[u8]) {
    dst.put_u32_le(data.len() as u32);
    dst.put(data);
}

fn put_ttl(dst: &mut BytesMut, ttl_ms: Option<u64>) {
    match ttl_ms {
        Some(ms) => {
            dst.put_u8(1);
            dst.put_u64_le(ms);
        }
        None => dst.put_u8(0),
    }
}

fn put_value(dst: &mut BytesMut, value: &Value) {
    match value {
        Value::String(data) => {
            dst.put_u8(0);
            put_bytes(dst, data);
        }
        Value::Integer(n) => {
            dst.put_u8(1);
            dst.put_i64_le(*n);
        }
        Value::List(list) => {
            dst.put_u8(2);
            dst.put_u32_le(list.len() as u32);
            for e in list {
                put_bytes(dst, e);
            }
        }
        Value::Hash(map) => {
            dst.put_u8(3);
            dst.put_u32_le(map.len() as u32);
            for (field, val) in map {
                put_bytes(dst, field);
                put_bytes(dst, val);
            }
        }
    }
}

// --- decodificação ---

fn corrupt(msg: &str) -> PersistError {
    PersistError::Corrupt(msg.to_string())
}

/// Cursor sobre um payload já validado pelo CRC. Um payload que não decodifica
/// atrás de um CRC válido é corrupção irrecuperável, não cauda truncada.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf }
    }

    fn u8(&mut self) -> Result<u8, PersistError> {
        if self.buf.remaining() < 1 {
            return Err(corrupt("payload curto"));
        }
        Ok(self.buf.get_u8())
    }

    fn u32(&mut self) -> Result<u32, PersistError> {
        if self.buf.remaining() < 4 {
            return Err(corrupt("payload curto"));
        }
        Ok(self.buf.get_u32_le())
    }

    fn u64(&mut self) -> Result<u64, PersistError> {
        if self.buf.remaining() < 8 {
            return Err(corrupt("payload curto"));
        }
        Ok(self.buf.get_u64_le())
    }

    fn i64(&mut self) -> Result<i64, PersistError> {
        if self.buf.remaining() < 8 {
            return Err(corrupt("payload curto"));
        }
        Ok(self.buf.get_i64_le())
    }

    fn bytes(&mut self) -> Result<Bytes, PersistError> {
        let len = self.u32()? as usize;
        if self.buf.remaining() < len {
            return Err(corrupt("campo maior que o payload"));
        }
        Ok(self.buf.copy_to_bytes(len))
    }

    fn ttl(&mut self) -> Result<Option<u64>, PersistError> {
        match self.u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.u64()?)),
            _ => Err(corrupt("flag de TTL inválida")),
        }
    }

    fn value(&mut self) -> Result<Value, PersistError> {
        match self.u8()? {
            0 => Ok(Value::String(self.bytes()?)),
            1 => Ok(Value::Integer(self.i64()?)),
            2 => {
                let count = self.u32()? as usize;
                let mut list = std::collections::VecDeque::with_capacity(count.min(1024));
                for _ in 0..count {
                    list.push_back(self.bytes()?);
                }
                Ok(Value::List(list))
            }
            3 => {
                let count = self.u32()? as usize;
                let mut map = std::collections::HashMap::with_capacity(count.min(1024));
                for _ in 0..count {
                    let field = self.bytes()?;
                    let val = self.bytes()?;
                    map.insert(field, val);
                }
                Ok(Value::Hash(map))
            }
            tag => Err(corrupt(&format!("tag de valor desconhecida: {tag}"))),
        }
    }

    fn finish(&self) -> Result<(), PersistError> {
        if self.buf.has_remaining() {
            return Err(corrupt("bytes sobrando no payload"));
        }
        Ok(())
    }
}

/// Decodifica um payload (já validado pelo CRC) em um Record.
pub fn decode_record(payload: &[u8]) -> Result<Record, PersistError> {
    let mut r = Reader::new(payload);
    let seq = r.u64()?;
    let ts_ms = r.i64()?;
    let opcode = r.u8()?;
    let op = match opcode {
        op::STATE => RecordOp::State {
            key: r.bytes()?,
            value: r.value()?,
            ttl_ms: r.ttl()?,
        },
        op::SET => RecordOp::Mutation(Mutation::Set {
            key: r.bytes()?,
            value: r.bytes()?,
            ttl_ms: r.ttl()?,
        }),
        op::DEL => RecordOp::Mutation(Mutation::Del { key: r.bytes()? }),
        op::EXPIRE => RecordOp::Mutation(Mutation::Expire {
            key: r.bytes()?,
            ttl_ms: r.u64()?,
        }),
        op::INCR => RecordOp::Mutation(Mutation::Incr {
            key: r.bytes()?,
            delta: r.i64()?,
        }),
        op::PUSH_FRONT => RecordOp::Mutation(Mutation::PushFront {
            key: r.bytes()?,
            element: r.bytes()?,
        }),
        op::PUSH_BACK => RecordOp::Mutation(Mutation::PushBack {
            key: r.bytes()?,
            element: r.bytes()?,
        }),
        op::POP_FRONT => RecordOp::Mutation(Mutation::PopFront { key: r.bytes()? }),
        op::POP_BACK => RecordOp::Mutation(Mutation::PopBack { key: r.bytes()? }),
        op::HSET => RecordOp::Mutation(Mutation::HashSet {
            key: r.bytes()?,
            field: r.bytes()?,
            value: r.bytes()?,
        }),
        op::HDEL => RecordOp::Mutation(Mutation::HashDel {
            key: r.bytes()?,
            field: r.bytes()?,
        }),
        other => return Err(corrupt(&format!("opcode desconhecido: {other}"))),
    };
    r.finish()?;
    Ok(Record { seq, ts_ms, op })
}

enum FrameScan {
    Eof,
    /// Cauda truncada, tamanho absurdo ou frame incompleto.
    Torn,
    Payload {
        start: usize,
        end: usize,
        crc: u32,
    },
}

fn scan_frame(data: &[u8], pos: usize) -> FrameScan {
    if pos == data.len() {
        return FrameScan::Eof;
    }
    if data.len() - pos < 8 {
        return FrameScan::Torn;
    }
    let len = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
    if len == 0 || len > MAX_LOG_RECORD_SIZE {
        return FrameScan::Torn;
    }
    let crc = u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]);
    let start = pos + 8;
    let end = start + len;
    if end > data.len() {
        return FrameScan::Torn;
    }
    FrameScan::Payload { start, end, crc }
}

// --- replay ---

#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayStats {
    pub snapshot_records: usize,
    pub log_records: usize,
    pub last_seq: u64,
}

/// TTL restante no momento do replay: desconta o downtime medido pelo relógio
/// de parede, saturando em zero (zero = entra já expirada e é colhida pela
/// checagem preguiçosa). Um relógio que andou para trás desconta nada.
fn adjusted_ttl(ttl_ms: u64, ts_ms: i64, wall_now: i64) -> u64 {
    let downtime = wall_now.saturating_sub(ts_ms).max(0) as u64;
    ttl_ms.saturating_sub(downtime)
}

fn adjust_mutation(m: Mutation, ts_ms: i64, wall_now: i64) -> Mutation {
    match m {
        Mutation::Set { key, value, ttl_ms } => Mutation::Set {
            key,
            value,
            ttl_ms: ttl_ms.map(|ms| adjusted_ttl(ms, ts_ms, wall_now)),
        },
        Mutation::Expire { key, ttl_ms } => Mutation::Expire {
            key,
            ttl_ms: adjusted_ttl(ttl_ms, ts_ms, wall_now),
        },
        other => other,
    }
}

/// Reconstrói o estado a partir de snapshot + log. Cauda inválida do log é
/// truncada e o replay continua dali; corrupção no snapshot ou payload
/// indecodificável atrás de CRC válido são irrecuperáveis.
pub fn replay(dir: &Path, store: &Store) -> Result<ReplayStats, PersistError> {
    let mut stats = ReplayStats::default();
    let wall_now = wall_now_ms();

    let snap = snapshot_path(dir);
    if snap.exists() {
        let data = fs::read(&snap)?;
        let mut pos = 0;
        loop {
            match scan_frame(&data, pos) {
                FrameScan::Eof => break,
                FrameScan::Torn => return Err(corrupt("snapshot truncado")),
                FrameScan::Payload { start, end, crc } => {
                    if crc32fast::hash(&data[start..end]) != crc {
                        return Err(corrupt("CRC inválido no snapshot"));
                    }
                    let rec = decode_record(&data[start..end])?;
                    stats.last_seq = stats.last_seq.max(rec.seq);
                    match rec.op {
                        RecordOp::State { key, value, ttl_ms } => {
                            let ttl = ttl_ms.map(|ms| adjusted_ttl(ms, rec.ts_ms, wall_now));
                            store.restore(key, value, ttl);
                        }
                        RecordOp::Mutation(_) => {
                            return Err(corrupt("registro de mutação dentro do snapshot"));
                        }
                    }
                    stats.snapshot_records += 1;
                    pos = end;
                }
            }
        }
        info!(registros = stats.snapshot_records, "snapshot restaurado");
    }

    // Registros com seq já coberto são pulados: uma queda entre o rename do
    // snapshot e o truncamento do log não pode aplicar o mesmo registro duas
    // vezes, e reprocessar o mesmo log num store já recuperado é no-op.
    let seq_floor = stats.last_seq.max(store.next_seq().saturating_sub(1));

    let logp = log_path(dir);
    if logp.exists() {
        let data = fs::read(&logp)?;
        let mut pos = 0;
        loop {
            let torn = match scan_frame(&data, pos) {
                FrameScan::Eof => break,
                FrameScan::Torn => true,
                FrameScan::Payload { start, end, crc } => {
                    if crc32fast::hash(&data[start..end]) != crc {
                        true
                    } else {
                        let rec = decode_record(&data[start..end])?;
                        stats.last_seq = stats.last_seq.max(rec.seq);
                        if rec.seq > seq_floor {
                            match rec.op {
                                RecordOp::Mutation(m) => {
                                    let m = adjust_mutation(m, rec.ts_ms, wall_now);
                                    if let Err(e) = store.apply_replayed(&m) {
                                        warn!("replay: mutação rejeitada: {e}");
                                    }
                                }
                                RecordOp::State { key, value, ttl_ms } => {
                                    let ttl =
                                        ttl_ms.map(|ms| adjusted_ttl(ms, rec.ts_ms, wall_now));
                                    store.restore(key, value, ttl);
                                }
                            }
                            stats.log_records += 1;
                        }
                        pos = end;
                        false
                    }
                }
            };
            if torn {
                warn!(offset = pos, "cauda inválida no log, truncando");
                truncate_at(&logp, pos as u64)?;
                break;
            }
        }
    }

    store.set_next_seq(store.next_seq().max(stats.last_seq + 1));
    Ok(stats)
}

fn truncate_at(path: &Path, len: u64) -> Result<(), PersistError> {
    let f = OpenOptions::new().write(true).open(path)?;
    f.set_len(len)?;
    f.sync_all()?;
    Ok(())
}

// --- compactação ---

/// Reescreve o estado durável como snapshot e trunca o log. A fonte é o
/// próprio disco (snapshot + log reprocessados num store rascunho), nunca o
/// mapa vivo: registros ainda na fila do writer caem no log novo e são
/// aplicados exatamente uma vez na próxima recuperação.
fn compact(dir: &Path) -> Result<(), PersistError> {
    let scratch = Store::new();
    let stats = replay(dir, &scratch)?;

    let ts = wall_now_ms();
    let mut buf = BytesMut::new();
    for (key, value, ttl_ms) in scratch.dump() {
        Record {
            seq: stats.last_seq,
            ts_ms: ts,
            op: RecordOp::State { key, value, ttl_ms },
        }
        .encode(&mut buf);
    }

    let tmp = snapshot_tmp_path(dir);
    let mut f = File::create(&tmp)?;
    f.write_all(&buf)?;
    f.sync_all()?;
    drop(f);
    fs::rename(&tmp, snapshot_path(dir))?;
    File::open(dir)?.sync_all()?;

    // o log só é truncado depois do rename durável
    truncate_at(&log_path(dir), 0)?;
    Ok(())
}

// --- writer ---

/// Task dona do arquivo de log: recebe registros pelo canal, aplica o modo
/// de durabilidade e responde o ack. Canal fechado = flush final e saída.
pub struct LogWriter {
    rx: mpsc::UnboundedReceiver<LogJob>,
    dir: PathBuf,
    mode: DurabilityMode,
    max_bytes: u64,
}

/// Cria o par (sender, writer) para o servidor pendurar no store.
pub fn create_log(
    dir: PathBuf,
    mode: DurabilityMode,
    max_bytes: u64,
) -> (mpsc::UnboundedSender<LogJob>, LogWriter) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        tx,
        LogWriter {
            rx,
            dir,
            mode,
            max_bytes,
        },
    )
}

impl LogWriter {
    pub async fn run(mut self) -> Result<(), PersistError> {
        let path = log_path(&self.dir);
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let mut writer = BufWriter::new(file);
        let mut appended = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        let mut buf = BytesMut::with_capacity(256);

        info!(path = %path.display(), modo = ?self.mode, "log writer iniciado");

        while let Some(job) = self.rx.recv().await {
            buf.clear();
            job.record.encode(&mut buf);
            writer.write_all(&buf).await?;
            match self.mode {
                DurabilityMode::Off | DurabilityMode::Buffered => {}
                DurabilityMode::Flush => writer.flush().await?,
                DurabilityMode::Sync => {
                    writer.flush().await?;
                    writer.get_ref().sync_data().await?;
                }
            }
            appended += buf.len() as u64;
            // ack só depois da durabilidade do modo configurado
            let _ = job.ack.send(());

            if appended >= self.max_bytes {
                writer.flush().await?;
                writer.get_ref().sync_data().await?;
                let dir = self.dir.clone();
                tokio::task::spawn_blocking(move || compact(&dir))
                    .await
                    .map_err(|e| PersistError::Io(std::io::Error::other(e)))??;
                appended = 0;
                info!("compactação concluída");
            }
        }

        // canal fechado: flush final antes de sair
        writer.flush().await?;
        writer.get_ref().sync_data().await?;
        info!("log writer encerrado");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TtlState;
    use tempfile::tempdir;
    use tokio::time::Duration;

    fn sorted_dump(store: &Store) -> Vec<(Bytes, Value, Option<u64>)> {
        let mut d = store.dump();
        d.sort_by(|a, b| a.0.cmp(&b.0));
        d
    }

    async fn with_writer(dir: &Path, mode: DurabilityMode, max_bytes: u64) -> (Store, tokio::task::JoinHandle<Result<(), PersistError>>) {
        let store = Store::new();
        replay(dir, &store).unwrap();
        let (tx, writer) = create_log(dir.to_path_buf(), mode, max_bytes);
        store.attach_log(tx);
        let handle = tokio::spawn(writer.run());
        (store, handle)
    }

    async fn mutate_durable(store: &Store, m: Mutation) {
        let (_, ack) = store.mutate(m).unwrap();
        if let Some(ack) = ack {
            ack.await.unwrap();
        }
    }

    async fn close(store: &Store, handle: tokio::task::JoinHandle<Result<(), PersistError>>) {
        store.detach_log();
        handle.await.unwrap().unwrap();
    }

    #[test]
    fn record_roundtrip() {
        let records = [
            Record {
                seq: 7,
                ts_ms: 1_700_000_000_000,
                op: RecordOp::Mutation(Mutation::Set {
                    key: Bytes::from("chave"),
                    value: Bytes::from(&b"bin\r\n\x00"[..]),
                    ttl_ms: Some(30_000),
                }),
            },
            Record {
                seq: 8,
                ts_ms: 1_700_000_000_100,
                op: RecordOp::Mutation(Mutation::HashSet {
                    key: Bytes::from("h"),
                    field: Bytes::from("f"),
                    value: Bytes::from("v"),
                }),
            },
            Record {
                seq: 9,
                ts_ms: 1_700_000_000_200,
                op: RecordOp::State {
                    key: Bytes::from("l"),
                    value: Value::List([Bytes::from("a"), Bytes::from("b")].into()),
                    ttl_ms: None,
                },
            },
        ];
        for rec in records {
            let mut buf = BytesMut::new();
            rec.encode(&mut buf);
            match scan_frame(&buf, 0) {
                FrameScan::Payload { start, end, crc } => {
                    assert_eq!(crc32fast::hash(&buf[start..end]), crc);
                    assert_eq!(decode_record(&buf[start..end]).unwrap(), rec);
                    assert_eq!(end, buf.len());
                }
                _ => panic!("frame completo esperado"),
            }
        }
    }

    #[test]
    fn decode_rejects_garbage_behind_valid_crc() {
        // payload arbitrário com opcode inválido
        let mut payload = BytesMut::new();
        payload.put_u64_le(1);
        payload.put_i64_le(0);
        payload.put_u8(99);
        assert!(matches!(
            decode_record(&payload),
            Err(PersistError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn write_then_replay_restores_state() {
        let dir = tempdir().unwrap();
        let (store, handle) = with_writer(dir.path(), DurabilityMode::Sync, u64::MAX).await;

        mutate_durable(
            &store,
            Mutation::Set {
                key: Bytes::from("a"),
                value: Bytes::from("1"),
                ttl_ms: None,
            },
        )
        .await;
        for _ in 0..3 {
            mutate_durable(&store, Mutation::Incr { key: Bytes::from("c"), delta: 2 }).await;
        }
        mutate_durable(
            &store,
            Mutation::PushBack {
                key: Bytes::from("l"),
                element: Bytes::from("x"),
            },
        )
        .await;
        mutate_durable(
            &store,
            Mutation::HashSet {
                key: Bytes::from("h"),
                field: Bytes::from("f"),
                value: Bytes::from("v"),
            },
        )
        .await;
        close(&store, handle).await;

        let fresh = Store::new();
        let stats = replay(dir.path(), &fresh).unwrap();
        assert_eq!(stats.log_records, 6);
        assert_eq!(sorted_dump(&fresh), sorted_dump(&store));
    }

    #[tokio::test]
    async fn replay_is_idempotent() {
        let dir = tempdir().unwrap();
        let (store, handle) = with_writer(dir.path(), DurabilityMode::Sync, u64::MAX).await;
        mutate_durable(
            &store,
            Mutation::Set {
                key: Bytes::from("k"),
                value: Bytes::from("v"),
                ttl_ms: None,
            },
        )
        .await;
        mutate_durable(&store, Mutation::Incr { key: Bytes::from("c"), delta: 5 }).await;
        close(&store, handle).await;

        let once = Store::new();
        replay(dir.path(), &once).unwrap();

        let twice = Store::new();
        replay(dir.path(), &twice).unwrap();
        replay(dir.path(), &twice).unwrap();

        // dois replays do mesmo log = um replay (Set e Incr de replay não
        // acumulam porque o segundo replay parte do mesmo arquivo)
        assert_eq!(sorted_dump(&once), sorted_dump(&twice));
    }

    #[tokio::test]
    async fn torn_tail_is_truncated_and_prefix_applied() {
        let dir = tempdir().unwrap();
        let (store, handle) = with_writer(dir.path(), DurabilityMode::Sync, u64::MAX).await;
        mutate_durable(
            &store,
            Mutation::Set {
                key: Bytes::from("a"),
                value: Bytes::from("1"),
                ttl_ms: None,
            },
        )
        .await;
        mutate_durable(
            &store,
            Mutation::Set {
                key: Bytes::from("b"),
                value: Bytes::from("2"),
                ttl_ms: None,
            },
        )
        .await;
        close(&store, handle).await;

        // simula crash no meio de um append
        let logp = log_path(dir.path());
        let valid_len = fs::metadata(&logp).unwrap().len();
        let mut f = OpenOptions::new().append(true).open(&logp).unwrap();
        f.write_all(&[0x21, 0x00, 0x00]).unwrap();
        drop(f);

        let fresh = Store::new();
        let stats = replay(dir.path(), &fresh).unwrap();
        assert_eq!(stats.log_records, 2);
        assert_eq!(fresh.get(b"a").unwrap(), Some(Bytes::from("1")));
        assert_eq!(fresh.get(b"b").unwrap(), Some(Bytes::from("2")));
        // arquivo truncado de volta ao prefixo válido
        assert_eq!(fs::metadata(&logp).unwrap().len(), valid_len);

        // a sequência continua do último registro válido
        let (tx, writer) = create_log(dir.path().to_path_buf(), DurabilityMode::Sync, u64::MAX);
        fresh.attach_log(tx);
        let handle = tokio::spawn(writer.run());
        mutate_durable(
            &fresh,
            Mutation::Set {
                key: Bytes::from("c"),
                value: Bytes::from("3"),
                ttl_ms: None,
            },
        )
        .await;
        close(&fresh, handle).await;

        let again = Store::new();
        let stats = replay(dir.path(), &again).unwrap();
        assert_eq!(stats.log_records, 3);
        assert_eq!(stats.last_seq, 3);
    }

    #[tokio::test]
    async fn bad_crc_truncates_from_that_record() {
        let dir = tempdir().unwrap();
        let (store, handle) = with_writer(dir.path(), DurabilityMode::Sync, u64::MAX).await;
        mutate_durable(
            &store,
            Mutation::Set {
                key: Bytes::from("a"),
                value: Bytes::from("1"),
                ttl_ms: None,
            },
        )
        .await;
        let first_len = fs::metadata(log_path(dir.path())).unwrap().len();
        mutate_durable(
            &store,
            Mutation::Set {
                key: Bytes::from("b"),
                value: Bytes::from("2"),
                ttl_ms: None,
            },
        )
        .await;
        close(&store, handle).await;

        // corrompe um byte do payload do segundo registro
        let logp = log_path(dir.path());
        let mut data = fs::read(&logp).unwrap();
        let n = data.len();
        data[n - 1] ^= 0xFF;
        fs::write(&logp, &data).unwrap();

        let fresh = Store::new();
        let stats = replay(dir.path(), &fresh).unwrap();
        assert_eq!(stats.log_records, 1);
        assert_eq!(fresh.get(b"a").unwrap(), Some(Bytes::from("1")));
        assert_eq!(fresh.get(b"b").unwrap(), None);
        assert_eq!(fs::metadata(&logp).unwrap().len(), first_len);
    }

    #[tokio::test]
    async fn ttl_elapsed_during_downtime_is_reaped() {
        let dir = tempdir().unwrap();
        // registro escrito "5 segundos atrás" com TTL de 1 segundo
        let rec = Record {
            seq: 1,
            ts_ms: wall_now_ms() - 5_000,
            op: RecordOp::Mutation(Mutation::Set {
                key: Bytes::from("t"),
                value: Bytes::from("v"),
                ttl_ms: Some(1_000),
            }),
        };
        let mut buf = BytesMut::new();
        rec.encode(&mut buf);
        fs::write(log_path(dir.path()), &buf).unwrap();

        let store = Store::new();
        let stats = replay(dir.path(), &store).unwrap();
        assert_eq!(stats.log_records, 1);
        // aplicada já expirada, invisível para qualquer leitura
        assert_eq!(store.get(b"t").unwrap(), None);
        assert!(!store.exists(b"t"));
    }

    #[tokio::test]
    async fn ttl_survives_restart_with_remaining_window() {
        let dir = tempdir().unwrap();
        let (store, handle) = with_writer(dir.path(), DurabilityMode::Sync, u64::MAX).await;
        mutate_durable(
            &store,
            Mutation::Set {
                key: Bytes::from("a"),
                value: Bytes::from("1"),
                ttl_ms: None,
            },
        )
        .await;
        mutate_durable(
            &store,
            Mutation::Set {
                key: Bytes::from("b"),
                value: Bytes::from("2"),
                ttl_ms: Some(3_600_000),
            },
        )
        .await;
        close(&store, handle).await;

        // "reinício": processo novo, mesmo diretório
        let fresh = Store::new();
        replay(dir.path(), &fresh).unwrap();
        assert_eq!(fresh.get(b"a").unwrap(), Some(Bytes::from("1")));
        assert_eq!(fresh.get(b"b").unwrap(), Some(Bytes::from("2")));
        match fresh.ttl(b"b") {
            TtlState::Remaining(d) => {
                assert!(d > Duration::ZERO && d <= Duration::from_secs(3_600));
            }
            other => panic!("TTL restante esperado, veio {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_log_after_snapshot_is_not_reapplied() {
        let dir = tempdir().unwrap();
        let rec = Record {
            seq: 1,
            ts_ms: wall_now_ms(),
            op: RecordOp::Mutation(Mutation::Incr {
                key: Bytes::from("c"),
                delta: 5,
            }),
        };
        let mut buf = BytesMut::new();
        rec.encode(&mut buf);
        fs::write(log_path(dir.path()), &buf).unwrap();

        compact(dir.path()).unwrap();

        // simula queda entre o rename do snapshot e o truncamento do log
        fs::write(log_path(dir.path()), &buf).unwrap();

        let store = Store::new();
        let stats = replay(dir.path(), &store).unwrap();
        assert_eq!(stats.log_records, 0);
        assert_eq!(store.get(b"c").unwrap(), Some(Bytes::from("5")));
    }

    #[tokio::test]
    async fn compaction_preserves_observable_state() {
        let dir = tempdir().unwrap();
        // limite minúsculo: compacta várias vezes durante a carga
        let (store, handle) = with_writer(dir.path(), DurabilityMode::Sync, 512).await;
        for i in 0..40 {
            mutate_durable(
                &store,
                Mutation::Set {
                    key: Bytes::from(format!("k{}", i % 8)),
                    value: Bytes::from(format!("v{i}")),
                    ttl_ms: None,
                },
            )
            .await;
        }
        mutate_durable(&store, Mutation::Del { key: Bytes::from("k0") }).await;
        close(&store, handle).await;

        assert!(snapshot_path(dir.path()).exists());
        assert!(!snapshot_tmp_path(dir.path()).exists());

        let fresh = Store::new();
        replay(dir.path(), &fresh).unwrap();
        assert_eq!(sorted_dump(&fresh), sorted_dump(&store));
        assert_eq!(fresh.len(), 7);
    }
}
