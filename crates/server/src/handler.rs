use tokio::sync::broadcast;
use tracing::debug;

use emberkv_common::{ConnectionError, StoreError};
use emberkv_protocol::{Command, Reply};
use emberkv_storage::{Mutation, Outcome, Store, TtlState};

use crate::Connection;

/// Loop principal de tratamento de uma conexão. Requisições são processadas
/// em série: a resposta de uma sai antes da próxima ser lida.
pub async fn handle_connection(
    mut conn: Connection,
    store: Store,
    shutdown: &mut broadcast::Receiver<()>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), ConnectionError> {
    loop {
        let args = tokio::select! {
            result = conn.read_request() => match result {
                Ok(Some(args)) => args,
                Ok(None) => return Ok(()), // EOF
                // Framing quebrado: responde PROTO e fecha a conexão.
                Err(ConnectionError::Protocol(e)) => {
                    let reply = Reply::Error(format!("{} {e}", e.kind()));
                    let _ = conn.write_reply(&reply).await;
                    return Ok(());
                }
                Err(e) => return Err(e),
            },
            _ = shutdown.recv() => {
                return Ok(());
            }
        };

        // Linha vazia é ignorada.
        if args.is_empty() {
            continue;
        }

        let cmd = match Command::from_args(args) {
            Ok(cmd) => cmd,
            // Erro de validação mantém a conexão aberta.
            Err(e) => {
                let reply = Reply::Error(format!("{} {e}", e.kind()));
                conn.write_reply(&reply).await?;
                continue;
            }
        };

        debug!("comando recebido: {cmd:?}");

        if matches!(cmd, Command::Shutdown) {
            conn.write_reply(&Reply::Simple("OK".into())).await?;
            let _ = shutdown_tx.send(());
            return Ok(());
        }

        let reply = execute(&cmd, &store).await;
        conn.write_reply(&reply).await?;

        // Persistência em Failed derruba o servidor depois de responder.
        if store.persist_failed() {
            let _ = shutdown_tx.send(());
            return Ok(());
        }
    }
}

/// Executa um comando e retorna a resposta.
pub async fn execute(cmd: &Command, store: &Store) -> Reply {
    match cmd {
        Command::Ping(msg) => match msg {
            Some(m) => Reply::Bulk(m.clone()),
            None => Reply::Simple("PONG".into()),
        },
        Command::Echo(msg) => Reply::Bulk(msg.clone()),
        Command::DbSize => Reply::Integer(store.len() as i64),

        Command::Get(key) => match store.get(key) {
            Ok(Some(value)) => Reply::Bulk(value),
            Ok(None) => Reply::Null,
            Err(e) => store_error(&e),
        },
        Command::Exists(key) => Reply::Integer(store.exists(key) as i64),
        Command::Ttl(key) => match store.ttl(key) {
            TtlState::Missing => Reply::Integer(-2),
            TtlState::Persistent => Reply::Integer(-1),
            // Arredonda para cima: 1 ms restante ainda conta um segundo.
            TtlState::Remaining(d) => {
                Reply::Integer((d.as_millis() as u64).div_ceil(1_000) as i64)
            }
        },
        Command::LLen(key) => match store.llen(key) {
            Ok(len) => Reply::Integer(len as i64),
            Err(e) => store_error(&e),
        },
        Command::HGet { key, field } => match store.hget(key, field) {
            Ok(Some(value)) => Reply::Bulk(value),
            Ok(None) => Reply::Null,
            Err(e) => store_error(&e),
        },

        Command::Set {
            key,
            value,
            ttl_secs,
        } => {
            apply_write(
                store,
                Mutation::Set {
                    key: key.clone(),
                    value: value.clone(),
                    ttl_ms: ttl_secs.map(|s| s.saturating_mul(1_000)),
                },
            )
            .await
        }
        Command::Del(key) => apply_write(store, Mutation::Del { key: key.clone() }).await,
        Command::Expire { key, seconds } => {
            apply_write(
                store,
                Mutation::Expire {
                    key: key.clone(),
                    ttl_ms: seconds.saturating_mul(1_000),
                },
            )
            .await
        }
        Command::Incr(key) => {
            apply_write(
                store,
                Mutation::Incr {
                    key: key.clone(),
                    delta: 1,
                },
            )
            .await
        }
        Command::IncrBy { key, delta } => {
            apply_write(
                store,
                Mutation::Incr {
                    key: key.clone(),
                    delta: *delta,
                },
            )
            .await
        }
        Command::LPush { key, element } => {
            apply_write(
                store,
                Mutation::PushFront {
                    key: key.clone(),
                    element: element.clone(),
                },
            )
            .await
        }
        Command::RPush { key, element } => {
            apply_write(
                store,
                Mutation::PushBack {
                    key: key.clone(),
                    element: element.clone(),
                },
            )
            .await
        }
        Command::LPop(key) => apply_write(store, Mutation::PopFront { key: key.clone() }).await,
        Command::RPop(key) => apply_write(store, Mutation::PopBack { key: key.clone() }).await,
        Command::HSet { key, field, value } => {
            apply_write(
                store,
                Mutation::HashSet {
                    key: key.clone(),
                    field: field.clone(),
                    value: value.clone(),
                },
            )
            .await
        }
        Command::HDel { key, field } => {
            apply_write(
                store,
                Mutation::HashDel {
                    key: key.clone(),
                    field: field.clone(),
                },
            )
            .await
        }

        Command::Unknown(name) => Reply::Error(format!("ARG comando desconhecido '{name}'")),
        Command::Shutdown => Reply::Simple("OK".into()),
    }
}

/// Aplica uma mutação e aguarda o ack de durabilidade fora do lock do store.
async fn apply_write(store: &Store, m: Mutation) -> Reply {
    match store.mutate(m) {
        Ok((outcome, ack)) => {
            if let Some(ack) = ack
                && ack.await.is_err()
            {
                // Writer morreu antes de confirmar este registro.
                store.mark_persist_failed();
                return store_error(&StoreError::PersistenceFailed);
            }
            outcome_reply(outcome)
        }
        Err(e) => store_error(&e),
    }
}

fn outcome_reply(outcome: Outcome) -> Reply {
    match outcome {
        Outcome::Done => Reply::Simple("OK".into()),
        Outcome::Existed(b) | Outcome::FieldCreated(b) | Outcome::FieldRemoved(b) => {
            Reply::Integer(b as i64)
        }
        Outcome::Int(n) => Reply::Integer(n),
        Outcome::Len(n) => Reply::Integer(n as i64),
        Outcome::Popped(Some(value)) => Reply::Bulk(value),
        Outcome::Popped(None) => Reply::Null,
    }
}

fn store_error(e: &StoreError) -> Reply {
    Reply::Error(format!("{} {e}", e.kind()))
}
