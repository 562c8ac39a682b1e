//! Diretório de dados: layout dos arquivos e lock de exclusividade.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use tracing::warn;

use emberkv_common::PersistError;

pub fn log_path(dir: &Path) -> PathBuf {
    dir.join("log")
}

pub fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join("snapshot")
}

pub fn snapshot_tmp_path(dir: &Path) -> PathBuf {
    dir.join("snapshot.tmp")
}

/// Diretório de dados aberto com lock exclusivo. O lock é de advisory e vive
/// enquanto o handle do arquivo LOCK viver; soltar o DataDir libera o
/// diretório para outro processo.
pub struct DataDir {
    path: PathBuf,
    _lock: File,
}

impl DataDir {
    /// Cria o diretório se preciso, adquire o lock e limpa restos de uma
    /// compactação interrompida. Lock ocupado é erro de operação (outro
    /// processo está servindo este diretório), não corrupção.
    pub fn acquire(path: &Path) -> Result<DataDir, PersistError> {
        fs::create_dir_all(path)?;

        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path.join("LOCK"))?;
        match lock.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(PersistError::Locked(path.display().to_string()));
            }
            Err(TryLockError::Error(e)) => return Err(PersistError::Io(e)),
        }

        // snapshot.tmp é sempre lixo: o rename nunca aconteceu
        let tmp = snapshot_tmp_path(path);
        if tmp.exists() {
            warn!(path = %tmp.display(), "removendo snapshot parcial de execução anterior");
            fs::remove_file(&tmp)?;
        }

        Ok(DataDir {
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
