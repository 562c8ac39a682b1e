/// Erros de framing do protocolo de linha.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("requisição incompleta")]
    Incomplete,
    #[error("escape binário malformado")]
    BadEscape,
    #[error("terminador de linha inválido")]
    BadLineEnding,
    #[error("requisição excede tamanho máximo ({0} bytes)")]
    RequestTooLarge(usize),
    #[error("resposta malformada: {0}")]
    BadReply(String),
}

impl ProtocolError {
    /// Token de erro visível ao cliente.
    pub fn kind(&self) -> &'static str {
        "PROTO"
    }
}

/// Erros de validação de comandos (aridade, argumentos).
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("número errado de argumentos para '{0}'")]
    WrongArity(String),
    #[error("'{0}' não é um inteiro válido")]
    NotAnInteger(String),
    #[error("tempo de expiração deve ser positivo")]
    InvalidExpiry,
    #[error("opção inválida para SET: {0}")]
    InvalidSetOption(String),
    #[error("tamanho de chave inválido ({0} bytes)")]
    KeySize(usize),
    #[error("valor excede o tamanho máximo ({0} bytes)")]
    ValueSize(usize),
}

impl CommandError {
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::ValueSize(_) => "RANGE",
            _ => "ARG",
        }
    }
}

/// Erros das operações do store.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("operação contra chave com tipo errado")]
    WrongType,
    #[error("chave não encontrada")]
    KeyNotFound,
    #[error("overflow aritmético")]
    Overflow,
    #[error("persistência indisponível")]
    PersistenceFailed,
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::WrongType => "WRONGTYPE",
            StoreError::KeyNotFound => "NOKEY",
            StoreError::Overflow => "OVERFLOW",
            StoreError::PersistenceFailed => "INTERNAL",
        }
    }
}

/// Erros do subsistema de persistência (log + snapshot).
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O no log: {0}")]
    Io(#[from] std::io::Error),
    #[error("diretório de dados em uso por outra instância: {0}")]
    Locked(String),
    #[error("log corrompido: {0}")]
    Corrupt(String),
}

/// Erros de conexão TCP.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("conexão resetada pelo peer")]
    ConnectionReset,
    #[error("timeout de escrita na conexão")]
    WriteTimeout,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Erro top-level do EmberKV.
#[derive(Debug, thiserror::Error)]
pub enum EmberError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Result type alias.
pub type EmberResult<T> = Result<T, EmberError>;

// Conversão implícita de io::Error → EmberError (via ConnectionError)
impl From<std::io::Error> for EmberError {
    fn from(e: std::io::Error) -> Self {
        EmberError::Connection(ConnectionError::Io(e))
    }
}
